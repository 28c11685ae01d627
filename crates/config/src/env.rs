//! `${VAR}` expansion for YAML side files

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

static ENV_VAR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(?::-([^}]*))?\}").expect("valid env var pattern")
});

/// Replace `${VAR}` and `${VAR:-default}` with environment values
///
/// Unset variables without a default expand to an empty string and are logged.
pub fn substitute_env_vars(input: &str) -> String {
    substitute_with(input, |name| std::env::var(name).ok())
}

pub(crate) fn substitute_with<F>(input: &str, lookup: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    ENV_VAR
        .replace_all(input, |caps: &Captures| {
            let name = &caps[1];
            match lookup(name) {
                Some(value) => value,
                None => match caps.get(2) {
                    Some(default) => default.as_str().to_string(),
                    None => {
                        tracing::warn!(var = %name, "Environment variable not set, expanding to empty");
                        String::new()
                    }
                },
            }
        })
        .into_owned()
}
