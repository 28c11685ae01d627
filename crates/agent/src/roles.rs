//! Role detection for retrieval filtering

use std::collections::{BTreeMap, BTreeSet};

use companion_config::ConversationConfig;
use companion_core::{Identity, RoleFilter};

use crate::text::contains_phrase;

#[derive(Debug, Clone, Default)]
pub struct RoleDetector {
    keywords: BTreeMap<String, Vec<String>>,
    default_roles: BTreeSet<String>,
}

impl RoleDetector {
    pub fn new(
        keywords: BTreeMap<String, Vec<String>>,
        default_roles: impl IntoIterator<Item = String>,
    ) -> Self {
        Self {
            keywords,
            default_roles: default_roles.into_iter().collect(),
        }
    }

    pub fn from_config(config: &ConversationConfig) -> Self {
        Self::new(config.role_keywords.clone(), config.default_roles.clone())
    }

    /// Roles whose keywords appear in `text`
    pub fn detect(&self, text: &str) -> BTreeSet<String> {
        self.keywords
            .iter()
            .filter(|(_, words)| words.iter().any(|w| contains_phrase(text, w)))
            .map(|(role, _)| role.clone())
            .collect()
    }

    /// Identity roles, detected roles and default roles combined
    pub fn filter_for(&self, identity: &Identity, text: &str) -> RoleFilter {
        let mut roles = self.default_roles.clone();
        roles.extend(identity.role_tags.iter().cloned());
        roles.extend(self.detect(text));
        RoleFilter::new(roles)
    }
}
