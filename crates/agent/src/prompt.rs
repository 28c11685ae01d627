//! Prompt assembly
//!
//! The system message carries the persona, address-term and greeting instructions and
//! the retrieved context; recent turns become chat history.

use companion_config::PersonaConfig;
use companion_core::{ChatMessage, ConversationTurn, Identity, Prompt, TurnRole};

use crate::text::strip_emoji;

pub struct PromptAssembler {
    persona: PersonaConfig,
    max_words: usize,
}

/// Per-turn inputs to [`PromptAssembler::assemble`]
pub struct PromptInput<'a> {
    pub identity: &'a Identity,
    pub first_meeting: bool,
    /// Rendered retrieval context; empty when retrieval found nothing or degraded
    pub context: &'a str,
    /// Recent turns, oldest first
    pub history: &'a [ConversationTurn],
    pub message: &'a str,
}

impl PromptAssembler {
    pub fn new(persona: PersonaConfig, max_words: usize) -> Self {
        Self { persona, max_words }
    }

    pub fn persona(&self) -> &PersonaConfig {
        &self.persona
    }

    fn persona_block(&self) -> String {
        let p = &self.persona;
        let mut out = match p.age {
            Some(age) => format!("Bạn là {}, {} {} tuổi.", p.name, p.description, age),
            None => format!("Bạn là {}, {}.", p.name, p.description),
        };
        if !p.traits.is_empty() {
            out.push_str(&format!("\nTính cách: {}.", p.traits.join(", ")));
        }
        if !p.speaking_style.is_empty() {
            out.push_str(&format!("\nPhong cách nói: {}.", p.speaking_style.join(", ")));
        }
        if !p.interests.is_empty() {
            out.push_str(&format!("\nSở thích: {}.", p.interests.join(", ")));
        }
        out
    }

    fn address_block(&self, identity: &Identity, first_meeting: bool) -> String {
        let self_term = &self.persona.pronouns.self_term;
        let mut out = format!(
            "Người đang nói chuyện tên là '{}'. Gọi người này là '{}' và xưng '{}'.",
            identity.display_name, identity.pronoun, self_term
        );

        if identity.is_owner {
            let owner = self
                .persona
                .owner_name
                .as_deref()
                .unwrap_or(&identity.display_name);
            out.push_str(&format!(
                "\nNgười này là {} - chủ nhân đã tạo ra {}. Thể hiện sự trân trọng và gắn bó đặc biệt.",
                owner, self.persona.name
            ));
        }

        if first_meeting {
            out.push_str("\nĐây là lần đầu gặp, hãy mở đầu bằng một lời chào ngắn gọn.");
        } else {
            out.push_str(
                "\nHai người đã trò chuyện trước đó. Không chào lại, trả lời trực tiếp và tự nhiên.",
            );
        }
        out
    }

    pub fn assemble(&self, input: PromptInput<'_>) -> Prompt {
        let mut system = self.persona_block();
        system.push_str("\n\n");
        system.push_str(&self.address_block(input.identity, input.first_meeting));
        system.push_str(&format!(
            "\nTrả lời bằng tiếng Việt, ngắn gọn, tối đa {} từ, không dùng emoji.",
            self.max_words
        ));

        for rule in &self.persona.rules {
            system.push_str("\n- ");
            system.push_str(rule);
        }

        if !input.context.is_empty() {
            system.push_str("\n\nThông tin tham khảo:\n");
            system.push_str(input.context);
        }

        let history = input
            .history
            .iter()
            .map(|turn| match turn.role {
                TurnRole::User => ChatMessage::user(turn.text.clone()),
                TurnRole::Agent => ChatMessage::assistant(turn.text.clone()),
            })
            .collect();

        Prompt {
            system: strip_emoji(&system),
            history,
            user: input.message.to_string(),
        }
    }
}
