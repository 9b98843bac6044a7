use serde::{Deserialize, Serialize};

use crate::image_ref::ImageReference;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Model,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub id: String,
    pub role: Role,
    pub text: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<ImageReference>,
}

/// What the user submits for one turn.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TurnInput {
    pub text: String,
    pub attachments: Vec<ImageReference>,
}

impl TurnInput {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            attachments: Vec::new(),
        }
    }

    pub fn with_attachments(text: impl Into<String>, attachments: Vec<ImageReference>) -> Self {
        Self {
            text: text.into(),
            attachments,
        }
    }

    /// Nothing to send: whitespace-only text and no attachments.
    pub fn is_blank(&self) -> bool {
        self.text.trim().is_empty() && self.attachments.is_empty()
    }
}

/// In-memory, append-only session transcript.
#[derive(Debug, Clone, Default)]
pub struct Transcript {
    turns: Vec<ConversationTurn>,
    next_seq: u64,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_user(&mut self, input: &TurnInput) -> ConversationTurn {
        self.push(Role::User, input.text.clone(), input.attachments.clone())
    }

    pub fn push_model(&mut self, text: impl Into<String>) -> ConversationTurn {
        self.push(Role::Model, text.into(), Vec::new())
    }

    pub fn turns(&self) -> &[ConversationTurn] {
        &self.turns
    }

    fn push(&mut self, role: Role, text: String, images: Vec<ImageReference>) -> ConversationTurn {
        self.next_seq += 1;
        let turn = ConversationTurn {
            id: format!("turn-{}", self.next_seq),
            role,
            text,
            images,
        };
        self.turns.push(turn.clone());
        turn
    }
}

#[cfg(test)]
mod tests {
    use super::{Role, Transcript, TurnInput};
    use crate::image_ref::ImageReference;

    #[test]
    fn transcript_assigns_monotonic_ids() {
        let mut transcript = Transcript::new();
        let user = transcript.push_user(&TurnInput::text("hello"));
        let model = transcript.push_model("hi");
        assert_eq!(user.id, "turn-1");
        assert_eq!(model.id, "turn-2");
        assert_eq!(user.role, Role::User);
        assert_eq!(model.role, Role::Model);
        assert_eq!(transcript.turns().len(), 2);
    }

    #[test]
    fn user_turn_records_every_attachment() {
        let mut transcript = Transcript::new();
        let input = TurnInput::with_attachments(
            "",
            vec![
                ImageReference::handle("a.png"),
                ImageReference::handle("b.png"),
            ],
        );
        let turn = transcript.push_user(&input);
        assert_eq!(turn.images.len(), 2);
        assert!(turn.text.is_empty());
    }

    #[test]
    fn blank_input_requires_empty_text_and_no_attachments() {
        assert!(TurnInput::text("   ").is_blank());
        assert!(!TurnInput::text("render it").is_blank());
        assert!(!TurnInput::with_attachments("", vec![ImageReference::handle("a.png")]).is_blank());
    }

    #[test]
    fn role_serializes_lowercase() -> anyhow::Result<()> {
        assert_eq!(serde_json::to_string(&Role::Model)?, "\"model\"");
        Ok(())
    }
}
