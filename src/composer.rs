use chrono::{SecondsFormat, Utc};

use crate::api::models::{Message, MessageSender, MessageStatus, TEMP_ID_PREFIX};

/// A submitted message: the placeholder to show now and the text to send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Draft {
    pub placeholder: Message,
}

impl Draft {
    pub fn temp_id(&self) -> &str {
        &self.placeholder.id
    }

    pub fn text(&self) -> &str {
        &self.placeholder.text
    }
}

/// Input state of the message box.
#[derive(Debug, Clone, Default)]
pub struct Composer {
    input: String,
}

impl Composer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn text(&self) -> &str {
        &self.input
    }

    pub fn set_text(&mut self, text: impl Into<String>) {
        self.input = text.into();
    }

    pub fn can_submit(&self, page_loaded: bool) -> bool {
        page_loaded && !self.input.trim().is_empty()
    }

    /// Take the input as a draft and clear the box.
    pub fn submit(&mut self, page_loaded: bool) -> Option<Draft> {
        if !self.can_submit(page_loaded) {
            return None;
        }
        let text = std::mem::take(&mut self.input);
        Some(Draft {
            placeholder: placeholder_for(text),
        })
    }
}

pub fn new_temp_id() -> String {
    format!("{TEMP_ID_PREFIX}{}", uuid::Uuid::new_v4().simple())
}

/// Same shape as JavaScript's `toISOString`.
pub fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn placeholder_for(text: String) -> Message {
    Message {
        id: new_temp_id(),
        text,
        status: MessageStatus::Sending,
        updated_at: now_timestamp(),
        sender: MessageSender::Admin,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_input_or_unloaded_page_cannot_submit() {
        let mut composer = Composer::new();
        assert!(!composer.can_submit(true));
        composer.set_text("   \t");
        assert!(!composer.can_submit(true));
        composer.set_text("hi");
        assert!(!composer.can_submit(false));
        assert!(composer.submit(false).is_none());
        assert_eq!(composer.text(), "hi");
    }

    #[test]
    fn submit_builds_placeholder_and_clears_input() {
        let mut composer = Composer::new();
        composer.set_text("hi");
        let draft = composer.submit(true).unwrap();
        assert_eq!(composer.text(), "");
        assert_eq!(draft.text(), "hi");
        assert!(draft.placeholder.is_temporary());
        assert_eq!(draft.placeholder.status, MessageStatus::Sending);
        assert_eq!(draft.placeholder.sender, MessageSender::Admin);
        assert!(draft.placeholder.updated_at.ends_with('Z'));
    }

    #[test]
    fn temp_ids_are_unique() {
        assert_ne!(new_temp_id(), new_temp_id());
    }
}
