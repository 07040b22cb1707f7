use serde::{Deserialize, Serialize};

/// A chat message handed to a generation capability.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum Message {
    System { content: String },
    User { content: String },
    Assistant { content: String },
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Message::System {
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Message::User {
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Message::Assistant {
            content: content.into(),
        }
    }

    /// Extract the text content from any message variant.
    pub fn content(&self) -> &str {
        match self {
            Message::System { content } => content,
            Message::User { content } => content,
            Message::Assistant { content } => content,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_message_serde_roundtrip() {
        let msg = Message::user("Hello!");
        let json = serde_json::to_string(&msg).unwrap();
        let back: Message = serde_json::from_str(&json).unwrap();
        assert_eq!(msg, back);
        assert!(json.contains(r#""role":"user"#));
    }

    #[test]
    fn assistant_role_tag() {
        let json = serde_json::to_string(&Message::assistant("draft")).unwrap();
        assert!(json.contains(r#""role":"assistant"#));
    }

    #[test]
    fn content_accessor() {
        assert_eq!(Message::system("sys").content(), "sys");
        assert_eq!(Message::user("usr").content(), "usr");
        assert_eq!(Message::assistant("ai").content(), "ai");
    }

    #[test]
    fn deserialize_from_json_string() {
        let json = r#"{"role":"system","content":"be brief"}"#;
        let msg: Message = serde_json::from_str(json).unwrap();
        assert_eq!(msg, Message::system("be brief"));
    }
}
