use serde::{Deserialize, Serialize};

/// Roles of the messages kept from a conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthorRole {
    User,
    Assistant,
}

impl AuthorRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthorRole::User => "user",
            AuthorRole::Assistant => "assistant",
        }
    }
}

impl std::fmt::Display for AuthorRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for AuthorRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(AuthorRole::User),
            "assistant" => Ok(AuthorRole::Assistant),
            _ => Err(format!("Not a conversation turn role: {}", s)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnContent {
    pub content_type: String,
    pub parts: Vec<String>,
}

/// A user or assistant message decoded from a conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub author_role: AuthorRole,
    pub content: TurnContent,

    /// Position among the kept turns, contiguous from 0
    pub sequence_index: usize,

    /// Position of the node in the whole linear conversation
    pub node_index: usize,
}
