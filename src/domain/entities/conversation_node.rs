use serde::Deserialize;
use serde_json::Value as JsonValue;

/// One entry of the linear conversation
///
/// Only nodes holding a message with an author role and a typed content are `WithMessage`.
/// Everything else (root nodes, `"message": null`, unexpected shapes) is kept as `WithoutMessage`
/// so it still counts in the node positions.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum ConversationNode {
    WithMessage(NodeWithMessage),
    WithoutMessage(serde::de::IgnoredAny),
}

#[derive(Debug, Deserialize)]
pub struct NodeWithMessage {
    pub message: NodeMessage,
}

#[derive(Debug, Deserialize)]
pub struct NodeMessage {
    pub author: MessageAuthor,
    pub content: MessageContent,
}

#[derive(Debug, Deserialize)]
pub struct MessageAuthor {
    pub role: String,
}

#[derive(Debug, Deserialize)]
pub struct MessageContent {
    pub content_type: String,
    /// Mostly strings, but multimodal contents mix in objects
    #[serde(default)]
    pub parts: Vec<JsonValue>,
}

impl MessageContent {
    /// Parts as text: strings are kept as is, other values as their compact JSON
    pub fn text_parts(&self) -> Vec<String> {
        self.parts
            .iter()
            .map(|part| match part {
                JsonValue::String(text) => text.to_owned(),
                other => other.to_string(),
            })
            .collect()
    }
}
