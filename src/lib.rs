pub mod domain;

pub use domain::entities::conversation_turn::{AuthorRole, ConversationTurn, TurnContent};
pub use domain::services::decode_conversation::{decode_conversation, DecodeConversationError};
pub use domain::services::extract_linear_conversation::{
    extract_linear_conversation, LinearConversationExtractor, AFTER_CONTENT_KEY,
    LINEAR_CONVERSATION_MARKER,
};
