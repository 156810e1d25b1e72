pub mod decode_conversation;
pub mod extract_linear_conversation;
