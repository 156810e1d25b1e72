pub mod conversation_node;
pub mod conversation_turn;
