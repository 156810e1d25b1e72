use log::debug;

use crate::domain::entities::{
    conversation_node::ConversationNode,
    conversation_turn::{AuthorRole, ConversationTurn, TurnContent},
};

#[derive(thiserror::Error, Debug)]
pub enum DecodeConversationError {
    #[error("The extracted payload is not a JSON list of conversation nodes: {0}")]
    MalformedPayload(#[from] serde_json::Error),
}

/// Decodes the extracted linear conversation into its user and assistant turns
///
/// A node is kept if its author role is `user` or `assistant` and at least one of its
/// content parts is not empty. Kept turns are returned in document order.
///
/// # Arguments
/// * `payload` - JSON list of conversation nodes, as returned by the extractor
pub fn decode_conversation(payload: &str) -> Result<Vec<ConversationTurn>, DecodeConversationError> {
    let nodes: Vec<ConversationNode> = serde_json::from_str(payload)?;
    debug!("Decoded {} conversation nodes", nodes.len());

    let turns = nodes
        .into_iter()
        .enumerate()
        .filter_map(|(node_index, node)| {
            let ConversationNode::WithMessage(node) = node else {
                return None;
            };

            let author_role = node.message.author.role.parse::<AuthorRole>().ok()?;
            let parts = node.message.content.text_parts();

            if parts.iter().all(|part| part.is_empty()) {
                return None;
            }

            Some((node_index, author_role, node.message.content.content_type, parts))
        })
        .enumerate()
        .map(
            |(sequence_index, (node_index, author_role, content_type, parts))| ConversationTurn {
                author_role,
                content: TurnContent {
                    content_type,
                    parts,
                },
                sequence_index,
                node_index,
            },
        )
        .collect::<Vec<_>>();

    debug!("Kept {} conversation turns", turns.len());
    Ok(turns)
}

#[cfg(test)]
use demonstrate::demonstrate;

#[cfg(test)]
demonstrate! {
    describe "decode_conversation" {
        use super::*;

        before {
            let _ = pretty_env_logger::try_init();
        }

        describe "When the payload is a list of nodes" {
            it "should keep only the user and assistant messages with content" {
                let payload = concat!(
                    "[{\"message\":{\"author\":{\"role\":\"user\"},",
                    "\"content\":{\"content_type\":\"text\",\"parts\":[\"hi\"]}}},",
                    "{\"message\":{\"author\":{\"role\":\"system\"},",
                    "\"content\":{\"content_type\":\"text\",\"parts\":[\"ignored\"]}}},",
                    "{\"message\":null}]"
                );

                let turns = decode_conversation(payload).unwrap();

                assert_eq!(turns.len(), 1);
                assert_eq!(turns[0].author_role, AuthorRole::User);
                assert_eq!(turns[0].content.content_type, "text");
                assert_eq!(turns[0].content.parts, vec!["hi".to_string()]);
                assert_eq!(turns[0].sequence_index, 0);
                assert_eq!(turns[0].node_index, 0);
            }

            it "should number kept turns contiguously and keep their node positions" {
                let payload = r#"[
                    {"id":"root","children":["a"]},
                    {"message":{"author":{"role":"user"},"content":{"content_type":"text","parts":["question"]}}},
                    {"message":{"author":{"role":"tool"},"content":{"content_type":"text","parts":["tool output"]}}},
                    {"message":{"author":{"role":"assistant"},"content":{"content_type":"text","parts":[""]}}},
                    {"message":{"author":{"role":"assistant"},"content":{"content_type":"code","parts":["answer","more"]}}}
                ]"#;

                let turns = decode_conversation(payload).unwrap();

                let summary: Vec<(usize, usize, AuthorRole)> = turns
                    .iter()
                    .map(|turn| (turn.sequence_index, turn.node_index, turn.author_role))
                    .collect();
                assert_eq!(
                    summary,
                    vec![(0, 1, AuthorRole::User), (1, 4, AuthorRole::Assistant)]
                );
                assert_eq!(turns[1].content.content_type, "code");
                assert_eq!(turns[1].content.parts, vec!["answer".to_string(), "more".to_string()]);
            }

            it "should skip messages without parts" {
                let payload = r#"[
                    {"message":{"author":{"role":"user"},"content":{"content_type":"text"}}},
                    {"message":{"author":{"role":"user"},"content":{"content_type":"text","parts":[]}}}
                ]"#;

                assert!(decode_conversation(payload).unwrap().is_empty());
            }

            it "should keep non-string parts as JSON text" {
                let payload = r#"[
                    {"message":{"author":{"role":"user"},"content":{"content_type":"multimodal_text",
                    "parts":[{"asset_pointer":"file-1"},"look at this"]}}}
                ]"#;

                let turns = decode_conversation(payload).unwrap();

                assert_eq!(
                    turns[0].content.parts,
                    vec![
                        "{\"asset_pointer\":\"file-1\"}".to_string(),
                        "look at this".to_string()
                    ]
                );
            }

            it "should ignore entries that are not message nodes" {
                let payload = r#"[1, "text", {"message":{"author":{}}},
                    {"message":{"author":{"role":"assistant"},"content":{"content_type":"text","parts":["ok"]}}}]"#;

                let turns = decode_conversation(payload).unwrap();

                assert_eq!(turns.len(), 1);
                assert_eq!(turns[0].node_index, 3);
            }
        }

        describe "When the payload is not a list of nodes" {
            it "should fail on a malformed payload" {
                let result = decode_conversation("[{\"message\":");

                assert!(matches!(result, Err(DecodeConversationError::MalformedPayload(_))));
            }

            it "should fail on an empty payload" {
                assert!(decode_conversation("").is_err());
            }

            it "should fail on a JSON object" {
                assert!(decode_conversation("{\"a\":1}").is_err());
            }
        }
    }
}
