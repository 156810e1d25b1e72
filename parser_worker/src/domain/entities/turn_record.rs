use chrono::{DateTime, Utc};
use conversation_parser::{AuthorRole, ConversationTurn, TurnContent};
use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;
use uuid::Uuid;

use crate::domain::entities::object_location::ObjectLocation;

/// A conversation turn attributed to the export it was decoded from
///
/// `(sequence_index, source_container, source_object_key)` is unique in the record store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TypedBuilder)]
pub struct TurnRecord {
    #[builder(default = Uuid::new_v4())]
    pub id: Uuid,
    #[builder(setter(into))]
    pub source_container: String,
    #[builder(setter(into))]
    pub source_object_key: String,
    pub author_role: AuthorRole,
    pub content: TurnContent,
    pub sequence_index: i32,
    pub node_index: i32,
}

impl TurnRecord {
    pub fn try_from_turn(
        location: &ObjectLocation,
        turn: ConversationTurn,
    ) -> Result<Self, std::num::TryFromIntError> {
        Ok(Self::builder()
            .source_container(location.container.as_str())
            .source_object_key(location.key.as_str())
            .author_role(turn.author_role)
            .content(turn.content)
            .sequence_index(i32::try_from(turn.sequence_index)?)
            .node_index(i32::try_from(turn.node_index)?)
            .build())
    }

    pub fn location(&self) -> ObjectLocation {
        ObjectLocation::new(&self.source_container, &self.source_object_key)
    }
}

/// A turn record as read back from the record store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredTurnRecord {
    pub record: TurnRecord,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
