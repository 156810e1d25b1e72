use async_trait::async_trait;

use crate::{
    domain::entities::{
        object_location::ObjectLocation,
        turn_record::{StoredTurnRecord, TurnRecord},
    },
    helper::error_chain_fmt,
};

/// Persistent store of turn records
///
/// Enforces uniqueness of `(sequence_index, source_container, source_object_key)`.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Inserts all the records atomically: either all of them are stored or none is
    async fn insert_all(&self, records: &[TurnRecord]) -> Result<(), RecordStoreError>;

    /// Deletes every record of a source file, returning how many were deleted
    async fn delete_by_file(&self, location: &ObjectLocation) -> Result<u64, RecordStoreError>;

    /// Records of a source file, ordered by their sequence index
    async fn list_by_file(
        &self,
        location: &ObjectLocation,
    ) -> Result<Vec<StoredTurnRecord>, RecordStoreError>;
}

#[derive(thiserror::Error)]
pub enum RecordStoreError {
    #[error("A record already exists for this file and sequence index: {0}")]
    UniqueConstraintViolation(String),

    #[error("The record store failed")]
    StoreError(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl std::fmt::Debug for RecordStoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        error_chain_fmt(self, f)
    }
}
