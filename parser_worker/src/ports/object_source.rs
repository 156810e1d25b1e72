use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

use crate::{domain::entities::object_location::ObjectLocation, helper::error_chain_fmt};

/// Text of an object, read in chunks of arbitrary size
pub type TextChunkStream = Pin<Box<dyn Stream<Item = Result<String, ObjectSourceError>> + Send>>;

/// Read and delete access to the uploaded exports
#[async_trait]
pub trait ObjectSource: Send + Sync {
    /// Opens a stream on the text of the object
    ///
    /// The stream is lazy: dropping it stops any further read.
    async fn open(&self, location: &ObjectLocation) -> Result<TextChunkStream, ObjectSourceError>;

    async fn delete(&self, location: &ObjectLocation) -> Result<(), ObjectSourceError>;
}

#[derive(thiserror::Error)]
pub enum ObjectSourceError {
    #[error("Object {0} not found")]
    NotFound(String),

    #[error("Access denied on object {0}")]
    AccessDenied(String),

    #[error("Transient I/O error on the object source")]
    TransientIOError(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl std::fmt::Debug for ObjectSourceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        error_chain_fmt(self, f)
    }
}
