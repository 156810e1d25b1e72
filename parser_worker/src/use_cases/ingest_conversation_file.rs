use std::sync::Arc;

use conversation_parser::{decode_conversation, LinearConversationExtractor};
use futures::StreamExt;
use tracing::{debug, error, info, warn};

use crate::{
    domain::entities::{
        object_location::ObjectLocation,
        object_notification::{NotificationParsingError, ObjectNotification},
        turn_record::TurnRecord,
    },
    helper::error_chain_fmt,
    ports::{
        notification_queue::{NotificationQueue, NotificationQueueError, QueueMessage},
        object_source::{ObjectSource, ObjectSourceError},
        record_store::{RecordStore, RecordStoreError},
    },
};

/// Furthest stage reached while handling one notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum IngestionStage {
    Received,
    Fetched,
    Extracted,
    Decoded,
    Persisted,
    SourceDeleted,
    Acknowledged,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistOutcome {
    Inserted(usize),
    /// A previous delivery of the same notification already stored the turns
    AlreadyIngested,
}

#[derive(thiserror::Error)]
pub enum IngestionFailure {
    #[error("Invalid notification: {0}")]
    InvalidNotification(#[source] NotificationParsingError),

    #[error("The source file could not be read: {0}")]
    SourceUnavailable(#[source] ObjectSourceError),

    #[error("No linear conversation found in the source file")]
    NoPayloadFound,

    #[error("The linear conversation could not be decoded: {0}")]
    PayloadDecodeError(String),

    #[error("The turn records could not be stored: {0}")]
    StoreError(#[source] RecordStoreError),

    #[error("The notification could not be acknowledged: {0}")]
    AcknowledgementFailed(#[source] NotificationQueueError),
}

impl IngestionFailure {
    /// Failures that may succeed on a later delivery of the same notification
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::SourceUnavailable(_) | Self::StoreError(_))
    }
}

impl std::fmt::Debug for IngestionFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        error_chain_fmt(self, f)
    }
}

/// Outcome of the handling of one notification
#[derive(Debug)]
pub struct IngestionReport {
    pub stage: IngestionStage,
    pub location: Option<ObjectLocation>,
    pub persisted: Option<PersistOutcome>,
    pub source_deleted: bool,
    pub failure: Option<IngestionFailure>,
}

impl IngestionReport {
    fn received() -> Self {
        Self {
            stage: IngestionStage::Received,
            location: None,
            persisted: None,
            source_deleted: false,
            failure: None,
        }
    }

    pub fn is_acknowledged(&self) -> bool {
        self.stage == IngestionStage::Acknowledged
    }
}

/// Turns an object created notification into stored conversation turns
///
/// A notification is acknowledged only once its outcome is final: turns persisted (or
/// already persisted by a previous delivery), or a failure that no retry would fix.
/// Retryable failures release the notification for a later delivery.
pub struct IngestConversationFile {
    object_source: Arc<dyn ObjectSource>,
    record_store: Arc<dyn RecordStore>,
    notification_queue: Arc<dyn NotificationQueue>,
}

impl IngestConversationFile {
    pub fn new(
        object_source: Arc<dyn ObjectSource>,
        record_store: Arc<dyn RecordStore>,
        notification_queue: Arc<dyn NotificationQueue>,
    ) -> Self {
        Self {
            object_source,
            record_store,
            notification_queue,
        }
    }

    #[tracing::instrument(
        name = "Ingesting conversation file",
        skip(self, message),
        fields(ack_token = ?message.ack_token)
    )]
    pub async fn execute(&self, message: &QueueMessage) -> IngestionReport {
        let mut report = IngestionReport::received();

        let location = match ObjectNotification::try_parsing(&message.body) {
            Ok(ObjectNotification::ObjectCreated(location)) => location,
            Ok(ObjectNotification::Ignored { event_name }) => {
                info!("Skipping {} notification", event_name);
                self.acknowledge(message, &mut report).await;
                return report;
            }
            Err(error) => {
                error!(?error, "Failed to parse notification, it will never be processable");
                report.failure = Some(IngestionFailure::InvalidNotification(error));
                self.acknowledge(message, &mut report).await;
                return report;
            }
        };

        info!("📥 Ingesting {}", location);
        report.location = Some(location.clone());

        if let Err(failure) = self.persist_turns(&location, &mut report).await {
            if failure.is_retryable() {
                error!(?failure, "Failed to ingest {}, releasing the notification", location);
                report.failure = Some(failure);
                self.release(message).await;
                return report;
            }

            warn!(?failure, "{} will never be ingested, consuming it", location);
            report.failure = Some(failure);
        }

        self.delete_source(&location, &mut report).await;
        self.acknowledge(message, &mut report).await;
        report
    }

    /// Streams the source file into the extractor, then decodes and stores the turns
    async fn persist_turns(
        &self,
        location: &ObjectLocation,
        report: &mut IngestionReport,
    ) -> Result<(), IngestionFailure> {
        let mut chunks = match self.object_source.open(location).await {
            Ok(chunks) => chunks,
            Err(ObjectSourceError::NotFound(key)) if self.is_already_ingested(location).await => {
                info!(%key, "Source already deleted after the ingestion of {}", location);
                report.persisted = Some(PersistOutcome::AlreadyIngested);
                report.stage = IngestionStage::Persisted;
                return Ok(());
            }
            Err(error) => return Err(IngestionFailure::SourceUnavailable(error)),
        };
        report.stage = IngestionStage::Fetched;

        let mut extractor = LinearConversationExtractor::new();
        while let Some(chunk) = chunks.next().await {
            let chunk = chunk.map_err(IngestionFailure::SourceUnavailable)?;

            if extractor.feed(&chunk) {
                debug!("Linear conversation fully captured, stopping the read");
                break;
            }
        }
        drop(chunks);

        let payload = extractor.finish();
        report.stage = IngestionStage::Extracted;
        if payload.is_empty() {
            return Err(IngestionFailure::NoPayloadFound);
        }

        let turns = decode_conversation(&payload)
            .map_err(|error| IngestionFailure::PayloadDecodeError(error.to_string()))?;
        let records = turns
            .into_iter()
            .map(|turn| TurnRecord::try_from_turn(location, turn))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|error| IngestionFailure::PayloadDecodeError(error.to_string()))?;
        report.stage = IngestionStage::Decoded;
        info!("Decoded {} turns from {}", records.len(), location);

        match self.record_store.insert_all(&records).await {
            Ok(()) => report.persisted = Some(PersistOutcome::Inserted(records.len())),
            Err(RecordStoreError::UniqueConstraintViolation(constraint)) => {
                info!(%constraint, "Turns of {} were already stored", location);
                report.persisted = Some(PersistOutcome::AlreadyIngested);
            }
            Err(error) => return Err(IngestionFailure::StoreError(error)),
        }
        report.stage = IngestionStage::Persisted;

        Ok(())
    }

    /// A source missing after its turns were stored was deleted by a previous delivery
    async fn is_already_ingested(&self, location: &ObjectLocation) -> bool {
        match self.record_store.list_by_file(location).await {
            Ok(records) => !records.is_empty(),
            Err(error) => {
                warn!(?error, "Failed to look for the stored turns of {}", location);
                false
            }
        }
    }

    async fn delete_source(&self, location: &ObjectLocation, report: &mut IngestionReport) {
        match self.object_source.delete(location).await {
            Ok(()) => report.source_deleted = true,
            Err(ObjectSourceError::NotFound(_)) => {
                debug!("{} was already deleted", location);
                report.source_deleted = true;
            }
            Err(error) => warn!(?error, "Failed to delete {}", location),
        }
        report.stage = IngestionStage::SourceDeleted;
    }

    async fn acknowledge(&self, message: &QueueMessage, report: &mut IngestionReport) {
        match self.notification_queue.ack(&message.ack_token).await {
            Ok(()) => report.stage = IngestionStage::Acknowledged,
            Err(error) => {
                error!(?error, "Failed to acknowledge notification");
                if report.failure.is_none() {
                    report.failure = Some(IngestionFailure::AcknowledgementFailed(error));
                }
            }
        }
    }

    async fn release(&self, message: &QueueMessage) {
        if let Err(error) = self.notification_queue.release(&message.ack_token).await {
            error!(?error, "Failed to release notification");
        }
    }
}
