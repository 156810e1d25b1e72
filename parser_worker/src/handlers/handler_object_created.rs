use std::{sync::Arc, time::Duration};

use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, Instrument};

use crate::{
    configuration::WorkerSettings,
    helper::error_chain_fmt,
    ports::notification_queue::{NotificationQueue, NotificationQueueError},
    repositories::notification_rabbitmq_repository::NotificationRabbitMQRepository,
    use_cases::ingest_conversation_file::IngestConversationFile,
};

#[derive(thiserror::Error)]
pub enum RegisterHandlerObjectCreatedError {
    #[error(transparent)]
    NotificationQueueError(#[from] NotificationQueueError),
}

impl std::fmt::Debug for RegisterHandlerObjectCreatedError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        error_chain_fmt(self, f)
    }
}

/// Initializes a RabbitMQ channel for this handler, then runs it until cancelled
///
/// Expected to be spawned in its own task: each handler owns its channel.
#[tracing::instrument(
    name = "Register object created handler",
    skip(notification_repository, build_use_case, settings, cancel_token)
)]
pub async fn register_handler<F>(
    notification_repository: NotificationRabbitMQRepository,
    build_use_case: F,
    settings: WorkerSettings,
    cancel_token: CancellationToken,
) -> Result<(), RegisterHandlerObjectCreatedError>
where
    F: FnOnce(Arc<dyn NotificationQueue>) -> IngestConversationFile + Send,
{
    let notification_queue: Arc<dyn NotificationQueue> =
        Arc::new(notification_repository.try_init().await?);
    let use_case = Arc::new(build_use_case(notification_queue.clone()));

    run_handler(notification_queue, use_case, settings, cancel_token).await;

    Ok(())
}

/// Pulls notifications and ingests them one after the other
///
/// Cancellation is only observed between two notifications: a notification being ingested
/// is always handled until its end.
pub async fn run_handler(
    notification_queue: Arc<dyn NotificationQueue>,
    use_case: Arc<IngestConversationFile>,
    settings: WorkerSettings,
    cancel_token: CancellationToken,
) {
    let wait = Duration::from_secs(settings.wait_seconds);
    let retry_interval = Duration::from_millis(settings.poll_interval_ms);

    info!("📡 Waiting for object created notifications");

    loop {
        let received = tokio::select! {
            _ = cancel_token.cancelled() => break,
            received = notification_queue.receive(settings.max_messages, wait) => received,
        };

        let messages = match received {
            Ok(messages) => messages,
            Err(error) => {
                error!(?error, "Failed to receive notifications");

                tokio::select! {
                    _ = cancel_token.cancelled() => break,
                    _ = tokio::time::sleep(retry_interval) => continue,
                }
            }
        };

        for message in messages {
            let report = use_case
                .execute(&message)
                .instrument(info_span!(
                    "Handling queued notification",
                    message_id = %uuid::Uuid::new_v4(),
                ))
                .await;

            info!(
                stage = ?report.stage,
                persisted = ?report.persisted,
                failure = ?report.failure,
                "Notification handled"
            );
        }
    }

    info!("👋 Handler stopped");
}
