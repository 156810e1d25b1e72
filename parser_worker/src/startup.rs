use std::{sync::Arc, time::Duration};

use futures::{future::join_all, TryFutureExt};
use lapin::Connection as RabbitMQConnection;
use sqlx::{postgres::PgPoolOptions, PgPool};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::{
    configuration::{DatabaseSettings, RabbitMQSettings, Settings},
    handlers::handler_object_created::{self, RegisterHandlerObjectCreatedError},
    ports::{object_source::ObjectSource, record_store::RecordStore},
    repositories::{
        notification_rabbitmq_repository::NotificationRabbitMQRepository,
        source_file_s3_repository::S3Repository,
        turn_record_postgres_repository::TurnRecordPostgresRepository,
    },
    use_cases::ingest_conversation_file::IngestConversationFile,
};

/// Holds the RabbitMQ connection, the database pool and the running handlers
pub struct Application {
    rabbitmq_connection: Arc<RabbitMQConnection>,
    pg_pool: PgPool,
    handlers: Vec<JoinHandle<Result<(), ApplicationError>>>,
}

impl Application {
    /// Connects to the dependencies and spawns `worker.nb_handlers` handlers
    ///
    /// Every handler stops once `cancel_token` is cancelled.
    #[tracing::instrument(name = "Building worker application", skip(settings, cancel_token))]
    pub async fn build(
        settings: Settings,
        cancel_token: CancellationToken,
    ) -> Result<Self, ApplicationError> {
        let pg_pool = get_connection_pool(&settings.database);
        sqlx::migrate!("./migrations").run(&pg_pool).await?;
        info!("🏗️ Database migrated");

        let object_source: Arc<dyn ObjectSource> =
            Arc::new(S3Repository::new(&settings.object_storage));
        let record_store: Arc<dyn RecordStore> =
            Arc::new(TurnRecordPostgresRepository::new(pg_pool.clone()));

        // One connection shared by all the handlers, each one creating its own channel
        let rabbitmq_connection = Arc::new(get_rabbitmq_connection(&settings.rabbitmq).await?);
        let notification_repository = NotificationRabbitMQRepository::new(
            rabbitmq_connection.clone(),
            settings.rabbitmq.clone(),
            Duration::from_millis(settings.worker.poll_interval_ms),
        );

        let mut app = Self {
            rabbitmq_connection,
            pg_pool,
            handlers: vec![],
        };

        for _ in 0..settings.worker.nb_handlers.max(1) {
            let object_source = object_source.clone();
            let record_store = record_store.clone();

            let handler = tokio::spawn(
                handler_object_created::register_handler(
                    notification_repository.clone(),
                    move |notification_queue| {
                        IngestConversationFile::new(object_source, record_store, notification_queue)
                    },
                    settings.worker.clone(),
                    cancel_token.clone(),
                )
                .map_err(|e| e.into()),
            );

            app.handlers.push(handler);
        }

        info!("Spawned {} handlers", app.handlers.len());
        Ok(app)
    }

    /// Runs the application until every handler is stopped
    ///
    /// self is moved in order for the application not to drop out of scope
    pub async fn run_until_stopped(self) -> Result<(), ApplicationError> {
        let handler_results = join_all(self.handlers).await;

        for result in handler_results.iter() {
            match result {
                Ok(Ok(())) => {}
                Ok(Err(error)) => error!(?error, "Handler failed"),
                Err(error) => error!(?error, "Handler task panicked or was aborted"),
            }
        }

        if let Err(error) = self.rabbitmq_connection.close(0, "Worker stopped").await {
            error!(?error, "Failed to close the RabbitMQ connection");
        }
        self.pg_pool.close().await;

        info!("👋 Bye!");
        Ok(())
    }
}

pub fn get_connection_pool(settings: &DatabaseSettings) -> PgPool {
    PgPoolOptions::new()
        .acquire_timeout(std::time::Duration::from_secs(2))
        .connect_lazy_with(settings.with_db())
}

/// Creates a connection to RabbitMQ
pub async fn get_rabbitmq_connection(
    config: &RabbitMQSettings,
) -> Result<RabbitMQConnection, lapin::Error> {
    RabbitMQConnection::connect(&config.get_uri(), config.get_connection_properties()).await
}

#[derive(thiserror::Error, Debug)]
pub enum ApplicationError {
    #[error(transparent)]
    IOError(#[from] std::io::Error),
    #[error(transparent)]
    RabbitMQError(#[from] lapin::Error),
    #[error(transparent)]
    MigrateError(#[from] sqlx::migrate::MigrateError),
    #[error(transparent)]
    RegisterHandlerObjectCreatedError(#[from] RegisterHandlerObjectCreatedError),
}
