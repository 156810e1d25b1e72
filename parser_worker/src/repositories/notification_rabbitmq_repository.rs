use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use lapin::{
    message::Delivery,
    options::{
        BasicAckOptions, BasicGetOptions, BasicNackOptions, BasicPublishOptions,
        ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
    },
    types::{AMQPValue, FieldTable, LongString},
    Channel, Connection, ExchangeKind,
};
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use crate::{
    configuration::RabbitMQSettings,
    ports::notification_queue::{
        AckToken, NotificationQueue, NotificationQueueError, QueueMessage,
    },
};

/// Notification queue implemented with RabbitMQ
///
/// The object storage publishes its bucket notifications on a topic exchange, bound to a
/// durable queue pulled by the handlers.
///
/// A released message is rejected into a retry queue, where it waits `retry_delay_ms` before
/// being routed back to the main queue. Once delivered more than `max_receive_count` times, it is
/// moved to a dead letter queue instead of being handed to a handler.
///
/// The enum definition gatekeeps functionalities if the repository is not ready (not initialized).
pub enum NotificationRabbitMQRepository {
    Ready {
        /// RabbitMQ connection shared with other objects in different threads
        connection: Arc<Connection>,
        /// RabbitMQ channel should not be shared between threads, and is created for each thread
        channel: Channel,
        settings: RabbitMQSettings,
        poll_interval: Duration,
    },
    Idle {
        connection: Arc<Connection>,
        settings: RabbitMQSettings,
        poll_interval: Duration,
    },
}

/// Clones only the thread safe part of the repository
///
/// The cloned repository is in the idle state, waiting for an initialization.
impl Clone for NotificationRabbitMQRepository {
    fn clone(&self) -> Self {
        match self {
            Self::Idle {
                connection,
                settings,
                poll_interval,
            }
            | Self::Ready {
                connection,
                settings,
                poll_interval,
                ..
            } => Self::Idle {
                connection: connection.clone(),
                settings: settings.clone(),
                poll_interval: *poll_interval,
            },
        }
    }
}

impl NotificationRabbitMQRepository {
    /// Builds the repository from a RabbitMQ connection
    ///
    /// No channel is created here: `try_init` should be called inside each thread using
    /// this repository.
    pub fn new(connection: Arc<Connection>, settings: RabbitMQSettings, poll_interval: Duration) -> Self {
        Self::Idle {
            connection,
            settings,
            poll_interval,
        }
    }

    /// Creates a channel, then declares the exchange and the queue and binds them
    ///
    /// Declarations are idempotent.
    #[tracing::instrument(name = "🏗️ Initializing NotificationRabbitMQRepository", skip(self))]
    pub async fn try_init(self) -> Result<Self, NotificationQueueError> {
        match self {
            Self::Ready { .. } => {
                info!("Already initialized");
                Ok(self)
            }

            Self::Idle {
                connection,
                settings,
                poll_interval,
            } => {
                let channel = connection.create_channel().await?;

                let exchange_declare_options = ExchangeDeclareOptions {
                    durable: true,
                    ..ExchangeDeclareOptions::default()
                };
                channel
                    .exchange_declare(
                        &settings.notification_exchange,
                        ExchangeKind::Topic,
                        exchange_declare_options,
                        FieldTable::default(),
                    )
                    .await?;

                let queue_name = settings.queue_name();
                let retry_queue_name = settings.retry_queue_name();
                let queue_declare_options = QueueDeclareOptions {
                    durable: true,
                    ..QueueDeclareOptions::default()
                };

                channel
                    .queue_declare(
                        &queue_name,
                        queue_declare_options,
                        dead_letter_arguments(&retry_queue_name),
                    )
                    .await?;

                let mut retry_arguments = dead_letter_arguments(&queue_name);
                retry_arguments.insert(
                    "x-message-ttl".into(),
                    AMQPValue::LongUInt(settings.retry_delay_ms),
                );
                channel
                    .queue_declare(&retry_queue_name, queue_declare_options, retry_arguments)
                    .await?;

                channel
                    .queue_declare(
                        &settings.dead_letter_queue_name(),
                        queue_declare_options,
                        FieldTable::default(),
                    )
                    .await?;

                channel
                    .queue_bind(
                        &queue_name,
                        &settings.notification_exchange,
                        &settings.notification_binding_key,
                        QueueBindOptions::default(),
                        FieldTable::default(),
                    )
                    .await?;

                info!(
                    "📡 Queue {} bound to exchange {} with key {}",
                    queue_name, settings.notification_exchange, settings.notification_binding_key
                );

                Ok(Self::Ready {
                    connection,
                    channel,
                    settings,
                    poll_interval,
                })
            }
        }
    }

    #[tracing::instrument(
        name = "Moving notification to the dead letter queue",
        skip(self, channel, settings, delivery)
    )]
    async fn move_to_dead_letter_queue(
        &self,
        channel: &Channel,
        settings: &RabbitMQSettings,
        delivery: &Delivery,
        receive_count: u32,
    ) -> Result<(), NotificationQueueError> {
        warn!(
            "Notification received {} times, more than the {} allowed",
            receive_count, settings.max_receive_count
        );

        channel
            .basic_publish(
                "",
                &settings.dead_letter_queue_name(),
                BasicPublishOptions::default(),
                &delivery.data,
                delivery.properties.clone(),
            )
            .await?
            .await?;

        channel
            .basic_ack(delivery.delivery_tag, BasicAckOptions::default())
            .await?;

        Ok(())
    }

    fn ready_channel(&self) -> Result<(&Channel, &RabbitMQSettings, Duration), NotificationQueueError> {
        match self {
            Self::Idle { .. } => Err(NotificationQueueError::NotInitialized(
                "The RabbitMQ channel has not been created".to_string(),
            )),
            Self::Ready {
                channel,
                settings,
                poll_interval,
                ..
            } => Ok((channel, settings, *poll_interval)),
        }
    }
}

#[async_trait]
impl NotificationQueue for NotificationRabbitMQRepository {
    /// Pulls messages one by one, polling the queue until `wait` is elapsed if it is empty
    async fn receive(
        &self,
        max_messages: usize,
        wait: Duration,
    ) -> Result<Vec<QueueMessage>, NotificationQueueError> {
        let (channel, settings, poll_interval) = self.ready_channel()?;
        let queue_name = settings.queue_name();
        let deadline = Instant::now() + wait;
        let mut messages = Vec::new();

        loop {
            while messages.len() < max_messages {
                let Some(message) = channel
                    .basic_get(&queue_name, BasicGetOptions::default())
                    .await?
                else {
                    break;
                };

                let delivery = message.delivery;
                let receive_count =
                    receive_count(delivery.properties.headers().as_ref(), &queue_name);
                if receive_count > settings.max_receive_count {
                    self.move_to_dead_letter_queue(channel, settings, &delivery, receive_count)
                        .await?;
                    continue;
                }

                messages.push(QueueMessage {
                    body: delivery.data,
                    ack_token: AckToken(delivery.delivery_tag),
                });
            }

            let now = Instant::now();
            if !messages.is_empty() || now >= deadline {
                debug!("Received {} notifications", messages.len());
                return Ok(messages);
            }

            sleep(poll_interval.min(deadline - now)).await;
        }
    }

    async fn ack(&self, ack_token: &AckToken) -> Result<(), NotificationQueueError> {
        let (channel, _, _) = self.ready_channel()?;

        channel
            .basic_ack(ack_token.0, BasicAckOptions::default())
            .await?;

        Ok(())
    }

    /// Rejects the message into the retry queue
    async fn release(&self, ack_token: &AckToken) -> Result<(), NotificationQueueError> {
        let (channel, _, _) = self.ready_channel()?;

        channel
            .basic_nack(
                ack_token.0,
                BasicNackOptions {
                    requeue: false,
                    ..BasicNackOptions::default()
                },
            )
            .await?;

        Ok(())
    }
}

/// Routes the messages rejected from a queue to `target_queue_name`, through the default exchange
fn dead_letter_arguments(target_queue_name: &str) -> FieldTable {
    let mut arguments = FieldTable::default();
    arguments.insert(
        "x-dead-letter-exchange".into(),
        AMQPValue::LongString(LongString::from("")),
    );
    arguments.insert(
        "x-dead-letter-routing-key".into(),
        AMQPValue::LongString(LongString::from(target_queue_name)),
    );
    arguments
}

/// Number of times a message has been delivered from `queue_name`, the current delivery included
///
/// RabbitMQ counts the rejections of a message from each queue in its `x-death` header.
fn receive_count(headers: Option<&FieldTable>, queue_name: &str) -> u32 {
    let Some(AMQPValue::FieldArray(deaths)) = headers.and_then(|headers| {
        headers
            .inner()
            .iter()
            .find(|(key, _)| key.as_str() == "x-death")
            .map(|(_, value)| value)
    }) else {
        return 1;
    };

    let nb_rejections: u64 = deaths
        .as_slice()
        .iter()
        .filter_map(|death| match death {
            AMQPValue::FieldTable(death) => Some(death),
            _ => None,
        })
        .filter(|death| {
            death_field(death, "queue").and_then(long_string_bytes) == Some(queue_name.as_bytes())
                && death_field(death, "reason").and_then(long_string_bytes)
                    == Some(b"rejected".as_slice())
        })
        .filter_map(|death| death_field(death, "count").and_then(as_count))
        .sum();

    u32::try_from(nb_rejections)
        .unwrap_or(u32::MAX)
        .saturating_add(1)
}

fn death_field<'a>(death: &'a FieldTable, name: &str) -> Option<&'a AMQPValue> {
    death
        .inner()
        .iter()
        .find(|(key, _)| key.as_str() == name)
        .map(|(_, value)| value)
}

fn long_string_bytes(value: &AMQPValue) -> Option<&[u8]> {
    match value {
        AMQPValue::LongString(value) => Some(value.as_bytes()),
        _ => None,
    }
}

fn as_count(value: &AMQPValue) -> Option<u64> {
    match value {
        AMQPValue::LongLongInt(count) => u64::try_from(*count).ok(),
        AMQPValue::LongInt(count) => u64::try_from(*count).ok(),
        AMQPValue::LongUInt(count) => Some(u64::from(*count)),
        AMQPValue::Timestamp(count) => Some(*count),
        _ => None,
    }
}

impl From<lapin::Error> for NotificationQueueError {
    fn from(error: lapin::Error) -> Self {
        NotificationQueueError::BackendError(Box::new(error))
    }
}
