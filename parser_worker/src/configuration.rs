use lapin::ConnectionProperties;
use secrecy::{ExposeSecret, Secret};
use serde::Deserialize;
use serde_aux::field_attributes::deserialize_number_from_string;
use sqlx::{
    postgres::{PgConnectOptions, PgSslMode},
    ConnectOptions,
};

#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub database: DatabaseSettings,
    pub object_storage: ObjectStorageSettings,
    pub rabbitmq: RabbitMQSettings,
    pub worker: WorkerSettings,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseSettings {
    pub username: String,
    pub password: Secret<String>,
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub port: u16,
    pub host: String,
    pub database_name: String,
    // Determines if we demand the connection to be encrypted or not
    pub require_ssl: bool,
}

impl DatabaseSettings {
    pub fn without_db(&self) -> PgConnectOptions {
        let ssl_mode = if self.require_ssl {
            PgSslMode::Require
        } else {
            PgSslMode::Prefer
        };

        PgConnectOptions::new()
            .host(&self.host)
            .username(&self.username)
            .password(self.password.expose_secret())
            .port(self.port)
            .ssl_mode(ssl_mode)
    }

    pub fn with_db(&self) -> PgConnectOptions {
        // Statements are logged at TRACE level, they would flood INFO logs on every batch insert
        self.without_db()
            .database(&self.database_name)
            .log_statements(tracing::log::LevelFilter::Trace)
    }
}

#[derive(Deserialize, Debug, Clone)]
pub struct ObjectStorageSettings {
    pub username: String,
    pub password: Secret<String>,
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub port: u16,
    pub host: String,
    pub region: String,
    /// Size of each ranged read on an uploaded export
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub read_chunk_size_bytes: u64,
}

impl ObjectStorageSettings {
    pub fn endpoint(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RabbitMQSettings {
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub port: u16,
    pub host: String,
    /// Exchange on which the object storage publishes its bucket notifications
    pub notification_exchange: String,
    pub notification_binding_key: String,
    /// Prefix of the queue consumed by the workers.
    /// Useful to create parallel queues during tests for example.
    pub queue_name_prefix: String,
    /// Time a released message waits in the retry queue before being delivered again
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub retry_delay_ms: u32,
    /// Deliveries of a message after which it is moved to the dead letter queue instead
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub max_receive_count: u32,
}

impl RabbitMQSettings {
    pub fn get_uri(&self) -> String {
        format!("amqp://{}:{}", &self.host, &self.port)
    }

    pub fn queue_name(&self) -> String {
        format!("{}_object_created", self.queue_name_prefix)
    }

    pub fn retry_queue_name(&self) -> String {
        format!("{}.retry", self.queue_name())
    }

    pub fn dead_letter_queue_name(&self) -> String {
        format!("{}.dead_letter", self.queue_name())
    }

    pub fn get_connection_properties(&self) -> ConnectionProperties {
        ConnectionProperties::default()
            // Uses tokio executor and reactor.
            // At the moment the reactor is only available for unix.
            .with_executor(tokio_executor_trait::Tokio::current())
            .with_reactor(tokio_reactor_trait::Tokio)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct WorkerSettings {
    /// Number of handlers pulling notifications concurrently
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub nb_handlers: usize,
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub max_messages: usize,
    /// Maximum time a receive waits for a first notification
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub wait_seconds: u64,
    /// Interval between two polls of the queue while waiting
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub poll_interval_ms: u64,
}

/// Extracts app settings from configuration files and env variables
///
/// `base.yaml` should contain shared settings for all environments.
/// A specific env file should be created for each environment: `local.yaml` and `production.yaml`
/// The environment is set with the env var `APP_ENVIRONMENT`.
/// If `APP_ENVIRONMENT` is not set, `local.yaml` is the default.
///
/// Settings are also taken from environment variables: with a prefix of APP and '__' as separator
/// For ex: `APP_WORKER__NB_HANDLERS=4` would set `Settings.worker.nb_handlers`
pub fn get_configuration() -> Result<Settings, config::ConfigError> {
    let base_path = std::env::current_dir().expect("Failed to determine the current directory");
    let configuration_directory = base_path.join("configuration");

    let environment: Environment = std::env::var("APP_ENVIRONMENT")
        .unwrap_or_else(|_| "local".into())
        .try_into()
        .expect("Failed to parse APP_ENVIRONMENT.");
    let environment_filename = format!("{}.yaml", environment.as_str());

    let settings = config::Config::builder()
        .add_source(config::File::from(
            configuration_directory.join("base.yaml"),
        ))
        .add_source(config::File::from(
            configuration_directory.join(environment_filename),
        ))
        .add_source(
            config::Environment::with_prefix("APP")
                .prefix_separator("_")
                .separator("__"),
        )
        .build()?;

    settings.try_deserialize::<Settings>()
}

/// The possible runtime environment for our application.
pub enum Environment {
    Local,
    Production,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Local => "local",
            Environment::Production => "production",
        }
    }
}

impl TryFrom<String> for Environment {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.to_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "production" => Ok(Self::Production),
            other => Err(format!(
                "{} is not a supported environment. Use either `local` or `production`.",
                other
            )),
        }
    }
}
