use tracing::subscriber::set_global_default;
use tracing::Subscriber;
use tracing_bunyan_formatter::{BunyanFormattingLayer, JsonStorageLayer};
use tracing_log::LogTracer;
use tracing_subscriber::{fmt::MakeWriter, layer::SubscriberExt, EnvFilter, Registry};

/// `RUST_LOG` if set, `fallback_env_filter` otherwise
fn env_filter_or(fallback_env_filter: String) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback_env_filter))
}

/// Builds the subscriber of the worker, outputting spans and events as bunyan JSON lines
///
/// The ingestion spans (ack token, object location, message id) are kept on every line
/// emitted inside them, so the lines of one notification can be grouped.
///
/// # Arguments
/// - `name`: name of the app, set on every log line
/// - `fallback_env_filter`: filter used when `RUST_LOG` is not set
/// - `sink`: where the log lines are written (stdout for the worker, a sink in tests)
pub fn get_tracing_subscriber<Sink>(
    name: String,
    fallback_env_filter: String,
    sink: Sink,
) -> impl Subscriber + Send + Sync
where
    Sink: for<'a> MakeWriter<'a> + Send + Sync + 'static,
{
    Registry::default()
        .with(env_filter_or(fallback_env_filter))
        .with(JsonStorageLayer)
        .with(BunyanFormattingLayer::new(name, sink))
}

/// Builds the subscriber of the command line tools: plain text lines on stderr
///
/// stdout is left to the command output.
pub fn get_cli_tracing_subscriber(fallback_env_filter: String) -> impl Subscriber + Send + Sync {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter_or(fallback_env_filter))
        .with_writer(std::io::stderr)
        .with_target(false)
        .finish()
}

/// Sets the global subscriber. Must be called only once.
///
/// `log` records of the conversation parser are forwarded to it.
pub fn init_tracing_subscriber(subscriber: impl Subscriber + Send + Sync) {
    LogTracer::init().expect("Failed to set logger");
    set_global_default(subscriber).expect("Failed to set subscriber");
}
