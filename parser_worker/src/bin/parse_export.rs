//! Extracts and decodes the conversation turns of a local export, without any queue or store
//!
//! Turns are printed to stdout as a JSON list, logs go to stderr.

use std::path::PathBuf;

use clap::Parser;
use conversation_parser::{
    decode_conversation, DecodeConversationError, LinearConversationExtractor,
};
use parser_worker::{
    domain::services::utf8_chunk_decoder::Utf8ChunkDecoder,
    helper::error_chain_fmt,
    telemetry::{get_cli_tracing_subscriber, init_tracing_subscriber},
};
use tokio::{fs::File, io::AsyncReadExt};
use tracing::info;

#[derive(Debug, Parser)]
#[command(about = "Prints the conversation turns found in an export page")]
struct ParseExportArgs {
    #[arg(value_name = "PATH")]
    path: PathBuf,

    /// Size of each read on the file
    #[arg(long, default_value_t = 64 * 1024)]
    chunk_size: usize,

    #[arg(long, default_value_t = false)]
    pretty: bool,
}

#[derive(thiserror::Error)]
enum ParseExportError {
    #[error("Failed to read {0}")]
    IOError(String, #[source] std::io::Error),
    #[error("No linear conversation found in {0}")]
    NoPayloadFound(String),
    #[error(transparent)]
    DecodeError(#[from] DecodeConversationError),
    #[error(transparent)]
    JsonError(#[from] serde_json::Error),
}

impl std::fmt::Debug for ParseExportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        error_chain_fmt(self, f)
    }
}

#[tokio::main]
async fn main() -> Result<(), ParseExportError> {
    init_tracing_subscriber(get_cli_tracing_subscriber("warn".into()));

    let args = ParseExportArgs::parse();
    let display_path = args.path.display().to_string();
    let into_io_error = |error| ParseExportError::IOError(display_path.clone(), error);

    let mut file = File::open(&args.path).await.map_err(into_io_error)?;
    let mut buffer = vec![0u8; args.chunk_size.max(1)];
    let mut decoder = Utf8ChunkDecoder::new();
    let mut extractor = LinearConversationExtractor::new();

    loop {
        let read = file.read(&mut buffer).await.map_err(into_io_error)?;
        let text = if read == 0 {
            decoder.finish()
        } else {
            decoder.decode(&buffer[..read])
        };

        if extractor.feed(&text) || read == 0 {
            break;
        }
    }

    let payload = extractor.finish();
    if payload.is_empty() {
        return Err(ParseExportError::NoPayloadFound(display_path));
    }

    let turns = decode_conversation(&payload)?;
    info!("Decoded {} turns from {}", turns.len(), display_path);

    let output = if args.pretty {
        serde_json::to_string_pretty(&turns)?
    } else {
        serde_json::to_string(&turns)?
    };
    println!("{}", output);

    Ok(())
}
