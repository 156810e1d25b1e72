use async_trait::async_trait;
use s3::{creds::Credentials, error::S3Error, Bucket, Region};
use secrecy::{ExposeSecret, Secret};
use tracing::{debug, info};

use crate::{
    configuration::ObjectStorageSettings,
    domain::{
        entities::object_location::ObjectLocation,
        services::utf8_chunk_decoder::Utf8ChunkDecoder,
    },
    ports::object_source::{ObjectSource, ObjectSourceError, TextChunkStream},
};

/// Simple Storage Service (S3) client reading the uploaded exports
///
/// Objects are read with ranged requests of `read_chunk_size_bytes`, so a large export
/// is never held in memory at once, and reading stops as soon as the stream is dropped.
pub struct S3Repository {
    access_key: String,
    // To keep the credentials secret and avoids leaks in logs, we use Secret<String>
    // and the s3::creds::Credentials is created on demand
    secret_key: Secret<String>,
    region: Region,
    read_chunk_size_bytes: u64,
}

impl S3Repository {
    pub fn new(settings: &ObjectStorageSettings) -> Self {
        let region = Region::Custom {
            region: settings.region.to_owned(),
            endpoint: settings.endpoint(),
        };

        Self {
            access_key: settings.username.to_owned(),
            secret_key: settings.password.to_owned(),
            region,
            read_chunk_size_bytes: settings.read_chunk_size_bytes.max(1),
        }
    }

    fn try_get_credentials(&self) -> Result<Credentials, ObjectSourceError> {
        Credentials::new(
            Some(&self.access_key),
            Some(self.secret_key.expose_secret()),
            None,
            None,
            None,
        )
        .map_err(|error| ObjectSourceError::TransientIOError(Box::new(error)))
    }

    /// Bucket client of the container, without checking it exists
    fn get_bucket(&self, container: &str) -> Result<Bucket, ObjectSourceError> {
        let bucket = Bucket::new(container, self.region.to_owned(), self.try_get_credentials()?)
            .map_err(|error| into_object_source_error(error, container))?
            .with_path_style();

        Ok(bucket)
    }
}

/// State of a ranged read on an object
struct RangedRead {
    bucket: Bucket,
    key: String,
    offset: u64,
    content_length: u64,
    chunk_size: u64,
    decoder: Utf8ChunkDecoder,
    done: bool,
}

impl RangedRead {
    async fn next_chunk(&mut self) -> Option<Result<String, ObjectSourceError>> {
        if self.done {
            return None;
        }

        if self.offset >= self.content_length {
            self.done = true;
            let rest = self.decoder.finish();
            return (!rest.is_empty()).then_some(Ok(rest));
        }

        let end = (self.offset + self.chunk_size).min(self.content_length) - 1;

        match self
            .bucket
            .get_object_range(&self.key, self.offset, Some(end))
            .await
        {
            Ok(response) => {
                debug!(
                    "Read bytes {}-{} of {} (status {})",
                    self.offset,
                    end,
                    self.key,
                    response.status_code()
                );
                self.offset = end + 1;
                Some(Ok(self.decoder.decode(&response.to_vec())))
            }
            Err(error) => {
                self.done = true;
                Some(Err(into_object_source_error(error, &self.key)))
            }
        }
    }
}

#[async_trait]
impl ObjectSource for S3Repository {
    #[tracing::instrument(name = "🪣 Opening object from bucket", skip(self))]
    async fn open(&self, location: &ObjectLocation) -> Result<TextChunkStream, ObjectSourceError> {
        let bucket = self.get_bucket(&location.container)?;

        let (head, status_code) = bucket
            .head_object(&location.key)
            .await
            .map_err(|error| into_object_source_error(error, &location.to_string()))?;

        let content_length = content_length_of(head.content_length, location)?;
        info!(
            "Object {} has a length of {} bytes (status {})",
            location, content_length, status_code
        );

        let read = RangedRead {
            bucket,
            key: location.key.to_owned(),
            offset: 0,
            content_length,
            chunk_size: self.read_chunk_size_bytes,
            decoder: Utf8ChunkDecoder::new(),
            done: false,
        };

        let stream = futures::stream::unfold(read, |mut read| async move {
            let chunk = read.next_chunk().await?;
            Some((chunk, read))
        });

        Ok(Box::pin(stream))
    }

    #[tracing::instrument(name = "🪣 Deleting object from bucket", skip(self))]
    async fn delete(&self, location: &ObjectLocation) -> Result<(), ObjectSourceError> {
        let bucket = self.get_bucket(&location.container)?;

        let response = bucket
            .delete_object(&location.key)
            .await
            .map_err(|error| into_object_source_error(error, &location.to_string()))?;
        info!("Deleted {} (status {})", location, response.status_code());

        Ok(())
    }
}

/// The ranged reads are bounded by the length given by HEAD, so it cannot be guessed
fn content_length_of(
    content_length: Option<i64>,
    location: &ObjectLocation,
) -> Result<u64, ObjectSourceError> {
    content_length
        .and_then(|length| u64::try_from(length).ok())
        .ok_or_else(|| {
            ObjectSourceError::TransientIOError(
                format!("No valid content length for {}: {:?}", location, content_length).into(),
            )
        })
}

fn into_object_source_error(error: S3Error, object: &str) -> ObjectSourceError {
    match error {
        S3Error::Http(404, _) => ObjectSourceError::NotFound(object.to_string()),
        S3Error::Http(403, _) => ObjectSourceError::AccessDenied(object.to_string()),
        other => ObjectSourceError::TransientIOError(Box::new(other)),
    }
}
