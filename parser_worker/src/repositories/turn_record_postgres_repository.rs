use async_trait::async_trait;
use chrono::{DateTime, Utc};
use conversation_parser::{AuthorRole, TurnContent};
use sqlx::PgPool;
use tracing::info;
use uuid::Uuid;

use crate::{
    domain::entities::{
        object_location::ObjectLocation,
        turn_record::{StoredTurnRecord, TurnRecord},
    },
    ports::record_store::{RecordStore, RecordStoreError},
};

/// Turn record store implemented with Postgres
///
/// The uniqueness of `(sequence_index, source_container, source_object_key)` is enforced
/// by the `turn_records_file_sequence_unique` constraint.
pub struct TurnRecordPostgresRepository {
    pg_pool: PgPool,
}

impl TurnRecordPostgresRepository {
    pub fn new(pg_pool: PgPool) -> Self {
        Self { pg_pool }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct TurnRecordRow {
    id: Uuid,
    source_container: String,
    source_object_key: String,
    author_role: String,
    content_type: String,
    parts: Vec<String>,
    sequence_index: i32,
    node_index: i32,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<TurnRecordRow> for StoredTurnRecord {
    type Error = RecordStoreError;

    fn try_from(row: TurnRecordRow) -> Result<Self, Self::Error> {
        let author_role = row
            .author_role
            .parse::<AuthorRole>()
            .map_err(|error| RecordStoreError::StoreError(error.into()))?;

        Ok(StoredTurnRecord {
            record: TurnRecord {
                id: row.id,
                source_container: row.source_container,
                source_object_key: row.source_object_key,
                author_role,
                content: TurnContent {
                    content_type: row.content_type,
                    parts: row.parts,
                },
                sequence_index: row.sequence_index,
                node_index: row.node_index,
            },
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[async_trait]
impl RecordStore for TurnRecordPostgresRepository {
    /// Inserts the records in a single transaction, rolled back on the first failure
    #[tracing::instrument(
        name = "Saving turn records in database",
        skip(self, records),
        fields(nb_records = records.len())
    )]
    async fn insert_all(&self, records: &[TurnRecord]) -> Result<(), RecordStoreError> {
        let mut transaction = self.pg_pool.begin().await.map_err(into_record_store_error)?;

        for record in records {
            sqlx::query(
                r#"
                INSERT INTO turn_records
                    (id, source_container, source_object_key, author_role, content_type, parts, sequence_index, node_index)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                "#,
            )
            .bind(record.id)
            .bind(&record.source_container)
            .bind(&record.source_object_key)
            .bind(record.author_role.as_str())
            .bind(&record.content.content_type)
            .bind(&record.content.parts)
            .bind(record.sequence_index)
            .bind(record.node_index)
            .execute(&mut *transaction)
            .await
            .map_err(into_record_store_error)?;
        }

        transaction
            .commit()
            .await
            .map_err(into_record_store_error)?;

        info!("Saved {} turn records", records.len());
        Ok(())
    }

    #[tracing::instrument(name = "Deleting turn records of a file from database", skip(self))]
    async fn delete_by_file(&self, location: &ObjectLocation) -> Result<u64, RecordStoreError> {
        let result = sqlx::query(
            r#"
            DELETE FROM turn_records
            WHERE source_container = $1 AND source_object_key = $2
            "#,
        )
        .bind(&location.container)
        .bind(&location.key)
        .execute(&self.pg_pool)
        .await
        .map_err(into_record_store_error)?;

        Ok(result.rows_affected())
    }

    #[tracing::instrument(name = "Listing turn records of a file from database", skip(self))]
    async fn list_by_file(
        &self,
        location: &ObjectLocation,
    ) -> Result<Vec<StoredTurnRecord>, RecordStoreError> {
        let rows = sqlx::query_as::<_, TurnRecordRow>(
            r#"
            SELECT id, source_container, source_object_key, author_role, content_type, parts,
                sequence_index, node_index, created_at, updated_at
            FROM turn_records
            WHERE source_container = $1 AND source_object_key = $2
            ORDER BY sequence_index
            "#,
        )
        .bind(&location.container)
        .bind(&location.key)
        .fetch_all(&self.pg_pool)
        .await
        .map_err(into_record_store_error)?;

        rows.into_iter().map(StoredTurnRecord::try_from).collect()
    }
}

fn into_record_store_error(error: sqlx::Error) -> RecordStoreError {
    match error {
        sqlx::Error::Database(database_error) if database_error.is_unique_violation() => {
            RecordStoreError::UniqueConstraintViolation(database_error.message().to_string())
        }
        other => RecordStoreError::StoreError(Box::new(other)),
    }
}
