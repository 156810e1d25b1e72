use std::sync::atomic::Ordering;

use conversation_parser::AuthorRole;
use parser_worker::{
    domain::entities::object_location::ObjectLocation,
    ports::record_store::RecordStore,
    use_cases::ingest_conversation_file::{IngestionFailure, IngestionStage, PersistOutcome},
};

use crate::helpers::{
    export_page, notification_body, object_created_body, random_conversation, random_location,
    spawn_pipeline,
};

#[tokio::test]
async fn ingests_the_user_and_assistant_turns_then_deletes_the_source_and_acknowledges() {
    // Arrange
    let pipeline = spawn_pipeline(64);
    let location = random_location();
    let page = export_page(
        &[
            ("system", "Be concise"),
            ("user", "What is [1, 2] in JSON?"),
            ("tool", "ignored"),
            ("assistant", "A list: {\"a\": [1, 2]}"),
        ],
        512,
    );
    pipeline.object_source.put(&location, &page);
    let message = pipeline
        .notification_queue
        .deliver(object_created_body(&location));

    // Act
    let report = pipeline.use_case.execute(&message).await;

    // Assert
    assert!(report.failure.is_none(), "{:?}", report.failure);
    assert_eq!(report.stage, IngestionStage::Acknowledged);
    assert_eq!(report.location.as_ref(), Some(&location));
    assert_eq!(report.persisted, Some(PersistOutcome::Inserted(2)));
    assert!(report.source_deleted);

    let stored = pipeline.record_store.list_by_file(&location).await.unwrap();
    let turns: Vec<(i32, i32, AuthorRole, Vec<String>)> = stored
        .into_iter()
        .map(|stored| {
            (
                stored.record.sequence_index,
                stored.record.node_index,
                stored.record.author_role,
                stored.record.content.parts,
            )
        })
        .collect();
    assert_eq!(
        turns,
        vec![
            (0, 2, AuthorRole::User, vec!["What is [1, 2] in JSON?".to_string()]),
            (1, 4, AuthorRole::Assistant, vec!["A list: {\"a\": [1, 2]}".to_string()]),
        ]
    );

    assert!(!pipeline.object_source.contains(&location));
    assert!(pipeline.notification_queue.is_acked(&message));
}

#[tokio::test]
async fn numbers_the_kept_turns_contiguously_whatever_the_chunk_size() {
    let messages = random_conversation(12);
    let location = random_location();
    let page = export_page(&messages, 0);

    for chunk_size in [1, 3, 7, 64, 4096] {
        // Arrange
        let pipeline = spawn_pipeline(chunk_size);
        pipeline.object_source.put(&location, &page);
        let message = pipeline
            .notification_queue
            .deliver(object_created_body(&location));

        // Act
        let report = pipeline.use_case.execute(&message).await;

        // Assert
        assert_eq!(report.persisted, Some(PersistOutcome::Inserted(12)), "chunk size {}", chunk_size);

        let stored = pipeline.record_store.list_by_file(&location).await.unwrap();
        let sequence_indexes: Vec<i32> = stored.iter().map(|s| s.record.sequence_index).collect();
        assert_eq!(sequence_indexes, (0..12).collect::<Vec<i32>>());

        let expected_texts: Vec<&str> = messages
            .iter()
            .filter(|(role, _)| *role == "user" || *role == "assistant")
            .map(|(_, text)| text.as_str())
            .collect();
        let stored_texts: Vec<&str> = stored
            .iter()
            .map(|s| s.record.content.parts[0].as_str())
            .collect();
        assert_eq!(stored_texts, expected_texts);
    }
}

#[tokio::test]
async fn stops_reading_the_source_once_the_conversation_is_captured() {
    // Arrange
    let pipeline = spawn_pipeline(16);
    let location = random_location();
    pipeline
        .object_source
        .put(&location, &export_page(&[("user", "hi")], 64 * 1024));
    let nb_chunks = pipeline.object_source.nb_chunks_of(&location);
    let message = pipeline
        .notification_queue
        .deliver(object_created_body(&location));

    // Act
    let report = pipeline.use_case.execute(&message).await;

    // Assert
    assert_eq!(report.persisted, Some(PersistOutcome::Inserted(1)));
    let nb_chunks_read = pipeline.object_source.nb_chunks_read.load(Ordering::SeqCst);
    assert!(
        nb_chunks_read < nb_chunks / 2,
        "read {} chunks out of {}",
        nb_chunks_read,
        nb_chunks
    );
}

#[tokio::test]
async fn a_redelivered_notification_is_consumed_without_duplicating_turns() {
    // Arrange
    let pipeline = spawn_pipeline(128);
    let location = random_location();
    let page = export_page(&random_conversation(5), 0);
    pipeline.object_source.put(&location, &page);

    let first = pipeline
        .notification_queue
        .deliver(object_created_body(&location));
    pipeline.use_case.execute(&first).await;

    // The source is put back, as if the first deletion was not visible yet
    pipeline.object_source.put(&location, &page);
    let redelivered = pipeline
        .notification_queue
        .deliver(object_created_body(&location));

    // Act
    let report = pipeline.use_case.execute(&redelivered).await;

    // Assert
    assert!(report.failure.is_none(), "{:?}", report.failure);
    assert_eq!(report.persisted, Some(PersistOutcome::AlreadyIngested));
    assert!(report.is_acknowledged());
    assert!(pipeline.notification_queue.is_acked(&redelivered));
    assert!(!pipeline.object_source.contains(&location));
    assert_eq!(pipeline.record_store.all().len(), 5);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_deliveries_of_the_same_notification_store_the_turns_once() {
    // Arrange
    let pipeline = spawn_pipeline(32);
    let location = random_location();
    pipeline
        .object_source
        .put(&location, &export_page(&random_conversation(8), 0));

    let messages: Vec<_> = (0..4)
        .map(|_| {
            pipeline
                .notification_queue
                .deliver(object_created_body(&location))
        })
        .collect();

    // Act
    let handles: Vec<_> = messages
        .iter()
        .cloned()
        .map(|message| {
            let use_case = pipeline.use_case.clone();
            tokio::spawn(async move { use_case.execute(&message).await })
        })
        .collect();

    let mut reports = vec![];
    for handle in handles {
        reports.push(handle.await.unwrap());
    }

    // Assert
    let nb_inserted = reports
        .iter()
        .filter(|report| report.persisted == Some(PersistOutcome::Inserted(8)))
        .count();
    assert_eq!(nb_inserted, 1);
    assert_eq!(pipeline.record_store.all().len(), 8);

    // Deliveries opening the source after its deletion find the stored turns
    for (message, report) in messages.iter().zip(reports.iter()) {
        assert!(report.failure.is_none(), "{:?}", report.failure);
        assert!(report.persisted.is_some());
        assert!(pipeline.notification_queue.is_acked(message));
    }
    assert_eq!(pipeline.notification_queue.nb_pending(), 0);
}

#[tokio::test]
async fn a_duplicate_arriving_after_the_source_deletion_is_acknowledged_once() {
    // Arrange
    let pipeline = spawn_pipeline(128);
    let location = random_location();
    pipeline
        .object_source
        .put(&location, &export_page(&random_conversation(3), 0));
    pipeline.notification_queue.push(object_created_body(&location));
    pipeline.notification_queue.push(object_created_body(&location));

    let first = pipeline.notification_queue.receive_one().await;
    pipeline.use_case.execute(&first).await;
    assert!(!pipeline.object_source.contains(&location));

    // Act
    let duplicate = pipeline.notification_queue.receive_one().await;
    let report = pipeline.use_case.execute(&duplicate).await;

    // Assert
    assert!(report.failure.is_none(), "{:?}", report.failure);
    assert_eq!(report.persisted, Some(PersistOutcome::AlreadyIngested));
    assert!(report.source_deleted);
    assert!(pipeline.notification_queue.is_acked(&duplicate));
    assert!(!pipeline.notification_queue.is_released(&duplicate));
    assert_eq!(pipeline.notification_queue.nb_pending(), 0);
    assert_eq!(pipeline.record_store.all().len(), 3);
}

#[tokio::test]
async fn a_batch_colliding_with_stored_turns_is_treated_as_already_ingested() {
    // Arrange
    let pipeline = spawn_pipeline(256);
    let location = random_location();
    pipeline
        .object_source
        .put(&location, &export_page(&[("user", "first")], 0));
    let first = pipeline
        .notification_queue
        .deliver(object_created_body(&location));
    pipeline.use_case.execute(&first).await;

    // A new upload at the same key, with more turns
    pipeline.object_source.put(
        &location,
        &export_page(&[("user", "first"), ("assistant", "second")], 0),
    );
    let second = pipeline
        .notification_queue
        .deliver(object_created_body(&location));

    // Act
    let report = pipeline.use_case.execute(&second).await;

    // Assert
    assert_eq!(report.persisted, Some(PersistOutcome::AlreadyIngested));
    assert!(report.is_acknowledged());
    assert_eq!(pipeline.record_store.all().len(), 1);
}

#[tokio::test]
async fn a_missing_source_releases_the_notification() {
    // Arrange
    let pipeline = spawn_pipeline(64);
    let location = random_location();
    let message = pipeline
        .notification_queue
        .deliver(object_created_body(&location));

    // Act
    let report = pipeline.use_case.execute(&message).await;

    // Assert
    assert!(matches!(
        report.failure,
        Some(IngestionFailure::SourceUnavailable(_))
    ));
    assert_eq!(report.stage, IngestionStage::Received);
    assert!(!pipeline.notification_queue.is_acked(&message));
    assert!(pipeline.notification_queue.is_released(&message));
    assert_eq!(pipeline.notification_queue.nb_pending(), 1);
}

#[tokio::test]
async fn a_read_failure_in_the_middle_of_the_source_releases_the_notification() {
    // Arrange
    let pipeline = spawn_pipeline(8);
    let location = random_location();
    pipeline
        .object_source
        .put(&location, &export_page(&random_conversation(4), 0));
    *pipeline.object_source.fail_after_chunks.lock().unwrap() = Some(3);
    let message = pipeline
        .notification_queue
        .deliver(object_created_body(&location));

    // Act
    let report = pipeline.use_case.execute(&message).await;

    // Assert
    assert!(matches!(
        report.failure,
        Some(IngestionFailure::SourceUnavailable(_))
    ));
    assert_eq!(report.stage, IngestionStage::Fetched);
    assert!(pipeline.notification_queue.is_released(&message));
    assert!(pipeline.object_source.contains(&location));
    assert!(pipeline.record_store.all().is_empty());
}

#[tokio::test]
async fn a_store_failure_releases_the_notification_and_keeps_the_source() {
    // Arrange
    let pipeline = spawn_pipeline(64);
    let location = random_location();
    pipeline
        .object_source
        .put(&location, &export_page(&random_conversation(3), 0));
    pipeline.record_store.fail_inserts.store(true, Ordering::SeqCst);
    let message = pipeline
        .notification_queue
        .deliver(object_created_body(&location));

    // Act
    let report = pipeline.use_case.execute(&message).await;

    // Assert
    let failure = report.failure.as_ref().unwrap();
    assert!(matches!(failure, IngestionFailure::StoreError(_)));
    assert!(failure.is_retryable());
    assert_eq!(report.stage, IngestionStage::Decoded);
    assert!(pipeline.notification_queue.is_released(&message));
    assert!(pipeline.object_source.contains(&location));

    // The redelivery succeeds once the store is back
    pipeline.record_store.fail_inserts.store(false, Ordering::SeqCst);
    let redelivered = pipeline
        .notification_queue
        .receive_one()
        .await;
    let report = pipeline.use_case.execute(&redelivered).await;
    assert_eq!(report.persisted, Some(PersistOutcome::Inserted(3)));
    assert!(pipeline.notification_queue.is_acked(&redelivered));
}

#[tokio::test]
async fn a_source_without_conversation_is_consumed_and_deleted() {
    // Arrange
    let pipeline = spawn_pipeline(64);
    let location = random_location();
    pipeline
        .object_source
        .put(&location, "<html><body>[no conversation here]</body></html>");
    let message = pipeline
        .notification_queue
        .deliver(object_created_body(&location));

    // Act
    let report = pipeline.use_case.execute(&message).await;

    // Assert
    assert!(matches!(report.failure, Some(IngestionFailure::NoPayloadFound)));
    assert!(!report.failure.as_ref().unwrap().is_retryable());
    assert!(report.is_acknowledged());
    assert!(report.source_deleted);
    assert_eq!(pipeline.record_store.nb_insert_calls.load(Ordering::SeqCst), 0);
    assert!(!pipeline.object_source.contains(&location));
}

#[tokio::test]
async fn a_conversation_that_is_not_valid_json_is_consumed() {
    // Arrange
    let pipeline = spawn_pipeline(64);
    let location = random_location();
    pipeline.object_source.put(
        &location,
        "<script>{\"linear_conversation\":[{\"message\": oops}]}</script>",
    );
    let message = pipeline
        .notification_queue
        .deliver(object_created_body(&location));

    // Act
    let report = pipeline.use_case.execute(&message).await;

    // Assert
    assert!(matches!(
        report.failure,
        Some(IngestionFailure::PayloadDecodeError(_))
    ));
    assert!(report.is_acknowledged());
    assert!(pipeline.record_store.all().is_empty());
}

#[tokio::test]
async fn a_truncated_conversation_is_consumed() {
    // Arrange
    let pipeline = spawn_pipeline(64);
    let location = random_location();
    pipeline.object_source.put(
        &location,
        "<script>{\"linear_conversation\":[{\"message\":{\"author\":{\"role\":\"user\"}",
    );
    let message = pipeline
        .notification_queue
        .deliver(object_created_body(&location));

    // Act
    let report = pipeline.use_case.execute(&message).await;

    // Assert
    assert!(matches!(
        report.failure,
        Some(IngestionFailure::PayloadDecodeError(_))
    ));
    assert_eq!(report.stage, IngestionStage::Acknowledged);
}

#[tokio::test]
async fn a_failed_deletion_does_not_prevent_the_acknowledgement() {
    // Arrange
    let pipeline = spawn_pipeline(64);
    let location = random_location();
    pipeline
        .object_source
        .put(&location, &export_page(&[("assistant", "hello")], 0));
    pipeline.object_source.fail_deletes.store(true, Ordering::SeqCst);
    let message = pipeline
        .notification_queue
        .deliver(object_created_body(&location));

    // Act
    let report = pipeline.use_case.execute(&message).await;

    // Assert
    assert!(report.failure.is_none());
    assert!(!report.source_deleted);
    assert!(report.is_acknowledged());
    assert_eq!(report.persisted, Some(PersistOutcome::Inserted(1)));
}

#[tokio::test]
async fn a_failed_acknowledgement_is_reported() {
    // Arrange
    let pipeline = spawn_pipeline(64);
    let location = random_location();
    pipeline
        .object_source
        .put(&location, &export_page(&[("user", "hello")], 0));
    pipeline.notification_queue.fail_acks.store(true, Ordering::SeqCst);
    let message = pipeline
        .notification_queue
        .deliver(object_created_body(&location));

    // Act
    let report = pipeline.use_case.execute(&message).await;

    // Assert
    assert!(matches!(
        report.failure,
        Some(IngestionFailure::AcknowledgementFailed(_))
    ));
    assert_eq!(report.stage, IngestionStage::SourceDeleted);
    assert!(!report.is_acknowledged());
    assert_eq!(report.persisted, Some(PersistOutcome::Inserted(1)));
}

#[tokio::test]
async fn other_events_are_acknowledged_without_side_effects() {
    // Arrange
    let pipeline = spawn_pipeline(64);
    let location = random_location();
    pipeline
        .object_source
        .put(&location, &export_page(&[("user", "hello")], 0));
    let message = pipeline
        .notification_queue
        .deliver(notification_body("ObjectRemoved:Delete", &location));

    // Act
    let report = pipeline.use_case.execute(&message).await;

    // Assert
    assert!(report.failure.is_none());
    assert!(report.location.is_none());
    assert!(report.is_acknowledged());
    assert!(pipeline.object_source.contains(&location));
    assert!(pipeline.record_store.all().is_empty());
}

#[tokio::test]
async fn an_invalid_notification_is_acknowledged() {
    // Arrange
    let pipeline = spawn_pipeline(64);
    let message = pipeline
        .notification_queue
        .deliver(b"{\"not\": \"an s3 event\"".to_vec());

    // Act
    let report = pipeline.use_case.execute(&message).await;

    // Assert
    assert!(matches!(
        report.failure,
        Some(IngestionFailure::InvalidNotification(_))
    ));
    assert!(report.is_acknowledged());
}

#[tokio::test]
async fn the_object_key_is_url_decoded_before_reading_the_source() {
    // Arrange
    let pipeline = spawn_pipeline(64);
    let location = ObjectLocation::new("exports", "shared chats/été.html");
    pipeline
        .object_source
        .put(&location, &export_page(&[("user", "bonjour")], 0));
    let encoded = ObjectLocation::new("exports", "shared+chats/%C3%A9t%C3%A9.html");
    let message = pipeline
        .notification_queue
        .deliver(object_created_body(&encoded));

    // Act
    let report = pipeline.use_case.execute(&message).await;

    // Assert
    assert_eq!(report.location, Some(location.clone()));
    assert_eq!(report.persisted, Some(PersistOutcome::Inserted(1)));
    assert!(!pipeline.object_source.contains(&location));
}
