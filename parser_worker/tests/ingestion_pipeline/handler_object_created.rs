use std::time::Duration;

use parser_worker::{
    configuration::WorkerSettings, handlers::handler_object_created::run_handler,
    ports::record_store::RecordStore,
};
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;

use crate::helpers::{export_page, object_created_body, random_conversation, random_location, spawn_pipeline};

fn worker_settings() -> WorkerSettings {
    WorkerSettings {
        nb_handlers: 1,
        max_messages: 2,
        wait_seconds: 1,
        poll_interval_ms: 10,
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn handler_ingests_every_queued_notification_until_cancelled() {
    // Arrange
    let pipeline = spawn_pipeline(128);
    let locations: Vec<_> = (0..5).map(|_| random_location()).collect();
    for location in locations.iter() {
        pipeline
            .object_source
            .put(location, &export_page(&random_conversation(4), 0));
        pipeline.notification_queue.push(object_created_body(location));
    }

    let cancel_token = CancellationToken::new();
    let handler = tokio::spawn(run_handler(
        pipeline.notification_queue.clone(),
        pipeline.use_case.clone(),
        worker_settings(),
        cancel_token.clone(),
    ));

    // Act
    let mut nb_acked = 0;
    for _ in 0..100 {
        nb_acked = pipeline.notification_queue.acked.lock().unwrap().len();
        if nb_acked == locations.len() {
            break;
        }
        sleep(Duration::from_millis(20)).await;
    }
    cancel_token.cancel();

    // Assert
    timeout(Duration::from_secs(5), handler)
        .await
        .expect("The handler did not stop once cancelled")
        .unwrap();

    assert_eq!(nb_acked, locations.len());
    for location in locations.iter() {
        let stored = pipeline.record_store.list_by_file(location).await.unwrap();
        assert_eq!(stored.len(), 4);
        assert!(!pipeline.object_source.contains(location));
    }
}

#[tokio::test]
async fn handler_stops_while_waiting_for_notifications() {
    // Arrange
    let pipeline = spawn_pipeline(128);
    let cancel_token = CancellationToken::new();
    let handler = tokio::spawn(run_handler(
        pipeline.notification_queue.clone(),
        pipeline.use_case.clone(),
        WorkerSettings {
            wait_seconds: 20,
            ..worker_settings()
        },
        cancel_token.clone(),
    ));
    sleep(Duration::from_millis(50)).await;

    // Act
    cancel_token.cancel();

    // Assert
    timeout(Duration::from_secs(5), handler)
        .await
        .expect("The handler did not stop once cancelled")
        .unwrap();
    assert!(pipeline.notification_queue.acked.lock().unwrap().is_empty());
}
