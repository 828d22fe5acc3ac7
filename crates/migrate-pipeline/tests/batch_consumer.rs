mod common;

use common::{feedback_job, Harness, LIVE_TABLE, UAT_TABLE};
use migrate_core::{
    ColumnIdent, ColumnMapping, ConfigError, ConflictAction, ConsumerConnector, FieldTransform,
    GroupAdmin, PipelineError, SqlValue,
};
use migrate_pipeline::testing::MemorySource;
use migrate_pipeline::{BatchConsumer, ConsumerSettings};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn consumer(harness: &Harness) -> BatchConsumer {
    BatchConsumer::new(
        Arc::new(feedback_job()),
        &harness.context(),
        ConsumerSettings::default(),
    )
    .unwrap()
}

#[tokio::test]
async fn test_filtered_row_is_resolved_without_write() {
    let harness = Harness::new(MemorySource::new());
    let job = feedback_job();
    harness
        .publish_rows(
            &job.topic,
            &[json!({"id": 1, "ts": "2024-02-01"}), json!({"id": 2, "ts": "2023-01-01"})],
        )
        .await;

    let consumer = consumer(&harness);
    let mut session = harness.log.connect(&job.group_id, &job.topic).await.unwrap();
    let messages = session.next_batch(job.batch_size).await.unwrap();
    assert_eq!(messages.len(), 2);

    let report = consumer.process_batch(session.as_mut(), messages).await.unwrap();
    assert_eq!(report.upserted, 1);
    assert_eq!(report.filtered, 1);
    assert!(report.committed);

    for (sink, table) in [(&harness.live, LIVE_TABLE), (&harness.uat, UAT_TABLE)] {
        let rows = sink.rows(table);
        assert_eq!(rows.len(), 1, "{table}");
        assert!(rows.contains_key("1"));
    }
    assert!(harness.ledger.entries().is_empty());

    let status = harness.log.describe_group(&job.group_id, &job.topic).await.unwrap();
    assert_eq!(status.log_end_total, 2);
    assert!(status.is_drained());
}

#[tokio::test]
async fn test_row_write_failure_is_recorded_and_batch_commits() {
    let harness = Harness::new(MemorySource::new());
    let job = feedback_job();
    harness
        .publish_rows(&job.topic, &[json!({"id": 5, "ts": "2024-03-01", "note": "ok"})])
        .await;
    harness.live.reject_key("5");

    let consumer = consumer(&harness);
    let mut session = harness.log.connect(&job.group_id, &job.topic).await.unwrap();
    let messages = session.next_batch(job.batch_size).await.unwrap();
    let report = consumer.process_batch(session.as_mut(), messages).await.unwrap();

    assert_eq!(report.write_failures, 1);
    assert_eq!(report.upserted, 0);
    assert!(report.committed);

    let entries = harness.ledger.entries();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].target_tables, LIVE_TABLE);
    assert_eq!(entries[0].source_primary_key.as_deref(), Some("5"));
    assert!(entries[0].error_message.starts_with("WRITE_FAILED: "));
    assert_eq!(entries[0].migration_step, "feedback_track_migration");

    assert!(harness.live.row(LIVE_TABLE, "5").is_none());
    let row = harness.uat.row(UAT_TABLE, "5").unwrap();
    assert_eq!(row["note"], SqlValue::Text("ok".to_string()));

    let status = harness.log.describe_group(&job.group_id, &job.topic).await.unwrap();
    assert!(status.is_drained());
}

#[tokio::test]
async fn test_unavailable_sink_leaves_batch_uncommitted() {
    let harness = Harness::new(MemorySource::new());
    let job = feedback_job();
    harness
        .publish_rows(
            &job.topic,
            &[
                json!({"id": 1, "ts": "2024-02-01"}),
                json!({"id": 2, "ts": "2024-02-02"}),
                json!({"id": 3, "ts": "2022-01-01"}),
                json!({"id": 0, "ts": "2024-02-03"}),
            ],
        )
        .await;
    harness.live.set_unavailable(true);

    let consumer = consumer(&harness);
    let mut session = harness.log.connect(&job.group_id, &job.topic).await.unwrap();
    let messages = session.next_batch(job.batch_size).await.unwrap();
    let err = consumer
        .process_batch(session.as_mut(), messages)
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::BatchFatal { ref sink, .. } if sink == "live"));
    assert_eq!(harness.log.commits(), 0);
    // Nothing recorded for a batch that will be redelivered, including the keyless row.
    assert!(harness.ledger.entries().is_empty());

    let status = harness.log.describe_group(&job.group_id, &job.topic).await.unwrap();
    assert_eq!(status.lag_total, 4);
    assert!(!status.is_drained());

    // The next session gets the whole batch again.
    harness.live.set_unavailable(false);
    let mut session = harness.log.connect(&job.group_id, &job.topic).await.unwrap();
    let messages = session.next_batch(job.batch_size).await.unwrap();
    assert_eq!(messages.len(), 4);

    let report = consumer.process_batch(session.as_mut(), messages).await.unwrap();
    assert!(report.committed);
    assert_eq!(report.upserted, 2);
    assert_eq!(report.filtered, 1);
    assert_eq!(report.rejected, 1);
    assert_eq!(harness.live.rows(LIVE_TABLE).len(), 2);
    assert_eq!(harness.uat.rows(UAT_TABLE).len(), 2);

    let entries = harness.ledger.entries();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].error_message, "MISSING_PRIMARY_KEY");
    assert_eq!(entries[0].target_tables, format!("{LIVE_TABLE},{UAT_TABLE}"));
}

#[tokio::test]
async fn test_redelivery_is_idempotent() {
    let harness = Harness::new(MemorySource::new());
    let job = feedback_job();
    harness
        .publish_rows(
            &job.topic,
            &[
                json!({"id": 7, "ts": "2024-05-01", "note": "first"}),
                json!({"id": 8, "ts": "2024-05-02", "note": null}),
            ],
        )
        .await;

    let consumer = consumer(&harness);
    let mut session = harness.log.connect(&job.group_id, &job.topic).await.unwrap();
    let messages = session.next_batch(job.batch_size).await.unwrap();

    consumer
        .process_batch(session.as_mut(), messages.clone())
        .await
        .unwrap();
    let once = harness.live.rows(LIVE_TABLE);

    consumer.process_batch(session.as_mut(), messages).await.unwrap();
    let twice = harness.live.rows(LIVE_TABLE);

    assert_eq!(once, twice);
    assert_eq!(harness.live.writes(), 4);
    assert_eq!(twice["8"]["note"], SqlValue::Null);
}

fn stamped_column() -> ColumnMapping {
    ColumnMapping::new(ColumnIdent::new("migrated_at").unwrap())
        .with_transform(FieldTransform::NowIfMissing)
}

#[tokio::test]
async fn test_redelivery_keeps_generated_timestamp() {
    let harness = Harness::new(MemorySource::new());
    let job = feedback_job().with_column(stamped_column().with_conflict(ConflictAction::InsertOnly));
    harness
        .publish_rows(&job.topic, &[json!({"id": 4, "ts": "2024-05-01"})])
        .await;

    let consumer =
        BatchConsumer::new(Arc::new(job.clone()), &harness.context(), ConsumerSettings::default())
            .unwrap();
    let mut session = harness.log.connect(&job.group_id, &job.topic).await.unwrap();
    let messages = session.next_batch(job.batch_size).await.unwrap();

    consumer
        .process_batch(session.as_mut(), messages.clone())
        .await
        .unwrap();
    let once = harness.live.row(LIVE_TABLE, "4").unwrap();
    assert!(matches!(once["migrated_at"], SqlValue::Timestamp(_)));

    tokio::time::sleep(Duration::from_millis(5)).await;
    consumer.process_batch(session.as_mut(), messages).await.unwrap();
    let twice = harness.live.row(LIVE_TABLE, "4").unwrap();

    assert_eq!(once, twice);
    assert_eq!(harness.live.writes(), 2);
}

#[tokio::test]
async fn test_overwritten_generated_timestamp_is_rejected() {
    let harness = Harness::new(MemorySource::new());
    let job = feedback_job().with_column(stamped_column());

    let err = BatchConsumer::new(Arc::new(job), &harness.context(), ConsumerSettings::default())
        .err()
        .unwrap();
    assert!(matches!(err, ConfigError::InvalidJob { ref message, .. } if message.contains("insert_only")));
}

#[tokio::test]
async fn test_heartbeat_between_rows() {
    let harness = Harness::new(MemorySource::new());
    let job = feedback_job();
    let rows: Vec<_> = (1..=6)
        .map(|id| json!({"id": id, "ts": "2024-08-01"}))
        .collect();
    harness.publish_rows(&job.topic, &rows).await;

    let consumer = consumer(&harness);
    let mut session = harness.log.connect(&job.group_id, &job.topic).await.unwrap();
    let messages = session.next_batch(job.batch_size).await.unwrap();
    assert_eq!(messages.len(), 6);

    let report = consumer.process_batch(session.as_mut(), messages).await.unwrap();
    assert!(report.committed);
    assert_eq!(harness.log.commits(), 1);
    assert!(harness.log.heartbeats() >= 6, "{}", harness.log.heartbeats());
}

#[tokio::test]
async fn test_coalesce_keeps_stored_value() {
    let harness = Harness::new(MemorySource::new());
    let job = feedback_job();
    harness
        .publish_rows(&job.topic, &[json!({"id": 9, "ts": "2024-05-01", "note": "keep"})])
        .await;
    harness
        .publish_rows(&job.topic, &[json!({"id": 9, "ts": "2024-06-01", "note": null})])
        .await;

    let consumer = consumer(&harness);
    let mut session = harness.log.connect(&job.group_id, &job.topic).await.unwrap();
    let messages = session.next_batch(job.batch_size).await.unwrap();
    consumer.process_batch(session.as_mut(), messages).await.unwrap();

    let row = harness.live.row(LIVE_TABLE, "9").unwrap();
    assert_eq!(row["ts"], SqlValue::Text("2024-06-01".to_string()));
    assert_eq!(row["note"], SqlValue::Text("keep".to_string()));
}

#[tokio::test]
async fn test_unparseable_messages_go_to_ledger() {
    let harness = Harness::new(MemorySource::new());
    let job = feedback_job();
    harness.log.push_raw(&job.topic, "a", Some(b"{not json".as_slice()));
    harness.log.push_raw(&job.topic, "b", None);
    harness.log.push_raw(&job.topic, "c", Some(b"[1, 2]".as_slice()));

    let consumer = consumer(&harness);
    let mut session = harness.log.connect(&job.group_id, &job.topic).await.unwrap();
    let messages = session.next_batch(job.batch_size).await.unwrap();
    let report = consumer.process_batch(session.as_mut(), messages).await.unwrap();

    assert_eq!(report.parse_errors, 3);
    assert!(report.committed);

    let entries = harness.ledger.entries();
    assert_eq!(entries.len(), 3);
    assert!(entries.iter().all(|e| e.error_message == "INVALID_JSON"));
    assert!(entries.iter().all(|e| e.source_primary_key.is_none()));
    assert!(entries.iter().any(|e| e.failed_data == "{}"));
    assert!(entries.iter().any(|e| e.failed_data == "{not json"));
}

#[tokio::test]
async fn test_run_drains_until_cancelled() {
    let harness = Harness::new(MemorySource::new());
    let job = feedback_job();
    let rows: Vec<_> = (1..=250)
        .map(|id| json!({"id": id, "ts": "2024-07-01"}))
        .collect();
    harness.publish_rows(&job.topic, &rows).await;

    let consumer = Arc::new(consumer(&harness));
    let cancel = CancellationToken::new();
    let task = tokio::spawn({
        let consumer = consumer.clone();
        let cancel = cancel.clone();
        async move { consumer.run(cancel).await }
    });

    let drained = async {
        loop {
            let status = harness.log.describe_group(&job.group_id, &job.topic).await.unwrap();
            if status.is_drained() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    };
    tokio::time::timeout(Duration::from_secs(10), drained)
        .await
        .expect("consumer should drain the topic");

    cancel.cancel();
    task.await.unwrap().unwrap();

    assert_eq!(harness.live.rows(LIVE_TABLE).len(), 250);
    assert_eq!(harness.uat.rows(UAT_TABLE).len(), 250);
    assert_eq!(harness.log.connects(), 1);
    assert_eq!(harness.log.disconnects(), 1);
}
