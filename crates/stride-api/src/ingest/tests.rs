use chrono::{DateTime, Duration, TimeZone, Utc};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use stride_core::clock::ManualClock;

use super::*;

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 10, 1, 12, 0, 0).unwrap()
}

fn ts(at: DateTime<Utc>) -> String {
    at.to_rfc3339()
}

/// Step record starting `offset_secs` after 07:00 and lasting `secs`
fn steps(origin_id: Option<&str>, offset_secs: i64, secs: i64) -> Value {
    let start = Utc.with_ymd_and_hms(2026, 10, 1, 7, 0, 0).unwrap() + Duration::seconds(offset_secs);
    let mut record = json!({
        "start_time": ts(start),
        "end_time": ts(start + Duration::seconds(secs)),
        "count": 1_250,
        "source": "watch"
    });
    if let Some(origin_id) = origin_id {
        record["origin_id"] = json!(origin_id);
    }
    record
}

fn request(owner_id: &str, records: Vec<Value>) -> IngestRequest {
    IngestRequest {
        owner_id: owner_id.to_string(),
        records,
    }
}

async fn engine() -> IngestionEngine {
    let store = Arc::new(Store::open_in_memory().await.unwrap());
    store.register_owner("owner-1").await.unwrap();
    store.register_owner("owner-2").await.unwrap();
    IngestionEngine::new(
        store,
        Arc::new(ManualClock::new(now())),
        DEFAULT_MAX_BATCH_RECORDS,
    )
}

#[tokio::test(flavor = "multi_thread")]
async fn resubmitting_a_batch_is_idempotent() {
    let engine = engine().await;
    let batch = request(
        "owner-1",
        vec![
            steps(Some("s-1"), 0, 600),
            steps(Some("s-2"), 3_600, 600),
            steps(None, 7_200, 600),
        ],
    );

    let first = engine.ingest(RecordKind::Step, &batch).await.unwrap();
    assert_eq!(first.inserted, 3);
    assert_eq!(first.duplicates_skipped, 0);
    assert!(first.is_success());

    let second = engine.ingest(RecordKind::Step, &batch).await.unwrap();
    assert_eq!(second.received, 3);
    assert_eq!(second.inserted, 0);
    assert_eq!(second.duplicates_skipped, 3);
    assert!(second.is_success());
}

#[tokio::test(flavor = "multi_thread")]
async fn fuzzy_start_window_is_inclusive_at_120_seconds() {
    let engine = engine().await;
    engine
        .ingest(RecordKind::Step, &request("owner-1", vec![steps(None, 0, 600)]))
        .await
        .unwrap();

    let at_edge = engine
        .ingest(RecordKind::Step, &request("owner-1", vec![steps(None, 120, 600)]))
        .await
        .unwrap();
    assert_eq!(at_edge.duplicates_skipped, 1);
    assert_eq!(at_edge.inserted, 0);

    let past_edge = engine
        .ingest(RecordKind::Step, &request("owner-1", vec![steps(None, 121, 600)]))
        .await
        .unwrap();
    assert_eq!(past_edge.duplicates_skipped, 0);
    assert_eq!(past_edge.inserted, 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn fuzzy_duration_tolerance_boundary() {
    let engine = engine().await;
    // 300 s stored record: tolerance is max(30 s, 10 s)
    engine
        .ingest(RecordKind::Step, &request("owner-1", vec![steps(None, 0, 300)]))
        .await
        .unwrap();

    let within = engine
        .ingest(RecordKind::Step, &request("owner-1", vec![steps(None, 0, 330)]))
        .await
        .unwrap();
    assert_eq!(within.duplicates_skipped, 1);

    let beyond = engine
        .ingest(RecordKind::Step, &request("owner-1", vec![steps(None, 0, 331)]))
        .await
        .unwrap();
    assert_eq!(beyond.inserted, 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn partial_batch_reports_each_outcome() {
    let engine = engine().await;
    engine
        .ingest(
            RecordKind::Step,
            &request("owner-1", vec![steps(Some("seen"), 0, 600)]),
        )
        .await
        .unwrap();

    let mut negative = steps(Some("neg"), 9_000, 600);
    negative["count"] = json!(-3);
    let mut no_start = steps(Some("nostart"), 12_000, 600);
    no_start.as_object_mut().unwrap().remove("start_time");

    let report = engine
        .ingest(
            RecordKind::Step,
            &request(
                "owner-1",
                vec![
                    negative,
                    steps(Some("seen"), 0, 600),
                    steps(Some("new-1"), 3_600, 600),
                    no_start,
                    steps(Some("new-2"), 5_400, 600),
                ],
            ),
        )
        .await
        .unwrap();

    assert_eq!(
        report,
        IngestReport {
            received: 5,
            inserted: 2,
            duplicates_skipped: 1,
            warnings_count: 0,
            errors_count: 2,
            errors: vec![
                "record 0: count: must not be negative".to_string(),
                "record 3: start_time: missing required field".to_string(),
            ],
        }
    );
    assert!(report.is_success());
}

#[tokio::test(flavor = "multi_thread")]
async fn all_invalid_batch_fails_without_inserting() {
    let engine = engine().await;
    let report = engine
        .ingest(
            RecordKind::Step,
            &request("owner-1", vec![json!({ "count": 3 }), json!({})]),
        )
        .await
        .unwrap();

    assert_eq!(report.inserted, 0);
    assert_eq!(report.errors_count, 2);
    assert!(!report.is_success());
    assert!(engine
        .store()
        .audit_for_owner("owner-1", 10)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn empty_batch_succeeds() {
    let engine = engine().await;
    let report = engine
        .ingest(RecordKind::Sleep, &request("owner-1", Vec::new()))
        .await
        .unwrap();
    assert_eq!(report, IngestReport::new(0));
    assert!(report.is_success());
}

#[tokio::test(flavor = "multi_thread")]
async fn batch_spanning_owners_is_a_protocol_error() {
    let engine = engine().await;
    let mut foreign = steps(Some("x"), 0, 600);
    foreign["owner_id"] = json!("owner-2");
    let mut own = steps(Some("y"), 3_600, 600);
    own["owner_id"] = json!("owner-1");

    let error = engine
        .ingest(RecordKind::Step, &request("owner-1", vec![own, foreign]))
        .await
        .unwrap_err();
    assert!(matches!(error, IngestError::Protocol(_)));

    let stored = engine
        .store()
        .find_by_origin_ids("owner-1", RecordKind::Step, &["y".to_string()])
        .await
        .unwrap();
    assert!(stored.is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn malformed_batches_are_protocol_errors() {
    let engine = engine().await;
    for batch in [
        request("  ", vec![steps(None, 0, 60)]),
        request("owner-1", vec![json!("not an object")]),
    ] {
        let error = engine.ingest(RecordKind::Step, &batch).await.unwrap_err();
        assert!(matches!(error, IngestError::Protocol(_)), "{error}");
    }

    let small = IngestionEngine::new(
        engine.store().clone(),
        Arc::new(ManualClock::new(now())),
        2,
    );
    let error = small
        .ingest(
            RecordKind::Step,
            &request("owner-1", vec![json!({}), json!({}), json!({})]),
        )
        .await
        .unwrap_err();
    assert_eq!(error.to_string(), "batch of 3 records exceeds the limit of 2");
}

#[tokio::test(flavor = "multi_thread")]
async fn unknown_owner_rejects_the_batch() {
    let engine = engine().await;
    let error = engine
        .ingest(RecordKind::Step, &request("ghost", vec![steps(None, 0, 60)]))
        .await
        .unwrap_err();
    assert!(matches!(error, IngestError::UnknownOwner));
}

#[tokio::test(flavor = "multi_thread")]
async fn repeats_within_one_batch_are_duplicates() {
    let engine = engine().await;
    let report = engine
        .ingest(
            RecordKind::Step,
            &request(
                "owner-1",
                vec![
                    steps(Some("s-1"), 0, 600),
                    steps(Some("s-1"), 0, 600),
                    steps(None, 3_600, 600),
                    steps(None, 3_630, 610),
                ],
            ),
        )
        .await
        .unwrap();

    assert_eq!(report.inserted, 2);
    assert_eq!(report.duplicates_skipped, 2);
}

#[tokio::test(flavor = "multi_thread")]
async fn metrics_of_different_types_at_one_instant_are_distinct() {
    let engine = engine().await;
    let at = ts(now() - Duration::hours(1));
    let report = engine
        .ingest(
            RecordKind::Metric,
            &request(
                "owner-1",
                vec![
                    json!({ "metric_type": "heart_rate", "value": 64, "unit": "bpm", "recorded_at": at }),
                    json!({ "metric_type": "weight", "value": 71.2, "unit": "kg", "recorded_at": at }),
                    json!({ "metric_type": "heart_rate", "value": 65, "unit": "bpm", "recorded_at": at }),
                ],
            ),
        )
        .await
        .unwrap();

    assert_eq!(report.inserted, 2);
    assert_eq!(report.duplicates_skipped, 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn warnings_and_duplicates_are_audited() {
    let engine = engine().await;
    let workout = json!({
        "workout_type": "running",
        "start_time": "2026-10-01T06:00:00Z",
        "end_time": "2026-10-01T07:00:00Z",
        "calories": 5_400
    });

    let first = engine
        .ingest(RecordKind::Workout, &request("owner-1", vec![workout.clone()]))
        .await
        .unwrap();
    assert_eq!(first.inserted, 1);
    assert_eq!(first.warnings_count, 1);

    let second = engine
        .ingest(RecordKind::Workout, &request("owner-1", vec![workout]))
        .await
        .unwrap();
    assert_eq!(second.duplicates_skipped, 1);
    assert_eq!(second.warnings_count, 0);

    let audit = engine.store().audit_for_owner("owner-1", 10).await.unwrap();
    assert_eq!(audit.len(), 2);
    // Newest first
    assert_eq!(audit[0].event, "duplicate");
    assert!(audit[0].matched_record_id.is_some());
    assert!(audit[0].message.contains("matches stored record"));
    assert_eq!(audit[1].event, "warning");
    assert_eq!(audit[1].field.as_deref(), Some("calories"));
    assert_eq!(audit[1].kind, "workout");
}

#[tokio::test(flavor = "multi_thread")]
async fn concurrent_redelivery_for_one_owner_inserts_once() {
    let engine = engine().await;
    let batch = request(
        "owner-1",
        (0..20)
            .map(|index| steps(None, index * 3_600, 900))
            .collect(),
    );

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let engine = engine.clone();
            let batch = batch.clone();
            tokio::spawn(async move { engine.ingest(RecordKind::Step, &batch).await })
        })
        .collect();

    let mut inserted = 0;
    let mut duplicates = 0;
    for handle in handles {
        let report = handle.await.unwrap().unwrap();
        inserted += report.inserted;
        duplicates += report.duplicates_skipped;
    }
    assert_eq!(inserted, 20);
    assert_eq!(duplicates, 60);
}
