//! Flush pipeline behaviour: summarisation, the too-soon gate, marker
//! advancement, and degradation under cache, store, and sink failures.

use std::sync::Arc;

use chrono::Utc;
use statstash::{
    Flusher, MemoryCache, MemoryStore, MetricCache, MetricKind, Recorder, SinkConfig,
    StatSummary, period_start,
    testutil::{
        CacheOp, CapturingSink, FailingCache, FailingStore, FailureConfig,
        error_factory_connection,
    },
};

fn pipeline() -> (Recorder, Flusher, MemoryCache) {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let cache = MemoryCache::new();
    let store = MemoryStore::new();
    let recorder = Recorder::new(Arc::new(cache.clone()), Arc::new(store.clone()));
    let flusher = Flusher::new(Arc::new(cache.clone()), Arc::new(store));
    (recorder, flusher, cache)
}

fn find<'a>(records: &'a [StatSummary], name: &str) -> &'a StatSummary {
    records
        .iter()
        .find(|record| record.config().name == name)
        .unwrap_or_else(|| panic!("no summary named {name} in {records:?}"))
}

// ============================================================================
// Summarisation
// ============================================================================

#[tokio::test]
async fn flush_summarises_all_three_kinds() {
    let (recorder, flusher, _cache) = pipeline();

    recorder.increment_counter_by("requests", "web-1", 7).await.expect("increment");
    recorder.record_gauge("temperature", "raleigh", 24.0).await.expect("gauge");
    recorder.record_timing("subroutine", "A", 24.0, 1.0).await.expect("timing");

    let sink = CapturingSink::new();
    flusher
        .update_backend(period_start(Utc::now(), 0), &sink, &SinkConfig::default(), true)
        .await
        .expect("flush");

    let records = sink.records();
    assert_eq!(records.len(), 3, "one summary per metric: {records:?}");

    match find(&records, "requests") {
        StatSummary::Counter(counter) => assert_eq!(counter.count, 7),
        other => panic!("expected counter, got {other:?}"),
    }
    match find(&records, "temperature") {
        StatSummary::Gauge(gauge) => assert_eq!(gauge.value, 24.0),
        other => panic!("expected gauge, got {other:?}"),
    }
    match find(&records, "subroutine") {
        StatSummary::Timing(timing) => {
            assert_eq!(timing.count, 1);
            assert_eq!(timing.min, 24.0);
        }
        other => panic!("expected timing, got {other:?}"),
    }
}

#[tokio::test]
async fn timing_summaries_match_the_statistics() {
    let (recorder, flusher, _cache) = pipeline();

    recorder.record_timing("subroutine", "A", 24.0, 1.0).await.expect("timing");
    for value in [10.0, 15.5] {
        recorder.record_timing("subroutine", "B", value, 1.0).await.expect("timing");
    }
    for value in 0..10 {
        recorder
            .record_timing("upandtotheright", "", f64::from(value), 1.0)
            .await
            .expect("timing");
    }

    let sink = CapturingSink::new();
    flusher
        .update_backend(period_start(Utc::now(), 0), &sink, &SinkConfig::default(), true)
        .await
        .expect("flush");
    let records = sink.records();

    let a = records
        .iter()
        .find_map(|record| match record {
            StatSummary::Timing(t) if t.config.source == "A" => Some(t),
            _ => None,
        })
        .expect("summary for subroutine/A");
    assert_eq!(a.count, 1);
    assert_eq!(a.min, 24.0);
    assert_eq!(a.max, 24.0);
    assert_eq!(a.sum, 24.0);
    assert_eq!(a.sum_squares, 576.0);
    assert_eq!(a.median, 24.0);
    assert_eq!(a.ninth_decile_count, 1);
    assert_eq!(a.ninth_decile_value, 24.0);
    assert_eq!(a.ninth_decile_sum, 24.0);

    let b = records
        .iter()
        .find_map(|record| match record {
            StatSummary::Timing(t) if t.config.source == "B" => Some(t),
            _ => None,
        })
        .expect("summary for subroutine/B");
    assert_eq!(b.count, 2);
    assert_eq!(b.min, 10.0);
    assert_eq!(b.max, 15.5);
    assert_eq!(b.sum, 25.5);
    assert_eq!(b.sum_squares, 340.25);
    assert_eq!(b.median, 12.75);
    assert_eq!(b.ninth_decile_count, 2);
    assert_eq!(b.ninth_decile_value, 15.5);
    assert_eq!(b.ninth_decile_sum, 25.5);

    let up = match find(&records, "upandtotheright") {
        StatSummary::Timing(t) => t,
        other => panic!("expected timing, got {other:?}"),
    };
    assert_eq!(up.count, 10);
    assert_eq!(up.min, 0.0);
    assert_eq!(up.max, 9.0);
    assert_eq!(up.sum, 45.0);
    assert_eq!(up.sum_squares, 285.0);
    assert_eq!(up.median, 4.5);
    assert_eq!(up.ninth_decile_count, 9);
    assert_eq!(up.ninth_decile_value, 8.0);
    assert_eq!(up.ninth_decile_sum, 36.0);
}

#[tokio::test]
async fn corrupt_bucket_is_skipped_not_fatal() {
    let (recorder, flusher, cache) = pipeline();

    recorder.record_gauge("healthy", "", 1.0).await.expect("gauge");

    // Materialise a timing config, then stomp its bucket with garbage.
    let broken = flusher
        .registry()
        .get_config(MetricKind::Timing, "broken", "")
        .await
        .expect("config");
    cache
        .set(statstash::CacheItem::new(broken.bucket_key(Utc::now(), 0), "not bincode"))
        .await
        .expect("stomp");

    let sink = CapturingSink::new();
    flusher
        .update_backend(period_start(Utc::now(), 0), &sink, &SinkConfig::default(), true)
        .await
        .expect("flush must survive a corrupt bucket");

    let records = sink.records();
    assert_eq!(records.len(), 1, "only the healthy gauge flows through: {records:?}");
    assert_eq!(records[0].config().name, "healthy");
}

// ============================================================================
// The too-soon gate
// ============================================================================

#[tokio::test]
async fn forced_flush_then_unforced_is_too_soon() {
    let (recorder, flusher, _cache) = pipeline();
    recorder.increment_counter("requests", "").await.expect("increment");

    let sink = CapturingSink::new();
    let now = period_start(Utc::now(), 0);

    flusher.update_backend(now, &sink, &SinkConfig::default(), true).await.expect("forced");
    assert_eq!(sink.flush_count(), 1);

    let second = flusher.update_backend(now, &sink, &SinkConfig::default(), false).await;
    assert!(
        second.as_ref().err().is_some_and(|err| err.is_too_soon()),
        "second flush must hit the gate, got: {second:?}"
    );
    assert_eq!(sink.flush_count(), 1, "the gate must fire before any sink call");
}

#[tokio::test]
async fn duplicate_ticks_make_exactly_one_sink_call() {
    let (recorder, flusher, _cache) = pipeline();
    recorder.increment_counter("requests", "").await.expect("increment");

    let sink = CapturingSink::new();
    let now = period_start(Utc::now(), 0);

    flusher.update_backend(now, &sink, &SinkConfig::default(), false).await.expect("first tick");
    let second = flusher.update_backend(now, &sink, &SinkConfig::default(), false).await;
    assert!(second.as_ref().err().is_some_and(|err| err.is_too_soon()), "got: {second:?}");
    assert_eq!(sink.flush_count(), 1);
}

#[tokio::test]
async fn empty_period_flushes_trivially_without_advancing_marker() {
    let (_recorder, flusher, _cache) = pipeline();
    let sink = CapturingSink::new();
    let now = period_start(Utc::now(), 0);

    flusher.update_backend(now, &sink, &SinkConfig::default(), false).await.expect("empty");
    assert_eq!(sink.flush_count(), 0);

    // The marker did not move, so the same period is not gated.
    flusher.update_backend(now, &sink, &SinkConfig::default(), false).await.expect("again");
    assert_eq!(sink.flush_count(), 0);
}

// ============================================================================
// Failure handling
// ============================================================================

#[tokio::test]
async fn sink_failure_leaves_marker_for_retry() {
    let (recorder, flusher, _cache) = pipeline();
    recorder.increment_counter("requests", "").await.expect("increment");

    let sink = CapturingSink::new();
    sink.set_fail(true);
    let now = period_start(Utc::now(), 0);

    let result = flusher.update_backend(now, &sink, &SinkConfig::default(), true).await;
    assert!(result.is_err(), "sink failure must propagate");
    assert_eq!(sink.flush_count(), 0);

    // Marker untouched: the same period passes the non-forced gate and
    // the batch is re-emitted.
    sink.set_fail(false);
    flusher.update_backend(now, &sink, &SinkConfig::default(), false).await.expect("retry");
    assert_eq!(sink.flush_count(), 1);
}

#[tokio::test]
async fn bucket_multi_get_failure_degrades_to_trivial_success() {
    let inner = MemoryCache::new();
    let store = MemoryStore::new();
    let recorder = Recorder::new(Arc::new(inner.clone()), Arc::new(store.clone()));
    recorder.increment_counter("requests", "").await.expect("increment");

    let failing = FailingCache::wrap(
        inner,
        FailureConfig::new(error_factory_connection("cache down"))
            .with_operations(vec![CacheOp::GetMulti]),
    );
    let flusher = Flusher::new(Arc::new(failing), Arc::new(store));

    let sink = CapturingSink::new();
    flusher
        .update_backend(period_start(Utc::now(), 0), &sink, &SinkConfig::default(), true)
        .await
        .expect("multi-get failure is not fatal");
    assert_eq!(sink.flush_count(), 0, "nothing can be flushed without buckets");
}

#[tokio::test]
async fn enumeration_failure_aborts_the_flush() {
    let cache = MemoryCache::new();
    let store = FailingStore::wrap(MemoryStore::new());
    store.fail_scan(Some("iterator died"));
    let flusher = Flusher::new(Arc::new(cache), Arc::new(store));

    let sink = CapturingSink::new();
    let result = flusher
        .update_backend(period_start(Utc::now(), 0), &sink, &SinkConfig::default(), true)
        .await;
    assert!(result.is_err(), "enumeration failure must abort, got: {result:?}");
    assert_eq!(sink.flush_count(), 0);
}

// ============================================================================
// Forced re-flush re-emits identical data
// ============================================================================

#[tokio::test]
async fn forced_reflush_re_emits_surviving_buckets() {
    let (recorder, flusher, _cache) = pipeline();
    recorder.increment_counter_by("requests", "", 5).await.expect("increment");

    let sink = CapturingSink::new();
    let now = period_start(Utc::now(), 0);

    flusher.update_backend(now, &sink, &SinkConfig::default(), true).await.expect("first");
    flusher.update_backend(now, &sink, &SinkConfig::default(), true).await.expect("second");

    let batches = sink.batches();
    assert_eq!(batches.len(), 2);
    assert_eq!(batches[0], batches[1], "buckets survive a flush, so a forced re-flush repeats it");
}
