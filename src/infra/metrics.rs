//! Lock-free metrics collection and periodic reporting
//!
//! Uses atomics for hot-path operations to avoid mutex contention with the
//! coordinator lock. Reporting is the only operation that resets anything
//! (via atomic swap).
//!
//! NOTE: All atomics use Relaxed ordering intentionally. These are statistical
//! counters only; never use them for coordination or logic decisions.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// Prometheus-style exponential bucket boundaries (microseconds)
/// Buckets: ≤100, ≤200, ≤400, ≤800, ≤1600, ≤3200, ≤6400, ≤12800, ≤25600, ≤51200, >51200
const BUCKET_BOUNDS: [u64; 10] = [100, 200, 400, 800, 1600, 3200, 6400, 12800, 25600, 51200];
const NUM_BUCKETS: usize = 11;

/// Door command latency bucket boundaries (milliseconds)
const DOOR_LATENCY_BOUNDS_MS: [u64; 10] = [5, 10, 25, 50, 100, 250, 500, 1000, 2500, 5000];

#[inline]
fn bucket_index(latency_us: u64) -> usize {
    BUCKET_BOUNDS.partition_point(|&bound| bound < latency_us)
}

#[inline]
fn door_bucket_index(latency_ms: u64) -> usize {
    DOOR_LATENCY_BOUNDS_MS.partition_point(|&bound| bound < latency_ms)
}

/// Update an atomic max value using compare-and-swap loop
#[inline]
fn update_atomic_max(atomic_max: &AtomicU64, new_value: u64) {
    let mut current_max = atomic_max.load(Ordering::Relaxed);
    while new_value > current_max {
        match atomic_max.compare_exchange_weak(
            current_max,
            new_value,
            Ordering::Relaxed,
            Ordering::Relaxed,
        ) {
            Ok(_) => break,
            Err(actual) => current_max = actual,
        }
    }
}

/// Read a periodic value, zeroing it when `reset` is set
#[inline]
fn take(value: &AtomicU64, reset: bool) -> u64 {
    if reset {
        value.swap(0, Ordering::Relaxed)
    } else {
        value.load(Ordering::Relaxed)
    }
}

/// Read all buckets, zeroing them when `reset` is set
#[inline]
fn take_buckets(buckets: &[AtomicU64; NUM_BUCKETS], reset: bool) -> [u64; NUM_BUCKETS] {
    let mut result = [0u64; NUM_BUCKETS];
    for (i, bucket) in buckets.iter().enumerate() {
        result[i] = take(bucket, reset);
    }
    result
}

/// Compute percentile from histogram buckets
/// Returns the upper bound of the bucket containing the percentile
fn percentile_from_buckets(buckets: &[u64; NUM_BUCKETS], percentile: f64) -> u64 {
    let total: u64 = buckets.iter().sum();
    if total == 0 {
        return 0;
    }

    let target = (total as f64 * percentile) as u64;
    let mut cumulative = 0u64;

    // Last bucket uses 2x the previous bound
    const BUCKET_UPPER_BOUNDS: [u64; NUM_BUCKETS] =
        [100, 200, 400, 800, 1600, 3200, 6400, 12800, 25600, 51200, 102400];

    for (i, &count) in buckets.iter().enumerate() {
        cumulative += count;
        if cumulative >= target {
            return BUCKET_UPPER_BOUNDS[i];
        }
    }
    BUCKET_UPPER_BOUNDS[NUM_BUCKETS - 1]
}

/// Lock-free metrics collector
pub struct Metrics {
    /// Scans handed to the coordinator (monotonic)
    scans_total: AtomicU64,
    /// Scans since last report (reset on report)
    scans_since_report: AtomicU64,
    /// Scan handling latency histogram (reset on report)
    scan_latency_buckets: [AtomicU64; NUM_BUCKETS],
    scan_latency_sum_us: AtomicU64,
    scan_latency_max_us: AtomicU64,
    /// Scans from readers that are not one of our doors
    scans_ignored_total: AtomicU64,
    /// Scan lines the listener could not decode
    scans_malformed_total: AtomicU64,
    double_taps_total: AtomicU64,
    not_permitted_total: AtomicU64,
    no_window_total: AtomicU64,
    sessions_opened_total: AtomicU64,
    sessions_closed_total: AtomicU64,
    sessions_expired_total: AtomicU64,
    /// 1 while an open house session is active
    session_active: AtomicU64,
    /// Scan buffer size after the last mutation
    scan_buffer_len: AtomicU64,
    door_cmds_total: AtomicU64,
    door_cmd_failures_total: AtomicU64,
    doors_not_found_total: AtomicU64,
    /// Door commands that could not be queued because the worker is gone
    door_cmds_dropped: AtomicU64,
    /// Door command latency histogram (milliseconds, reset on report)
    door_latency_buckets: [AtomicU64; NUM_BUCKETS],
    door_latency_max_ms: AtomicU64,
    maintenance_ticks_total: AtomicU64,
    /// Last report time (only accessed from the reporter)
    last_report_time: parking_lot::Mutex<Instant>,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            scans_total: AtomicU64::new(0),
            scans_since_report: AtomicU64::new(0),
            scan_latency_buckets: std::array::from_fn(|_| AtomicU64::new(0)),
            scan_latency_sum_us: AtomicU64::new(0),
            scan_latency_max_us: AtomicU64::new(0),
            scans_ignored_total: AtomicU64::new(0),
            scans_malformed_total: AtomicU64::new(0),
            double_taps_total: AtomicU64::new(0),
            not_permitted_total: AtomicU64::new(0),
            no_window_total: AtomicU64::new(0),
            sessions_opened_total: AtomicU64::new(0),
            sessions_closed_total: AtomicU64::new(0),
            sessions_expired_total: AtomicU64::new(0),
            session_active: AtomicU64::new(0),
            scan_buffer_len: AtomicU64::new(0),
            door_cmds_total: AtomicU64::new(0),
            door_cmd_failures_total: AtomicU64::new(0),
            doors_not_found_total: AtomicU64::new(0),
            door_cmds_dropped: AtomicU64::new(0),
            door_latency_buckets: std::array::from_fn(|_| AtomicU64::new(0)),
            door_latency_max_ms: AtomicU64::new(0),
            maintenance_ticks_total: AtomicU64::new(0),
            last_report_time: parking_lot::Mutex::new(Instant::now()),
        }
    }

    /// Record a scan was handled with given latency
    #[inline]
    pub fn record_scan_processed(&self, latency_us: u64) {
        self.scans_total.fetch_add(1, Ordering::Relaxed);
        self.scans_since_report.fetch_add(1, Ordering::Relaxed);
        self.scan_latency_sum_us.fetch_add(latency_us, Ordering::Relaxed);
        self.scan_latency_buckets[bucket_index(latency_us)].fetch_add(1, Ordering::Relaxed);
        update_atomic_max(&self.scan_latency_max_us, latency_us);
    }

    #[inline]
    pub fn record_scan_ignored(&self) {
        self.scans_ignored_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_scan_malformed(&self) {
        self.scans_malformed_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_double_tap(&self) {
        self.double_taps_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_not_permitted(&self) {
        self.not_permitted_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_no_window(&self) {
        self.no_window_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_session_opened(&self) {
        self.sessions_opened_total.fetch_add(1, Ordering::Relaxed);
        self.session_active.store(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_session_closed(&self) {
        self.sessions_closed_total.fetch_add(1, Ordering::Relaxed);
        self.session_active.store(0, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_session_expired(&self) {
        self.sessions_expired_total.fetch_add(1, Ordering::Relaxed);
        self.session_active.store(0, Ordering::Relaxed);
    }

    #[inline]
    pub fn set_scan_buffer_len(&self, len: usize) {
        self.scan_buffer_len.store(len as u64, Ordering::Relaxed);
    }

    /// Record an actuator call and how long it took
    #[inline]
    pub fn record_door_cmd(&self, latency_ms: u64, ok: bool) {
        self.door_cmds_total.fetch_add(1, Ordering::Relaxed);
        if !ok {
            self.door_cmd_failures_total.fetch_add(1, Ordering::Relaxed);
        }
        self.door_latency_buckets[door_bucket_index(latency_ms)].fetch_add(1, Ordering::Relaxed);
        update_atomic_max(&self.door_latency_max_ms, latency_ms);
    }

    #[inline]
    pub fn record_door_not_found(&self) {
        self.doors_not_found_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_door_cmd_dropped(&self) {
        self.door_cmds_dropped.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_maintenance_tick(&self) {
        self.maintenance_ticks_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn scans_total(&self) -> u64 {
        self.scans_total.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn session_active(&self) -> bool {
        self.session_active.load(Ordering::Relaxed) == 1
    }

    #[inline]
    pub fn door_cmds_total(&self) -> u64 {
        self.door_cmds_total.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn door_cmd_failures_total(&self) -> u64 {
        self.door_cmd_failures_total.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn doors_not_found_total(&self) -> u64 {
        self.doors_not_found_total.load(Ordering::Relaxed)
    }

    /// Take a snapshot for the periodic summary; periodic histograms and
    /// rates are reset
    pub fn report(&self) -> MetricsSummary {
        self.summarize(true)
    }

    /// Read every metric without resetting the periodic ones (for scrapes)
    pub fn snapshot(&self) -> MetricsSummary {
        self.summarize(false)
    }

    fn summarize(&self, reset: bool) -> MetricsSummary {
        let scans_since = take(&self.scans_since_report, reset);
        let elapsed_secs = {
            let mut last = self.last_report_time.lock();
            let elapsed = last.elapsed().as_secs_f64();
            if reset {
                *last = Instant::now();
            }
            elapsed
        };
        let scans_per_min =
            if elapsed_secs > 0.0 { scans_since as f64 * 60.0 / elapsed_secs } else { 0.0 };

        let scan_lat_buckets = take_buckets(&self.scan_latency_buckets, reset);
        let scan_lat_sum = take(&self.scan_latency_sum_us, reset);
        let scan_lat_max = take(&self.scan_latency_max_us, reset);
        let scan_lat_count: u64 = scan_lat_buckets.iter().sum();
        let scan_lat_avg_us = if scan_lat_count > 0 { scan_lat_sum / scan_lat_count } else { 0 };
        let scan_lat_p99_us = percentile_from_buckets(&scan_lat_buckets, 0.99);

        let door_lat_buckets = take_buckets(&self.door_latency_buckets, reset);
        let door_lat_max_ms = take(&self.door_latency_max_ms, reset);

        MetricsSummary {
            scans_total: self.scans_total.load(Ordering::Relaxed),
            scans_per_min,
            scan_lat_buckets,
            scan_lat_avg_us,
            scan_lat_max_us: scan_lat_max,
            scan_lat_p99_us,
            scans_ignored_total: self.scans_ignored_total.load(Ordering::Relaxed),
            scans_malformed_total: self.scans_malformed_total.load(Ordering::Relaxed),
            double_taps_total: self.double_taps_total.load(Ordering::Relaxed),
            not_permitted_total: self.not_permitted_total.load(Ordering::Relaxed),
            no_window_total: self.no_window_total.load(Ordering::Relaxed),
            sessions_opened_total: self.sessions_opened_total.load(Ordering::Relaxed),
            sessions_closed_total: self.sessions_closed_total.load(Ordering::Relaxed),
            sessions_expired_total: self.sessions_expired_total.load(Ordering::Relaxed),
            session_active: self.session_active.load(Ordering::Relaxed),
            scan_buffer_len: self.scan_buffer_len.load(Ordering::Relaxed),
            door_cmds_total: self.door_cmds_total.load(Ordering::Relaxed),
            door_cmd_failures_total: self.door_cmd_failures_total.load(Ordering::Relaxed),
            doors_not_found_total: self.doors_not_found_total.load(Ordering::Relaxed),
            door_cmds_dropped: self.door_cmds_dropped.load(Ordering::Relaxed),
            door_lat_buckets,
            door_lat_max_ms,
            maintenance_ticks_total: self.maintenance_ticks_total.load(Ordering::Relaxed),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Number of histogram buckets (exported for Prometheus formatting)
pub const METRICS_NUM_BUCKETS: usize = NUM_BUCKETS;

/// Exported bucket bounds for Prometheus formatting
pub const METRICS_BUCKET_BOUNDS: [u64; 10] = BUCKET_BOUNDS;
pub const METRICS_DOOR_LATENCY_BOUNDS_MS: [u64; 10] = DOOR_LATENCY_BOUNDS_MS;

#[derive(Debug)]
pub struct MetricsSummary {
    pub scans_total: u64,
    pub scans_per_min: f64,
    /// Scan handling latency histogram
    /// Bounds: ≤100, ≤200, ≤400, ≤800, ≤1600, ≤3200, ≤6400, ≤12800, ≤25600, ≤51200, >51200 µs
    pub scan_lat_buckets: [u64; NUM_BUCKETS],
    pub scan_lat_avg_us: u64,
    pub scan_lat_max_us: u64,
    pub scan_lat_p99_us: u64,
    pub scans_ignored_total: u64,
    pub scans_malformed_total: u64,
    pub double_taps_total: u64,
    pub not_permitted_total: u64,
    pub no_window_total: u64,
    pub sessions_opened_total: u64,
    pub sessions_closed_total: u64,
    pub sessions_expired_total: u64,
    pub session_active: u64,
    pub scan_buffer_len: u64,
    pub door_cmds_total: u64,
    pub door_cmd_failures_total: u64,
    pub doors_not_found_total: u64,
    pub door_cmds_dropped: u64,
    /// Door command latency histogram
    /// Bounds: ≤5, ≤10, ≤25, ≤50, ≤100, ≤250, ≤500, ≤1000, ≤2500, ≤5000, >5000 ms
    pub door_lat_buckets: [u64; NUM_BUCKETS],
    pub door_lat_max_ms: u64,
    pub maintenance_ticks_total: u64,
}

impl MetricsSummary {
    pub fn log(&self) {
        info!(
            scans_total = %self.scans_total,
            scans_per_min = format!("{:.1}", self.scans_per_min),
            scan_avg_us = %self.scan_lat_avg_us,
            scan_p99_us = %self.scan_lat_p99_us,
            double_taps = %self.double_taps_total,
            sessions_opened = %self.sessions_opened_total,
            sessions_closed = %self.sessions_closed_total,
            sessions_expired = %self.sessions_expired_total,
            session_active = %self.session_active,
            buffer_len = %self.scan_buffer_len,
            door_cmds = %self.door_cmds_total,
            door_failures = %self.door_cmd_failures_total,
            "metrics"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_new() {
        let metrics = Metrics::new();
        assert_eq!(metrics.scans_total(), 0);
        assert!(!metrics.session_active());
    }

    #[test]
    fn test_record_scan() {
        let metrics = Metrics::new();

        metrics.record_scan_processed(100);
        metrics.record_scan_processed(200);

        assert_eq!(metrics.scans_total(), 2);
        assert_eq!(metrics.scan_latency_sum_us.load(Ordering::Relaxed), 300);
    }

    #[test]
    fn test_session_gauge_follows_transitions() {
        let metrics = Metrics::new();

        metrics.record_session_opened();
        assert!(metrics.session_active());

        metrics.record_session_closed();
        assert!(!metrics.session_active());

        metrics.record_session_opened();
        metrics.record_session_expired();
        assert!(!metrics.session_active());

        let summary = metrics.report();
        assert_eq!(summary.sessions_opened_total, 2);
        assert_eq!(summary.sessions_closed_total, 1);
        assert_eq!(summary.sessions_expired_total, 1);
    }

    #[test]
    fn test_report_resets_periodic_counters() {
        let metrics = Metrics::new();

        metrics.record_scan_processed(100);
        metrics.record_scan_processed(200);
        metrics.record_scan_processed(300);
        metrics.record_door_cmd(12, true);
        metrics.record_door_cmd(40, false);

        let summary = metrics.report();

        assert_eq!(summary.scans_total, 3);
        assert_eq!(summary.scan_lat_avg_us, 200);
        assert_eq!(summary.scan_lat_max_us, 300);
        assert_eq!(summary.door_cmds_total, 2);
        assert_eq!(summary.door_cmd_failures_total, 1);
        assert_eq!(summary.door_lat_max_ms, 40);

        assert_eq!(metrics.scans_since_report.load(Ordering::Relaxed), 0);
        assert_eq!(metrics.scan_latency_sum_us.load(Ordering::Relaxed), 0);
        assert_eq!(metrics.door_latency_max_ms.load(Ordering::Relaxed), 0);
        // Monotonic totals survive the report
        assert_eq!(metrics.scans_total(), 3);
    }

    #[test]
    fn test_snapshot_leaves_periodic_counters() {
        let metrics = Metrics::new();
        metrics.record_scan_processed(100);
        metrics.record_scan_processed(300);

        let scraped = metrics.snapshot();
        assert_eq!(scraped.scan_lat_max_us, 300);

        // The periodic summary still sees everything the scrape saw
        let summary = metrics.report();
        assert_eq!(summary.scan_lat_avg_us, 200);
        assert_eq!(summary.scan_lat_max_us, 300);
    }

    #[test]
    fn test_concurrent_updates() {
        use std::sync::Arc;
        use std::thread;

        let metrics = Arc::new(Metrics::new());
        let mut handles = vec![];

        for _ in 0..8 {
            let m = metrics.clone();
            handles.push(thread::spawn(move || {
                for i in 0..500 {
                    m.record_scan_processed(i as u64);
                }
            }));
        }

        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(metrics.scans_total(), 4_000);
    }

    #[test]
    fn test_bucket_index() {
        assert_eq!(bucket_index(0), 0);
        assert_eq!(bucket_index(100), 0);
        assert_eq!(bucket_index(101), 1);
        assert_eq!(bucket_index(51200), 9);
        assert_eq!(bucket_index(51201), 10);
        assert_eq!(door_bucket_index(5), 0);
        assert_eq!(door_bucket_index(6), 1);
        assert_eq!(door_bucket_index(10_000), 10);
    }

    #[test]
    fn test_percentile_computation() {
        let metrics = Metrics::new();

        for _ in 0..100 {
            metrics.record_scan_processed(150);
        }

        let summary = metrics.report();
        assert_eq!(summary.scan_lat_p99_us, 200);
    }
}
