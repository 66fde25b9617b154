// Pool and pipeline metrics
//
// Counters, gauges and histograms for:
// - Request outcomes by error class
// - Sandbox creation (warm start-up vs on demand) and creation latency
// - Releases, release misses, discards and evictions
// - Active requests and request duration

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::config::types::ErrorClass;

/// Counter metric (monotonically increasing)
#[derive(Debug)]
pub struct Counter {
    value: AtomicU64,
}

impl Counter {
    pub fn new() -> Self {
        Self {
            value: AtomicU64::new(0),
        }
    }

    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(&self, delta: u64) {
        self.value.fetch_add(delta, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

impl Default for Counter {
    fn default() -> Self {
        Self::new()
    }
}

/// Gauge metric (can go up or down)
#[derive(Debug)]
pub struct Gauge {
    value: AtomicU64,
}

impl Gauge {
    pub fn new() -> Self {
        Self {
            value: AtomicU64::new(0),
        }
    }

    pub fn set(&self, value: u64) {
        self.value.store(value, Ordering::Relaxed);
    }

    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    /// Saturates at zero
    pub fn dec(&self) {
        let _ = self
            .value
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| Some(v.saturating_sub(1)));
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

impl Default for Gauge {
    fn default() -> Self {
        Self::new()
    }
}

/// Histogram bucket for latency tracking
#[derive(Debug)]
pub struct HistogramBucket {
    pub le: f64, // upper bound in seconds
    pub count: AtomicU64,
}

/// Histogram metric for latency/duration tracking
#[derive(Debug)]
pub struct Histogram {
    buckets: Vec<HistogramBucket>,
    sum: AtomicU64, // sum in microseconds
    count: AtomicU64,
}

impl Histogram {
    /// Create histogram with standard latency buckets (in seconds)
    pub fn new_latency() -> Self {
        let bucket_bounds = vec![
            0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0,
        ];

        let buckets = bucket_bounds
            .into_iter()
            .map(|le| HistogramBucket {
                le,
                count: AtomicU64::new(0),
            })
            .collect();

        Self {
            buckets,
            sum: AtomicU64::new(0),
            count: AtomicU64::new(0),
        }
    }

    pub fn observe(&self, value: Duration) {
        let seconds = value.as_secs_f64();
        let micros = value.as_micros() as u64;

        self.sum.fetch_add(micros, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);

        for bucket in &self.buckets {
            if seconds <= bucket.le {
                bucket.count.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub fn get_count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    pub fn get_sum_micros(&self) -> u64 {
        self.sum.load(Ordering::Relaxed)
    }

    pub fn get_bucket_count(&self, le: f64) -> u64 {
        self.buckets
            .iter()
            .find(|b| (b.le - le).abs() < 0.0001)
            .map(|b| b.count.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    fn export(&self, name: &str, help: &str, output: &mut String) {
        output.push_str(&format!("# HELP {} {}\n", name, help));
        output.push_str(&format!("# TYPE {} histogram\n", name));
        for bucket in &self.buckets {
            output.push_str(&format!(
                "{}_bucket{{le=\"{}\"}} {}\n",
                name,
                bucket.le,
                bucket.count.load(Ordering::Relaxed)
            ));
        }
        output.push_str(&format!(
            "{}_bucket{{le=\"+Inf\"}} {}\n",
            name,
            self.get_count()
        ));
        output.push_str(&format!(
            "{}_sum {}\n",
            name,
            self.get_sum_micros() as f64 / 1_000_000.0
        ));
        output.push_str(&format!("{}_count {}\n", name, self.get_count()));
    }
}

/// Metrics shared by one pool and the pipelines running on it
#[derive(Debug)]
pub struct MetricsRegistry {
    // Request outcomes
    pub requests_total: Counter,
    pub requests_ok: Counter,
    pub requests_validation: Counter,
    pub requests_resource: Counter,
    pub requests_transfer: Counter,
    pub requests_execution: Counter,
    pub requests_timeout: Counter,
    pub requests_config: Counter,

    // Pool lifecycle
    pub sandboxes_created_warm: Counter,
    pub sandboxes_created_on_demand: Counter,
    pub sandbox_create_failures: Counter,
    pub acquisitions: Counter,
    pub releases: Counter,
    pub release_misses: Counter,
    pub discards: Counter,
    pub evictions: Counter,

    // Contention
    pub active_requests: Gauge,
    pub sandboxes_in_use: Gauge,

    // Latency histograms
    pub request_duration: Histogram,
    pub sandbox_create_duration: Histogram,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self {
            requests_total: Counter::new(),
            requests_ok: Counter::new(),
            requests_validation: Counter::new(),
            requests_resource: Counter::new(),
            requests_transfer: Counter::new(),
            requests_execution: Counter::new(),
            requests_timeout: Counter::new(),
            requests_config: Counter::new(),

            sandboxes_created_warm: Counter::new(),
            sandboxes_created_on_demand: Counter::new(),
            sandbox_create_failures: Counter::new(),
            acquisitions: Counter::new(),
            releases: Counter::new(),
            release_misses: Counter::new(),
            discards: Counter::new(),
            evictions: Counter::new(),

            active_requests: Gauge::new(),
            sandboxes_in_use: Gauge::new(),

            request_duration: Histogram::new_latency(),
            sandbox_create_duration: Histogram::new_latency(),
        }
    }

    /// Record a finished request; `None` means success
    pub fn record_request(&self, failure: Option<ErrorClass>, duration: Duration) {
        self.requests_total.inc();
        self.request_duration.observe(duration);

        match failure {
            None => self.requests_ok.inc(),
            Some(ErrorClass::Validation) => self.requests_validation.inc(),
            Some(ErrorClass::Resource) => self.requests_resource.inc(),
            Some(ErrorClass::Transfer) => self.requests_transfer.inc(),
            Some(ErrorClass::Execution) => self.requests_execution.inc(),
            Some(ErrorClass::Timeout) => self.requests_timeout.inc(),
            Some(ErrorClass::Config) => self.requests_config.inc(),
        }
    }

    /// Record a sandbox creation attempt
    pub fn record_creation(&self, on_demand: bool, succeeded: bool, duration: Duration) {
        self.sandbox_create_duration.observe(duration);

        if !succeeded {
            self.sandbox_create_failures.inc();
        } else if on_demand {
            self.sandboxes_created_on_demand.inc();
        } else {
            self.sandboxes_created_warm.inc();
        }
    }

    /// Export metrics in Prometheus text format
    pub fn export_prometheus(&self) -> String {
        let mut output = String::new();

        output.push_str("# HELP warmbox_requests_total Total number of execution requests\n");
        output.push_str("# TYPE warmbox_requests_total counter\n");
        output.push_str(&format!(
            "warmbox_requests_total {}\n",
            self.requests_total.get()
        ));

        output.push_str("# HELP warmbox_requests_by_outcome Requests by outcome\n");
        output.push_str("# TYPE warmbox_requests_by_outcome counter\n");
        for (outcome, counter) in [
            ("ok", &self.requests_ok),
            (ErrorClass::Validation.as_str(), &self.requests_validation),
            (ErrorClass::Resource.as_str(), &self.requests_resource),
            (ErrorClass::Transfer.as_str(), &self.requests_transfer),
            (ErrorClass::Execution.as_str(), &self.requests_execution),
            (ErrorClass::Timeout.as_str(), &self.requests_timeout),
            (ErrorClass::Config.as_str(), &self.requests_config),
        ] {
            output.push_str(&format!(
                "warmbox_requests_by_outcome{{outcome=\"{}\"}} {}\n",
                outcome,
                counter.get()
            ));
        }

        output.push_str("# HELP warmbox_sandboxes_created_total Sandboxes created\n");
        output.push_str("# TYPE warmbox_sandboxes_created_total counter\n");
        output.push_str(&format!(
            "warmbox_sandboxes_created_total{{trigger=\"warm\"}} {}\n",
            self.sandboxes_created_warm.get()
        ));
        output.push_str(&format!(
            "warmbox_sandboxes_created_total{{trigger=\"on_demand\"}} {}\n",
            self.sandboxes_created_on_demand.get()
        ));

        output.push_str("# HELP warmbox_sandbox_create_failures_total Failed sandbox creations\n");
        output.push_str("# TYPE warmbox_sandbox_create_failures_total counter\n");
        output.push_str(&format!(
            "warmbox_sandbox_create_failures_total {}\n",
            self.sandbox_create_failures.get()
        ));

        output.push_str("# HELP warmbox_pool_events_total Pool lease events\n");
        output.push_str("# TYPE warmbox_pool_events_total counter\n");
        for (event, counter) in [
            ("acquire", &self.acquisitions),
            ("release", &self.releases),
            ("release_miss", &self.release_misses),
            ("discard", &self.discards),
            ("evict", &self.evictions),
        ] {
            output.push_str(&format!(
                "warmbox_pool_events_total{{event=\"{}\"}} {}\n",
                event,
                counter.get()
            ));
        }

        output.push_str("# HELP warmbox_active_requests Currently running requests\n");
        output.push_str("# TYPE warmbox_active_requests gauge\n");
        output.push_str(&format!(
            "warmbox_active_requests {}\n",
            self.active_requests.get()
        ));

        output.push_str("# HELP warmbox_sandboxes_in_use Sandboxes currently leased\n");
        output.push_str("# TYPE warmbox_sandboxes_in_use gauge\n");
        output.push_str(&format!(
            "warmbox_sandboxes_in_use {}\n",
            self.sandboxes_in_use.get()
        ));

        self.request_duration.export(
            "warmbox_request_duration_seconds",
            "End-to-end request duration",
            &mut output,
        );
        self.sandbox_create_duration.export(
            "warmbox_sandbox_create_duration_seconds",
            "Sandbox create-and-start latency",
            &mut output,
        );

        output
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter() {
        let counter = Counter::new();
        assert_eq!(counter.get(), 0);

        counter.inc();
        assert_eq!(counter.get(), 1);

        counter.add(5);
        assert_eq!(counter.get(), 6);
    }

    #[test]
    fn test_gauge() {
        let gauge = Gauge::new();
        gauge.set(2);
        gauge.inc();
        assert_eq!(gauge.get(), 3);

        gauge.dec();
        gauge.dec();
        gauge.dec();
        gauge.dec();
        assert_eq!(gauge.get(), 0);
    }

    #[test]
    fn test_histogram() {
        let histogram = Histogram::new_latency();

        histogram.observe(Duration::from_millis(50));
        histogram.observe(Duration::from_millis(150));
        histogram.observe(Duration::from_millis(500));

        assert_eq!(histogram.get_count(), 3);

        // Buckets are cumulative
        assert_eq!(histogram.get_bucket_count(0.1), 1);
        assert_eq!(histogram.get_bucket_count(0.25), 2);
        assert_eq!(histogram.get_bucket_count(0.5), 3);
        assert_eq!(histogram.get_bucket_count(1.0), 3);
    }

    #[test]
    fn test_record_request() {
        let metrics = MetricsRegistry::new();

        metrics.record_request(None, Duration::from_millis(10));
        metrics.record_request(Some(ErrorClass::Validation), Duration::from_millis(1));
        metrics.record_request(Some(ErrorClass::Timeout), Duration::from_millis(900));

        assert_eq!(metrics.requests_total.get(), 3);
        assert_eq!(metrics.requests_ok.get(), 1);
        assert_eq!(metrics.requests_validation.get(), 1);
        assert_eq!(metrics.requests_timeout.get(), 1);
        assert_eq!(metrics.request_duration.get_count(), 3);
    }

    #[test]
    fn test_record_creation() {
        let metrics = MetricsRegistry::new();

        metrics.record_creation(false, true, Duration::from_millis(300));
        metrics.record_creation(true, true, Duration::from_millis(300));
        metrics.record_creation(true, false, Duration::from_millis(5));

        assert_eq!(metrics.sandboxes_created_warm.get(), 1);
        assert_eq!(metrics.sandboxes_created_on_demand.get(), 1);
        assert_eq!(metrics.sandbox_create_failures.get(), 1);
        assert_eq!(metrics.sandbox_create_duration.get_count(), 3);
    }

    #[test]
    fn test_prometheus_export() {
        let metrics = MetricsRegistry::new();

        metrics.record_request(None, Duration::from_millis(20));
        metrics.record_request(Some(ErrorClass::Transfer), Duration::from_millis(20));
        metrics.release_misses.inc();

        let output = metrics.export_prometheus();

        assert!(output.contains("warmbox_requests_total 2"));
        assert!(output.contains("warmbox_requests_by_outcome{outcome=\"ok\"} 1"));
        assert!(output.contains("warmbox_requests_by_outcome{outcome=\"transfer\"} 1"));
        assert!(output.contains("warmbox_pool_events_total{event=\"release_miss\"} 1"));
        assert!(output.contains("warmbox_request_duration_seconds_count 2"));
        assert!(output.contains("warmbox_request_duration_seconds_bucket{le=\"+Inf\"} 2"));
    }
}
