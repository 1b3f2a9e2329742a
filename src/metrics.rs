//! Performance metrics and outcome counters for the consumer loop.

use crate::types::outcome::{Label, Verdict};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use tracing::info;

/// Metrics collector for the consumer
pub struct PipelineMetrics {
    /// Entries pulled from the stream, including redeliveries
    pub records_read: AtomicU64,
    /// Records persisted to the fraud partition
    pub fraud_persisted: AtomicU64,
    /// Records persisted to the legit partition
    pub legit_persisted: AtomicU64,
    /// Records skipped for missing or non-numeric features
    pub validation_failures: AtomicU64,
    /// Records whose scoring failed
    pub scoring_failures: AtomicU64,
    /// Failed store writes (counter or partition)
    pub store_failures: AtomicU64,
    /// Log connectivity failures
    pub log_failures: AtomicU64,
    /// Successful reconnects to the log
    pub reconnects: AtomicU64,
    /// Processing times of persisted records (in microseconds)
    processing_times: RwLock<Vec<u64>>,
    /// Fraud probability distribution buckets
    score_buckets: RwLock<[u64; 10]>,
    /// Start time for rate calculation
    start_time: Instant,
}

impl PipelineMetrics {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self {
            records_read: AtomicU64::new(0),
            fraud_persisted: AtomicU64::new(0),
            legit_persisted: AtomicU64::new(0),
            validation_failures: AtomicU64::new(0),
            scoring_failures: AtomicU64::new(0),
            store_failures: AtomicU64::new(0),
            log_failures: AtomicU64::new(0),
            reconnects: AtomicU64::new(0),
            processing_times: RwLock::new(Vec::with_capacity(1000)),
            score_buckets: RwLock::new([0; 10]),
            start_time: Instant::now(),
        }
    }

    pub fn record_read(&self) {
        self.records_read.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a persisted record
    pub fn record_persisted(&self, verdict: &Verdict, processing_time: Duration) {
        match verdict.label {
            Label::Fraud => self.fraud_persisted.fetch_add(1, Ordering::Relaxed),
            Label::Legit => self.legit_persisted.fetch_add(1, Ordering::Relaxed),
        };

        if let Ok(mut times) = self.processing_times.write() {
            times.push(processing_time.as_micros() as u64);
            // Keep only last 10000 for memory efficiency
            if times.len() > 10000 {
                times.drain(0..5000);
            }
        }

        let bucket = (verdict.confidence * 10.0).clamp(0.0, 9.0) as usize;
        if let Ok(mut buckets) = self.score_buckets.write() {
            buckets[bucket] += 1;
        }
    }

    pub fn record_validation_failure(&self) {
        self.validation_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_scoring_failure(&self) {
        self.scoring_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_store_failure(&self) {
        self.store_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_log_failure(&self) {
        self.log_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_reconnect(&self) {
        self.reconnects.fetch_add(1, Ordering::Relaxed);
    }

    /// Total records written to either partition
    pub fn persisted(&self) -> u64 {
        self.fraud_persisted.load(Ordering::Relaxed) + self.legit_persisted.load(Ordering::Relaxed)
    }

    /// Get processing time statistics
    pub fn get_processing_stats(&self) -> ProcessingStats {
        let Ok(times) = self.processing_times.read() else {
            return ProcessingStats::default();
        };
        if times.is_empty() {
            return ProcessingStats::default();
        }

        let mut sorted: Vec<u64> = times.clone();
        sorted.sort_unstable();

        let sum: u64 = sorted.iter().sum();
        let count = sorted.len();

        ProcessingStats {
            count: count as u64,
            mean_us: sum / count as u64,
            p50_us: sorted[count / 2],
            p95_us: sorted[(count as f64 * 0.95) as usize],
            p99_us: sorted[(count as f64 * 0.99) as usize],
            max_us: *sorted.last().unwrap_or(&0),
        }
    }

    /// Get current throughput (persisted records per second)
    pub fn get_throughput(&self) -> f64 {
        let elapsed = self.start_time.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            self.persisted() as f64 / elapsed
        } else {
            0.0
        }
    }

    /// Get fraud probability distribution
    pub fn get_score_distribution(&self) -> [u64; 10] {
        self.score_buckets
            .read()
            .map(|buckets| *buckets)
            .unwrap_or_default()
    }

    /// Print summary statistics
    pub fn print_summary(&self) {
        let read = self.records_read.load(Ordering::Relaxed);
        let fraud = self.fraud_persisted.load(Ordering::Relaxed);
        let legit = self.legit_persisted.load(Ordering::Relaxed);
        let fraud_rate = if fraud + legit > 0 {
            (fraud as f64 / (fraud + legit) as f64) * 100.0
        } else {
            0.0
        };

        let processing = self.get_processing_stats();
        let score_dist = self.get_score_distribution();

        info!("╔══════════════════════════════════════════════════════════════╗");
        info!("║             TRANSACTION CONSUMER - METRICS SUMMARY           ║");
        info!("╠══════════════════════════════════════════════════════════════╣");
        info!(
            "║ Records Read:           {:>8}  │  Throughput: {:>6.1} tx/s ║",
            read,
            self.get_throughput()
        );
        info!(
            "║ Fraud Persisted:        {:>8}  │  Fraud Rate: {:>6.1}%     ║",
            fraud, fraud_rate
        );
        info!("║ Legit Persisted:        {:>8}                              ║", legit);
        info!("╠══════════════════════════════════════════════════════════════╣");
        info!(
            "║ Skipped: validation={:>6} scoring={:>6}                     ║",
            self.validation_failures.load(Ordering::Relaxed),
            self.scoring_failures.load(Ordering::Relaxed)
        );
        info!(
            "║ Failures: store={:>6} log={:>6} reconnects={:>6}           ║",
            self.store_failures.load(Ordering::Relaxed),
            self.log_failures.load(Ordering::Relaxed),
            self.reconnects.load(Ordering::Relaxed)
        );
        info!(
            "║ Processing Time (μs): mean={:>5} p50={:>5} p95={:>5} p99={:>5} ║",
            processing.mean_us, processing.p50_us, processing.p95_us, processing.p99_us
        );
        info!("╠══════════════════════════════════════════════════════════════╣");
        info!("║ Fraud Probability Distribution:                              ║");
        let total: u64 = score_dist.iter().sum();
        for (i, &count) in score_dist.iter().enumerate() {
            let pct = if total > 0 { (count as f64 / total as f64) * 100.0 } else { 0.0 };
            let bar_len = (pct / 2.0) as usize;
            let bar: String = "█".repeat(bar_len.min(20));
            info!(
                "║   {:.1}-{:.1}: {:>6} ({:>5.1}%) {}",
                i as f64 / 10.0,
                (i + 1) as f64 / 10.0,
                count,
                pct,
                bar
            );
        }
        info!("╚══════════════════════════════════════════════════════════════╝");
    }
}

impl Default for PipelineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Processing time statistics
#[derive(Debug, Default)]
pub struct ProcessingStats {
    pub count: u64,
    pub mean_us: u64,
    pub p50_us: u64,
    pub p95_us: u64,
    pub p99_us: u64,
    pub max_us: u64,
}

/// Real-time metrics reporter that prints periodic summaries
pub struct MetricsReporter {
    metrics: Arc<PipelineMetrics>,
    interval_secs: u64,
}

impl MetricsReporter {
    pub fn new(metrics: Arc<PipelineMetrics>, interval_secs: u64) -> Self {
        Self {
            metrics,
            interval_secs,
        }
    }

    /// Start the periodic reporting task
    pub async fn start(self) {
        let mut interval = tokio::time::interval(Duration::from_secs(self.interval_secs));
        // The first tick completes immediately
        interval.tick().await;
        loop {
            interval.tick().await;
            self.metrics.print_summary();
        }
    }
}
