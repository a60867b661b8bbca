// Runtime metrics module
//
// Provides lightweight counters for the download pipeline, logged on shutdown

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

/// Pipeline metrics
///
/// Uses atomic operations for thread-safe metric tracking without locks.
/// One instance is shared between the queue worker and the controller and
/// summarised when the process exits.
#[derive(Debug)]
pub struct Metrics {
    /// Download jobs that installed at least one trainer
    pub jobs_succeeded: AtomicUsize,

    /// Download jobs that failed or were cancelled
    pub jobs_failed: AtomicUsize,

    /// Total job time in milliseconds
    pub total_job_time_ms: AtomicU64,

    /// Payload bytes written to disk
    pub bytes_downloaded: AtomicU64,

    /// Catalog searches issued
    pub searches: AtomicU64,

    /// Update scans completed
    pub update_scans: AtomicU64,

    /// Update candidates enqueued across all scans
    pub updates_enqueued: AtomicU64,

    start_time: Instant,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            jobs_succeeded: AtomicUsize::new(0),
            jobs_failed: AtomicUsize::new(0),
            total_job_time_ms: AtomicU64::new(0),
            bytes_downloaded: AtomicU64::new(0),
            searches: AtomicU64::new(0),
            update_scans: AtomicU64::new(0),
            updates_enqueued: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    /// Record a finished job and how long it ran
    pub fn record_job(&self, succeeded: bool, duration: Duration) {
        if succeeded {
            self.jobs_succeeded.fetch_add(1, Ordering::Relaxed);
        } else {
            self.jobs_failed.fetch_add(1, Ordering::Relaxed);
        }
        self.total_job_time_ms
            .fetch_add(duration.as_millis() as u64, Ordering::Relaxed);
    }

    pub fn record_bytes_downloaded(&self, bytes: u64) {
        self.bytes_downloaded.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn record_search(&self) {
        self.searches.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a completed update scan and the jobs it produced
    pub fn record_update_scan(&self, enqueued: usize) {
        self.update_scans.fetch_add(1, Ordering::Relaxed);
        self.updates_enqueued
            .fetch_add(enqueued as u64, Ordering::Relaxed);
    }

    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Average job time in milliseconds over all finished jobs
    pub fn avg_job_time_ms(&self) -> f64 {
        let total = self.total_job_time_ms.load(Ordering::Relaxed);
        let count = self.jobs_succeeded.load(Ordering::Relaxed) + self.jobs_failed.load(Ordering::Relaxed);
        if count > 0 {
            total as f64 / count as f64
        } else {
            0.0
        }
    }

    /// Log metrics summary
    pub fn log_summary(&self) {
        tracing::info!("=== Metrics Summary ===");
        tracing::info!("Uptime: {:.2}s", self.uptime().as_secs_f64());
        tracing::info!(
            "Jobs: {} succeeded, {} failed (avg: {:.2}ms per job)",
            self.jobs_succeeded.load(Ordering::Relaxed),
            self.jobs_failed.load(Ordering::Relaxed),
            self.avg_job_time_ms()
        );
        tracing::info!(
            "Downloaded: {:.2} MiB",
            self.bytes_downloaded.load(Ordering::Relaxed) as f64 / (1024.0 * 1024.0)
        );
        tracing::info!(
            "Searches: {}, update scans: {}, updates enqueued: {}",
            self.searches.load(Ordering::Relaxed),
            self.update_scans.load(Ordering::Relaxed),
            self.updates_enqueued.load(Ordering::Relaxed)
        );
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
