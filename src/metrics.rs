//! Lightweight global metrics for volumed.
//!
//! Потокобезопасные атомарные счётчики:
//! - API requests
//! - Registry commits (volumes / snapshots / backups / restores)
//! - Driver failures, timeouts, rollbacks

use std::sync::atomic::{AtomicU64, Ordering};

// ----- API -----
static REQUESTS_TOTAL: AtomicU64 = AtomicU64::new(0);
static REQUEST_ERRORS: AtomicU64 = AtomicU64::new(0);

// ----- Registry commits -----
static VOLUMES_CREATED: AtomicU64 = AtomicU64::new(0);
static VOLUMES_DELETED: AtomicU64 = AtomicU64::new(0);
static VOLUMES_MOUNTED: AtomicU64 = AtomicU64::new(0);
static SNAPSHOTS_CREATED: AtomicU64 = AtomicU64::new(0);
static SNAPSHOTS_DELETED: AtomicU64 = AtomicU64::new(0);
static BACKUPS_COMPLETED: AtomicU64 = AtomicU64::new(0);
static RESTORES_COMPLETED: AtomicU64 = AtomicU64::new(0);

// ----- Failures -----
static DRIVER_ERRORS: AtomicU64 = AtomicU64::new(0);
static DRIVER_TIMEOUTS: AtomicU64 = AtomicU64::new(0);
static ROLLBACKS: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Clone, Default)]
pub struct MetricsSnapshot {
    pub requests_total: u64,
    pub request_errors: u64,

    pub volumes_created: u64,
    pub volumes_deleted: u64,
    pub volumes_mounted: u64,
    pub snapshots_created: u64,
    pub snapshots_deleted: u64,
    pub backups_completed: u64,
    pub restores_completed: u64,

    pub driver_errors: u64,
    pub driver_timeouts: u64,
    pub rollbacks: u64,
}

impl MetricsSnapshot {
    pub fn error_ratio(&self) -> f64 {
        if self.requests_total == 0 {
            0.0
        } else {
            self.request_errors as f64 / self.requests_total as f64
        }
    }

    /// Prometheus text exposition.
    pub fn to_prometheus(&self) -> String {
        let mut out = String::new();
        let ver = env!("CARGO_PKG_VERSION");
        out.push_str("# HELP volumed_build_info Build info.\n");
        out.push_str("# TYPE volumed_build_info gauge\n");
        out.push_str(&format!("volumed_build_info{{version=\"{}\"}} 1\n", ver));

        let counters: [(&str, &str, u64); 12] = [
            ("volumed_requests_total", "API requests served.", self.requests_total),
            ("volumed_request_errors_total", "API requests answered with an error.", self.request_errors),
            ("volumed_volumes_created_total", "Volumes created (including restores).", self.volumes_created),
            ("volumed_volumes_deleted_total", "Volumes deleted.", self.volumes_deleted),
            ("volumed_volumes_mounted_total", "Successful mount operations.", self.volumes_mounted),
            ("volumed_snapshots_created_total", "Snapshots created.", self.snapshots_created),
            ("volumed_snapshots_deleted_total", "Snapshots deleted.", self.snapshots_deleted),
            ("volumed_backups_completed_total", "Backups completed.", self.backups_completed),
            ("volumed_restores_completed_total", "Restores completed.", self.restores_completed),
            ("volumed_driver_errors_total", "Driver operations that failed.", self.driver_errors),
            ("volumed_driver_timeouts_total", "Requests that gave up waiting for the driver.", self.driver_timeouts),
            ("volumed_rollbacks_total", "Driver objects removed after a failed create.", self.rollbacks),
        ];
        for (name, help, v) in counters {
            out.push_str(&format!("# HELP {} {}\n", name, help));
            out.push_str(&format!("# TYPE {} counter\n", name));
            out.push_str(&format!("{} {}\n", name, v));
        }
        out
    }
}

// ----- Recorders (API) -----
pub fn record_request(ok: bool) {
    REQUESTS_TOTAL.fetch_add(1, Ordering::Relaxed);
    if !ok {
        REQUEST_ERRORS.fetch_add(1, Ordering::Relaxed);
    }
}

// ----- Recorders (Registry) -----
pub fn record_volume_created() {
    VOLUMES_CREATED.fetch_add(1, Ordering::Relaxed);
}
pub fn record_volume_deleted() {
    VOLUMES_DELETED.fetch_add(1, Ordering::Relaxed);
}
pub fn record_volume_mounted() {
    VOLUMES_MOUNTED.fetch_add(1, Ordering::Relaxed);
}
pub fn record_snapshot_created() {
    SNAPSHOTS_CREATED.fetch_add(1, Ordering::Relaxed);
}
pub fn record_snapshot_deleted() {
    SNAPSHOTS_DELETED.fetch_add(1, Ordering::Relaxed);
}
pub fn record_backup_completed() {
    BACKUPS_COMPLETED.fetch_add(1, Ordering::Relaxed);
}
pub fn record_restore_completed() {
    RESTORES_COMPLETED.fetch_add(1, Ordering::Relaxed);
}

// ----- Recorders (Failures) -----
pub fn record_driver_error() {
    DRIVER_ERRORS.fetch_add(1, Ordering::Relaxed);
}
pub fn record_driver_timeout() {
    DRIVER_TIMEOUTS.fetch_add(1, Ordering::Relaxed);
}
pub fn record_rollback() {
    ROLLBACKS.fetch_add(1, Ordering::Relaxed);
}

pub fn snapshot() -> MetricsSnapshot {
    MetricsSnapshot {
        requests_total: REQUESTS_TOTAL.load(Ordering::Relaxed),
        request_errors: REQUEST_ERRORS.load(Ordering::Relaxed),
        volumes_created: VOLUMES_CREATED.load(Ordering::Relaxed),
        volumes_deleted: VOLUMES_DELETED.load(Ordering::Relaxed),
        volumes_mounted: VOLUMES_MOUNTED.load(Ordering::Relaxed),
        snapshots_created: SNAPSHOTS_CREATED.load(Ordering::Relaxed),
        snapshots_deleted: SNAPSHOTS_DELETED.load(Ordering::Relaxed),
        backups_completed: BACKUPS_COMPLETED.load(Ordering::Relaxed),
        restores_completed: RESTORES_COMPLETED.load(Ordering::Relaxed),
        driver_errors: DRIVER_ERRORS.load(Ordering::Relaxed),
        driver_timeouts: DRIVER_TIMEOUTS.load(Ordering::Relaxed),
        rollbacks: ROLLBACKS.load(Ordering::Relaxed),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prometheus_text_lists_every_counter() {
        let m = MetricsSnapshot {
            requests_total: 4,
            request_errors: 1,
            rollbacks: 2,
            ..Default::default()
        };
        let text = m.to_prometheus();
        assert!(text.contains("volumed_requests_total 4\n"));
        assert!(text.contains("volumed_request_errors_total 1\n"));
        assert!(text.contains("volumed_rollbacks_total 2\n"));
        assert!(text.contains("# TYPE volumed_driver_timeouts_total counter"));
        assert_eq!(text.matches("# TYPE").count(), 13);
        assert!((m.error_ratio() - 0.25).abs() < 1e-9);
        assert_eq!(MetricsSnapshot::default().error_ratio(), 0.0);
    }

    #[test]
    fn recorders_only_grow() {
        let before = snapshot();
        record_request(false);
        record_rollback();
        let after = snapshot();
        assert!(after.requests_total > before.requests_total);
        assert!(after.request_errors > before.request_errors);
        assert!(after.rollbacks > before.rollbacks);
    }
}
