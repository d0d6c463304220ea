//! Metrics collection for system monitoring
//!
//! Lock-free counters using atomic operations.
//! Updated by the session, gateway and cache; exported via the status endpoint.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Instant, SystemTime};

/// System metrics collector
pub struct MetricsCollector {
    /// Validated inbound FIX messages
    inbound_messages: AtomicU64,
    /// Outbound FIX messages queued to the writer
    outbound_messages: AtomicU64,
    /// Consolidated snapshots published
    snapshots_assembled: AtomicU64,
    /// Incremental events published
    incremental_events: AtomicU64,
    /// Security-definition requests sent on the wire
    secdef_requests: AtomicU64,
    /// Security-definition queries answered from cache
    cache_hits: AtomicU64,
    /// Logon acknowledged and socket up
    logged_on: AtomicBool,
    /// Last inbound message timestamp (Unix millis)
    last_inbound_time: AtomicU64,
    /// Start time for uptime calculation
    start_time: Instant,
}

/// Metrics snapshot for API export
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub inbound_messages: u64,
    pub outbound_messages: u64,
    pub snapshots_assembled: u64,
    pub incremental_events: u64,
    pub secdef_requests: u64,
    pub cache_hits: u64,
    pub logged_on: bool,
    pub message_rate: f64, // inbound messages per second
    pub uptime_seconds: u64,
}

impl MetricsCollector {
    /// Create new metrics collector
    pub fn new() -> Self {
        Self {
            inbound_messages: AtomicU64::new(0),
            outbound_messages: AtomicU64::new(0),
            snapshots_assembled: AtomicU64::new(0),
            incremental_events: AtomicU64::new(0),
            secdef_requests: AtomicU64::new(0),
            cache_hits: AtomicU64::new(0),
            logged_on: AtomicBool::new(false),
            last_inbound_time: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    #[inline]
    pub fn record_inbound(&self) {
        self.inbound_messages.fetch_add(1, Ordering::Relaxed);
        let now = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;
        self.last_inbound_time.store(now, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_outbound(&self) {
        self.outbound_messages.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_snapshot(&self) {
        self.snapshots_assembled.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_incremental(&self) {
        self.incremental_events.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_secdef_request(&self) {
        self.secdef_requests.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_logged_on(&self, logged_on: bool) {
        self.logged_on.store(logged_on, Ordering::Relaxed);
    }

    #[inline]
    pub fn is_logged_on(&self) -> bool {
        self.logged_on.load(Ordering::Relaxed)
    }

    /// Milliseconds since the last inbound message, capped at 10000
    pub fn inbound_age_ms(&self) -> u64 {
        let last = self.last_inbound_time.load(Ordering::Relaxed);
        if last == 0 {
            return 10000; // No messages yet
        }

        let now = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;

        now.saturating_sub(last).min(10000)
    }

    /// Get current snapshot of metrics
    pub fn snapshot(&self) -> MetricsSnapshot {
        let inbound = self.inbound_messages.load(Ordering::Relaxed);
        let uptime = self.start_time.elapsed().as_secs();
        let rate = if uptime > 0 {
            inbound as f64 / uptime as f64
        } else {
            0.0
        };

        MetricsSnapshot {
            inbound_messages: inbound,
            outbound_messages: self.outbound_messages.load(Ordering::Relaxed),
            snapshots_assembled: self.snapshots_assembled.load(Ordering::Relaxed),
            incremental_events: self.incremental_events.load(Ordering::Relaxed),
            secdef_requests: self.secdef_requests.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            logged_on: self.is_logged_on(),
            message_rate: rate,
            uptime_seconds: uptime,
        }
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_collector_creation() {
        let collector = MetricsCollector::new();
        let snapshot = collector.snapshot();

        assert_eq!(snapshot.inbound_messages, 0);
        assert_eq!(snapshot.outbound_messages, 0);
        assert!(!snapshot.logged_on);
        assert_eq!(collector.inbound_age_ms(), 10000);
    }

    #[test]
    fn test_record_messages() {
        let collector = MetricsCollector::new();

        collector.record_inbound();
        collector.record_inbound();
        collector.record_outbound();
        collector.record_cache_hit();
        collector.record_secdef_request();

        let snapshot = collector.snapshot();
        assert_eq!(snapshot.inbound_messages, 2);
        assert_eq!(snapshot.outbound_messages, 1);
        assert_eq!(snapshot.cache_hits, 1);
        assert_eq!(snapshot.secdef_requests, 1);
        assert!(collector.inbound_age_ms() < 10000);
    }

    #[test]
    fn test_logged_on_flag() {
        let collector = MetricsCollector::new();
        collector.set_logged_on(true);
        assert!(collector.snapshot().logged_on);
        collector.set_logged_on(false);
        assert!(!collector.is_logged_on());
    }
}
