//! Per-listener request counters, flushed to the log on an interval.

use dashmap::DashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Receives one event per completed request.
pub trait MetricsSink: Send + Sync {
    fn record(&self, listener: &str, elapsed: Duration);
}

pub type SharedMetrics = Arc<dyn MetricsSink>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counter {
    pub count: u64,
    pub total_micros: u64,
}

impl Counter {
    pub fn qps(&self, interval: Duration) -> f64 {
        let secs = interval.as_secs_f64();
        if secs > 0.0 {
            self.count as f64 / secs
        } else {
            0.0
        }
    }

    pub fn avg_micros(&self) -> u64 {
        if self.count > 0 {
            self.total_micros / self.count
        } else {
            0
        }
    }
}

struct Flusher {
    interval: Duration,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Aggregates request counts and latency per listener.
#[derive(Default)]
pub struct Monitor {
    counters: DashMap<String, Counter>,
    flusher: Mutex<Option<Flusher>>,
}

impl Monitor {
    pub fn new() -> Arc<Self> {
        Arc::new(Monitor::default())
    }

    /// Spawn the flusher. It stops when `stop()` is called or `shutdown` fires.
    pub fn start(self: &Arc<Self>, interval: Duration, shutdown: &CancellationToken) {
        let cancel = shutdown.child_token();
        let monitor = Arc::clone(self);
        let token = cancel.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        monitor.flush(interval);
                    }
                    _ = token.cancelled() => break,
                }
            }
        });
        if let Ok(mut flusher) = self.flusher.lock() {
            *flusher = Some(Flusher {
                interval,
                cancel,
                handle,
            });
        }
    }

    /// Stop the flusher and log whatever was recorded since the last tick.
    pub async fn stop(&self) {
        let flusher = self.flusher.lock().ok().and_then(|mut f| f.take());
        if let Some(flusher) = flusher {
            flusher.cancel.cancel();
            let _ = flusher.handle.await;
            self.flush(flusher.interval);
        }
        info!("monitor stopped");
    }

    /// Log and reset every counter. Listeners idle for a whole interval are dropped.
    pub fn flush(&self, interval: Duration) -> Vec<(String, Counter)> {
        let mut flushed = Vec::new();
        self.counters.retain(|listener, counter| {
            if counter.count == 0 {
                return false;
            }
            info!(
                listener = %listener,
                qps = counter.qps(interval),
                count = counter.count,
                avg_rt_us = counter.avg_micros(),
                "monitor"
            );
            flushed.push((listener.clone(), *counter));
            *counter = Counter::default();
            true
        });
        flushed
    }

    pub fn snapshot(&self, listener: &str) -> Option<Counter> {
        self.counters.get(listener).map(|c| *c)
    }
}

impl MetricsSink for Monitor {
    fn record(&self, listener: &str, elapsed: Duration) {
        let micros = u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX);
        let mut counter = self.counters.entry(listener.to_string()).or_default();
        counter.count += 1;
        counter.total_micros = counter.total_micros.saturating_add(micros);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_aggregates_per_listener() {
        let monitor = Monitor::new();
        monitor.record("a", Duration::from_micros(100));
        monitor.record("a", Duration::from_micros(300));
        monitor.record("b", Duration::from_millis(2));

        let a = monitor.snapshot("a").unwrap();
        assert_eq!(a, Counter { count: 2, total_micros: 400 });
        assert_eq!(a.avg_micros(), 200);
        assert_eq!(monitor.snapshot("b").unwrap().total_micros, 2000);
        assert!(monitor.snapshot("c").is_none());
    }

    #[test]
    fn test_flush_resets_then_drops_idle() {
        let monitor = Monitor::new();
        monitor.record("a", Duration::from_micros(10));
        monitor.record("a", Duration::from_micros(10));

        let flushed = monitor.flush(Duration::from_secs(1));
        assert_eq!(flushed.len(), 1);
        assert_eq!(flushed[0].1.qps(Duration::from_secs(1)), 2.0);
        assert_eq!(monitor.snapshot("a"), Some(Counter::default()));

        assert!(monitor.flush(Duration::from_secs(1)).is_empty());
        assert!(monitor.snapshot("a").is_none());
    }

    #[test]
    fn test_qps_uses_interval() {
        let counter = Counter { count: 50, total_micros: 0 };
        assert_eq!(counter.qps(Duration::from_secs(10)), 5.0);
        assert_eq!(Counter::default().avg_micros(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_flusher_ticks_and_stops() {
        let shutdown = CancellationToken::new();
        let monitor = Monitor::new();
        monitor.start(Duration::from_secs(10), &shutdown);
        monitor.record("a", Duration::from_micros(5));

        tokio::time::sleep(Duration::from_secs(11)).await;
        assert_eq!(monitor.snapshot("a"), Some(Counter::default()));

        monitor.record("a", Duration::from_micros(5));
        monitor.record("a", Duration::from_micros(5));
        monitor.stop().await;
        assert!(monitor.flusher.lock().unwrap().is_none());
        assert_eq!(monitor.snapshot("a"), Some(Counter::default()));
    }
}
