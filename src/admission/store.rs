//! Windowed request counters with periodic eviction.
//!
//! Counters are fixed-window with an optional 60-second burst sub-window.
//! A window rollover resets the counter rather than sliding continuously,
//! which keeps every update O(1) in time and memory; the cost is that up to
//! twice the budget can land across a window boundary. Callers wanting a
//! strict sliding window need a different store behind the same `check`
//! contract.
//!
//! Concurrency: records live in a sharded concurrent map, and each check
//! holds the record's shard lock for its whole read-modify-write, so two
//! concurrent requests for one identifier can never both consume the last
//! slot. The eviction sweep uses the same shard locks and therefore cannot
//! remove a record out from under an in-flight check.

use crate::admission::rules::RateLimitRule;
use crate::admission::{Decision, Quota};
use crate::time::Clock;
use dashmap::DashMap;
use std::mem;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

/// Length of the burst sub-window.
const BURST_WINDOW_MS: u64 = 60_000;

/// Records whose window started longer ago than this are evicted.
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(2 * 60 * 60);

/// Interval between eviction sweeps.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Mutable counter state for one identifier. Created lazily on first
/// request, mutated only under the store's shard lock, destroyed by the
/// eviction sweep.
#[derive(Debug, Clone, Copy)]
struct RequestRecord {
    count: u32,
    window_start_ms: u64,
    burst_count: u32,
    last_request_ms: u64,
}

/// Size snapshot for the administrative surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreStats {
    pub total_keys: usize,
    pub approx_bytes: usize,
}

/// Keyed table of per-identifier window counters.
#[derive(Debug)]
pub struct WindowStore {
    records: DashMap<String, RequestRecord>,
    retention: Duration,
    sweep_interval: Duration,
}

impl WindowStore {
    pub fn new() -> Self {
        Self::with_policy(DEFAULT_RETENTION, DEFAULT_SWEEP_INTERVAL)
    }

    pub fn with_policy(retention: Duration, sweep_interval: Duration) -> Self {
        Self { records: DashMap::new(), retention, sweep_interval }
    }

    /// Run the admission check for one identifier against a rule.
    ///
    /// Synchronous and non-blocking: no I/O, only a shard-locked map update.
    /// Denial is a normal return value, never an error.
    pub fn check(&self, identifier: &str, rule: &RateLimitRule, now_ms: u64) -> Decision {
        let window_ms = millis_saturated(rule.window);
        let mut entry = self.records.entry(identifier.to_string()).or_insert_with(|| {
            trace!(identifier, "creating request record");
            RequestRecord { count: 0, window_start_ms: now_ms, burst_count: 0, last_request_ms: 0 }
        });
        let record = entry.value_mut();

        if now_ms.saturating_sub(record.window_start_ms) >= window_ms {
            record.count = 0;
            record.window_start_ms = now_ms;
        }

        let resets_at_ms = record.window_start_ms.saturating_add(window_ms);

        if let Some(burst) = rule.burst {
            let since_last = now_ms.saturating_sub(record.last_request_ms);
            if since_last < BURST_WINDOW_MS {
                if record.burst_count >= burst {
                    debug!(identifier, burst, "burst budget exhausted");
                    return Decision::Denied {
                        quota: Quota {
                            limit: rule.max,
                            remaining: rule.max.saturating_sub(record.count),
                            window: rule.window,
                            resets_at_ms,
                        },
                        retry_after: secs_ceil(BURST_WINDOW_MS - since_last),
                    };
                }
            } else {
                record.burst_count = 0;
            }
        }

        if record.count >= rule.max {
            debug!(identifier, limit = rule.max, "window budget exhausted");
            return Decision::Denied {
                quota: Quota { limit: rule.max, remaining: 0, window: rule.window, resets_at_ms },
                retry_after: secs_ceil(resets_at_ms.saturating_sub(now_ms)),
            };
        }

        record.count += 1;
        record.burst_count += 1;
        record.last_request_ms = now_ms;

        Decision::Allowed(Quota {
            limit: rule.max,
            remaining: rule.max - record.count,
            window: rule.window,
            resets_at_ms,
        })
    }

    /// Drop records whose window started beyond the retention horizon.
    /// Returns how many were removed.
    pub fn evict_stale(&self, now_ms: u64) -> usize {
        let retention_ms = millis_saturated(self.retention);
        let before = self.records.len();
        self.records
            .retain(|_, record| now_ms.saturating_sub(record.window_start_ms) <= retention_ms);
        let evicted = before.saturating_sub(self.records.len());
        if evicted > 0 {
            debug!(evicted, remaining = self.records.len(), "evicted stale request records");
        }
        evicted
    }

    /// Launch the background eviction task. The task ticks every
    /// `sweep_interval` until [`Sweeper::stop`] is awaited.
    pub fn start_sweeper(self: &Arc<Self>, clock: Arc<dyn Clock>) -> Sweeper {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let store = Arc::clone(self);
        let interval = self.sweep_interval;
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // The first tick completes immediately; skip it so the first
            // sweep happens one interval after start.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        store.evict_stale(clock.now_millis());
                    }
                    _ = shutdown_rx.changed() => break,
                }
            }
        });
        Sweeper { shutdown: shutdown_tx, handle }
    }

    pub fn stats(&self) -> StoreStats {
        let key_bytes: usize = self.records.iter().map(|entry| entry.key().len()).sum();
        let per_record = mem::size_of::<RequestRecord>() + mem::size_of::<String>();
        StoreStats {
            total_keys: self.records.len(),
            approx_bytes: key_bytes + self.records.len() * per_record,
        }
    }

    /// Drop every record. Intended for test harnesses.
    pub fn clear(&self) {
        self.records.clear();
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl Default for WindowStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle to the background eviction task.
#[derive(Debug)]
pub struct Sweeper {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl Sweeper {
    /// Signal shutdown and wait for the task to exit.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        let _ = self.handle.await;
    }
}

fn millis_saturated(duration: Duration) -> u64 {
    duration.as_millis().try_into().unwrap_or(u64::MAX)
}

/// Whole seconds, rounding up, for `Retry-After` style waits.
fn secs_ceil(millis: u64) -> Duration {
    Duration::from_secs(millis.div_ceil(1_000))
}
