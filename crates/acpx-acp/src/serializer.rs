//! Session-update serializer and replay-drain barrier (§4.E, §9).
//!
//! `sessionUpdate` notifications are funneled through here one at a time.
//! Rather than an await-chain of promises, ordering is tracked with two
//! plain counters: `observed` bumps the instant a notification arrives,
//! `processed` bumps once the caller's callback has returned. The gap
//! between them is exactly the in-flight notification (there is at most
//! one, since dispatch is single-threaded per session).

use crate::error::{AcpError, Origin, Result};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::time::{Duration, Instant};

#[derive(Default)]
struct Counters {
    observed: AtomicU64,
    processed: AtomicU64,
    /// While true, dispatched notifications are not forwarded to the
    /// caller's callback — used during `loadSession` replay.
    suppressed: AtomicBool,
}

/// Single-threaded funnel for `sessionUpdate` notifications.
#[derive(Clone, Default)]
pub struct SessionUpdateSerializer {
    counters: Arc<Counters>,
}

impl SessionUpdateSerializer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observed(&self) -> u64 {
        self.counters.observed.load(Ordering::SeqCst)
    }

    pub fn processed(&self) -> u64 {
        self.counters.processed.load(Ordering::SeqCst)
    }

    pub fn set_suppressed(&self, suppressed: bool) {
        self.counters.suppressed.store(suppressed, Ordering::SeqCst);
    }

    pub fn is_suppressed(&self) -> bool {
        self.counters.suppressed.load(Ordering::SeqCst)
    }

    /// Record receipt of `notification`, invoke `on_update` unless
    /// suppression is active, then bump `processed`. `on_update` runs
    /// synchronously with respect to this call — there is no concurrent
    /// dispatch of a second notification while this one is in flight.
    ///
    /// Generic over the notification type so this module stays decoupled
    /// from the ACP wire schema; callers pass `&SessionNotification`.
    pub fn dispatch<T>(&self, notification: &T, on_update: impl FnOnce(&T)) {
        self.counters.observed.fetch_add(1, Ordering::SeqCst);

        if !self.is_suppressed() {
            on_update(notification);
        }

        self.counters.processed.fetch_add(1, Ordering::SeqCst);
    }

    /// Wait for the burst of historical `sessionUpdate` frames that follows
    /// `loadSession` to subside (§4.E).
    ///
    /// Polls every 20ms. Resets its idle clock whenever `observed` moves;
    /// once `processed == observed` and at least `idle_ms` has elapsed with
    /// no further movement, returns. Fails with a timeout error if
    /// `max(idle_ms, timeout_ms)` elapses first.
    pub async fn drain_replay(&self, idle_ms: u64, timeout_ms: u64) -> Result<()> {
        let deadline = Instant::now() + Duration::from_millis(idle_ms.max(timeout_ms));
        let mut last_observed = self.observed();
        let mut idle_since = Instant::now();
        let poll_interval = Duration::from_millis(20);

        loop {
            if Instant::now() >= deadline {
                return Err(AcpError::timeout(
                    Origin::Acp,
                    "replay drain did not reach quiescence before the deadline",
                ));
            }

            tokio::time::sleep(poll_interval).await;

            let observed_now = self.observed();
            if observed_now != last_observed {
                last_observed = observed_now;
                idle_since = Instant::now();
                continue;
            }

            let processed_now = self.processed();
            let idle_elapsed = Instant::now().saturating_duration_since(idle_since);
            if processed_now == observed_now && idle_elapsed >= Duration::from_millis(idle_ms) {
                // Re-check once more; a notification landing between the
                // read above and here would still show up as a counter
                // mismatch or fresh `observed` bump.
                if self.processed() == self.observed() {
                    return Ok(());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn sample_notification() -> &'static str {
        "session/update notification stand-in"
    }

    #[test]
    fn dispatch_invokes_callback_and_advances_both_counters() {
        let serializer = SessionUpdateSerializer::new();
        let calls = AtomicUsize::new(0);

        serializer.dispatch(&sample_notification(), |_| {
            calls.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(serializer.observed(), 1);
        assert_eq!(serializer.processed(), 1);
    }

    #[test]
    fn suppressed_dispatch_skips_callback_but_still_advances_counters() {
        let serializer = SessionUpdateSerializer::new();
        serializer.set_suppressed(true);
        let calls = AtomicUsize::new(0);

        serializer.dispatch(&sample_notification(), |_| {
            calls.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(serializer.observed(), 1);
        assert_eq!(serializer.processed(), 1);
    }

    #[tokio::test]
    async fn drain_replay_returns_once_quiescent() {
        let serializer = SessionUpdateSerializer::new();
        serializer.set_suppressed(true);

        let background = serializer.clone();
        tokio::spawn(async move {
            for _ in 0..50 {
                background.dispatch(&sample_notification(), |_| {});
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        });

        serializer.drain_replay(50, 2000).await.unwrap();
        assert_eq!(serializer.processed(), serializer.observed());
        assert_eq!(serializer.observed(), 50);
    }

    #[tokio::test]
    async fn drain_replay_times_out_if_never_quiescent() {
        let serializer = SessionUpdateSerializer::new();
        serializer.set_suppressed(true);

        let background = serializer.clone();
        let keep_busy = tokio::spawn(async move {
            loop {
                background.dispatch(&sample_notification(), |_| {});
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        });

        let result = serializer.drain_replay(30, 100).await;
        keep_busy.abort();
        assert!(result.is_err());
    }
}
