use crate::api::ExchangeGateway;
use crate::{BotError, Result};
use chrono::Utc;
use std::sync::atomic::{AtomicI64, Ordering};
use tokio::sync::Mutex;
use tokio::time::{Duration, Instant};

/// Minimum time between two server-time fetches
pub const CLOCK_SYNC_INTERVAL: Duration = Duration::from_secs(300);

/// Offset between local and exchange server time
///
/// Shared (behind an `Arc`) by the gateway, which stamps signed requests
/// with [`ClockSync::adjusted_now_millis`], and by the control loop, which
/// refreshes it. Refreshes are serialized through `last_synced_at`.
#[derive(Debug)]
pub struct ClockSync {
    offset_millis: AtomicI64,
    last_synced_at: Mutex<Option<Instant>>,
    interval: Duration,
}

impl ClockSync {
    pub fn new() -> Self {
        Self::with_interval(CLOCK_SYNC_INTERVAL)
    }

    pub fn with_interval(interval: Duration) -> Self {
        Self {
            offset_millis: AtomicI64::new(0),
            last_synced_at: Mutex::new(None),
            interval,
        }
    }

    /// Refresh the offset unless the last successful sync is recent
    ///
    /// On failure the previous offset (zero if never synced) stays in use.
    pub async fn sync<G>(&self, gateway: &G) -> Result<()>
    where
        G: ExchangeGateway + ?Sized,
    {
        let mut last_synced = self.last_synced_at.lock().await;

        if let Some(at) = *last_synced {
            if at.elapsed() < self.interval {
                return Ok(());
            }
        }

        let local_before = Utc::now().timestamp_millis();
        let server_time = gateway
            .get_server_time()
            .await
            .map_err(|e| BotError::ClockSyncFailed(e.to_string()))?;
        let local_after = Utc::now().timestamp_millis();

        // Midpoint of the round trip approximates when the server stamped it
        let local_time = local_before + (local_after - local_before) / 2;
        let offset = server_time - local_time;

        self.offset_millis.store(offset, Ordering::Relaxed);
        *last_synced = Some(Instant::now());

        tracing::debug!(offset_ms = offset, "Clock synchronized with exchange");
        Ok(())
    }

    pub fn offset_millis(&self) -> i64 {
        self.offset_millis.load(Ordering::Relaxed)
    }

    /// Local epoch milliseconds corrected by the last known offset
    pub fn adjusted_now_millis(&self) -> i64 {
        Utc::now().timestamp_millis() + self.offset_millis()
    }
}

impl Default for ClockSync {
    fn default() -> Self {
        Self::new()
    }
}
