use crate::core::shutdown::{ShutdownSignal, StopReason};
use crate::domain::ports::PlcLink;
use crate::utils::error::{BridgeError, Result};
use crate::utils::retry::{retry_with_backoff, RetryPolicy};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchdogSettings {
    pub interval: Duration,
    pub probe_attempts: u32,
    pub probe_timeout: Duration,
    pub probe_retry_delay: Duration,
    pub reconnect: RetryPolicy,
}

impl Default for WatchdogSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            probe_attempts: 3,
            probe_timeout: Duration::from_secs(2),
            probe_retry_delay: Duration::from_secs(1),
            reconnect: RetryPolicy::fixed(8, Duration::from_secs(5)),
        }
    }
}

/// Watches the PLC link and drives reconnection; gives up by raising
/// [`StopReason::ConnectionLost`].
pub struct ConnectionWatchdog {
    link: Arc<dyn PlcLink>,
    settings: WatchdogSettings,
}

impl ConnectionWatchdog {
    pub fn new(link: Arc<dyn PlcLink>, settings: WatchdogSettings) -> Self {
        Self { link, settings }
    }

    /// Liveness probe with a per-attempt timeout. A hung probe counts as a
    /// failed attempt.
    pub async fn probe(&self) -> bool {
        let attempts = self.settings.probe_attempts.max(1);
        for attempt in 1..=attempts {
            match tokio::time::timeout(self.settings.probe_timeout, self.link.is_reachable()).await {
                Ok(true) => return true,
                Ok(false) => tracing::debug!("PLC probe {}/{} unreachable", attempt, attempts),
                Err(_) => tracing::debug!("PLC probe {}/{} timed out", attempt, attempts),
            }
            if attempt < attempts {
                tokio::time::sleep(self.settings.probe_retry_delay).await;
            }
        }
        false
    }

    pub async fn check_once(&self, stop: &ShutdownSignal) -> Result<()> {
        if self.probe().await {
            return Ok(());
        }

        tracing::warn!("⚠️ PLC connection lost. Attempting to reconnect...");
        let reconnect = retry_with_backoff(&self.settings.reconnect, "PLC reconnect", stop.token(), |_| {
            self.link.reconnect()
        })
        .await;

        match reconnect {
            Ok(()) => {
                tracing::info!("🔌 PLC connection re-established.");
                Ok(())
            }
            Err(BridgeError::Cancelled) => Err(BridgeError::Cancelled),
            Err(e) => {
                tracing::error!("❌ Failed to reconnect to PLC: {}", e);
                Err(BridgeError::ConnectionLost {
                    attempts: self.settings.reconnect.max_attempts,
                })
            }
        }
    }

    pub async fn run(self, stop: ShutdownSignal) {
        let mut ticker = tokio::time::interval(self.settings.interval.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = stop.triggered() => break,
                _ = ticker.tick() => {
                    match self.check_once(&stop).await {
                        Ok(()) => {}
                        Err(BridgeError::Cancelled) => break,
                        Err(e) => {
                            tracing::error!("❌ {}", e);
                            stop.trigger(StopReason::ConnectionLost);
                            break;
                        }
                    }
                }
            }
        }

        tracing::debug!("connection watchdog stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::MemoryPlc;
    use tokio_test::assert_ok;

    fn watchdog(plc: &Arc<MemoryPlc>) -> ConnectionWatchdog {
        ConnectionWatchdog::new(plc.clone(), WatchdogSettings::default())
    }

    #[tokio::test(start_paused = true)]
    async fn test_reachable_link_needs_no_reconnect() {
        let plc = Arc::new(MemoryPlc::new());
        watchdog(&plc).check_once(&ShutdownSignal::new()).await.unwrap();
        assert_eq!(plc.reconnect_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unreachable_link_is_reconnected() {
        let plc = Arc::new(MemoryPlc::new());
        plc.set_reachable(false);

        watchdog(&plc).check_once(&ShutdownSignal::new()).await.unwrap();

        assert_eq!(plc.reconnect_count(), 1);
        assert!(plc.is_reachable().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_reachability_check_counts_as_failed_attempt() {
        let plc = Arc::new(MemoryPlc::new());
        plc.set_reachability_hangs(true);
        let settings = WatchdogSettings::default();

        let started = tokio::time::Instant::now();
        watchdog(&plc).check_once(&ShutdownSignal::new()).await.unwrap();

        // 三次探測各逾時 2 秒，中間間隔 1 秒，之後才重新連線
        let expected = settings.probe_timeout * settings.probe_attempts + settings.probe_retry_delay * 2;
        assert!(started.elapsed() >= expected);
        assert_eq!(plc.reconnect_count(), 1);
        assert!(watchdog(&plc).probe().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_interval_is_clamped() {
        let plc = Arc::new(MemoryPlc::new());
        let settings = WatchdogSettings {
            interval: Duration::ZERO,
            ..WatchdogSettings::default()
        };
        let stop = ShutdownSignal::new();
        let handle = tokio::spawn(ConnectionWatchdog::new(plc.clone(), settings).run(stop.clone()));

        tokio::time::sleep(Duration::from_millis(50)).await;
        stop.trigger(StopReason::Operator);

        assert_ok!(handle.await);
        assert_eq!(plc.reconnect_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_reconnect_is_connection_lost() {
        let plc = Arc::new(MemoryPlc::new());
        plc.set_reachable(false);
        plc.set_reconnect_succeeds(false);

        let err = watchdog(&plc).check_once(&ShutdownSignal::new()).await.unwrap_err();

        assert!(matches!(err, BridgeError::ConnectionLost { attempts: 8 }));
        assert_eq!(plc.reconnect_count(), 8);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_raises_connection_lost() {
        let plc = Arc::new(MemoryPlc::new());
        plc.set_reachable(false);
        plc.set_reconnect_succeeds(false);

        let stop = ShutdownSignal::new();
        watchdog(&plc).run(stop.clone()).await;

        assert_eq!(stop.reason(), Some(StopReason::ConnectionLost));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_exits_on_operator_stop() {
        let plc = Arc::new(MemoryPlc::new());
        let stop = ShutdownSignal::new();
        let handle = tokio::spawn(watchdog(&plc).run(stop.clone()));

        tokio::time::sleep(Duration::from_secs(3)).await;
        stop.trigger(StopReason::Operator);
        handle.await.unwrap();

        assert_eq!(stop.reason(), Some(StopReason::Operator));
        assert_eq!(plc.reconnect_count(), 0);
    }
}
