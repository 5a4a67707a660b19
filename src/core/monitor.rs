use crate::core::queue::{EnqueueOutcome, PortChannel, TaskQueue};
use crate::core::reset::DEFAULT_RESET_TIMEOUT;
use crate::core::shutdown::{ShutdownSignal, StopReason};
use crate::utils::error::Result;
use crate::utils::monitor::BridgeStats;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Producer side: polls every port and queues work for those with data,
/// or whose last reading is older than the reset timeout.
pub struct PortMonitor {
    channels: Vec<Arc<PortChannel>>,
    queue: TaskQueue,
    poll_interval: Duration,
    reset_timeout: Duration,
    stats: Arc<BridgeStats>,
}

impl PortMonitor {
    pub fn new(
        channels: Vec<Arc<PortChannel>>,
        queue: TaskQueue,
        poll_interval: Duration,
        stats: Arc<BridgeStats>,
    ) -> Self {
        Self {
            channels,
            queue,
            poll_interval,
            reset_timeout: DEFAULT_RESET_TIMEOUT,
            stats,
        }
    }

    pub fn with_reset_timeout(mut self, reset_timeout: Duration) -> Self {
        self.reset_timeout = reset_timeout;
        self
    }

    pub async fn run(self, stop: ShutdownSignal) {
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = stop.triggered() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.poll_once() {
                        tracing::error!("❌ Port monitor encountered an error: {}", e);
                        stop.trigger(StopReason::SerialFailure);
                        break;
                    }
                }
            }
        }

        tracing::debug!("port monitor stopped");
    }

    /// One poll cycle; returns how many tasks were queued.
    ///
    /// A port whose serial handle is busy is already being processed and is
    /// skipped. Closed ports are reopened; failing to reopen is an error.
    pub fn poll_once(&self) -> Result<usize> {
        let mut queued = 0;

        for channel in &self.channels {
            if channel.is_in_flight() {
                continue;
            }
            let Ok(mut serial) = channel.serial().try_lock() else {
                continue;
            };

            if !serial.is_open() {
                tracing::warn!(
                    "⚠️ Serial port {} is not open. Attempting to reconnect.",
                    channel.binding().port
                );
                serial.open()?;
                tracing::info!("🔌 Reconnected serial port {}.", channel.binding().port);
            }

            let available = serial.bytes_available()?;
            drop(serial);
            if available == 0 && !self.reset_due(channel) {
                continue;
            }

            match self.queue.try_enqueue(channel) {
                EnqueueOutcome::Enqueued => queued += 1,
                EnqueueOutcome::AlreadyInFlight => {}
                EnqueueOutcome::QueueFull => {
                    BridgeStats::incr(&self.stats.queue_drops);
                    tracing::warn!(
                        "⚠️ Task queue full ({}), skipping {} this cycle",
                        self.queue.capacity(),
                        channel.binding().port
                    );
                }
                EnqueueOutcome::Closed => {
                    tracing::warn!("⚠️ Task queue closed, dropping poll for {}", channel.binding().port);
                }
            }
        }

        Ok(queued)
    }

    /// 靜默的埠也要排入一次，讓 worker 執行逾時重置
    fn reset_due(&self, channel: &PortChannel) -> bool {
        channel
            .state()
            .try_lock()
            .is_ok_and(|state| state.is_stale(Instant::now(), self.reset_timeout))
    }
}
