use crate::core::forwarder::{ForwarderSettings, WeightForwarder};
use crate::core::frame::{FrameParser, DEFAULT_NOISE_FLOOR};
use crate::core::monitor::{PortMonitor, DEFAULT_POLL_INTERVAL};
use crate::core::queue::{PortChannel, TaskQueue};
use crate::core::reset::{TimeoutResetter, DEFAULT_RESET_TIMEOUT};
use crate::core::shutdown::{ShutdownCoordinator, ShutdownSignal, StopReason};
use crate::core::watchdog::{ConnectionWatchdog, WatchdogSettings};
use crate::core::worker::{PortProcessor, WorkerPool};
use crate::domain::model::PortBinding;
use crate::domain::ports::{PlcLink, SerialPort};
use crate::utils::monitor::{BridgeStats, SystemMonitor};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;

/// Everything the running pipeline needs, already resolved from config.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeSettings {
    pub workers: usize,
    pub queue_capacity: usize,
    pub poll_interval: Duration,
    pub dequeue_timeout: Duration,
    pub reset_timeout: Duration,
    pub noise_floor: u32,
    pub forwarder: ForwarderSettings,
    pub watchdog: WatchdogSettings,
    pub monitoring: bool,
    pub stats_interval: Duration,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            workers: 10,
            queue_capacity: 64,
            poll_interval: DEFAULT_POLL_INTERVAL,
            dequeue_timeout: Duration::from_secs(1),
            reset_timeout: DEFAULT_RESET_TIMEOUT,
            noise_floor: DEFAULT_NOISE_FLOOR,
            forwarder: ForwarderSettings::default(),
            watchdog: WatchdogSettings::default(),
            monitoring: false,
            stats_interval: Duration::from_secs(60),
        }
    }
}

/// The assembled bridge: a set of bound serial ports sharing one PLC link.
pub struct ScaleBridge {
    settings: BridgeSettings,
    link: Arc<dyn PlcLink>,
    channels: Vec<Arc<PortChannel>>,
    signal: ShutdownSignal,
    stats: Arc<BridgeStats>,
}

impl ScaleBridge {
    pub fn new(
        settings: BridgeSettings,
        link: Arc<dyn PlcLink>,
        ports: Vec<(PortBinding, Box<dyn SerialPort>)>,
    ) -> Self {
        let channels = ports
            .into_iter()
            .map(|(binding, serial)| PortChannel::new(binding, serial))
            .collect();

        Self {
            settings,
            link,
            channels,
            signal: ShutdownSignal::new(),
            stats: Arc::new(BridgeStats::default()),
        }
    }

    /// Handle for stopping the bridge from outside `run_until`.
    pub fn shutdown_signal(&self) -> ShutdownSignal {
        self.signal.clone()
    }

    pub fn stats(&self) -> Arc<BridgeStats> {
        Arc::clone(&self.stats)
    }

    pub fn channels(&self) -> &[Arc<PortChannel>] {
        &self.channels
    }

    /// Runs until a component raises the stop signal or `interrupt`
    /// completes (treated as an operator stop), then tears everything down.
    pub async fn run_until<F>(self, interrupt: F) -> StopReason
    where
        F: Future,
    {
        let settings = &self.settings;
        let stop = self.signal.clone();
        let queue = TaskQueue::bounded(settings.queue_capacity);

        tracing::info!(
            "🚀 Starting scale bridge: {} port(s), {} worker(s), queue capacity {}",
            self.channels.len(),
            settings.workers,
            settings.queue_capacity
        );
        for channel in &self.channels {
            let binding = channel.binding();
            tracing::info!(
                "⚖️ {} -> {} / {}",
                binding.port,
                binding.head_device,
                binding.bit_unit
            );
        }

        let processor = Arc::new(PortProcessor::new(
            FrameParser::new(settings.noise_floor),
            WeightForwarder::new(Arc::clone(&self.link), settings.forwarder),
            TimeoutResetter::new(Arc::clone(&self.link), settings.reset_timeout),
            Arc::clone(&self.stats),
        ));
        let workers = WorkerPool::new(settings.workers, settings.dequeue_timeout).spawn(
            queue.clone(),
            processor,
            stop.clone(),
        );
        let monitor = tokio::spawn(
            PortMonitor::new(
                self.channels.clone(),
                queue,
                settings.poll_interval,
                Arc::clone(&self.stats),
            )
            .with_reset_timeout(settings.reset_timeout)
            .run(stop.clone()),
        );
        let watchdog = tokio::spawn(
            ConnectionWatchdog::new(Arc::clone(&self.link), settings.watchdog).run(stop.clone()),
        );

        let system_monitor = SystemMonitor::new(settings.monitoring);
        let mut stats_ticker = tokio::time::interval(settings.stats_interval);
        stats_ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        stats_ticker.reset();

        tokio::pin!(interrupt);
        loop {
            tokio::select! {
                _ = stop.triggered() => break,
                _ = &mut interrupt => {
                    stop.trigger(StopReason::Operator);
                    break;
                }
                _ = stats_ticker.tick(), if settings.monitoring => {
                    system_monitor.log_stats("Runtime");
                    self.stats.log_summary("Runtime");
                }
            }
        }

        tracing::info!("🧹 Shutting down scale bridge...");
        let reason = ShutdownCoordinator::new(stop)
            .with_monitor(monitor)
            .with_workers(workers)
            .with_watchdog(watchdog)
            .drain(&self.channels, self.link.as_ref())
            .await;

        self.stats.log_summary("Final");
        system_monitor.log_stats("Final");
        if reason.is_abnormal() {
            tracing::error!("❌ Scale bridge stopped abnormally: {:?}", reason);
        } else {
            tracing::info!("✅ Scale bridge stopped");
        }
        reason
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::{MemoryPlc, MemorySerial};

    fn bridge(plc: &Arc<MemoryPlc>, serial: &MemorySerial) -> ScaleBridge {
        let binding = PortBinding::new("/dev/ttyUSB0", "D6364".parse().unwrap(), "M3300".parse().unwrap());
        ScaleBridge::new(
            BridgeSettings::default(),
            plc.clone(),
            vec![(binding, Box::new(serial.clone()) as Box<dyn SerialPort>)],
        )
    }

    #[test]
    fn test_default_settings() {
        let settings = BridgeSettings::default();
        assert_eq!(settings.workers, 10);
        assert_eq!(settings.reset_timeout, Duration::from_secs(15));
        assert_eq!(settings.noise_floor, 100);
    }

    #[tokio::test(start_paused = true)]
    async fn test_external_signal_stops_bridge() {
        let plc = Arc::new(MemoryPlc::new());
        let serial = MemorySerial::new("/dev/ttyUSB0");
        let bridge = bridge(&plc, &serial);
        let signal = bridge.shutdown_signal();

        let handle = tokio::spawn(bridge.run_until(std::future::pending::<()>()));
        tokio::time::sleep(Duration::from_secs(1)).await;
        signal.trigger(StopReason::WorkerFailure);

        assert_eq!(handle.await.unwrap(), StopReason::WorkerFailure);
        assert!(plc.is_closed());
        assert!(!serial.is_open());
    }

    #[tokio::test(start_paused = true)]
    async fn test_interrupt_is_operator_stop() {
        let plc = Arc::new(MemoryPlc::new());
        let serial = MemorySerial::new("/dev/ttyUSB0");

        let reason = bridge(&plc, &serial)
            .run_until(tokio::time::sleep(Duration::from_secs(2)))
            .await;

        assert_eq!(reason, StopReason::Operator);
        assert_eq!(reason.exit_code(), 0);
        assert_eq!(serial.flush_count(), 1);
    }
}
