use crate::core::queue::PortChannel;
use crate::domain::ports::PlcLink;
use std::sync::{Arc, OnceLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// 操作員中斷（Ctrl-C）
    Operator,
    SerialFailure,
    WorkerFailure,
    PlcResetFailed,
    ConnectionLost,
}

impl StopReason {
    pub fn exit_code(&self) -> i32 {
        match self {
            StopReason::Operator => 0,
            StopReason::SerialFailure | StopReason::WorkerFailure => 1,
            StopReason::PlcResetFailed | StopReason::ConnectionLost => 3,
        }
    }

    pub fn is_abnormal(&self) -> bool {
        self.exit_code() != 0
    }
}

/// Broadcast stop flag. The first trigger wins and records why.
#[derive(Debug, Clone, Default)]
pub struct ShutdownSignal {
    token: CancellationToken,
    reason: Arc<OnceLock<StopReason>>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self, reason: StopReason) {
        if self.reason.set(reason).is_ok() {
            if reason.is_abnormal() {
                tracing::error!("🛑 Stop signal raised: {:?}", reason);
            } else {
                tracing::info!("🛑 Stop requested by operator");
            }
        }
        self.token.cancel();
    }

    pub fn is_triggered(&self) -> bool {
        self.token.is_cancelled()
    }

    pub async fn triggered(&self) {
        self.token.cancelled().await
    }

    pub fn reason(&self) -> Option<StopReason> {
        self.reason.get().copied()
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

/// Joins every pipeline task in a fixed order and releases the devices.
pub struct ShutdownCoordinator {
    signal: ShutdownSignal,
    monitor: Option<JoinHandle<()>>,
    workers: Vec<JoinHandle<()>>,
    watchdog: Option<JoinHandle<()>>,
}

impl ShutdownCoordinator {
    pub fn new(signal: ShutdownSignal) -> Self {
        Self {
            signal,
            monitor: None,
            workers: Vec::new(),
            watchdog: None,
        }
    }

    pub fn with_monitor(mut self, handle: JoinHandle<()>) -> Self {
        self.monitor = Some(handle);
        self
    }

    pub fn with_workers(mut self, handles: Vec<JoinHandle<()>>) -> Self {
        self.workers = handles;
        self
    }

    pub fn with_watchdog(mut self, handle: JoinHandle<()>) -> Self {
        self.watchdog = Some(handle);
        self
    }

    /// 停止順序：monitor → workers（完成手上的任務）→ watchdog → 序列埠 → PLC
    pub async fn drain(self, channels: &[Arc<PortChannel>], link: &dyn PlcLink) -> StopReason {
        // 任何工作結束時都要確保訊號已送出
        if !self.signal.is_triggered() {
            self.signal.trigger(StopReason::WorkerFailure);
        }

        if let Some(monitor) = self.monitor {
            Self::join("port monitor", monitor).await;
        }
        for (id, worker) in self.workers.into_iter().enumerate() {
            Self::join(&format!("worker-{}", id), worker).await;
        }
        if let Some(watchdog) = self.watchdog {
            Self::join("connection watchdog", watchdog).await;
        }

        for channel in channels {
            let mut serial = channel.serial().lock().await;
            if serial.is_open() {
                if let Err(e) = serial.flush() {
                    tracing::warn!("⚠️ Failed to flush {}: {}", channel.binding().port, e);
                }
                serial.close();
            }
        }
        tracing::info!("🔌 All serial connections closed.");

        link.close().await;
        tracing::info!("🔌 PLC connection closed.");

        self.signal.reason().unwrap_or(StopReason::WorkerFailure)
    }

    async fn join(name: &str, handle: JoinHandle<()>) {
        if let Err(e) = handle.await {
            tracing::error!("❌ {} terminated abnormally: {}", name, e);
        }
    }
}
