use crate::domain::model::{PortBinding, PortState};
use crate::domain::ports::SerialPort;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::time::Instant;

/// Everything a worker needs for one scale: binding, device handle and state.
///
/// `in_flight` is claimed by the producer before a task is queued and released
/// when that task is dropped, so at most one task per port exists at a time.
pub struct PortChannel {
    binding: PortBinding,
    serial: Mutex<Box<dyn SerialPort>>,
    state: Mutex<PortState>,
    in_flight: AtomicBool,
}

impl PortChannel {
    pub fn new(binding: PortBinding, serial: Box<dyn SerialPort>) -> Arc<Self> {
        Arc::new(Self {
            binding,
            serial: Mutex::new(serial),
            state: Mutex::new(PortState::new()),
            in_flight: AtomicBool::new(false),
        })
    }

    pub fn binding(&self) -> &PortBinding {
        &self.binding
    }

    pub fn serial(&self) -> &Mutex<Box<dyn SerialPort>> {
        &self.serial
    }

    pub fn state(&self) -> &Mutex<PortState> {
        &self.state
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    fn try_claim(&self) -> bool {
        self.in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn release(&self) {
        self.in_flight.store(false, Ordering::Release);
    }
}

/// Queue entry referencing one port. Dropping it releases the port's claim.
pub struct PlcWriteTask {
    channel: Arc<PortChannel>,
    enqueued_at: Instant,
}

impl PlcWriteTask {
    pub fn channel(&self) -> &Arc<PortChannel> {
        &self.channel
    }

    pub fn binding(&self) -> &PortBinding {
        self.channel.binding()
    }

    pub fn queued_for(&self) -> Duration {
        self.enqueued_at.elapsed()
    }
}

impl Drop for PlcWriteTask {
    fn drop(&mut self) {
        self.channel.release();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Enqueued,
    /// 該埠已有任務在處理或排隊中
    AlreadyInFlight,
    QueueFull,
    Closed,
}

pub enum Dequeued {
    Task(PlcWriteTask),
    Timeout,
    Closed,
}

/// Bounded FIFO between the port monitor and the worker pool.
#[derive(Clone)]
pub struct TaskQueue {
    tx: mpsc::Sender<PlcWriteTask>,
    rx: Arc<Mutex<mpsc::Receiver<PlcWriteTask>>>,
}

impl TaskQueue {
    pub fn bounded(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        Self {
            tx,
            rx: Arc::new(Mutex::new(rx)),
        }
    }

    /// Never blocks; a full queue drops the task for this cycle.
    pub fn try_enqueue(&self, channel: &Arc<PortChannel>) -> EnqueueOutcome {
        if !channel.try_claim() {
            return EnqueueOutcome::AlreadyInFlight;
        }

        let task = PlcWriteTask {
            channel: Arc::clone(channel),
            enqueued_at: Instant::now(),
        };

        // 被拒絕的任務在這裡 drop，佔用旗標隨之釋放
        match self.tx.try_send(task) {
            Ok(()) => EnqueueOutcome::Enqueued,
            Err(mpsc::error::TrySendError::Full(_)) => EnqueueOutcome::QueueFull,
            Err(mpsc::error::TrySendError::Closed(_)) => EnqueueOutcome::Closed,
        }
    }

    /// Waits at most `timeout` for a task so callers can poll the stop signal.
    pub async fn dequeue_timeout(&self, timeout: Duration) -> Dequeued {
        let received = tokio::time::timeout(timeout, async {
            let mut rx = self.rx.lock().await;
            rx.recv().await
        })
        .await;

        match received {
            Ok(Some(task)) => Dequeued::Task(task),
            Ok(None) => Dequeued::Closed,
            Err(_elapsed) => Dequeued::Timeout,
        }
    }

    pub fn len(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.tx.max_capacity()
    }
}
