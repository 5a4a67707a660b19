use crate::core::forwarder::{ForwardOutcome, WeightForwarder};
use crate::core::frame::FrameParser;
use crate::core::queue::{Dequeued, PlcWriteTask, TaskQueue};
use crate::core::reset::TimeoutResetter;
use crate::core::shutdown::{ShutdownSignal, StopReason};
use crate::utils::error::{BridgeError, ErrorCategory, Result};
use crate::utils::monitor::BridgeStats;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// What happened during one processing cycle of a port.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub bytes_read: usize,
    pub readings: usize,
    pub forwarded: Vec<u32>,
    pub reset: bool,
}

/// Runs one cycle for a dequeued task: read → parse → forward → timeout check.
pub struct PortProcessor {
    parser: FrameParser,
    forwarder: WeightForwarder,
    resetter: TimeoutResetter,
    stats: Arc<BridgeStats>,
}

impl PortProcessor {
    pub fn new(
        parser: FrameParser,
        forwarder: WeightForwarder,
        resetter: TimeoutResetter,
        stats: Arc<BridgeStats>,
    ) -> Self {
        Self {
            parser,
            forwarder,
            resetter,
            stats,
        }
    }

    /// Only errors that compromise a device or the PLC link are returned;
    /// data and write-verify problems are logged and absorbed here.
    pub async fn process(&self, task: &PlcWriteTask, stop: &ShutdownSignal) -> Result<CycleReport> {
        let channel = task.channel();
        let binding = channel.binding();
        let mut state = channel.state().lock().await;
        let mut report = CycleReport::default();

        {
            let mut serial = channel.serial().lock().await;
            if serial.is_open() {
                let available = serial.bytes_available()?;
                if available > 0 {
                    let data = serial.read(available)?;
                    report.bytes_read = data.len();
                    state.buffer.extend_from_slice(&data);
                }
            }
        }

        if !state.buffer.is_empty() {
            match self.parser.drain(&binding.port, &mut state.buffer) {
                Ok(batch) => {
                    BridgeStats::add(&self.stats.frames, batch.readings.len() as u64);
                    BridgeStats::add(&self.stats.noise, batch.noise as u64);
                    BridgeStats::add(&self.stats.malformed, (batch.malformed + batch.invalid) as u64);
                    report.readings = batch.readings.len();

                    for reading in &batch.readings {
                        match self
                            .forwarder
                            .forward(binding, &mut state, reading, stop.token())
                            .await
                        {
                            Ok(ForwardOutcome::Forwarded(value)) => {
                                BridgeStats::incr(&self.stats.forwarded);
                                report.forwarded.push(value);
                            }
                            Ok(ForwardOutcome::Debounced { .. }) => {
                                BridgeStats::incr(&self.stats.debounced);
                            }
                            Err(BridgeError::Cancelled) => break,
                            Err(e) => {
                                BridgeStats::incr(&self.stats.write_failures);
                                tracing::warn!(
                                    "⚠️ Abandoned weight {} for {}: {}",
                                    reading.scaled_value,
                                    binding.port,
                                    e
                                );
                            }
                        }
                    }
                }
                Err(_) => {
                    // drain 已記錄細節並清空緩衝區
                    BridgeStats::incr(&self.stats.decode_errors);
                }
            }
        }

        report.reset = self
            .resetter
            .check(binding, &mut state, !report.forwarded.is_empty())
            .await?;
        if report.reset {
            BridgeStats::incr(&self.stats.resets);
        }

        Ok(report)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct WorkerPool {
    pub workers: usize,
    pub dequeue_timeout: Duration,
}

impl WorkerPool {
    pub fn new(workers: usize, dequeue_timeout: Duration) -> Self {
        Self {
            workers: workers.max(1),
            dequeue_timeout,
        }
    }

    pub fn spawn(
        &self,
        queue: TaskQueue,
        processor: Arc<PortProcessor>,
        stop: ShutdownSignal,
    ) -> Vec<JoinHandle<()>> {
        (0..self.workers)
            .map(|id| {
                let queue = queue.clone();
                let processor = Arc::clone(&processor);
                let stop = stop.clone();
                let timeout = self.dequeue_timeout;
                tokio::spawn(async move { run_worker(id, queue, processor, stop, timeout).await })
            })
            .collect()
    }
}

async fn run_worker(
    id: usize,
    queue: TaskQueue,
    processor: Arc<PortProcessor>,
    stop: ShutdownSignal,
    timeout: Duration,
) {
    tracing::debug!("worker-{} started", id);

    while !stop.is_triggered() {
        let task = match queue.dequeue_timeout(timeout).await {
            Dequeued::Task(task) => task,
            Dequeued::Timeout => continue,
            Dequeued::Closed => {
                tracing::error!("❌ worker-{}: task queue closed unexpectedly", id);
                stop.trigger(StopReason::WorkerFailure);
                break;
            }
        };

        tracing::trace!(
            "worker-{} processing {} (queued {:?})",
            id,
            task.binding().port,
            task.queued_for()
        );

        if let Err(e) = processor.process(&task, &stop).await {
            let reason = stop_reason_for(&e);
            tracing::error!("❌ worker-{} stopping pipeline on {}: {}", id, task.binding().port, e);
            stop.trigger(reason);
        }
    }

    tracing::debug!("worker-{} stopped", id);
}

/// 處理週期中的 PLC 錯誤只可能來自逾時重置
fn stop_reason_for(error: &BridgeError) -> StopReason {
    if !error.is_fatal() {
        return StopReason::WorkerFailure;
    }
    match error.category() {
        ErrorCategory::Serial => StopReason::SerialFailure,
        _ => StopReason::PlcResetFailed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::{MemoryPlc, MemorySerial, PlcOp};
    use crate::core::forwarder::ForwarderSettings;
    use crate::core::queue::{EnqueueOutcome, PortChannel};
    use crate::core::reset::DEFAULT_RESET_TIMEOUT;
    use crate::domain::model::PortBinding;

    struct Fixture {
        plc: Arc<MemoryPlc>,
        serial: MemorySerial,
        channel: Arc<PortChannel>,
        queue: TaskQueue,
        processor: PortProcessor,
        stats: Arc<BridgeStats>,
    }

    fn fixture() -> Fixture {
        let plc = Arc::new(MemoryPlc::new());
        let serial = MemorySerial::new("/dev/ttyUSB0");
        let binding = PortBinding::new("/dev/ttyUSB0", "D6364".parse().unwrap(), "M3300".parse().unwrap());
        let channel = PortChannel::new(binding, Box::new(serial.clone()));
        let stats = Arc::new(BridgeStats::default());
        let processor = PortProcessor::new(
            FrameParser::default(),
            WeightForwarder::new(plc.clone(), ForwarderSettings::default()),
            TimeoutResetter::new(plc.clone(), DEFAULT_RESET_TIMEOUT),
            stats.clone(),
        );
        Fixture {
            plc,
            serial,
            channel,
            queue: TaskQueue::bounded(4),
            processor,
            stats,
        }
    }

    async fn next_task(queue: &TaskQueue) -> PlcWriteTask {
        match queue.dequeue_timeout(Duration::from_millis(10)).await {
            Dequeued::Task(task) => task,
            _ => panic!("expected a task"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_cycle_forwards_first_frame() {
        let f = fixture();
        f.serial.push(b"ST,+000009.3  g\r\n");
        assert_eq!(f.queue.try_enqueue(&f.channel), EnqueueOutcome::Enqueued);

        let task = next_task(&f.queue).await;
        let report = f.processor.process(&task, &ShutdownSignal::new()).await.unwrap();

        assert_eq!(report.bytes_read, 17);
        assert_eq!(report.forwarded, vec![930]);
        assert!(!report.reset);
        assert_eq!(f.channel.state().lock().await.last_weight, 930);
        assert_eq!(f.stats.snapshot().forwarded, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cycle_with_falling_second_frame() {
        let f = fixture();
        f.serial.push(b"ST,+000009.3  g\r\nST,+000008.1  g\r\n");
        f.queue.try_enqueue(&f.channel);

        let task = next_task(&f.queue).await;
        let report = f.processor.process(&task, &ShutdownSignal::new()).await.unwrap();

        assert_eq!(report.readings, 2);
        assert_eq!(report.forwarded, vec![930]);
        assert_eq!(f.stats.snapshot().debounced, 1);
        let word_writes: Vec<_> = f
            .plc
            .writes()
            .into_iter()
            .filter(|op| matches!(op, PlcOp::WriteWords(..)))
            .collect();
        assert_eq!(word_writes.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_decode_error_is_absorbed() {
        let f = fixture();
        f.serial.push(b"\xff\xfe\r\n");
        f.queue.try_enqueue(&f.channel);

        let task = next_task(&f.queue).await;
        let report = f.processor.process(&task, &ShutdownSignal::new()).await.unwrap();

        assert_eq!(report.readings, 0);
        assert_eq!(f.stats.snapshot().decode_errors, 1);
        assert!(f.channel.state().lock().await.buffer.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_serial_read_error_is_fatal() {
        let f = fixture();
        f.serial.push(b"ST,+000009.3  g\r\n");
        f.serial.set_fail_reads(true);
        f.queue.try_enqueue(&f.channel);

        let task = next_task(&f.queue).await;
        let err = f.processor.process(&task, &ShutdownSignal::new()).await.unwrap_err();
        assert!(matches!(err, BridgeError::SerialError { .. }));
    }

    #[test]
    fn test_stop_reason_follows_fatal_classification() {
        assert_eq!(
            stop_reason_for(&BridgeError::serial("/dev/ttyUSB0", "read failed")),
            StopReason::SerialFailure
        );
        assert_eq!(
            stop_reason_for(&std::io::Error::other("unplugged").into()),
            StopReason::SerialFailure
        );
        assert_eq!(stop_reason_for(&BridgeError::plc("reset refused")), StopReason::PlcResetFailed);
        assert_eq!(
            stop_reason_for(&BridgeError::ProcessingError {
                message: "state poisoned".into()
            }),
            StopReason::WorkerFailure
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_worker_pool_stops_on_reset_failure() {
        let f = fixture();
        {
            let mut state = f.channel.state().lock().await;
            state.last_weight = 930;
            state.last_update = Some(tokio::time::Instant::now());
        }
        tokio::time::advance(Duration::from_secs(16)).await;
        f.plc.set_fail_writes(true);

        let stop = ShutdownSignal::new();
        let handles = WorkerPool::new(2, Duration::from_millis(50)).spawn(
            f.queue.clone(),
            Arc::new(f.processor),
            stop.clone(),
        );
        f.queue.try_enqueue(&f.channel);

        stop.triggered().await;
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(stop.reason(), Some(StopReason::PlcResetFailed));
    }
}
