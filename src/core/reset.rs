use crate::domain::model::{PortBinding, PortState};
use crate::domain::ports::PlcLink;
use crate::utils::error::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

pub const DEFAULT_RESET_TIMEOUT: Duration = Duration::from_secs(15);

/// Clears a port's PLC registers once its scale has gone quiet.
pub struct TimeoutResetter {
    link: Arc<dyn PlcLink>,
    timeout: Duration,
}

impl TimeoutResetter {
    pub fn new(link: Arc<dyn PlcLink>, timeout: Duration) -> Self {
        Self { link, timeout }
    }

    pub fn is_stale(&self, state: &PortState, now: Instant) -> bool {
        state.is_stale(now, self.timeout)
    }

    /// Returns `Ok(true)` when the registers were reset. An error means the
    /// PLC link itself is unhealthy and must stop the pipeline.
    pub async fn check(&self, binding: &PortBinding, state: &mut PortState, forwarded_this_cycle: bool) -> Result<bool> {
        if forwarded_this_cycle || !self.is_stale(state, Instant::now()) {
            return Ok(false);
        }

        // 不做讀回重試，失敗直接往上回報
        let reset = async {
            self.link.write_words(&binding.head_device, &[0, 0]).await?;
            self.link.write_bit(&binding.bit_unit, false).await
        };

        if let Err(e) = reset.await {
            tracing::error!("❌ Failed to reset PLC data for {}: {}", binding.port, e);
            return Err(e);
        }

        state.reset();
        tracing::info!(
            "♻️ Reset {} and {} for {} due to timeout",
            binding.head_device,
            binding.bit_unit,
            binding.port
        );
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::{MemoryPlc, PlcOp};

    fn binding() -> PortBinding {
        PortBinding::new("/dev/ttyUSB1", "D6464".parse().unwrap(), "M3400".parse().unwrap())
    }

    fn stale_state() -> PortState {
        PortState {
            buffer: Vec::new(),
            last_weight: 930,
            last_update: Some(Instant::now()),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_resets_after_timeout() {
        let plc = Arc::new(MemoryPlc::new());
        let resetter = TimeoutResetter::new(plc.clone(), DEFAULT_RESET_TIMEOUT);
        let binding = binding();
        let mut state = stale_state();

        tokio::time::advance(Duration::from_secs(14)).await;
        assert!(!resetter.check(&binding, &mut state, false).await.unwrap());

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(resetter.check(&binding, &mut state, false).await.unwrap());

        assert!(state.is_idle());
        assert_eq!(
            plc.writes(),
            vec![
                PlcOp::WriteWords(binding.head_device.clone(), vec![0, 0]),
                PlcOp::WriteBit(binding.bit_unit.clone(), false),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_skips_when_forwarded_or_unset() {
        let plc = Arc::new(MemoryPlc::new());
        let resetter = TimeoutResetter::new(plc.clone(), DEFAULT_RESET_TIMEOUT);
        let binding = binding();

        let mut state = stale_state();
        tokio::time::advance(Duration::from_secs(20)).await;
        assert!(!resetter.check(&binding, &mut state, true).await.unwrap());

        let mut idle = PortState::new();
        assert!(!resetter.check(&binding, &mut idle, false).await.unwrap());
        assert!(plc.writes().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_reset_is_reported_and_state_kept() {
        let plc = Arc::new(MemoryPlc::new());
        plc.set_fail_writes(true);
        let resetter = TimeoutResetter::new(plc.clone(), DEFAULT_RESET_TIMEOUT);
        let mut state = stale_state();

        tokio::time::advance(Duration::from_secs(15)).await;
        let err = resetter.check(&binding(), &mut state, false).await.unwrap_err();

        assert!(err.is_fatal());
        assert_eq!(state.last_weight, 930);
        assert!(state.last_update.is_some());
    }
}
