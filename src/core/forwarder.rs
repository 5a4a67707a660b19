use crate::domain::model::{combine_words, split_words, PortBinding, PortState, RegisterAddress, WeightReading};
use crate::domain::ports::PlcLink;
use crate::utils::error::{BridgeError, Result};
use crate::utils::retry::{retry_with_backoff, RetryPolicy};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForwarderSettings {
    pub retry: RetryPolicy,
    /// 寫入後等待 PLC 反映再讀回
    pub readback_delay: Duration,
}

impl Default for ForwarderSettings {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            readback_delay: Duration::from_millis(350),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwardOutcome {
    Forwarded(u32),
    /// Not above the last accepted weight.
    Debounced { value: u32, last: u32 },
}

/// Debounce policy: the first reading after a reset always passes, later
/// readings must strictly increase.
pub fn should_forward(last_weight: u32, value: u32) -> bool {
    last_weight == 0 || value > last_weight
}

pub struct WeightForwarder {
    link: Arc<dyn PlcLink>,
    settings: ForwarderSettings,
}

impl WeightForwarder {
    pub fn new(link: Arc<dyn PlcLink>, settings: ForwarderSettings) -> Self {
        Self { link, settings }
    }

    /// Applies the debounce policy and pushes an accepted reading to the PLC.
    ///
    /// `last_update` is refreshed for every reading handed in (they are all
    /// valid by construction). `last_weight` only moves once both the word
    /// write and the completion bit are confirmed by read-back.
    pub async fn forward(
        &self,
        binding: &PortBinding,
        state: &mut PortState,
        reading: &WeightReading,
        stop: &CancellationToken,
    ) -> Result<ForwardOutcome> {
        let value = reading.scaled_value;
        state.last_update = Some(Instant::now());

        if !should_forward(state.last_weight, value) {
            tracing::debug!(
                "Skipping weight {} from {} (last accepted {})",
                value,
                binding.port,
                state.last_weight
            );
            return Ok(ForwardOutcome::Debounced {
                value,
                last: state.last_weight,
            });
        }

        self.write_weight(&binding.head_device, value, stop).await?;
        self.activate_bit(&binding.bit_unit, stop).await?;

        state.last_weight = value;
        tracing::info!(
            "✅ PLC updated with weight {} at {} and bit unit {} activated",
            value,
            binding.head_device,
            binding.bit_unit
        );
        Ok(ForwardOutcome::Forwarded(value))
    }

    async fn write_weight(&self, address: &RegisterAddress, value: u32, stop: &CancellationToken) -> Result<()> {
        let words = split_words(value);
        let operation = format!("word write {} <- {}", address, value);

        retry_with_backoff(&self.settings.retry, &operation, stop, |_| async move {
            self.link.write_words(address, &words).await?;
            tokio::time::sleep(self.settings.readback_delay).await;

            let read_back = self.link.read_words(address, 2).await?;
            match combine_words(&read_back) {
                Some(actual) if actual == value => Ok(()),
                _ => Err(BridgeError::VerifyMismatch {
                    address: address.to_string(),
                    expected: value,
                    actual: format!("{:?}", read_back),
                }),
            }
        })
        .await
    }

    async fn activate_bit(&self, address: &RegisterAddress, stop: &CancellationToken) -> Result<()> {
        let operation = format!("bit activation {}", address);

        retry_with_backoff(&self.settings.retry, &operation, stop, |_| async move {
            self.link.write_bit(address, true).await?;
            tokio::time::sleep(self.settings.readback_delay).await;

            if self.link.read_bit(address).await? {
                Ok(())
            } else {
                Err(BridgeError::VerifyMismatch {
                    address: address.to_string(),
                    expected: 1,
                    actual: "0".to_string(),
                })
            }
        })
        .await
    }
}
