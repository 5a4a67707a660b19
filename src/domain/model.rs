use crate::utils::error::{BridgeError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tokio::time::Instant;

/// 字組（16 bit）裝置代號
pub const WORD_DEVICES: &[&str] = &["D", "W", "R", "ZR", "SD"];
/// 位元裝置代號
pub const BIT_DEVICES: &[&str] = &["M", "X", "Y", "B", "L", "F", "SM"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RegisterKind {
    Word,
    Bit,
}

/// PLC device address such as `D6364` or `M3300`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RegisterAddress {
    pub device: String,
    pub index: u32,
}

impl RegisterAddress {
    pub fn new(device: impl Into<String>, index: u32) -> Self {
        Self {
            device: device.into().to_ascii_uppercase(),
            index,
        }
    }

    pub fn kind(&self) -> Option<RegisterKind> {
        if WORD_DEVICES.contains(&self.device.as_str()) {
            Some(RegisterKind::Word)
        } else if BIT_DEVICES.contains(&self.device.as_str()) {
            Some(RegisterKind::Bit)
        } else {
            None
        }
    }

    /// 同一裝置往後偏移 `offset` 個位址
    pub fn offset(&self, offset: u32) -> Self {
        Self {
            device: self.device.clone(),
            index: self.index.saturating_add(offset),
        }
    }
}

impl fmt::Display for RegisterAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.device, self.index)
    }
}

impl FromStr for RegisterAddress {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        let split = trimmed
            .find(|c: char| c.is_ascii_digit())
            .unwrap_or(trimmed.len());
        let (device, digits) = trimmed.split_at(split);

        let invalid = |reason: &str| BridgeError::InvalidConfigValueError {
            field: "register_address".to_string(),
            value: s.to_string(),
            reason: reason.to_string(),
        };

        if device.is_empty() || !device.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(invalid("Expected a device code such as D or M"));
        }
        if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
            return Err(invalid("Expected a decimal device number"));
        }
        let index = digits
            .parse::<u32>()
            .map_err(|_| invalid("Device number out of range"))?;

        Ok(Self::new(device, index))
    }
}

/// Static wiring of one scale to its PLC registers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortBinding {
    pub port: String,
    pub head_device: RegisterAddress,
    pub bit_unit: RegisterAddress,
}

impl PortBinding {
    pub fn new(port: impl Into<String>, head_device: RegisterAddress, bit_unit: RegisterAddress) -> Self {
        Self {
            port: port.into(),
            head_device,
            bit_unit,
        }
    }
}

/// 每個序列埠的可變狀態，同一時間只會有一個 worker 持有
#[derive(Debug, Default)]
pub struct PortState {
    pub buffer: Vec<u8>,
    pub last_weight: u32,
    pub last_update: Option<Instant>,
}

impl PortState {
    pub fn new() -> Self {
        Self::default()
    }

    /// 回到閒置基準：沒有重量、沒有更新時間
    pub fn reset(&mut self) {
        self.last_weight = 0;
        self.last_update = None;
    }

    pub fn is_idle(&self) -> bool {
        self.last_weight == 0 && self.last_update.is_none()
    }

    /// 最後一次有效讀值距今已超過 `timeout`
    pub fn is_stale(&self, now: Instant, timeout: Duration) -> bool {
        self.last_update
            .is_some_and(|last| now.saturating_duration_since(last) >= timeout)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct WeightReading {
    pub raw_grams: f64,
    pub scaled_value: u32,
}

/// Splits a 32-bit value into `[low, high]` 16-bit words.
pub fn split_words(value: u32) -> [u16; 2] {
    [(value & 0xFFFF) as u16, ((value >> 16) & 0xFFFF) as u16]
}

/// Inverse of [`split_words`]; `None` unless exactly two words are given.
pub fn combine_words(words: &[u16]) -> Option<u32> {
    match words {
        [low, high] => Some(u32::from(*low) | (u32::from(*high) << 16)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_and_combine_words() {
        for value in [0u32, 1, 930, 0xFFFF, 0x1_0000, 123_456_789, u32::MAX] {
            let words = split_words(value);
            assert_eq!(words[0], (value & 0xFFFF) as u16);
            assert_eq!(words[1], (value >> 16) as u16);
            assert_eq!(combine_words(&words), Some(value));
        }
        assert_eq!(split_words(930), [930, 0]);
        assert_eq!(combine_words(&[1]), None);
        assert_eq!(combine_words(&[1, 2, 3]), None);
    }

    #[test]
    fn test_parse_register_address() {
        let head: RegisterAddress = "D6364".parse().unwrap();
        assert_eq!(head.device, "D");
        assert_eq!(head.index, 6364);
        assert_eq!(head.kind(), Some(RegisterKind::Word));

        let bit: RegisterAddress = " m3300 ".parse().unwrap();
        assert_eq!(bit.to_string(), "M3300");
        assert_eq!(bit.kind(), Some(RegisterKind::Bit));

        let zr: RegisterAddress = "ZR100".parse().unwrap();
        assert_eq!(zr.kind(), Some(RegisterKind::Word));
        assert_eq!(zr.offset(1).to_string(), "ZR101");

        assert!("6364".parse::<RegisterAddress>().is_err());
        assert!("D".parse::<RegisterAddress>().is_err());
        assert!("D63a4".parse::<RegisterAddress>().is_err());
        assert_eq!("Q10".parse::<RegisterAddress>().unwrap().kind(), None);
    }

    #[test]
    fn test_port_state_reset() {
        let mut state = PortState::new();
        assert!(state.is_idle());
        state.last_weight = 930;
        state.last_update = Some(Instant::now());
        assert!(!state.is_idle());
        state.reset();
        assert!(state.is_idle());
    }
}
