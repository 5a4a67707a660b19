use crate::domain::model::WeightReading;
use crate::utils::error::{BridgeError, Result};
use regex::Regex;
use std::sync::LazyLock;

pub const FRAME_DELIMITER: &str = "\r\n";
pub const DEFAULT_NOISE_FLOOR: u32 = 100;

// 例：`ST,+000009.3  g`
static WEIGHT_FRAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^ST,\+([0-9]+\.[0-9]+) +g$").expect("weight frame pattern is valid")
});

/// Result of draining one port buffer.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct FrameBatch {
    pub readings: Vec<WeightReading>,
    pub malformed: usize,
    pub noise: usize,
    pub invalid: usize,
}

#[derive(Debug, Clone, PartialEq)]
enum LineOutcome {
    Empty,
    Malformed,
    Noise(u32),
    Invalid,
    Weight(WeightReading),
}

#[derive(Debug, Clone)]
pub struct FrameParser {
    noise_floor: u32,
}

impl Default for FrameParser {
    fn default() -> Self {
        Self::new(DEFAULT_NOISE_FLOOR)
    }
}

impl FrameParser {
    pub fn new(noise_floor: u32) -> Self {
        Self { noise_floor }
    }

    /// 將緩衝區切成 CRLF 分隔的 frame 並取出重量。
    ///
    /// The buffer is always emptied, even when a trailing partial frame is
    /// present. A non-ASCII buffer yields [`BridgeError::FrameDecodeError`].
    pub fn drain(&self, port: &str, buffer: &mut Vec<u8>) -> Result<FrameBatch> {
        let bytes = std::mem::take(buffer);

        if !bytes.is_ascii() {
            let hex = to_hex(&bytes);
            tracing::error!("❌ Could not decode data from {}: {}", port, hex);
            return Err(BridgeError::FrameDecodeError { hex });
        }
        let text = String::from_utf8_lossy(&bytes);

        let mut batch = FrameBatch::default();
        for line in text.split(FRAME_DELIMITER) {
            match self.parse_line(line) {
                LineOutcome::Empty => {}
                LineOutcome::Malformed => {
                    tracing::warn!("⚠️ Ignoring malformed frame from {}: {:?}", port, line.trim());
                    batch.malformed += 1;
                }
                LineOutcome::Noise(value) => {
                    tracing::debug!("Filtered out weight data from {}: {} (below floor)", port, value);
                    batch.noise += 1;
                }
                LineOutcome::Invalid => {
                    tracing::error!("❌ Failed to convert weight data from {}: {:?}", port, line.trim());
                    batch.invalid += 1;
                }
                LineOutcome::Weight(reading) => {
                    tracing::info!("⚖️ Received weight data from {}: {}", port, line.trim());
                    batch.readings.push(reading);
                }
            }
        }

        Ok(batch)
    }

    fn parse_line(&self, line: &str) -> LineOutcome {
        let cleaned = line.trim();
        if cleaned.is_empty() {
            return LineOutcome::Empty;
        }

        let Some(caps) = WEIGHT_FRAME.captures(cleaned) else {
            return LineOutcome::Malformed;
        };

        let weight = &caps[1];
        let (scaled_value, raw_grams) = match (parse_scaled(weight), weight.parse::<f64>()) {
            (Ok(scaled), Ok(grams)) => (scaled, grams),
            _ => return LineOutcome::Invalid,
        };

        if scaled_value < self.noise_floor {
            return LineOutcome::Noise(scaled_value);
        }

        LineOutcome::Weight(WeightReading {
            raw_grams,
            scaled_value,
        })
    }
}

/// Converts a `<digits>.<digits>` gram string to hundredths of a gram,
/// truncating beyond two decimals.
pub fn parse_scaled(weight: &str) -> Result<u32> {
    let invalid = || BridgeError::WeightParseError {
        raw: weight.to_string(),
    };

    let (whole, fraction) = weight.split_once('.').ok_or_else(invalid)?;
    if whole.is_empty()
        || fraction.is_empty()
        || !whole.bytes().all(|b| b.is_ascii_digit())
        || !fraction.bytes().all(|b| b.is_ascii_digit())
    {
        return Err(invalid());
    }

    let significant = whole.trim_start_matches('0');
    let whole: u64 = if significant.is_empty() {
        0
    } else {
        significant.parse().map_err(|_| invalid())?
    };

    // 只取小數點後兩位，其餘截斷
    let mut digits = fraction.bytes().map(|b| u64::from(b - b'0'));
    let tenths = digits.next().unwrap_or(0);
    let hundredths = digits.next().unwrap_or(0);

    whole
        .checked_mul(100)
        .and_then(|v| v.checked_add(tenths * 10 + hundredths))
        .and_then(|v| u32::try_from(v).ok())
        .ok_or_else(invalid)
}

fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(input: &[u8]) -> Result<FrameBatch> {
        let mut buffer = input.to_vec();
        let result = FrameParser::default().drain("/dev/ttyTEST", &mut buffer);
        assert!(buffer.is_empty());
        result
    }

    #[test]
    fn test_parse_scaled_fixed_point() {
        assert_eq!(parse_scaled("000009.3").unwrap(), 930);
        assert_eq!(parse_scaled("8.1").unwrap(), 810);
        assert_eq!(parse_scaled("1.13").unwrap(), 113);
        assert_eq!(parse_scaled("0.29").unwrap(), 29);
        assert_eq!(parse_scaled("12.345").unwrap(), 1234);
        assert_eq!(parse_scaled("0000.00").unwrap(), 0);
        assert_eq!(parse_scaled("42949672.95").unwrap(), u32::MAX);
        assert!(parse_scaled("42949672.96").is_err());
        assert!(parse_scaled("99999999999999999999999.0").is_err());
        assert!(parse_scaled("12").is_err());
        assert!(parse_scaled(".5").is_err());
    }

    #[test]
    fn test_two_decimal_frames_round_trip() {
        for hundredths in [100u32, 101, 113, 999, 1_005, 65_535, 65_536, 1_234_567] {
            let frame = format!("ST,+{}.{:02}  g\r\n", hundredths / 100, hundredths % 100);
            let batch = drain(frame.as_bytes()).unwrap();
            assert_eq!(batch.readings.len(), 1, "frame {:?}", frame);
            assert_eq!(batch.readings[0].scaled_value, hundredths);
        }
    }

    #[test]
    fn test_single_frame() {
        let batch = drain(b"ST,+000009.3  g\r\n").unwrap();
        assert_eq!(batch.readings.len(), 1);
        assert_eq!(batch.readings[0].scaled_value, 930);
        assert!((batch.readings[0].raw_grams - 9.3).abs() < f64::EPSILON);
        assert_eq!(batch.malformed, 0);
    }

    #[test]
    fn test_malformed_line_does_not_abort_batch() {
        let batch = drain(b"US,+000001.0  g\r\nST,+000009.3  g\r\ngarbage\r\nST,+000010.0 g\r\n").unwrap();
        let values: Vec<u32> = batch.readings.iter().map(|r| r.scaled_value).collect();
        assert_eq!(values, vec![930, 1000]);
        assert_eq!(batch.malformed, 2);
    }

    #[test]
    fn test_noise_floor_drops_small_weights() {
        let batch = drain(b"ST,+000000.5  g\r\nST,+000001.0  g\r\n").unwrap();
        assert_eq!(batch.noise, 1);
        assert_eq!(batch.readings.len(), 1);
        assert_eq!(batch.readings[0].scaled_value, 100);
    }

    #[test]
    fn test_grammar_requires_space_before_unit() {
        let batch = drain(b"ST,+000009.3g\r\nST,+9g\r\nST,-000009.3  g\r\n").unwrap();
        assert!(batch.readings.is_empty());
        assert_eq!(batch.malformed, 3);
    }

    #[test]
    fn test_surrounding_whitespace_is_trimmed() {
        let batch = drain(b"  ST,+000012.5   g  \r\n").unwrap();
        assert_eq!(batch.readings[0].scaled_value, 1250);
    }

    #[test]
    fn test_decode_failure_discards_buffer() {
        let result = drain(b"ST,+0\xff09.3  g\r\n");
        match result {
            Err(BridgeError::FrameDecodeError { hex }) => assert!(hex.contains("ff")),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_trailing_partial_frame_is_dropped() {
        let mut buffer = b"ST,+000009.3  g\r\nST,+0000".to_vec();
        let batch = FrameParser::default().drain("p", &mut buffer).unwrap();
        assert_eq!(batch.readings.len(), 1);
        assert_eq!(batch.malformed, 1);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_overflowing_weight_is_invalid() {
        let batch = drain(b"ST,+99999999999.0  g\r\nST,+000009.3  g\r\n").unwrap();
        assert_eq!(batch.invalid, 1);
        assert_eq!(batch.readings.len(), 1);
    }
}
