use crate::utils::error::{BridgeError, Result};

pub trait Validate {
    fn validate(&self) -> Result<()>;
}

pub fn validate_positive_number(field_name: &str, value: usize, min_value: usize) -> Result<()> {
    if value < min_value {
        return Err(BridgeError::InvalidConfigValueError {
            field: field_name.to_string(),
            value: value.to_string(),
            reason: format!("Value must be at least {}", min_value),
        });
    }
    Ok(())
}

pub fn validate_non_empty_string(field_name: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(BridgeError::InvalidConfigValueError {
            field: field_name.to_string(),
            value: value.to_string(),
            reason: "Value cannot be empty or whitespace-only".to_string(),
        });
    }
    Ok(())
}

pub fn validate_range<T: PartialOrd + std::fmt::Display + Copy>(
    field_name: &str,
    value: T,
    min: T,
    max: T,
) -> Result<()> {
    if value < min || value > max {
        return Err(BridgeError::InvalidConfigValueError {
            field: field_name.to_string(),
            value: value.to_string(),
            reason: format!("Value must be between {} and {}", min, max),
        });
    }
    Ok(())
}

/// 一組綁定在同一暫存器空間內佔用的位址區間
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressSpan {
    pub label: String,
    pub start: u32,
    pub end: u32,
}

impl AddressSpan {
    pub fn new(label: impl Into<String>, start: u32, len: u32) -> Self {
        Self {
            label: label.into(),
            start,
            end: start.saturating_add(len.saturating_sub(1)),
        }
    }
}

/// 檢查同一暫存器空間中沒有兩個埠的位址區間重疊
pub fn validate_disjoint(field_name: &str, spans: impl IntoIterator<Item = AddressSpan>) -> Result<()> {
    let mut spans: Vec<AddressSpan> = spans.into_iter().collect();
    spans.sort_by_key(|span| span.start);

    for pair in spans.windows(2) {
        let (prev, next) = (&pair[0], &pair[1]);
        if next.start <= prev.end {
            return Err(BridgeError::InvalidConfigValueError {
                field: field_name.to_string(),
                value: format!("{} / {}", prev.label, next.label),
                reason: "Addresses overlap in the same register space".to_string(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_positive_number() {
        assert!(validate_positive_number("pipeline.workers", 5, 1).is_ok());
        assert!(validate_positive_number("pipeline.workers", 0, 1).is_err());
    }

    #[test]
    fn test_validate_range() {
        assert!(validate_range("serial.data_bits", 7u8, 5, 8).is_ok());
        assert!(validate_range("serial.data_bits", 9u8, 5, 8).is_err());
    }

    #[test]
    fn test_validate_disjoint() {
        let heads = [AddressSpan::new("D6364", 6364, 2), AddressSpan::new("D6464", 6464, 2)];
        assert!(validate_disjoint("ports.mapping", heads).is_ok());

        // 雙字組的高位字與下一個埠的低位字相同
        let adjacent = [AddressSpan::new("D101", 101, 2), AddressSpan::new("D100", 100, 2)];
        assert!(validate_disjoint("ports.mapping", adjacent).is_err());

        let bits = [AddressSpan::new("M3", 3, 1), AddressSpan::new("X3", 3, 1)];
        assert!(validate_disjoint("ports.mapping", bits).is_err());

        let touching = [AddressSpan::new("D100", 100, 2), AddressSpan::new("D102", 102, 2)];
        assert!(validate_disjoint("ports.mapping", touching).is_ok());
    }
}
