use crate::domain::model::{PortBinding, RegisterAddress, RegisterKind};
use crate::utils::error::{BridgeError, Result};

/// 解析 `port:headDevice,bitUnit;...` 格式的對應表
///
/// Bad entries are skipped with a warning; when a port appears twice the
/// last entry wins.
pub fn parse_port_mapping(mapping: &str) -> Vec<PortBinding> {
    let mut bindings: Vec<PortBinding> = Vec::new();

    for entry in mapping.split(';').map(str::trim).filter(|e| !e.is_empty()) {
        let binding = match parse_entry(entry) {
            Ok(binding) => binding,
            Err(e) => {
                tracing::warn!("⚠️ Skipping port mapping entry '{}': {}", entry, e);
                continue;
            }
        };

        if let Some(pos) = bindings.iter().position(|b| b.port == binding.port) {
            tracing::warn!(
                "⚠️ Port {} mapped more than once, using '{}'",
                binding.port,
                entry
            );
            bindings.remove(pos);
        }
        bindings.push(binding);
    }

    bindings
}

pub fn parse_entry(entry: &str) -> Result<PortBinding> {
    let invalid = |reason: &str| BridgeError::InvalidConfigValueError {
        field: "ports.mapping".to_string(),
        value: entry.to_string(),
        reason: reason.to_string(),
    };

    let (port, registers) = entry
        .split_once(':')
        .ok_or_else(|| invalid("Expected port:headDevice,bitUnit"))?;
    let port = port.trim();
    if port.is_empty() {
        return Err(invalid("Port name is empty"));
    }

    let mut parts = registers.split(',').map(str::trim);
    let (Some(head), Some(bit), None) = (parts.next(), parts.next(), parts.next()) else {
        return Err(invalid("Expected exactly two register addresses"));
    };

    let head_device: RegisterAddress = head.parse()?;
    let bit_unit: RegisterAddress = bit.parse()?;

    if head_device.kind() != Some(RegisterKind::Word) {
        return Err(invalid("Head device must be a word device (D, W, R, ZR, SD)"));
    }
    if bit_unit.kind() != Some(RegisterKind::Bit) {
        return Err(invalid("Bit unit must be a bit device (M, X, Y, B, L, F, SM)"));
    }

    Ok(PortBinding::new(port, head_device, bit_unit))
}

/// 反向輸出，供 dry-run 顯示
pub fn format_port_mapping(bindings: &[PortBinding]) -> String {
    bindings
        .iter()
        .map(|b| format!("{}:{},{}", b.port, b.head_device, b.bit_unit))
        .collect::<Vec<_>>()
        .join(";")
}
