use crate::domain::ports::SerialPort;
use crate::utils::error::{BridgeError, Result};
use serde::{Deserialize, Serialize};
use serialport::SerialPort as _;
use std::io::{Read, Write};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Parity {
    None,
    #[default]
    Even,
    Odd,
}

impl From<Parity> for serialport::Parity {
    fn from(parity: Parity) -> Self {
        match parity {
            Parity::None => serialport::Parity::None,
            Parity::Even => serialport::Parity::Even,
            Parity::Odd => serialport::Parity::Odd,
        }
    }
}

/// 磅秤的序列埠參數（預設 19200 7E1）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialSettings {
    pub baud_rate: u32,
    pub data_bits: u8,
    pub parity: Parity,
    pub stop_bits: u8,
    pub timeout_ms: u64,
}

impl Default for SerialSettings {
    fn default() -> Self {
        Self {
            baud_rate: 19200,
            data_bits: 7,
            parity: Parity::Even,
            stop_bits: 1,
            timeout_ms: 1000,
        }
    }
}

impl SerialSettings {
    fn data_bits(&self) -> Result<serialport::DataBits> {
        match self.data_bits {
            5 => Ok(serialport::DataBits::Five),
            6 => Ok(serialport::DataBits::Six),
            7 => Ok(serialport::DataBits::Seven),
            8 => Ok(serialport::DataBits::Eight),
            other => Err(BridgeError::InvalidConfigValueError {
                field: "serial.data_bits".to_string(),
                value: other.to_string(),
                reason: "Data bits must be 5, 6, 7 or 8".to_string(),
            }),
        }
    }

    fn stop_bits(&self) -> Result<serialport::StopBits> {
        match self.stop_bits {
            1 => Ok(serialport::StopBits::One),
            2 => Ok(serialport::StopBits::Two),
            other => Err(BridgeError::InvalidConfigValueError {
                field: "serial.stop_bits".to_string(),
                value: other.to_string(),
                reason: "Stop bits must be 1 or 2".to_string(),
            }),
        }
    }
}

/// A physical scale port. The OS handle is dropped on `close()` and
/// recreated on `open()`.
pub struct HardwareSerialPort {
    path: String,
    settings: SerialSettings,
    handle: Option<Box<dyn serialport::SerialPort>>,
}

impl HardwareSerialPort {
    /// Builds the port without touching the device.
    pub fn new(path: impl Into<String>, settings: SerialSettings) -> Self {
        Self {
            path: path.into(),
            settings,
            handle: None,
        }
    }

    /// Opens the port; a failure is logged and the port is returned closed
    /// so the monitor can retry it.
    pub fn open_or_closed(path: impl Into<String>, settings: SerialSettings) -> Self {
        let mut port = Self::new(path, settings);
        match port.open() {
            Ok(()) => tracing::info!("🔌 Opened serial port {}", port.path),
            Err(e) => tracing::warn!("⚠️ {}", e),
        }
        port
    }

    fn handle(&mut self) -> Result<&mut Box<dyn serialport::SerialPort>> {
        let path = &self.path;
        self.handle
            .as_mut()
            .ok_or_else(|| BridgeError::serial(path, "port is closed"))
    }
}

impl SerialPort for HardwareSerialPort {
    fn name(&self) -> &str {
        &self.path
    }

    fn bytes_available(&mut self) -> Result<usize> {
        let path = self.path.clone();
        let count = self
            .handle()?
            .bytes_to_read()
            .map_err(|e| BridgeError::serial(&path, e))?;
        Ok(count as usize)
    }

    fn read(&mut self, max_bytes: usize) -> Result<Vec<u8>> {
        let path = self.path.clone();
        let mut data = vec![0u8; max_bytes];
        let read = self
            .handle()?
            .read(&mut data)
            .map_err(|e| BridgeError::serial(&path, e))?;
        data.truncate(read);
        Ok(data)
    }

    fn is_open(&self) -> bool {
        self.handle.is_some()
    }

    fn open(&mut self) -> Result<()> {
        let handle = serialport::new(&self.path, self.settings.baud_rate)
            .data_bits(self.settings.data_bits()?)
            .parity(self.settings.parity.into())
            .stop_bits(self.settings.stop_bits()?)
            .timeout(Duration::from_millis(self.settings.timeout_ms))
            .open()
            .map_err(|e| BridgeError::serial(&self.path, e))?;
        self.handle = Some(handle);
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        let path = self.path.clone();
        self.handle()?
            .flush()
            .map_err(|e| BridgeError::serial(&path, e))
    }

    fn close(&mut self) {
        self.handle = None;
    }
}
