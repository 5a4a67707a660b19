pub mod adapters;
pub mod config;
pub mod core;
pub mod domain;
pub mod utils;

#[cfg(feature = "cli")]
pub use config::CliConfig;

pub use adapters::{HardwareSerialPort, MemoryPlc, MemorySerial, ModbusPlcLink, SerialSettings};
pub use config::BridgeConfig;
pub use core::{BridgeSettings, ScaleBridge, ShutdownSignal, StopReason};
pub use domain::model::{PortBinding, RegisterAddress};
pub use domain::ports::{PlcLink, SerialPort};
pub use utils::error::{BridgeError, Result};
