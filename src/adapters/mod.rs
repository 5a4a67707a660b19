// Adapters layer: concrete implementations of the serial and PLC capabilities.

pub mod memory;
pub mod modbus;
pub mod serial;

pub use memory::{MemoryPlc, MemorySerial};
pub use modbus::ModbusPlcLink;
pub use serial::{HardwareSerialPort, SerialSettings};
