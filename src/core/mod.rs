pub mod bridge;
pub mod forwarder;
pub mod frame;
pub mod monitor;
pub mod queue;
pub mod reset;
pub mod shutdown;
pub mod watchdog;
pub mod worker;

pub use crate::domain::model::{PortBinding, PortState, RegisterAddress, WeightReading};
pub use crate::domain::ports::{PlcLink, SerialPort};
pub use crate::utils::error::Result;
pub use bridge::{BridgeSettings, ScaleBridge};
pub use shutdown::{ShutdownSignal, StopReason};
