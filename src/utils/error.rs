use thiserror::Error;

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Configuration validation failed for '{field}': {message}")]
    ConfigValidationError { field: String, message: String },

    #[error("Invalid value '{value}' for '{field}': {reason}")]
    InvalidConfigValueError {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Serial port {port} failed: {message}")]
    SerialError { port: String, message: String },

    #[error("Could not decode serial data as ASCII: {hex}")]
    FrameDecodeError { hex: String },

    #[error("Failed to convert weight data to a number: {raw}")]
    WeightParseError { raw: String },

    #[error("PLC communication error: {message}")]
    PlcError { message: String },

    #[error("Read-back mismatch at {address}: expected {expected}, got {actual}")]
    VerifyMismatch {
        address: String,
        expected: u32,
        actual: String,
    },

    #[error("{operation} failed after {attempts} attempts: {last}")]
    RetryExhausted {
        operation: String,
        attempts: u32,
        last: Box<BridgeError>,
    },

    #[error("Operation cancelled by shutdown")]
    Cancelled,

    #[error("PLC connection lost after {attempts} reconnection attempts")]
    ConnectionLost { attempts: u32 },

    #[error("Data processing error: {message}")]
    ProcessingError { message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Configuration,
    Data,
    Serial,
    Plc,
    Runtime,
}

impl BridgeError {
    pub fn plc(message: impl Into<String>) -> Self {
        BridgeError::PlcError {
            message: message.into(),
        }
    }

    pub fn serial(port: impl Into<String>, message: impl ToString) -> Self {
        BridgeError::SerialError {
            port: port.into(),
            message: message.to_string(),
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            BridgeError::ConfigValidationError { .. }
            | BridgeError::InvalidConfigValueError { .. } => ErrorCategory::Configuration,
            BridgeError::FrameDecodeError { .. } | BridgeError::WeightParseError { .. } => {
                ErrorCategory::Data
            }
            BridgeError::SerialError { .. } | BridgeError::IoError(_) => ErrorCategory::Serial,
            BridgeError::PlcError { .. }
            | BridgeError::VerifyMismatch { .. }
            | BridgeError::RetryExhausted { .. }
            | BridgeError::ConnectionLost { .. } => ErrorCategory::Plc,
            BridgeError::Cancelled | BridgeError::ProcessingError { .. } => ErrorCategory::Runtime,
        }
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self {
            BridgeError::FrameDecodeError { .. }
            | BridgeError::WeightParseError { .. }
            | BridgeError::Cancelled => ErrorSeverity::Low,
            BridgeError::VerifyMismatch { .. } | BridgeError::RetryExhausted { .. } => {
                ErrorSeverity::Medium
            }
            BridgeError::ConfigValidationError { .. }
            | BridgeError::InvalidConfigValueError { .. }
            | BridgeError::SerialError { .. }
            | BridgeError::IoError(_)
            | BridgeError::ProcessingError { .. } => ErrorSeverity::High,
            BridgeError::PlcError { .. } | BridgeError::ConnectionLost { .. } => {
                ErrorSeverity::Critical
            }
        }
    }

    /// 只有代表連線或裝置本身失效的錯誤才會讓整條管線停止
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            BridgeError::SerialError { .. }
                | BridgeError::IoError(_)
                | BridgeError::PlcError { .. }
                | BridgeError::ConnectionLost { .. }
        )
    }

    pub fn recovery_suggestion(&self) -> &'static str {
        match self.category() {
            ErrorCategory::Configuration => {
                "Check the TOML file, SERIAL_PORTS, PLC_IP and PLC_PORT values"
            }
            ErrorCategory::Data => "Check the scale output format (ST,+<weight>  g)",
            ErrorCategory::Serial => "Check the USB/RS-232 cable and the serial device path",
            ErrorCategory::Plc => "Check the PLC network cable, IP address and port settings",
            ErrorCategory::Runtime => "Restart the bridge; report the log if it persists",
        }
    }

    pub fn user_friendly_message(&self) -> String {
        match self.category() {
            ErrorCategory::Configuration => format!("Configuration problem: {}", self),
            ErrorCategory::Data => format!("Bad data from scale: {}", self),
            ErrorCategory::Serial => format!("Scale connection problem: {}", self),
            ErrorCategory::Plc => format!("PLC connection problem: {}", self),
            ErrorCategory::Runtime => format!("Bridge stopped: {}", self),
        }
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;
