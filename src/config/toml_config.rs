use crate::adapters::serial::SerialSettings;
use crate::config::port_map::{format_port_mapping, parse_port_mapping};
use crate::core::bridge::BridgeSettings;
use crate::core::forwarder::ForwarderSettings;
use crate::core::watchdog::WatchdogSettings;
use crate::domain::model::PortBinding;
use crate::utils::error::{BridgeError, Result};
use crate::utils::retry::RetryPolicy;
use crate::utils::validation::{self, AddressSpan, Validate};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::LazyLock;
use std::time::Duration;

static ENV_PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([^}]+)\}").expect("placeholder pattern is valid"));

pub const DEFAULT_PORT_MAPPING: &str =
    "/dev/ttyUSB0:D6364,M3300;/dev/ttyUSB1:D6464,M3400;/dev/ttyUSB2:D6564,M3500";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct BridgeConfig {
    pub plc: PlcConfig,
    pub serial: SerialSettings,
    pub ports: PortsConfig,
    pub pipeline: PipelineConfig,
    pub retry: RetryConfig,
    pub watchdog: WatchdogConfig,
    pub monitoring: MonitoringConfig,
}

/// PLC endpoint. The port must serve Modbus/TCP (502 by default); the
/// watchdog also opens a plain TCP connection to it on every probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlcConfig {
    pub host: String,
    pub port: u16,
    pub unit_id: u8,
    pub connect_attempts: u32,
    pub connect_delay_ms: u64,
    /// 單次請求逾時
    pub request_timeout_ms: u64,
    /// 以記憶體模擬 PLC，不連線
    pub simulate: bool,
}

impl Default for PlcConfig {
    fn default() -> Self {
        Self {
            host: "192.168.3.61".to_string(),
            port: 502,
            unit_id: 1,
            connect_attempts: 5,
            connect_delay_ms: 2000,
            request_timeout_ms: 2000,
            simulate: false,
        }
    }
}

impl PlcConfig {
    pub fn connect_policy(&self) -> RetryPolicy {
        RetryPolicy::fixed(self.connect_attempts, Duration::from_millis(self.connect_delay_ms))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PortsConfig {
    pub mapping: String,
}

impl Default for PortsConfig {
    fn default() -> Self {
        Self {
            mapping: DEFAULT_PORT_MAPPING.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub workers: usize,
    pub queue_capacity: usize,
    pub poll_interval_ms: u64,
    pub dequeue_timeout_ms: u64,
    pub reset_timeout_secs: u64,
    pub noise_floor: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            workers: 10,
            queue_capacity: 64,
            poll_interval_ms: 100,
            dequeue_timeout_ms: 1000,
            reset_timeout_secs: 15,
            noise_floor: 100,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub step_delay_ms: u64,
    pub readback_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 100,
            step_delay_ms: 100,
            readback_delay_ms: 350,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchdogConfig {
    pub interval_ms: u64,
    pub probe_attempts: u32,
    pub probe_timeout_ms: u64,
    pub probe_retry_delay_ms: u64,
    pub reconnect_attempts: u32,
    pub reconnect_delay_ms: u64,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            interval_ms: 1000,
            probe_attempts: 3,
            probe_timeout_ms: 2000,
            probe_retry_delay_ms: 1000,
            reconnect_attempts: 8,
            reconnect_delay_ms: 5000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitoringConfig {
    pub enabled: bool,
    pub stats_interval_secs: u64,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            stats_interval_secs: 60,
        }
    }
}

impl BridgeConfig {
    /// 從 TOML 檔案載入配置
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path).map_err(BridgeError::IoError)?;
        Self::from_toml_str(&content)
    }

    /// 從 TOML 字串解析配置
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let processed_content = Self::substitute_env_vars(content);

        toml::from_str(&processed_content).map_err(|e| BridgeError::ConfigValidationError {
            field: "toml_parsing".to_string(),
            message: format!("TOML parsing error: {}", e),
        })
    }

    /// 替換環境變數 (例如 ${PLC_IP})，找不到的保留原樣
    fn substitute_env_vars(content: &str) -> String {
        ENV_PLACEHOLDER
            .replace_all(content, |caps: &regex::Captures| {
                let var_name = &caps[1];
                std::env::var(var_name).unwrap_or_else(|_| format!("${{{}}}", var_name))
            })
            .into_owned()
    }

    pub fn bindings(&self) -> Vec<PortBinding> {
        parse_port_mapping(&self.ports.mapping)
    }

    pub fn settings(&self) -> BridgeSettings {
        let retry = &self.retry;
        let watchdog = &self.watchdog;

        BridgeSettings {
            workers: self.pipeline.workers,
            queue_capacity: self.pipeline.queue_capacity,
            poll_interval: Duration::from_millis(self.pipeline.poll_interval_ms),
            dequeue_timeout: Duration::from_millis(self.pipeline.dequeue_timeout_ms),
            reset_timeout: Duration::from_secs(self.pipeline.reset_timeout_secs),
            noise_floor: self.pipeline.noise_floor,
            forwarder: ForwarderSettings {
                retry: RetryPolicy::new(
                    retry.max_attempts,
                    Duration::from_millis(retry.base_delay_ms),
                    Duration::from_millis(retry.step_delay_ms),
                ),
                readback_delay: Duration::from_millis(retry.readback_delay_ms),
            },
            watchdog: WatchdogSettings {
                interval: Duration::from_millis(watchdog.interval_ms),
                probe_attempts: watchdog.probe_attempts,
                probe_timeout: Duration::from_millis(watchdog.probe_timeout_ms),
                probe_retry_delay: Duration::from_millis(watchdog.probe_retry_delay_ms),
                reconnect: RetryPolicy::fixed(
                    watchdog.reconnect_attempts,
                    Duration::from_millis(watchdog.reconnect_delay_ms),
                ),
            },
            monitoring: self.monitoring.enabled,
            stats_interval: Duration::from_secs(self.monitoring.stats_interval_secs.max(1)),
        }
    }

    /// 驗證配置的合理性
    pub fn validate_config(&self) -> Result<()> {
        if !self.plc.simulate {
            validation::validate_non_empty_string("plc.host", &self.plc.host)?;
        }
        validation::validate_positive_number("plc.connect_attempts", self.plc.connect_attempts as usize, 1)?;
        validation::validate_positive_number("plc.request_timeout_ms", self.plc.request_timeout_ms as usize, 1)?;

        validation::validate_range("serial.data_bits", self.serial.data_bits, 5, 8)?;
        validation::validate_range("serial.stop_bits", self.serial.stop_bits, 1, 2)?;
        validation::validate_positive_number("serial.baud_rate", self.serial.baud_rate as usize, 1)?;

        validation::validate_positive_number("pipeline.workers", self.pipeline.workers, 1)?;
        validation::validate_positive_number("pipeline.queue_capacity", self.pipeline.queue_capacity, 1)?;
        validation::validate_range("pipeline.poll_interval_ms", self.pipeline.poll_interval_ms, 10, 10_000)?;
        validation::validate_positive_number(
            "pipeline.dequeue_timeout_ms",
            self.pipeline.dequeue_timeout_ms as usize,
            1,
        )?;
        validation::validate_positive_number(
            "pipeline.reset_timeout_secs",
            self.pipeline.reset_timeout_secs as usize,
            1,
        )?;
        validation::validate_positive_number("pipeline.noise_floor", self.pipeline.noise_floor as usize, 1)?;

        validation::validate_range("retry.max_attempts", self.retry.max_attempts, 1, 20)?;
        validation::validate_positive_number("watchdog.interval_ms", self.watchdog.interval_ms as usize, 1)?;
        validation::validate_positive_number("watchdog.probe_attempts", self.watchdog.probe_attempts as usize, 1)?;
        validation::validate_positive_number(
            "watchdog.probe_timeout_ms",
            self.watchdog.probe_timeout_ms as usize,
            1,
        )?;
        validation::validate_positive_number(
            "watchdog.reconnect_attempts",
            self.watchdog.reconnect_attempts as usize,
            1,
        )?;

        let bindings = self.bindings();
        if bindings.is_empty() {
            return Err(BridgeError::InvalidConfigValueError {
                field: "ports.mapping".to_string(),
                value: self.ports.mapping.clone(),
                reason: "No valid port binding found".to_string(),
            });
        }
        // 所有字組裝置共用保持暫存器空間，所有位元裝置共用線圈空間
        validation::validate_disjoint(
            "ports.mapping",
            bindings
                .iter()
                .map(|b| AddressSpan::new(b.head_device.to_string(), b.head_device.index, 2)),
        )?;
        validation::validate_disjoint(
            "ports.mapping",
            bindings
                .iter()
                .map(|b| AddressSpan::new(b.bit_unit.to_string(), b.bit_unit.index, 1)),
        )?;

        Ok(())
    }

    /// 取得正規化後的對應表字串
    pub fn normalized_mapping(&self) -> String {
        format_port_mapping(&self.bindings())
    }
}

impl Validate for BridgeConfig {
    fn validate(&self) -> Result<()> {
        self.validate_config()
    }
}
