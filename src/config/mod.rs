pub mod port_map;
pub mod toml_config;

pub use port_map::parse_port_mapping;
pub use toml_config::BridgeConfig;

#[cfg(feature = "cli")]
use crate::utils::error::Result;
#[cfg(feature = "cli")]
use clap::Parser;

#[cfg(feature = "cli")]
#[derive(Debug, Clone, Parser)]
#[command(name = "scale-bridge")]
#[command(about = "Forwards serial scale readings into PLC registers")]
pub struct CliConfig {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<String>,

    /// Port mapping, e.g. /dev/ttyUSB0:D6364,M3300;/dev/ttyUSB1:D6464,M3400
    #[arg(long, env = "SERIAL_PORTS")]
    pub ports: Option<String>,

    #[arg(long, env = "PLC_IP")]
    pub plc_host: Option<String>,

    #[arg(long, env = "PLC_PORT")]
    pub plc_port: Option<u16>,

    #[arg(long)]
    pub workers: Option<usize>,

    /// Enable verbose output
    #[arg(short, long)]
    pub verbose: bool,

    /// Emit JSON logs
    #[arg(long)]
    pub log_json: bool,

    /// Log process and pipeline statistics periodically
    #[arg(long)]
    pub monitor: bool,

    /// Run against an in-memory PLC instead of the network link
    #[arg(long)]
    pub simulate: bool,

    /// Print the resolved configuration and exit
    #[arg(long)]
    pub dry_run: bool,
}

#[cfg(feature = "cli")]
impl CliConfig {
    /// 依序套用：預設值 → TOML 檔 → 環境變數 / 命令列
    pub fn load(&self) -> Result<BridgeConfig> {
        let mut config = match &self.config {
            Some(path) => {
                tracing::info!("📁 Loading configuration from: {}", path);
                BridgeConfig::from_file(path)?
            }
            None => BridgeConfig::default(),
        };
        self.apply_overrides(&mut config);
        Ok(config)
    }

    pub fn apply_overrides(&self, config: &mut BridgeConfig) {
        if let Some(ports) = &self.ports {
            config.ports.mapping = ports.clone();
        }
        if let Some(host) = &self.plc_host {
            config.plc.host = host.clone();
        }
        if let Some(port) = self.plc_port {
            config.plc.port = port;
        }
        if let Some(workers) = self.workers {
            config.pipeline.workers = workers;
        }
        if self.monitor {
            config.monitoring.enabled = true;
        }
        if self.simulate {
            config.plc.simulate = true;
        }
    }
}

#[cfg(all(test, feature = "cli"))]
mod tests {
    use super::*;

    #[test]
    fn test_cli_overrides_config() {
        let cli = CliConfig::parse_from([
            "scale-bridge",
            "--ports",
            "/dev/ttyS1:D10,M10",
            "--plc-host",
            "10.1.1.1",
            "--plc-port",
            "502",
            "--workers",
            "4",
            "--simulate",
        ]);

        let config = cli.load().unwrap();
        assert_eq!(config.ports.mapping, "/dev/ttyS1:D10,M10");
        assert_eq!(config.plc.host, "10.1.1.1");
        assert_eq!(config.plc.port, 502);
        assert_eq!(config.pipeline.workers, 4);
        assert!(config.plc.simulate);
        assert!(!config.monitoring.enabled);
    }

    #[test]
    fn test_missing_config_file_is_error() {
        let cli = CliConfig::parse_from(["scale-bridge", "--config", "/nonexistent/scale-bridge.toml"]);
        assert!(cli.load().is_err());
    }
}
