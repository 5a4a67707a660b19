use anyhow::Context;
use clap::Parser;
use scale_bridge::domain::ports::{PlcLink, SerialPort};
use scale_bridge::utils::retry::retry_with_backoff;
use scale_bridge::utils::{logger, validation::Validate};
use scale_bridge::{BridgeConfig, CliConfig, HardwareSerialPort, MemoryPlc, ModbusPlcLink, PortBinding, ScaleBridge};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() {
    let cli = CliConfig::parse();

    // 初始化日誌
    if cli.log_json {
        logger::init_json_logger(cli.verbose);
    } else {
        logger::init_cli_logger(cli.verbose);
    }

    tracing::info!("🚀 Starting scale-bridge");

    let config = match cli.load() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("❌ Failed to load configuration: {}", e);
            eprintln!("❌ {}", e.user_friendly_message());
            eprintln!("💡 Make sure the file exists and is valid TOML format");
            std::process::exit(1);
        }
    };
    if cli.verbose {
        tracing::debug!("Resolved config: {:?}", config);
    }

    // 驗證配置
    if let Err(e) = config.validate() {
        tracing::error!("❌ Configuration validation failed: {}", e);
        tracing::error!("💡 Suggestion: {}", e.recovery_suggestion());
        eprintln!("❌ {}", e.user_friendly_message());
        std::process::exit(1);
    }

    tracing::info!("✅ Configuration loaded and validated successfully");
    display_config_summary(&config);

    if cli.dry_run {
        tracing::info!("🔍 DRY RUN MODE - no device will be opened");
        println!("  SERIAL_PORTS={}", config.normalized_mapping());
        return;
    }

    if config.monitoring.enabled {
        tracing::info!("🔍 System monitoring enabled");
    }

    let link = match connect_plc(&config).await {
        Ok(link) => link,
        Err(e) => {
            tracing::error!("❌ {:#}", e);
            eprintln!("❌ {:#}", e);
            std::process::exit(1);
        }
    };

    let ports = open_serial_ports(&config, config.bindings());
    let bridge = ScaleBridge::new(config.settings(), link, ports);
    let reason = bridge.run_until(wait_for_interrupt()).await;

    std::process::exit(reason.exit_code());
}

async fn connect_plc(config: &BridgeConfig) -> anyhow::Result<Arc<dyn PlcLink>> {
    let plc = &config.plc;
    if plc.simulate {
        tracing::info!("🧪 Simulation mode: using in-memory PLC");
        return Ok(Arc::new(MemoryPlc::new()));
    }

    tracing::info!("🔌 Connecting to PLC at {}:{}", plc.host, plc.port);
    // 啟動階段尚無停止訊號
    let never = CancellationToken::new();
    let link = retry_with_backoff(&plc.connect_policy(), "PLC connect", &never, |_| {
        ModbusPlcLink::connect(&plc.host, plc.port, plc.unit_id, plc.request_timeout())
    })
    .await
    .with_context(|| format!("Failed to connect to PLC at {}:{}", plc.host, plc.port))?;

    Ok(Arc::new(link))
}

fn open_serial_ports(config: &BridgeConfig, bindings: Vec<PortBinding>) -> Vec<(PortBinding, Box<dyn SerialPort>)> {
    bindings
        .into_iter()
        .map(|binding| {
            let port = HardwareSerialPort::open_or_closed(binding.port.clone(), config.serial.clone());
            (binding, Box::new(port) as Box<dyn SerialPort>)
        })
        .collect()
}

async fn wait_for_interrupt() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = terminate.recv() => {}
                }
                return;
            }
            Err(e) => tracing::warn!("⚠️ Unable to listen for SIGTERM: {}", e),
        }
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("❌ Unable to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
}

fn display_config_summary(config: &BridgeConfig) {
    println!("📋 Configuration Summary:");
    if config.plc.simulate {
        println!("  PLC: simulated");
    } else {
        println!(
            "  PLC: {}:{} (unit {})",
            config.plc.host, config.plc.port, config.plc.unit_id
        );
    }
    println!(
        "  Serial: {} baud, {} data bits, {:?} parity, {} stop bits",
        config.serial.baud_rate, config.serial.data_bits, config.serial.parity, config.serial.stop_bits
    );
    for binding in config.bindings() {
        println!(
            "  Port: {} -> {} / {}",
            binding.port, binding.head_device, binding.bit_unit
        );
    }
    println!(
        "  Workers: {}, queue: {}, reset after {}s",
        config.pipeline.workers, config.pipeline.queue_capacity, config.pipeline.reset_timeout_secs
    );
}
