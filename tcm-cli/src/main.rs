use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use clap_verbosity_flag::{InfoLevel, Verbosity};
use linux_embedded_hal::I2cdev;
use serde::Serialize;
use std::fs::File;
use std::path::PathBuf;
use std::time::Duration;
use tcm_lib::{FirmwareMode, I2cBus, TcmConfig, TcmDevice};
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

type Device = TcmDevice<I2cBus<I2cdev>>;

/// Talk to a Synaptics TouchComm touch controller over Linux I2C.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// I2C adapter device node
    #[arg(short, long, default_value = "/dev/i2c-1")]
    device: PathBuf,
    /// 7-bit slave address, decimal or 0x-prefixed hex
    #[arg(short, long, default_value = "0x2c", value_parser = parse_address)]
    address: u8,
    /// JSON file overriding engine tunables
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Print results as JSON
    #[arg(long)]
    json: bool,
    /// Optional path to a file to write logs to, in addition to the console.
    #[arg(short, long)]
    log_file: Option<PathBuf>,
    #[command(flatten)]
    verbose: Verbosity<InfoLevel>,
    #[command(subcommand)]
    command: Action,
}

#[derive(Subcommand, Debug)]
enum Action {
    /// Send IDENTIFY and print the firmware identity
    Identify,
    /// Print application or bootloader info for the running firmware
    Info,
    /// Print the touch report configuration
    ReportConfig,
    /// Watch touch, gesture and health reports
    Monitor {
        /// Poll period in milliseconds
        #[arg(short, long, default_value = "10")]
        period: u64,
        /// Stop after this many trigger sets
        #[arg(short = 'n', long)]
        count: Option<u64>,
        /// Start with input reporting suspended (gesture wakeup)
        #[arg(long)]
        suspended: bool,
    },
    /// Read a dynamic configuration entry
    DynGet {
        #[arg(value_parser = parse_u8)]
        id: u8,
    },
    /// Write a dynamic configuration entry
    DynSet {
        #[arg(value_parser = parse_u8)]
        id: u8,
        value: u16,
    },
    /// Switch the running firmware
    Mode {
        #[arg(value_enum)]
        mode: ModeArg,
    },
    /// Software reset
    Reset,
    /// Enter or leave sleep
    Sleep {
        #[arg(action = clap::ArgAction::Set, default_value = "true")]
        enable: bool,
    },
    /// Run one production test and dump the result
    ProductionTest {
        #[arg(value_parser = parse_u8)]
        test_id: u8,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ModeArg {
    Application,
    Bootloader,
}

impl From<ModeArg> for FirmwareMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Application => FirmwareMode::Application,
            ModeArg::Bootloader => FirmwareMode::Bootloader,
        }
    }
}

fn parse_number(value: &str) -> Result<u64, String> {
    let parsed = match value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => value.parse(),
    };
    parsed.map_err(|e| format!("invalid number {value:?}: {e}"))
}

fn parse_u8(value: &str) -> Result<u8, String> {
    let number = parse_number(value)?;
    u8::try_from(number).map_err(|_| format!("{value} does not fit in a byte"))
}

fn parse_address(value: &str) -> Result<u8, String> {
    let address = parse_u8(value)?;
    if address > 0x7f {
        return Err(format!("{value} is not a 7-bit address"));
    }
    Ok(address)
}

fn setup_logging(
    log_file_path: Option<PathBuf>,
    verbosity: &Verbosity<InfoLevel>,
) -> Result<Option<WorkerGuard>> {
    let console_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time();

    let (file_layer, guard) = if let Some(ref path) = log_file_path {
        let log_file = File::create(path)
            .with_context(|| format!("Failed to create log file at: {:?}", path))?;
        let (non_blocking_writer, guard) = tracing_appender::non_blocking(log_file);
        let layer = tracing_subscriber::fmt::layer()
            .with_writer(non_blocking_writer)
            .with_ansi(false)
            .with_target(false);
        (Some(layer), Some(guard))
    } else {
        (None, None)
    };

    // -v raises the default INFO level to DEBUG, -vv to TRACE
    let filter = EnvFilter::builder()
        .with_default_directive(verbosity.tracing_level_filter().into())
        .from_env_lossy();

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    if let Some(path) = log_file_path {
        info!("Logging to file: {:?}", path);
    }

    Ok(guard)
}

fn load_config(path: Option<&PathBuf>) -> Result<TcmConfig> {
    let Some(path) = path else {
        return Ok(TcmConfig::default());
    };
    let file = File::open(path).with_context(|| format!("Failed to open config {:?}", path))?;
    serde_json::from_reader(file).with_context(|| format!("Failed to parse config {:?}", path))
}

fn emit<T: Serialize + std::fmt::Debug>(json: bool, value: &T) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(value)?);
    } else {
        println!("{value:#?}");
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let _guard = setup_logging(cli.log_file.clone(), &cli.verbose)?;

    if let Err(e) = run(cli).await {
        error!("{:#}", e);
        std::process::exit(1);
    }
    Ok(())
}

async fn run(cli: Cli) -> Result<()> {
    let config = load_config(cli.config.as_ref())?;
    let i2c = I2cdev::new(&cli.device)
        .with_context(|| format!("Failed to open I2C adapter {:?}", cli.device))?;
    let device = TcmDevice::new(I2cBus::new(i2c, cli.address), config)?;
    info!(device = ?cli.device, address = format!("0x{:02x}", cli.address), "Connected");

    match cli.command {
        Action::Identify => emit(cli.json, &device.identify(true).await?),
        Action::Info => {
            let identity = device.identify(true).await?;
            match identity.mode {
                FirmwareMode::Application => emit(cli.json, &device.get_app_info().await?),
                FirmwareMode::Bootloader | FirmwareMode::TddiBootloader => {
                    emit(cli.json, &device.get_boot_info().await?)
                }
                mode => bail!("No info available in {mode} mode"),
            }
        }
        Action::ReportConfig => {
            let program = device.get_touch_report_config().await?;
            println!("{}", hex::encode(&program));
            Ok(())
        }
        Action::Monitor {
            period,
            count,
            suspended,
        } => monitor(&device, cli.json, period, count, suspended).await,
        Action::DynGet { id } => {
            let value = device.get_dynamic_config(id).await?;
            println!("0x{id:02x} = {value} (0x{value:04x})");
            Ok(())
        }
        Action::DynSet { id, value } => {
            device.set_dynamic_config(id, value).await?;
            info!(id, value, "Dynamic config written");
            Ok(())
        }
        Action::Mode { mode } => {
            device.switch_mode(mode.into()).await?;
            emit(cli.json, &device.identity())
        }
        Action::Reset => emit(cli.json, &device.reset().await?),
        Action::Sleep { enable } => {
            device.sleep(enable).await?;
            info!(enable, "Sleep state changed");
            Ok(())
        }
        Action::ProductionTest { test_id } => {
            device.identify(true).await?;
            device.get_app_info().await?;
            let result = device.production_test(test_id).await?;
            println!("{}", hex::encode(&result));
            Ok(())
        }
    }
}

async fn monitor(
    device: &Device,
    json: bool,
    period: u64,
    count: Option<u64>,
    suspended: bool,
) -> Result<()> {
    device.initialize().await?;
    if suspended {
        device.set_input_reporting(true).await?;
    }

    let (handle, mut triggers) = device.spawn_poll_loop(Duration::from_millis(period.max(1)));
    let mut seen = 0u64;

    loop {
        let reason = tokio::select! {
            reason = triggers.recv() => match reason {
                Some(reason) => reason,
                None => {
                    warn!("Poll loop stopped");
                    break;
                }
            },
            _ = tokio::signal::ctrl_c() => break,
        };

        if reason.touch() {
            emit(json, &device.get_touch_points())?;
        }
        if reason.gesture() {
            emit(json, &device.get_gesture_info())?;
        }
        if reason.fingerprint() {
            if let Some(fingerprint) = device.get_fingerprint_info() {
                emit(json, &fingerprint)?;
            }
        }
        if reason.fw_health() {
            if let Some(snapshot) = device.get_health_snapshot()? {
                emit(json, &snapshot)?;
            }
        }
        if reason.fw_auto_reset() {
            warn!(mode = %device.identity().mode, "Firmware reset itself");
        }

        seen += 1;
        if count.is_some_and(|count| seen >= count) {
            break;
        }
    }

    drop(triggers);
    handle.abort();
    if suspended {
        device.set_input_reporting(false).await?;
    }
    Ok(())
}
