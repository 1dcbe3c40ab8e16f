//! SensorVis - Command Line Entry Point
//!
//! Runs configured sensor streams and prints every delivered value as a JSON
//! line, plus a few helpers for working with CRCs and records.

use anyhow::{anyhow, bail, Context};
use clap::{Args, Parser, Subcommand};
use sensorvis_rs::{
    backend::{BackendMessage, DispatchBackend, DispatchHandle},
    config::{default_config_path, AppConfig},
    crc::{lookup_preset, Crc, PRESETS},
    parser::try_parse,
};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "sensorvis", version, about = "Sensor telemetry stream framer and dispatcher")]
struct Cli {
    /// Directory for daily-rolling log files
    #[arg(long, global = true, env = "SENSORVIS_LOG_DIR")]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run all configured streams and print each update as a JSON line
    Run {
        /// Configuration file (TOML, or JSON with a .json extension)
        #[arg(short, long, env = "SENSORVIS_CONFIG")]
        config: Option<PathBuf>,

        /// Stop after this many seconds
        #[arg(long)]
        duration: Option<f64>,

        /// Log collection statistics as they arrive
        #[arg(long)]
        stats: bool,
    },
    /// List the CRC presets
    Presets,
    /// Compute a CRC
    Crc {
        /// Preset name, e.g. CRC16-MODBUS
        #[arg(long)]
        preset: String,

        #[command(flatten)]
        input: CrcInput,
    },
    /// Parse a record and print it as JSON
    Parse {
        /// Text containing a `{key: value, ...}` group
        text: String,
    },
    /// Write a sample configuration file
    InitConfig {
        /// Destination (defaults to the data directory)
        path: Option<PathBuf>,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[derive(Args, Debug)]
#[group(required = true, multiple = false)]
struct CrcInput {
    /// Input as hex bytes, e.g. "01 02 ff"
    #[arg(long)]
    hex: Option<String>,

    /// Input as UTF-8 text
    #[arg(long)]
    text: Option<String>,
}

fn init_logging(log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,sensorvis_rs=debug"));
    let stderr_layer = fmt::layer().with_writer(std::io::stderr);

    match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "sensorvis.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::registry()
                .with(filter)
                .with(stderr_layer)
                .with(fmt::layer().with_ansi(false).with_writer(writer))
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::registry()
                .with(filter)
                .with(stderr_layer)
                .init();
            None
        }
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let _guard = init_logging(cli.log_file.as_deref());

    match cli.command {
        Command::Run {
            config,
            duration,
            stats,
        } => run(config, duration, stats),
        Command::Presets => {
            print_presets();
            Ok(())
        }
        Command::Crc { preset, input } => crc(&preset, input),
        Command::Parse { text } => {
            let record = try_parse(&text).with_context(|| format!("cannot parse {:?}", text))?;
            println!("{}", serde_json::to_string_pretty(&record)?);
            Ok(())
        }
        Command::InitConfig { path, force } => init_config(path, force),
    }
}

fn load_config(path: Option<PathBuf>) -> anyhow::Result<AppConfig> {
    if let Some(path) = path {
        return AppConfig::load(&path).with_context(|| format!("loading {}", path.display()));
    }
    match default_config_path().filter(|p| p.exists()) {
        Some(path) => {
            AppConfig::load(&path).with_context(|| format!("loading {}", path.display()))
        }
        None => {
            tracing::info!("No configuration found, running the sample mock stream");
            Ok(AppConfig::sample())
        }
    }
}

fn run(config: Option<PathBuf>, duration: Option<f64>, stats: bool) -> anyhow::Result<()> {
    let config = load_config(config)?;
    let stream_count = config.streams.len();
    if stream_count == 0 {
        bail!("no streams configured");
    }

    let (backend, handle) = DispatchBackend::new(config).context("failed to open streams")?;
    let thread = backend.spawn()?;
    tracing::info!(streams = stream_count, "Dispatching");

    let deadline = duration.map(|secs| Instant::now() + Duration::from_secs_f64(secs.max(0.0)));
    let result = pump(&handle, stream_count, deadline, stats, &thread);

    handle.shutdown();
    thread
        .join()
        .map_err(|_| anyhow!("dispatch thread panicked"))?;
    result
}

fn pump(
    handle: &DispatchHandle,
    stream_count: usize,
    deadline: Option<Instant>,
    stats: bool,
    thread: &std::thread::JoinHandle<()>,
) -> anyhow::Result<()> {
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    let mut faulted = 0;

    loop {
        if deadline.is_some_and(|d| Instant::now() >= d) {
            return Ok(());
        }
        let Some(msg) = handle.recv_timeout(Duration::from_millis(100)) else {
            if thread.is_finished() {
                return Ok(());
            }
            continue;
        };

        match msg {
            BackendMessage::Updates(updates) => {
                let at = chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true);
                for update in updates {
                    let line = serde_json::json!({
                        "at": at,
                        "stream": update.stream,
                        "field": update.field,
                        "t": update.timestamp_secs,
                        "value": update.value,
                    });
                    writeln!(out, "{}", line)?;
                }
                out.flush()?;
            }
            BackendMessage::FrameDropped { stream, reason } => {
                tracing::debug!(%stream, "Frame dropped: {}", reason);
            }
            BackendMessage::StreamFault { stream, reason } => {
                tracing::warn!(%stream, "Stream ended: {}", reason);
                faulted += 1;
                if faulted >= stream_count {
                    tracing::info!("All streams ended");
                    return Ok(());
                }
            }
            BackendMessage::Stats(s) if stats => {
                tracing::info!(
                    ticks = s.ticks,
                    records = s.records_parsed,
                    updates = s.updates_delivered,
                    dropped = s.frames_dropped,
                    preprocessor_failures = s.preprocessor_failures,
                    success_rate = s.success_rate(),
                    "Stats"
                );
                for stream in &s.streams {
                    tracing::info!(
                        stream = %stream.name,
                        frames = stream.frames_emitted,
                        crc_failures = stream.crc_failures,
                        resyncs = stream.resyncs,
                        buffered = stream.buffered,
                        "Stream stats"
                    );
                }
            }
            BackendMessage::CommandRejected(reason) => {
                tracing::warn!("Command rejected: {}", reason);
            }
            BackendMessage::Shutdown => return Ok(()),
            _ => {}
        }
    }
}

fn print_presets() {
    println!(
        "{:<16} {:<20} {:>5} {:>18} {:>18}",
        "NAME", "CATALOGUE", "WIDTH", "POLY", "CHECK"
    );
    for preset in PRESETS {
        let digits = (preset.model.width as usize).div_ceil(4);
        println!(
            "{:<16} {:<20} {:>5} {:>18} {:>18}",
            preset.name,
            preset.catalogue_name,
            preset.model.width,
            format!("0x{:0digits$X}", preset.model.polynomial, digits = digits),
            format!("0x{:0digits$X}", preset.check, digits = digits),
        );
    }
}

fn parse_hex(input: &str) -> anyhow::Result<Vec<u8>> {
    let digits: String = input
        .trim()
        .trim_start_matches("0x")
        .chars()
        .filter(|c| !c.is_whitespace() && *c != ':' && *c != ',')
        .collect();
    if !digits.is_ascii() {
        bail!("hex input must be ASCII");
    }
    if digits.len() % 2 != 0 {
        bail!("hex input has an odd number of digits");
    }
    (0..digits.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&digits[i..i + 2], 16)
                .with_context(|| format!("invalid hex byte {:?}", &digits[i..i + 2]))
        })
        .collect()
}

fn crc(preset: &str, input: CrcInput) -> anyhow::Result<()> {
    let model = lookup_preset(preset)?;
    let bytes = match (input.hex, input.text) {
        (Some(hex), _) => parse_hex(&hex)?,
        (None, Some(text)) => text.into_bytes(),
        (None, None) => bail!("either --hex or --text is required"),
    };
    let value = Crc::new(model)?.checksum(&bytes);
    let digits = (model.width as usize).div_ceil(4);
    println!("0x{:0digits$X}", value, digits = digits);
    Ok(())
}

fn init_config(path: Option<PathBuf>, force: bool) -> anyhow::Result<()> {
    let path = path
        .or_else(default_config_path)
        .ok_or_else(|| anyhow!("no data directory on this platform, pass a path"))?;
    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }
    AppConfig::sample().save(&path)?;
    println!("Wrote {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_hex() {
        assert_eq!(parse_hex("01 02 ff").unwrap(), vec![0x01, 0x02, 0xFF]);
        assert_eq!(parse_hex("0xDEAD").unwrap(), vec![0xDE, 0xAD]);
        assert!(parse_hex("abc").is_err());
        assert!(parse_hex("zz").is_err());
        // Two-byte chars must not be split mid-character
        assert!(parse_hex("aé b").is_err());
        assert!(parse_hex("éé").is_err());
    }

    #[test]
    fn test_crc_requires_one_input() {
        assert!(Cli::try_parse_from(["sensorvis", "crc", "--preset", "CRC8-CCITT"]).is_err());
        assert!(Cli::try_parse_from([
            "sensorvis", "crc", "--preset", "CRC8-CCITT", "--hex", "00", "--text", "a"
        ])
        .is_err());
        assert!(
            Cli::try_parse_from(["sensorvis", "crc", "--preset", "CRC8-CCITT", "--text", "a"])
                .is_ok()
        );
    }
}
