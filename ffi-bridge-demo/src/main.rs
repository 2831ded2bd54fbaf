//! FFI Bridge Demo Application
//!
//! Command-line driver for the ffi-bridge library. It runs named scenarios
//! against the reference native backend and adds on top of the library:
//! - TOML configuration of inputs and expectations
//! - Delivery recording (timestamp, thread, value)
//! - Report generation (TXT/JSON)

use anyhow::{bail, Context, Result};
use clap::Parser;
use ffi_bridge::Bridge;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

mod config;
mod recorder;
mod report;
mod scenarios;

use report::{OutputFormat, RunReport};
use scenarios::{Runner, Scenario};

/// FFI Bridge Demo - Exercise the native callback bridge
#[derive(Parser, Debug)]
#[command(name = "ffi-bridge-demo")]
#[command(about = "Run callback bridge scenarios against the native backend", long_about = None)]
#[command(version)]
struct Args {
    /// Scenario to run (can be repeated; default: all)
    #[arg(short, long, value_enum, value_name = "NAME")]
    scenario: Vec<Scenario>,

    /// Path to configuration file (demo.toml)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Report format
    #[arg(short, long, value_enum, default_value = "txt")]
    format: OutputFormat,

    /// Output file for the report (default: stdout)
    #[arg(short, long, value_name = "FILE")]
    output: Option<PathBuf>,

    /// Override the callback timeout from the configuration
    #[arg(long, value_name = "MS")]
    timeout_ms: Option<u64>,

    /// Verbosity level (can be repeated: -v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long)]
    quiet: bool,

    /// List available scenarios and exit
    #[arg(long)]
    list: bool,
}

fn main() -> Result<()> {
    // Parse command line arguments
    let args = Args::parse();

    // Initialize logging
    init_logging(args.verbose, args.quiet);

    log::info!("FFI Bridge Demo v{}", env!("CARGO_PKG_VERSION"));
    log::info!("Using bridge library v{}", ffi_bridge::VERSION);

    if args.list {
        for scenario in Scenario::all() {
            println!("{:<18} {}", scenario.name(), scenario.description());
        }
        return Ok(());
    }

    let mut config = match &args.config {
        Some(path) => {
            log::info!("Loading configuration from: {:?}", path);
            config::load_config(path)?
        }
        None => config::DemoConfig::default(),
    };
    if let Some(timeout_ms) = args.timeout_ms {
        if timeout_ms == 0 {
            bail!("--timeout-ms must be greater than zero");
        }
        config.bridge.callback_timeout_ms = timeout_ms;
    }
    log::debug!("Configuration: {:?}", config);

    let selected: Vec<Scenario> = if args.scenario.is_empty() {
        Scenario::all().to_vec()
    } else {
        args.scenario.clone()
    };

    let bridge = Bridge::new(config.bridge.clone());
    let timeout = Duration::from_millis(config.bridge.callback_timeout_ms);
    let runner = Runner::new(&bridge, &config, timeout);
    let reports = selected.iter().map(|scenario| runner.run(*scenario)).collect();
    let report = RunReport::new(reports);

    let rendered = report.render(args.format)?;
    match &args.output {
        Some(path) => {
            fs::write(path, &rendered)
                .with_context(|| format!("Failed to write report: {:?}", path))?;
            log::info!("Report written to {:?}", path);
        }
        None => print!("{}", rendered),
    }

    let leftover = bridge.registry().pending();
    if leftover > 0 {
        log::warn!("{} callback registrations still pending at exit", leftover);
    }

    let failed = report.failed();
    if failed > 0 {
        bail!("{} of {} scenarios failed", failed, report.scenarios.len());
    }
    Ok(())
}

/// Initialize logging based on verbosity level
fn init_logging(verbose: u8, quiet: bool) {
    use env_logger::Builder;
    use log::LevelFilter;
    use std::io::Write;

    let level = if quiet {
        LevelFilter::Error
    } else {
        match verbose {
            0 => LevelFilter::Info,
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    };

    Builder::new()
        .filter_level(level)
        .format(|buf, record| {
            writeln!(
                buf,
                "[{} {}] {}",
                record.level(),
                record.target(),
                record.args()
            )
        })
        .init();
}
