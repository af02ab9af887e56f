//! # CAC HAL Binary
//!
//! Creates the shared regions, starts the sensor and valve actors and runs
//! the interactive menu on stdin.
//!
//! # Usage
//!
//! ```bash
//! # Real hardware, default config
//! cac_hal --config /etc/cac/cac.toml
//!
//! # Without hardware
//! cac_hal --simulate
//!
//! # Bound the wait for sensor results, verbose JSON logs
//! cac_hal --poll-timeout-ms 500 -v --json
//! ```

use cac_common::config::{CacConfig, LogLevel};
use cac_common::consts::DEFAULT_CONFIG_PATH;
use cac_hal::core::CacCore;
use cac_hal::menu::{self, MenuCommand, MenuFlow};
use clap::Parser;
use std::io::{self, BufRead};
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::Duration;
use tracing::{Level, error, info, warn};
use tracing_subscriber::EnvFilter;

/// CAC HAL - shared-memory sensor and valve coordination
#[derive(Parser, Debug)]
#[command(name = "cac_hal")]
#[command(author = "RTS007")]
#[command(version)]
#[command(about = "Sensor and valve coordination over shared memory")]
#[command(long_about = None)]
struct Args {
    /// Path to board configuration (cac.toml). Built-in CACMO board if absent.
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Use the simulation backend (overrides --driver)
    #[arg(short = 's', long)]
    simulate: bool,

    /// Hardware backend
    #[arg(short, long, default_value = "linux")]
    driver: String,

    /// Bound the wait for sensor results [ms]; 0 waits forever
    #[arg(long, value_name = "MS")]
    poll_timeout_ms: Option<u64>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Output logs in JSON format
    #[arg(long)]
    json: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    if let Err(e) = run() {
        error!("CAC startup failed: {}", e);
        std::process::exit(1);
    }
    Ok(())
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // The config seeds the log level, so a config error is reported at the
    // default level.
    let mut config = match load_config(&args) {
        Ok(config) => {
            setup_tracing(&args, config.shared.log_level);
            config
        }
        Err(e) => {
            setup_tracing(&args, LogLevel::default());
            return Err(e);
        }
    };

    info!("CAC HAL v{} starting...", env!("CARGO_PKG_VERSION"));

    if let Some(ms) = args.poll_timeout_ms {
        config.runtime.poll_timeout_ms = Some(ms);
    }

    let driver_name = if args.simulate {
        info!("Simulation mode enabled");
        "simulation"
    } else {
        args.driver.as_str()
    };

    let mut core = CacCore::new(config)?;

    let running = core.running_flag();
    ctrlc::set_handler(move || {
        info!("Received shutdown signal");
        running.store(false, Ordering::SeqCst);
    })?;

    core.init(driver_name)?;

    if let Err(e) = menu_loop(&mut core) {
        error!("Menu error: {}", e);
    }

    core.shutdown()?;
    info!("CAC HAL shutdown complete");
    Ok(())
}

fn load_config(args: &Args) -> Result<CacConfig, Box<dyn std::error::Error>> {
    match &args.config {
        Some(path) => Ok(CacCore::load_config(path)?),
        None => {
            let default = PathBuf::from(DEFAULT_CONFIG_PATH);
            if default.exists() {
                Ok(CacCore::load_config(&default)?)
            } else {
                Ok(CacConfig::default())
            }
        }
    }
}

/// Read commands until `Q`, end of input, or Ctrl-C.
fn menu_loop(core: &mut CacCore) -> Result<(), Box<dyn std::error::Error>> {
    // stdin is read on its own thread so Ctrl-C is noticed while idle.
    let (tx, rx) = mpsc::channel::<String>();
    thread::Builder::new()
        .name("cac-stdin".to_string())
        .spawn(move || {
            for line in io::stdin().lock().lines() {
                let Ok(line) = line else { break };
                if tx.send(line).is_err() {
                    break;
                }
            }
        })?;

    println!("{}", menu::MENU_HELP);
    let running = core.running_flag();

    while running.load(Ordering::SeqCst) {
        let line = match rx.recv_timeout(Duration::from_millis(100)) {
            Ok(line) => line,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };
        if line.trim().is_empty() {
            continue;
        }

        let command: MenuCommand = match line.parse() {
            Ok(command) => command,
            Err(e) => {
                println!("{e}");
                continue;
            }
        };

        match menu::execute(core.control()?, command) {
            Ok((MenuFlow::Quit, _)) => break,
            Ok((MenuFlow::Continue, output)) => println!("{}", output.trim_end()),
            Err(e) => {
                warn!("{:?} failed: {}", command, e);
                println!("error: {e}");
            }
        }
    }
    Ok(())
}

/// Setup tracing subscriber based on CLI arguments and the config log level.
fn setup_tracing(args: &Args, log_level: LogLevel) {
    let level = if args.verbose {
        Level::DEBUG
    } else {
        Level::from(log_level)
    };

    let filter = EnvFilter::from_default_env().add_directive(level.into());

    if args.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}
