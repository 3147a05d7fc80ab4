//! # Scanner HAL Binary
//!
//! Attaches a scanner, calibrates it and runs one scan, writing the raw
//! samples and a JSON report.
//!
//! # Usage
//!
//! ```bash
//! # Colour scan at 300 dpi on the simulated CIS flatbed
//! scan_hal --simulate --output page.raw
//!
//! # Gray 16-bit scan with a config file and a report file
//! scan_hal -c config/scanner.toml -s --mode gray --depth 16 --report scan.json
//!
//! # Verbose logging
//! scan_hal -s -v
//! ```

use clap::{Parser, ValueEnum};
use scan_common::config::{ConfigLoader, LogLevel};
use scan_common::hal::config::ScannerConfig;
use scan_common::hal::model::Frontend;
use scan_common::hal::transport::CollectingSink;
use scan_common::hal::types::{ColorFilter, ScanMode, ScanParams, ScanSession};
use scan_hal::core::ScannerCore;
use scan_hal::profiles::find_model;
use scan_hal::simulation::{SimCounters, SimulatedScanner};
use serde::Serialize;
use std::path::PathBuf;
use tracing::{Level, error, info};
use tracing_subscriber::EnvFilter;

/// Colour mode argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Mode {
    Color,
    Gray,
    Lineart,
}

/// Scanner HAL - register-driven flatbed scanner backend
#[derive(Parser, Debug)]
#[command(name = "scan_hal")]
#[command(version)]
#[command(about = "Register-driven flatbed scanner backend")]
#[command(long_about = None)]
struct Args {
    /// Path to scanner configuration file (scanner.toml).
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Model to attach, overrides the configuration file.
    #[arg(short, long)]
    model: Option<String>,

    /// Attach the simulated scanner
    #[arg(short = 's', long)]
    simulate: bool,

    /// Horizontal resolution (dpi)
    #[arg(long, default_value_t = 300)]
    xres: u32,

    /// Vertical resolution (dpi), defaults to the horizontal one
    #[arg(long)]
    yres: Option<u32>,

    /// Pixels per line
    #[arg(long, default_value_t = 600)]
    pixels: u32,

    /// Lines to scan
    #[arg(long, default_value_t = 600)]
    lines: u32,

    /// Colour mode
    #[arg(long, value_enum, default_value_t = Mode::Color)]
    mode: Mode,

    /// Bits per sample (8 or 16)
    #[arg(long, default_value_t = 8)]
    depth: u32,

    /// Recalibrate even when the cache holds a valid calibration
    #[arg(long)]
    force_calibration: bool,

    /// Write the raw samples to this file
    #[arg(short, long, value_name = "FILE")]
    output: Option<PathBuf>,

    /// Write the JSON report to this file instead of stdout
    #[arg(long, value_name = "FILE")]
    report: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Output logs in JSON format
    #[arg(long)]
    json: bool,
}

/// Summary of one run.
#[derive(Debug, Serialize)]
struct ScanReport {
    model: String,
    session: ScanSession,
    bytes: usize,
    head_position: u32,
    frontend: Frontend,
    led_exposure: [u16; 3],
    simulator: Option<SimCounters>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    if let Err(e) = run() {
        error!("Scan failed: {}", e);
        std::process::exit(1);
    }
    Ok(())
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let loaded = args.config.as_deref().map(ScannerConfig::load).transpose();
    let level = match &loaded {
        Ok(Some(config)) => config.shared.log_level,
        _ => LogLevel::default(),
    };
    setup_tracing(&args, level);

    info!("Scanner HAL v{} starting...", env!("CARGO_PKG_VERSION"));
    let config = match loaded? {
        Some(config) => {
            info!("Loaded config from {:?}", args.config);
            config
        }
        None => ScannerConfig::for_model("cis-flatbed"),
    };
    // ScannerCore validates the configuration with the overrides applied.
    let config = apply_overrides(config, &args);

    if !args.simulate {
        return Err("no hardware transport is available, run with --simulate".into());
    }
    info!("Simulation mode enabled");
    let sim = SimulatedScanner::new(find_model(&config.model)?);

    let mut core = ScannerCore::new(config, sim.transport())?;
    core.init()?;

    let params = scan_params(&args);
    let mut sink = CollectingSink::default();
    let session = core.scan(&params, &mut sink)?;
    core.park()?;

    let data = sink.buffers.concat();
    if let Some(path) = &args.output {
        std::fs::write(path, &data)?;
        info!("Wrote {} bytes to {:?}", data.len(), path);
    }

    let device = core.device();
    let report = ScanReport {
        model: device.model.name.to_string(),
        session,
        bytes: data.len(),
        head_position: device.scanhead_position_in_steps,
        frontend: device.frontend,
        led_exposure: device.led_exposure,
        simulator: Some(sim.counters()),
    };
    let json = serde_json::to_string_pretty(&report)?;
    match &args.report {
        Some(path) => std::fs::write(path, json)?,
        None => println!("{json}"),
    }

    info!("Scanner HAL shutdown complete");
    Ok(())
}

/// Apply the command line switches that override the configuration file.
fn apply_overrides(mut config: ScannerConfig, args: &Args) -> ScannerConfig {
    if let Some(model) = &args.model {
        config.model = model.clone();
    }
    if args.force_calibration {
        config.calibration.force = true;
    }
    config
}

/// Scan request from the command line.
fn scan_params(args: &Args) -> ScanParams {
    let (scan_mode, channels) = match args.mode {
        Mode::Color => (ScanMode::Color, 3),
        Mode::Gray => (ScanMode::Gray, 1),
        Mode::Lineart => (ScanMode::Lineart, 1),
    };
    ScanParams {
        xres: args.xres,
        yres: args.yres.unwrap_or(args.xres),
        startx: 0,
        starty: 0,
        pixels: args.pixels,
        lines: args.lines,
        depth: args.depth,
        channels,
        scan_mode,
        color_filter: ColorFilter::Green,
        ..ScanParams::default()
    }
}

/// Setup tracing subscriber from the configured level and CLI arguments.
///
/// `-v` raises the level to DEBUG; `RUST_LOG` directives still apply.
fn setup_tracing(args: &Args, level: LogLevel) {
    let directive = level.with_verbose(args.verbose).as_directive();

    let filter = EnvFilter::from_default_env().add_directive(
        directive
            .parse()
            .unwrap_or_else(|_| Level::INFO.into()),
    );

    if args.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scan_common::hal::config::TimingConfig;

    #[test]
    fn test_model_override_is_validated_after_applying() {
        let args = Args::try_parse_from(["scan_hal", "-s", "--model", "ccd-flatbed"]).unwrap();
        let mut from_file = ScannerConfig::for_model("");
        from_file.timing = TimingConfig::immediate();
        assert!(from_file.validate().is_err());

        let config = apply_overrides(from_file, &args);
        assert_eq!(config.model, "ccd-flatbed");
        let sim = SimulatedScanner::new(find_model("ccd-flatbed").unwrap());
        let core = ScannerCore::new(config, sim.transport()).unwrap();
        assert_eq!(core.device().model.name, "ccd-flatbed");
    }

    #[test]
    fn test_force_calibration_switch() {
        let args = Args::try_parse_from(["scan_hal", "-s", "--force-calibration"]).unwrap();
        let config = apply_overrides(ScannerConfig::for_model("cis-flatbed"), &args);
        assert!(config.calibration.force);
        assert_eq!(config.model, "cis-flatbed");
    }
}
