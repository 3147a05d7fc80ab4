//! Calibration sequences against the simulated scanner.

use scan_common::hal::config::{ScannerConfig, TimingConfig};
use scan_common::hal::types::{ScanMode, ScanParams};
use scan_hal::ScannerCore;
use scan_hal::drivers::gl846::registers::{FE_GAIN_BASE, FE_OFFSET_BASE};
use scan_hal::profiles::find_model;
use scan_hal::simulation::SimulatedScanner;
use std::path::Path;
use tempfile::TempDir;

fn attach(config: ScannerConfig) -> (ScannerCore, SimulatedScanner) {
    let sim = SimulatedScanner::new(find_model(&config.model).unwrap());
    let mut core = ScannerCore::new(config, sim.transport()).unwrap();
    core.init().unwrap();
    sim.reset_counters();
    (core, sim)
}

fn config(model: &str, cache: Option<&Path>) -> ScannerConfig {
    let mut config = ScannerConfig::for_model(model);
    config.timing = TimingConfig::immediate();
    config.calibration.cache_file = cache.map(Path::to_path_buf);
    config
}

fn color(xres: u32) -> ScanParams {
    ScanParams {
        xres,
        yres: xres,
        pixels: 600,
        lines: 100,
        depth: 8,
        channels: 3,
        scan_mode: ScanMode::Color,
        ..ScanParams::default()
    }
}

fn assert_frontend_committed(core: &ScannerCore, sim: &SimulatedScanner) {
    let frontend = core.device().frontend;
    for channel in 0..3u8 {
        let i = channel as usize;
        assert_eq!(sim.afe_register(FE_OFFSET_BASE + channel), frontend.offset[i]);
        assert_eq!(sim.afe_register(FE_GAIN_BASE + channel), frontend.gain[i]);
    }
}

#[test]
fn test_cis_full_calibration() {
    let (mut core, sim) = attach(config("cis-flatbed", None));
    core.calibrate(&color(300)).unwrap();

    let entry = core.device().calibration.clone().unwrap();
    assert_eq!(entry.model, "cis-flatbed");
    assert_eq!((entry.hw_dpi, entry.calib_xres), (600, 300));
    assert_eq!(entry.shading.channels, 3);
    assert_eq!(entry.shading.pixels, 2550);
    assert_eq!(entry.shading.data.len(), 2550 * 3 * 4);
    assert_eq!(entry.led_exposure, core.device().led_exposure);
    assert!(entry.led_exposure.iter().all(|&e| e > 0));

    // The dark level is pulled up into the converter range, not clipped.
    assert!(entry.frontend.offset.iter().all(|&o| o > 0 && o < 0xff));
    assert!(entry.frontend.gain.iter().all(|&g| g > 0));
    assert_frontend_committed(&core, &sim);

    // Shading reparks the head.
    assert_eq!(sim.head_position(), 0);
    assert_eq!(core.device().scanhead_position_in_steps, 0);
    assert!(core.device().calib_reg.is_some());
}

#[test]
fn test_ccd_full_calibration() {
    let (mut core, sim) = attach(config("ccd-flatbed", None));
    core.calibrate(&color(600)).unwrap();

    let entry = core.device().calibration.clone().unwrap();
    assert_eq!((entry.hw_dpi, entry.calib_xres), (600, 600));
    assert_eq!(entry.shading.pixels, 5100);
    assert!(entry.frontend.gain.iter().all(|&g| g > 0));
    assert_frontend_committed(&core, &sim);
    assert_eq!(sim.head_position(), 0);
}

#[test]
fn test_shading_coefficients_are_within_range() {
    let (mut core, _sim) = attach(config("cis-flatbed", None));
    core.calibrate(&color(300)).unwrap();
    let shading = core.device().calibration.clone().unwrap().shading;

    // A white reference below the shading target needs a coefficient above
    // unity. The masked margin at the left edge is skipped.
    for channel in 0..shading.channels {
        for pixel in 24..shading.pixels {
            let (dark, coefficient) = shading.entry(channel, pixel);
            assert!(dark > 0);
            assert!(coefficient > 0x2000, "channel {channel} pixel {pixel}");
        }
    }
}

#[test]
fn test_cache_round_trip() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("cache").join("calibration.bin");

    let (mut first, _) = attach(config("cis-flatbed", Some(&path)));
    first.calibrate(&color(300)).unwrap();
    assert!(path.exists());
    let calibrated = first.device().calibration.clone().unwrap();

    let (mut second, sim) = attach(config("cis-flatbed", Some(&path)));
    assert_eq!(second.cache().unwrap().entries().len(), 1);
    second.calibrate(&color(300)).unwrap();

    // The cached result is applied without moving the head.
    assert_eq!(sim.counters().motor_starts, 0);
    assert_eq!(second.device().calibration.as_ref(), Some(&calibrated));
    assert_eq!(second.device().frontend, calibrated.frontend);
    assert_frontend_committed(&second, &sim);
}

#[test]
fn test_cache_miss_on_other_resolution() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("calibration.bin");

    let (mut first, _) = attach(config("cis-flatbed", Some(&path)));
    first.calibrate(&color(300)).unwrap();

    let (mut second, sim) = attach(config("cis-flatbed", Some(&path)));
    second.calibrate(&color(600)).unwrap();
    assert!(sim.counters().motor_starts > 0);
    assert_eq!(second.cache().unwrap().entries().len(), 2);
}

#[test]
fn test_force_recalibrates() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("calibration.bin");

    let (mut first, _) = attach(config("cis-flatbed", Some(&path)));
    first.calibrate(&color(300)).unwrap();

    let mut forced = config("cis-flatbed", Some(&path));
    forced.calibration.force = true;
    let (mut second, sim) = attach(forced);
    second.calibrate(&color(300)).unwrap();
    assert!(sim.counters().motor_starts > 0);
    assert_eq!(second.cache().unwrap().entries().len(), 1);
}

#[test]
fn test_corrupt_cache_is_ignored() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("calibration.bin");
    std::fs::write(&path, b"not a cache").unwrap();

    let (mut core, sim) = attach(config("cis-flatbed", Some(&path)));
    assert!(core.cache().unwrap().entries().is_empty());
    core.calibrate(&color(300)).unwrap();
    assert!(sim.counters().motor_starts > 0);
}
