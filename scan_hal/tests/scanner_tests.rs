//! End-to-end tests against the simulated scanner.
//!
//! Every test attaches a fresh simulator with zero poll intervals, so the
//! bounded polling loops run at full speed and time advances only through
//! status reads.

use scan_common::hal::config::{ScannerConfig, TimingConfig};
use scan_common::hal::error::ScanError;
use scan_common::hal::transport::CollectingSink;
use scan_common::hal::types::{
    ColorFilter, Direction, MotionState, ScanFlags, ScanMode, ScanParams, StripColor,
};
use scan_hal::ScannerCore;
use scan_hal::command_set::{CommandSet, FrontendAction};
use scan_hal::device::Device;
use scan_hal::drivers::gl846::Gl846;
use scan_hal::drivers::gl846::registers::*;
use scan_hal::profiles::find_model;
use scan_hal::simulation::{SimFault, SimLayout, SimulatedScanner};

fn attach(model: &str, layout: SimLayout) -> (ScannerCore, SimulatedScanner) {
    let mut config = ScannerConfig::for_model(model);
    config.timing = TimingConfig::immediate();
    let sim = SimulatedScanner::new(find_model(model).unwrap()).with_layout(layout);
    let core = ScannerCore::new(config, sim.transport()).unwrap();
    (core, sim)
}

fn ready(model: &str) -> (ScannerCore, SimulatedScanner) {
    let (mut core, sim) = attach(model, SimLayout::default());
    core.init().unwrap();
    (core, sim)
}

fn bare_device(model: &str) -> (Device, SimulatedScanner) {
    let model = find_model(model).unwrap();
    let sim = SimulatedScanner::new(model.clone());
    let mut dev = Device::new(model, sim.transport(), TimingConfig::immediate(), REGISTER_PORT);
    Gl846.init_registers(&mut dev);
    Gl846.boot(&mut dev, true).unwrap();
    (dev, sim)
}

fn color_300() -> ScanParams {
    ScanParams {
        xres: 300,
        yres: 300,
        pixels: 600,
        lines: 600,
        depth: 8,
        channels: 3,
        scan_mode: ScanMode::Color,
        ..ScanParams::default()
    }
}

// ─── Scan ───────────────────────────────────────────────────────────

#[test]
fn test_unshaded_scan_programs_the_window() {
    let (mut core, sim) = ready("cis-flatbed");
    let params = ScanParams {
        flags: ScanFlags::DISABLE_SHADING,
        ..color_300()
    };

    let mut sink = CollectingSink::default();
    let session = core.scan(&params, &mut sink).unwrap();

    assert_eq!(sink.buffers.len(), 1);
    assert_eq!(sink.buffers[0].len(), 600 * 600 * 3);
    assert_eq!(session.output_total_bytes_raw as usize, sink.buffers[0].len());

    assert_eq!(sim.register_wide(REG_DPISET, 2), 600);
    assert_eq!(sim.register_wide(REG_STRPIXEL, 2), 20);
    assert_eq!(sim.register_wide(REG_ENDPIXEL, 2), 620);
    assert_eq!(sim.register_wide(REG_MAXWD, 3), 1800);
    assert_eq!(sim.register_wide(REG_LINCNT, 3), 600);
    assert_eq!(sim.register_wide(REG_LPERIOD, 2), 11000);
    assert_eq!(sim.register(REG_0X05) & REG_0X05_DPIHW, REG_0X05_DPIHW_600);
    assert_eq!(sim.register(REG_0X01) & REG_0X01_SCAN, 0);
    assert_eq!(sim.register(REG_0X01) & REG_0X01_DVDSET, 0);

    // y_offset plus 600 lines at 300 dpi on a 1200 dpi motor
    assert_eq!(core.device().scanhead_position_in_steps, 3000);
    assert_eq!(sim.head_position(), 3000);
    assert_eq!(sim.pending_bytes(), 0);
}

#[test]
fn test_shaded_scan_calibrates_first() {
    let (mut core, sim) = ready("cis-flatbed");
    let mut sink = CollectingSink::default();
    core.scan(&color_300(), &mut sink).unwrap();

    let entry = core.device().calibration.clone().unwrap();
    assert_eq!((entry.hw_dpi, entry.calib_xres), (600, 300));
    assert_ne!(sim.register(REG_0X01) & REG_0X01_DVDSET, 0);

    let bank = sim.register(REG_SHADING_BANKS[0]) as u32;
    let uploaded = sim
        .memory(scan_common::hal::consts::SHADING_BASE + bank * 0x2000)
        .unwrap();
    assert_eq!(uploaded.len(), 600 * 4);

    // The document under the first line has light and dark stripes.
    let line = &sink.buffers[0][..600 * 3];
    assert!(line.iter().any(|&v| v > 180));
    assert!(line.iter().any(|&v| v < 40));

    // A second scan at the same resolution reuses the calibration.
    let starts = sim.counters().motor_starts;
    core.scan(&color_300(), &mut sink).unwrap();
    assert_eq!(sim.counters().motor_starts, starts + 2);
}

#[test]
fn test_gray_scan_on_ccd() {
    let (mut core, _sim) = ready("ccd-flatbed");
    let params = ScanParams {
        channels: 1,
        scan_mode: ScanMode::Gray,
        color_filter: ColorFilter::Red,
        depth: 16,
        pixels: 300,
        lines: 50,
        flags: ScanFlags::DISABLE_SHADING,
        ..color_300()
    };
    let mut sink = CollectingSink::default();
    let session = core.scan(&params, &mut sink).unwrap();
    assert_eq!(sink.buffers[0].len(), 300 * 2 * 50);
    assert_eq!(session.output_line_count, 50);
}

#[test]
fn test_invalid_request_is_rejected() {
    let (mut core, _sim) = ready("cis-flatbed");
    let params = ScanParams {
        depth: 12,
        ..color_300()
    };
    let mut sink = CollectingSink::default();
    let err = core.scan(&params, &mut sink).unwrap_err();
    assert!(matches!(err, ScanError::InvalidParameters(_)));
    assert!(sink.buffers.is_empty());
}

// ─── Motion ─────────────────────────────────────────────────────────

#[test]
fn test_feed_and_park() {
    let (mut core, sim) = ready("cis-flatbed");
    core.feed(2000).unwrap();
    assert_eq!(core.device().scanhead_position_in_steps, 2000);
    assert_eq!(sim.head_position(), 2000);

    core.park().unwrap();
    assert_eq!(core.device().scanhead_position_in_steps, 0);
    assert_eq!(core.device().motion_state, MotionState::HomeReached);
    assert_eq!(sim.head_position(), 0);
}

#[test]
fn test_feed_beyond_travel() {
    let (mut core, _sim) = ready("cis-flatbed");
    let err = core.feed(20_000).unwrap_err();
    assert!(matches!(err, ScanError::InvalidParameters(_)));
}

#[test]
fn test_feed_stalled_times_out() {
    let (mut core, sim) = ready("cis-flatbed");
    sim.inject_fault(SimFault::FeedStalled);
    let err = core.feed(1000).unwrap_err();
    assert!(matches!(err, ScanError::HardwareTimeout(_)));
    assert_eq!(core.device().motion_state, MotionState::Timeout);
    assert_eq!(core.device().scanhead_position_in_steps, 0);
}

#[test]
fn test_home_sensor_dead_times_out() {
    let (mut core, sim) = ready("cis-flatbed");
    sim.set_head_position(3000);
    sim.inject_fault(SimFault::HomeSensorDead);
    sim.reset_counters();

    let err = core.park().unwrap_err();
    assert!(matches!(err, ScanError::HardwareTimeout(_)));
    assert_eq!(core.device().motion_state, MotionState::Timeout);
    // initial read, every home poll, then the recovery stop
    assert!(sim.counters().status_polls > 300);
}

#[test]
fn test_home_timeout_survives_failed_recovery() {
    let (mut core, sim) = ready("cis-flatbed");
    sim.set_head_position(3000);
    sim.inject_fault(SimFault::HomeSensorDead);
    sim.inject_fault(SimFault::MotorStuck);

    // The recovery stop times out as well; the home timeout is reported.
    match core.park() {
        Err(ScanError::HardwareTimeout(message)) => {
            assert_eq!(message, "home sensor not reached after 300 polls");
        }
        other => panic!("unexpected park result: {other:?}"),
    }
    assert_eq!(core.device().motion_state, MotionState::Timeout);
}

#[test]
fn test_init_homes_parked_head() {
    let (mut core, sim) = attach("ccd-flatbed", SimLayout::default());
    sim.set_head_position(4500);
    core.init().unwrap();
    assert_eq!(sim.head_position(), 0);
    assert_eq!(core.device().motion_state, MotionState::HomeReached);
}

#[test]
fn test_stop_times_out_after_exactly_ten_polls() {
    let (mut dev, sim) = bare_device("cis-flatbed");
    sim.inject_fault(SimFault::MotorStuck);
    Gl846.start_action(&mut dev).unwrap();
    assert_eq!(dev.motion_state, MotionState::Moving);

    sim.reset_counters();
    let err = Gl846.stop_action(&mut dev).unwrap_err();
    assert!(matches!(err, ScanError::HardwareTimeout(_)));
    assert_eq!(dev.motion_state, MotionState::Timeout);
    // busy check, then STOP_POLL_COUNT polls
    assert_eq!(sim.counters().status_polls, 11);
}

#[test]
fn test_stop_when_idle_is_a_no_op() {
    let (mut dev, sim) = bare_device("cis-flatbed");
    sim.reset_counters();
    Gl846.stop_action(&mut dev).unwrap();
    assert_eq!(sim.counters().status_polls, 1);
    assert_eq!(sim.counters().register_writes, 0);
}

#[test]
fn test_data_starved_scan_times_out() {
    let (mut core, sim) = ready("cis-flatbed");
    sim.inject_fault(SimFault::DataStarved);
    let params = ScanParams {
        flags: ScanFlags::DISABLE_SHADING,
        lines: 10,
        ..color_300()
    };
    let mut sink = CollectingSink::default();
    let err = core.scan(&params, &mut sink).unwrap_err();
    assert!(matches!(err, ScanError::HardwareTimeout(_)));
    assert!(sink.buffers.is_empty());
    assert_eq!(sim.register(REG_0X01) & REG_0X01_SCAN, 0);
}

// ─── Strip search ───────────────────────────────────────────────────

#[test]
fn test_black_strip_found_forward() {
    let (mut core, sim) = ready("cis-flatbed");
    core.calibrate(&color_300()).unwrap();
    core.locate_strip(Direction::Forward, StripColor::Black).unwrap();
    assert!(sim.head_position() >= 300);
    assert_eq!(core.device().scanhead_position_in_steps, sim.head_position());
}

#[test]
fn test_black_strip_found_backward() {
    let layout = SimLayout {
        black_strip: Some((300, 2000)),
        ..SimLayout::default()
    };
    let (mut core, sim) = attach("cis-flatbed", layout);
    core.init().unwrap();
    core.calibrate(&color_300()).unwrap();
    core.feed(3500).unwrap();

    core.locate_strip(Direction::Backward, StripColor::Black).unwrap();
    let head = sim.head_position();
    assert!(head > 300 && head < 2000, "head at {head}");
    assert_eq!(core.device().scanhead_position_in_steps, head);
}

#[test]
fn test_tracked_head_follows_strip_passes() {
    let (mut core, sim) = ready("cis-flatbed");
    core.calibrate(&color_300()).unwrap();
    core.feed(3000).unwrap();

    // Every pass starts with a ramp longer than its zero feed length.
    let err = core
        .locate_strip(Direction::Forward, StripColor::White)
        .unwrap_err();
    assert!(matches!(err, ScanError::CalibrationTargetNotFound(_)));
    assert!(sim.head_position() > 3000);
    assert_eq!(core.device().scanhead_position_in_steps, sim.head_position());
}

#[test]
fn test_missing_strip_is_reported() {
    let (mut core, _sim) = attach("cis-flatbed", SimLayout::without_black_strip());
    core.init().unwrap();
    core.calibrate(&color_300()).unwrap();
    let err = core
        .locate_strip(Direction::Forward, StripColor::Black)
        .unwrap_err();
    assert!(matches!(err, ScanError::CalibrationTargetNotFound(_)));
}

// ─── Bring-up and frontend ──────────────────────────────────────────

#[test]
fn test_boot_writes_frontend() {
    let (dev, sim) = bare_device("cis-flatbed");
    assert_eq!(sim.counters().resets, 2);
    assert_ne!(sim.register(REG_0X0B) & REG_0X0B_ENBDRAM, 0);
    for channel in 0..3u8 {
        assert_eq!(
            sim.afe_register(FE_OFFSET_BASE + channel),
            dev.frontend.offset[channel as usize]
        );
        assert_eq!(
            sim.afe_register(FE_GAIN_BASE + channel),
            dev.frontend.gain[channel as usize]
        );
    }
}

#[test]
fn test_warm_scanner_is_not_reset() {
    let (mut dev, sim) = bare_device("cis-flatbed");
    assert!(!Gl846.is_cold(&mut dev).unwrap());
    Gl846.boot(&mut dev, false).unwrap();
    assert_eq!(sim.counters().resets, 2);
}

#[test]
fn test_unsupported_frontend_type() {
    let (mut dev, _sim) = bare_device("cis-flatbed");
    dev.reg.set_masked(REG_0X04, REG_0X04_FESET, 0x01);
    let err = Gl846.set_fe(&mut dev, FrontendAction::Set).unwrap_err();
    assert!(matches!(err, ScanError::UnsupportedConfiguration(_)));
}

#[test]
fn test_transport_failure_surfaces() {
    let (mut core, sim) = attach("cis-flatbed", SimLayout::default());
    sim.inject_fault(SimFault::TransportFailure);
    let err = core.init().unwrap_err();
    assert!(matches!(err, ScanError::Transport(_)));
}
