//! Static model, sensor and motor tables.
//!
//! Lookups fail with `ProfileNotFound` instead of falling back to a
//! default: a wrong profile drives the motor at the wrong speed.

use scan_common::hal::error::{ScanError, ScanResult};
use scan_common::hal::model::{
    Frontend, FrontendType, ModelDescriptor, ModelFlags, MotorConfig, MotorId, MotorProfile,
    SensorConfig, SensorId, SensorProfile,
};
use scan_common::hal::types::StepType;

/// Acceleration ramp tuned for short exposures, full step speed codes.
pub static SLOPE_FAST: [u16; 97] = [
    12000, 11373, 10780, 10219, 9689, 9187, 8712, 8263, 7838, 7436, 7056, 6696, 6356, 6034, 5729,
    5441, 5169, 4911, 4667, 4437, 4219, 4012, 3817, 3632, 3458, 3292, 3136, 2988, 2848, 2716, 2591,
    2473, 2361, 2255, 2154, 2060, 1970, 1885, 1805, 1729, 1657, 1589, 1525, 1464, 1407, 1352, 1301,
    1252, 1206, 1162, 1121, 1082, 1045, 1011, 978, 946, 917, 889, 862, 837, 814, 791, 770, 750, 731,
    713, 697, 680, 665, 651, 637, 625, 612, 601, 590, 580, 570, 561, 552, 544, 536, 529, 522, 515,
    509, 503, 498, 492, 487, 483, 478, 474, 470, 466, 463, 459, 400,
];

/// Acceleration ramp tuned for long exposures, full step speed codes.
pub static SLOPE_SLOW: [u16; 65] = [
    24000, 22177, 20500, 18957, 17537, 16231, 15029, 13923, 12906, 11970, 11109, 10317, 9588, 8917,
    8300, 7732, 7210, 6729, 6287, 5881, 5506, 5162, 4845, 4554, 4286, 4039, 3812, 3603, 3411, 3234,
    3072, 2922, 2784, 2658, 2541, 2434, 2335, 2244, 2161, 2084, 2013, 1948, 1889, 1833, 1783, 1736,
    1693, 1654, 1618, 1584, 1553, 1525, 1499, 1475, 1453, 1433, 1414, 1397, 1381, 1367, 1354, 1341,
    1330, 1320, 1200,
];

/// Names of every known model.
pub const MODEL_NAMES: [&str; 2] = ["cis-flatbed", "ccd-flatbed"];

fn cis_flatbed() -> ModelDescriptor {
    ModelDescriptor {
        name: "cis-flatbed",
        vendor: "Generic",
        asic: "gl846",
        is_cis: true,
        xdpi_values: vec![75, 150, 300, 600, 1200],
        ydpi_values: vec![75, 150, 300, 600, 1200],
        x_offset: 160,
        y_offset: 600,
        y_offset_calib_white: 0,
        ld_shift: [0, 0, 0],
        shading_lines: 8,
        max_travel_steps: 14000,
        flags: ModelFlags::OFFSET_CALIBRATION
            | ModelFlags::LED_CALIBRATION
            | ModelFlags::SHADING_REPARK,
        sensor: SensorConfig {
            sensor_id: SensorId::CisA4,
            optical_res: 2400,
            ccd_pixels_per_system_pixel: 2,
            black_pixels: 96,
            dummy_pixel: 20,
            ccd_start_xoffset: 0,
            sensor_pixels: 20400,
            gain_white_ref: 160,
            exposure: [8000, 8000, 8000],
            half_ccd_mode: false,
            stagger_lines: 0,
            profiles: vec![
                SensorProfile {
                    dpihw: 600,
                    exposure_lperiod: 11000,
                    segment_count: 1,
                    custom_regs: vec![(0x1c, 0x01), (0x74, 0x00), (0x75, 0x01)],
                },
                SensorProfile {
                    dpihw: 1200,
                    exposure_lperiod: 11000,
                    segment_count: 1,
                    custom_regs: vec![(0x1c, 0x01), (0x74, 0x00), (0x75, 0x03)],
                },
                SensorProfile {
                    dpihw: 2400,
                    exposure_lperiod: 22000,
                    segment_count: 1,
                    custom_regs: vec![(0x1c, 0x02), (0x74, 0x00), (0x75, 0x0f)],
                },
            ],
        },
        motor: MotorConfig {
            motor_id: MotorId::CisA4,
            base_ydpi: 1200,
            fast_feed_threshold: 1200,
            profiles: vec![
                MotorProfile {
                    motor_id: MotorId::CisA4,
                    exposure: 11000,
                    step_type: StepType::Half,
                    table: &SLOPE_FAST,
                },
                MotorProfile {
                    motor_id: MotorId::CisA4,
                    exposure: 22000,
                    step_type: StepType::Quarter,
                    table: &SLOPE_SLOW,
                },
            ],
        },
        frontend: Frontend {
            fe_type: FrontendType::Wolfson,
            config: [0x00, 0x23, 0x24, 0x0f],
            gain: [0x00; 3],
            offset: [0x80; 3],
        },
    }
}

fn ccd_flatbed() -> ModelDescriptor {
    ModelDescriptor {
        name: "ccd-flatbed",
        vendor: "Generic",
        asic: "gl846",
        is_cis: false,
        xdpi_values: vec![75, 150, 300, 600, 1200],
        ydpi_values: vec![75, 150, 300, 600, 1200],
        x_offset: 120,
        y_offset: 900,
        y_offset_calib_white: 0,
        ld_shift: [0, 12, 24],
        shading_lines: 8,
        max_travel_steps: 14000,
        flags: ModelFlags::OFFSET_CALIBRATION
            | ModelFlags::DARK_CALIBRATION
            | ModelFlags::SEARCH_STRIP
            | ModelFlags::SHADING_REPARK,
        sensor: SensorConfig {
            sensor_id: SensorId::CcdA4,
            optical_res: 1200,
            ccd_pixels_per_system_pixel: 1,
            black_pixels: 48,
            dummy_pixel: 16,
            ccd_start_xoffset: 0,
            sensor_pixels: 10200,
            gain_white_ref: 160,
            exposure: [0, 0, 0],
            half_ccd_mode: false,
            stagger_lines: 4,
            profiles: vec![
                SensorProfile {
                    dpihw: 600,
                    exposure_lperiod: 11000,
                    segment_count: 1,
                    custom_regs: vec![(0x1c, 0x01), (0x74, 0x00), (0x75, 0x1c)],
                },
                SensorProfile {
                    dpihw: 1200,
                    exposure_lperiod: 16000,
                    segment_count: 1,
                    custom_regs: vec![(0x1c, 0x01), (0x74, 0x00), (0x75, 0x1c)],
                },
            ],
        },
        motor: MotorConfig {
            motor_id: MotorId::CcdA4,
            base_ydpi: 1200,
            fast_feed_threshold: 2400,
            profiles: vec![
                MotorProfile {
                    motor_id: MotorId::CcdA4,
                    exposure: 11000,
                    step_type: StepType::Half,
                    table: &SLOPE_FAST,
                },
                MotorProfile {
                    motor_id: MotorId::CcdA4,
                    exposure: 16000,
                    step_type: StepType::Quarter,
                    table: &SLOPE_SLOW,
                },
            ],
        },
        frontend: Frontend {
            fe_type: FrontendType::Wolfson,
            config: [0x00, 0x03, 0x24, 0x0f],
            gain: [0x00; 3],
            offset: [0x80; 3],
        },
    }
}

/// Look up a model by name.
pub fn find_model(name: &str) -> ScanResult<ModelDescriptor> {
    match name {
        "cis-flatbed" => Ok(cis_flatbed()),
        "ccd-flatbed" => Ok(ccd_flatbed()),
        other => Err(ScanError::ProfileNotFound(format!("unknown model '{other}'"))),
    }
}

/// Sensor timing for hardware resolution `dpihw`.
pub fn find_sensor_profile(sensor: &SensorConfig, dpihw: u32) -> ScanResult<&SensorProfile> {
    sensor
        .profiles
        .iter()
        .find(|p| p.dpihw == dpihw)
        .ok_or_else(|| {
            ScanError::ProfileNotFound(format!(
                "sensor {:?} has no profile for {dpihw} dpi",
                sensor.sensor_id
            ))
        })
}

/// Motor profile for `exposure`.
///
/// An exact exposure match wins. Otherwise the profile with the smallest
/// exposure at or above the requested one is used.
pub fn find_motor_profile(
    profiles: &[MotorProfile],
    motor_id: MotorId,
    exposure: u32,
) -> ScanResult<&MotorProfile> {
    let candidates = profiles.iter().filter(|p| p.motor_id == motor_id);

    if let Some(exact) = candidates.clone().find(|p| p.exposure == exposure) {
        return Ok(exact);
    }

    candidates
        .filter(|p| p.exposure >= exposure)
        .min_by_key(|p| p.exposure)
        .ok_or_else(|| {
            ScanError::ProfileNotFound(format!(
                "motor {motor_id:?} has no profile for exposure {exposure}"
            ))
        })
}
