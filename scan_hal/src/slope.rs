//! Motor slope tables and ramp arithmetic.
//!
//! A slope table is the sequence of per-step pulse periods the ASIC walks
//! through while accelerating. It is built from a motor profile: entries are
//! copied until the profile gets faster than the requested speed, the
//! requested speed is appended, and the table is padded so its length is a
//! multiple of the step multiplier.

use heapless::Vec as HVec;
use scan_common::hal::consts::SLOPE_TABLE_SIZE;
use scan_common::hal::error::{ScanError, ScanResult};
use scan_common::hal::model::{MotorId, MotorProfile};
use scan_common::hal::types::StepType;

use crate::profiles::find_motor_profile;

/// Entries of one slope table, bounded by the ASIC table memory.
pub type SlopeEntries = HVec<u16, SLOPE_TABLE_SIZE>;

/// A motor acceleration table ready to be written to the ASIC.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlopeTable {
    /// Speed codes, slowest first.
    pub table: SlopeEntries,
    /// Table length divided by the step multiplier.
    pub steps_count: u32,
    /// Sum of every entry, in pixel clocks.
    pub pixeltime_sum: u64,
}

impl SlopeTable {
    /// Number of entries.
    pub fn len(&self) -> usize {
        self.table.len()
    }

    /// Whether the table holds no entry.
    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Final (fastest) speed code.
    pub fn last(&self) -> u16 {
        self.table.last().copied().unwrap_or(0)
    }

    /// Replace the first entry.
    pub fn set_first(&mut self, value: u16) {
        if let Some(first) = self.table.first_mut() {
            *first = value;
        }
    }

    /// Little-endian byte image written to ASIC memory.
    pub fn to_bytes(&self) -> Vec<u8> {
        self.table.iter().flat_map(|v| v.to_le_bytes()).collect()
    }

    fn push(&mut self, value: u16) -> ScanResult<()> {
        self.table.push(value).map_err(|_| {
            ScanError::InvalidParameters(format!(
                "slope table exceeds {SLOPE_TABLE_SIZE} entries"
            ))
        })
    }
}

/// Build the acceleration table reaching the speed of `target_dpi`.
///
/// `multiplier` is the number of table entries consumed per step
/// (STEPTIM setting of the ASIC).
///
/// # Errors
/// - `InvalidParameters` if the target speed is zero or exceeds 16 bits
/// - `ProfileNotFound` if the motor has no profile for `exposure`
pub fn build_slope_table(
    target_dpi: u32,
    exposure: u32,
    base_dpi: u32,
    step_type: StepType,
    multiplier: u32,
    motor_id: MotorId,
    profiles: &[MotorProfile],
) -> ScanResult<SlopeTable> {
    if multiplier == 0 || base_dpi == 0 {
        return Err(ScanError::InvalidParameters(format!(
            "slope multiplier {multiplier} and base dpi {base_dpi} must be non-zero"
        )));
    }

    let shift = step_type.shift();
    let target = (exposure as u64 * target_dpi as u64 / base_dpi as u64) >> shift;
    if target == 0 || target > u16::MAX as u64 {
        return Err(ScanError::InvalidParameters(format!(
            "speed code {target} for {target_dpi} dpi at exposure {exposure} is out of range"
        )));
    }

    let profile = find_motor_profile(profiles, motor_id, exposure)?;
    let fastest = profile.table.last().map(|v| *v >> shift).unwrap_or(0);
    let final_speed = (target as u16).max(fastest).max(1);

    let mut slope = SlopeTable {
        table: SlopeEntries::new(),
        steps_count: 0,
        pixeltime_sum: 0,
    };

    for (i, raw) in profile.table.iter().enumerate() {
        if slope.len() >= SLOPE_TABLE_SIZE - 1 {
            break;
        }
        let current = if i == 0 { *raw } else { *raw >> shift };
        if current <= final_speed {
            break;
        }
        slope.push(current)?;
    }
    slope.push(final_speed)?;

    let alignment = multiplier as usize;
    while slope.len() % alignment != 0 || slope.len() < 2 * alignment {
        slope.push(slope.last())?;
    }

    slope.steps_count = (slope.len() / alignment) as u32;
    slope.pixeltime_sum = slope.table.iter().map(|v| *v as u64).sum();
    Ok(slope)
}

/// Feed length left once the ramps are accounted for.
///
/// Moves shorter than their ramps become pure ramp moves with no
/// constant-speed segment.
pub fn corrected_feed_length(feed_steps: u32, ramp_steps: u32) -> u32 {
    feed_steps.saturating_sub(ramp_steps)
}

/// Distance covered by acceleration and deceleration, in table entries.
///
/// A fast-fed move accelerates with the scan table, runs the fast table up
/// and down, then waits for the DECSEL and FEDCNT counters.
pub fn ramp_distance(
    scan_steps: u32,
    fast_steps: u32,
    multiplier: u32,
    use_fast_fed: bool,
    feeding: bool,
    decsel: u32,
    fedcnt: u32,
) -> u32 {
    if use_fast_fed {
        (scan_steps + 2 * fast_steps) * multiplier + decsel + fedcnt
    } else {
        let dist = scan_steps * multiplier;
        if feeding { dist * 2 } else { dist }
    }
}

/// Z1MOD / Z2MOD phase codes.
///
/// Both are the remainder of the elapsed pulse time at the end of the
/// acceleration, modulo the effective line period.
pub fn calculate_zmod(
    two_table: bool,
    exposure_time: u32,
    table: &[u16],
    acceleration_steps: u32,
    move_steps: u32,
    buffer_acceleration_steps: u32,
) -> (u32, u32) {
    if table.is_empty() {
        return (0, 0);
    }
    let accel = (acceleration_steps as usize).clamp(1, table.len());
    let exposure = exposure_time.max(1) as u64;
    let sum: u64 = table[..accel].iter().map(|v| *v as u64).sum();
    let last = table[accel - 1] as u64;

    let z1 = (sum + buffer_acceleration_steps as u64 * last) % exposure;
    let z2 = if two_table {
        (sum + last) % exposure
    } else {
        (sum + move_steps as u64 * last) % exposure
    };
    (z1 as u32, z2 as u32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profiles::{SLOPE_FAST, find_model};
    use proptest::prelude::*;

    fn cis_profiles() -> Vec<MotorProfile> {
        find_model("cis-flatbed").unwrap().motor.profiles
    }

    #[test]
    fn test_table_stops_at_target_speed() {
        let profiles = cis_profiles();
        let slope =
            build_slope_table(300, 11000, 1200, StepType::Half, 4, MotorId::CisA4, &profiles)
                .unwrap();

        // 11000 * 300 / 1200 >> 1
        let target = 1375;
        assert_eq!(slope.table[0], SLOPE_FAST[0]);
        assert!(slope.table.iter().all(|v| *v >= target));
        assert!(slope.table.contains(&target));
        assert_eq!(slope.last(), target);
        assert_eq!(slope.len() % 4, 0);
        assert_eq!(slope.steps_count as usize, slope.len() / 4);
        assert!(slope.table.windows(2).all(|w| w[0] >= w[1]));
    }

    #[test]
    fn test_table_never_exceeds_motor_top_speed() {
        let profiles = cis_profiles();
        let slope =
            build_slope_table(75, 11000, 1200, StepType::Half, 1, MotorId::CisA4, &profiles)
                .unwrap();
        // 11000 * 75 / 1200 >> 1 = 343, the motor tops out at 400 >> 1
        assert_eq!(slope.last(), 343);

        let slope =
            build_slope_table(10, 11000, 1200, StepType::Half, 1, MotorId::CisA4, &profiles)
                .unwrap();
        assert_eq!(slope.last(), 200);
        assert!(slope.table.iter().all(|v| *v > 0));
    }

    #[test]
    fn test_short_table_is_padded() {
        let profiles = cis_profiles();
        // target slower than the first entry: only the target remains
        let slope =
            build_slope_table(1200, 22000, 1000, StepType::Full, 8, MotorId::CisA4, &profiles)
                .unwrap();
        assert_eq!(slope.len(), 16);
        assert!(slope.table.iter().all(|v| *v == 26400));
        assert_eq!(slope.steps_count, 2);
        assert_eq!(slope.pixeltime_sum, 16 * 26400);
        assert_eq!(slope.to_bytes().len(), 32);
    }

    #[test]
    fn test_out_of_range_targets() {
        let profiles = cis_profiles();
        assert!(matches!(
            build_slope_table(1, 100, 1200, StepType::Full, 1, MotorId::CisA4, &profiles),
            Err(ScanError::InvalidParameters(_))
        ));
        assert!(matches!(
            build_slope_table(4800, 22000, 1200, StepType::Full, 1, MotorId::CisA4, &profiles),
            Err(ScanError::InvalidParameters(_))
        ));
        assert!(matches!(
            build_slope_table(300, 50000, 1200, StepType::Half, 1, MotorId::CisA4, &profiles),
            Err(ScanError::ProfileNotFound(_))
        ));
    }

    #[test]
    fn test_ramp_distance() {
        assert_eq!(ramp_distance(10, 20, 2, true, false, 4, 6), (10 + 40) * 2 + 10);
        assert_eq!(ramp_distance(10, 20, 2, false, false, 4, 6), 20);
        assert_eq!(ramp_distance(10, 20, 2, false, true, 4, 6), 40);
    }

    #[test]
    fn test_zmod() {
        let table = [1000u16, 800, 600, 500];
        // sum = 2900, last = 500
        assert_eq!(calculate_zmod(false, 1100, &table, 4, 3, 2), (3900 % 1100, 4400 % 1100));
        assert_eq!(calculate_zmod(true, 1100, &table, 4, 3, 2).1, 3400 % 1100);
        assert_eq!(calculate_zmod(true, 1100, &[], 4, 3, 2), (0, 0));
    }

    proptest! {
        #[test]
        fn prop_feed_length_never_underflows(feed in any::<u32>(), ramp in any::<u32>()) {
            let corrected = corrected_feed_length(feed, ramp);
            if feed < ramp {
                prop_assert_eq!(corrected, 0);
            } else {
                prop_assert_eq!(corrected, feed - ramp);
            }
        }

        #[test]
        fn prop_zmod_below_exposure(exposure in 1u32..60000, accel in 0u32..200, moves in 0u32..5000) {
            let (z1, z2) = calculate_zmod(false, exposure, &SLOPE_FAST, accel, moves, moves);
            prop_assert!(z1 < exposure && z2 < exposure);
        }
    }
}
