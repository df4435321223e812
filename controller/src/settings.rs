//! Persistent machine settings and the numbered `$<n>=<v>` store.
//!
//! Field values are single precision, matching the persisted record;
//! kinematics widens them to `f64` through [`Settings::chain_config`].
//! Numbers are a compatibility surface shared with senders and must not be
//! reassigned.

use chain_math::{ChainConfig, ChainRouting};
use serde::{Deserialize, Serialize};

use crate::status::Status;
use crate::N_AXIS;

/// Bump when the persisted record layout changes.
pub const SETTINGS_VERSION: u8 = 10;

// Boolean settings packed into `Settings::flags`.
pub const BITFLAG_REPORT_INCHES: u8 = 1 << 0;
pub const BITFLAG_LASER_MODE: u8 = 1 << 1;
pub const BITFLAG_INVERT_ST_ENABLE: u8 = 1 << 2;
pub const BITFLAG_HARD_LIMIT_ENABLE: u8 = 1 << 3;
pub const BITFLAG_HOMING_ENABLE: u8 = 1 << 4;
pub const BITFLAG_SOFT_LIMIT_ENABLE: u8 = 1 << 5;
pub const BITFLAG_INVERT_LIMIT_PINS: u8 = 1 << 6;
pub const BITFLAG_INVERT_PROBE_PIN: u8 = 1 << 7;

/// Shortest step pulse the drivers accept, in microseconds.
const STEP_PULSE_MIN: f32 = 3.0;

/// The complete persistent settings record.
///
/// Mutated only from the main loop, through [`Settings::store_global`];
/// asynchronous readers observe individual fields at word granularity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// Step pulse width in microseconds ($0).
    pub pulse_microseconds: f32,
    /// Delay before the steppers are released after motion, in ms ($1).
    pub stepper_idle_lock_time: f32,
    /// Step signal polarity per axis ($2).
    pub step_invert_mask: u8,
    /// Direction signal polarity per axis ($3).
    pub dir_invert_mask: u8,
    /// Fields included in the periodic status report ($10).
    pub status_report_mask: u8,
    /// Cornering junction deviation in mm ($11).
    pub junction_deviation: f32,
    /// Arc interpolation tolerance in mm ($12).
    pub arc_tolerance: f32,
    /// Spindle speed bounds in RPM ($30/$31).
    pub rpm_max: f32,
    pub rpm_min: f32,
    /// Homing approach direction per axis ($23).
    pub homing_dir_mask: u8,
    /// Homing locate feed rate in mm/min ($24).
    pub homing_feed_rate: f32,
    /// Homing search seek rate in mm/min ($25).
    pub homing_seek_rate: f32,
    /// Limit-switch debounce in ms ($26).
    pub homing_debounce_delay: f32,
    /// Retraction off the switches after homing, in mm ($27).
    pub homing_pulloff: f32,
    /// Steps per mm per axis ($100-$102); strictly positive.
    pub steps_per_mm: [f32; N_AXIS],
    /// Maximum rate per axis in mm/min ($110-$112).
    pub max_rate: [f32; N_AXIS],
    /// Acceleration per axis, stored in mm/min^2 ($120-$122 enter mm/s^2).
    pub acceleration: [f32; N_AXIS],
    /// Travel per axis ($130-$132 enter positive, stored negative).
    pub max_travel: [f32; N_AXIS],
    /// Boolean settings, see the `BITFLAG_*` constants.
    pub flags: u8,

    // Hanging-sled extensions.
    /// Chain stretch in mm/mm/N ($45).
    pub chain_elongation_factor: f32,
    /// Sled weight in Newtons ($46).
    pub sled_weight: f32,
    /// Chain leaves the top (1) or bottom (0) of the sprockets ($80).
    pub chain_over_sprocket: f32,
    /// Work area width in mm ($81).
    pub machine_width: f32,
    /// Work area height in mm ($82).
    pub machine_height: f32,
    /// Distance between the motor sprockets in mm ($83).
    pub dist_between_motors: f32,
    /// Motor height above the top of the work area in mm ($84).
    pub motor_offset_y: f32,
    /// Calibration divisors for the simple kinematics ($85/$86).
    pub x_corr_scaling: f32,
    pub y_corr_scaling: f32,
    /// Legacy triangular sag correction coefficient ($87).
    pub chain_sag_correction: f32,
    /// Chain pitch error per side in percent ($88/$89).
    pub left_chain_tolerance: f32,
    pub right_chain_tolerance: f32,
    /// Virtual chain added by the sled rotation mechanism, in mm ($90).
    pub rotation_disk_radius: f32,
    /// Chain available per side in mm ($91).
    pub chain_length: f32,
    /// Upper Z travel bound in mm ($92); max_travel holds the lower bound.
    pub z_travel_min: f32,
    /// Use the sag-free forward kinematics (0/1, $93).
    pub simple_kinematics: f32,
    /// Chain lengths at the home position in mm ($94).
    pub home_chain_lengths: f32,
}

impl Default for Settings {
    /// Defaults for a nominal 8 x 4 ft top-routed machine, homing disabled.
    fn default() -> Self {
        Self {
            pulse_microseconds: 10.0,
            stepper_idle_lock_time: 25.0,
            step_invert_mask: 0,
            dir_invert_mask: 0,
            status_report_mask: 1,
            junction_deviation: 0.01,
            arc_tolerance: 0.002,
            rpm_max: 1000.0,
            rpm_min: 0.0,
            homing_dir_mask: 0,
            homing_feed_rate: 25.0,
            homing_seek_rate: 500.0,
            homing_debounce_delay: 250.0,
            homing_pulloff: 1.0,
            steps_per_mm: [127.9, 127.9, 472.5],
            max_rate: [700.0, 700.0, 200.0],
            acceleration: [10.0 * 60.0 * 60.0, 10.0 * 60.0 * 60.0, 10.0 * 60.0 * 60.0],
            max_travel: [-2438.4, -1219.2, -80.0],
            flags: 0,
            chain_elongation_factor: 0.0,
            sled_weight: 97.9,
            chain_over_sprocket: 1.0,
            machine_width: 2438.4,
            machine_height: 1219.2,
            dist_between_motors: 2978.4,
            motor_offset_y: 463.0,
            x_corr_scaling: 1.0,
            y_corr_scaling: 1.0,
            chain_sag_correction: 0.0,
            left_chain_tolerance: 0.0,
            right_chain_tolerance: 0.0,
            rotation_disk_radius: 139.0,
            chain_length: 3360.0,
            z_travel_min: 5.0,
            simple_kinematics: 0.0,
            home_chain_lengths: 1790.0,
        }
    }
}

impl Settings {
    pub fn homing_enabled(&self) -> bool {
        self.flags & BITFLAG_HOMING_ENABLE != 0
    }

    pub fn soft_limits_enabled(&self) -> bool {
        self.flags & BITFLAG_SOFT_LIMIT_ENABLE != 0
    }

    pub fn report_inches(&self) -> bool {
        self.flags & BITFLAG_REPORT_INCHES != 0
    }

    /// Kinematics view of the record, widened to double precision.
    pub fn chain_config(&self) -> ChainConfig {
        ChainConfig {
            dist_between_motors: f64::from(self.dist_between_motors),
            machine_height: f64::from(self.machine_height),
            motor_offset_y: f64::from(self.motor_offset_y),
            routing: ChainRouting::from_setting(f64::from(self.chain_over_sprocket)),
            sled_weight: f64::from(self.sled_weight),
            chain_elongation_factor: f64::from(self.chain_elongation_factor),
            left_chain_tolerance: f64::from(self.left_chain_tolerance),
            right_chain_tolerance: f64::from(self.right_chain_tolerance),
            rotation_disk_radius: f64::from(self.rotation_disk_radius),
            chain_length: f64::from(self.chain_length),
            x_corr_scaling: f64::from(self.x_corr_scaling),
            y_corr_scaling: f64::from(self.y_corr_scaling),
            simple_kinematics: self.simple_kinematics != 0.0,
        }
    }

    fn set_flag(&mut self, bit: u8, enable: bool) {
        if enable {
            self.flags |= bit;
        } else {
            self.flags &= !bit;
        }
    }

    /// Store numbered setting `key` = `value`.
    ///
    /// Applies the per-setting unit conversions and validity checks; the
    /// caller is responsible for persisting the record afterwards.
    pub fn store_global(&mut self, key: u8, value: f32) -> Status {
        if value < 0.0 {
            return Status::NegativeValue;
        }
        match key {
            0 => {
                if value < STEP_PULSE_MIN {
                    return Status::SettingStepPulseMin;
                }
                self.pulse_microseconds = value;
            }
            1 => self.stepper_idle_lock_time = value,
            2 => self.step_invert_mask = value as u8,
            3 => self.dir_invert_mask = value as u8,
            4 => self.set_flag(BITFLAG_INVERT_ST_ENABLE, value != 0.0),
            5 => self.set_flag(BITFLAG_INVERT_LIMIT_PINS, value != 0.0),
            6 => self.set_flag(BITFLAG_INVERT_PROBE_PIN, value != 0.0),
            10 => self.status_report_mask = value as u8,
            11 => self.junction_deviation = value,
            12 => self.arc_tolerance = value,
            13 => self.set_flag(BITFLAG_REPORT_INCHES, value != 0.0),
            20 => {
                // Soft limits need homing so machine zero is trustworthy.
                if value != 0.0 && !self.homing_enabled() {
                    return Status::SoftLimitError;
                }
                self.set_flag(BITFLAG_SOFT_LIMIT_ENABLE, value != 0.0);
            }
            21 => self.set_flag(BITFLAG_HARD_LIMIT_ENABLE, value != 0.0),
            22 => {
                self.set_flag(BITFLAG_HOMING_ENABLE, value != 0.0);
                if value == 0.0 {
                    self.set_flag(BITFLAG_SOFT_LIMIT_ENABLE, false);
                }
            }
            23 => self.homing_dir_mask = value as u8,
            24 => self.homing_feed_rate = value,
            25 => self.homing_seek_rate = value,
            26 => self.homing_debounce_delay = value,
            27 => self.homing_pulloff = value,
            30 => self.rpm_max = value,
            31 => self.rpm_min = value,
            32 => self.set_flag(BITFLAG_LASER_MODE, value != 0.0),
            45 => self.chain_elongation_factor = value,
            46 => self.sled_weight = value,
            80 => self.chain_over_sprocket = value,
            81 => self.machine_width = value,
            82 => self.machine_height = value,
            83 => {
                if value <= 0.0 {
                    return Status::NegativeValue;
                }
                self.dist_between_motors = value;
            }
            84 => self.motor_offset_y = value,
            85 => self.x_corr_scaling = value,
            86 => self.y_corr_scaling = value,
            87 => self.chain_sag_correction = value,
            88 => self.left_chain_tolerance = value,
            89 => self.right_chain_tolerance = value,
            90 => self.rotation_disk_radius = value,
            91 => self.chain_length = value,
            92 => self.z_travel_min = value,
            93 => self.simple_kinematics = value,
            94 => self.home_chain_lengths = value,
            100..=102 => {
                if value <= 0.0 {
                    return Status::NegativeValue;
                }
                self.steps_per_mm[(key - 100) as usize] = value;
            }
            110..=112 => self.max_rate[(key - 110) as usize] = value,
            120..=122 => {
                // Entered in mm/s^2, stored in mm/min^2 for the planner.
                self.acceleration[(key - 120) as usize] = value * 60.0 * 60.0;
            }
            130..=132 => {
                // Entered positive, stored negative.
                self.max_travel[(key - 130) as usize] = -value;
            }
            _ => return Status::InvalidStatement,
        }
        Status::Ok
    }
}
