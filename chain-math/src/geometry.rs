//! Machine geometry derived from the mutable machine settings.
//!
//! The motor anchor coordinates are a pure function of the settings and are
//! recomputed at the start of every kinematics call; nothing in this crate
//! caches them across calls.

use nalgebra::Vector2;

/// Effective radius of the motor-driven sprockets in mm.
///
/// Determines where the chain leaves the sprocket and how much chain is
/// wrapped around it.
pub const SPROCKET_RADIUS: f64 = 10.1;

/// Which side of the sprocket the chain leaves toward the sled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChainRouting {
    /// Chain leaves the bottom of the sprocket.
    Bottom,
    /// Chain leaves the top of the sprocket, concave toward the sled.
    #[default]
    Top,
}

impl ChainRouting {
    /// Decode the persisted setting value (`1` = top, anything else = bottom).
    pub fn from_setting(value: f64) -> Self {
        if value == 1.0 {
            ChainRouting::Top
        } else {
            ChainRouting::Bottom
        }
    }
}

/// Kinematics view of the machine settings, in mm / N where applicable.
///
/// The controller owns the persisted settings record; it hands a fresh
/// `ChainConfig` to every kinematics call so that setting changes take
/// effect immediately.
#[derive(Debug, Clone, PartialEq)]
pub struct ChainConfig {
    /// Horizontal distance between the two motor sprocket centres.
    pub dist_between_motors: f64,
    /// Height of the work area.
    pub machine_height: f64,
    /// Vertical distance from the top of the work area to the motors.
    pub motor_offset_y: f64,
    /// Chain routing over or under the sprockets.
    pub routing: ChainRouting,
    /// Sled weight in Newtons.
    pub sled_weight: f64,
    /// Chain stretch per Newton of tension, in mm/mm/N.
    pub chain_elongation_factor: f64,
    /// Left chain pitch error in percent.
    pub left_chain_tolerance: f64,
    /// Right chain pitch error in percent.
    pub right_chain_tolerance: f64,
    /// Virtual chain length added by the sled rotation mechanism.
    pub rotation_disk_radius: f64,
    /// Total chain available per side; forward solves beyond this diverge.
    pub chain_length: f64,
    /// Calibration divisor applied to X by the simple fallback.
    pub x_corr_scaling: f64,
    /// Calibration divisor applied to Y by the simple fallback.
    pub y_corr_scaling: f64,
    /// Use the sag-free circle-intersection fallback for forward solves.
    pub simple_kinematics: bool,
}

impl Default for ChainConfig {
    /// Nominal 8 x 4 ft machine with a top-routed chain.
    fn default() -> Self {
        Self {
            dist_between_motors: 2978.4,
            machine_height: 1219.2,
            motor_offset_y: 463.0,
            routing: ChainRouting::Top,
            sled_weight: 97.9,
            chain_elongation_factor: 0.0,
            left_chain_tolerance: 0.0,
            right_chain_tolerance: 0.0,
            rotation_disk_radius: 139.0,
            chain_length: 3360.0,
            x_corr_scaling: 1.0,
            y_corr_scaling: 1.0,
            simple_kinematics: false,
        }
    }
}

/// Motor anchor coordinates in the machine frame (origin at stock centre).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SledGeometry {
    /// Half the motor separation; motors sit at `x = ±x_motor`.
    pub x_motor: f64,
    /// Height of both motor axes above the stock centre.
    pub y_motor: f64,
}

impl SledGeometry {
    /// Recompute the anchor coordinates from the current settings.
    pub fn from_config(cfg: &ChainConfig) -> Self {
        Self {
            x_motor: cfg.dist_between_motors / 2.0,
            y_motor: cfg.machine_height / 2.0 + cfg.motor_offset_y,
        }
    }

    pub fn left_anchor(&self) -> Vector2<f64> {
        Vector2::new(-self.x_motor, self.y_motor)
    }

    pub fn right_anchor(&self) -> Vector2<f64> {
        Vector2::new(self.x_motor, self.y_motor)
    }
}
