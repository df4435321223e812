//! The machine context: settings, state, flags, kinematics, persistence.
//!
//! Owns everything the dispatcher mutates and provides the coordinate-frame
//! bridge between motor steps and machine millimetres.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chain_math::{ChainLengths, Kinematics};
use tracing::{info, warn};

use crate::external::{GcodeExecutor, Reporter};
use crate::persist::{SettingsStore, N_STARTUP_LINE};
use crate::realtime::{ExecFlags, EXEC_RESET};
use crate::settings::Settings;
use crate::state::MachineState;
use crate::status::Status;
use crate::{LEFT_MOTOR, N_AXIS, RIGHT_MOTOR, X_AXIS, Y_AXIS, Z_AXIS};

// Restore masks for `$RST` and boot-time recovery.
pub const RESTORE_DEFAULTS: u8 = 1 << 0;
pub const RESTORE_PARAMETERS: u8 = 1 << 1;
pub const RESTORE_STARTUP_LINES: u8 = 1 << 2;
pub const RESTORE_BUILD_INFO: u8 = 1 << 3;
pub const RESTORE_ALL: u8 = 0xFF;

/// Machine context shared by the dispatcher and the conversion paths.
///
/// Single-owner from the main loop's point of view; the exec flags and the
/// abort flag are the only pieces asynchronous sources may touch, and both
/// are handed out as `Arc` clones.
pub struct Machine {
    pub settings: Settings,
    pub state: MachineState,
    pub(crate) flags: Arc<ExecFlags>,
    pub(crate) abort: Arc<AtomicBool>,
    pub(crate) kinematics: Kinematics,
    pub(crate) store: Box<dyn SettingsStore + Send>,
}

impl Machine {
    /// Boot against a settings store.
    ///
    /// A missing or corrupt settings record is replaced with defaults, the
    /// same recovery a controller performs on a blank EEPROM.
    pub fn new(store: Box<dyn SettingsStore + Send>) -> Self {
        let mut machine = Self {
            settings: Settings::default(),
            state: MachineState::Idle,
            flags: Arc::new(ExecFlags::new()),
            abort: Arc::new(AtomicBool::new(false)),
            kinematics: Kinematics::new(),
            store,
        };
        match machine.store.read_settings() {
            Ok(settings) => machine.settings = settings,
            Err(err) => {
                warn!("restoring default settings: {err}");
                machine.restore(RESTORE_ALL);
            }
        }
        machine
    }

    /// Handle for asynchronous event sources to raise real-time flags.
    pub fn flags(&self) -> Arc<ExecFlags> {
        Arc::clone(&self.flags)
    }

    /// Handle for the reset source to observe or raise the abort flag.
    pub fn abort_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.abort)
    }

    pub fn aborted(&self) -> bool {
        self.abort.load(Ordering::Acquire)
    }

    /// Raise the soft-reset request; the protocol layer completes it by
    /// calling [`Machine::reset`].
    pub fn request_reset(&self) {
        self.flags.set_state(EXEC_RESET);
        self.abort.store(true, Ordering::SeqCst);
    }

    /// Finish a soft reset: back to idle, flags cleared, kinematics
    /// re-seeded at the machine origin.
    pub fn reset(&mut self) {
        self.state = MachineState::Idle;
        self.abort.store(false, Ordering::SeqCst);
        self.flags.clear_state(u8::MAX);
        self.flags.clear_alarm();
        self.flags.clear_motion_overrides();
        self.flags.clear_accessory_overrides();
        self.kinematics.reset();
        info!("soft reset complete");
    }

    /// Restore persisted state per the `RESTORE_*` mask.
    pub fn restore(&mut self, mask: u8) {
        if mask & RESTORE_DEFAULTS != 0 {
            self.settings = Settings::default();
            if let Err(err) = self.store.write_settings(&self.settings) {
                warn!("failed to persist default settings: {err}");
            }
        }
        if mask & RESTORE_PARAMETERS != 0 {
            self.store.clear_parameters();
        }
        if mask & RESTORE_STARTUP_LINES != 0 {
            for slot in 0..N_STARTUP_LINE as u8 {
                if let Err(err) = self.store.write_startup_line(slot, "") {
                    warn!("failed to clear startup line {slot}: {err}");
                }
            }
        }
        if mask & RESTORE_BUILD_INFO != 0 {
            if let Err(err) = self.store.write_build_info("") {
                warn!("failed to clear build info: {err}");
            }
        }
    }

    /// Convert motor step counts to machine position in mm.
    ///
    /// The left and right motor counts are chain lengths; the forward
    /// transform recovers the Cartesian position, which is then quantized
    /// through the X/Y step grid the planner tracks. Z is a plain linear
    /// axis. The solve leaves its result in the iteration seed for the
    /// next call.
    pub fn steps_to_position(&mut self, steps: &[i32; N_AXIS]) -> [f32; N_AXIS] {
        let cfg = self.settings.chain_config();
        let measured = ChainLengths {
            left: f64::from(steps[LEFT_MOTOR] as f32 / self.settings.steps_per_mm[LEFT_MOTOR]),
            right: f64::from(steps[RIGHT_MOTOR] as f32 / self.settings.steps_per_mm[RIGHT_MOTOR]),
        };
        let position = self.kinematics.position(&cfg, measured);

        // Multiply before truncating so sub-mm precision survives the trip
        // through the step grid.
        let x_steps = (position.x * f64::from(self.settings.steps_per_mm[X_AXIS])) as i32;
        let y_steps = (position.y * f64::from(self.settings.steps_per_mm[Y_AXIS])) as i32;

        [
            x_steps as f32 / self.settings.steps_per_mm[X_AXIS],
            y_steps as f32 / self.settings.steps_per_mm[Y_AXIS],
            steps[Z_AXIS] as f32 / self.settings.steps_per_mm[Z_AXIS],
        ]
    }

    /// Whether `target` exceeds machine travel.
    ///
    /// The machine homes at the centre of the stock, so X and Y travel is
    /// split evenly around zero; Z additionally has a configurable upper
    /// bound above the stock surface.
    pub fn check_travel_limits(&self, target: &[f32; N_AXIS]) -> bool {
        for idx in 0..N_AXIS {
            if idx == Z_AXIS {
                if target[idx] > self.settings.z_travel_min
                    || target[idx] < self.settings.max_travel[Z_AXIS]
                {
                    return true;
                }
            } else {
                // max_travel is stored negative.
                let half = self.settings.max_travel[idx] / -2.0;
                if target[idx] < -half || target[idx] > half {
                    return true;
                }
            }
        }
        false
    }

    /// Replay the persisted startup script.
    ///
    /// Read failures are reported and skipped; one bad slot never blocks
    /// the rest of the script.
    pub fn execute_startup(
        &mut self,
        gcode: &mut dyn GcodeExecutor,
        report: &mut dyn Reporter,
    ) {
        for slot in 0..N_STARTUP_LINE as u8 {
            match self.store.read_startup_line(slot) {
                Err(_) => report.startup_result("", Status::SettingReadFail),
                Ok(line) if line.is_empty() => {}
                Ok(line) => {
                    let status = gcode.execute(&line);
                    report.startup_result(&line, status);
                }
            }
        }
    }
}
