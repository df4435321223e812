//! System layer for a two-motor hanging-sled CNC controller.
//!
//! This crate owns everything between the serial protocol and the stepper
//! hardware that is not G-code: the persistent settings record and its
//! numbered `$<n>=<v>` store, the checksummed persisted-state image, the
//! machine state model, the atomic real-time execution flags shared with
//! interrupt-context event sources, the `$` system-command dispatcher, the
//! startup-script runner, and the step-to-millimetre coordinate bridge
//! built on the [`chain_math`] kinematics.
//!
//! External collaborators (G-code parser, reporting, homing hardware) are
//! consumed through the traits in [`external`].

pub mod command;
pub mod external;
pub mod machine;
pub mod persist;
pub mod realtime;
pub mod settings;
pub mod state;
pub mod status;

pub use external::{Feedback, GcodeExecutor, HomingCycle, MachineControl, Reporter};
pub use machine::{
    Machine, RESTORE_ALL, RESTORE_BUILD_INFO, RESTORE_DEFAULTS, RESTORE_PARAMETERS,
    RESTORE_STARTUP_LINES,
};
pub use persist::{EepromImage, SettingsStore, StoreError, EEPROM_LINE_SIZE, N_STARTUP_LINE};
pub use realtime::ExecFlags;
pub use settings::Settings;
pub use state::MachineState;
pub use status::Status;

/// Number of controlled axes.
pub const N_AXIS: usize = 3;

pub const X_AXIS: usize = 0;
pub const Y_AXIS: usize = 1;
pub const Z_AXIS: usize = 2;

/// The left and right chain motors occupy the X and Y step channels.
pub const LEFT_MOTOR: usize = X_AXIS;
pub const RIGHT_MOTOR: usize = Y_AXIS;
