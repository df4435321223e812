//! Machine execution state.
//!
//! Exactly one state is active at a time. The dispatcher only ever drives
//! the `Idle`/`Alarm`/`CheckMode`/`Homing` corner of the graph; the cycle,
//! hold, jog, door, and sleep states are entered by the protocol and
//! stepper layers and merely gate commands here.

/// Current execution state of the machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MachineState {
    /// Ready, nothing queued.
    #[default]
    Idle,
    /// Locked out after a fault or at power-up before homing.
    Alarm,
    /// G-code is parsed and validated but not executed.
    CheckMode,
    /// Homing cycle in progress.
    Homing,
    /// Streaming a program.
    Cycle,
    /// Feed hold in progress or complete.
    Hold,
    /// Jog motion in progress.
    Jog,
    /// Safety door opened mid-cycle.
    SafetyDoor,
    /// Sleep requested; motors and spindle are powered down.
    Sleep,
}

impl MachineState {
    /// Commands that touch persistent state or start motion require a
    /// machine with nothing in flight.
    pub fn accepts_system_commands(self) -> bool {
        matches!(self, MachineState::Idle | MachineState::Alarm)
    }

    /// The settings report is long enough to disturb streaming.
    pub fn blocks_settings_report(self) -> bool {
        matches!(self, MachineState::Cycle | MachineState::Hold)
    }

    pub fn allows_jog(self) -> bool {
        matches!(self, MachineState::Idle | MachineState::Jog)
    }
}
