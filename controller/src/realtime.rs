//! Real-time execution flags shared with asynchronous event sources.
//!
//! Interrupt handlers (or their stand-ins: signal handlers, an input
//! thread) raise bits here while the main loop is anywhere, including in
//! the middle of a kinematics solve. Every writer is a single atomic
//! read-modify-write, so no update is lost between racing writers. Readers
//! use plain loads and must tolerate a flag flipping between two loads;
//! compound inspection of several fields is never atomic.

use std::sync::atomic::{AtomicU8, Ordering};

// Bits of the execution-state flag word.
pub const EXEC_STATUS_REPORT: u8 = 1 << 0;
pub const EXEC_CYCLE_START: u8 = 1 << 1;
pub const EXEC_CYCLE_STOP: u8 = 1 << 2;
pub const EXEC_FEED_HOLD: u8 = 1 << 3;
pub const EXEC_RESET: u8 = 1 << 4;
pub const EXEC_SAFETY_DOOR: u8 = 1 << 5;
pub const EXEC_MOTION_CANCEL: u8 = 1 << 6;
pub const EXEC_SLEEP: u8 = 1 << 7;

// Alarm codes; the alarm word carries one code, not a mask.
pub const ALARM_HARD_LIMIT: u8 = 1;
pub const ALARM_SOFT_LIMIT: u8 = 2;
pub const ALARM_ABORT_CYCLE: u8 = 3;
pub const ALARM_PROBE_FAIL_INITIAL: u8 = 4;
pub const ALARM_PROBE_FAIL_CONTACT: u8 = 5;
pub const ALARM_HOMING_FAIL_RESET: u8 = 6;
pub const ALARM_HOMING_FAIL_DOOR: u8 = 7;
pub const ALARM_HOMING_FAIL_PULLOFF: u8 = 8;
pub const ALARM_HOMING_FAIL_APPROACH: u8 = 9;

// Bits of the motion-override flag word.
pub const EXEC_FEED_OVR_RESET: u8 = 1 << 0;
pub const EXEC_FEED_OVR_COARSE_PLUS: u8 = 1 << 1;
pub const EXEC_FEED_OVR_COARSE_MINUS: u8 = 1 << 2;
pub const EXEC_FEED_OVR_FINE_PLUS: u8 = 1 << 3;
pub const EXEC_FEED_OVR_FINE_MINUS: u8 = 1 << 4;
pub const EXEC_RAPID_OVR_RESET: u8 = 1 << 5;
pub const EXEC_RAPID_OVR_MEDIUM: u8 = 1 << 6;
pub const EXEC_RAPID_OVR_LOW: u8 = 1 << 7;

// Bits of the accessory-override flag word.
pub const EXEC_SPINDLE_OVR_RESET: u8 = 1 << 0;
pub const EXEC_SPINDLE_OVR_COARSE_PLUS: u8 = 1 << 1;
pub const EXEC_SPINDLE_OVR_COARSE_MINUS: u8 = 1 << 2;
pub const EXEC_SPINDLE_OVR_FINE_PLUS: u8 = 1 << 3;
pub const EXEC_SPINDLE_OVR_FINE_MINUS: u8 = 1 << 4;
pub const EXEC_SPINDLE_OVR_STOP: u8 = 1 << 5;
pub const EXEC_COOLANT_FLOOD_OVR_TOGGLE: u8 = 1 << 6;
pub const EXEC_COOLANT_MIST_OVR_TOGGLE: u8 = 1 << 7;

/// The four real-time flag words.
///
/// Held behind an `Arc`; asynchronous event sources keep their own clone.
#[derive(Debug, Default)]
pub struct ExecFlags {
    state: AtomicU8,
    alarm: AtomicU8,
    motion_override: AtomicU8,
    accessory_override: AtomicU8,
}

impl ExecFlags {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_state(&self, mask: u8) {
        self.state.fetch_or(mask, Ordering::SeqCst);
    }

    pub fn clear_state(&self, mask: u8) {
        self.state.fetch_and(!mask, Ordering::SeqCst);
    }

    pub fn state(&self) -> u8 {
        self.state.load(Ordering::Acquire)
    }

    pub fn set_alarm(&self, code: u8) {
        self.alarm.store(code, Ordering::SeqCst);
    }

    pub fn clear_alarm(&self) {
        self.alarm.store(0, Ordering::SeqCst);
    }

    pub fn alarm(&self) -> u8 {
        self.alarm.load(Ordering::Acquire)
    }

    pub fn set_motion_override(&self, mask: u8) {
        self.motion_override.fetch_or(mask, Ordering::SeqCst);
    }

    pub fn clear_motion_overrides(&self) {
        self.motion_override.store(0, Ordering::SeqCst);
    }

    pub fn motion_override(&self) -> u8 {
        self.motion_override.load(Ordering::Acquire)
    }

    pub fn set_accessory_override(&self, mask: u8) {
        self.accessory_override.fetch_or(mask, Ordering::SeqCst);
    }

    pub fn clear_accessory_overrides(&self) {
        self.accessory_override.store(0, Ordering::SeqCst);
    }

    pub fn accessory_override(&self) -> u8 {
        self.accessory_override.load(Ordering::Acquire)
    }
}
