//! Protocol status codes returned for every executed line.
//!
//! The numeric values are a wire surface shared with senders and the
//! reporting layer; they must not be renumbered.

use std::fmt;

/// Result of executing one system or G-code line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Status {
    Ok = 0,
    /// Line did not start with `$` or a G-code letter.
    ExpectedCommandLetter = 1,
    /// A number was malformed or missing.
    BadNumberFormat = 2,
    /// Statement unrecognized or disallowed.
    InvalidStatement = 3,
    /// Negative value for a setting that requires a positive one.
    NegativeValue = 4,
    /// Command requires a setting that is disabled.
    SettingDisabled = 5,
    /// Step pulse below the hardware minimum.
    SettingStepPulseMin = 6,
    /// Persisted block missing or failed its checksum.
    SettingReadFail = 7,
    /// Command requires the machine to be idle (or in alarm).
    IdleError = 8,
    /// G-code locked out while in alarm or jog state.
    SystemGcLock = 9,
    /// Jog target exceeds machine travel.
    SoftLimitError = 10,
    /// Line too long for the input buffer.
    Overflow = 11,
    /// Step rate above the hardware maximum.
    MaxStepRateExceeded = 12,
    /// Safety door ajar.
    CheckDoor = 13,
    /// Line too long to persist.
    LineLengthExceeded = 14,
    /// Target exceeds machine travel.
    TravelExceeded = 15,
    /// G-code word unsupported.
    GcodeUnsupportedCommand = 20,
    /// Conflicting G-code words in one modal group.
    GcodeModalGroupViolation = 21,
    /// Motion command without a feed rate.
    GcodeUndefinedFeedRate = 22,
}

impl Status {
    /// Numeric protocol code (`error:<code>` on the wire).
    pub const fn code(self) -> u8 {
        self as u8
    }

    pub const fn from_code(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Ok),
            1 => Some(Self::ExpectedCommandLetter),
            2 => Some(Self::BadNumberFormat),
            3 => Some(Self::InvalidStatement),
            4 => Some(Self::NegativeValue),
            5 => Some(Self::SettingDisabled),
            6 => Some(Self::SettingStepPulseMin),
            7 => Some(Self::SettingReadFail),
            8 => Some(Self::IdleError),
            9 => Some(Self::SystemGcLock),
            10 => Some(Self::SoftLimitError),
            11 => Some(Self::Overflow),
            12 => Some(Self::MaxStepRateExceeded),
            13 => Some(Self::CheckDoor),
            14 => Some(Self::LineLengthExceeded),
            15 => Some(Self::TravelExceeded),
            20 => Some(Self::GcodeUnsupportedCommand),
            21 => Some(Self::GcodeModalGroupViolation),
            22 => Some(Self::GcodeUndefinedFeedRate),
            _ => None,
        }
    }

    pub const fn is_ok(self) -> bool {
        matches!(self, Self::Ok)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Ok => "ok",
            Self::ExpectedCommandLetter => "expected command letter",
            Self::BadNumberFormat => "bad number format",
            Self::InvalidStatement => "invalid statement",
            Self::NegativeValue => "value cannot be negative",
            Self::SettingDisabled => "setting disabled",
            Self::SettingStepPulseMin => "step pulse below minimum",
            Self::SettingReadFail => "failed to read persisted setting",
            Self::IdleError => "command requires idle state",
            Self::SystemGcLock => "g-code locked out",
            Self::SoftLimitError => "jog exceeds soft limits",
            Self::Overflow => "line overflow",
            Self::MaxStepRateExceeded => "step rate exceeds maximum",
            Self::CheckDoor => "safety door ajar",
            Self::LineLengthExceeded => "line too long to persist",
            Self::TravelExceeded => "target exceeds travel",
            Self::GcodeUnsupportedCommand => "unsupported g-code command",
            Self::GcodeModalGroupViolation => "modal group violation",
            Self::GcodeUndefinedFeedRate => "undefined feed rate",
        };
        f.write_str(text)
    }
}
