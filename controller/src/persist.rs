//! Persisted-state layout and the settings store.
//!
//! Non-volatile memory is modelled as a flat byte image with fixed block
//! offsets: a version byte, the global settings record, the NGC parameter
//! block, the startup lines, and the build-info line. Every block is
//! followed by a rotate-and-add checksum, and data is always written before
//! its checksum so a torn write fails verification on the next boot. An
//! erased image reads as `0xFF` everywhere and verifies nowhere, which is
//! what triggers restore-to-defaults at startup.

use thiserror::Error;

use crate::settings::{Settings, SETTINGS_VERSION};

/// Total size of the persisted image in bytes.
pub const EEPROM_SIZE: usize = 1024;

/// Number of persisted startup lines.
pub const N_STARTUP_LINE: usize = 2;

/// Capacity of each persisted text line, terminating NUL included.
pub const EEPROM_LINE_SIZE: usize = 80;

const ADDR_VERSION: usize = 0;
const ADDR_GLOBAL: usize = 1;
const ADDR_PARAMETERS: usize = 512;
const ADDR_STARTUP_BLOCK: usize = 768;
const ADDR_BUILD_INFO: usize = 942;

/// Coordinate data sets in the parameter block: G54-G59, G28, G30, G92.
const N_COORDINATE_DATA: usize = 9;
const COORD_BLOCK_SIZE: usize = 3 * 4;

/// Serialized size of the global settings record, checksum excluded.
const SETTINGS_BLOB_LEN: usize = 161;

/// Faults raised by the persistence layer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("checksum mismatch in block at offset {0}")]
    Checksum(usize),
    #[error("stored settings version {found}, expected {expected}")]
    VersionMismatch { found: u8, expected: u8 },
    #[error("startup-line slot {0} out of range")]
    SlotOutOfRange(u8),
    #[error("line too long to persist")]
    LineTooLong,
}

/// Persistence surface consumed by the machine context and dispatcher.
///
/// The in-crate implementation is [`EepromImage`]; a hardware build backs
/// the same trait with the EEPROM driver.
pub trait SettingsStore {
    fn read_settings(&self) -> Result<Settings, StoreError>;
    fn write_settings(&mut self, settings: &Settings) -> Result<(), StoreError>;
    fn read_startup_line(&self, slot: u8) -> Result<String, StoreError>;
    fn write_startup_line(&mut self, slot: u8, line: &str) -> Result<(), StoreError>;
    fn read_build_info(&self) -> Result<String, StoreError>;
    fn write_build_info(&mut self, line: &str) -> Result<(), StoreError>;
    /// Zero the NGC coordinate-parameter block.
    fn clear_parameters(&mut self);
    /// Raw image bytes for the `$|` diagnostic dump.
    fn snapshot(&self) -> Vec<u8>;
}

/// Grbl-compatible rolling checksum.
fn checksum(data: &[u8]) -> u8 {
    let mut sum: u8 = 0;
    for &byte in data {
        sum = sum.rotate_left(1).wrapping_add(byte);
    }
    sum
}

fn push_f32s(buf: &mut Vec<u8>, values: &[f32]) {
    for v in values {
        buf.extend_from_slice(&v.to_le_bytes());
    }
}

fn settings_to_bytes(s: &Settings) -> Vec<u8> {
    let mut buf = Vec::with_capacity(SETTINGS_BLOB_LEN);

    push_f32s(&mut buf, &[s.pulse_microseconds, s.stepper_idle_lock_time]);
    buf.push(s.step_invert_mask);
    buf.push(s.dir_invert_mask);
    buf.push(s.status_report_mask);
    push_f32s(&mut buf, &[s.junction_deviation, s.arc_tolerance, s.rpm_max, s.rpm_min]);
    buf.push(s.homing_dir_mask);
    push_f32s(
        &mut buf,
        &[
            s.homing_feed_rate,
            s.homing_seek_rate,
            s.homing_debounce_delay,
            s.homing_pulloff,
        ],
    );
    push_f32s(&mut buf, &s.steps_per_mm);
    push_f32s(&mut buf, &s.max_rate);
    push_f32s(&mut buf, &s.acceleration);
    push_f32s(&mut buf, &s.max_travel);
    buf.push(s.flags);
    push_f32s(
        &mut buf,
        &[
            s.chain_elongation_factor,
            s.sled_weight,
            s.chain_over_sprocket,
            s.machine_width,
            s.machine_height,
            s.dist_between_motors,
            s.motor_offset_y,
            s.x_corr_scaling,
            s.y_corr_scaling,
            s.chain_sag_correction,
            s.left_chain_tolerance,
            s.right_chain_tolerance,
            s.rotation_disk_radius,
            s.chain_length,
            s.z_travel_min,
            s.simple_kinematics,
            s.home_chain_lengths,
        ],
    );

    debug_assert_eq!(buf.len(), SETTINGS_BLOB_LEN);
    buf
}

struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn f32(&mut self) -> Option<f32> {
        let raw = self.bytes.get(self.pos..self.pos + 4)?;
        self.pos += 4;
        Some(f32::from_le_bytes(raw.try_into().ok()?))
    }

    fn u8(&mut self) -> Option<u8> {
        let raw = *self.bytes.get(self.pos)?;
        self.pos += 1;
        Some(raw)
    }

    fn f32x3(&mut self) -> Option<[f32; 3]> {
        Some([self.f32()?, self.f32()?, self.f32()?])
    }
}

fn settings_from_bytes(bytes: &[u8]) -> Option<Settings> {
    let mut c = Cursor { bytes, pos: 0 };
    let settings = Settings {
        pulse_microseconds: c.f32()?,
        stepper_idle_lock_time: c.f32()?,
        step_invert_mask: c.u8()?,
        dir_invert_mask: c.u8()?,
        status_report_mask: c.u8()?,
        junction_deviation: c.f32()?,
        arc_tolerance: c.f32()?,
        rpm_max: c.f32()?,
        rpm_min: c.f32()?,
        homing_dir_mask: c.u8()?,
        homing_feed_rate: c.f32()?,
        homing_seek_rate: c.f32()?,
        homing_debounce_delay: c.f32()?,
        homing_pulloff: c.f32()?,
        steps_per_mm: c.f32x3()?,
        max_rate: c.f32x3()?,
        acceleration: c.f32x3()?,
        max_travel: c.f32x3()?,
        flags: c.u8()?,
        chain_elongation_factor: c.f32()?,
        sled_weight: c.f32()?,
        chain_over_sprocket: c.f32()?,
        machine_width: c.f32()?,
        machine_height: c.f32()?,
        dist_between_motors: c.f32()?,
        motor_offset_y: c.f32()?,
        x_corr_scaling: c.f32()?,
        y_corr_scaling: c.f32()?,
        chain_sag_correction: c.f32()?,
        left_chain_tolerance: c.f32()?,
        right_chain_tolerance: c.f32()?,
        rotation_disk_radius: c.f32()?,
        chain_length: c.f32()?,
        z_travel_min: c.f32()?,
        simple_kinematics: c.f32()?,
        home_chain_lengths: c.f32()?,
    };
    Some(settings)
}

/// In-memory persisted image.
#[derive(Debug, Clone)]
pub struct EepromImage {
    bytes: Vec<u8>,
}

impl Default for EepromImage {
    fn default() -> Self {
        Self::erased()
    }
}

impl EepromImage {
    /// Fresh image in the erased state; every read fails its checksum.
    pub fn erased() -> Self {
        Self {
            bytes: vec![0xFF; EEPROM_SIZE],
        }
    }

    fn write_block(&mut self, addr: usize, data: &[u8]) {
        self.bytes[addr..addr + data.len()].copy_from_slice(data);
        // Data first, checksum last.
        self.bytes[addr + data.len()] = checksum(data);
    }

    fn read_block(&self, addr: usize, len: usize) -> Result<&[u8], StoreError> {
        let data = &self.bytes[addr..addr + len];
        if self.bytes[addr + len] != checksum(data) {
            return Err(StoreError::Checksum(addr));
        }
        Ok(data)
    }

    fn line_addr(slot: u8) -> Result<usize, StoreError> {
        if usize::from(slot) >= N_STARTUP_LINE {
            return Err(StoreError::SlotOutOfRange(slot));
        }
        Ok(ADDR_STARTUP_BLOCK + usize::from(slot) * (EEPROM_LINE_SIZE + 1))
    }

    fn read_line(&self, addr: usize) -> Result<String, StoreError> {
        let block = self.read_block(addr, EEPROM_LINE_SIZE)?;
        let end = block.iter().position(|&b| b == 0).unwrap_or(block.len());
        Ok(String::from_utf8_lossy(&block[..end]).into_owned())
    }

    fn write_line(&mut self, addr: usize, line: &str) -> Result<(), StoreError> {
        if line.len() + 1 > EEPROM_LINE_SIZE {
            return Err(StoreError::LineTooLong);
        }
        let mut block = [0u8; EEPROM_LINE_SIZE];
        block[..line.len()].copy_from_slice(line.as_bytes());
        self.write_block(addr, &block);
        Ok(())
    }
}

impl SettingsStore for EepromImage {
    fn read_settings(&self) -> Result<Settings, StoreError> {
        let found = self.bytes[ADDR_VERSION];
        if found != SETTINGS_VERSION {
            return Err(StoreError::VersionMismatch {
                found,
                expected: SETTINGS_VERSION,
            });
        }
        let block = self.read_block(ADDR_GLOBAL, SETTINGS_BLOB_LEN)?;
        settings_from_bytes(block).ok_or(StoreError::Checksum(ADDR_GLOBAL))
    }

    fn write_settings(&mut self, settings: &Settings) -> Result<(), StoreError> {
        self.bytes[ADDR_VERSION] = SETTINGS_VERSION;
        let blob = settings_to_bytes(settings);
        self.write_block(ADDR_GLOBAL, &blob);
        Ok(())
    }

    fn read_startup_line(&self, slot: u8) -> Result<String, StoreError> {
        self.read_line(Self::line_addr(slot)?)
    }

    fn write_startup_line(&mut self, slot: u8, line: &str) -> Result<(), StoreError> {
        let addr = Self::line_addr(slot)?;
        self.write_line(addr, line)
    }

    fn read_build_info(&self) -> Result<String, StoreError> {
        self.read_line(ADDR_BUILD_INFO)
    }

    fn write_build_info(&mut self, line: &str) -> Result<(), StoreError> {
        self.write_line(ADDR_BUILD_INFO, line)
    }

    fn clear_parameters(&mut self) {
        let zeroed = [0u8; COORD_BLOCK_SIZE];
        for idx in 0..N_COORDINATE_DATA {
            self.write_block(ADDR_PARAMETERS + idx * (COORD_BLOCK_SIZE + 1), &zeroed);
        }
    }

    fn snapshot(&self) -> Vec<u8> {
        self.bytes.clone()
    }
}
