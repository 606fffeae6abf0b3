//! SE97B temperature sensor with board-identity EEPROM (I2C, JC42 family).
//!
//! The part is two devices on one die: a JC42.4 temperature sensor at the
//! base address and an EEPROM at base + 0x38 carrying the board identity
//! block. Register words are big-endian on the wire, so every SMBus word
//! access is byte-swapped during assembly.
//!
//! Temperature registers hold 13-bit signed fixed-point values. Two chip
//! generations are supported by the conversion helpers: the JC42/SE97
//! encoding at 0.0625 degC per step and the TMP116 encoding at
//! 0.0078125 degC per step; both map to millidegrees for the caller.

use std::time::{Duration, Instant};

use tracing::warn;

use crate::i2c::I2cLink;
use crate::Result;

/// Capability register.
const REG_CAPABILITY: u8 = 0x00;
/// Configuration register.
const REG_CONFIG: u8 = 0x01;
/// Upper-limit register.
const REG_UPPER: u8 = 0x02;
/// Lower-limit register.
const REG_LOWER: u8 = 0x03;
/// Critical-limit register.
const REG_CRITICAL: u8 = 0x04;
/// Temperature register.
const REG_TEMPERATURE: u8 = 0x05;

/// Configuration: shutdown mode bit.
pub const CONFIG_SHUTDOWN: u16 = 0x0100;
/// Configuration: normal continuous conversion.
const CONFIG_MODE_NORMAL: u16 = 0x0000;
/// Configuration: hysteresis field, bits 10..9.
const CONFIG_HYSTERESIS_MASK: u16 = 0x0600;
/// Capability: extended temperature range below 0 degC.
const CAP_EXTENDED_RANGE: u16 = 0x0004;

/// EEPROM address offset of the companion device.
pub const EEPROM_ADDR_OFFSET: u16 = 0x38;
/// Identity block offset inside the EEPROM.
const EEPROM_ID_START: u8 = 0x80;
/// Identity block length.
pub const EEPROM_ID_LEN: usize = 8;

/// Cache refresh gate.
const REFRESH_PERIOD: Duration = Duration::from_millis(10);

/// Lowest encodable temperature with the extended-range capability, m degC.
const TEMP_MIN_EXTENDED: i32 = -55_000;
/// Lowest encodable temperature without it, m degC.
const TEMP_MIN: i32 = 0;
/// Highest encodable temperature, m degC.
const TEMP_MAX: i32 = 125_000;

/// Which cached temperature register to read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TempIndex {
    /// Live temperature input.
    Input = 0,
    /// Critical limit.
    Crit = 1,
    /// Lower limit.
    Lo = 2,
    /// Upper limit.
    Hi = 3,
}

impl TempIndex {
    const fn reg(self) -> u8 {
        match self {
            TempIndex::Input => REG_TEMPERATURE,
            TempIndex::Crit => REG_CRITICAL,
            TempIndex::Lo => REG_LOWER,
            TempIndex::Hi => REG_UPPER,
        }
    }
}

/// All cached registers in cache order.
const CACHED: [TempIndex; 4] = [TempIndex::Input, TempIndex::Crit, TempIndex::Lo, TempIndex::Hi];

/// Swap the byte halves of a register word (wire order vs. native order).
pub const fn swap_word(v: u16) -> u16 {
    v.rotate_left(8)
}

const fn sign_extend_13(v: u16) -> i32 {
    ((v as i32) << 19) >> 19
}

/// JC42/SE97 register value to millidegrees (0.0625 degC per step).
pub const fn se97_temp_from_reg(reg: u16) -> i32 {
    sign_extend_13(reg) * 125 / 2
}

/// Millidegrees to JC42/SE97 register value, clamped to the encodable
/// window for the part's range capability.
pub const fn se97_temp_to_reg(millideg: i32, extended: bool) -> u16 {
    let min = if extended { TEMP_MIN_EXTENDED } else { TEMP_MIN };
    let clamped = if millideg < min {
        min
    } else if millideg > TEMP_MAX {
        TEMP_MAX
    } else {
        millideg
    };
    ((clamped * 2 / 125) & 0x1fff) as u16
}

/// TMP116 register value to millidegrees (0.0078125 degC per step).
pub const fn tmp116_temp_from_reg(reg: u16) -> i32 {
    sign_extend_13(reg) * 125 / 16
}

/// Millidegrees to TMP116 register value, clamped like
/// [`se97_temp_to_reg`].
pub const fn tmp116_temp_to_reg(millideg: i32, extended: bool) -> u16 {
    let min = if extended { TEMP_MIN_EXTENDED } else { TEMP_MIN };
    let clamped = if millideg < min {
        min
    } else if millideg > TEMP_MAX {
        TEMP_MAX
    } else {
        millideg
    };
    ((clamped * 16 / 125) & 0x1fff) as u16
}

/// Driver state: the two links, the captured configuration and the
/// refresh-gated register cache.
pub struct TempSensor<L: I2cLink> {
    temp: L,
    eeprom: L,
    orig_config: u16,
    config: u16,
    extended: bool,
    cache: [u16; 4],
    last_refresh: Option<Instant>,
    valid: bool,
}

impl<L: I2cLink> TempSensor<L> {
    /// Open the sensor: capture the original configuration so it can be
    /// restored on drop, then switch to normal conversion mode.
    pub fn new(mut temp: L, eeprom: L) -> Result<Self> {
        let orig_config = swap_word(temp.read_word(REG_CONFIG)?);
        let extended = swap_word(temp.read_word(REG_CAPABILITY)?) & CAP_EXTENDED_RANGE != 0;
        let config = CONFIG_MODE_NORMAL;
        temp.write_word(REG_CONFIG, swap_word(config))?;
        Ok(Self {
            temp,
            eeprom,
            orig_config,
            config,
            extended,
            cache: [0; 4],
            last_refresh: None,
            valid: false,
        })
    }

    /// Whether the part encodes temperatures below 0 degC.
    pub fn extended_range(&self) -> bool {
        self.extended
    }

    /// Reread the four temperature registers if the cache is invalid or
    /// older than the refresh period; otherwise the cache stands.
    fn update(&mut self) -> Result<()> {
        let elapsed = self.last_refresh.map(|t| t.elapsed());
        let fresh = self.valid && matches!(elapsed, Some(e) if e <= REFRESH_PERIOD);
        if fresh {
            return Ok(());
        }
        for (slot, index) in CACHED.iter().enumerate() {
            match self.temp.read_word(index.reg()) {
                Ok(wire) => self.cache[slot] = swap_word(wire),
                Err(e) => {
                    self.valid = false;
                    return Err(e);
                }
            }
        }
        self.last_refresh = Some(Instant::now());
        self.valid = true;
        Ok(())
    }

    /// Read one temperature register in millidegrees, served from the
    /// cache inside the refresh window.
    pub fn read_temp(&mut self, index: TempIndex) -> Result<i32> {
        self.update()?;
        Ok(se97_temp_from_reg(self.cache[index as usize]))
    }

    /// Live temperature input in millidegrees.
    pub fn read_temperature(&mut self) -> Result<i32> {
        self.read_temp(TempIndex::Input)
    }

    /// Read the identity block from the companion EEPROM.
    pub fn read_eeprom(&mut self) -> Result<[u8; EEPROM_ID_LEN]> {
        let mut buf = [0u8; EEPROM_ID_LEN];
        self.eeprom.read_block(EEPROM_ID_START, &mut buf)?;
        Ok(buf)
    }

    /// Write the identity block to the companion EEPROM.
    pub fn write_eeprom(&mut self, data: &[u8; EEPROM_ID_LEN]) -> Result<()> {
        self.eeprom.write_block(EEPROM_ID_START, data)
    }
}

impl<L: I2cLink> Drop for TempSensor<L> {
    fn drop(&mut self) {
        // Hand the part back the way we found it, unless the only drift is
        // in the hysteresis field.
        if (self.config ^ self.orig_config) & !CONFIG_HYSTERESIS_MASK != 0 {
            if let Err(e) = self.temp.write_word(REG_CONFIG, swap_word(self.orig_config)) {
                warn!("se97 teardown: restoring configuration failed: {e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks::{I2cOp, RegisterFileI2c};
    use std::thread;

    fn sensor() -> (TempSensor<RegisterFileI2c>, RegisterFileI2c, RegisterFileI2c) {
        let temp = RegisterFileI2c::new();
        let eeprom = RegisterFileI2c::new();
        let (t, e) = (temp.clone(), eeprom.clone());
        (TempSensor::new(temp, eeprom).unwrap(), t, e)
    }

    fn set_wire_temp(link: &RegisterFileI2c, reg: u8, native: u16) {
        link.state().borrow_mut().words.insert(reg, swap_word(native));
    }

    #[test]
    fn se97_conversion_matches_datasheet_vectors() {
        // +25 degC = 400 steps of 0.0625
        assert_eq!(se97_temp_from_reg(400), 25_000);
        assert_eq!(se97_temp_from_reg(0), 0);
        // sign bit: 0x1fff is -0.0625 degC
        assert_eq!(se97_temp_from_reg(0x1fff), -62);
        assert_eq!(se97_temp_to_reg(25_000, false), 400);
        assert_eq!(se97_temp_to_reg(-10_000, true), (-160i32 & 0x1fff) as u16);
    }

    #[test]
    fn se97_conversion_clamps_to_the_encodable_window() {
        assert_eq!(se97_temp_to_reg(200_000, false), se97_temp_to_reg(125_000, false));
        assert_eq!(se97_temp_to_reg(-10_000, false), 0);
        assert_eq!(
            se97_temp_to_reg(-90_000, true),
            se97_temp_to_reg(-55_000, true)
        );
    }

    #[test]
    fn tmp116_conversion_matches_datasheet_vectors() {
        // +25 degC = 3200 steps of 0.0078125
        assert_eq!(tmp116_temp_from_reg(3200), 25_000);
        assert_eq!(tmp116_temp_to_reg(25_000, false), 3200);
        // one step below zero
        assert_eq!(tmp116_temp_from_reg(0x1fff), -7);
    }

    #[test]
    fn register_words_are_byte_swapped_on_the_wire() {
        assert_eq!(swap_word(0x1234), 0x3412);
        assert_eq!(swap_word(swap_word(0xabcd)), 0xabcd);
    }

    #[test]
    fn open_captures_config_and_enters_normal_mode() {
        let temp = RegisterFileI2c::new();
        // device boots shut down, wire order
        temp.state()
            .borrow_mut()
            .words
            .insert(REG_CONFIG, swap_word(CONFIG_SHUTDOWN));
        let state = temp.state();
        let _sensor = TempSensor::new(temp, RegisterFileI2c::new()).unwrap();
        let written = *state.borrow().words.get(&REG_CONFIG).unwrap();
        assert_eq!(swap_word(written), CONFIG_MODE_NORMAL);
    }

    #[test]
    fn reads_within_the_refresh_window_are_served_from_cache() {
        let (mut sensor, temp, _) = sensor();
        set_wire_temp(&temp, REG_TEMPERATURE, 400);
        assert_eq!(sensor.read_temperature().unwrap(), 25_000);
        let reads_after_first = temp.state().borrow().reads_of(REG_TEMPERATURE);
        // a second read inside the window must not touch the bus
        set_wire_temp(&temp, REG_TEMPERATURE, 800);
        assert_eq!(sensor.read_temperature().unwrap(), 25_000);
        assert_eq!(temp.state().borrow().reads_of(REG_TEMPERATURE), reads_after_first);
    }

    #[test]
    fn reads_after_the_refresh_window_hit_the_bus() {
        let (mut sensor, temp, _) = sensor();
        set_wire_temp(&temp, REG_TEMPERATURE, 400);
        assert_eq!(sensor.read_temperature().unwrap(), 25_000);
        thread::sleep(Duration::from_millis(15));
        set_wire_temp(&temp, REG_TEMPERATURE, 800);
        assert_eq!(sensor.read_temperature().unwrap(), 50_000);
    }

    #[test]
    fn all_four_registers_are_cached_together() {
        let (mut sensor, temp, _) = sensor();
        set_wire_temp(&temp, REG_TEMPERATURE, 400);
        set_wire_temp(&temp, REG_CRITICAL, 1600);
        set_wire_temp(&temp, REG_LOWER, 80);
        set_wire_temp(&temp, REG_UPPER, 1280);
        assert_eq!(sensor.read_temp(TempIndex::Input).unwrap(), 25_000);
        assert_eq!(sensor.read_temp(TempIndex::Crit).unwrap(), 100_000);
        assert_eq!(sensor.read_temp(TempIndex::Lo).unwrap(), 5_000);
        assert_eq!(sensor.read_temp(TempIndex::Hi).unwrap(), 80_000);
    }

    #[test]
    fn eeprom_block_round_trips_at_the_identity_offset() {
        let (mut sensor, _, eeprom) = sensor();
        let id = [0xde, 0xad, 0xbe, 0xef, 0x00, 0x11, 0x22, 0x33];
        sensor.write_eeprom(&id).unwrap();
        assert_eq!(sensor.read_eeprom().unwrap(), id);
        let log = eeprom.state().borrow().log.clone();
        assert!(log
            .iter()
            .any(|op| matches!(op, I2cOp::WriteBlock(reg, _) if *reg == EEPROM_ID_START)));
    }

    #[test]
    fn drop_restores_a_config_that_differed_outside_hysteresis() {
        let temp = RegisterFileI2c::new();
        let orig = CONFIG_SHUTDOWN | 0x0001;
        temp.state()
            .borrow_mut()
            .words
            .insert(REG_CONFIG, swap_word(orig));
        let state = temp.state();
        drop(TempSensor::new(temp, RegisterFileI2c::new()).unwrap());
        let now = *state.borrow().words.get(&REG_CONFIG).unwrap();
        assert_eq!(swap_word(now), orig);
    }

    #[test]
    fn drop_leaves_a_hysteresis_only_difference_alone() {
        let temp = RegisterFileI2c::new();
        let orig = 0x0200; // hysteresis bits only
        temp.state()
            .borrow_mut()
            .words
            .insert(REG_CONFIG, swap_word(orig));
        let state = temp.state();
        drop(TempSensor::new(temp, RegisterFileI2c::new()).unwrap());
        let now = *state.borrow().words.get(&REG_CONFIG).unwrap();
        // the normal-mode write from open stands; no restore happened
        assert_eq!(swap_word(now), CONFIG_MODE_NORMAL);
    }
}
