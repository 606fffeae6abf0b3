//! MCDC04 tri-stimulus color sensor (I2C).
//!
//! The chip has two register banks selected by its operational state: the
//! configuration bank (OSR, CREG-L/H, OPTREG, BREAK, EDGES) and the
//! measurement bank (OUT0..OUT3, OUTINT). A triggered conversion programs
//! CREG-L, starts via OSR, waits out the integration time and fetches the
//! three channel outputs. The hardware output ordering is interleaved:
//! OUT1 carries X, OUT3 carries Y, OUT2 carries Z.

use std::thread;
use std::time::Duration;

use crate::i2c::I2cLink;
use crate::{Error, Result};

/// Operational state register.
const ADDR_OSR: u8 = 0x0;
/// Configuration register, low half (direction, iref, tint).
const ADDR_CREGL: u8 = 0x6;
/// Configuration register, high half (divider, mode, start).
const ADDR_CREGH: u8 = 0x7;

/// Output register carrying X.
const ADDR_OUT_X: u8 = 0x1;
/// Output register carrying Z.
const ADDR_OUT_Z: u8 = 0x2;
/// Output register carrying Y.
const ADDR_OUT_Y: u8 = 0x3;

/// CREG-L: photo current flows into the device (power-on default).
const DIR_IN: u8 = 0x1 << 7;

/// CREG-L iref field values, index 0..4 maps 20 nA..5.12 uA.
const fn iref_bits(index: u8) -> u8 {
    index << 4
}

/// CREG-H: divider 2, digital divider disabled (power-on defaults).
const DIV_2: u8 = 0x0 << 1;
const ENDIV_DI: u8 = 0x0;

/// CREG-H measurement-mode field, bits 4..3.
const MODE_MASK: u8 = 0x18;
/// CREG-H/OSR start bit.
const SS_START: u8 = 0x1 << 7;
/// OSR stop value.
const SS_STOP: u8 = 0x0 << 7;
/// OSR: device in configuration state (power-on default).
const DOS_CONFIG: u8 = 0x2;
/// OSR: device in measurement state.
const DOS_MEASURE: u8 = 0x3;

/// Default iref index: 1.28 uA (power-on default).
const IREF_DEFAULT: u8 = 3;
/// Default integration-time index: 64 ms (power-on default).
const TINT_DEFAULT: u8 = 6;

/// Gain table: reference-current index per gain step, 0 = lowest
/// sensitivity, 8 = highest.
const GAIN_IREF_TBL: [u8; 9] = [2, 2, 1, 1, 0, 0, 0, 0, 0];
/// Gain table: integration-time index per gain step.
const GAIN_TINT_TBL: [u8; 9] = [6, 7, 6, 7, 6, 7, 8, 9, 10];

/// Conversion wait per integration-time index. The wait covers the
/// integration plus conversion margin, not just t_int itself.
const fn conversion_wait(tint: u8) -> Duration {
    match tint {
        0..=3 => Duration::from_millis(10),
        4 => Duration::from_millis(25),
        5 => Duration::from_millis(50),
        6 => Duration::from_millis(125),
        7 => Duration::from_millis(250),
        8 => Duration::from_millis(500),
        9 => Duration::from_millis(750),
        _ => Duration::from_millis(1500),
    }
}

/// Measurement mode in CREG-H.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LightMeasureMode {
    /// Continuous conversions.
    Cont = 0,
    /// Single conversion on command (power-on default).
    Cmd = 1,
    /// Synchronized start.
    Syns = 2,
    /// Synchronized start and duration.
    Synd = 3,
}

impl LightMeasureMode {
    /// Field value positioned at CREG-H bits 4..3.
    const fn bits(self) -> u8 {
        (self as u8) << 3
    }
}

impl TryFrom<u8> for LightMeasureMode {
    type Error = Error;

    fn try_from(v: u8) -> Result<Self> {
        match v {
            0 => Ok(LightMeasureMode::Cont),
            1 => Ok(LightMeasureMode::Cmd),
            2 => Ok(LightMeasureMode::Syns),
            3 => Ok(LightMeasureMode::Synd),
            other => Err(Error::InvalidMode(other)),
        }
    }
}

/// The last fetched conversion triple.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Tristimulus {
    /// CIE X channel.
    pub x: u16,
    /// CIE Y channel.
    pub y: u16,
    /// CIE Z channel.
    pub z: u16,
}

/// Driver state: link, register shadows, gain state and the last triple.
pub struct LightSensor<L: I2cLink> {
    link: L,
    cregl: u8,
    cregh: u8,
    iref: u8,
    tint: u8,
    dir: u8,
    conv_wait: Duration,
    last: Tristimulus,
    calibration: [[f64; 3]; 3],
}

impl<L: I2cLink> LightSensor<L> {
    /// Open the sensor and program the power-on-safe configuration
    /// (current in, 1.28 uA reference, 64 ms integration, command mode).
    pub fn new(mut link: L) -> Result<Self> {
        let cregl = DIR_IN | iref_bits(IREF_DEFAULT) | TINT_DEFAULT;
        let cregh = DIV_2 | ENDIV_DI | LightMeasureMode::Cmd.bits();
        link.write_byte(ADDR_CREGL, cregl)?;
        link.write_byte(ADDR_CREGH, cregh)?;
        Ok(Self {
            link,
            cregl,
            cregh,
            iref: IREF_DEFAULT,
            tint: TINT_DEFAULT,
            dir: DIR_IN,
            conv_wait: Duration::from_millis(70),
            last: Tristimulus::default(),
            calibration: [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]],
        })
    }

    /// Select the measurement mode, read-modify-write on CREG-H with the
    /// start bit set.
    pub fn set_measure_mode(&mut self, mode: LightMeasureMode) -> Result<()> {
        let old = self.link.read_byte(ADDR_CREGH)?;
        self.cregh = (old & !MODE_MASK) | SS_START | mode.bits();
        self.link.write_byte(ADDR_CREGH, self.cregh)
    }

    /// Highest valid gain index.
    pub fn max_gain(&self) -> u8 {
        (GAIN_IREF_TBL.len() - 1) as u8
    }

    /// Select a gain step: a paired (iref, tint) setting plus the matching
    /// conversion wait. Index 0 is the least sensitive pairing.
    pub fn set_gain(&mut self, index: u8) -> Result<()> {
        if usize::from(index) >= GAIN_IREF_TBL.len() {
            return Err(Error::InvalidGain(index));
        }
        self.iref = GAIN_IREF_TBL[usize::from(index)];
        self.tint = GAIN_TINT_TBL[usize::from(index)];
        self.conv_wait = conversion_wait(self.tint);
        Ok(())
    }

    /// Run one triggered conversion cycle under the current settings:
    /// program CREG-L, start, wait out the integration, fetch X/Y/Z,
    /// stop back into the configuration state.
    pub fn trigger(&mut self) -> Result<()> {
        self.cregl = iref_bits(self.iref) | self.tint | self.dir;
        self.link.write_byte(ADDR_CREGL, self.cregl)?;
        self.link.write_byte(ADDR_OSR, SS_START | DOS_MEASURE)?;
        thread::sleep(self.conv_wait);
        self.last.x = self.link.read_word(ADDR_OUT_X)?;
        self.last.y = self.link.read_word(ADDR_OUT_Y)?;
        self.last.z = self.link.read_word(ADDR_OUT_Z)?;
        self.link.write_byte(ADDR_OSR, SS_STOP | DOS_CONFIG)
    }

    /// Cached value from the last trigger. The channel argument uses the
    /// interleaved hardware ordering: 1 is X, 3 is Y, 2 is Z.
    pub fn read_raw(&self, ch: u8) -> Result<u16> {
        match ch {
            1 => Ok(self.last.x),
            3 => Ok(self.last.y),
            2 => Ok(self.last.z),
            other => Err(Error::InvalidChannel(other)),
        }
    }

    /// Last fetched triple.
    pub fn last_value(&self) -> Tristimulus {
        self.last
    }

    /// Walk the gain table until the brightest channel sits in the middle
    /// third of full scale.
    ///
    /// Starts at the middle index; a reading below 1/3 of full scale steps
    /// the gain up, above 2/3 steps it down. Returns the settled index,
    /// which is the last in-range one when the walk runs off either end of
    /// the table.
    pub fn auto_adjust_gain(&mut self) -> Result<u8> {
        let mut index = (GAIN_IREF_TBL.len() / 2) as i32;
        let top = (GAIN_IREF_TBL.len() - 1) as i32;
        while (0..=top).contains(&index) {
            self.set_gain(index as u8)?;
            self.trigger()?;
            let max = self.last.x.max(self.last.y).max(self.last.z);
            if max < 65_535 / 3 {
                index += 1;
            } else if (max as u32) < 2 * 65_535 / 3 {
                break;
            } else {
                index -= 1;
            }
        }
        Ok(index.clamp(0, top) as u8)
    }

    /// Trigger one conversion and return the raw triple together with the
    /// sum-normalized coordinates.
    pub fn measure(&mut self) -> Result<(Tristimulus, [f64; 3])> {
        self.trigger()?;
        let raw = self.last;
        let sum = f64::from(raw.x) + f64::from(raw.y) + f64::from(raw.z);
        let norm = if sum > 0.0 {
            [
                f64::from(raw.x) / sum,
                f64::from(raw.y) / sum,
                f64::from(raw.z) / sum,
            ]
        } else {
            [0.0; 3]
        };
        Ok((raw, norm))
    }

    /// Replace the 3x3 calibration matrix (identity by default).
    pub fn set_calibration(&mut self, matrix: [[f64; 3]; 3]) {
        self.calibration = matrix;
    }

    /// Multiply a measured triple by the calibration matrix. Returns the
    /// absolute calibrated triple and the input-sum-normalized one.
    pub fn apply_calibration(&self, values: [f64; 3]) -> ([f64; 3], [f64; 3]) {
        let mut abs = [0.0; 3];
        for (row, out) in self.calibration.iter().zip(abs.iter_mut()) {
            *out = row[0] * values[0] + row[1] * values[1] + row[2] * values[2];
        }
        let sum: f64 = values.iter().sum();
        let norm = if sum != 0.0 {
            [abs[0] / sum, abs[1] / sum, abs[2] / sum]
        } else {
            [0.0; 3]
        };
        (abs, norm)
    }
}
