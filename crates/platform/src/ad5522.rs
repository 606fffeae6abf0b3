//! AD5522 four-channel parametric measurement unit.
//!
//! Reference: Analog Devices AD5522 datasheet (Rev. E), register section.
//!
//! The device is driven through a 29-bit shift register carried in a 4-byte
//! SPI frame, data in the 29 LSBs. Bit B28 selects read (1) or write (0),
//! B27..B24 select one or more PMU channels, B23..B22 select the register
//! space (system/PMU vs. the DAC M/C/X1 latches), B21..B16 carry the DAC
//! address, B15..B0 the payload. System-space registers are 22 bits wide
//! and their lower 7 bits are reserved ("write 0").
//!
//! Every mutator follows a read-modify-write policy over the live register:
//! read back, clear the named field, zero the reserved bits, write.

use std::thread;
use std::time::Duration;

use crate::spi::SpiLink;
use crate::{Error, Result};

/// Number of source/measure channels.
pub const NUM_CHANNELS: u8 = 4;

/// Channel-select bit for PMU0 (B24 once shifted into place).
pub const PMU0: u32 = 0x01;
/// Channel-select bit for PMU1.
pub const PMU1: u32 = 0x02;
/// Channel-select bit for PMU2.
pub const PMU2: u32 = 0x04;
/// Channel-select bit for PMU3.
pub const PMU3: u32 = 0x08;
/// All four channel-select bits, for broadcast writes.
pub const ALL_CHANNELS: u32 = PMU0 | PMU1 | PMU2 | PMU3;

/// Read-not-write flag for system-space register selectors.
const RD_NOTWR: u32 = 0x40;
/// Read-not-write flag for DAC register selectors.
const DAC_RD_NOTWR: u32 = RD_NOTWR << 6;

/// System control register selector.
const REG_SYSCTRL: u32 = 0x00;
/// Comparator status register selector.
const REG_COMP: u32 = 0x01;
/// Alarm status register selector.
const REG_ALARM: u32 = 0x03;

/// PMU register selector for a channel mask.
const fn pmu_reg(mask: u32) -> u32 {
    mask << 2
}

/// System control: thermal shutdown threshold 100 degC.
pub const SYS_CTRL_TMP_100: u32 = 0x7 << 3;
/// System control: current measurement gain x10.
pub const SYS_CTRL_I_GAIN_10: u32 = 0 << 6;
/// System control: MEASOUT attenuation 0.2.
pub const SYS_CTRL_MEASOUT_GAIN_200_MILLI: u32 = 1 << 7;
/// System control: latch clamp alarms.
pub const SYS_CTRL_CLAMPALM: u32 = 1 << 10;
/// System control: latch guard alarms.
pub const SYS_CTRL_GUARDALM: u32 = 1 << 11;
/// System control: DUT-ground sense enable.
pub const SYS_CTRL_DUTGND: u32 = 1 << 12;
/// MEASOUT/current gain field, bits B7..B6.
pub const SYS_CTRL_GAIN_MASK: u32 = 0xc0;

/// Alarm register: TMPALM and LTMPALM flags, bits B21..B20.
pub const ALARM_TMPALM_MASK: u32 = 0x30_0000;

/// PMU register: global alarm-clear strobe.
pub const PMU_CLEAR: u32 = 1 << 6;
/// PMU register: force-input enable.
pub const PMU_FIN: u32 = 1 << 12;
/// PMU register: channel enable.
pub const PMU_CH_EN: u32 = 1 << 21;

/// Force-mode field, bits B20..B19.
const FORCE_MODE_MASK: u32 = 0x18_0000;
/// Measure-mode field, bits B14..B13.
const MEASURE_MODE_MASK: u32 = 0x6000;
/// Current-range field, bits B17..B15.
const RANGE_MASK: u32 = 0x3_8000;
/// Output-enable field: CH_EN and FIN together.
const ENABLE_MASK: u32 = PMU_CH_EN | PMU_FIN;

/// 22-bit register width with the reserved low 7 bits cleared.
const PMU_WRITE_BASE_MASK: u32 = 0x3f_ff80;
/// System-control RMW base used by `configure`.
const SYSCTRL_WRITE_BASE_MASK: u32 = 0x3f_fffc;
/// System-control RMW base used by the gain setter.
const GAIN_WRITE_BASE_MASK: u32 = 0xff_fffe;

/// Offset DAC address (X1 only).
pub const DAC_OFFSET_X: u32 = 0x00;
/// Voltage-force DAC address.
pub const DAC_FIN_V: u32 = 0x0d;

/// Settling delay between configuration register writes.
const CONFIGURE_SETTLE: Duration = Duration::from_millis(15);

/// Reference voltage in microvolts.
pub const VREF_MICROVOLT: i64 = 5_000_000;
/// DAC span term, 4.5 x Vref expressed in millivolts.
const DAC_SPAN_MV: i64 = 22_500;
/// DAC span term, 4.5 x Vref expressed in microvolts.
const DAC_SPAN_UV: i64 = 22_500_000;
/// Shift applied after the precomputed current gain multiply.
const CURR_GAIN_SHIFT: u32 = 24;

/// The three per-channel DAC calibration latches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DacLatch {
    /// Gain calibration term.
    M = 1,
    /// Offset calibration term.
    C = 2,
    /// User-programmed code.
    X1 = 3,
}

/// DAC register selector for a channel mask, latch and DAC address.
const fn dac_reg(mask: u32, latch: DacLatch, addr: u32) -> u32 {
    (mask << 8) | ((latch as u32) << 6) | addr
}

/// What the channel drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForceMode {
    /// Force voltage.
    Fv = 0,
    /// Force current.
    Fi = 1,
    /// High impedance, voltage DAC pre-loaded.
    HizV = 2,
    /// High impedance, current DAC pre-loaded.
    HizI = 3,
}

impl ForceMode {
    /// Field value positioned at B20..B19.
    pub const fn bits(self) -> u32 {
        (self as u32) << 19
    }

    /// Decode the field from a PMU register value.
    pub const fn from_reg(reg: u32) -> Self {
        match (reg & FORCE_MODE_MASK) >> 19 {
            0 => ForceMode::Fv,
            1 => ForceMode::Fi,
            2 => ForceMode::HizV,
            _ => ForceMode::HizI,
        }
    }
}

impl TryFrom<u8> for ForceMode {
    type Error = Error;

    fn try_from(v: u8) -> Result<Self> {
        match v {
            0 => Ok(ForceMode::Fv),
            1 => Ok(ForceMode::Fi),
            2 => Ok(ForceMode::HizV),
            3 => Ok(ForceMode::HizI),
            other => Err(Error::InvalidMode(other)),
        }
    }
}

/// What the channel routes to the measurement output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeasureMode {
    /// Measure current.
    Mi = 0,
    /// Measure voltage.
    Mv = 1,
    /// Measure die temperature.
    Mt = 2,
    /// Measurement output high impedance.
    Hiz = 3,
}

impl MeasureMode {
    /// Field value positioned at B14..B13.
    pub const fn bits(self) -> u32 {
        (self as u32) << 13
    }

    /// Decode the field from a PMU register value.
    pub const fn from_reg(reg: u32) -> Self {
        match (reg & MEASURE_MODE_MASK) >> 13 {
            0 => MeasureMode::Mi,
            1 => MeasureMode::Mv,
            2 => MeasureMode::Mt,
            _ => MeasureMode::Hiz,
        }
    }
}

impl TryFrom<u8> for MeasureMode {
    type Error = Error;

    fn try_from(v: u8) -> Result<Self> {
        match v {
            0 => Ok(MeasureMode::Mi),
            1 => Ok(MeasureMode::Mv),
            2 => Ok(MeasureMode::Mt),
            3 => Ok(MeasureMode::Hiz),
            other => Err(Error::InvalidMode(other)),
        }
    }
}

/// Current measurement range. Exactly one is active per channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CurrentRange {
    /// 5 uA full scale (200 kOhm sense).
    Ua5 = 0,
    /// 20 uA full scale (50 kOhm sense).
    Ua20 = 1,
    /// 200 uA full scale (5 kOhm sense).
    Ua200 = 2,
    /// 2 mA full scale (500 Ohm sense).
    Ma2 = 3,
    /// External sense resistor.
    Ext = 4,
}

/// Precalculated gain factors converting nanoamps to raw DAC steps
/// (Rsense x 2^16 / (4.5 x Vref), scaled by 2^24).
const CURR_GAIN_TBL: [i64; 5] = [97_734_366, 24_433_591, 2_443_359, 244_335, 48_867];

/// Absolute full-scale limit per range in nanoamps.
const CURR_MAX_NA_TBL: [i64; 5] = [5_000, 20_000, 200_000, 2_000_000, 10_000_000];

impl CurrentRange {
    /// Field value positioned at B17..B15.
    pub const fn bits(self) -> u32 {
        (self as u32) << 15
    }

    /// Decode the field from a PMU register value.
    ///
    /// Field values 5 and 6 control the external buffer and do not name a
    /// range; they are rejected.
    pub fn from_reg(reg: u32) -> Result<Self> {
        Self::try_from(((reg & RANGE_MASK) >> 15) as u8)
    }

    /// Precalculated nanoamp-to-DAC gain factor.
    pub const fn gain(self) -> i64 {
        CURR_GAIN_TBL[self as usize]
    }

    /// Absolute full-scale limit in nanoamps.
    pub const fn max_nanoamp(self) -> i64 {
        CURR_MAX_NA_TBL[self as usize]
    }

    /// FIN DAC address for this range.
    pub const fn dac_addr(self) -> u32 {
        0x08 + self as u32
    }
}

impl TryFrom<u8> for CurrentRange {
    type Error = Error;

    fn try_from(v: u8) -> Result<Self> {
        match v {
            0 => Ok(CurrentRange::Ua5),
            1 => Ok(CurrentRange::Ua20),
            2 => Ok(CurrentRange::Ua200),
            3 => Ok(CurrentRange::Ma2),
            4 => Ok(CurrentRange::Ext),
            other => Err(Error::InvalidRange(other)),
        }
    }
}

/// Build the 4-byte frame for a 22-bit system-space register write.
pub fn format_sys_frame(reg: u32, val: u32) -> [u8; 4] {
    ((reg << 22) | (val & 0x3f_ffff)).to_be_bytes()
}

/// Build the 4-byte frame for a 16-bit DAC register write.
pub fn format_dac_frame(reg: u32, val: u16) -> [u8; 4] {
    ((reg << 16) | u32::from(val)).to_be_bytes()
}

/// Extract a 22-bit register value from a 3-byte readback, masking the
/// address bits the device echoes in the top byte.
pub fn parse_sys_readback(buf: &[u8; 3]) -> u32 {
    (u32::from(buf[0] & 0x3f) << 16) | (u32::from(buf[1]) << 8) | u32::from(buf[2])
}

/// Extract a 16-bit DAC value from a 3-byte readback.
pub fn parse_dac_readback(buf: &[u8; 3]) -> u16 {
    (u16::from(buf[1]) << 8) | u16::from(buf[2])
}

/// Convert a voltage level in microvolts to the X1 DAC code, given the
/// current offset-DAC code.
///
/// `code = offset x 35/45 + mV x 65535 / (4.5 x Vref_mV)
///                        + uV x 65535 / (4.5 x Vref_uV)`
///
/// 64-bit intermediates keep the millivolt term from overflowing.
pub fn voltage_to_dac(offset_code: u16, microvolts: i64) -> u16 {
    let mv = microvolts / 1000;
    let uv = microvolts - 1000 * mv;
    let mut code = i64::from(offset_code) * 35 / 45;
    code += mv * 65_535 / DAC_SPAN_MV;
    code += uv * 65_535 / DAC_SPAN_UV;
    code.clamp(0, 65_535) as u16
}

/// Inverse of [`voltage_to_dac`]: X1 code back to microvolts.
pub fn dac_to_voltage(offset_code: u16, code: u16) -> i64 {
    (i64::from(code) - i64::from(offset_code) * 35 / 45) * DAC_SPAN_UV / 65_535
}

/// Convert a current level in nanoamps to the range-specific X1 DAC code.
///
/// The request is clamped to the range's full scale, the gain product is
/// shifted down arithmetically (negative currents stay sign-extended), and
/// the mid-scale offset 32768 recenters the result.
pub fn current_to_dac(range: CurrentRange, nanoamps: i64) -> u16 {
    let limit = range.max_nanoamp();
    let ina = nanoamps.clamp(-limit, limit);
    let code = 32_768 + ((ina * range.gain()) >> CURR_GAIN_SHIFT);
    code.clamp(0, 65_535) as u16
}

/// Driver state: the SPI link plus shadows of every writable register.
///
/// The shadows track the last value written; mutators still read the live
/// register back before modifying, per the RMW policy above.
pub struct PmuDevice<L: SpiLink> {
    link: L,
    sysctrl: u32,
    pmu: [u32; 4],
    offset_dac: u16,
}

impl<L: SpiLink> PmuDevice<L> {
    /// Take ownership of the bus link. No register is touched until
    /// [`configure`](Self::configure).
    pub fn new(link: L) -> Self {
        Self {
            link,
            sysctrl: 0,
            pmu: [0; 4],
            offset_dac: 0,
        }
    }

    fn write_sys_reg(&mut self, reg: u32, val: u32) -> Result<()> {
        self.link.write(&format_sys_frame(reg, val))
    }

    fn read_sys_reg(&mut self, reg: u32) -> Result<u32> {
        let tx = format_sys_frame(RD_NOTWR | reg, 0);
        let mut rx = [0u8; 3];
        self.link.write_then_read(&tx, &mut rx)?;
        Ok(parse_sys_readback(&rx))
    }

    fn write_dac_reg(&mut self, reg: u32, val: u16) -> Result<()> {
        self.link.write(&format_dac_frame(reg, val))
    }

    fn read_dac_reg(&mut self, reg: u32) -> Result<u16> {
        let tx = format_dac_frame(DAC_RD_NOTWR | reg, 0);
        let mut rx = [0u8; 3];
        self.link.write_then_read(&tx, &mut rx)?;
        Ok(parse_dac_readback(&rx))
    }

    fn channel_mask(ch: u8) -> Result<u32> {
        if ch >= NUM_CHANNELS {
            return Err(Error::InvalidChannel(ch));
        }
        Ok(1 << ch)
    }

    /// RMW one channel's PMU register: read back, clear `clear`, zero the
    /// reserved low 7 bits, or in `set`, write. Returns the written value.
    fn update_pmu(&mut self, ch: u8, clear: u32, set: u32) -> Result<u32> {
        let mask = Self::channel_mask(ch)?;
        let rd = self.read_sys_reg(pmu_reg(mask))?;
        let val = ((rd & !clear) & PMU_WRITE_BASE_MASK) | set;
        self.write_sys_reg(pmu_reg(mask), val)?;
        self.pmu[ch as usize] = val;
        Ok(val)
    }

    /// Initialize the system and PMU registers.
    ///
    /// Explicit values are written verbatim. Otherwise the system register
    /// gets the default safety word (DUT-ground sense, guard and clamp
    /// alarms, MEASOUT gain 0.2, current gain x10, thermal threshold
    /// 100 degC) and all four PMU registers get high-impedance current
    /// force, 2 mA range and measurement output disconnected. A settling
    /// delay separates the register writes.
    ///
    /// The caller must ensure the supply rails and offset DAC are set
    /// consistently before enabling any output.
    pub fn configure(&mut self, sys: Option<u32>, pmu: Option<u32>) -> Result<()> {
        match sys {
            Some(val) => {
                self.write_sys_reg(REG_SYSCTRL, val)?;
                self.sysctrl = val & 0x3f_ffff;
            }
            None => {
                let rd = self.read_sys_reg(REG_SYSCTRL)?;
                let val = (rd & SYSCTRL_WRITE_BASE_MASK)
                    | SYS_CTRL_DUTGND
                    | SYS_CTRL_GUARDALM
                    | SYS_CTRL_CLAMPALM
                    | SYS_CTRL_MEASOUT_GAIN_200_MILLI
                    | SYS_CTRL_I_GAIN_10
                    | SYS_CTRL_TMP_100;
                thread::sleep(CONFIGURE_SETTLE);
                self.write_sys_reg(REG_SYSCTRL, val)?;
                self.sysctrl = val;
            }
        }
        thread::sleep(CONFIGURE_SETTLE);
        let val = match pmu {
            Some(val) => val & 0x3f_ffff,
            None => {
                let rd = self.read_sys_reg(pmu_reg(PMU0))?;
                let val = (rd & PMU_WRITE_BASE_MASK)
                    | ForceMode::HizI.bits()
                    | CurrentRange::Ma2.bits()
                    | MeasureMode::Hiz.bits();
                thread::sleep(CONFIGURE_SETTLE);
                val
            }
        };
        self.write_sys_reg(pmu_reg(ALL_CHANNELS), val)?;
        self.pmu = [val; 4];
        Ok(())
    }

    /// Select the force mode for `ch` (PMU register bits B20..B19).
    pub fn set_force_mode(&mut self, ch: u8, mode: ForceMode) -> Result<()> {
        self.update_pmu(ch, FORCE_MODE_MASK, mode.bits())?;
        Ok(())
    }

    /// Read back the force mode of `ch`.
    pub fn get_force_mode(&mut self, ch: u8) -> Result<ForceMode> {
        Ok(ForceMode::from_reg(self.read_pmu_reg(ch)?))
    }

    /// Select the measure mode for `ch` (PMU register bits B14..B13).
    pub fn set_measure_mode(&mut self, ch: u8, mode: MeasureMode) -> Result<()> {
        self.update_pmu(ch, MEASURE_MODE_MASK, mode.bits())?;
        Ok(())
    }

    /// Read back the measure mode of `ch`.
    pub fn get_measure_mode(&mut self, ch: u8) -> Result<MeasureMode> {
        Ok(MeasureMode::from_reg(self.read_pmu_reg(ch)?))
    }

    /// Select the current range for `ch` (PMU register bits B17..B15).
    pub fn set_range(&mut self, ch: u8, range: CurrentRange) -> Result<()> {
        self.update_pmu(ch, RANGE_MASK, range.bits())?;
        Ok(())
    }

    /// Read back the active current range of `ch`.
    pub fn get_range(&mut self, ch: u8) -> Result<CurrentRange> {
        CurrentRange::from_reg(self.read_pmu_reg(ch)?)
    }

    /// Enable or disable the channel output. Enabling sets both the
    /// channel-enable and force-input bits; disabling clears them.
    pub fn set_output_state(&mut self, ch: u8, on: bool) -> Result<()> {
        let set = if on { PMU_CH_EN | PMU_FIN } else { 0 };
        self.update_pmu(ch, ENABLE_MASK, set)?;
        Ok(())
    }

    /// Apply [`set_output_state`](Self::set_output_state) to all channels.
    pub fn set_all_output_state(&mut self, on: bool) -> Result<()> {
        for ch in 0..NUM_CHANNELS {
            self.set_output_state(ch, on)?;
        }
        Ok(())
    }

    /// Program the voltage-force X1 DAC of `ch` to `microvolts`.
    ///
    /// The offset term is read back from the device so the code stays
    /// consistent with whatever rail/offset the board selected. Returns the
    /// written code.
    pub fn set_voltage(&mut self, ch: u8, microvolts: i64) -> Result<u16> {
        let mask = Self::channel_mask(ch)?;
        let offset = self.read_offset_dac()?;
        let code = voltage_to_dac(offset, microvolts);
        self.write_dac_reg(dac_reg(mask, DacLatch::X1, DAC_FIN_V), code)?;
        Ok(code)
    }

    /// Program the current-force X1 DAC of `ch` to `nanoamps`, using the
    /// channel's active range for gain and DAC address. Returns the written
    /// code.
    pub fn set_current(&mut self, ch: u8, nanoamps: i64) -> Result<u16> {
        let mask = Self::channel_mask(ch)?;
        let range = CurrentRange::from_reg(self.read_sys_reg(pmu_reg(mask))?)?;
        let code = current_to_dac(range, nanoamps);
        self.write_dac_reg(dac_reg(mask, DacLatch::X1, range.dac_addr()), code)?;
        Ok(code)
    }

    /// Broadcast-write the offset DAC shared by all four channels.
    pub fn set_offset(&mut self, code: u16) -> Result<()> {
        self.write_dac_reg(dac_reg(ALL_CHANNELS, DacLatch::X1, DAC_OFFSET_X), code)?;
        self.offset_dac = code;
        Ok(())
    }

    /// Last offset-DAC code written through this driver.
    pub fn offset_dac(&self) -> u16 {
        self.offset_dac
    }

    /// Read the offset-DAC code back from the device.
    pub fn read_offset_dac(&mut self) -> Result<u16> {
        self.read_dac_reg(dac_reg(ALL_CHANNELS, DacLatch::X1, DAC_OFFSET_X))
    }

    /// Program the clamp (compliance) level for `ch`.
    ///
    /// The DAC encoding for the clamp registers has not been qualified on
    /// this board revision.
    pub fn set_compliance(&mut self, _ch: u8, _level: i64) -> Result<()> {
        Err(Error::Unsupported("current compliance"))
    }

    /// Select the MEASOUT/current gain pair (system control bits B7..B6).
    pub fn set_gain(&mut self, gain: u8) -> Result<()> {
        if gain > 3 {
            return Err(Error::InvalidGain(gain));
        }
        let rd = self.read_sys_reg(REG_SYSCTRL)?;
        let val = (rd & GAIN_WRITE_BASE_MASK & !SYS_CTRL_GAIN_MASK) | (u32::from(gain) << 6);
        self.write_sys_reg(REG_SYSCTRL, val)?;
        self.sysctrl = val & 0x3f_ffff;
        Ok(())
    }

    /// Read back the gain field.
    pub fn get_gain(&mut self) -> Result<u8> {
        Ok(((self.read_sys_reg(REG_SYSCTRL)? & SYS_CTRL_GAIN_MASK) >> 6) as u8)
    }

    /// Read the temperature-alarm flags (TMPALM, LTMPALM).
    pub fn get_alarm_flag(&mut self) -> Result<u8> {
        Ok(((self.read_alarm_reg()? & ALARM_TMPALM_MASK) >> 20) as u8)
    }

    /// Strobe the global alarm-clear bit. The bit is global, so writing any
    /// PMU register suffices; channel 0 is used.
    pub fn clear_alarm_flag(&mut self) -> Result<()> {
        let rd = self.read_sys_reg(pmu_reg(PMU0))?;
        let val = (rd & PMU_WRITE_BASE_MASK) | PMU_CLEAR;
        self.write_sys_reg(pmu_reg(PMU0), val)
    }

    /// Read one channel's PMU register.
    pub fn read_pmu_reg(&mut self, ch: u8) -> Result<u32> {
        let mask = Self::channel_mask(ch)?;
        self.read_sys_reg(pmu_reg(mask))
    }

    /// Read the system control register.
    pub fn read_sysctrl_reg(&mut self) -> Result<u32> {
        self.read_sys_reg(REG_SYSCTRL)
    }

    /// Read the alarm status register.
    pub fn read_alarm_reg(&mut self) -> Result<u32> {
        self.read_sys_reg(REG_ALARM)
    }

    /// Read the comparator status register.
    pub fn read_comp_reg(&mut self) -> Result<u32> {
        self.read_sys_reg(REG_COMP)
    }

    /// Read back a FIN X1 DAC. Selectors 0..4 name the current ranges,
    /// selector 5 the voltage DAC.
    pub fn read_fin_dac_x1(&mut self, ch: u8, range_sel: u8) -> Result<u16> {
        let mask = Self::channel_mask(ch)?;
        if range_sel > 5 {
            return Err(Error::InvalidRange(range_sel));
        }
        let addr = (u32::from(range_sel) | 8) & 0xf;
        self.read_dac_reg(dac_reg(mask, DacLatch::X1, addr))
    }

    /// Shadow of one channel's PMU register (last written value).
    pub fn pmu_shadow(&self, ch: u8) -> Result<u32> {
        Self::channel_mask(ch)?;
        Ok(self.pmu[ch as usize])
    }

    /// Shadow of the system control register (last written value).
    pub fn sysctrl_shadow(&self) -> u32 {
        self.sysctrl
    }
}
