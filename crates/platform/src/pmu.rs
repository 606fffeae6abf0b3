//! Analog-board coordinator around the AD5522.
//!
//! The board pairs the PMU with five supply-select GPIO lines, a reset line
//! and the external measurement ADC. Selecting a supply rail always updates
//! the PMU's offset DAC in the same call, so the legal output window stays
//! consistent with the powered rail:
//!
//! ```text
//! rail   VSS      VDD      Vout @ DAC 0   Vout @ DAC 65535
//! low    -19.5V   +11.5V   -16.25V        + 6.25V
//! mid    -16.5V   +16.5V   -11.25V        +11.25V
//! high   -11.5V   +19.5V   - 5.25V        +17.25V
//! ```

use std::thread;
use std::time::Duration;

use tracing::warn;

use crate::ad5522::{ForceMode, MeasureMode, PmuDevice};
use crate::adc::AdcReader;
use crate::gpio::GpioLine;
use crate::spi::SpiLink;
use crate::{Error, Result};

/// Reference voltage in volts, for the ADC conversion formulas.
const VREF_VOLT: f64 = 5.0;

/// Sense resistor per current range in ohms.
const RSENSE_OHM_TBL: [f64; 5] = [200_000.0, 50_000.0, 5_000.0, 500.0, 100.0];

/// Reset-line hold time (datasheet minimum is 1.5 us).
const RESET_HOLD: Duration = Duration::from_micros(3);

/// Which analog supply rail is powered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupplyRail {
    /// Rails disabled.
    Off = 0,
    /// -19.5 V .. +11.5 V envelope.
    Low = 1,
    /// -16.5 V .. +16.5 V envelope.
    Mid = 2,
    /// -11.5 V .. +19.5 V envelope.
    High = 3,
}

impl SupplyRail {
    /// 5-bit GPIO code over [dcdc, ldo, lo, mid, hi].
    pub const fn gpio_code(self) -> u8 {
        match self {
            SupplyRail::Off => 0x00,
            SupplyRail::Low => 0x1c,
            SupplyRail::Mid => 0x1a,
            SupplyRail::High => 0x19,
        }
    }

    /// Decode a GPIO code; unknown codes map to `Off`.
    pub const fn from_gpio_code(code: u8) -> Self {
        match code {
            0x1c => SupplyRail::Low,
            0x1a => SupplyRail::Mid,
            0x19 => SupplyRail::High,
            _ => SupplyRail::Off,
        }
    }

    /// Offset-DAC code paired with this rail (AD5522 datasheet p. 36).
    pub const fn offset_dac(self) -> u16 {
        match self {
            SupplyRail::Off => 42_130,
            SupplyRail::Low => 42_130,
            SupplyRail::Mid => 60_855,
            SupplyRail::High => 19_660,
        }
    }

    /// Legal output window in microvolts, (min, max).
    pub const fn window_microvolt(self) -> (i64, i64) {
        match self {
            SupplyRail::Off => (0, 0),
            SupplyRail::Low => (-16_250_000, 6_250_000),
            SupplyRail::Mid => (-11_250_000, 11_250_000),
            SupplyRail::High => (-5_250_000, 17_250_000),
        }
    }
}

impl TryFrom<u8> for SupplyRail {
    type Error = Error;

    fn try_from(v: u8) -> Result<Self> {
        match v {
            0 => Ok(SupplyRail::Off),
            1 => Ok(SupplyRail::Low),
            2 => Ok(SupplyRail::Mid),
            3 => Ok(SupplyRail::High),
            other => Err(Error::InvalidRange(other)),
        }
    }
}

/// Output mode requested for a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    /// Source a voltage (level in volts).
    Voltage,
    /// Source a current (level in amps).
    Current,
    /// Disconnect the channel.
    Off,
}

/// Quantity routed to the measurement ADC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeasureTarget {
    /// Channel current in amps.
    Current,
    /// Channel voltage in volts.
    Voltage,
}

/// The board's GPIO lines.
pub struct SupplyPins {
    /// DC-DC converter enable.
    pub dcdc_en: GpioLine,
    /// LDO enable.
    pub ldo_en: GpioLine,
    /// Low-rail select.
    pub sup_lo: GpioLine,
    /// Mid-rail select.
    pub sup_mid: GpioLine,
    /// High-rail select.
    pub sup_hi: GpioLine,
    /// PMU reset, active low.
    pub reset: GpioLine,
    /// TMPALM status input from the PMU.
    pub tmp_alarm: GpioLine,
    /// CGALM (clamp/guard alarm) status input.
    pub cg_alarm: GpioLine,
    /// BUSY status input.
    pub busy: GpioLine,
}

/// The analog board: PMU, supply selects and measurement ADC.
pub struct PmuBoard<L: SpiLink> {
    dev: PmuDevice<L>,
    pins: SupplyPins,
    adc: AdcReader,
}

impl<L: SpiLink> PmuBoard<L> {
    /// Assemble the board from its parts. No hardware is touched.
    pub fn new(dev: PmuDevice<L>, pins: SupplyPins, adc: AdcReader) -> Self {
        Self { dev, pins, adc }
    }

    /// The owned PMU device, for register-level operations.
    pub fn device_mut(&mut self) -> &mut PmuDevice<L> {
        &mut self.dev
    }

    /// Number of source/measure channels.
    pub fn channel_count(&self) -> u8 {
        crate::ad5522::NUM_CHANNELS
    }

    /// Level of the TMPALM status pin.
    pub fn temp_alarm_pin(&self) -> Result<bool> {
        self.pins.tmp_alarm.get()
    }

    /// Level of the CGALM (clamp/guard alarm) status pin.
    pub fn cg_alarm_pin(&self) -> Result<bool> {
        self.pins.cg_alarm.get()
    }

    /// Level of the BUSY status pin.
    pub fn busy(&self) -> Result<bool> {
        self.pins.busy.get()
    }

    /// Pulse the PMU reset line.
    pub fn reset(&mut self) -> Result<()> {
        self.pins.reset.set(false)?;
        thread::sleep(RESET_HOLD);
        self.pins.reset.set(true)?;
        thread::sleep(RESET_HOLD);
        Ok(())
    }

    /// Power the requested rail and write its offset-DAC code in the same
    /// call, keeping the output window and bias consistent.
    pub fn set_supply_rail(&mut self, rail: SupplyRail) -> Result<()> {
        let code = rail.gpio_code();
        self.pins.dcdc_en.set(code & 0x10 != 0)?;
        self.pins.ldo_en.set(code & 0x08 != 0)?;
        self.pins.sup_lo.set(code & 0x04 != 0)?;
        self.pins.sup_mid.set(code & 0x02 != 0)?;
        self.pins.sup_hi.set(code & 0x01 != 0)?;
        self.dev.set_offset(rail.offset_dac())
    }

    /// Reconstruct the powered rail from the GPIO lines.
    pub fn get_supply_rail(&self) -> Result<SupplyRail> {
        let mut code = 0u8;
        if self.pins.dcdc_en.get()? {
            code |= 0x10;
        }
        if self.pins.ldo_en.get()? {
            code |= 0x08;
        }
        if self.pins.sup_lo.get()? {
            code |= 0x04;
        }
        if self.pins.sup_mid.get()? {
            code |= 0x02;
        }
        if self.pins.sup_hi.get()? {
            code |= 0x01;
        }
        Ok(SupplyRail::from_gpio_code(code))
    }

    /// Lower edge of the legal voltage window for the powered rail, volts.
    pub fn min_voltage(&self) -> Result<f64> {
        Ok(self.get_supply_rail()?.window_microvolt().0 as f64 / 1e6)
    }

    /// Upper edge of the legal voltage window for the powered rail, volts.
    pub fn max_voltage(&self) -> Result<f64> {
        Ok(self.get_supply_rail()?.window_microvolt().1 as f64 / 1e6)
    }

    /// Drive `ch` with the requested mode and level (volts or amps).
    ///
    /// The channel first moves to the matching high-impedance pre-stage so
    /// the internal circuitry settles at the new DAC code, then switches to
    /// the active force mode and enables the output. Voltage levels are
    /// clamped to the powered rail's window, current levels to the active
    /// range's full scale.
    pub fn set_output(&mut self, ch: u8, mode: OutputMode, level: f64) -> Result<()> {
        match mode {
            OutputMode::Off => self.dev.set_output_state(ch, false),
            OutputMode::Voltage => {
                let (min_uv, max_uv) = self.get_supply_rail()?.window_microvolt();
                let uv = ((level * 1e6) as i64).clamp(min_uv, max_uv);
                self.dev.set_force_mode(ch, ForceMode::HizV)?;
                self.dev.set_voltage(ch, uv)?;
                self.dev.set_force_mode(ch, ForceMode::Fv)?;
                self.dev.set_output_state(ch, true)
            }
            OutputMode::Current => {
                let range = self.dev.get_range(ch)?;
                let limit = range.max_nanoamp();
                let na = ((level * 1e9) as i64).clamp(-limit, limit);
                self.dev.set_force_mode(ch, ForceMode::HizI)?;
                self.dev.set_current(ch, na)?;
                self.dev.set_force_mode(ch, ForceMode::Fi)?;
                self.dev.set_output_state(ch, true)
            }
        }
    }

    /// Route `ch` to the measurement ADC, convert one sample to SI units
    /// and return the channel to measurement high impedance.
    ///
    /// Conversion follows table 11, p. 33 of the datasheet. The voltage
    /// formula is the one this firmware has always shipped; datasheet
    /// Rev. D and Rev. E print a different one.
    pub fn measure(&mut self, ch: u8, target: MeasureTarget) -> Result<f64> {
        // MEASOUT gain 0.2, current gain x10
        self.dev.set_gain(2)?;
        let level = match target {
            MeasureTarget::Current => {
                self.dev.set_measure_mode(ch, MeasureMode::Mi)?;
                let range = self.dev.get_range(ch)?;
                let raw = f64::from(self.adc.read_raw()?);
                let volts = VREF_VOLT * raw / 65_536.0 - VREF_VOLT * 0.45;
                volts / (RSENSE_OHM_TBL[range as usize] * 10.0 * 0.2)
            }
            MeasureTarget::Voltage => {
                self.dev.set_measure_mode(ch, MeasureMode::Mv)?;
                let rail = self.get_supply_rail()?;
                let raw = f64::from(self.adc.read_raw()?);
                raw * VREF_VOLT / 65_536.0 * 5.0
                    - 3.5 * VREF_VOLT * f64::from(rail.offset_dac()) / 65_536.0
            }
        };
        self.dev.set_measure_mode(ch, MeasureMode::Hiz)?;
        Ok(level)
    }

    /// Disable every channel output.
    pub fn turn_all_off(&mut self) -> Result<()> {
        self.dev.set_all_output_state(false)
    }
}

impl<L: SpiLink> Drop for PmuBoard<L> {
    fn drop(&mut self) {
        // Outputs off and rails unpowered before the bus handles close.
        if let Err(e) = self.dev.set_all_output_state(false) {
            warn!("pmu teardown: disabling outputs failed: {e}");
        }
        if let Err(e) = self.set_supply_rail(SupplyRail::Off) {
            warn!("pmu teardown: disabling supply rails failed: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rail_gpio_codes_match_the_board_wiring() {
        assert_eq!(SupplyRail::Off.gpio_code(), 0x00);
        assert_eq!(SupplyRail::Low.gpio_code(), 0x1c);
        assert_eq!(SupplyRail::Mid.gpio_code(), 0x1a);
        assert_eq!(SupplyRail::High.gpio_code(), 0x19);
    }

    #[test]
    fn rail_codes_round_trip_and_unknown_maps_to_off() {
        for rail in [
            SupplyRail::Off,
            SupplyRail::Low,
            SupplyRail::Mid,
            SupplyRail::High,
        ] {
            assert_eq!(SupplyRail::from_gpio_code(rail.gpio_code()), rail);
        }
        assert_eq!(SupplyRail::from_gpio_code(0x1f), SupplyRail::Off);
        assert_eq!(SupplyRail::from_gpio_code(0x04), SupplyRail::Off);
    }

    #[test]
    fn rail_windows_are_ordered_and_off_is_empty() {
        for rail in [SupplyRail::Low, SupplyRail::Mid, SupplyRail::High] {
            let (min, max) = rail.window_microvolt();
            assert!(min < max);
        }
        assert_eq!(SupplyRail::Off.window_microvolt(), (0, 0));
    }

    #[test]
    fn mid_rail_offset_code_is_60855() {
        assert_eq!(SupplyRail::Mid.offset_dac(), 60_855);
        assert_eq!(SupplyRail::High.offset_dac(), 19_660);
    }
}
