//! Script-visible peripheral objects.
//!
//! Each interpreter generation gets `led`, `pmu`, `lmu`, `hw` and `db`
//! globals. The wrappers hold shared handles into the peripherals owned by
//! the daemon; the interpreter never outlives them. Channel numbers are
//! 1-based on the script side and translated here.
//!
//! Error surface: argument-range rejections are logged and swallowed so a
//! scripted sweep survives a stray channel number, while transport faults
//! are raised as Lua errors and land in the reply envelope.

use std::cell::RefCell;
use std::rc::Rc;

use mlua::{Lua, UserData, UserDataMethods};
use tracing::warn;

use vost_platform::ad5522::{CurrentRange, ForceMode, MeasureMode};
use vost_platform::i2c::I2cLink;
use vost_platform::identity::Identity;
use vost_platform::mcdc04::{LightMeasureMode, LightSensor};
use vost_platform::pmu::{MeasureTarget, OutputMode, PmuBoard, SupplyRail};
use vost_platform::spi::SpiLink;
use vost_platform::tlc5948a::LedDriver;

use crate::config::DbConfig;
use crate::script::Bindings;

/// The full hardware set installed into every interpreter generation.
pub struct HwBindings<P, Led, Lmu>
where
    P: SpiLink + 'static,
    Led: SpiLink + 'static,
    Lmu: I2cLink + 'static,
{
    /// Analog board around the PMU.
    pub pmu: Rc<RefCell<PmuBoard<P>>>,
    /// LED driver.
    pub led: Rc<RefCell<LedDriver<Led>>>,
    /// Color sensor.
    pub lmu: Rc<RefCell<LightSensor<Lmu>>>,
    /// Identity sources.
    pub hw: Identity,
    /// Results database coordinates.
    pub db: DbConfig,
}

impl<P, Led, Lmu> Bindings for HwBindings<P, Led, Lmu>
where
    P: SpiLink + 'static,
    Led: SpiLink + 'static,
    Lmu: I2cLink + 'static,
{
    fn install(&self, lua: &Lua) -> mlua::Result<()> {
        let globals = lua.globals();
        globals.set("pmu", LuaPmu(self.pmu.clone()))?;
        globals.set("led", LuaLed(self.led.clone()))?;
        globals.set("lmu", LuaLmu(self.lmu.clone()))?;
        globals.set("hw", LuaHw(self.hw.clone()))?;
        let db = lua.create_table()?;
        db.set("host", self.db.host.clone())?;
        db.set("port", self.db.port)?;
        db.set("user", self.db.user.clone())?;
        db.set("password", self.db.password.clone())?;
        globals.set("db", db)?;
        Ok(())
    }
}

/// Swallow argument-range rejections (warn and no-op, the historical
/// script surface); raise transport faults as Lua errors.
fn filter<T>(ctx: &str, result: vost_platform::Result<T>) -> mlua::Result<Option<T>> {
    match result {
        Ok(v) => Ok(Some(v)),
        Err(e) if e.is_argument_error() => {
            warn!("{ctx}: {e}");
            Ok(None)
        }
        Err(e) => Err(mlua::Error::external(e)),
    }
}

/// Like [`filter`] but with a fallback value for the swallowed case.
fn filter_or<T>(ctx: &str, result: vost_platform::Result<T>, fallback: T) -> mlua::Result<T> {
    Ok(filter(ctx, result)?.unwrap_or(fallback))
}

/// Script channel numbers are 1-based; anything outside 1..=4 maps to an
/// index the driver rejects.
fn to_channel(ch: i64) -> u8 {
    if (1..=4).contains(&ch) {
        (ch - 1) as u8
    } else {
        u8::MAX
    }
}

/// LED channels are 0-based on both sides, matching the silkscreen.
/// Out-of-range maps to an index the driver rejects.
fn to_led_channel(ch: i64) -> u8 {
    u8::try_from(ch).unwrap_or(u8::MAX)
}

fn force_mode_from_str(mode: &str) -> ForceMode {
    match mode {
        "fv" => ForceMode::Fv,
        "fi" => ForceMode::Fi,
        "hizv" => ForceMode::HizV,
        _ => ForceMode::HizI,
    }
}

fn measure_mode_from_str(mode: &str) -> MeasureMode {
    match mode {
        "mi" => MeasureMode::Mi,
        "mv" => MeasureMode::Mv,
        "mt" => MeasureMode::Mt,
        _ => MeasureMode::Hiz,
    }
}

struct LuaPmu<P: SpiLink + 'static>(Rc<RefCell<PmuBoard<P>>>);

impl<P: SpiLink + 'static> UserData for LuaPmu<P> {
    fn add_methods<M: UserDataMethods<Self>>(methods: &mut M) {
        methods.add_method("set_supply_rail", |_, this, rail: u8| {
            let rail = filter("pmu.set_supply_rail", SupplyRail::try_from(rail))?;
            if let Some(rail) = rail {
                let _ = filter("pmu.set_supply_rail", this.0.borrow_mut().set_supply_rail(rail))?;
            }
            Ok(())
        });
        methods.add_method("get_supply_rail", |_, this, ()| {
            this.0
                .borrow()
                .get_supply_rail()
                .map(|r| r as u8)
                .map_err(mlua::Error::external)
        });
        methods.add_method("set_output", |_, this, (ch, mode, level): (i64, String, Option<f64>)| {
            let mode = match mode.as_str() {
                "v" => OutputMode::Voltage,
                "i" => OutputMode::Current,
                "off" => OutputMode::Off,
                other => {
                    return Err(mlua::Error::RuntimeError(format!("unknown mode {other}")))
                }
            };
            let level = match (mode, level) {
                (OutputMode::Off, _) => 0.0,
                (_, Some(level)) => level,
                (_, None) => {
                    return Err(mlua::Error::RuntimeError("level required".into()))
                }
            };
            let _ = filter(
                "pmu.set_output",
                this.0.borrow_mut().set_output(to_channel(ch), mode, level),
            )?;
            Ok(())
        });
        methods.add_method("measure", |_, this, (ch, mode): (i64, String)| {
            let target = match mode.as_str() {
                "i" => MeasureTarget::Current,
                "v" => MeasureTarget::Voltage,
                other => {
                    return Err(mlua::Error::RuntimeError(format!("unknown mode {other}")))
                }
            };
            filter_or(
                "pmu.measure",
                this.0.borrow_mut().measure(to_channel(ch), target),
                0.0,
            )
        });
        methods.add_method("set_voltage", |_, this, (ch, volts): (i64, f64)| {
            let microvolts = (volts * 1e6) as i64;
            let _ = filter(
                "pmu.set_voltage",
                this.0
                    .borrow_mut()
                    .device_mut()
                    .set_voltage(to_channel(ch), microvolts),
            )?;
            Ok(())
        });
        methods.add_method("set_current", |_, this, (ch, amps): (i64, f64)| {
            let nanoamps = (amps * 1e9) as i64;
            let _ = filter(
                "pmu.set_current",
                this.0
                    .borrow_mut()
                    .device_mut()
                    .set_current(to_channel(ch), nanoamps),
            )?;
            Ok(())
        });
        methods.add_method("set_current_range", |_, this, (ch, range): (i64, u8)| {
            let range = filter("pmu.set_current_range", CurrentRange::try_from(range))?;
            if let Some(range) = range {
                let _ = filter(
                    "pmu.set_current_range",
                    this.0.borrow_mut().device_mut().set_range(to_channel(ch), range),
                )?;
            }
            Ok(())
        });
        methods.add_method("get_current_range", |_, this, ch: i64| {
            filter_or(
                "pmu.get_current_range",
                this.0
                    .borrow_mut()
                    .device_mut()
                    .get_range(to_channel(ch))
                    .map(|r| r as u8),
                127,
            )
        });
        methods.add_method("set_force_mode", |_, this, (ch, mode): (i64, String)| {
            let _ = filter(
                "pmu.set_force_mode",
                this.0
                    .borrow_mut()
                    .device_mut()
                    .set_force_mode(to_channel(ch), force_mode_from_str(&mode)),
            )?;
            Ok(())
        });
        methods.add_method("set_measure_mode", |_, this, (ch, mode): (i64, String)| {
            let _ = filter(
                "pmu.set_measure_mode",
                this.0
                    .borrow_mut()
                    .device_mut()
                    .set_measure_mode(to_channel(ch), measure_mode_from_str(&mode)),
            )?;
            Ok(())
        });
        methods.add_method("turn_on", |_, this, ch: i64| {
            let _ = filter(
                "pmu.turn_on",
                this.0.borrow_mut().device_mut().set_output_state(to_channel(ch), true),
            )?;
            Ok(())
        });
        methods.add_method("turn_off", |_, this, ch: i64| {
            let _ = filter(
                "pmu.turn_off",
                this.0.borrow_mut().device_mut().set_output_state(to_channel(ch), false),
            )?;
            Ok(())
        });
        methods.add_method("turn_all_on", |_, this, ()| {
            this.0
                .borrow_mut()
                .device_mut()
                .set_all_output_state(true)
                .map_err(mlua::Error::external)
        });
        methods.add_method("turn_all_off", |_, this, ()| {
            this.0
                .borrow_mut()
                .device_mut()
                .set_all_output_state(false)
                .map_err(mlua::Error::external)
        });
        methods.add_method("get_channel_count", |_, this, ()| {
            Ok(this.0.borrow().channel_count())
        });
        methods.add_method("get_min_voltage", |_, this, ()| {
            this.0.borrow().min_voltage().map_err(mlua::Error::external)
        });
        methods.add_method("get_max_voltage", |_, this, ()| {
            this.0.borrow().max_voltage().map_err(mlua::Error::external)
        });
        methods.add_method("set_gain", |_, this, gain: u8| {
            let _ = filter("pmu.set_gain", this.0.borrow_mut().device_mut().set_gain(gain))?;
            Ok(())
        });
        methods.add_method("get_gain", |_, this, ()| {
            this.0
                .borrow_mut()
                .device_mut()
                .get_gain()
                .map_err(mlua::Error::external)
        });
        methods.add_method("read_sys_reg", |_, this, ()| {
            this.0
                .borrow_mut()
                .device_mut()
                .read_sysctrl_reg()
                .map_err(mlua::Error::external)
        });
        methods.add_method("read_pmu_reg", |_, this, ch: i64| {
            filter_or(
                "pmu.read_pmu_reg",
                this.0.borrow_mut().device_mut().read_pmu_reg(to_channel(ch)),
                0,
            )
        });
        methods.add_method("read_alarm_reg", |_, this, ()| {
            this.0
                .borrow_mut()
                .device_mut()
                .read_alarm_reg()
                .map_err(mlua::Error::external)
        });
        methods.add_method("read_comp_reg", |_, this, ()| {
            this.0
                .borrow_mut()
                .device_mut()
                .read_comp_reg()
                .map_err(mlua::Error::external)
        });
        methods.add_method("read_dac_x1", |_, this, (ch, name, range): (i64, String, u8)| {
            if name != "fin" {
                return Err(mlua::Error::RuntimeError(format!(
                    "dacname {name} not supported"
                )));
            }
            filter_or(
                "pmu.read_dac_x1",
                this.0.borrow_mut().device_mut().read_fin_dac_x1(to_channel(ch), range),
                0,
            )
        });
        methods.add_method("reset", |_, this, ()| {
            this.0.borrow_mut().reset().map_err(mlua::Error::external)
        });
        methods.add_method("configure", |_, this, ()| {
            this.0
                .borrow_mut()
                .device_mut()
                .configure(None, None)
                .map_err(mlua::Error::external)
        });
    }
}

struct LuaLed<L: SpiLink + 'static>(Rc<RefCell<LedDriver<L>>>);

impl<L: SpiLink + 'static> UserData for LuaLed<L> {
    fn add_methods<M: UserDataMethods<Self>>(methods: &mut M) {
        methods.add_method("set_brightness", |_, this, (ch, level): (i64, u16)| {
            let _ = filter(
                "led.set_brightness",
                this.0.borrow_mut().set_brightness(to_led_channel(ch), level),
            )?;
            Ok(())
        });
        methods.add_method("turn_on", |_, this, ch: i64| {
            let _ = filter("led.turn_on", this.0.borrow_mut().turn_on(to_led_channel(ch)))?;
            Ok(())
        });
        methods.add_method("turn_off", |_, this, ch: i64| {
            let _ = filter("led.turn_off", this.0.borrow_mut().turn_off(to_led_channel(ch)))?;
            Ok(())
        });
        methods.add_method("turn_all_off", |_, this, ()| {
            this.0
                .borrow_mut()
                .turn_all_off()
                .map_err(mlua::Error::external)
        });
    }
}

struct LuaLmu<L: I2cLink + 'static>(Rc<RefCell<LightSensor<L>>>);

impl<L: I2cLink + 'static> UserData for LuaLmu<L> {
    fn add_methods<M: UserDataMethods<Self>>(methods: &mut M) {
        methods.add_method("set_measure_mode", |_, this, mode: String| {
            let mode = match mode.to_ascii_lowercase().as_str() {
                "cont" => LightMeasureMode::Cont,
                "cmd" => LightMeasureMode::Cmd,
                "syns" => LightMeasureMode::Syns,
                "synd" => LightMeasureMode::Synd,
                other => {
                    return Err(mlua::Error::RuntimeError(format!(
                        "mode must be any of cont, cmd, syns or synd, got {other}"
                    )))
                }
            };
            this.0
                .borrow_mut()
                .set_measure_mode(mode)
                .map_err(mlua::Error::external)
        });
        methods.add_method("set_gain", |_, this, index: u8| {
            let _ = filter("lmu.set_gain", this.0.borrow_mut().set_gain(index))?;
            Ok(())
        });
        methods.add_method("get_max_gain", |_, this, ()| Ok(this.0.borrow().max_gain()));
        methods.add_method("auto_adjust_gain", |_, this, ()| {
            this.0
                .borrow_mut()
                .auto_adjust_gain()
                .map_err(mlua::Error::external)
        });
        methods.add_method("measure", |_, this, ()| {
            let (raw, norm) = this
                .0
                .borrow_mut()
                .measure()
                .map_err(mlua::Error::external)?;
            Ok((raw.x, raw.y, raw.z, norm[0], norm[1], norm[2]))
        });
        methods.add_method(
            "apply_calibration",
            |_, this, (_ch, x, y, z): (i64, f64, f64, f64)| {
                let (abs, norm) = this.0.borrow().apply_calibration([x, y, z]);
                Ok((abs[0], abs[1], abs[2], norm[0], norm[1], norm[2]))
            },
        );
    }
}

struct LuaHw(Identity);

impl UserData for LuaHw {
    fn add_methods<M: UserDataMethods<Self>>(methods: &mut M) {
        methods.add_method("get_board_id", |_, this, ()| {
            this.0.board_id().map_err(mlua::Error::external)
        });
        methods.add_method("get_box_id", |_, this, ()| {
            this.0.box_id().map_err(mlua::Error::external)
        });
        methods.add_method("get_version", |_, this, ()| Ok(this.0.version().to_owned()));
    }
}
