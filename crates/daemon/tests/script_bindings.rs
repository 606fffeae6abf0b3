//! Script-visible peripheral objects driven through real Lua chunks, with
//! every bus mocked: the PMU behind the AD5522 register model, the LED
//! driver behind a frame recorder, the color sensor behind an I2C register
//! file, GPIO/ADC/identity on a tempdir.

use std::cell::RefCell;
use std::fs;
use std::path::Path;
use std::rc::Rc;

use tempfile::TempDir;

use vost_platform::ad5522::{voltage_to_dac, PmuDevice};
use vost_platform::adc::AdcReader;
use vost_platform::gpio::GpioLine;
use vost_platform::identity::Identity;
use vost_platform::mcdc04::LightSensor;
use vost_platform::mocks::{PmuModelLink, RecordingSpi, RegisterFileI2c};
use vost_platform::pmu::{PmuBoard, SupplyPins, SupplyRail};
use vost_platform::tlc5948a::LedDriver;

use vostd::bindings::HwBindings;
use vostd::config::DbConfig;
use vostd::protocol::Status;
use vostd::script::ScriptHost;

struct Fixture {
    host: ScriptHost<HwBindings<PmuModelLink, RecordingSpi, RegisterFileI2c>>,
    pmu_link: PmuModelLink,
    led_link: RecordingSpi,
    lmu_link: RegisterFileI2c,
    dir: TempDir,
}

fn gpio(dir: &Path, name: &str) -> GpioLine {
    let path = dir.join(name);
    fs::write(&path, "0\n").unwrap();
    GpioLine::new(path)
}

fn fixture() -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("in_voltage0_raw"), "32768\n").unwrap();

    // identity sources
    let eeprom = dir.path().join("eeprom");
    fs::write(&eeprom, [0x00u8, 0x01, 0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff]).unwrap();
    let w1 = dir.path().join("w1");
    fs::create_dir(&w1).unwrap();
    let slave = w1.join("23.00000042");
    fs::create_dir(&slave).unwrap();
    fs::write(slave.join("address"), "2300000042aabb\n").unwrap();

    let pmu_link = PmuModelLink::new();
    let pins = SupplyPins {
        dcdc_en: gpio(dir.path(), "dcdc"),
        ldo_en: gpio(dir.path(), "ldo"),
        sup_lo: gpio(dir.path(), "lo"),
        sup_mid: gpio(dir.path(), "mid"),
        sup_hi: gpio(dir.path(), "hi"),
        reset: gpio(dir.path(), "rst"),
        tmp_alarm: gpio(dir.path(), "tmp"),
        cg_alarm: gpio(dir.path(), "cg"),
        busy: gpio(dir.path(), "busy"),
    };
    let board = PmuBoard::new(
        PmuDevice::new(pmu_link.clone()),
        pins,
        AdcReader::new(dir.path()),
    );

    let led_link = RecordingSpi::new();
    let led = LedDriver::new(led_link.clone()).unwrap();

    let lmu_link = RegisterFileI2c::new();
    let lmu = LightSensor::new(lmu_link.clone()).unwrap();

    let bindings = HwBindings {
        pmu: Rc::new(RefCell::new(board)),
        led: Rc::new(RefCell::new(led)),
        lmu: Rc::new(RefCell::new(lmu)),
        hw: Identity::new(&eeprom, &w1, "3.0.0-test"),
        db: DbConfig {
            host: "db.example".into(),
            port: 3306,
            user: "op".into(),
            password: "pw".into(),
        },
    };
    Fixture {
        host: ScriptHost::new(bindings).unwrap(),
        pmu_link,
        led_link,
        lmu_link,
        dir,
    }
}

#[test]
fn supply_rail_round_trips_through_the_binding() {
    let mut f = fixture();
    let reply = f.host.run_chunk(
        "pmu:set_supply_rail(2)\nresults = {rail = tostring(pmu:get_supply_rail())}",
        false,
    );
    assert_eq!(reply.status, Status::Ok, "{}", reply.errormsg);
    assert_eq!(reply.results.get("rail").unwrap(), "2");
    assert_eq!(
        f.pmu_link.state().borrow().offset_dac,
        SupplyRail::Mid.offset_dac()
    );
    assert_eq!(fs::read_to_string(f.dir.path().join("mid")).unwrap(), "1");
    assert_eq!(fs::read_to_string(f.dir.path().join("hi")).unwrap(), "0");
}

#[test]
fn script_channels_are_one_based() {
    let mut f = fixture();
    let reply = f.host.run_chunk(
        "pmu:set_supply_rail(2)\npmu:set_output(1, 'v', 5.0)",
        false,
    );
    assert_eq!(reply.status, Status::Ok, "{}", reply.errormsg);
    // script channel 1 is driver channel 0
    assert_eq!(
        f.pmu_link.state().borrow().fin_x1(0, 0x0d),
        Some(voltage_to_dac(SupplyRail::Mid.offset_dac(), 5_000_000))
    );
}

#[test]
fn out_of_range_channels_are_swallowed_with_a_warning() {
    let mut f = fixture();
    let frames_before = f.pmu_link.state().borrow().frames.len();
    let reply = f.host.run_chunk("pmu:turn_on(9)\nresults = {ok = 'yes'}", false);
    assert_eq!(reply.status, Status::Ok, "a stray channel must not abort the chunk");
    assert_eq!(reply.results.get("ok").unwrap(), "yes");
    assert_eq!(
        f.pmu_link.state().borrow().frames.len(),
        frames_before,
        "nothing may reach the bus"
    );
}

#[test]
fn unknown_output_mode_raises_a_script_error() {
    let mut f = fixture();
    let reply = f.host.run_chunk("pmu:set_output(1, 'sideways', 1.0)", false);
    assert_eq!(reply.status, Status::Error);
    assert!(reply.errormsg.contains("unknown mode"));
}

#[test]
fn measurement_is_script_reachable() {
    let mut f = fixture();
    let reply = f.host.run_chunk(
        "pmu:set_supply_rail(2)\npmu:set_current_range(1, 3)\n\
         results = {amps = tostring(pmu:measure(1, 'i'))}",
        false,
    );
    assert_eq!(reply.status, Status::Ok, "{}", reply.errormsg);
    let amps: f64 = reply.results.get("amps").unwrap().as_str().unwrap().parse().unwrap();
    let expected = (5.0 * 32_768.0 / 65_536.0 - 5.0 * 0.45) / (500.0 * 10.0 * 0.2);
    assert!((amps - expected).abs() < 1e-9);
}

#[test]
fn led_channels_drive_the_reversed_grayscale_slots() {
    let mut f = fixture();
    let reply = f.host.run_chunk(
        "led:set_brightness(5, 0x1234)\nled:turn_on(5)",
        false,
    );
    assert_eq!(reply.status, Status::Ok, "{}", reply.errormsg);
    let writes = f.led_link.writes();
    let frame = writes.last().unwrap();
    assert_eq!(frame[21], 0x12);
    assert_eq!(frame[22], 0x34);
}

#[test]
fn color_sensor_measure_returns_six_values() {
    let mut f = fixture();
    {
        let state = f.lmu_link.state();
        let mut regs = state.borrow_mut();
        regs.words.insert(0x1, 100); // X
        regs.words.insert(0x3, 200); // Y
        regs.words.insert(0x2, 100); // Z
    }
    let reply = f.host.run_chunk(
        "lmu:set_gain(0)\nlocal x, y, z, nx, ny, nz = lmu:measure()\n\
         results = {x = tostring(x), y = tostring(y), ny = tostring(ny)}",
        false,
    );
    assert_eq!(reply.status, Status::Ok, "{}", reply.errormsg);
    assert_eq!(reply.results.get("x").unwrap(), "100");
    assert_eq!(reply.results.get("y").unwrap(), "200");
    assert_eq!(reply.results.get("ny").unwrap(), "0.5");
}

#[test]
fn identity_and_db_are_script_visible() {
    let mut f = fixture();
    let reply = f.host.run_chunk(
        "results = {id = hw:get_board_id(), box = hw:get_box_id(),\n\
         v = hw:get_version(), h = db.host, p = tostring(db.port)}",
        false,
    );
    assert_eq!(reply.status, Status::Ok, "{}", reply.errormsg);
    assert_eq!(reply.results.get("id").unwrap(), "AABBCCDDEEFF");
    assert_eq!(reply.results.get("box").unwrap(), "2300000042aabb");
    assert_eq!(reply.results.get("v").unwrap(), "3.0.0-test");
    assert_eq!(reply.results.get("h").unwrap(), "db.example");
    assert_eq!(reply.results.get("p").unwrap(), "3306");
}

#[test]
fn recreate_rebinds_the_same_peripherals() {
    let mut f = fixture();
    f.host.run_chunk("led:turn_all_off()", false);
    let frames_before = f.led_link.writes().len();

    f.host.recreate().unwrap();
    let reply = f.host.run_chunk("led:turn_all_off()", false);
    assert_eq!(reply.status, Status::Ok, "{}", reply.errormsg);
    assert_eq!(f.led_link.writes().len(), frames_before + 1);
}

#[test]
fn coop_tracks_can_touch_peripherals_across_waits() {
    let mut f = fixture();
    let reply = f.host.run_chunk(
        "led:set_brightness(0, 0xffff)\nwait(10)\nled:turn_on(0)",
        true,
    );
    assert_eq!(reply.status, Status::Ok, "{}", reply.errormsg);
    let frames_at_submit = f.led_link.writes().len();

    f.host.wake_waiting_tracks(5);
    assert_eq!(f.led_link.writes().len(), frames_at_submit);
    f.host.wake_waiting_tracks(5);
    let writes = f.led_link.writes();
    assert_eq!(writes.len(), frames_at_submit + 1);
    assert_eq!(writes.last().unwrap()[31], 0xff);
}
