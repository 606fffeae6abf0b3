//! Register-level behavior of the PMU driver against the AD5522 model:
//! read-modify-write field isolation, reserved-bit handling, round trips
//! and the DAC write paths.

use vost_platform::ad5522::{CurrentRange, ForceMode, MeasureMode, PmuDevice};
use vost_platform::mocks::PmuModelLink;
use vost_platform::Error;

/// Force-mode field, PMU register bits B20..B19.
const FORCE_FIELD: u32 = 0x18_0000;
/// Measure-mode field, bits B14..B13.
const MEASURE_FIELD: u32 = 0x6000;
/// Range field, bits B17..B15.
const RANGE_FIELD: u32 = 0x3_8000;
/// Enable field: CH_EN (B21) and FIN (B12).
const ENABLE_FIELD: u32 = (1 << 21) | (1 << 12);
/// 22-bit register with the reserved low 7 bits cleared.
const WRITE_BASE: u32 = 0x3f_ff80;

fn device() -> (PmuDevice<PmuModelLink>, PmuModelLink) {
    let link = PmuModelLink::new();
    (PmuDevice::new(link.clone()), link)
}

#[test]
fn force_mode_write_touches_only_its_field() {
    let (mut dev, link) = device();
    let seed = 0x2a_5a7f; // junk in every field including the reserved bits
    link.state().borrow_mut().pmu[1] = seed;

    dev.set_force_mode(1, ForceMode::Fi).unwrap();

    let written = link.state().borrow().pmu[1];
    assert_eq!(written, ((seed & !FORCE_FIELD) & WRITE_BASE) | ForceMode::Fi.bits());
}

#[test]
fn measure_mode_write_touches_only_its_field() {
    let (mut dev, link) = device();
    let seed = 0x15_a5ff;
    link.state().borrow_mut().pmu[2] = seed;

    dev.set_measure_mode(2, MeasureMode::Mt).unwrap();

    let written = link.state().borrow().pmu[2];
    assert_eq!(
        written,
        ((seed & !MEASURE_FIELD) & WRITE_BASE) | MeasureMode::Mt.bits()
    );
}

#[test]
fn range_write_touches_only_its_field() {
    let (mut dev, link) = device();
    let seed = 0x3f_ffff;
    link.state().borrow_mut().pmu[0] = seed;

    dev.set_range(0, CurrentRange::Ua20).unwrap();

    let written = link.state().borrow().pmu[0];
    assert_eq!(
        written,
        ((seed & !RANGE_FIELD) & WRITE_BASE) | CurrentRange::Ua20.bits()
    );
}

#[test]
fn reserved_low_bits_are_zeroed_on_every_write() {
    let (mut dev, link) = device();
    link.state().borrow_mut().pmu[3] = 0x7f; // device reports reserved junk

    dev.set_force_mode(3, ForceMode::Fv).unwrap();
    assert_eq!(link.state().borrow().pmu[3] & 0x7f, 0);

    link.state().borrow_mut().pmu[3] |= 0x7f;
    dev.set_output_state(3, true).unwrap();
    assert_eq!(link.state().borrow().pmu[3] & 0x7f, 0);
}

#[test]
fn force_mode_round_trips_for_all_modes() {
    let (mut dev, _link) = device();
    for mode in [ForceMode::Fv, ForceMode::Fi, ForceMode::HizV, ForceMode::HizI] {
        dev.set_force_mode(2, mode).unwrap();
        assert_eq!(dev.get_force_mode(2).unwrap(), mode);
    }
}

#[test]
fn measure_mode_round_trips_for_all_modes() {
    let (mut dev, _link) = device();
    for mode in [
        MeasureMode::Mi,
        MeasureMode::Mv,
        MeasureMode::Mt,
        MeasureMode::Hiz,
    ] {
        dev.set_measure_mode(1, mode).unwrap();
        assert_eq!(dev.get_measure_mode(1).unwrap(), mode);
    }
}

#[test]
fn repeated_range_select_is_idempotent_but_still_writes() {
    let (mut dev, link) = device();
    dev.set_range(0, CurrentRange::Ua200).unwrap();
    let state_after_first = link.state().borrow().pmu[0];
    let frames_after_first = link.state().borrow().frames.len();

    dev.set_range(0, CurrentRange::Ua200).unwrap();
    assert_eq!(link.state().borrow().pmu[0], state_after_first);
    assert!(
        link.state().borrow().frames.len() > frames_after_first,
        "the second select still issues a bus write"
    );
}

#[test]
fn output_enable_sets_and_clears_both_bits() {
    let (mut dev, link) = device();
    dev.set_output_state(0, true).unwrap();
    assert_eq!(link.state().borrow().pmu[0] & ENABLE_FIELD, ENABLE_FIELD);

    dev.set_output_state(0, false).unwrap();
    assert_eq!(link.state().borrow().pmu[0] & ENABLE_FIELD, 0);
}

#[test]
fn channel_4_is_rejected_without_touching_the_bus() {
    let (mut dev, link) = device();
    assert!(matches!(
        dev.set_output_state(4, true),
        Err(Error::InvalidChannel(4))
    ));
    assert!(matches!(
        dev.set_force_mode(4, ForceMode::Fv),
        Err(Error::InvalidChannel(4))
    ));
    assert!(matches!(dev.set_voltage(9, 0), Err(Error::InvalidChannel(9))));
    assert!(link.state().borrow().frames.is_empty());
    assert_eq!(link.state().borrow().pmu, [0; 4]);
}

#[test]
fn set_voltage_combines_offset_and_level_terms() {
    let (mut dev, link) = device();
    dev.set_offset(60_855).unwrap();

    let code = dev.set_voltage(0, 5_000_000).unwrap();

    assert_eq!(code, 61_894);
    assert_eq!(link.state().borrow().fin_x1(0, 0x0d), Some(61_894));
}

#[test]
fn set_voltage_reads_the_offset_from_the_device() {
    let (mut dev, link) = device();
    // offset programmed behind the driver's back
    link.state().borrow_mut().offset_dac = 19_660;

    let code = dev.set_voltage(2, 0).unwrap();
    assert_eq!(i64::from(code), 19_660 * 35 / 45);
    assert_eq!(link.state().borrow().fin_x1(2, 0x0d), Some(code));
}

#[test]
fn set_current_uses_the_active_range() {
    let (mut dev, link) = device();
    dev.set_range(0, CurrentRange::Ma2).unwrap();

    let code = dev.set_current(0, 1_000_000).unwrap();

    assert_eq!(code, 47_331);
    // the 2 mA range writes DAC address 0x0b
    assert_eq!(link.state().borrow().fin_x1(0, 0x0b), Some(47_331));
    assert_eq!(link.state().borrow().fin_x1(0, 0x0d), None);
}

#[test]
fn set_offset_broadcasts_to_all_channels() {
    let (mut dev, link) = device();
    dev.set_offset(42_130).unwrap();
    assert_eq!(link.state().borrow().offset_dac, 42_130);
    assert_eq!(dev.offset_dac(), 42_130);
    let frame = *link.state().borrow().frames.last().unwrap();
    // broadcast: all four channel bits in B27..B24
    assert_eq!(frame[0] & 0x0f, 0x0f);
}

#[test]
fn configure_programs_the_default_safety_word() {
    let (mut dev, link) = device();
    dev.configure(None, None).unwrap();

    let state = link.state();
    let state = state.borrow();
    // DUT-ground sense, guard + clamp alarms, MEASOUT gain 0.2,
    // current gain x10, thermal threshold 100 degC
    assert_eq!(state.sysctrl, (1 << 12) | (1 << 11) | (1 << 10) | (1 << 7) | (0x7 << 3));
    // all channels: HIZ current force, 2 mA range, measurement output off
    for ch in 0..4 {
        assert_eq!(
            state.pmu[ch],
            ForceMode::HizI.bits() | CurrentRange::Ma2.bits() | MeasureMode::Hiz.bits()
        );
    }
}

#[test]
fn configure_accepts_explicit_register_words() {
    let (mut dev, link) = device();
    dev.configure(Some(0x1234), Some(0xa_b000)).unwrap();
    assert_eq!(link.state().borrow().sysctrl, 0x1234);
    assert_eq!(link.state().borrow().pmu, [0xa_b000; 4]);
}

#[test]
fn gain_field_round_trips() {
    let (mut dev, link) = device();
    dev.set_gain(2).unwrap();
    assert_eq!(dev.get_gain().unwrap(), 2);
    assert_eq!((link.state().borrow().sysctrl >> 6) & 0x3, 2);
    assert!(matches!(dev.set_gain(4), Err(Error::InvalidGain(4))));
}

#[test]
fn alarm_flag_reads_and_clears() {
    let (mut dev, link) = device();
    link.state().borrow_mut().alarm = 1 << 20;
    assert_eq!(dev.get_alarm_flag().unwrap(), 1);

    dev.clear_alarm_flag().unwrap();
    // the clear strobe is written through channel 0's register
    assert_eq!(link.state().borrow().pmu[0] & (1 << 6), 1 << 6);
}

#[test]
fn compliance_setter_is_unsupported() {
    let (mut dev, _link) = device();
    assert!(matches!(
        dev.set_compliance(0, 1_000),
        Err(Error::Unsupported(_))
    ));
}

#[test]
fn unwritten_fin_dac_reads_power_on_midscale() {
    let (mut dev, _link) = device();
    assert_eq!(dev.read_fin_dac_x1(0, 3).unwrap(), 0x8000);
    assert!(dev.read_fin_dac_x1(0, 6).is_err());
}
