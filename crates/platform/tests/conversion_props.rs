//! Property tests for the DAC conversion arithmetic.

use proptest::prelude::*;

use vost_platform::ad5522::{current_to_dac, dac_to_voltage, voltage_to_dac, CurrentRange};
use vost_platform::pmu::SupplyRail;

const RAILS: [SupplyRail; 3] = [SupplyRail::Low, SupplyRail::Mid, SupplyRail::High];

const RANGES: [CurrentRange; 5] = [
    CurrentRange::Ua5,
    CurrentRange::Ua20,
    CurrentRange::Ua200,
    CurrentRange::Ma2,
    CurrentRange::Ext,
];

proptest! {
    #[test]
    fn voltage_code_round_trips_within_one_lsb(code in 0u16..=65_535, rail_idx in 0usize..3) {
        let offset = RAILS[rail_idx].offset_dac();
        let microvolts = dac_to_voltage(offset, code);
        let back = voltage_to_dac(offset, microvolts);
        prop_assert!(
            (i32::from(back) - i32::from(code)).abs() <= 1,
            "offset {offset}: {code} -> {microvolts} uV -> {back}"
        );
    }

    #[test]
    fn voltage_conversion_is_monotonic(a in -20_000_000i64..20_000_000, b in -20_000_000i64..20_000_000, rail_idx in 0usize..3) {
        let offset = RAILS[rail_idx].offset_dac();
        let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
        prop_assert!(voltage_to_dac(offset, lo) <= voltage_to_dac(offset, hi));
    }

    #[test]
    fn current_conversion_is_monotonic(a in -12_000_000i64..12_000_000, b in -12_000_000i64..12_000_000, range_idx in 0usize..5) {
        let range = RANGES[range_idx];
        let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
        prop_assert!(current_to_dac(range, lo) <= current_to_dac(range, hi));
    }

    #[test]
    fn current_conversion_saturates_past_full_scale(extra in 1i64..1_000_000_000, range_idx in 0usize..5) {
        let range = RANGES[range_idx];
        let max = range.max_nanoamp();
        prop_assert_eq!(current_to_dac(range, max + extra), current_to_dac(range, max));
        prop_assert_eq!(current_to_dac(range, -max - extra), current_to_dac(range, -max));
    }

    #[test]
    fn current_codes_are_symmetric_about_midscale_within_one_step(level in 0i64..2_000_000) {
        let up = i64::from(current_to_dac(CurrentRange::Ma2, level)) - 32_768;
        let down = 32_768 - i64::from(current_to_dac(CurrentRange::Ma2, -level));
        // arithmetic shift floors, so the negative side may land one step out
        prop_assert!((up - down).abs() <= 1);
    }
}
