use serde::{Deserialize, Serialize};

use crate::constants::fees::{FUEL_PER_COMPUTE_UNIT, MIN_COMPUTE_UNITS};

/// Converts consumed fuel into the chain's fee unit.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeeSchedule {
    /// The amount of fuel that makes up one compute unit.
    pub fuel_per_compute_unit: u64,
    /// The floor charged for any evaluated call, successful or not.
    pub min_compute_units: u64,
}

impl Default for FeeSchedule {
    fn default() -> Self {
        Self { fuel_per_compute_unit: FUEL_PER_COMPUTE_UNIT, min_compute_units: MIN_COMPUTE_UNITS }
    }
}

impl FeeSchedule {
    /// Returns `max(min_compute_units, fuel_consumed / fuel_per_compute_unit)`.
    pub fn compute_units(&self, fuel_consumed: u64) -> u64 {
        let units = fuel_consumed.checked_div(self.fuel_per_compute_unit).unwrap_or(0);
        units.max(self.min_compute_units)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compute_units_floor() {
        let fees = FeeSchedule::default();
        assert_eq!(fees.compute_units(0), 1);
        assert_eq!(fees.compute_units(999_999), 1);
        assert_eq!(fees.compute_units(3_500_000), 3);
    }

    #[test]
    fn test_zero_divisor_falls_back_to_floor() {
        let fees = FeeSchedule { fuel_per_compute_unit: 0, min_compute_units: 2 };
        assert_eq!(fees.compute_units(10), 2);
    }
}
