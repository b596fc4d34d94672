use serde::{Deserialize, Serialize};
use std::fmt;

/// Quantity of goods, stored as whole grams.
///
/// Split and merge conservation must hold exactly, so quantities are
/// fixed-point integers rather than floats; the user-facing unit is
/// kilograms.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
pub struct Quantity(u64);

impl Quantity {
    pub const ZERO: Quantity = Quantity(0);

    pub const fn from_grams(grams: u64) -> Self {
        Quantity(grams)
    }

    pub const fn from_kg(kg: u64) -> Self {
        Quantity(kg * 1000)
    }

    pub fn grams(&self) -> u64 {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    pub fn checked_add(self, other: Quantity) -> Option<Quantity> {
        self.0.checked_add(other.0).map(Quantity)
    }

    pub fn checked_sub(self, other: Quantity) -> Option<Quantity> {
        self.0.checked_sub(other.0).map(Quantity)
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 % 1000 == 0 {
            write!(f, "{} kg", self.0 / 1000)
        } else {
            write!(f, "{}.{:03} kg", self.0 / 1000, self.0 % 1000)
        }
    }
}

/// Price per kilogram in minor currency units (paise).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
pub struct PricePerKg(u64);

impl PricePerKg {
    pub const fn from_minor_units(units: u64) -> Self {
        PricePerKg(units)
    }

    pub const fn from_rupees(rupees: u64) -> Self {
        PricePerKg(rupees * 100)
    }

    pub fn minor_units(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for PricePerKg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}/kg", self.0 / 100, self.0 % 100)
    }
}
