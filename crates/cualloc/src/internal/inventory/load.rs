use derive_more::{Add, AddAssign, Sub, SubAssign, Sum};
use serde::{Deserialize, Serialize};

pub type LoadPercent = u32;
pub type LoadFractions = u32;

pub const FRACTIONS_PER_PERCENT: LoadFractions = 10_000;
pub const FRACTIONS_MAX_DIGITS: usize = 4; // = log10(FRACTIONS_PER_PERCENT)

/// Load of a compute unit, in percent of a fully used CU with a fixed number
/// of fractional digits. 100 percent is one fully occupied CU.
#[derive(
    Debug,
    Default,
    Serialize,
    Clone,
    Copy,
    Hash,
    Eq,
    Deserialize,
    PartialEq,
    Ord,
    PartialOrd,
    AddAssign,
    SubAssign,
    Sub,
    Add,
    Sum,
)]
pub struct LoadAmount(u64);

impl LoadAmount {
    pub const ZERO: LoadAmount = LoadAmount(0);
    pub const FULL: LoadAmount = LoadAmount(100 * FRACTIONS_PER_PERCENT as u64);

    pub fn new(percent: LoadPercent, fractions: LoadFractions) -> Self {
        assert!(fractions < FRACTIONS_PER_PERCENT);
        LoadAmount(percent as u64 * FRACTIONS_PER_PERCENT as u64 + fractions as u64)
    }

    pub fn new_percent(percent: LoadPercent) -> Self {
        LoadAmount(percent as u64 * FRACTIONS_PER_PERCENT as u64)
    }

    pub fn new_fractions(fractions: LoadFractions) -> Self {
        assert!(fractions < FRACTIONS_PER_PERCENT);
        LoadAmount(fractions as u64)
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    pub fn percent(&self) -> LoadPercent {
        (self.0 / (FRACTIONS_PER_PERCENT as u64)) as LoadPercent
    }

    pub fn fractions(&self) -> LoadFractions {
        (self.0 % (FRACTIONS_PER_PERCENT as u64)) as LoadFractions
    }

    pub fn split(&self) -> (LoadPercent, LoadFractions) {
        (self.percent(), self.fractions())
    }

    pub fn total_fractions(&self) -> u64 {
        self.0
    }

    pub fn saturating_sub(self, other: LoadAmount) -> LoadAmount {
        LoadAmount(self.0.saturating_sub(other.0))
    }
}

impl From<LoadPercent> for LoadAmount {
    #[inline]
    fn from(percent: LoadPercent) -> Self {
        LoadAmount::new_percent(percent)
    }
}

impl std::fmt::Display for LoadAmount {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let fractions = self.fractions();
        write!(f, "{}", self.percent())?;
        if fractions != 0 {
            let num = format!("{:01$}", fractions, FRACTIONS_MAX_DIGITS);
            write!(f, ".{}", num.trim_end_matches('0'))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_arithmetic() {
        let a = LoadAmount::new(45, 5000);
        let b = LoadAmount::new(54, 5000);
        assert_eq!(a + b, LoadAmount::new_percent(100));
        assert_eq!(a + b, LoadAmount::FULL);
        assert_eq!(LoadAmount::FULL - a, b);
        assert_eq!(a.saturating_sub(LoadAmount::FULL), LoadAmount::ZERO);
        assert_eq!(LoadAmount::FULL.total_fractions(), 1_000_000);
    }

    #[test]
    fn test_load_display() {
        assert_eq!(LoadAmount::ZERO.to_string(), "0");
        assert_eq!(LoadAmount::new(0, 1).to_string(), "0.0001");
        assert_eq!(LoadAmount::new_percent(45).to_string(), "45");
        assert_eq!(LoadAmount::new(45, 5000).to_string(), "45.5");
        assert_eq!(LoadAmount::new(12, 3400).to_string(), "12.34");
    }
}
