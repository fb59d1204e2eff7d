use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Fixed-point decimal with 4 decimal places, stored as a scaled integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Hash)]
pub struct Amount(i64);

/// Malformed numeric input.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AmountError {
    #[error("'{0}' is not a decimal number")]
    Malformed(String),
    #[error("'{0}' has more than 4 decimal places")]
    TooPrecise(String),
    #[error("'{0}' is out of range")]
    Overflow(String),
}

impl Amount {
    const SCALE: i64 = 10_000;
    const DECIMALS: usize = 4;

    pub const ZERO: Amount = Amount(0);

    pub fn from_scaled(value: i64) -> Self {
        Amount(value)
    }

    /// Whole currency units, e.g. `Amount::from_units(200)` is `200.00`.
    pub fn from_units(value: i64) -> Self {
        Amount(value * Self::SCALE)
    }

    pub fn scaled(self) -> i64 {
        self.0
    }

    pub fn is_positive(self) -> bool {
        self.0 > 0
    }

    pub fn checked_add(self, rhs: Self) -> Option<Self> {
        self.0.checked_add(rhs.0).map(Amount)
    }

    pub fn checked_sub(self, rhs: Self) -> Option<Self> {
        self.0.checked_sub(rhs.0).map(Amount)
    }

    /// `self * percent / 100`, rounded half away from zero.
    pub fn percent(self, percent: u32) -> Option<Self> {
        let product = i128::from(self.0) * i128::from(percent);
        let half = if product < 0 { -50 } else { 50 };
        i64::try_from((product + half) / 100).ok().map(Amount)
    }
}

impl fmt::Display for Amount {
    /// Always prints at least two decimals; sub-cent digits only when present.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        let whole = abs / Self::SCALE as u64;
        let frac = format!("{:04}", abs % Self::SCALE as u64);
        let frac = frac.trim_end_matches('0');
        write!(f, "{sign}{whole}.{frac:0<2}")
    }
}

impl FromStr for Amount {
    type Err = AmountError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || AmountError::Malformed(s.to_string());
        let (negative, digits) = match s.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, s),
        };
        let (whole, frac) = digits.split_once('.').unwrap_or((digits, ""));
        if whole.is_empty() && frac.is_empty() {
            return Err(malformed());
        }
        if !whole.bytes().all(|b| b.is_ascii_digit()) || !frac.bytes().all(|b| b.is_ascii_digit())
        {
            return Err(malformed());
        }
        if frac.len() > Self::DECIMALS {
            return Err(AmountError::TooPrecise(s.to_string()));
        }

        let overflow = || AmountError::Overflow(s.to_string());
        let whole: i64 = if whole.is_empty() {
            0
        } else {
            whole.parse().map_err(|_| overflow())?
        };
        let frac: i64 = format!("{frac:0<4}").parse().map_err(|_| malformed())?;
        let scaled = whole
            .checked_mul(Self::SCALE)
            .and_then(|w| w.checked_add(frac))
            .ok_or_else(overflow)?;

        Ok(Amount(if negative { -scaled } else { scaled }))
    }
}

impl Serialize for Amount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Amount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

impl std::ops::Add for Amount {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Amount(self.0 + rhs.0)
    }
}

impl std::ops::Sub for Amount {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self::Output {
        Amount(self.0 - rhs.0)
    }
}

impl std::iter::Sum for Amount {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Amount::ZERO, |acc, a| acc + a)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_scaled_preserves_value() {
        let amount = Amount::from_scaled(123456);
        assert_eq!(amount, Amount(123456));
    }

    #[test]
    fn from_units_scales() {
        assert_eq!(Amount::from_units(200), Amount::from_scaled(2_000_000));
    }

    #[test]
    fn parse_accepts_plain_decimals() {
        assert_eq!("100".parse::<Amount>().unwrap(), Amount::from_units(100));
        assert_eq!("1.5".parse::<Amount>().unwrap(), Amount::from_scaled(15_000));
        assert_eq!("0.0001".parse::<Amount>().unwrap(), Amount::from_scaled(1));
        assert_eq!(".25".parse::<Amount>().unwrap(), Amount::from_scaled(2_500));
        assert_eq!("-50.25".parse::<Amount>().unwrap(), Amount::from_scaled(-502_500));
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(matches!("".parse::<Amount>(), Err(AmountError::Malformed(_))));
        assert!(matches!("abc".parse::<Amount>(), Err(AmountError::Malformed(_))));
        assert!(matches!("1.2.3".parse::<Amount>(), Err(AmountError::Malformed(_))));
        assert!(matches!("1e5".parse::<Amount>(), Err(AmountError::Malformed(_))));
        assert!(matches!(".".parse::<Amount>(), Err(AmountError::Malformed(_))));
    }

    #[test]
    fn parse_rejects_sub_basis_point_precision() {
        assert!(matches!(
            "1.23456".parse::<Amount>(),
            Err(AmountError::TooPrecise(_))
        ));
    }

    #[test]
    fn parse_rejects_overflow() {
        assert!(matches!(
            "99999999999999999999".parse::<Amount>(),
            Err(AmountError::Overflow(_))
        ));
    }

    #[test]
    fn display_formats_positive() {
        assert_eq!(Amount::from_scaled(1_000_000).to_string(), "100.00");
        assert_eq!(Amount::from_scaled(15_000).to_string(), "1.50");
        assert_eq!(Amount::from_scaled(12_345).to_string(), "1.2345");
        assert_eq!(Amount::from_scaled(1).to_string(), "0.0001");
        assert_eq!(Amount::from_scaled(0).to_string(), "0.00");
    }

    #[test]
    fn display_formats_negative() {
        assert_eq!(Amount::from_scaled(-502_500).to_string(), "-50.25");
        assert_eq!(Amount::from_scaled(-1).to_string(), "-0.0001");
    }

    #[test]
    fn display_parses_back() {
        for scaled in [0, 1, 99, 10_000, 2_200_000, -7_5000] {
            let amount = Amount::from_scaled(scaled);
            assert_eq!(amount.to_string().parse::<Amount>().unwrap(), amount);
        }
    }

    #[test]
    fn percent_of_amount() {
        assert_eq!(
            Amount::from_units(200).percent(10),
            Some(Amount::from_units(20))
        );
        assert_eq!(
            Amount::from_scaled(3).percent(50),
            Some(Amount::from_scaled(2))
        );
        assert_eq!(Amount::from_units(1).percent(0), Some(Amount::ZERO));
    }

    #[test]
    fn checked_ops() {
        let a = Amount::from_scaled(100);
        assert_eq!(a.checked_add(a), Some(Amount::from_scaled(200)));
        assert_eq!(a.checked_sub(a), Some(Amount::ZERO));
        assert_eq!(Amount::from_scaled(i64::MAX).checked_add(a), None);
    }

    #[test]
    fn default_is_zero() {
        assert_eq!(Amount::default(), Amount::ZERO);
    }

    #[test]
    fn sum() {
        let total: Amount = [1, 2, 3].into_iter().map(Amount::from_units).sum();
        assert_eq!(total, Amount::from_units(6));
    }

    #[test]
    fn ordering() {
        let small = Amount::from_scaled(100);
        let large = Amount::from_scaled(200);
        assert!(small < large);
        assert!(Amount::from_scaled(-1) < Amount::ZERO);
    }
}
