use crate::ledger::Amount;

/// Decimal precision used for native escrow value (1 unit = 1e18 base units).
pub const NATIVE_DECIMALS: u8 = 18;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum UnitsError {
    #[error("empty amount")]
    Empty,
    #[error("invalid digit in amount {0:?}")]
    InvalidDigit(String),
    #[error("amount {value:?} has more than {decimals} fractional digits")]
    TooPrecise { value: String, decimals: u8 },
    #[error("amount {0:?} does not fit in 128 bits")]
    Overflow(String),
}

/// Converts a human-readable decimal string ("1.5") into base units at the
/// given precision.
pub fn parse_units(value: &str, decimals: u8) -> Result<Amount, UnitsError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(UnitsError::Empty);
    }
    let (whole, frac) = match value.split_once('.') {
        Some((w, f)) => (w, f),
        None => (value, ""),
    };
    if whole.is_empty() && frac.is_empty() {
        return Err(UnitsError::Empty);
    }
    let is_digits = |s: &str| s.bytes().all(|b| b.is_ascii_digit());
    if !is_digits(whole) || !is_digits(frac) {
        return Err(UnitsError::InvalidDigit(value.to_string()));
    }
    let frac = frac.trim_end_matches('0');
    if frac.len() > decimals as usize {
        return Err(UnitsError::TooPrecise {
            value: value.to_string(),
            decimals,
        });
    }

    let overflow = || UnitsError::Overflow(value.to_string());
    let scale = 10u128.checked_pow(decimals as u32).ok_or_else(overflow)?;
    let whole: Amount = if whole.is_empty() {
        0
    } else {
        whole.parse().map_err(|_| overflow())?
    };
    let mut frac_units: Amount = 0;
    if !frac.is_empty() {
        let padding = 10u128
            .checked_pow((decimals as usize - frac.len()) as u32)
            .ok_or_else(overflow)?;
        let digits: Amount = frac.parse().map_err(|_| overflow())?;
        frac_units = digits.checked_mul(padding).ok_or_else(overflow)?;
    }
    whole
        .checked_mul(scale)
        .and_then(|w| w.checked_add(frac_units))
        .ok_or_else(overflow)
}

/// Renders base units as a decimal string, trimming trailing fractional zeros.
pub fn format_units(amount: Amount, decimals: u8) -> String {
    if decimals == 0 {
        return amount.to_string();
    }
    let digits = amount.to_string();
    let decimals = decimals as usize;
    let (whole, frac) = if digits.len() > decimals {
        let split = digits.len() - decimals;
        (digits[..split].to_string(), digits[split..].to_string())
    } else {
        ("0".to_string(), format!("{digits:0>decimals$}"))
    };
    let frac = frac.trim_end_matches('0');
    if frac.is_empty() {
        whole
    } else {
        format!("{whole}.{frac}")
    }
}

/// Serializes `u128` amounts as decimal strings so JSON readers never round
/// them. Small plain numbers are accepted on input.
pub(crate) mod serde_amount {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Encoded {
        Text(String),
        Number(u64),
    }

    pub fn serialize<S>(value: &u128, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<u128, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Encoded::deserialize(deserializer)? {
            Encoded::Text(text) => text.trim().parse().map_err(D::Error::custom),
            Encoded::Number(number) => Ok(number as u128),
        }
    }
}

pub(crate) mod serde_amount_map {
    use std::collections::BTreeMap;

    use serde::{de::Error, ser::SerializeMap, Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &BTreeMap<String, u128>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(Some(value.len()))?;
        for (key, amount) in value {
            map.serialize_entry(key, &amount.to_string())?;
        }
        map.end()
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<BTreeMap<String, u128>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = BTreeMap::<String, String>::deserialize(deserializer)?;
        encoded
            .into_iter()
            .map(|(key, value)| {
                value
                    .trim()
                    .parse()
                    .map(|amount| (key, amount))
                    .map_err(D::Error::custom)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_whole_and_fractional_amounts() {
        assert_eq!(parse_units("10", 18).unwrap(), 10_000_000_000_000_000_000);
        assert_eq!(parse_units("1.0", 18).unwrap(), 1_000_000_000_000_000_000);
        assert_eq!(parse_units("0.000001", 18).unwrap(), 1_000_000_000_000);
        assert_eq!(parse_units(".5", 2).unwrap(), 50);
        assert_eq!(parse_units("42", 0).unwrap(), 42);
    }

    #[test]
    fn rejects_malformed_amounts() {
        assert_eq!(parse_units("", 18), Err(UnitsError::Empty));
        assert_eq!(parse_units(".", 18), Err(UnitsError::Empty));
        assert!(matches!(parse_units("1e18", 18), Err(UnitsError::InvalidDigit(_))));
        assert!(matches!(parse_units("-1", 18), Err(UnitsError::InvalidDigit(_))));
        assert!(matches!(parse_units("0.123", 2), Err(UnitsError::TooPrecise { .. })));
        assert!(matches!(
            parse_units("340282366920938463463374607431768211456", 0),
            Err(UnitsError::Overflow(_))
        ));
    }

    #[test]
    fn formats_trimmed_decimals() {
        assert_eq!(format_units(10_000_000_000_000_000_000, 18), "10");
        assert_eq!(format_units(1_500_000_000_000_000_000, 18), "1.5");
        assert_eq!(format_units(1, 18), "0.000000000000000001");
        assert_eq!(format_units(0, 18), "0");
        assert_eq!(format_units(1234, 0), "1234");
    }
}
