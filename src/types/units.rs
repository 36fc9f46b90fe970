//! Unit Conversion Utilities
//!
//! Helpers for native-asset amounts. Amounts are always `U256` in wei and are
//! carried as decimal strings on the wire and in the database.

use primitive_types::U256;

/// Decimals of the native asset (wei per ether = 10^18)
pub const ETHER_DECIMALS: usize = 18;

/// Parse a decimal wei amount (e.g. "1000000000000000000")
///
/// Rejects empty strings, signs, fractions, and values above `U256::MAX`.
/// Underscores are accepted as digit separators.
pub fn parse_wei(s: &str) -> Option<U256> {
    let cleaned: String = s.trim().chars().filter(|c| *c != '_').collect();
    if cleaned.is_empty() || !cleaned.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    U256::from_dec_str(&cleaned).ok()
}

/// Parse a `0x`-prefixed hex quantity as returned by JSON-RPC
pub fn parse_hex_quantity(s: &str) -> Option<U256> {
    let body = s.strip_prefix("0x")?;
    if body.is_empty() {
        return Some(U256::zero());
    }
    U256::from_str_radix(body, 16).ok()
}

/// Format a `U256` as a `0x`-prefixed hex quantity (no leading zeros)
pub fn to_hex_quantity(value: U256) -> String {
    format!("0x{:x}", value)
}

/// Format wei as an ether decimal string, trimming trailing zeros
/// e.g., 1500000000000000000 -> "1.5"
pub fn format_ether(wei: U256) -> String {
    let digits = wei.to_string();
    let (whole, frac) = if digits.len() > ETHER_DECIMALS {
        let split = digits.len() - ETHER_DECIMALS;
        (digits[..split].to_string(), digits[split..].to_string())
    } else {
        (
            "0".to_string(),
            format!("{:0>width$}", digits, width = ETHER_DECIMALS),
        )
    };

    let frac = frac.trim_end_matches('0');
    if frac.is_empty() {
        whole
    } else {
        format!("{}.{}", whole, frac)
    }
}

/// Serde helpers for `U256` as a decimal string
pub mod u256_dec {
    use primitive_types::U256;
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &U256, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(value)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<U256, D::Error> {
        let s = String::deserialize(deserializer)?;
        super::parse_wei(&s).ok_or_else(|| de::Error::custom(format!("invalid amount: {}", s)))
    }
}

/// Serde helpers for `Option<U256>` as a decimal string or null
pub mod u256_dec_opt {
    use primitive_types::U256;
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<U256>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(v) => serializer.collect_str(v),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<U256>, D::Error> {
        let s: Option<String> = Option::deserialize(deserializer)?;
        match s {
            Some(s) => super::parse_wei(&s)
                .map(Some)
                .ok_or_else(|| de::Error::custom(format!("invalid amount: {}", s))),
            None => Ok(None),
        }
    }
}
