//! Misc Serde helpers for node payloads.
//!
//! Nodes disagree on how they encode numbers: ganache reports stack words as bare 64 character
//! hex strings and gas as JSON integers, anvil uses `0x`-prefixed quantities.

use alloy_primitives::U256;
use serde::{Deserialize, Deserializer, de};
use std::str::FromStr;

/// Helper type to parse both `u64` and `U256`
#[derive(Copy, Clone, Deserialize)]
#[serde(untagged)]
pub enum Numeric {
    /// A [U256] value.
    U256(U256),
    /// A `u64` value.
    Num(u64),
}

impl From<Numeric> for U256 {
    fn from(n: Numeric) -> Self {
        match n {
            Numeric::U256(n) => n,
            Numeric::Num(n) => Self::from(n),
        }
    }
}

impl FromStr for Numeric {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Ok(val) = s.parse::<u128>() {
            Ok(Self::U256(U256::from(val)))
        } else if let Some(hex) = s.strip_prefix("0x") {
            U256::from_str_radix(hex, 16).map(Numeric::U256).map_err(|err| err.to_string())
        } else {
            U256::from_str(s).map(Numeric::U256).map_err(|err| err.to_string())
        }
    }
}

/// An enum that represents either a [serde_json::Number] integer, or a string quantity.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum NumberOrHex {
    /// An integer
    Int(serde_json::Number),
    /// A decimal or `0x`-prefixed string
    Str(String),
}

impl NumberOrHex {
    /// Tries to convert this into a [U256].
    pub fn try_into_u256<E: de::Error>(self) -> Result<U256, E> {
        match self {
            Self::Int(num) => U256::from_str(num.to_string().as_str()).map_err(E::custom),
            Self::Str(s) => s.parse::<Numeric>().map(Into::into).map_err(E::custom),
        }
    }

    /// Tries to convert this into a `u64`.
    pub fn try_into_u64<E: de::Error>(self) -> Result<u64, E> {
        let val = self.try_into_u256::<E>()?;
        u64::try_from(val).map_err(E::custom)
    }
}

/// Deserializes the input into a U256, accepting integers, decimal strings and `0x`-prefixed hex.
pub fn from_int_or_hex<'de, D>(deserializer: D) -> Result<U256, D::Error>
where
    D: Deserializer<'de>,
{
    NumberOrHex::deserialize(deserializer)?.try_into_u256()
}

/// Same as [`from_int_or_hex`] but for `u64` values such as gas, pc and depth.
pub fn u64_from_int_or_hex<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    NumberOrHex::deserialize(deserializer)?.try_into_u64()
}

/// Deserializes an optional `u64` quantity, see [`u64_from_int_or_hex`].
pub fn u64_from_int_or_hex_opt<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<NumberOrHex>::deserialize(deserializer)? {
        Some(val) => val.try_into_u64().map(Some),
        None => Ok(None),
    }
}

/// Parses a 256-bit EVM word that is always hex, with or without a `0x` prefix.
pub fn parse_word(s: &str) -> Result<U256, String> {
    let hex = s.strip_prefix("0x").unwrap_or(s);
    if hex.is_empty() {
        return Ok(U256::ZERO);
    }
    U256::from_str_radix(hex, 16).map_err(|err| format!("invalid word {s:?}: {err}"))
}

/// Deserializes a list of EVM words, see [`parse_word`].
pub fn words<'de, D>(deserializer: D) -> Result<Vec<U256>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<Vec<String>>::deserialize(deserializer)?.unwrap_or_default();
    raw.iter().map(|w| parse_word(w).map_err(de::Error::custom)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Deserialize)]
    struct Step {
        #[serde(deserialize_with = "u64_from_int_or_hex")]
        gas: u64,
        #[serde(deserialize_with = "words")]
        stack: Vec<U256>,
    }

    #[test]
    fn ganache_style() {
        let step: Step = serde_json::from_str(
            r#"{"gas": 6721975, "stack": ["0000000000000000000000000000000000000000000000000000000000000080"]}"#,
        )
        .unwrap();
        assert_eq!(step.gas, 6721975);
        assert_eq!(step.stack, vec![U256::from(0x80)]);
    }

    #[test]
    fn anvil_style() {
        let step: Step =
            serde_json::from_str(r#"{"gas": "0x5208", "stack": ["0x1", "0x"]}"#).unwrap();
        assert_eq!(step.gas, 21000);
        assert_eq!(step.stack, vec![U256::from(1), U256::ZERO]);
    }

    #[test]
    fn decimal_string() {
        let n: Numeric = "1000".parse().unwrap();
        assert_eq!(<U256 as From<Numeric>>::from(n), U256::from(1000));
        assert!(parse_word("zz").is_err());
    }
}
