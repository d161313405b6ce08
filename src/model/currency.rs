use std::fmt;
use std::str::FromStr;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::errors::{ExchangeError, Result};

/// Maximum number of bytes a currency code can hold.
pub const MAX_CURRENCY_LEN: usize = 10;

/// Upper-case currency identifier stored inline (no heap allocation).
///
/// The empty code is the *neutral* sentinel, meaning "no particular
/// currency": it tags pure numbers such as percentages or multipliers.
/// Codes are normalized to upper case at construction; alias resolution
/// (XBT -> BTC and friends) is the job of [`crate::context::AppContext`],
/// not of this type.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct CurrencyCode {
    bytes: [u8; MAX_CURRENCY_LEN],
    len: u8,
}

impl CurrencyCode {
    /// The neutral sentinel.
    pub const fn neutral() -> Self {
        CurrencyCode {
            bytes: [0; MAX_CURRENCY_LEN],
            len: 0,
        }
    }

    /// Builds a code from a raw string, upper-casing ASCII letters.
    ///
    /// Accepted bytes are ASCII alphanumerics plus `/`, `-`, `_` and `.`
    /// (the latter appear in prefix-normalized synthetic codes).
    pub fn new(code: &str) -> Result<Self> {
        let code = code.trim();
        if code.len() > MAX_CURRENCY_LEN {
            return Err(ExchangeError::Parse(format!(
                "currency code '{code}' exceeds {MAX_CURRENCY_LEN} characters"
            )));
        }
        let mut bytes = [0u8; MAX_CURRENCY_LEN];
        for (pos, byte) in code.bytes().enumerate() {
            let up = byte.to_ascii_uppercase();
            if !up.is_ascii_alphanumeric() && !matches!(up, b'/' | b'-' | b'_' | b'.') {
                return Err(ExchangeError::Parse(format!(
                    "invalid character '{}' in currency code '{code}'",
                    byte as char
                )));
            }
            bytes[pos] = up;
        }
        Ok(CurrencyCode {
            bytes,
            len: code.len() as u8,
        })
    }

    pub fn is_neutral(&self) -> bool {
        self.len == 0
    }

    pub fn as_str(&self) -> &str {
        // Only ASCII bytes are ever stored.
        std::str::from_utf8(&self.bytes[..self.len as usize]).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.len as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl fmt::Display for CurrencyCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Debug for CurrencyCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CurrencyCode({})", self.as_str())
    }
}

impl FromStr for CurrencyCode {
    type Err = ExchangeError;

    fn from_str(s: &str) -> Result<Self> {
        CurrencyCode::new(s)
    }
}

/// Infallible conversion for literal codes. Panics on an invalid literal,
/// which is a programming error, not an input error.
impl From<&str> for CurrencyCode {
    fn from(code: &str) -> Self {
        match CurrencyCode::new(code) {
            Ok(cur) => cur,
            Err(err) => panic!("invalid currency literal '{code}': {err}"),
        }
    }
}

impl Serialize for CurrencyCode {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for CurrencyCode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        CurrencyCode::new(&raw).map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upper_cases_input() {
        assert_eq!(CurrencyCode::from("btc").as_str(), "BTC");
        assert_eq!(CurrencyCode::from(" eth ").as_str(), "ETH");
    }

    #[test]
    fn neutral_is_empty() {
        assert!(CurrencyCode::neutral().is_neutral());
        assert!(!CurrencyCode::from("EUR").is_neutral());
        assert_eq!(CurrencyCode::default(), CurrencyCode::neutral());
    }

    #[test]
    fn rejects_long_or_invalid() {
        assert!(CurrencyCode::new("VERYLONGCODE").is_err());
        assert!(CurrencyCode::new("BT C").is_err());
        assert!(CurrencyCode::new("ARB/FOO").is_ok());
    }

    #[test]
    fn total_order_is_lexicographic() {
        assert!(CurrencyCode::from("BTC") < CurrencyCode::from("ETH"));
        assert!(CurrencyCode::from("BTC") < CurrencyCode::from("BTCA"));
        assert!(CurrencyCode::neutral() < CurrencyCode::from("AAA"));
    }

    #[test]
    fn serde_round_trip() {
        let cur = CurrencyCode::from("KRW");
        let json = serde_json::to_string(&cur).unwrap();
        assert_eq!(json, "\"KRW\"");
        let back: CurrencyCode = serde_json::from_str(&json).unwrap();
        assert_eq!(back, cur);
    }
}
