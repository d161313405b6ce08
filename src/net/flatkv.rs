use std::fmt;

use serde_json::{Map, Value};

use crate::errors::{ExchangeError, Result};

/// Key / value pairs flattened in a single string, in insertion order.
///
/// Parameterized by the pair separator and the key/value assignment
/// character, e.g. `FlatKeyValue<'&', '='>` renders `a=1&b=2`. The flat
/// representation *is* the canonical form: what you append in which order
/// is exactly what [`FlatKeyValue::to_signing_string`] returns, which makes
/// it a deterministic HMAC signing input.
///
/// A value may end with [`ARRAY_ELEM_SEP`] to denote JSON-array semantics
/// when converted to a JSON document.
#[derive(Clone, PartialEq, Eq, Hash, Default)]
pub struct FlatKeyValue<const PAIR_SEP: char, const ASSIGN: char> {
    data: String,
}

/// Separator of array elements inside a single value.
pub const ARRAY_ELEM_SEP: char = ',';

/// URL query string / form body flavor.
pub type PostData = FlatKeyValue<'&', '='>;

impl<const PAIR_SEP: char, const ASSIGN: char> FlatKeyValue<PAIR_SEP, ASSIGN> {
    pub fn new() -> Self {
        FlatKeyValue {
            data: String::new(),
        }
    }

    /// Builds from a list of pairs, appending in order.
    pub fn from_pairs<'kv>(
        pairs: impl IntoIterator<Item = (&'kv str, &'kv str)>,
    ) -> Result<Self> {
        let mut ret = Self::new();
        for (key, value) in pairs {
            ret.append(key, value)?;
        }
        Ok(ret)
    }

    fn check(input: &str, what: &str) -> Result<()> {
        if input.contains(PAIR_SEP) || input.contains(ASSIGN) {
            return Err(ExchangeError::DuplicateSeparatorInValue(format!(
                "{what} '{input}' contains '{PAIR_SEP}' or '{ASSIGN}'"
            )));
        }
        Ok(())
    }

    /// Inserts at the end without checking key uniqueness.
    pub fn append(&mut self, key: &str, value: impl fmt::Display) -> Result<()> {
        let value = value.to_string();
        Self::check(key, "key")?;
        Self::check(&value, "value")?;
        if !self.data.is_empty() {
            self.data.push(PAIR_SEP);
        }
        self.data.push_str(key);
        self.data.push(ASSIGN);
        self.data.push_str(&value);
        Ok(())
    }

    /// Appends the content of another flat string, keys unchecked.
    pub fn extend(&mut self, other: &Self) {
        if !other.data.is_empty() {
            if !self.data.is_empty() {
                self.data.push(PAIR_SEP);
            }
            self.data.push_str(&other.data);
        }
    }

    /// Replaces the value of the first occurrence of `key`, or appends.
    /// Positions of unrelated keys are left untouched.
    pub fn set(&mut self, key: &str, value: impl fmt::Display) -> Result<()> {
        let value = value.to_string();
        Self::check(key, "key")?;
        Self::check(&value, "value")?;
        match self.find(key) {
            None => self.append(key, value),
            Some(pos) => {
                let value_begin = pos + key.len() + 1;
                let value_end = self.data[value_begin..]
                    .find(PAIR_SEP)
                    .map_or(self.data.len(), |rel| value_begin + rel);
                self.data.replace_range(value_begin..value_end, &value);
                Ok(())
            }
        }
    }

    /// Erases the first occurrence of `key` if present.
    pub fn erase(&mut self, key: &str) {
        if let Some(pos) = self.find(key) {
            let bytes = self.data.as_bytes();
            let mut last = pos + key.len() + 1;
            while last < bytes.len() && bytes[last] != PAIR_SEP as u8 {
                last += 1;
            }
            let first = if pos == 0 {
                if last < bytes.len() {
                    last += 1; // no leading separator: eat the trailing one
                }
                0
            } else {
                pos - 1 // leading pair separator goes too
            };
            self.data.replace_range(first..last, "");
        }
    }

    /// Byte position of `key` in the flat string.
    pub fn find(&self, key: &str) -> Option<usize> {
        if key.is_empty() {
            return None;
        }
        let mut begin = 0;
        loop {
            let pos = begin + self.data[begin..].find(key)?;
            let before_ok = pos == 0 || self.data.as_bytes()[pos - 1] == PAIR_SEP as u8;
            let after = pos + key.len();
            let after_ok = self.data.as_bytes().get(after) == Some(&(ASSIGN as u8));
            if before_ok && after_ok {
                return Some(pos);
            }
            begin = pos + 1;
            if begin >= self.data.len() {
                return None;
            }
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.find(key).is_some()
    }

    /// Value associated with the first occurrence of `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        let pos = self.find(key)?;
        let value_begin = pos + key.len() + 1;
        let value_end = self.data[value_begin..]
            .find(PAIR_SEP)
            .map_or(self.data.len(), |rel| value_begin + rel);
        Some(&self.data[value_begin..value_end])
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn clear(&mut self) {
        self.data.clear();
    }

    /// Iterates `(key, value)` in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.data
            .split(PAIR_SEP)
            .filter(|pair| !pair.is_empty())
            .map(move |pair| pair.split_once(ASSIGN).unwrap_or((pair, "")))
    }

    /// The canonical flat form.
    pub fn as_str(&self) -> &str {
        &self.data
    }

    /// The exact byte sequence to feed a MAC: identical to [`Self::as_str`],
    /// preserving the ordering established by the caller.
    pub fn to_signing_string(&self) -> &str {
        &self.data
    }

    /// Copy with every value byte outside `is_allowed` replaced by its
    /// `%HH` upper-case escape. Keys are left as-is.
    pub fn url_encode_except(&self, is_allowed: impl Fn(u8) -> bool) -> String {
        let mut out = String::with_capacity(self.data.len());
        for (index, (key, value)) in self.iter().enumerate() {
            if index > 0 {
                out.push(PAIR_SEP);
            }
            out.push_str(key);
            out.push(ASSIGN);
            out.push_str(&url_encode(value, &is_allowed));
        }
        out
    }

    /// Converts to a JSON object. Values ending with [`ARRAY_ELEM_SEP`] are
    /// decoded as arrays of strings; everything else stays a string.
    pub fn to_json(&self) -> Value {
        let mut object = Map::new();
        for (key, value) in self.iter() {
            if let Some(list) = value.strip_suffix(ARRAY_ELEM_SEP) {
                let elems: Vec<Value> = if list.is_empty() {
                    Vec::new()
                } else {
                    list.split(ARRAY_ELEM_SEP)
                        .map(|elem| Value::String(elem.to_string()))
                        .collect()
                };
                object.insert(key.to_string(), Value::Array(elems));
            } else {
                object.insert(key.to_string(), Value::String(value.to_string()));
            }
        }
        Value::Object(object)
    }
}

impl<const PAIR_SEP: char, const ASSIGN: char> fmt::Display for FlatKeyValue<PAIR_SEP, ASSIGN> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.data)
    }
}

impl<const PAIR_SEP: char, const ASSIGN: char> fmt::Debug for FlatKeyValue<PAIR_SEP, ASSIGN> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FlatKeyValue({})", self.data)
    }
}

/// Bytes kept verbatim by default URL encoding (RFC 3986 unreserved set).
pub fn url_unreserved(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'_' | b'.' | b'~')
}

/// Percent-encodes every byte outside the allowed set, upper-case hex.
pub fn url_encode(data: &str, is_allowed: impl Fn(u8) -> bool) -> String {
    let mut out = String::with_capacity(data.len());
    for byte in data.bytes() {
        if is_allowed(byte) {
            out.push(byte as char);
        } else {
            out.push_str(&format!("%{byte:02X}"));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signing_string_preserves_insertion_order() {
        let mut kv = PostData::new();
        kv.append("ts", 1621785125200i64).unwrap();
        kv.append("symbol", "BTCEUR").unwrap();
        kv.append("side", "BUY").unwrap();
        assert_eq!(kv.to_signing_string(), "ts=1621785125200&symbol=BTCEUR&side=BUY");
    }

    #[test]
    fn set_keeps_unrelated_positions() {
        let mut kv = PostData::new();
        kv.append("a", "1").unwrap();
        kv.append("b", "2").unwrap();
        kv.append("c", "3").unwrap();
        kv.set("b", "two").unwrap();
        assert_eq!(kv.as_str(), "a=1&b=two&c=3");
        kv.set("d", "4").unwrap();
        assert_eq!(kv.as_str(), "a=1&b=two&c=3&d=4");
        assert_eq!(kv.get("b"), Some("two"));
    }

    #[test]
    fn erase_first_middle_last() {
        let mut kv = PostData::from_pairs([("a", "1"), ("b", "2"), ("c", "3")]).unwrap();
        kv.erase("b");
        assert_eq!(kv.as_str(), "a=1&c=3");
        kv.erase("a");
        assert_eq!(kv.as_str(), "c=3");
        kv.erase("c");
        assert!(kv.is_empty());
        kv.erase("zz");
        assert!(kv.is_empty());
    }

    #[test]
    fn find_does_not_match_values_or_substrings() {
        let kv = PostData::from_pairs([("units", "all"), ("all", "yes")]).unwrap();
        assert_eq!(kv.get("all"), Some("yes"));
        assert_eq!(kv.get("unit"), None);
        assert_eq!(kv.get("s"), None);
    }

    #[test]
    fn rejects_separator_in_value() {
        let mut kv = PostData::new();
        assert!(matches!(
            kv.append("key", "a&b"),
            Err(ExchangeError::DuplicateSeparatorInValue(_))
        ));
        assert!(matches!(
            kv.append("key", "a=b"),
            Err(ExchangeError::DuplicateSeparatorInValue(_))
        ));
    }

    #[test]
    fn url_encoding_uses_upper_hex() {
        let mut kv = PostData::new();
        kv.append("addr", "rG1 QQv:2nh").unwrap();
        assert_eq!(kv.url_encode_except(url_unreserved), "addr=rG1%20QQv%3A2nh");
        assert_eq!(url_encode("café", url_unreserved), "caf%C3%A9");
    }

    #[test]
    fn json_conversion_handles_arrays() {
        let mut kv = PostData::new();
        kv.append("currency", "BTC").unwrap();
        kv.append("uuids", "id1,id2,").unwrap();
        kv.append("empty", ",").unwrap();
        let json = kv.to_json();
        assert_eq!(json["currency"], "BTC");
        assert_eq!(json["uuids"], serde_json::json!(["id1", "id2"]));
        assert_eq!(json["empty"], serde_json::json!([]));
    }

    #[test]
    fn iteration_in_order() {
        let kv = PostData::from_pairs([("one", "1"), ("two", "2")]).unwrap();
        let pairs: Vec<_> = kv.iter().collect();
        assert_eq!(pairs, vec![("one", "1"), ("two", "2")]);
    }
}
