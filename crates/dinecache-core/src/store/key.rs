//! Record keys and key ranges.

use std::fmt;
use std::ops::Bound;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::{RestaurantId, ReviewId};

/// A partition key. Integer-looking text is always stored as `Int`, so
/// `Key::from("7") == Key::from(7)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Key {
    Int(i64),
    Text(String),
}

const INT_TAG: u8 = 0;
const TEXT_TAG: u8 = 1;
const SIGN_BIT: u64 = 1 << 63;

impl Key {
    /// Derive a key from a JSON field value. Only integers and strings qualify.
    pub fn from_value(value: &Value) -> Option<Key> {
        match value {
            Value::Number(n) => n.as_i64().map(Key::Int),
            Value::String(s) => Some(Key::from(s.as_str())),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Key::Int(n) => Some(*n),
            Key::Text(_) => None,
        }
    }

    /// Storage encoding. Byte order matches `Ord`: integers (sign bit
    /// flipped, big endian) before text.
    pub(crate) fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(9);
        match self {
            Key::Int(n) => {
                bytes.push(INT_TAG);
                bytes.extend_from_slice(&((*n as u64) ^ SIGN_BIT).to_be_bytes());
            }
            Key::Text(s) => {
                bytes.push(TEXT_TAG);
                bytes.extend_from_slice(s.as_bytes());
            }
        }
        bytes
    }

    pub(crate) fn from_bytes(bytes: &[u8]) -> Option<Key> {
        match bytes.split_first()? {
            (&INT_TAG, rest) => {
                let raw: [u8; 8] = rest.try_into().ok()?;
                Some(Key::Int((u64::from_be_bytes(raw) ^ SIGN_BIT) as i64))
            }
            (&TEXT_TAG, rest) => String::from_utf8(rest.to_vec()).ok().map(Key::Text),
            _ => None,
        }
    }
}

impl From<i64> for Key {
    fn from(value: i64) -> Self {
        Key::Int(value)
    }
}

impl From<&str> for Key {
    fn from(value: &str) -> Self {
        match value.trim().parse::<i64>() {
            Ok(n) => Key::Int(n),
            Err(_) => Key::Text(value.to_string()),
        }
    }
}

impl From<String> for Key {
    fn from(value: String) -> Self {
        Key::from(value.as_str())
    }
}

impl From<RestaurantId> for Key {
    fn from(value: RestaurantId) -> Self {
        Key::Int(value.get())
    }
}

impl From<ReviewId> for Key {
    fn from(value: ReviewId) -> Self {
        Key::Int(value.get())
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Int(n) => write!(f, "{}", n),
            Key::Text(s) => write!(f, "{}", s),
        }
    }
}

/// A key range for `get_all` queries. Integers sort before text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyRange {
    lower: Bound<Key>,
    upper: Bound<Key>,
}

impl KeyRange {
    pub fn only(key: impl Into<Key>) -> Self {
        let key = key.into();
        Self {
            lower: Bound::Included(key.clone()),
            upper: Bound::Included(key),
        }
    }

    /// Inclusive on both ends.
    pub fn bound(lower: impl Into<Key>, upper: impl Into<Key>) -> Self {
        Self {
            lower: Bound::Included(lower.into()),
            upper: Bound::Included(upper.into()),
        }
    }

    pub fn lower_bound(key: impl Into<Key>, open: bool) -> Self {
        let key = key.into();
        Self {
            lower: if open { Bound::Excluded(key) } else { Bound::Included(key) },
            upper: Bound::Unbounded,
        }
    }

    pub fn upper_bound(key: impl Into<Key>, open: bool) -> Self {
        let key = key.into();
        Self {
            lower: Bound::Unbounded,
            upper: if open { Bound::Excluded(key) } else { Bound::Included(key) },
        }
    }

    pub fn contains(&self, key: &Key) -> bool {
        let above = match &self.lower {
            Bound::Included(lower) => key >= lower,
            Bound::Excluded(lower) => key > lower,
            Bound::Unbounded => true,
        };
        let below = match &self.upper {
            Bound::Included(upper) => key <= upper,
            Bound::Excluded(upper) => key < upper,
            Bound::Unbounded => true,
        };
        above && below
    }

    /// True when no key can fall inside the range.
    pub(crate) fn is_empty(&self) -> bool {
        match (&self.lower, &self.upper) {
            (Bound::Included(lower), Bound::Included(upper)) => lower > upper,
            (Bound::Included(lower), Bound::Excluded(upper))
            | (Bound::Excluded(lower), Bound::Included(upper))
            | (Bound::Excluded(lower), Bound::Excluded(upper)) => lower >= upper,
            _ => false,
        }
    }

    pub(crate) fn byte_bounds(&self) -> (Bound<Vec<u8>>, Bound<Vec<u8>>) {
        (encode_bound(&self.lower), encode_bound(&self.upper))
    }
}

fn encode_bound(bound: &Bound<Key>) -> Bound<Vec<u8>> {
    match bound {
        Bound::Included(key) => Bound::Included(key.to_bytes()),
        Bound::Excluded(key) => Bound::Excluded(key.to_bytes()),
        Bound::Unbounded => Bound::Unbounded,
    }
}
