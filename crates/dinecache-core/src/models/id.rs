//! Identifier types.
//!
//! The API sends identifiers as JSON numbers, query strings carry them as
//! text, and records stored by older builds may hold either. Every form is
//! accepted on input and normalised to an integer, so two identifiers compare
//! equal regardless of where they came from.

use std::fmt;
use std::str::FromStr;

use serde::{de, Deserialize, Deserializer, Serialize};

/// Any JSON shape an integer may arrive in.
#[derive(Deserialize)]
#[serde(untagged)]
enum LooseInt {
    Int(i64),
    Float(f64),
    Text(String),
}

impl LooseInt {
    fn into_i64(self) -> Result<i64, String> {
        match self {
            LooseInt::Int(n) => Ok(n),
            LooseInt::Float(f) if f.fract() == 0.0 && f.is_finite() => Ok(f as i64),
            LooseInt::Float(f) => Err(format!("expected an integer, got {}", f)),
            LooseInt::Text(s) => s
                .trim()
                .parse()
                .map_err(|_| format!("expected an integer, got {:?}", s)),
        }
    }
}

/// Deserialize an integer that may be encoded as a number or a string.
pub(crate) fn loose_i64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
    LooseInt::deserialize(deserializer)?
        .into_i64()
        .map_err(de::Error::custom)
}

/// Optional variant of [`loose_i64`]; `null` and a missing field map to `None`.
pub(crate) fn loose_opt_i64<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<i64>, D::Error> {
    match Option::<LooseInt>::deserialize(deserializer)? {
        Some(value) => value.into_i64().map(Some).map_err(de::Error::custom),
        None => Ok(None),
    }
}

macro_rules! entity_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl $name {
            pub fn get(self) -> i64 {
                self.0
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                loose_i64(deserializer).map($name)
            }
        }

        impl From<i64> for $name {
            fn from(value: i64) -> Self {
                $name(value)
            }
        }

        impl FromStr for $name {
            type Err = std::num::ParseIntError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                s.trim().parse().map($name)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

entity_id!(
    /// Identifier of a restaurant.
    RestaurantId
);

entity_id!(
    /// Identifier of a review, assigned by the server.
    ReviewId
);
