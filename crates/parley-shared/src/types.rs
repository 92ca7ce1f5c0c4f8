//! Identifier types shared by every layer.
//!
//! The chat-listing service, the message-history service and the push
//! endpoint do not agree on how identifiers are encoded: the same chat can
//! arrive as the JSON number `42` from one and the string `"42"` from
//! another. Every identifier is therefore stored in a canonical string form
//! and compared on that form only.

use std::fmt;

use serde::de::{self, Deserializer, Visitor};
use serde::{Deserialize, Serialize, Serializer};
use uuid::Uuid;

/// Reduce a raw identifier to its canonical string form.
///
/// Surrounding whitespace is not significant. Everything else is kept
/// verbatim, so `"007"` and `"7"` stay distinct.
pub fn canonicalize(raw: &str) -> String {
    raw.trim().to_string()
}

fn is_plain_integer(s: &str) -> bool {
    let digits = s.strip_prefix('-').unwrap_or(s);
    !digits.is_empty()
        && digits.bytes().all(|b| b.is_ascii_digit())
        && (digits == "0" || !digits.starts_with('0'))
}

struct IdVisitor;

impl<'de> Visitor<'de> for IdVisitor {
    type Value = String;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("an identifier encoded as a string or an integer")
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<String, E> {
        Ok(canonicalize(v))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<String, E> {
        Ok(v.to_string())
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<String, E> {
        Ok(v.to_string())
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<String, E> {
        if v.fract() == 0.0 && v.is_finite() && v.abs() < 9.007_199_254_740_992e15 {
            Ok((v as i64).to_string())
        } else {
            Err(E::custom(format!("non-integral identifier {v}")))
        }
    }
}

/// Serialize a canonical id: plain integers go out as JSON numbers (the
/// collaborators look users up by integer), everything else as a string.
fn serialize_canonical<S: Serializer>(value: &str, serializer: S) -> Result<S::Ok, S::Error> {
    if is_plain_integer(value) {
        if let Ok(n) = value.parse::<i64>() {
            return serializer.serialize_i64(n);
        }
    }
    serializer.serialize_str(value)
}

macro_rules! opaque_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(String);

        impl $name {
            pub fn new(raw: impl AsRef<str>) -> Self {
                Self(canonicalize(raw.as_ref()))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(raw: &str) -> Self {
                Self::new(raw)
            }
        }

        impl From<String> for $name {
            fn from(raw: String) -> Self {
                Self::new(raw)
            }
        }

        impl From<i64> for $name {
            fn from(raw: i64) -> Self {
                Self(raw.to_string())
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serialize_canonical(&self.0, serializer)
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                deserializer.deserialize_any(IdVisitor).map(Self)
            }
        }
    };
}

opaque_id!(
    /// Identifier of a conversation.
    ChatId
);

opaque_id!(
    /// Identifier of a user, handed to the core by the auth collaborator.
    UserId
);

opaque_id!(
    /// Server-assigned identifier of a stored message.
    MessageId
);

/// Client-generated identifier of an optimistic message. Never leaves the
/// process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LocalId(pub Uuid);

impl LocalId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for LocalId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for LocalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_number_and_string_ids_compare_equal() {
        let from_number: ChatId = serde_json::from_str("42").unwrap();
        let from_string: ChatId = serde_json::from_str("\"42\"").unwrap();
        let padded: ChatId = serde_json::from_str("\" 42 \"").unwrap();
        assert_eq!(from_number, from_string);
        assert_eq!(from_string, padded);
        assert_eq!(ChatId::from(42_i64), from_number);
    }

    #[test]
    fn test_leading_zeros_are_significant() {
        assert_ne!(ChatId::new("007"), ChatId::new("7"));
    }

    #[test]
    fn test_integral_float_is_accepted() {
        let id: UserId = serde_json::from_str("7.0").unwrap();
        assert_eq!(id.as_str(), "7");
        assert!(serde_json::from_str::<UserId>("7.5").is_err());
    }

    #[test]
    fn test_numeric_ids_serialize_as_numbers() {
        assert_eq!(serde_json::to_string(&UserId::new("12")).unwrap(), "12");
        assert_eq!(
            serde_json::to_string(&ChatId::new("a1b2c3d4")).unwrap(),
            "\"a1b2c3d4\""
        );
        assert_eq!(serde_json::to_string(&ChatId::new("0042")).unwrap(), "\"0042\"");
    }

    #[test]
    fn test_local_ids_are_unique() {
        assert_ne!(LocalId::new(), LocalId::new());
    }

    #[test]
    fn test_local_id_displays_as_uuid() {
        let id = LocalId::new();
        let shown = id.to_string();
        assert_eq!(shown.len(), 36);
        assert_eq!(Uuid::parse_str(&shown).unwrap(), id.0);
    }
}
