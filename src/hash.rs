use std::fmt;

use serde::de::{self, Unexpected, Visitor};

/// A visitor that deserializes a 32-byte hash written as a hex string prefixed
/// with 0x.
pub(crate) struct HashString;

impl<'de> Visitor<'de> for HashString {
    type Value = String;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        write!(
            formatter,
            "a string representing a hash in hex value prefixed with 0x"
        )
    }

    fn visit_str<E>(self, s: &str) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        if s.len() == 66 {
            Ok(s.to_string())
        } else {
            Err(de::Error::invalid_value(Unexpected::Str(s), &self))
        }
    }
}

/// A visitor that deserializes a 32-byte swap secret written as a bare hex
/// string.
pub(crate) struct SecretString;

impl<'de> Visitor<'de> for SecretString {
    type Value = String;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        write!(formatter, "a string representing a secret in hex value")
    }

    fn visit_str<E>(self, s: &str) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        if s.len() == 64 {
            Ok(s.to_string())
        } else {
            Err(de::Error::invalid_length(s.len(), &self))
        }
    }
}
