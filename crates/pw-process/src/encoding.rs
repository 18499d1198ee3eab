// SPDX-License-Identifier: MIT OR Apache-2.0
//! Text decoding of captured output.

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Character set used to turn captured bytes into text.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Charset {
    /// UTF-8.
    #[default]
    Utf8,
    /// ISO-8859-1. Every byte maps to the code point of the same value.
    Latin1,
}

impl Charset {
    /// Canonical name (`"utf-8"`, `"latin-1"`).
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Utf8 => "utf-8",
            Self::Latin1 => "latin-1",
        }
    }
}

/// What to do with bytes that are invalid in the charset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum DecodeErrors {
    /// Fail with [`DecodeError`].
    #[default]
    Strict,
    /// Substitute U+FFFD.
    Replace,
}

/// Charset plus error policy. Defaults to strict UTF-8.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Encoding {
    /// Character set.
    pub charset: Charset,
    /// Error policy.
    pub errors: DecodeErrors,
}

impl Encoding {
    /// Strict UTF-8.
    pub const UTF8: Encoding = Encoding {
        charset: Charset::Utf8,
        errors: DecodeErrors::Strict,
    };

    /// Same charset, replacing invalid sequences.
    pub fn replace(self) -> Self {
        Self {
            errors: DecodeErrors::Replace,
            ..self
        }
    }
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.charset.as_str())?;
        if self.errors == DecodeErrors::Replace {
            f.write_str(" replace")?;
        }
        Ok(())
    }
}

impl Serialize for Encoding {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Encoding {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(D::Error::custom)
    }
}

/// An encoding string could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown encoding '{0}'")]
pub struct EncodingParseError(pub String);

impl FromStr for Encoding {
    type Err = EncodingParseError;

    /// Parses `"<charset>[ <policy>]"`, e.g. `"utf-8"` or `"latin-1 replace"`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split_whitespace();
        let charset = match parts.next().map(str::to_ascii_lowercase).as_deref() {
            Some("utf-8" | "utf8") => Charset::Utf8,
            Some("latin-1" | "latin1" | "iso-8859-1") => Charset::Latin1,
            _ => return Err(EncodingParseError(s.to_string())),
        };
        let errors = match parts.next() {
            None | Some("strict") => DecodeErrors::Strict,
            Some("replace") => DecodeErrors::Replace,
            Some(_) => return Err(EncodingParseError(s.to_string())),
        };
        if parts.next().is_some() {
            return Err(EncodingParseError(s.to_string()));
        }
        Ok(Self { charset, errors })
    }
}

/// Bytes were invalid under a strict encoding.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("output is not valid {charset}: invalid byte at offset {offset}")]
pub struct DecodeError {
    /// Charset name.
    pub charset: &'static str,
    /// Offset of the first invalid byte.
    pub offset: usize,
}

/// Decode `bytes` under `encoding`.
pub fn decode(bytes: &[u8], encoding: Encoding) -> Result<String, DecodeError> {
    match encoding.charset {
        Charset::Latin1 => Ok(bytes.iter().map(|&b| char::from(b)).collect()),
        Charset::Utf8 => match encoding.errors {
            DecodeErrors::Replace => Ok(String::from_utf8_lossy(bytes).into_owned()),
            DecodeErrors::Strict => std::str::from_utf8(bytes)
                .map(str::to_owned)
                .map_err(|e| DecodeError {
                    charset: Charset::Utf8.as_str(),
                    offset: e.valid_up_to(),
                }),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_and_display() {
        let enc: Encoding = "utf-8 replace".parse().unwrap();
        assert_eq!(enc, Encoding::UTF8.replace());
        assert_eq!(enc.to_string(), "utf-8 replace");
        assert_eq!("Latin1".parse::<Encoding>().unwrap().charset, Charset::Latin1);
        assert!("utf-16".parse::<Encoding>().is_err());
        assert!("utf-8 ignore".parse::<Encoding>().is_err());
    }

    #[test]
    fn strict_rejects_invalid_utf8() {
        let err = decode(b"ab\xffc", Encoding::UTF8).unwrap_err();
        assert_eq!(err.offset, 2);
    }

    #[test]
    fn replace_and_latin1_never_fail() {
        assert_eq!(decode(b"a\xff", Encoding::UTF8.replace()).unwrap(), "a\u{fffd}");
        let latin1: Encoding = "latin-1".parse().unwrap();
        assert_eq!(decode(b"caf\xe9", latin1).unwrap(), "café");
    }
}
