//! Identifier types used throughout the bridge.
//!
//! Class identifiers use the engine's GUID text form; connection tokens use
//! UUID v7, which embeds a millisecond timestamp ahead of random bits.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::{EngineVersion, Error};

/// A native class identifier (CLSID / type library id).
///
/// Displayed in the braced, upper-case registry form:
/// `{5D3EB135-3317-413B-99DE-47C6B044134D}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ClassId(Uuid);

impl ClassId {
    /// Creates a class id from an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Creates a class id from its 128-bit textual-order value.
    #[must_use]
    pub const fn from_u128(value: u128) -> Self {
        Self(Uuid::from_u128(value))
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> Uuid {
        self.0
    }

    /// Returns the 128-bit value in textual order.
    #[must_use]
    pub const fn as_u128(&self) -> u128 {
        self.0.as_u128()
    }

    /// Parses a class id, with or without braces.
    pub fn parse(s: &str) -> Result<Self, Error> {
        let s = s.trim();
        let inner = s
            .strip_prefix('{')
            .and_then(|rest| rest.strip_suffix('}'))
            .unwrap_or(s);
        Ok(Self(Uuid::parse_str(inner)?))
    }
}

impl fmt::Display for ClassId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut buf = Uuid::encode_buffer();
        write!(f, "{{{}}}", self.0.hyphenated().encode_upper(&mut buf))
    }
}

impl FromStr for ClassId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for ClassId {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ClassId> for String {
    fn from(value: ClassId) -> Self {
        value.to_string()
    }
}

/// Per-session unique token passed to the engine's connect call.
///
/// Two sessions opened under the same identity never share a token, even when
/// created within the same millisecond.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionToken(Uuid);

impl ConnectionToken {
    /// Generates a fresh token from the current time and random bits.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    #[must_use]
    pub const fn as_uuid(&self) -> Uuid {
        self.0
    }

    /// Milliseconds since the Unix epoch embedded in the token.
    #[must_use]
    pub fn timestamp_millis(&self) -> Option<u64> {
        self.0.get_timestamp().map(|ts| {
            let (secs, nanos) = ts.to_unix();
            secs * 1000 + u64::from(nanos) / 1_000_000
        })
    }
}

impl Default for ConnectionToken {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LB-{}", self.0.simple())
    }
}

/// COM threading model advertised by a manifest `comClass` entry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ThreadingModel {
    #[default]
    Apartment,
    Free,
    Both,
    Neutral,
}

impl ThreadingModel {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Apartment => "Apartment",
            Self::Free => "Free",
            Self::Both => "Both",
            Self::Neutral => "Neutral",
        }
    }
}

impl fmt::Display for ThreadingModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ThreadingModel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "apartment" => Ok(Self::Apartment),
            "free" => Ok(Self::Free),
            "both" => Ok(Self::Both),
            "neutral" => Ok(Self::Neutral),
            _ => Err(Error::InvalidThreadingModel(s.to_string())),
        }
    }
}

/// How the engine's root object is named, independent of how it gets created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineIdentity {
    /// Programmatic identifier, e.g. `SDOEngine.32`.
    pub prog_id: String,
    /// Coclass name inside the engine's type library.
    pub coclass: String,
    /// Root class identifier. When absent it is read from the type library.
    #[serde(default)]
    pub class_id: Option<ClassId>,
    #[serde(default)]
    pub threading_model: ThreadingModel,
}

impl EngineIdentity {
    pub const PROG_ID_PREFIX: &'static str = "SDOEngine";
    pub const ROOT_COCLASS: &'static str = "SDOEngine";

    /// The identity the engine registers for a given major version.
    #[must_use]
    pub fn for_version(version: &EngineVersion) -> Self {
        Self {
            prog_id: format!("{}.{}", Self::PROG_ID_PREFIX, version.major()),
            coclass: Self::ROOT_COCLASS.to_string(),
            class_id: None,
            threading_model: ThreadingModel::Apartment,
        }
    }

    /// Returns a copy with the class id filled in.
    #[must_use]
    pub fn with_class_id(mut self, class_id: ClassId) -> Self {
        self.class_id = Some(class_id);
        self
    }
}
