//! Engine version identifiers.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::Error;

/// A dotted `major.minor` engine version, e.g. `32.0`.
///
/// Ordering is numeric on `(major, minor)`, so `31.2 < 32.0 < 32.10`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EngineVersion {
    major: u16,
    minor: u16,
}

impl EngineVersion {
    /// Creates a version from its components.
    #[must_use]
    pub const fn new(major: u16, minor: u16) -> Self {
        Self { major, minor }
    }

    #[must_use]
    pub const fn major(&self) -> u16 {
        self.major
    }

    #[must_use]
    pub const fn minor(&self) -> u16 {
        self.minor
    }

    /// Parses strings such as `"32"`, `"32.0"`, `"v32.1"` or `"32.0.1.45"`.
    ///
    /// Components beyond the minor version are ignored.
    pub fn parse(s: &str) -> Result<Self, Error> {
        let trimmed = s.trim();
        let trimmed = trimmed
            .strip_prefix('v')
            .or_else(|| trimmed.strip_prefix('V'))
            .unwrap_or(trimmed);

        let mut parts = trimmed.split('.');
        let major = parts
            .next()
            .filter(|p| !p.is_empty())
            .and_then(|p| p.parse::<u16>().ok())
            .ok_or_else(|| Error::InvalidVersion(s.to_string()))?;
        let minor = match parts.next() {
            Some(p) => p
                .parse::<u16>()
                .map_err(|_| Error::InvalidVersion(s.to_string()))?,
            None => 0,
        };

        Ok(Self { major, minor })
    }

    /// Returns true if both versions share the same major component.
    #[must_use]
    pub const fn same_major(&self, other: &Self) -> bool {
        self.major == other.major
    }
}

impl fmt::Display for EngineVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

impl FromStr for EngineVersion {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for EngineVersion {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<EngineVersion> for String {
    fn from(value: EngineVersion) -> Self {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_accepts_common_shapes() {
        assert_eq!(EngineVersion::parse("32").unwrap(), EngineVersion::new(32, 0));
        assert_eq!(EngineVersion::parse("32.1").unwrap(), EngineVersion::new(32, 1));
        assert_eq!(EngineVersion::parse(" v31.2 ").unwrap(), EngineVersion::new(31, 2));
        assert_eq!(
            EngineVersion::parse("30.0.1.45").unwrap(),
            EngineVersion::new(30, 0)
        );
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(EngineVersion::parse("").is_err());
        assert!(EngineVersion::parse("v").is_err());
        assert!(EngineVersion::parse("32.x").is_err());
        assert!(EngineVersion::parse("abc").is_err());
    }
}
