//! Chip identity and version value objects.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// Chip Identity
// ============================================================================

/// Number of physical chips the registry can manage.
///
/// One slot exists per chip; slots are allocated at registry construction.
pub const MAX_CHIPS: usize = 2;

/// Identifier of a physical chip.
///
/// The identifier itself is not range-checked; the registry rejects values
/// outside `[0, MAX_CHIPS)` with a fatal `InvalidChipId` error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChipId(u8);

impl ChipId {
    /// The first (and on most boards, only) chip.
    pub const PRIMARY: ChipId = ChipId(0);

    pub const fn new(id: u8) -> Self {
        Self(id)
    }

    /// Returns the raw identifier.
    pub const fn get(self) -> u8 {
        self.0
    }

    /// Returns the slot index for this chip.
    pub const fn index(self) -> usize {
        self.0 as usize
    }

    /// Returns true if the identifier falls inside the registry capacity.
    #[must_use]
    pub const fn is_valid(self) -> bool {
        self.index() < MAX_CHIPS
    }
}

impl fmt::Display for ChipId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u8> for ChipId {
    fn from(id: u8) -> Self {
        Self(id)
    }
}

// ============================================================================
// Owner Context
// ============================================================================

/// Opaque context supplied by the client that first acquires a chip.
///
/// The registry never interprets the value; it is retained for the lifetime
/// of the session and handed to subordinate creation calls.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OwnerContext(String);

impl OwnerContext {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OwnerContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for OwnerContext {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for OwnerContext {
    fn from(s: String) -> Self {
        Self(s)
    }
}

// ============================================================================
// Chip Version
// ============================================================================

/// Hardware/firmware version reported by the chip once it is powered up.
///
/// Ordered by (project type, major, minor).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChipVersion {
    pub project_type: u16,
    pub major: u16,
    pub minor: u16,
}

impl ChipVersion {
    pub const fn new(project_type: u16, major: u16, minor: u16) -> Self {
        Self {
            project_type,
            major,
            minor,
        }
    }
}

impl fmt::Display for ChipVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.project_type, self.major, self.minor)
    }
}

/// Error returned when a version string is not `project.major.minor`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid chip version '{0}' (expected project.major.minor)")]
pub struct ParseVersionError(String);

impl FromStr for ChipVersion {
    type Err = ParseVersionError;

    /// Parses a version string like "7.1.2".
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ParseVersionError(s.to_string());

        let mut parts = s.trim().split('.');
        let mut next = || -> Result<u16, ParseVersionError> {
            parts
                .next()
                .ok_or_else(invalid)?
                .parse::<u16>()
                .map_err(|_| invalid())
        };

        let project_type = next()?;
        let major = next()?;
        let minor = next()?;

        if parts.next().is_some() {
            return Err(invalid());
        }

        Ok(Self::new(project_type, major, minor))
    }
}
