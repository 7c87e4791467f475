//! Error types following the panic-free policy.
//!
//! Every failure is classified exactly once as either fatal (the chip session
//! is unusable) or recoverable (the operation continues with defaults).

use std::fmt;
use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;

use crate::chip::ChipId;

// ============================================================================
// Classification
// ============================================================================

/// How the caller should treat a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// A broken precondition or unrecoverable environment.
    Fatal,
    /// The operation continued with a fallback.
    Recoverable,
}

/// Subordinate managers owned by a chip session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Component {
    Adapter,
    AudioCoordinator,
    ConfigAbstraction,
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Adapter => write!(f, "adapter"),
            Self::AudioCoordinator => write!(f, "audio coordinator"),
            Self::ConfigAbstraction => write!(f, "config abstraction"),
        }
    }
}

/// Platform services brought up by the one-time initialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PlatformStep {
    Os,
    Filesystem,
    PowerManagement,
}

impl fmt::Display for PlatformStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Os => write!(f, "OS"),
            Self::Filesystem => write!(f, "filesystem"),
            Self::PowerManagement => write!(f, "power management"),
        }
    }
}

// ============================================================================
// Collaborator Error
// ============================================================================

/// Failure reported by an external collaborator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}{}", .status.map(|s| format!(" (status {s})")).unwrap_or_default())]
pub struct CollaboratorError {
    /// Human-readable description.
    pub message: String,
    /// Collaborator-specific status code, if it reported one.
    pub status: Option<i32>,
}

impl CollaboratorError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status: None,
        }
    }

    pub fn with_status(message: impl Into<String>, status: i32) -> Self {
        Self {
            message: message.into(),
            status: Some(status),
        }
    }
}

// ============================================================================
// Config Error
// ============================================================================

/// Errors produced while loading the chip configuration.
///
/// Always recoverable: the registry falls back to a default configuration.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// The file could not be read and no memory profile was available.
    #[error("failed to read {path}: {reason}")]
    Io { path: PathBuf, reason: String },

    /// The file (or memory profile) was read but could not be parsed.
    #[error("failed to parse {origin}: {reason}")]
    Parse { origin: String, reason: String },

    /// Neither the file nor a fallback produced a configuration.
    #[error("no configuration available at {path}")]
    Unavailable { path: PathBuf },
}

// ============================================================================
// CCM Error
// ============================================================================

/// Errors returned by chip session operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CcmError {
    /// Chip identifier outside `[0, MAX_CHIPS)`.
    #[error("invalid chip id {chip_id} (max: {max})")]
    InvalidChipId { chip_id: ChipId, max: usize },

    /// The chip has no live session, or the handle belongs to an earlier one.
    #[error("chip {chip_id} has no live session for this handle")]
    NotAcquired { chip_id: ChipId },

    /// The handle was already released.
    #[error("handle for chip {chip_id} was already released")]
    DoubleRelease { chip_id: ChipId },

    /// A platform service failed to initialize.
    #[error("{step} initialization failed: {source}")]
    PlatformInit {
        step: PlatformStep,
        #[source]
        source: CollaboratorError,
    },

    /// A subordinate's one-time class initialization failed.
    #[error("{component} class initialization failed: {source}")]
    ClassInit {
        component: Component,
        #[source]
        source: CollaboratorError,
    },

    /// An earlier one-time initialization failed; it is never retried.
    #[error("one-time initialization previously failed")]
    InitFailed,

    /// A subordinate could not be created.
    #[error("chip {chip_id}: {component} creation failed: {source}")]
    SubordinateCreate {
        chip_id: ChipId,
        component: Component,
        #[source]
        source: CollaboratorError,
    },

    /// The adapter could not report the chip version.
    #[error("chip {chip_id}: chip version unavailable: {source}")]
    ChipVersionUnavailable {
        chip_id: ChipId,
        #[source]
        source: CollaboratorError,
    },

    /// A subordinate rejected the configuration push.
    #[error("chip {chip_id}: {component} configuration failed: {source}")]
    SubordinateConfigure {
        chip_id: ChipId,
        component: Component,
        #[source]
        source: CollaboratorError,
    },

    /// A subordinate failed to shut down cleanly.
    #[error("chip {chip_id}: {component} destruction failed: {source}")]
    SubordinateDestroy {
        chip_id: ChipId,
        component: Component,
        #[source]
        source: CollaboratorError,
    },

    /// Configuration could not be loaded.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl CcmError {
    /// Returns the error class.
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Config(_) => ErrorClass::Recoverable,
            _ => ErrorClass::Fatal,
        }
    }

    #[must_use]
    pub fn is_fatal(&self) -> bool {
        self.class() == ErrorClass::Fatal
    }

    /// Returns the chip the error refers to, if any.
    pub fn chip_id(&self) -> Option<ChipId> {
        match self {
            Self::InvalidChipId { chip_id, .. }
            | Self::NotAcquired { chip_id }
            | Self::DoubleRelease { chip_id }
            | Self::SubordinateCreate { chip_id, .. }
            | Self::ChipVersionUnavailable { chip_id, .. }
            | Self::SubordinateConfigure { chip_id, .. }
            | Self::SubordinateDestroy { chip_id, .. } => Some(*chip_id),
            _ => None,
        }
    }
}

/// Result type for chip session operations.
pub type CcmResult<T> = Result<T, CcmError>;
