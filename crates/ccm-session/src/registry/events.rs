//! Session events and read-only session views.
//!
//! - `SessionEvent`: published by the registry on every ownership or
//!   configuration change
//! - `ChipSessionView`: snapshot of one slot for queries and display

use serde::Serialize;

use ccm_core::{ChipId, ChipVersion, ConfigSource, OwnerContext};

// ============================================================================
// Session Events
// ============================================================================

/// Events published by the registry to subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// The subordinate chain of a chip was constructed.
    Created {
        chip_id: ChipId,
        /// Owner that triggered construction
        owner: OwnerContext,
        generation: u64,
    },

    /// An owner acquired the chip.
    Acquired {
        chip_id: ChipId,
        owner: OwnerContext,
        /// Owner count after the acquisition
        owner_count: usize,
    },

    /// An owner released the chip.
    Released {
        chip_id: ChipId,
        /// Owner count after the release
        owner_count: usize,
    },

    /// The last owner released the chip and the chain was torn down.
    Destroyed { chip_id: ChipId, generation: u64 },

    /// The chip version was pushed into the subordinate managers.
    Configured {
        chip_id: ChipId,
        version: ChipVersion,
    },
}

impl SessionEvent {
    pub fn chip_id(&self) -> ChipId {
        match self {
            Self::Created { chip_id, .. }
            | Self::Acquired { chip_id, .. }
            | Self::Released { chip_id, .. }
            | Self::Destroyed { chip_id, .. }
            | Self::Configured { chip_id, .. } => *chip_id,
        }
    }
}

// ============================================================================
// Session View
// ============================================================================

/// Snapshot of one registry slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChipSessionView {
    pub chip_id: ChipId,
    pub owner_count: usize,
    /// Owner that constructed the live session
    pub owner: Option<OwnerContext>,
    /// Construction counter; bumped on every rebuild
    pub generation: u64,
    /// Last version pushed through configure
    pub chip_version: Option<ChipVersion>,
    /// Where the session's configuration came from
    pub config_source: Option<ConfigSource>,
}

impl ChipSessionView {
    #[must_use]
    pub fn is_live(&self) -> bool {
        self.owner_count > 0
    }
}
