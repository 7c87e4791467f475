//! Chip session registry.
//!
//! The registry holds one slot per physical chip. The first owner to acquire
//! a chip triggers construction of the chip's subordinate chain; later owners
//! only bump a counter. The last release tears the chain down again.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐ acquire(chip, owner) ┌─────────────────────┐
//! │  Owner (driver) │─────────────────────▶│ ChipSessionRegistry │
//! └─────────────────┘◀─────────────────────└──────────┬──────────┘
//!          │            SessionHandle                 │ slots[chip]
//!          │ release(&mut handle)                     ▼
//!          │ configure(&handle)         ┌──────────────────────────┐
//!          └───────────────────────────▶│ Slot (Mutex<SlotState>)  │
//!                                       │  owner_count, generation │
//!                                       │  Session { cal, adapter, │
//!                                       │            audio, cfg }  │
//!                                       └──────────────────────────┘
//! ```
//!
//! # Panic-Free Guarantees
//!
//! All operations in this module follow the panic-free policy:
//! - No `.unwrap()` or `.expect()` in production code
//! - Slot lookups use `get()` and map misses to `CcmError::InvalidChipId`
//! - Event publishing tolerates the absence of subscribers

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::trace;

use ccm_config::ConfigSettings;
use ccm_core::diag::CCM;
use ccm_core::{
    fatal, Adapter, AudioCoordinator, CcmError, CcmResult, ChipId, ChipVersion, Collaborators,
    ConfigAbstraction, OwnerContext, MAX_CHIPS,
};

use crate::init::{self, InitLatch};

mod events;
mod handle;
mod slot;

pub use events::{ChipSessionView, SessionEvent};
pub use handle::SessionHandle;

use slot::Slot;

/// Capacity of the session event channel.
pub const EVENT_BUFFER: usize = 100;

/// Reference-counted sessions for every supported chip.
///
/// One registry is created per process and shared by reference (or `Arc`)
/// between all clients. All methods take `&self`; per-chip state is guarded
/// by a mutex per slot.
pub struct ChipSessionRegistry {
    collaborators: Collaborators,
    settings: ConfigSettings,
    latch: InitLatch,
    slots: Vec<Arc<Slot>>,
    events: broadcast::Sender<SessionEvent>,
}

impl std::fmt::Debug for ChipSessionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChipSessionRegistry")
            .field("settings", &self.settings)
            .field("latch", &self.latch)
            .field("slots", &self.slots.len())
            .finish_non_exhaustive()
    }
}

impl ChipSessionRegistry {
    /// Creates a registry with every slot empty.
    ///
    /// No collaborator is called until the first `global_init` or `acquire`.
    pub fn new(collaborators: Collaborators, settings: ConfigSettings) -> Self {
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        let slots = (0..MAX_CHIPS)
            .filter_map(|i| u8::try_from(i).ok())
            .map(|i| Arc::new(Slot::new(ChipId::new(i), events.clone())))
            .collect();

        Self {
            collaborators,
            settings,
            latch: InitLatch::new(),
            slots,
            events,
        }
    }

    /// Runs the one-time initialization if it has not run yet.
    ///
    /// # Errors
    ///
    /// - `CcmError::PlatformInit` / `CcmError::ClassInit` from the first run
    /// - `CcmError::InitFailed` on every call after a failed first run
    pub fn global_init(&self) -> CcmResult<()> {
        self.latch.run_once(|| init::initialize(&self.collaborators))
    }

    /// Returns true once one-time initialization has succeeded.
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.latch.is_initialized()
    }

    /// Acquires a chip for `owner`.
    ///
    /// The first owner of a chip triggers loading of the configuration and
    /// creation of the configuration abstraction, adapter and audio
    /// coordinator, in that order. Later owners share the live session.
    ///
    /// # Errors
    ///
    /// All errors are fatal:
    /// - `CcmError::InvalidChipId` if `chip_id >= MAX_CHIPS`
    /// - Any error from `global_init`
    /// - `CcmError::SubordinateCreate` if the adapter or audio coordinator
    ///   cannot be created; the slot is left empty
    pub fn acquire(
        &self,
        chip_id: ChipId,
        owner: impl Into<OwnerContext>,
    ) -> CcmResult<SessionHandle> {
        let owner = owner.into();
        trace!(target: CCM, chip_id = %chip_id, owner = %owner, "acquire: enter");

        let result = self.slot(chip_id).and_then(|slot| {
            self.global_init()?;
            slot.acquire(owner, &self.collaborators, &self.settings)
        });

        trace!(target: CCM, chip_id = %chip_id, ok = result.is_ok(), "acquire: exit");
        result
    }

    /// Releases the owner reference held by `handle`.
    ///
    /// The handle is invalid afterwards, whatever the outcome. The last
    /// release destroys the audio coordinator, adapter and configuration
    /// abstraction, in that order.
    ///
    /// # Errors
    ///
    /// - `CcmError::DoubleRelease` if the handle was already released
    /// - `CcmError::NotAcquired` if the handle's session no longer exists
    /// - `CcmError::SubordinateDestroy` if a subordinate failed to shut
    ///   down; the slot is empty regardless
    pub fn release(&self, handle: &mut SessionHandle) -> CcmResult<()> {
        let chip_id = handle.chip_id();
        trace!(target: CCM, chip_id = %chip_id, "release: enter");

        let result = match self.slot(chip_id) {
            Ok(slot) => slot.release(handle),
            Err(e) => {
                handle.invalidate();
                Err(e)
            }
        };

        trace!(target: CCM, chip_id = %chip_id, ok = result.is_ok(), "release: exit");
        result
    }

    /// Reads the chip version from the adapter and pushes it into the
    /// configuration abstraction, then the audio coordinator.
    ///
    /// # Errors
    ///
    /// - `CcmError::NotAcquired` if the handle's session is not live
    /// - `CcmError::ChipVersionUnavailable` if the adapter has no version yet
    /// - `CcmError::SubordinateConfigure` if the audio coordinator fails
    pub fn configure(&self, handle: &SessionHandle) -> CcmResult<ChipVersion> {
        let chip_id = handle.chip_id();
        trace!(target: CCM, chip_id = %chip_id, "configure: enter");

        let result = self.slot(chip_id).and_then(|slot| slot.configure(handle));

        trace!(target: CCM, chip_id = %chip_id, ok = result.is_ok(), "configure: exit");
        result
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    /// Returns the adapter of the handle's live session.
    pub fn adapter(&self, handle: &SessionHandle) -> CcmResult<Arc<dyn Adapter>> {
        self.slot(handle.chip_id())?.adapter(handle)
    }

    /// Returns the audio coordinator of the handle's live session.
    pub fn audio_coordinator(&self, handle: &SessionHandle) -> CcmResult<Arc<dyn AudioCoordinator>> {
        self.slot(handle.chip_id())?.audio_coordinator(handle)
    }

    /// Returns the configuration abstraction of the handle's live session.
    pub fn config_abstraction(
        &self,
        handle: &SessionHandle,
    ) -> CcmResult<Arc<dyn ConfigAbstraction>> {
        self.slot(handle.chip_id())?.config_abstraction(handle)
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Number of owners currently holding the chip; zero for invalid ids.
    pub fn owner_count(&self, chip_id: ChipId) -> usize {
        self.slots
            .get(chip_id.index())
            .map(|slot| slot.owner_count())
            .unwrap_or(0)
    }

    #[must_use]
    pub fn is_live(&self, chip_id: ChipId) -> bool {
        self.owner_count(chip_id) > 0
    }

    /// Snapshot of one slot, or `None` for an invalid id.
    pub fn session(&self, chip_id: ChipId) -> Option<ChipSessionView> {
        self.slots.get(chip_id.index()).map(|slot| slot.view())
    }

    /// Snapshots of every slot, live or not.
    pub fn sessions(&self) -> Vec<ChipSessionView> {
        self.slots.iter().map(|slot| slot.view()).collect()
    }

    /// Subscribes to session events published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Path of the configuration file loaded on session construction.
    pub fn config_path(&self) -> PathBuf {
        self.settings.path()
    }

    fn slot(&self, chip_id: ChipId) -> CcmResult<&Arc<Slot>> {
        self.slots.get(chip_id.index()).ok_or_else(|| {
            fatal!(target: CCM, chip_id = %chip_id, max = MAX_CHIPS, "Invalid chip id");
            CcmError::InvalidChipId {
                chip_id,
                max: MAX_CHIPS,
            }
        })
    }
}
