//! One registry slot: the owner count and subordinate chain of a chip.
//!
//! Every operation on a slot runs under the slot's mutex, so `acquire`,
//! `release`, `configure` and the version-ready callback never interleave
//! for the same chip. Slots of different chips share no state.
//!
//! The slot mutex is not reentrant. The thread holding it is recorded, so a
//! version report fired synchronously from a collaborator call the slot is
//! making is detected and dropped instead of deadlocking.

use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Weak};
use std::thread::{self, ThreadId};

use parking_lot::{Mutex, MutexGuard};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use ccm_config::ConfigSettings;
use ccm_core::diag::CCM;
use ccm_core::{
    fatal, Adapter, AudioCoordinator, CcmError, CcmResult, ChipConfig, ChipId, ChipVersion,
    Collaborators, CollaboratorError, Component, ConfigAbstraction, OwnerContext,
    VersionReadyCallback,
};

use super::events::{ChipSessionView, SessionEvent};
use super::handle::SessionHandle;

/// Live subordinate chain of a chip.
struct Session {
    owner: OwnerContext,
    config: ChipConfig,
    config_abstraction: Arc<dyn ConfigAbstraction>,
    adapter: Arc<dyn Adapter>,
    audio: Arc<dyn AudioCoordinator>,
    version: Option<ChipVersion>,
}

/// Mutable slot state.
///
/// Invariant: `session.is_some()` iff `owner_count > 0`.
#[derive(Default)]
struct SlotState {
    owner_count: usize,
    generation: u64,
    session: Option<Session>,
}

impl SlotState {
    /// Returns the live session the handle belongs to.
    fn session_for(&self, chip_id: ChipId, handle: &SessionHandle) -> CcmResult<&Session> {
        match &self.session {
            Some(session) if handle.is_valid() && handle.generation() == self.generation => {
                Ok(session)
            }
            _ => Err(CcmError::NotAcquired { chip_id }),
        }
    }
}

/// Locked slot state. Clears the recorded holder before unlocking.
struct StateGuard<'a> {
    state: MutexGuard<'a, SlotState>,
    holder: &'a Mutex<Option<ThreadId>>,
}

impl Deref for StateGuard<'_> {
    type Target = SlotState;

    fn deref(&self) -> &SlotState {
        &self.state
    }
}

impl DerefMut for StateGuard<'_> {
    fn deref_mut(&mut self) -> &mut SlotState {
        &mut self.state
    }
}

impl Drop for StateGuard<'_> {
    fn drop(&mut self) {
        *self.holder.lock() = None;
    }
}

pub(crate) struct Slot {
    chip_id: ChipId,
    state: Mutex<SlotState>,
    /// Thread currently holding `state`.
    holder: Mutex<Option<ThreadId>>,
    events: broadcast::Sender<SessionEvent>,
}

impl Slot {
    pub(crate) fn new(chip_id: ChipId, events: broadcast::Sender<SessionEvent>) -> Self {
        Self {
            chip_id,
            state: Mutex::new(SlotState::default()),
            holder: Mutex::new(None),
            events,
        }
    }

    fn lock(&self) -> StateGuard<'_> {
        let state = self.state.lock();
        *self.holder.lock() = Some(thread::current().id());
        StateGuard {
            state,
            holder: &self.holder,
        }
    }

    fn held_by_current_thread(&self) -> bool {
        *self.holder.lock() == Some(thread::current().id())
    }

    // ========================================================================
    // Ownership
    // ========================================================================

    /// Adds an owner, constructing the subordinate chain for the first one.
    pub(crate) fn acquire(
        self: &Arc<Self>,
        owner: OwnerContext,
        collab: &Collaborators,
        settings: &ConfigSettings,
    ) -> CcmResult<SessionHandle> {
        let mut state = self.lock();

        if state.owner_count == 0 {
            let generation = state.generation + 1;
            state.generation = generation;

            let session = self.construct(generation, &owner, collab, settings)?;
            state.session = Some(session);

            info!(
                target: CCM,
                chip_id = %self.chip_id,
                owner = %owner,
                generation,
                "Chip session created"
            );
            self.publish(SessionEvent::Created {
                chip_id: self.chip_id,
                owner: owner.clone(),
                generation,
            });
        } else {
            debug!(
                target: CCM,
                chip_id = %self.chip_id,
                owner = %owner,
                "Chip session already live, adding owner"
            );
        }

        state.owner_count += 1;
        self.publish(SessionEvent::Acquired {
            chip_id: self.chip_id,
            owner,
            owner_count: state.owner_count,
        });

        Ok(SessionHandle::new(self.chip_id, state.generation))
    }

    /// Drops an owner, tearing the chain down when the last one leaves.
    pub(crate) fn release(&self, handle: &mut SessionHandle) -> CcmResult<()> {
        if !handle.invalidate() {
            fatal!(target: CCM, chip_id = %self.chip_id, "Handle released twice");
            return Err(CcmError::DoubleRelease {
                chip_id: self.chip_id,
            });
        }

        let mut state = self.lock();

        if state.owner_count == 0 || handle.generation() != state.generation {
            fatal!(
                target: CCM,
                chip_id = %self.chip_id,
                handle_generation = handle.generation(),
                generation = state.generation,
                owner_count = state.owner_count,
                "Release of a chip session that does not exist"
            );
            return Err(CcmError::NotAcquired {
                chip_id: self.chip_id,
            });
        }

        state.owner_count -= 1;
        self.publish(SessionEvent::Released {
            chip_id: self.chip_id,
            owner_count: state.owner_count,
        });

        if state.owner_count > 0 {
            debug!(
                target: CCM,
                chip_id = %self.chip_id,
                owner_count = state.owner_count,
                "Owner released, session stays live"
            );
            return Ok(());
        }

        let generation = state.generation;
        let result = match state.session.take() {
            Some(session) => self.teardown(session),
            None => Ok(()),
        };

        info!(target: CCM, chip_id = %self.chip_id, generation, "Chip session destroyed");
        self.publish(SessionEvent::Destroyed {
            chip_id: self.chip_id,
            generation,
        });

        result
    }

    // ========================================================================
    // Configuration
    // ========================================================================

    /// Reads the chip version from the adapter and pushes it down the chain.
    pub(crate) fn configure(&self, handle: &SessionHandle) -> CcmResult<ChipVersion> {
        let mut state = self.lock();
        let generation = state.generation;

        let session = match state.session.as_mut() {
            Some(session) if handle.is_valid() && handle.generation() == generation => session,
            _ => {
                fatal!(target: CCM, chip_id = %self.chip_id, "Configure on a chip with no live session");
                return Err(CcmError::NotAcquired {
                    chip_id: self.chip_id,
                });
            }
        };

        let version = session.adapter.chip_version().map_err(|source| {
            fatal!(
                target: CCM,
                chip_id = %self.chip_id,
                error = %source,
                "Failed to read chip version from adapter"
            );
            CcmError::ChipVersionUnavailable {
                chip_id: self.chip_id,
                source,
            }
        })?;

        self.apply_version(session, version)?;
        Ok(version)
    }

    /// Version-ready callback body.
    fn on_version_ready(&self, generation: u64, version: ChipVersion) {
        if self.held_by_current_thread() {
            fatal!(
                target: CCM,
                chip_id = %self.chip_id,
                generation,
                version = %version,
                "Version report from inside a collaborator call on the same chip, ignored"
            );
            return;
        }

        let mut state = self.lock();
        let current = state.generation;

        match state.session.as_mut() {
            Some(session) if generation == current => {
                info!(
                    target: CCM,
                    chip_id = %self.chip_id,
                    version = %version,
                    "Chip reported ready"
                );
                // Errors are already logged at fatal severity; there is no caller to report to.
                let _ = self.apply_version(session, version);
            }
            _ => {
                warn!(
                    target: CCM,
                    chip_id = %self.chip_id,
                    generation,
                    current,
                    "Ignoring version report for a session that no longer exists"
                );
            }
        }
    }

    /// Configures the config abstraction, then the audio coordinator.
    fn apply_version(&self, session: &mut Session, version: ChipVersion) -> CcmResult<()> {
        session.config_abstraction.configure(version);

        session.audio.configure().map_err(|source| {
            fatal!(
                target: CCM,
                chip_id = %self.chip_id,
                version = %version,
                error = %source,
                "Audio coordinator rejected configuration"
            );
            CcmError::SubordinateConfigure {
                chip_id: self.chip_id,
                component: Component::AudioCoordinator,
                source,
            }
        })?;

        session.version = Some(version);
        debug!(target: CCM, chip_id = %self.chip_id, version = %version, "Chip configured");
        self.publish(SessionEvent::Configured {
            chip_id: self.chip_id,
            version,
        });
        Ok(())
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub(crate) fn adapter(&self, handle: &SessionHandle) -> CcmResult<Arc<dyn Adapter>> {
        let state = self.lock();
        let session = state.session_for(self.chip_id, handle)?;
        Ok(Arc::clone(&session.adapter))
    }

    pub(crate) fn audio_coordinator(
        &self,
        handle: &SessionHandle,
    ) -> CcmResult<Arc<dyn AudioCoordinator>> {
        let state = self.lock();
        let session = state.session_for(self.chip_id, handle)?;
        Ok(Arc::clone(&session.audio))
    }

    pub(crate) fn config_abstraction(
        &self,
        handle: &SessionHandle,
    ) -> CcmResult<Arc<dyn ConfigAbstraction>> {
        let state = self.lock();
        let session = state.session_for(self.chip_id, handle)?;
        Ok(Arc::clone(&session.config_abstraction))
    }

    pub(crate) fn owner_count(&self) -> usize {
        self.lock().owner_count
    }

    pub(crate) fn view(&self) -> ChipSessionView {
        let state = self.lock();
        let session = state.session.as_ref();
        ChipSessionView {
            chip_id: self.chip_id,
            owner_count: state.owner_count,
            owner: session.map(|s| s.owner.clone()),
            generation: state.generation,
            chip_version: session.and_then(|s| s.version),
            config_source: session.map(|s| s.config.source().clone()),
        }
    }

    // ========================================================================
    // Construction / Teardown
    // ========================================================================

    /// Builds the subordinate chain. On failure everything built so far is
    /// destroyed again and the error is returned.
    fn construct(
        self: &Arc<Self>,
        generation: u64,
        owner: &OwnerContext,
        collab: &Collaborators,
        settings: &ConfigSettings,
    ) -> CcmResult<Session> {
        let chip_id = self.chip_id;
        let path = settings.path();

        let config = match collab.config_loader.load(&path, &settings.memory_profile) {
            Ok(config) => config,
            Err(e) => {
                error!(
                    target: CCM,
                    chip_id = %chip_id,
                    path = %path.display(),
                    error = %e,
                    "Reading config file failed, continuing with defaults"
                );
                ChipConfig::default()
            }
        };

        let config_abstraction = collab.config_abstraction.create(chip_id, owner, &config);

        let adapter = match collab
            .adapter
            .create(owner, chip_id, self.version_ready_callback(generation))
        {
            Ok(adapter) => adapter,
            Err(source) => {
                fatal!(target: CCM, chip_id = %chip_id, error = %source, "Adapter creation failed");
                config_abstraction.destroy();
                return Err(CcmError::SubordinateCreate {
                    chip_id,
                    component: Component::Adapter,
                    source,
                });
            }
        };

        let audio = match collab
            .audio
            .create(chip_id, Arc::clone(&config_abstraction), &config)
        {
            Ok(audio) => audio,
            Err(source) => {
                fatal!(
                    target: CCM,
                    chip_id = %chip_id,
                    error = %source,
                    "Audio coordinator creation failed"
                );
                if let Err(e) = adapter.destroy() {
                    self.log_destroy_failure(Component::Adapter, &e);
                }
                config_abstraction.destroy();
                return Err(CcmError::SubordinateCreate {
                    chip_id,
                    component: Component::AudioCoordinator,
                    source,
                });
            }
        };

        Ok(Session {
            owner: owner.clone(),
            config,
            config_abstraction,
            adapter,
            audio,
            version: None,
        })
    }

    /// Destroys the chain in reverse creation order. Every step runs; the
    /// first failure is returned.
    fn teardown(&self, session: Session) -> CcmResult<()> {
        let mut first_failure = None;

        if let Err(e) = session.audio.destroy() {
            self.log_destroy_failure(Component::AudioCoordinator, &e);
            first_failure.get_or_insert((Component::AudioCoordinator, e));
        }
        if let Err(e) = session.adapter.destroy() {
            self.log_destroy_failure(Component::Adapter, &e);
            first_failure.get_or_insert((Component::Adapter, e));
        }
        session.config_abstraction.destroy();

        match first_failure {
            Some((component, source)) => Err(CcmError::SubordinateDestroy {
                chip_id: self.chip_id,
                component,
                source,
            }),
            None => Ok(()),
        }
    }

    fn version_ready_callback(self: &Arc<Self>, generation: u64) -> VersionReadyCallback {
        let slot: Weak<Slot> = Arc::downgrade(self);
        Arc::new(move |version| {
            if let Some(slot) = slot.upgrade() {
                slot.on_version_ready(generation, version);
            }
        })
    }

    fn log_destroy_failure(&self, component: Component, e: &CollaboratorError) {
        fatal!(
            target: CCM,
            chip_id = %self.chip_id,
            component = %component,
            error = %e,
            "Subordinate destruction failed"
        );
    }

    fn publish(&self, event: SessionEvent) {
        // No subscribers is not an error.
        let _ = self.events.send(event);
    }
}
