//! One-time, process-wide initialization.
//!
//! The body brings up the platform services and the class-level state of
//! every subordinate manager. It runs at most once per [`InitLatch`]; its
//! outcome (success or failure) is remembered and never retried.

use parking_lot::Mutex;
use tracing::{debug, info};

use ccm_core::diag::{CCM, HAL_FS, HAL_OS, HAL_PM};
use ccm_core::{fatal, CcmError, CcmResult, Collaborators, CollaboratorError, Component, PlatformStep};

#[derive(Debug, Clone)]
enum LatchState {
    Pending,
    Ready,
    Failed(CcmError),
}

/// Guard ensuring the initialization body runs exactly once.
///
/// Concurrent callers block on the latch until the first caller's body has
/// finished, then observe its outcome.
#[derive(Debug)]
pub struct InitLatch {
    state: Mutex<LatchState>,
}

impl Default for InitLatch {
    fn default() -> Self {
        Self::new()
    }
}

impl InitLatch {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(LatchState::Pending),
        }
    }

    /// Returns true once the body has completed successfully.
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        matches!(*self.state.lock(), LatchState::Ready)
    }

    /// Runs `body` if no earlier call has.
    ///
    /// # Errors
    ///
    /// - The body's own error on the call that runs it
    /// - `CcmError::InitFailed` on every later call after a failed body
    pub fn run_once<F>(&self, body: F) -> CcmResult<()>
    where
        F: FnOnce() -> CcmResult<()>,
    {
        let mut state = self.state.lock();
        match &*state {
            LatchState::Ready => {
                info!(target: CCM, "Already initialized, exiting successfully");
                Ok(())
            }
            LatchState::Failed(first) => {
                fatal!(target: CCM, error = %first, "One-time initialization failed earlier");
                Err(CcmError::InitFailed)
            }
            LatchState::Pending => {
                let result = body();
                *state = match &result {
                    Ok(()) => LatchState::Ready,
                    Err(e) => LatchState::Failed(e.clone()),
                };
                result
            }
        }
    }
}

/// Brings up platform services and subordinate class state, in order.
pub(crate) fn initialize(collab: &Collaborators) -> CcmResult<()> {
    info!(target: CCM, "Running one-time initialization");

    platform_step(PlatformStep::Os, HAL_OS, || collab.platform.os_init())?;
    platform_step(PlatformStep::Filesystem, HAL_FS, || collab.platform.filesystem_init())?;
    platform_step(PlatformStep::PowerManagement, HAL_PM, || {
        collab.platform.power_mgmt_init()
    })?;

    class_step(Component::Adapter, || collab.adapter.class_init())?;
    class_step(Component::AudioCoordinator, || collab.audio.class_init())?;
    class_step(Component::ConfigAbstraction, || {
        collab.config_abstraction.class_init()
    })?;

    info!(target: CCM, "One-time initialization complete");
    Ok(())
}

fn platform_step(
    step: PlatformStep,
    target: &'static str,
    f: impl FnOnce() -> Result<(), CollaboratorError>,
) -> CcmResult<()> {
    f().map_err(|source| {
        fatal!(target: CCM, step = %step, hal = target, error = %source, "Platform initialization failed");
        CcmError::PlatformInit { step, source }
    })?;
    debug!(target: CCM, step = %step, "Platform service initialized");
    Ok(())
}

fn class_step(
    component: Component,
    f: impl FnOnce() -> Result<(), CollaboratorError>,
) -> CcmResult<()> {
    f().map_err(|source| {
        fatal!(target: CCM, component = %component, error = %source, "Class initialization failed");
        CcmError::ClassInit { component, source }
    })
}
