//! Contracts of the external collaborators driven by the session registry.
//!
//! The registry never implements bring-up, audio arbitration or chip
//! parameterization itself. It only calls these traits, in a fixed order,
//! and owns the resulting instances for the lifetime of a chip session.
//!
//! # Creation and teardown order
//!
//! ```text
//! acquire:  ConfigLoader::load ─▶ ConfigAbstractionFactory::create
//!                              ─▶ AdapterFactory::create
//!                              ─▶ AudioCoordinatorFactory::create
//!
//! release:  AudioCoordinator::destroy ─▶ Adapter::destroy
//!                                     ─▶ ConfigAbstraction::destroy
//! ```
//!
//! Instances are shared as `Arc<dyn ...>` because the audio coordinator keeps
//! a reference to the configuration abstraction. Teardown is explicit through
//! `destroy`; dropping the last `Arc` only frees memory.

use std::path::Path;
use std::sync::Arc;

use crate::chip::{ChipId, ChipVersion, OwnerContext};
use crate::config::{ChipConfig, MemoryProfile};
use crate::error::{CollaboratorError, ConfigError};

/// Callback invoked by the adapter once the chip has powered up and reported
/// its version.
///
/// Must not be called synchronously from any `Adapter` or `AdapterFactory`
/// method; the registry holds the chip's slot lock while it calls them. Such a
/// re-entrant call is logged at fatal severity and the report is dropped.
/// Calls from other threads are always accepted.
pub type VersionReadyCallback = Arc<dyn Fn(ChipVersion) + Send + Sync>;

// ============================================================================
// Platform
// ============================================================================

/// OS, filesystem and power-management services.
pub trait Platform: Send + Sync {
    fn os_init(&self) -> Result<(), CollaboratorError>;

    fn filesystem_init(&self) -> Result<(), CollaboratorError>;

    fn power_mgmt_init(&self) -> Result<(), CollaboratorError>;
}

// ============================================================================
// Configuration
// ============================================================================

/// Loads and parses the chip configuration file.
pub trait ConfigLoader: Send + Sync {
    /// Loads `path`, using `profile` as the fallback content if the file is
    /// unreadable.
    fn load(&self, path: &Path, profile: &MemoryProfile) -> Result<ChipConfig, ConfigError>;
}

// ============================================================================
// Configuration Abstraction Layer
// ============================================================================

/// Translates chip-version-specific parameters into concrete settings.
pub trait ConfigAbstraction: Send + Sync {
    /// Applies the chip version. Cannot fail; internal defaults apply.
    fn configure(&self, version: ChipVersion);

    fn destroy(&self);
}

pub trait ConfigAbstractionFactory: Send + Sync {
    /// One-time class initialization.
    fn class_init(&self) -> Result<(), CollaboratorError> {
        Ok(())
    }

    /// Creates the per-chip instance. Cannot fail.
    fn create(
        &self,
        chip_id: ChipId,
        owner: &OwnerContext,
        config: &ChipConfig,
    ) -> Arc<dyn ConfigAbstraction>;
}

// ============================================================================
// Adapter / Initialization Manager
// ============================================================================

/// Low-level chip bring-up; the source of the chip version.
///
/// Implementations fire the [`VersionReadyCallback`] from their own context,
/// never from within `chip_version` or `destroy`.
pub trait Adapter: Send + Sync {
    /// Returns the chip version, or an error if the chip has not reported it.
    fn chip_version(&self) -> Result<ChipVersion, CollaboratorError>;

    fn destroy(&self) -> Result<(), CollaboratorError>;
}

/// Strategy for obtaining the adapter of a chip.
///
/// Deployments either create the adapter directly or obtain it through an
/// initialization manager that watches the chip power state and fires the
/// version-ready callback. Both are expressed as implementations of this
/// trait.
pub trait AdapterFactory: Send + Sync {
    /// One-time class initialization.
    fn class_init(&self) -> Result<(), CollaboratorError> {
        Ok(())
    }

    fn create(
        &self,
        owner: &OwnerContext,
        chip_id: ChipId,
        on_version_ready: VersionReadyCallback,
    ) -> Result<Arc<dyn Adapter>, CollaboratorError>;
}

// ============================================================================
// Audio / Voice Coordinator
// ============================================================================

/// Arbitrates the shared audio paths of the chip.
pub trait AudioCoordinator: Send + Sync {
    /// Re-reads the configuration abstraction after a version change.
    fn configure(&self) -> Result<(), CollaboratorError>;

    fn destroy(&self) -> Result<(), CollaboratorError>;
}

pub trait AudioCoordinatorFactory: Send + Sync {
    /// One-time class initialization.
    fn class_init(&self) -> Result<(), CollaboratorError> {
        Ok(())
    }

    fn create(
        &self,
        chip_id: ChipId,
        config_abstraction: Arc<dyn ConfigAbstraction>,
        config: &ChipConfig,
    ) -> Result<Arc<dyn AudioCoordinator>, CollaboratorError>;
}

// ============================================================================
// Bundle
// ============================================================================

/// Every collaborator the registry needs, injected at construction.
#[derive(Clone)]
pub struct Collaborators {
    pub platform: Arc<dyn Platform>,
    pub config_loader: Arc<dyn ConfigLoader>,
    pub config_abstraction: Arc<dyn ConfigAbstractionFactory>,
    pub adapter: Arc<dyn AdapterFactory>,
    pub audio: Arc<dyn AudioCoordinatorFactory>,
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators").finish_non_exhaustive()
    }
}
