//! Simulated collaborators.
//!
//! [`SimBackend`] implements every collaborator contract in memory and
//! records each call in a shared [`Journal`]. Individual calls can be made to
//! fail through [`FaultPoint`]s. The `ccm simulate` command and the test
//! suites drive the registry against this backend.
//!
//! The adapter is obtained through one of two [`AdapterStrategy`]s:
//! - `Direct`: the adapter is created as is and never reports its version on
//!   its own; owners call `configure` once the chip is up
//! - `InitManager`: an initialization manager owns the adapter, performs its
//!   own class setup and fires the version-ready callback on power up

use std::borrow::Cow;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use ccm_config::{FileConfigLoader, ROOT_SECTION};
use ccm_core::diag::{CCM_CAL, CCM_IM, CCM_VAC};
use ccm_core::{
    Adapter, AdapterFactory, AudioCoordinator, AudioCoordinatorFactory, ChipConfig, ChipId,
    ChipVersion, Collaborators, CollaboratorError, Component, ConfigAbstraction,
    ConfigAbstractionFactory, ConfigError, ConfigLoader, ConfigSource, MemoryProfile,
    OwnerContext, Platform, PlatformStep, VersionReadyCallback,
};

// ============================================================================
// Journal
// ============================================================================

/// One collaborator call observed by the simulated backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SimEvent {
    PlatformInit {
        step: PlatformStep,
    },
    ClassInit {
        component: Component,
    },
    ConfigLoad {
        path: PathBuf,
    },
    Create {
        component: Component,
        chip_id: ChipId,
        /// Origin of the configuration handed to the constructor, if it takes one
        #[serde(skip_serializing_if = "Option::is_none")]
        config_source: Option<ConfigSource>,
    },
    Configure {
        component: Component,
        chip_id: ChipId,
        /// Version the component was configured with, if it knows one
        version: Option<ChipVersion>,
    },
    Destroy {
        component: Component,
        chip_id: ChipId,
    },
}

impl fmt::Display for SimEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PlatformInit { step } => write!(f, "init {step}"),
            Self::ClassInit { component } => write!(f, "class init {component}"),
            Self::ConfigLoad { path } => write!(f, "load config {}", path.display()),
            Self::Create {
                component,
                chip_id,
                config_source: Some(source),
            } => write!(f, "create {component} (chip {chip_id}) from {source}"),
            Self::Create {
                component,
                chip_id,
                config_source: None,
            } => write!(f, "create {component} (chip {chip_id})"),
            Self::Configure {
                component,
                chip_id,
                version: Some(version),
            } => write!(f, "configure {component} (chip {chip_id}) with {version}"),
            Self::Configure {
                component,
                chip_id,
                version: None,
            } => write!(f, "configure {component} (chip {chip_id})"),
            Self::Destroy { component, chip_id } => {
                write!(f, "destroy {component} (chip {chip_id})")
            }
        }
    }
}

/// Ordered, shared record of collaborator calls.
#[derive(Debug, Clone, Default)]
pub struct Journal {
    events: Arc<Mutex<Vec<SimEvent>>>,
}

impl Journal {
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&self, event: SimEvent) {
        self.events.lock().push(event);
    }

    /// Copy of every event recorded so far.
    pub fn events(&self) -> Vec<SimEvent> {
        self.events.lock().clone()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }

    /// Number of recorded events matching `pred`.
    pub fn count(&self, pred: impl Fn(&SimEvent) -> bool) -> usize {
        self.events.lock().iter().filter(|e| pred(e)).count()
    }

    /// Instances of `component` created for `chip_id` and not destroyed yet.
    pub fn live(&self, component: Component, chip_id: ChipId) -> usize {
        let events = self.events.lock();
        let created = events
            .iter()
            .filter(|e| matches!(e, SimEvent::Create { component: c, chip_id: id, .. } if *c == component && *id == chip_id))
            .count();
        let destroyed = events
            .iter()
            .filter(|e| matches!(e, SimEvent::Destroy { component: c, chip_id: id } if *c == component && *id == chip_id))
            .count();
        created.saturating_sub(destroyed)
    }
}

// ============================================================================
// Fault Injection
// ============================================================================

/// Collaborator calls that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultPoint {
    OsInit,
    FilesystemInit,
    PowerMgmtInit,
    AdapterClassInit,
    AudioClassInit,
    ConfigAbstractionClassInit,
    ConfigLoad,
    AdapterCreate,
    AudioCreate,
    AudioConfigure,
    AdapterDestroy,
    AudioDestroy,
}

impl FaultPoint {
    pub const ALL: [FaultPoint; 12] = [
        Self::OsInit,
        Self::FilesystemInit,
        Self::PowerMgmtInit,
        Self::AdapterClassInit,
        Self::AudioClassInit,
        Self::ConfigAbstractionClassInit,
        Self::ConfigLoad,
        Self::AdapterCreate,
        Self::AudioCreate,
        Self::AudioConfigure,
        Self::AdapterDestroy,
        Self::AudioDestroy,
    ];

    /// Command-line name of the fault point.
    pub fn name(self) -> &'static str {
        match self {
            Self::OsInit => "os-init",
            Self::FilesystemInit => "fs-init",
            Self::PowerMgmtInit => "pm-init",
            Self::AdapterClassInit => "adapter-class-init",
            Self::AudioClassInit => "audio-class-init",
            Self::ConfigAbstractionClassInit => "cal-class-init",
            Self::ConfigLoad => "config-load",
            Self::AdapterCreate => "adapter-create",
            Self::AudioCreate => "audio-create",
            Self::AudioConfigure => "audio-configure",
            Self::AdapterDestroy => "adapter-destroy",
            Self::AudioDestroy => "audio-destroy",
        }
    }
}

impl fmt::Display for FaultPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown {kind} '{value}'")]
pub struct ParseSimError {
    kind: &'static str,
    value: String,
}

impl FromStr for FaultPoint {
    type Err = ParseSimError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|p| p.name() == s)
            .ok_or_else(|| ParseSimError {
                kind: "fault point",
                value: s.to_string(),
            })
    }
}

#[derive(Debug, Default)]
struct Faults {
    armed: Mutex<HashSet<FaultPoint>>,
}

impl Faults {
    fn check(&self, point: FaultPoint) -> Result<(), CollaboratorError> {
        if self.armed.lock().contains(&point) {
            Err(CollaboratorError::with_status(
                format!("injected fault at {point}"),
                -1,
            ))
        } else {
            Ok(())
        }
    }
}

// ============================================================================
// Adapter Strategy
// ============================================================================

/// How the simulated backend provides the adapter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum AdapterStrategy {
    /// Adapter created directly; the version callback is never fired.
    Direct,
    /// Adapter owned by an initialization manager that reports power up.
    #[default]
    InitManager,
}

impl fmt::Display for AdapterStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Direct => write!(f, "direct"),
            Self::InitManager => write!(f, "init-manager"),
        }
    }
}

impl FromStr for AdapterStrategy {
    type Err = ParseSimError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "direct" => Ok(Self::Direct),
            "init-manager" | "im" => Ok(Self::InitManager),
            _ => Err(ParseSimError {
                kind: "adapter strategy",
                value: s.to_string(),
            }),
        }
    }
}

// ============================================================================
// Simulated Instances
// ============================================================================

/// Simulated chip adapter.
pub struct SimAdapter {
    chip_id: ChipId,
    journal: Journal,
    faults: Arc<Faults>,
    version: Mutex<Option<ChipVersion>>,
    on_version_ready: Option<VersionReadyCallback>,
}

impl SimAdapter {
    /// Makes `version` readable and, under `InitManager`, fires the
    /// version-ready callback. Returns true if the callback fired.
    pub fn report_version(&self, version: ChipVersion) -> bool {
        *self.version.lock() = Some(version);
        debug!(target: CCM_IM, chip_id = %self.chip_id, version = %version, "Chip powered up");

        // No lock may be held here; the callback takes the slot lock.
        match &self.on_version_ready {
            Some(callback) => {
                callback(version);
                true
            }
            None => false,
        }
    }
}

impl Adapter for SimAdapter {
    fn chip_version(&self) -> Result<ChipVersion, CollaboratorError> {
        (*self.version.lock())
            .ok_or_else(|| CollaboratorError::new("chip has not reported its version"))
    }

    fn destroy(&self) -> Result<(), CollaboratorError> {
        self.journal.record(SimEvent::Destroy {
            component: Component::Adapter,
            chip_id: self.chip_id,
        });
        self.faults.check(FaultPoint::AdapterDestroy)
    }
}

/// Simulated configuration abstraction; remembers the last version applied.
pub struct SimConfigAbstraction {
    chip_id: ChipId,
    journal: Journal,
    version: Mutex<Option<ChipVersion>>,
}

impl SimConfigAbstraction {
    pub fn version(&self) -> Option<ChipVersion> {
        *self.version.lock()
    }
}

impl ConfigAbstraction for SimConfigAbstraction {
    fn configure(&self, version: ChipVersion) {
        debug!(target: CCM_CAL, chip_id = %self.chip_id, version = %version, "Applying chip version");
        *self.version.lock() = Some(version);
        self.journal.record(SimEvent::Configure {
            component: Component::ConfigAbstraction,
            chip_id: self.chip_id,
            version: Some(version),
        });
    }

    fn destroy(&self) {
        self.journal.record(SimEvent::Destroy {
            component: Component::ConfigAbstraction,
            chip_id: self.chip_id,
        });
    }
}

/// Simulated audio coordinator; reads the version back from its
/// configuration abstraction when configured.
pub struct SimAudioCoordinator {
    chip_id: ChipId,
    journal: Journal,
    faults: Arc<Faults>,
    /// Handle passed in at creation.
    config_abstraction: Arc<dyn ConfigAbstraction>,
    /// The same handle, if it is one this backend created for `chip_id`.
    sim_config_abstraction: Option<Arc<SimConfigAbstraction>>,
}

impl SimAudioCoordinator {
    /// Whether this coordinator was created with `cal`.
    pub fn uses_config_abstraction<C: ConfigAbstraction + ?Sized>(&self, cal: &Arc<C>) -> bool {
        same_instance(&self.config_abstraction, cal)
    }
}

/// Compares object addresses, ignoring trait-object metadata.
fn same_instance<A: ?Sized, B: ?Sized>(a: &Arc<A>, b: &Arc<B>) -> bool {
    Arc::as_ptr(a).cast::<()>() == Arc::as_ptr(b).cast::<()>()
}

impl AudioCoordinator for SimAudioCoordinator {
    fn configure(&self) -> Result<(), CollaboratorError> {
        self.faults.check(FaultPoint::AudioConfigure)?;
        let version = self
            .sim_config_abstraction
            .as_ref()
            .and_then(|cal| cal.version());
        debug!(target: CCM_VAC, chip_id = %self.chip_id, "Re-reading chip parameters");
        self.journal.record(SimEvent::Configure {
            component: Component::AudioCoordinator,
            chip_id: self.chip_id,
            version,
        });
        Ok(())
    }

    fn destroy(&self) -> Result<(), CollaboratorError> {
        self.journal.record(SimEvent::Destroy {
            component: Component::AudioCoordinator,
            chip_id: self.chip_id,
        });
        self.faults.check(FaultPoint::AudioDestroy)
    }
}

// ============================================================================
// Backend
// ============================================================================

/// In-memory implementation of every collaborator contract.
pub struct SimBackend {
    strategy: AdapterStrategy,
    journal: Journal,
    faults: Arc<Faults>,
    loader: Arc<dyn ConfigLoader>,
    adapters: Mutex<HashMap<ChipId, Arc<SimAdapter>>>,
    config_abstractions: Mutex<HashMap<ChipId, Arc<SimConfigAbstraction>>>,
    audio_coordinators: Mutex<HashMap<ChipId, Arc<SimAudioCoordinator>>>,
}

impl fmt::Debug for SimBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimBackend")
            .field("strategy", &self.strategy)
            .field("journal", &self.journal.len())
            .finish_non_exhaustive()
    }
}

impl SimBackend {
    /// Creates a backend whose configuration loader reads files from disk.
    pub fn new(strategy: AdapterStrategy) -> Arc<Self> {
        Self::with_loader(strategy, Arc::new(FileConfigLoader::new()))
    }

    /// Creates a backend that delegates configuration loading to `loader`.
    pub fn with_loader(strategy: AdapterStrategy, loader: Arc<dyn ConfigLoader>) -> Arc<Self> {
        Arc::new(Self {
            strategy,
            journal: Journal::new(),
            faults: Arc::new(Faults::default()),
            loader,
            adapters: Mutex::new(HashMap::new()),
            config_abstractions: Mutex::new(HashMap::new()),
            audio_coordinators: Mutex::new(HashMap::new()),
        })
    }

    /// Bundles this backend as the registry's collaborators.
    pub fn collaborators(self: &Arc<Self>) -> Collaborators {
        Collaborators {
            platform: self.clone(),
            config_loader: self.clone(),
            config_abstraction: self.clone(),
            adapter: self.clone(),
            audio: self.clone(),
        }
    }

    pub fn strategy(&self) -> AdapterStrategy {
        self.strategy
    }

    pub fn journal(&self) -> &Journal {
        &self.journal
    }

    /// Makes every later call at `point` fail.
    pub fn inject(&self, point: FaultPoint) {
        self.faults.armed.lock().insert(point);
    }

    pub fn clear(&self, point: FaultPoint) {
        self.faults.armed.lock().remove(&point);
    }

    /// Most recently created adapter of `chip_id`.
    pub fn adapter(&self, chip_id: ChipId) -> Option<Arc<SimAdapter>> {
        self.adapters.lock().get(&chip_id).cloned()
    }

    /// Most recently created configuration abstraction of `chip_id`.
    pub fn config_abstraction(&self, chip_id: ChipId) -> Option<Arc<SimConfigAbstraction>> {
        self.config_abstractions.lock().get(&chip_id).cloned()
    }

    /// Most recently created audio coordinator of `chip_id`.
    pub fn audio_coordinator(&self, chip_id: ChipId) -> Option<Arc<SimAudioCoordinator>> {
        self.audio_coordinators.lock().get(&chip_id).cloned()
    }

    /// Simulates the chip powering up and reporting `version`.
    ///
    /// Returns false if `chip_id` has no adapter; see
    /// [`SimAdapter::report_version`] otherwise.
    pub fn power_up(&self, chip_id: ChipId, version: ChipVersion) -> bool {
        match self.adapter(chip_id) {
            Some(adapter) => adapter.report_version(version),
            None => false,
        }
    }
}

impl Platform for SimBackend {
    fn os_init(&self) -> Result<(), CollaboratorError> {
        self.journal.record(SimEvent::PlatformInit {
            step: PlatformStep::Os,
        });
        self.faults.check(FaultPoint::OsInit)
    }

    fn filesystem_init(&self) -> Result<(), CollaboratorError> {
        self.journal.record(SimEvent::PlatformInit {
            step: PlatformStep::Filesystem,
        });
        self.faults.check(FaultPoint::FilesystemInit)
    }

    fn power_mgmt_init(&self) -> Result<(), CollaboratorError> {
        self.journal.record(SimEvent::PlatformInit {
            step: PlatformStep::PowerManagement,
        });
        self.faults.check(FaultPoint::PowerMgmtInit)
    }
}

impl ConfigLoader for SimBackend {
    fn load(&self, path: &Path, profile: &MemoryProfile) -> Result<ChipConfig, ConfigError> {
        self.journal.record(SimEvent::ConfigLoad {
            path: path.to_path_buf(),
        });
        if self.faults.check(FaultPoint::ConfigLoad).is_err() {
            return Err(ConfigError::Unavailable {
                path: path.to_path_buf(),
            });
        }
        self.loader.load(path, profile)
    }
}

impl ConfigAbstractionFactory for SimBackend {
    fn class_init(&self) -> Result<(), CollaboratorError> {
        self.journal.record(SimEvent::ClassInit {
            component: Component::ConfigAbstraction,
        });
        self.faults.check(FaultPoint::ConfigAbstractionClassInit)
    }

    fn create(
        &self,
        chip_id: ChipId,
        owner: &OwnerContext,
        config: &ChipConfig,
    ) -> Arc<dyn ConfigAbstraction> {
        debug!(
            target: CCM_CAL,
            chip_id = %chip_id,
            owner = %owner,
            source = %config.source(),
            "Creating config abstraction"
        );
        self.journal.record(SimEvent::Create {
            component: Component::ConfigAbstraction,
            chip_id,
            config_source: Some(config.source().clone()),
        });
        let cal = Arc::new(SimConfigAbstraction {
            chip_id,
            journal: self.journal.clone(),
            version: Mutex::new(None),
        });
        self.config_abstractions.lock().insert(chip_id, cal.clone());
        cal
    }
}

impl AdapterFactory for SimBackend {
    fn class_init(&self) -> Result<(), CollaboratorError> {
        match self.strategy {
            AdapterStrategy::Direct => Ok(()),
            AdapterStrategy::InitManager => {
                self.journal.record(SimEvent::ClassInit {
                    component: Component::Adapter,
                });
                self.faults.check(FaultPoint::AdapterClassInit)
            }
        }
    }

    fn create(
        &self,
        owner: &OwnerContext,
        chip_id: ChipId,
        on_version_ready: VersionReadyCallback,
    ) -> Result<Arc<dyn Adapter>, CollaboratorError> {
        self.faults.check(FaultPoint::AdapterCreate)?;
        debug!(
            target: CCM_IM,
            chip_id = %chip_id,
            owner = %owner,
            strategy = %self.strategy,
            "Creating adapter"
        );
        self.journal.record(SimEvent::Create {
            component: Component::Adapter,
            chip_id,
            config_source: None,
        });

        let on_version_ready = match self.strategy {
            AdapterStrategy::Direct => None,
            AdapterStrategy::InitManager => Some(on_version_ready),
        };
        let adapter = Arc::new(SimAdapter {
            chip_id,
            journal: self.journal.clone(),
            faults: self.faults.clone(),
            version: Mutex::new(None),
            on_version_ready,
        });
        self.adapters.lock().insert(chip_id, adapter.clone());
        Ok(adapter)
    }
}

impl AudioCoordinatorFactory for SimBackend {
    fn class_init(&self) -> Result<(), CollaboratorError> {
        self.journal.record(SimEvent::ClassInit {
            component: Component::AudioCoordinator,
        });
        self.faults.check(FaultPoint::AudioClassInit)
    }

    fn create(
        &self,
        chip_id: ChipId,
        config_abstraction: Arc<dyn ConfigAbstraction>,
        config: &ChipConfig,
    ) -> Result<Arc<dyn AudioCoordinator>, CollaboratorError> {
        self.faults.check(FaultPoint::AudioCreate)?;
        let audio_interface = config
            .get_str(ROOT_SECTION, "audio_interface")
            .unwrap_or(Cow::Borrowed("none"));
        debug!(
            target: CCM_VAC,
            chip_id = %chip_id,
            audio_interface = %audio_interface,
            "Creating audio coordinator"
        );
        self.journal.record(SimEvent::Create {
            component: Component::AudioCoordinator,
            chip_id,
            config_source: Some(config.source().clone()),
        });
        let sim_config_abstraction = self
            .config_abstraction(chip_id)
            .filter(|cal| same_instance(cal, &config_abstraction));
        let audio = Arc::new(SimAudioCoordinator {
            chip_id,
            journal: self.journal.clone(),
            faults: self.faults.clone(),
            config_abstraction,
            sim_config_abstraction,
        });
        self.audio_coordinators.lock().insert(chip_id, audio.clone());
        Ok(audio)
    }
}
