//! CCM Core - Shared types for the combo-chip session manager
//!
//! This crate provides the domain types, error types and collaborator
//! contracts shared between the configuration loader (`ccm-config`), the
//! session registry (`ccm-session`) and the `ccm` command-line tool.
//!
//! All code follows the panic-free policy: no `.unwrap()`, `.expect()`,
//! `panic!()`, `unreachable!()`, `todo!()`, or direct indexing `[i]`.

pub mod chip;
pub mod collab;
pub mod config;
pub mod diag;
pub mod error;

// Re-exports for convenience
pub use chip::{ChipId, ChipVersion, OwnerContext, MAX_CHIPS};
pub use collab::{
    Adapter, AdapterFactory, AudioCoordinator, AudioCoordinatorFactory, Collaborators,
    ConfigAbstraction, ConfigAbstractionFactory, ConfigLoader, Platform, VersionReadyCallback,
};
pub use config::{ChipConfig, ConfigSource, ConfigValue, MemoryProfile};
pub use diag::{LogModule, ModuleMaskFilter, ModuleMasks, Severity, SeverityMask};
pub use error::{
    CcmError, CcmResult, CollaboratorError, Component, ConfigError, ErrorClass, PlatformStep,
};
