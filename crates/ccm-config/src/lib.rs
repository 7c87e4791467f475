//! Chip configuration loading.
//!
//! This crate implements the [`ConfigLoader`](ccm_core::ConfigLoader)
//! contract for a TOML configuration file:
//! - `settings` - where the file lives and which memory profile backs it
//! - `loader` - reading the file, falling back to the memory profile
//! - `parse` - turning TOML text into a [`ChipConfig`](ccm_core::ChipConfig)

pub mod loader;
pub mod parse;
pub mod settings;

pub use loader::FileConfigLoader;
pub use parse::{parse_config, ROOT_SECTION};
pub use settings::{config_path, ConfigSettings, CONFIG_DIR_ENV, CONFIG_FILE_NAME, DEFAULT_CONFIG_DIR};
