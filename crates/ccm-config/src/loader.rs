//! File-backed [`ConfigLoader`].

use std::fs;
use std::io;
use std::path::Path;

use ccm_core::diag::CCM_CONFIG;
use ccm_core::{ChipConfig, ConfigError, ConfigLoader, ConfigSource, MemoryProfile};
use tracing::{debug, info, warn};

use crate::parse::parse_config;

/// Reads the configuration file from disk.
///
/// If the file cannot be read, the memory profile is parsed instead and the
/// resulting configuration is tagged [`ConfigSource::MemoryProfile`]. A file
/// that exists but fails to parse is an error; the memory profile is not
/// consulted in that case.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileConfigLoader;

impl FileConfigLoader {
    pub fn new() -> Self {
        Self
    }
}

impl ConfigLoader for FileConfigLoader {
    fn load(&self, path: &Path, profile: &MemoryProfile) -> Result<ChipConfig, ConfigError> {
        match fs::read_to_string(path) {
            Ok(text) => {
                let config = parse_config(
                    &text,
                    &path.display().to_string(),
                    ConfigSource::File(path.to_path_buf()),
                )?;
                info!(
                    target: CCM_CONFIG,
                    path = %path.display(),
                    sections = config.section_names().count(),
                    "Loaded chip configuration"
                );
                Ok(config)
            }
            Err(e) => {
                if profile.is_empty() {
                    return Err(read_error(path, &e));
                }
                warn!(
                    target: CCM_CONFIG,
                    path = %path.display(),
                    error = %e,
                    "Configuration file unreadable, using memory profile"
                );
                let config =
                    parse_config(profile.as_str(), "memory profile", ConfigSource::MemoryProfile)?;
                debug!(
                    target: CCM_CONFIG,
                    sections = config.section_names().count(),
                    "Parsed memory profile"
                );
                Ok(config)
            }
        }
    }
}

fn read_error(path: &Path, e: &io::Error) -> ConfigError {
    if e.kind() == io::ErrorKind::NotFound {
        ConfigError::Unavailable {
            path: path.to_path_buf(),
        }
    } else {
        ConfigError::Io {
            path: path.to_path_buf(),
            reason: e.to_string(),
        }
    }
}
