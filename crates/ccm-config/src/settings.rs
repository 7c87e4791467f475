//! Location of the chip configuration file.

use std::env;
use std::path::{Path, PathBuf};

use ccm_core::MemoryProfile;

/// Directory searched when nothing else is configured.
pub const DEFAULT_CONFIG_DIR: &str = "/etc/ccm/";

/// Name of the configuration file inside the configuration directory.
pub const CONFIG_FILE_NAME: &str = "vac_config.toml";

/// Environment variable overriding the configuration directory.
pub const CONFIG_DIR_ENV: &str = "CCM_CONFIG_DIR";

/// Joins the configuration directory and file name.
pub fn config_path(dir: impl AsRef<Path>, file_name: &str) -> PathBuf {
    dir.as_ref().join(file_name)
}

/// Where the configuration is read from and what backs it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigSettings {
    pub dir: PathBuf,
    pub file_name: String,
    pub memory_profile: MemoryProfile,
}

impl Default for ConfigSettings {
    fn default() -> Self {
        Self {
            dir: PathBuf::from(DEFAULT_CONFIG_DIR),
            file_name: CONFIG_FILE_NAME.to_string(),
            memory_profile: MemoryProfile::DEFAULT,
        }
    }
}

impl ConfigSettings {
    /// Settings for a specific directory with the default file name.
    pub fn in_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            ..Self::default()
        }
    }

    /// Default settings with the directory taken from `CCM_CONFIG_DIR` if set.
    pub fn from_env() -> Self {
        match env::var(CONFIG_DIR_ENV) {
            Ok(dir) if !dir.trim().is_empty() => Self::in_dir(dir),
            _ => Self::default(),
        }
    }

    #[must_use]
    pub fn with_memory_profile(mut self, profile: MemoryProfile) -> Self {
        self.memory_profile = profile;
        self
    }

    /// Full path of the configuration file.
    pub fn path(&self) -> PathBuf {
        config_path(&self.dir, &self.file_name)
    }
}
