//! Parsed chip configuration.
//!
//! The configuration file grammar belongs to the loader (`ccm-config`); this
//! module only defines the parsed, grammar-independent representation that is
//! handed to subordinate creation calls.

use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

/// A single configuration value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConfigValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<ConfigValue>),
}

impl fmt::Display for ConfigValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(x) => write!(f, "{x}"),
            Self::Str(s) => write!(f, "{s}"),
            Self::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
        }
    }
}

/// Where a configuration came from.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", content = "path", rename_all = "snake_case")]
pub enum ConfigSource {
    /// Parsed from a file on disk.
    File(PathBuf),
    /// Parsed from the built-in memory profile because the file was unreadable.
    MemoryProfile,
    /// Built-in defaults; nothing could be loaded.
    #[default]
    Default,
}

impl fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::File(path) => write!(f, "file {}", path.display()),
            Self::MemoryProfile => write!(f, "memory profile"),
            Self::Default => write!(f, "defaults"),
        }
    }
}

/// Parsed configuration: named sections of key/value pairs.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ChipConfig {
    sections: BTreeMap<String, BTreeMap<String, ConfigValue>>,
    source: ConfigSource,
}

impl ChipConfig {
    /// Creates an empty configuration tagged with its source.
    pub fn new(source: ConfigSource) -> Self {
        Self {
            sections: BTreeMap::new(),
            source,
        }
    }

    pub fn source(&self) -> &ConfigSource {
        &self.source
    }

    /// Returns true if no section holds any key.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sections.values().all(BTreeMap::is_empty)
    }

    /// Inserts (or replaces) a value, creating the section if needed.
    pub fn insert(
        &mut self,
        section: impl Into<String>,
        key: impl Into<String>,
        value: ConfigValue,
    ) -> Option<ConfigValue> {
        self.sections
            .entry(section.into())
            .or_default()
            .insert(key.into(), value)
    }

    pub fn get(&self, section: &str, key: &str) -> Option<&ConfigValue> {
        self.sections.get(section)?.get(key)
    }

    /// Returns a string value. Numbers and booleans are rendered as text.
    pub fn get_str(&self, section: &str, key: &str) -> Option<Cow<'_, str>> {
        match self.get(section, key)? {
            ConfigValue::Str(s) => Some(Cow::Borrowed(s.as_str())),
            ConfigValue::List(_) => None,
            other => Some(Cow::Owned(other.to_string())),
        }
    }

    /// Returns an integer value. Decimal and `0x` strings are accepted.
    pub fn get_int(&self, section: &str, key: &str) -> Option<i64> {
        match self.get(section, key)? {
            ConfigValue::Int(i) => Some(*i),
            ConfigValue::Str(s) => parse_int(s),
            _ => None,
        }
    }

    pub fn get_bool(&self, section: &str, key: &str) -> Option<bool> {
        match self.get(section, key)? {
            ConfigValue::Bool(b) => Some(*b),
            ConfigValue::Int(i) => Some(*i != 0),
            ConfigValue::Str(s) => match s.to_ascii_lowercase().as_str() {
                "true" | "yes" | "on" | "1" => Some(true),
                "false" | "no" | "off" | "0" => Some(false),
                _ => None,
            },
            _ => None,
        }
    }

    /// Iterates over section names in sorted order.
    pub fn section_names(&self) -> impl Iterator<Item = &str> {
        self.sections.keys().map(String::as_str)
    }

    pub fn section(&self, name: &str) -> Option<&BTreeMap<String, ConfigValue>> {
        self.sections.get(name)
    }
}

fn parse_int(s: &str) -> Option<i64> {
    let s = s.trim();
    match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => i64::from_str_radix(hex, 16).ok(),
        None => s.parse().ok(),
    }
}

// ============================================================================
// Memory Profile
// ============================================================================

/// Built-in configuration text used when the configuration file is unreadable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryProfile(Cow<'static, str>);

impl MemoryProfile {
    /// Default profile: a single audio path routed over PCM with FM and voice
    /// resources enabled.
    pub const DEFAULT: MemoryProfile = MemoryProfile(Cow::Borrowed(
        "[general]\n\
         audio_interface = \"pcm\"\n\
         \n\
         [resources]\n\
         fm_rx = true\n\
         fm_tx = false\n\
         voice = true\n",
    ));

    /// A profile with no content; loaders treat it as "no fallback".
    pub const EMPTY: MemoryProfile = MemoryProfile(Cow::Borrowed(""));

    pub fn new(text: impl Into<Cow<'static, str>>) -> Self {
        Self(text.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl Default for MemoryProfile {
    fn default() -> Self {
        Self::DEFAULT
    }
}
