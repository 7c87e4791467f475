//! Per-module severity masks for diagnostics.
//!
//! Every log event is keyed by a module target (one of the constants below)
//! and a severity. A module's [`SeverityMask`] decides which severities are
//! emitted; [`ModuleMaskFilter`] applies the masks as a per-layer
//! `tracing_subscriber` filter.
//!
//! Severities map onto `tracing` levels:
//!
//! | Severity | Level | Flag |
//! |----------|-------|------|
//! | Fatal    | ERROR with a `fatal` field | `0x01` |
//! | Error    | ERROR, WARN | `0x02` |
//! | Info     | INFO  | `0x04` |
//! | Debug    | DEBUG | `0x08` |
//! | Function | TRACE | `0x10` |
//!
//! Fatal events are emitted with the [`fatal!`](crate::fatal) macro.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use parking_lot::RwLock;
use thiserror::Error;
use tracing::subscriber::Interest;
use tracing::{Level, Metadata};
use tracing_subscriber::layer::{Context, Filter};

#[doc(hidden)]
pub use tracing as __tracing;

// ============================================================================
// Module Targets
// ============================================================================

/// Session registry.
pub const CCM: &str = "ccm";
/// Adapter / initialization manager.
pub const CCM_IM: &str = "ccm_im";
/// Audio / voice coordinator.
pub const CCM_VAC: &str = "ccm_vac";
/// Configuration abstraction layer.
pub const CCM_CAL: &str = "ccm_cal";
/// Configuration file loader.
pub const CCM_CONFIG: &str = "ccm_config";
pub const HAL_OS: &str = "hal_os";
pub const HAL_FS: &str = "hal_fs";
pub const HAL_PM: &str = "hal_pm";

/// Emits an ERROR event tagged as fatal.
///
/// ```ignore
/// ccm_core::fatal!(target: ccm_core::diag::CCM, chip_id = %id, "adapter creation failed");
/// ```
#[macro_export]
macro_rules! fatal {
    (target: $target:expr, $($arg:tt)+) => {
        $crate::diag::__tracing::error!(target: $target, fatal = true, $($arg)+)
    };
}

/// Modules that carry their own severity mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogModule {
    /// Any target not listed below.
    Unknown,
    Ccm,
    CcmIm,
    CcmVac,
    CcmCal,
    CcmConfig,
    HalOs,
    HalFs,
    HalPm,
}

impl LogModule {
    pub const COUNT: usize = 9;

    pub const ALL: [LogModule; Self::COUNT] = [
        Self::Unknown,
        Self::Ccm,
        Self::CcmIm,
        Self::CcmVac,
        Self::CcmCal,
        Self::CcmConfig,
        Self::HalOs,
        Self::HalFs,
        Self::HalPm,
    ];

    /// Target string used in `tracing` events for this module.
    pub const fn target(self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Ccm => CCM,
            Self::CcmIm => CCM_IM,
            Self::CcmVac => CCM_VAC,
            Self::CcmCal => CCM_CAL,
            Self::CcmConfig => CCM_CONFIG,
            Self::HalOs => HAL_OS,
            Self::HalFs => HAL_FS,
            Self::HalPm => HAL_PM,
        }
    }

    /// Resolves an event target. Unlisted targets map to `Unknown`.
    pub fn from_target(target: &str) -> Self {
        Self::ALL
            .into_iter()
            .find(|m| *m != Self::Unknown && m.target() == target)
            .unwrap_or(Self::Unknown)
    }

    const fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for LogModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.target())
    }
}

// ============================================================================
// Severity
// ============================================================================

/// Log severity, from most to least important.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    Fatal = 6,
    Error = 7,
    Info = 8,
    Debug = 9,
    Function = 10,
}

impl Severity {
    /// Bit of this severity inside a [`SeverityMask`].
    pub const fn flag(self) -> u8 {
        1 << (self as u8 - Severity::Fatal as u8)
    }

    /// Classifies a `tracing` event.
    pub fn from_level(level: Level, fatal: bool) -> Self {
        match level {
            Level::ERROR if fatal => Self::Fatal,
            Level::ERROR | Level::WARN => Self::Error,
            Level::INFO => Self::Info,
            Level::DEBUG => Self::Debug,
            _ => Self::Function,
        }
    }
}

/// Set of severities a module emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SeverityMask(u8);

impl SeverityMask {
    /// Every severity.
    pub const ALL: SeverityMask = SeverityMask(0x1F);
    pub const NONE: SeverityMask = SeverityMask(0);
    /// Fatal and error only.
    pub const ERRORS: SeverityMask = SeverityMask(0x03);

    pub const fn from_bits(bits: u8) -> Self {
        Self(bits & Self::ALL.0)
    }

    pub const fn bits(self) -> u8 {
        self.0
    }

    #[must_use]
    pub const fn allows(self, severity: Severity) -> bool {
        self.0 & severity.flag() != 0
    }

    #[must_use]
    pub const fn with(self, severity: Severity) -> Self {
        Self(self.0 | severity.flag())
    }
}

impl Default for SeverityMask {
    fn default() -> Self {
        Self::ALL
    }
}

/// Error parsing a module mask string such as `ccm=0x03`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MaskParseError {
    #[error("expected module=mask, got '{0}'")]
    MissingSeparator(String),

    #[error("unknown log module '{0}'")]
    UnknownModule(String),

    #[error("invalid mask '{0}' (expected decimal or 0x-prefixed hex up to 0x1F)")]
    InvalidMask(String),
}

impl FromStr for SeverityMask {
    type Err = MaskParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let bits = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
            Some(hex) => u8::from_str_radix(hex, 16),
            None => s.parse::<u8>(),
        }
        .map_err(|_| MaskParseError::InvalidMask(s.to_string()))?;

        if bits & !Self::ALL.0 != 0 {
            return Err(MaskParseError::InvalidMask(s.to_string()));
        }
        Ok(Self(bits))
    }
}

// ============================================================================
// Module Masks
// ============================================================================

/// Severity mask for every module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleMasks {
    masks: [SeverityMask; LogModule::COUNT],
}

impl Default for ModuleMasks {
    fn default() -> Self {
        Self::uniform(SeverityMask::ALL)
    }
}

impl ModuleMasks {
    pub fn uniform(mask: SeverityMask) -> Self {
        Self {
            masks: [mask; LogModule::COUNT],
        }
    }

    pub fn get(&self, module: LogModule) -> SeverityMask {
        self.masks
            .get(module.index())
            .copied()
            .unwrap_or(SeverityMask::ALL)
    }

    pub fn set(&mut self, module: LogModule, mask: SeverityMask) {
        if let Some(slot) = self.masks.get_mut(module.index()) {
            *slot = mask;
        }
    }

    /// Returns true if an event with this target and severity is emitted.
    #[must_use]
    pub fn allows(&self, target: &str, severity: Severity) -> bool {
        self.get(LogModule::from_target(target)).allows(severity)
    }

    /// Parses `"ccm=0x1f,ccm_vac=3"` on top of the default masks.
    pub fn parse(spec: &str) -> Result<Self, MaskParseError> {
        let mut masks = Self::default();
        for entry in spec.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let (name, mask) = entry
                .split_once('=')
                .ok_or_else(|| MaskParseError::MissingSeparator(entry.to_string()))?;
            let name = name.trim();
            let module = LogModule::from_target(name);
            if module == LogModule::Unknown && name != LogModule::Unknown.target() {
                return Err(MaskParseError::UnknownModule(name.to_string()));
            }
            masks.set(module, mask.parse()?);
        }
        Ok(masks)
    }
}

// ============================================================================
// Filter
// ============================================================================

/// Per-layer filter applying [`ModuleMasks`].
///
/// Cheap to clone; clones share the masks, so a clone kept by the caller can
/// change masks at runtime.
#[derive(Debug, Clone, Default)]
pub struct ModuleMaskFilter {
    masks: Arc<RwLock<ModuleMasks>>,
}

impl ModuleMaskFilter {
    pub fn new(masks: ModuleMasks) -> Self {
        Self {
            masks: Arc::new(RwLock::new(masks)),
        }
    }

    pub fn set_mask(&self, module: LogModule, mask: SeverityMask) {
        self.masks.write().set(module, mask);
    }

    pub fn mask(&self, module: LogModule) -> SeverityMask {
        self.masks.read().get(module)
    }

    /// Returns true if the event or span described by `meta` passes the masks.
    pub fn is_enabled(&self, meta: &Metadata<'_>) -> bool {
        let fatal = meta.fields().field("fatal").is_some();
        let severity = Severity::from_level(*meta.level(), fatal);
        self.masks.read().allows(meta.target(), severity)
    }
}

impl<S> Filter<S> for ModuleMaskFilter {
    fn enabled(&self, meta: &Metadata<'_>, _cx: &Context<'_, S>) -> bool {
        self.is_enabled(meta)
    }

    // Masks change at runtime, so the per-callsite answer must not be cached.
    fn callsite_enabled(&self, _meta: &'static Metadata<'static>) -> Interest {
        Interest::sometimes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::Layer;

    #[test]
    fn test_severity_flags() {
        assert_eq!(Severity::Fatal.flag(), 0x01);
        assert_eq!(Severity::Error.flag(), 0x02);
        assert_eq!(Severity::Info.flag(), 0x04);
        assert_eq!(Severity::Debug.flag(), 0x08);
        assert_eq!(Severity::Function.flag(), 0x10);
    }

    #[test]
    fn test_severity_from_level() {
        assert_eq!(Severity::from_level(Level::ERROR, true), Severity::Fatal);
        assert_eq!(Severity::from_level(Level::ERROR, false), Severity::Error);
        assert_eq!(Severity::from_level(Level::WARN, false), Severity::Error);
        assert_eq!(Severity::from_level(Level::TRACE, false), Severity::Function);
    }

    #[test]
    fn test_mask_parse() {
        assert_eq!("0x03".parse::<SeverityMask>().unwrap(), SeverityMask::ERRORS);
        assert_eq!("31".parse::<SeverityMask>().unwrap(), SeverityMask::ALL);
        assert!("0x20".parse::<SeverityMask>().is_err());
        assert!("abc".parse::<SeverityMask>().is_err());
    }

    #[test]
    fn test_module_masks_parse() {
        let masks = ModuleMasks::parse("ccm=0x03, ccm_vac=0").unwrap();
        assert_eq!(masks.get(LogModule::Ccm), SeverityMask::ERRORS);
        assert_eq!(masks.get(LogModule::CcmVac), SeverityMask::NONE);
        assert_eq!(masks.get(LogModule::CcmCal), SeverityMask::ALL);

        assert!(matches!(
            ModuleMasks::parse("nope=1"),
            Err(MaskParseError::UnknownModule(_))
        ));
        assert!(matches!(
            ModuleMasks::parse("ccm"),
            Err(MaskParseError::MissingSeparator(_))
        ));
    }

    #[test]
    fn test_module_masks_allows() {
        let mut masks = ModuleMasks::default();
        masks.set(LogModule::Ccm, SeverityMask::ERRORS);

        assert!(masks.allows(CCM, Severity::Fatal));
        assert!(masks.allows(CCM, Severity::Error));
        assert!(!masks.allows(CCM, Severity::Info));
        assert!(masks.allows(CCM_VAC, Severity::Function));
        assert!(masks.allows("some_other_crate", Severity::Debug));
    }

    /// Counts every event that reaches it.
    struct Counter(Arc<AtomicUsize>);

    impl<S: tracing::Subscriber> Layer<S> for Counter {
        fn on_event(&self, _event: &tracing::Event<'_>, _cx: Context<'_, S>) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_filter_applies_masks() {
        let count = Arc::new(AtomicUsize::new(0));
        let filter = ModuleMaskFilter::new(ModuleMasks::default());
        filter.set_mask(LogModule::Ccm, SeverityMask::NONE.with(Severity::Fatal));

        let subscriber = tracing_subscriber::registry()
            .with(Counter(count.clone()).with_filter(filter.clone()));

        tracing::subscriber::with_default(subscriber, || {
            tracing::info!(target: CCM, "dropped");
            tracing::error!(target: CCM, "dropped");
            crate::fatal!(target: CCM, "kept");
            tracing::trace!(target: CCM_CAL, "kept");
        });

        assert_eq!(count.load(Ordering::SeqCst), 2);
        assert_eq!(filter.mask(LogModule::Ccm).bits(), 0x01);
    }
}
