//! Owner handle for an acquired chip session.

use ccm_core::ChipId;

/// Proof that its holder acquired a chip session.
///
/// Each successful `acquire` returns its own handle; handles are not
/// cloneable, so every owner releases exactly the reference it took.
/// `release` invalidates the handle whether or not teardown happened.
///
/// The handle records the session generation it was issued under. Once the
/// session is torn down and rebuilt, handles from the earlier generation
/// are rejected.
#[derive(Debug, PartialEq, Eq)]
#[must_use = "a dropped handle leaks an owner reference; pass it to release"]
pub struct SessionHandle {
    chip_id: ChipId,
    generation: u64,
    released: bool,
}

impl SessionHandle {
    pub(crate) fn new(chip_id: ChipId, generation: u64) -> Self {
        Self {
            chip_id,
            generation,
            released: false,
        }
    }

    pub fn chip_id(&self) -> ChipId {
        self.chip_id
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Returns false once the handle has been passed to `release`.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        !self.released
    }

    /// Marks the handle released; returns true if it was valid before.
    pub(crate) fn invalidate(&mut self) -> bool {
        !std::mem::replace(&mut self.released, true)
    }
}
