//! In-memory archive for tests and ephemeral sessions.

use super::{Archive, ArchiveError};
use async_trait::async_trait;
use courier_core::ArchivedState;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Archive held in memory.
///
/// Clones share state. Failures can be scripted to exercise the
/// best-effort paths of the dispatch loop.
#[derive(Debug, Default, Clone)]
pub struct MemoryArchive {
    inner: Arc<Mutex<MemoryArchiveInner>>,
}

#[derive(Debug, Default)]
struct MemoryArchiveInner {
    stored: Option<ArchivedState>,
    saves: usize,
    fail_next_load: bool,
    fail_next_save: bool,
}

impl MemoryArchive {
    /// Empty archive.
    pub fn new() -> Self {
        Self::default()
    }

    /// Archive pre-seeded with a checkpoint.
    pub fn with_state(state: ArchivedState) -> Self {
        let archive = Self::default();
        archive.lock().stored = Some(state);
        archive
    }

    fn lock(&self) -> MutexGuard<'_, MemoryArchiveInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The stored checkpoint, if any.
    pub fn stored(&self) -> Option<ArchivedState> {
        self.lock().stored.clone()
    }

    /// Number of successful saves.
    pub fn save_count(&self) -> usize {
        self.lock().saves
    }

    /// Cause the next `load()` to fail.
    pub fn fail_next_load(&self) {
        self.lock().fail_next_load = true;
    }

    /// Cause the next `save()` to fail.
    pub fn fail_next_save(&self) {
        self.lock().fail_next_save = true;
    }
}

#[async_trait]
impl Archive for MemoryArchive {
    async fn load(&self) -> Result<Option<ArchivedState>, ArchiveError> {
        let mut inner = self.lock();
        if std::mem::take(&mut inner.fail_next_load) {
            return Err(ArchiveError::Unavailable("forced load failure".into()));
        }
        Ok(inner.stored.clone())
    }

    async fn save(&self, state: &ArchivedState) -> Result<(), ArchiveError> {
        let mut inner = self.lock();
        if std::mem::take(&mut inner.fail_next_save) {
            return Err(ArchiveError::Unavailable("forced save failure".into()));
        }
        inner.stored = Some(state.clone());
        inner.saves += 1;
        Ok(())
    }
}
