//! Pipeline-state objects cached by program identity

use crate::backend::ProgramIdentity;
use crate::error::{DenoiseError, Result, Stage};

struct CacheEntry<S> {
    identity: ProgramIdentity,
    state: S,
}

/// One pipeline-state object per library pipeline, tagged with the program identity it was built from
///
/// The entry array is sized once for the method instance and never resized.
/// Only the entry whose program identity changed is rebuilt.
pub struct PipelineStateCache<S> {
    entries: Box<[CacheEntry<S>]>,
    rebuilds: usize,
}

impl<S> PipelineStateCache<S> {
    pub fn new(states: Vec<(ProgramIdentity, S)>) -> Self {
        Self {
            entries: states.into_iter().map(|(identity, state)| CacheEntry { identity, state }).collect(),
            rebuilds: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns the cached state for `index`, rebuilding it first if `identity` differs
    ///
    /// # Arguments
    /// * `index` - Pipeline index
    /// * `identity` - Identity of the program currently compiled for the pipeline
    /// * `build` - Builds a replacement state; called at most once
    pub fn get_or_build<F>(&mut self, index: usize, identity: ProgramIdentity, build: F) -> Result<&S>
    where
        F: FnOnce() -> Result<S>,
    {
        let entries = self.entries.len();
        let Some(entry) = self.entries.get_mut(index) else {
            return Err(DenoiseError::configuration(Stage::Dispatch, format!("pipeline index {index} is out of range for {entries} cached pipelines")));
        };

        if entry.identity != identity {
            tracing::debug!(pipeline = index, old = %entry.identity, new = %identity, "Program changed, rebuilding pipeline state");
            entry.state = build()?;
            entry.identity = identity;
            self.rebuilds += 1;
        }

        Ok(&entry.state)
    }

    pub fn identity(&self, index: usize) -> Option<ProgramIdentity> {
        self.entries.get(index).map(|entry| entry.identity)
    }

    pub fn state(&self, index: usize) -> Option<&S> {
        self.entries.get(index).map(|entry| &entry.state)
    }

    /// Number of rebuilds since the cache was created
    pub fn rebuild_count(&self) -> usize {
        self.rebuilds
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unchanged_identity_returns_cached_state() {
        let mut cache = PipelineStateCache::new(vec![(ProgramIdentity(1), "a"), (ProgramIdentity(2), "b")]);

        let state = cache.get_or_build(0, ProgramIdentity(1), || panic!("must not rebuild")).unwrap();
        assert_eq!(*state, "a");
        assert_eq!(cache.rebuild_count(), 0);
    }

    #[test]
    fn test_changed_identity_rebuilds_single_entry() {
        let mut cache = PipelineStateCache::new(vec![(ProgramIdentity(1), "a"), (ProgramIdentity(2), "b")]);

        let state = cache.get_or_build(1, ProgramIdentity(3), || Ok("b2")).unwrap();
        assert_eq!(*state, "b2");
        assert_eq!(cache.rebuild_count(), 1);
        assert_eq!(cache.identity(1), Some(ProgramIdentity(3)));
        assert_eq!(cache.state(0), Some(&"a"));

        cache.get_or_build(1, ProgramIdentity(3), || panic!("must not rebuild")).unwrap();
        assert_eq!(cache.rebuild_count(), 1);
    }

    #[test]
    fn test_failed_rebuild_keeps_old_identity() {
        let mut cache = PipelineStateCache::new(vec![(ProgramIdentity(1), "a")]);

        let result = cache.get_or_build(0, ProgramIdentity(5), || Err(DenoiseError::backend(Stage::Dispatch, "compile failed")));
        assert!(result.is_err());
        assert_eq!(cache.identity(0), Some(ProgramIdentity(1)));
        assert!(cache.get_or_build(4, ProgramIdentity(1), || Ok("x")).is_err());
    }
}
