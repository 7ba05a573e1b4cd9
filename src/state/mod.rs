//! Persistent collection state: what has already been collected, and how to
//! resume without re-reading it.
//!
//! All mutation happens through [`StateHandle`], which owns the mutex and
//! never exposes the underlying maps. Snapshots are stable JSON; fields the
//! current version does not know are carried through a round trip untouched.

mod log_stream;
mod object_store;

pub use log_stream::LogStreamState;
pub use object_store::{FilenameLayout, Granularity, ObjectStoreState, ParsedFilename};

use std::sync::{Arc, Mutex};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::errors::{CollectError, CollectResult};

/// Shared, mutex-guarded handle over a collection state.
///
/// Cloning the handle shares the state; discovery and enrichment both hold
/// clones during a run.
#[derive(Debug)]
pub struct StateHandle<S> {
    inner: Arc<Mutex<S>>,
}

impl<S> Clone for StateHandle<S> {
    fn clone(&self) -> Self {
        StateHandle {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S> StateHandle<S>
where
    S: Serialize + DeserializeOwned + Default,
{
    pub fn new(state: S) -> Self {
        StateHandle {
            inner: Arc::new(Mutex::new(state)),
        }
    }

    /// Rebuild a handle from a persisted snapshot. An empty or missing blob
    /// yields the default (empty) state.
    pub fn restore(blob: Option<&str>) -> CollectResult<Self> {
        let state = match blob {
            Some(raw) if !raw.trim().is_empty() => serde_json::from_str(raw)
                .map_err(|e| CollectError::Fatal(format!("corrupt state blob: {}", e)))?,
            _ => S::default(),
        };
        Ok(StateHandle::new(state))
    }

    /// Serialize the current state for the host to persist.
    pub fn snapshot(&self) -> CollectResult<String> {
        let guard = self.lock()?;
        serde_json::to_string(&*guard)
            .map_err(|e| CollectError::Fatal(format!("state serialization failed: {}", e)))
    }

    /// Run `f` with exclusive access to the state.
    pub fn with<R>(&self, f: impl FnOnce(&mut S) -> R) -> CollectResult<R> {
        let mut guard = self.lock()?;
        Ok(f(&mut guard))
    }

    fn lock(&self) -> CollectResult<std::sync::MutexGuard<'_, S>> {
        self.inner
            .lock()
            .map_err(|_| CollectError::Fatal("collection state mutex poisoned".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_restore_empty_blob_gives_default() {
        let handle: StateHandle<LogStreamState> = StateHandle::restore(None).unwrap();
        assert!(handle.with(|s| s.is_empty()).unwrap());

        let handle: StateHandle<LogStreamState> = StateHandle::restore(Some("  ")).unwrap();
        assert!(handle.with(|s| s.is_empty()).unwrap());
    }

    #[test]
    fn test_restore_corrupt_blob_is_fatal() {
        let result: CollectResult<StateHandle<LogStreamState>> =
            StateHandle::restore(Some("{not json"));
        assert!(matches!(result.unwrap_err(), CollectError::Fatal(_)));
    }

    #[test]
    fn test_snapshot_round_trip_preserves_state() {
        let handle = StateHandle::new(LogStreamState::default());
        handle.with(|s| s.upsert("stream-a", 1_700_000_000_000)).unwrap();

        let blob = handle.snapshot().unwrap();
        let restored: StateHandle<LogStreamState> = StateHandle::restore(Some(&blob)).unwrap();
        assert_eq!(
            restored.with(|s| s.latest("stream-a")).unwrap(),
            Some(1_700_000_000_000)
        );
    }

    #[test]
    fn test_unknown_fields_survive_round_trip() {
        let blob = r#"{"timestamps":{"s":5},"future_field":{"nested":true}}"#;
        let handle: StateHandle<LogStreamState> = StateHandle::restore(Some(blob)).unwrap();
        let out = handle.snapshot().unwrap();
        assert!(out.contains("future_field"));
        assert!(out.contains("nested"));
    }

    #[test]
    fn test_clone_shares_state() {
        let handle = StateHandle::new(LogStreamState::default());
        let other = handle.clone();
        handle.with(|s| s.upsert("s", 10)).unwrap();
        assert_eq!(other.with(|s| s.latest("s")).unwrap(), Some(10));
    }
}
