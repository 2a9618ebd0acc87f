//! Keyed registry of live sessions.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::error::{Error, Result};

/// Creation attempts per `get_or_create` call before giving up.
const MAX_CREATE_ATTEMPTS: usize = 3;

/// What the registry needs from a session: a liveness probe.
pub trait ManagedSession: Send {
    /// Whether the underlying process is still running.
    fn is_alive(&mut self) -> bool;
}

/// Registry keyed by caller-chosen ids.
///
/// Sessions are shared as `Arc<Mutex<S>>` so several callers can hold the
/// same session; the registry lock is only held while looking up or swapping
/// entries, never while a command runs.
pub struct SessionRegistry<S> {
    sessions: Mutex<HashMap<String, Arc<Mutex<S>>>>,
}

impl<S: ManagedSession> SessionRegistry<S> {
    pub fn new() -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Fetch the session registered under `id`, creating it if absent.
    ///
    /// A registered session found dead is dropped and re-created; after
    /// [`MAX_CREATE_ATTEMPTS`] failed creations the call surfaces
    /// [`Error::SessionRetriesExhausted`]. Idempotent under concurrent
    /// callers: the registry lock covers the lookup-or-insert, so two racing
    /// calls observe the same entry.
    pub fn get_or_create(
        &self,
        id: &str,
        factory: impl Fn() -> Result<S>,
    ) -> Result<Arc<Mutex<S>>> {
        let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());

        for attempt in 1..=MAX_CREATE_ATTEMPTS {
            if let Some(existing) = sessions.get(id) {
                let alive = existing
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .is_alive();
                if alive {
                    return Ok(existing.clone());
                }
                tracing::warn!(id, attempt, "session died, re-creating");
                sessions.remove(id);
            }

            match factory() {
                Ok(mut session) => {
                    if session.is_alive() {
                        let entry = Arc::new(Mutex::new(session));
                        sessions.insert(id.to_string(), entry.clone());
                        return Ok(entry);
                    }
                    // Died during creation; counts as a failed attempt.
                    tracing::warn!(id, attempt, "session died immediately after creation");
                }
                Err(e) => {
                    tracing::warn!(id, attempt, "session creation failed: {e}");
                }
            }
        }

        sessions.remove(id);
        Err(Error::SessionRetriesExhausted {
            id: id.to_string(),
            attempts: MAX_CREATE_ATTEMPTS as u32,
        })
    }

    /// Remove and return the session registered under `id`.
    pub fn remove(&self, id: &str) -> Option<Arc<Mutex<S>>> {
        let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        sessions.remove(id)
    }

    /// Ids of all registered sessions.
    pub fn ids(&self) -> Vec<String> {
        let sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        sessions.keys().cloned().collect()
    }
}

impl<S: ManagedSession> Default for SessionRegistry<S> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug)]
    struct FakeSession {
        alive: bool,
    }

    impl ManagedSession for FakeSession {
        fn is_alive(&mut self) -> bool {
            self.alive
        }
    }

    #[test]
    fn test_get_or_create_reuses_live_session() {
        let registry = SessionRegistry::new();
        let created = AtomicUsize::new(0);
        let factory = || {
            created.fetch_add(1, Ordering::SeqCst);
            Ok(FakeSession { alive: true })
        };

        let a = registry.get_or_create("ps1", factory).unwrap();
        let b = registry.get_or_create("ps1", factory).unwrap();

        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(created.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_distinct_ids_get_distinct_sessions() {
        let registry = SessionRegistry::new();
        let factory = || Ok(FakeSession { alive: true });

        let a = registry.get_or_create("one", factory).unwrap();
        let b = registry.get_or_create("two", factory).unwrap();

        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(registry.ids().len(), 2);
    }

    #[test]
    fn test_dead_session_is_recreated() {
        let registry = SessionRegistry::new();
        registry
            .get_or_create("ps1", || Ok(FakeSession { alive: false }))
            .ok();

        let created = AtomicUsize::new(0);
        let replacement = registry
            .get_or_create("ps1", || {
                created.fetch_add(1, Ordering::SeqCst);
                Ok(FakeSession { alive: true })
            })
            .unwrap();

        assert!(replacement.lock().unwrap().is_alive());
        assert!(created.load(Ordering::SeqCst) >= 1);
    }

    #[test]
    fn test_retries_are_bounded() {
        let registry = SessionRegistry::new();
        let created = AtomicUsize::new(0);

        let err = registry
            .get_or_create("doomed", || {
                created.fetch_add(1, Ordering::SeqCst);
                Ok(FakeSession { alive: false })
            })
            .unwrap_err();

        assert!(matches!(
            err,
            Error::SessionRetriesExhausted { attempts: 3, .. }
        ));
        assert_eq!(created.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_remove_forgets_the_session() {
        let registry = SessionRegistry::new();
        registry
            .get_or_create("tmp", || Ok(FakeSession { alive: true }))
            .unwrap();

        assert!(registry.remove("tmp").is_some());
        assert!(registry.remove("tmp").is_none());
        assert!(registry.ids().is_empty());
    }
}
