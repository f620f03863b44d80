//! Scoped ambient-timeout override.
//!
//! A poll with an explicit timeout must not be cut short by the client's own,
//! shorter remote-execution budget. [`AmbientTimeoutGuard`] raises the
//! client's ambient timeout for the lifetime of the guard.
//!
//! Polls on one client overlap freely, so guards do not write back what they
//! saw. Each client has an entry in a process-wide registry:
//!
//! ```text
//! client ──► { base: 23ms, active: [300ms, 500ms] }   ambient = max(...) = 500ms
//!   A done ─► { base: 23ms, active: [500ms] }          ambient = 500ms
//!   B done ─► (entry removed)                          ambient = base = 23ms
//! ```
//!
//! The base is captured when the first override starts and restored when the
//! last one ends.

use crate::client::RemoteClient;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};
use std::time::Duration;

// =============================================================================
// REGISTRY
// =============================================================================

#[derive(Debug)]
struct Overrides {
    base: Duration,
    active: Vec<Duration>,
}

impl Overrides {
    fn effective(&self) -> Duration {
        self.active
            .iter()
            .copied()
            .fold(self.base, Duration::max)
    }
}

type Registry = HashMap<usize, Overrides>;

fn registry() -> MutexGuard<'static, Registry> {
    static REGISTRY: OnceLock<Mutex<Registry>> = OnceLock::new();
    REGISTRY
        .get_or_init(|| Mutex::new(HashMap::new()))
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
}

/// Entries live only while a guard holds the client, so the address stays
/// unique for as long as it is a key.
fn client_key(client: &Arc<dyn RemoteClient>) -> usize {
    Arc::as_ptr(client).cast::<()>() as usize
}

fn apply(client: &dyn RemoteClient, target: Duration) {
    if client.ambient_timeout() != target {
        client.set_ambient_timeout(target);
    }
}

// =============================================================================
// GUARD
// =============================================================================

/// Raises a client's ambient timeout until dropped
#[must_use = "the ambient timeout is restored as soon as the guard is dropped"]
pub struct AmbientTimeoutGuard {
    client: Arc<dyn RemoteClient>,
    held: Option<Duration>,
}

impl std::fmt::Debug for AmbientTimeoutGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AmbientTimeoutGuard")
            .field("held", &self.held)
            .finish_non_exhaustive()
    }
}

impl AmbientTimeoutGuard {
    /// Ensure the ambient timeout is at least `at_least` while the guard lives.
    ///
    /// Leaves the client untouched when its base timeout already allows that
    /// much.
    pub fn raise(client: Arc<dyn RemoteClient>, at_least: Duration) -> Self {
        let key = client_key(&client);
        let mut registry = registry();
        let base = registry
            .get(&key)
            .map_or_else(|| client.ambient_timeout(), |entry| entry.base);
        if at_least <= base {
            return Self::inert(client);
        }
        let entry = registry.entry(key).or_insert_with(|| Overrides {
            base,
            active: Vec::new(),
        });
        entry.active.push(at_least);
        let target = entry.effective();
        tracing::debug!(
            base_ms = base.as_millis() as u64,
            override_ms = at_least.as_millis() as u64,
            ambient_ms = target.as_millis() as u64,
            active = entry.active.len(),
            "raising ambient timeout"
        );
        apply(client.as_ref(), target);
        drop(registry);
        Self {
            client,
            held: Some(at_least),
        }
    }

    /// A guard that changes nothing
    pub fn inert(client: Arc<dyn RemoteClient>) -> Self {
        Self { client, held: None }
    }

    /// Whether the guard holds an override on the client
    #[must_use]
    pub const fn is_raised(&self) -> bool {
        self.held.is_some()
    }
}

impl Drop for AmbientTimeoutGuard {
    fn drop(&mut self) {
        let Some(held) = self.held.take() else {
            return;
        };
        let key = client_key(&self.client);
        let mut registry = registry();
        let Some(entry) = registry.get_mut(&key) else {
            return;
        };
        if let Some(pos) = entry.active.iter().position(|d| *d == held) {
            entry.active.swap_remove(pos);
        }
        let target = entry.effective();
        if entry.active.is_empty() {
            registry.remove(&key);
        }
        tracing::debug!(
            released_ms = held.as_millis() as u64,
            ambient_ms = target.as_millis() as u64,
            "releasing ambient timeout override"
        );
        apply(self.client.as_ref(), target);
    }
}
