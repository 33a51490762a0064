use std::collections::HashSet;
use std::hash::Hash;
use std::sync::{Arc, Mutex};

/// In-process registry of active runs, keyed by job name or run id.
///
/// A second caller for a key that is already running gets `None` and must not
/// start work. The lease releases the key on drop, including on panic unwind.
#[derive(Debug)]
pub struct RunGuard<K> {
    active: Arc<Mutex<HashSet<K>>>,
}

impl<K> Clone for RunGuard<K> {
    fn clone(&self) -> Self {
        Self {
            active: self.active.clone(),
        }
    }
}

impl<K> Default for RunGuard<K> {
    fn default() -> Self {
        Self {
            active: Arc::new(Mutex::new(HashSet::new())),
        }
    }
}

impl<K> RunGuard<K>
where
    K: Clone + Eq + Hash,
{
    pub fn new() -> Self {
        Self::default()
    }

    pub fn try_acquire(&self, key: K) -> Option<RunLease<K>> {
        let mut active = self.active.lock().unwrap_or_else(|p| p.into_inner());
        if !active.insert(key.clone()) {
            return None;
        }
        Some(RunLease {
            key,
            active: self.active.clone(),
        })
    }

    pub fn is_active(&self, key: &K) -> bool {
        self.active
            .lock()
            .map(|active| active.contains(key))
            .unwrap_or(false)
    }
}

/// Proof that the holder owns a key in a `RunGuard`.
#[derive(Debug)]
pub struct RunLease<K>
where
    K: Eq + Hash,
{
    key: K,
    active: Arc<Mutex<HashSet<K>>>,
}

impl<K> Drop for RunLease<K>
where
    K: Eq + Hash,
{
    fn drop(&mut self) {
        let mut active = self.active.lock().unwrap_or_else(|p| p.into_inner());
        active.remove(&self.key);
    }
}
