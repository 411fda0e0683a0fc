//! Get-or-create map with per-key computation deduplication.
//!
//! Each key owns a [`OnceCell`]; concurrent callers for the same key await the
//! same in-flight initialisation instead of repeating it. A failed
//! initialisation leaves the cell empty so a later caller may retry.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Arc, Mutex};

use tokio::sync::OnceCell;

pub struct PromiseMap<K, V> {
    cells: Mutex<HashMap<K, Arc<OnceCell<V>>>>,
}

impl<K, V> PromiseMap<K, V>
where
    K: Eq + Hash,
    V: Clone,
{
    pub fn new() -> Self {
        Self {
            cells: Mutex::new(HashMap::new()),
        }
    }

    fn cell(&self, key: K) -> Arc<OnceCell<V>> {
        let mut cells = self.cells.lock().unwrap_or_else(|e| e.into_inner());
        cells.entry(key).or_default().clone()
    }

    /// Returns the value for `key`, running `init` only if no value exists and
    /// no other caller is computing one. The flag is `true` for the caller
    /// whose `init` produced the value.
    pub async fn get_or_try_init<F, Fut, E>(&self, key: K, init: F) -> Result<(V, bool), E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        let cell = self.cell(key);
        let mut created = false;
        let value = cell
            .get_or_try_init(|| {
                created = true;
                init()
            })
            .await?
            .clone();
        Ok((value, created))
    }

    /// Completed value for `key`, if any.
    pub fn get(&self, key: &K) -> Option<V> {
        let cells = self.cells.lock().unwrap_or_else(|e| e.into_inner());
        cells.get(key).and_then(|cell| cell.get().cloned())
    }

    /// Number of completed values.
    pub fn len(&self) -> usize {
        let cells = self.cells.lock().unwrap_or_else(|e| e.into_inner());
        cells.values().filter(|cell| cell.initialized()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<K: Eq + Hash, V: Clone> Default for PromiseMap<K, V> {
    fn default() -> Self {
        Self::new()
    }
}
