//! LoRA Registry (C2): the set of loaded adapters plus per-adapter concurrent-use counts.
//!
//! `incref`/`decref` are called concurrently from every worker in the pool, so the running-count
//! map is a [`dashmap::DashMap`] rather than a `Mutex<HashMap<_>>` — no external locking is
//! needed to keep Load/Store/Delete race-free.

use dashmap::{DashMap, DashSet};

#[derive(Default)]
pub struct LoraRegistry {
    loaded: DashSet<String>,
    running: DashMap<String, u32>,
}

impl LoraRegistry {
    pub fn new(initial: impl IntoIterator<Item = String>) -> Self {
        let loaded = DashSet::new();
        for name in initial {
            loaded.insert(name);
        }
        Self {
            loaded,
            running: DashMap::new(),
        }
    }

    pub fn is_loaded(&self, name: &str) -> bool {
        self.loaded.contains(name)
    }

    pub fn list_loaded(&self) -> Vec<String> {
        self.loaded.iter().map(|e| e.clone()).collect()
    }

    /// Adds an adapter to the loaded set. Idempotent: loading an already-loaded name is a no-op.
    pub fn load(&self, name: impl Into<String>) {
        self.loaded.insert(name.into());
    }

    /// Removes an adapter from the loaded set. Does not touch `running` — an in-flight request
    /// against a just-unloaded adapter is allowed to finish.
    pub fn unload(&self, name: &str) -> bool {
        self.loaded.remove(name).is_some()
    }

    /// Bumps the running count for `name`: 0→1, 1→2, etc. are all Stores.
    pub fn incref(&self, name: &str) {
        self.running
            .entry(name.to_string())
            .and_modify(|n| *n += 1)
            .or_insert(1);
    }

    /// Decrements the running count for `name`; deletes the entry once it reaches zero. A
    /// decref against a name with no entry indicates a bookkeeping bug upstream — logged, not
    /// panicked on.
    pub fn decref(&self, name: &str) {
        let mut delete = false;
        match self.running.get_mut(name) {
            Some(mut entry) => {
                if *entry <= 1 {
                    delete = true;
                } else {
                    *entry -= 1;
                }
            }
            None => {
                tracing::error!(target: "lora", adapter = name, "decref called with no running entry");
                return;
            }
        }
        if delete {
            self.running.remove(name);
        }
    }

    pub fn running_count(&self, name: &str) -> u32 {
        self.running.get(name).map(|e| *e).unwrap_or(0)
    }

    /// Names of all adapters with a running count >= 1, sorted for deterministic metric labels.
    pub fn running_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.running.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }
}
