// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

use ipr_core::IprError;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

/// Run-scoped named slots holding pre-built models shared between lifecycles.
#[derive(Debug)]
pub struct RunStorage<M> {
    slots: Mutex<HashMap<String, Arc<M>>>,
}

impl<M> Default for RunStorage<M> {
    fn default() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
        }
    }
}

impl<M> RunStorage<M> {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<String, Arc<M>>>, IprError> {
        self.slots
            .lock()
            .map_err(|_| IprError::resource_limit("run storage lock poisoned"))
    }

    /// Stores `model` under `slot`, returning the model it replaced.
    pub fn put(&self, slot: &str, model: Arc<M>) -> Result<Option<Arc<M>>, IprError> {
        Ok(self.lock()?.insert(slot.to_string(), model))
    }

    pub fn get(&self, slot: &str) -> Result<Option<Arc<M>>, IprError> {
        Ok(self.lock()?.get(slot).cloned())
    }

    pub fn remove(&self, slot: &str) -> Result<Option<Arc<M>>, IprError> {
        Ok(self.lock()?.remove(slot))
    }

    pub fn slot_names(&self) -> Result<Vec<String>, IprError> {
        let mut names: Vec<String> = self.lock()?.keys().cloned().collect();
        names.sort();
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::RunStorage;
    use std::sync::Arc;

    #[test]
    fn slots_hold_shared_models() {
        let storage = RunStorage::new();
        assert!(storage.get("wheat").expect("lock").is_none());

        let first = Arc::new(1u32);
        assert!(storage.put("wheat", Arc::clone(&first)).expect("lock").is_none());
        let fetched = storage.get("wheat").expect("lock").expect("slot filled");
        assert!(Arc::ptr_eq(&fetched, &first));

        let replaced = storage.put("wheat", Arc::new(2)).expect("lock");
        assert_eq!(replaced.as_deref(), Some(&1));
        storage.put("barley", Arc::new(3)).expect("lock");
        assert_eq!(
            storage.slot_names().expect("lock"),
            vec!["barley".to_string(), "wheat".to_string()]
        );
        assert_eq!(storage.remove("wheat").expect("lock").as_deref(), Some(&2));
        assert!(storage.get("wheat").expect("lock").is_none());
    }
}
