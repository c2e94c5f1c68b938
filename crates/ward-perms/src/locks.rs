use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use ward_core::PrincipalId;

/// Per-principal async locks serializing mutations and overlay installs.
#[derive(Debug, Default)]
pub struct PrincipalLocks {
    locks: Mutex<HashMap<PrincipalId, Arc<AsyncMutex<()>>>>,
}

impl PrincipalLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits until no other task holds the lock of `id`.
    pub async fn lock(&self, id: PrincipalId) -> OwnedMutexGuard<()> {
        let lock = self.table().entry(id).or_default().clone();
        lock.lock_owned().await
    }

    /// Drops the lock of `id` unless a task still holds or awaits it.
    pub fn forget(&self, id: PrincipalId) {
        let mut table = self.table();
        if table
            .get(&id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            table.remove(&id);
        }
    }

    pub fn len(&self) -> usize {
        self.table().len()
    }

    pub fn is_empty(&self) -> bool {
        self.table().is_empty()
    }

    fn table(&self) -> MutexGuard<'_, HashMap<PrincipalId, Arc<AsyncMutex<()>>>> {
        match self.locks.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
