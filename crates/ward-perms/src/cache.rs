use std::collections::{BTreeSet, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use ward_core::{DisplayFormat, PrincipalId};
use ward_store::PrincipalRecord;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
/// Public struct `CacheEntry` used across Ward components.
pub struct CacheEntry {
    pub permissions: BTreeSet<String>,
    pub format: DisplayFormat,
}

impl From<PrincipalRecord> for CacheEntry {
    fn from(record: PrincipalRecord) -> Self {
        Self {
            permissions: record.permissions,
            format: record.format,
        }
    }
}

/// Process-local view of every loaded principal.
///
/// Readers always receive copies; entries are only changed after the store
/// accepted the matching write.
#[derive(Debug, Default)]
pub struct PermissionCache {
    entries: RwLock<HashMap<PrincipalId, CacheEntry>>,
}

impl PermissionCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: PrincipalId) -> Option<CacheEntry> {
        self.read().get(&id).cloned()
    }

    pub fn permissions(&self, id: PrincipalId) -> Option<BTreeSet<String>> {
        self.read().get(&id).map(|entry| entry.permissions.clone())
    }

    pub fn format(&self, id: PrincipalId) -> Option<DisplayFormat> {
        self.read().get(&id).map(|entry| entry.format.clone())
    }

    pub fn contains(&self, id: PrincipalId) -> bool {
        self.read().contains_key(&id)
    }

    /// Replaces any prior entry for `id`.
    pub fn insert(&self, id: PrincipalId, entry: CacheEntry) {
        self.write().insert(id, entry);
    }

    /// Applies `change` to an existing entry. Returns `false` when `id` is
    /// not cached.
    pub fn update<F>(&self, id: PrincipalId, change: F) -> bool
    where
        F: FnOnce(&mut CacheEntry),
    {
        match self.write().get_mut(&id) {
            Some(entry) => {
                change(entry);
                true
            }
            None => false,
        }
    }

    pub fn remove(&self, id: PrincipalId) -> Option<CacheEntry> {
        self.write().remove(&id)
    }

    pub fn clear(&self) {
        self.write().clear();
    }

    pub fn ids(&self) -> Vec<PrincipalId> {
        let mut ids = self.read().keys().copied().collect::<Vec<_>>();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<PrincipalId, CacheEntry>> {
        match self.entries.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<PrincipalId, CacheEntry>> {
        match self.entries.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unit_update_only_touches_existing_entries() {
        let cache = PermissionCache::new();
        let id = PrincipalId::from_u128(1);
        assert!(!cache.update(id, |entry| {
            entry.permissions.insert("a.b".to_string());
        }));
        assert!(!cache.contains(id));

        cache.insert(id, CacheEntry::default());
        assert!(cache.update(id, |entry| {
            entry.permissions.insert("a.b".to_string());
        }));
        assert_eq!(
            cache.permissions(id),
            Some(BTreeSet::from(["a.b".to_string()]))
        );
    }

    #[test]
    fn unit_insert_replaces_and_clear_empties() {
        let cache = PermissionCache::new();
        let first = PrincipalId::from_u128(2);
        let second = PrincipalId::from_u128(3);
        cache.insert(
            first,
            CacheEntry {
                permissions: BTreeSet::from(["x".to_string()]),
                format: DisplayFormat::default(),
            },
        );
        cache.insert(first, CacheEntry::default());
        cache.insert(second, CacheEntry::default());
        assert_eq!(cache.get(first), Some(CacheEntry::default()));
        assert_eq!(cache.ids(), vec![first, second]);
        assert_eq!(cache.len(), 2);

        cache.clear();
        assert!(cache.is_empty());
    }
}
