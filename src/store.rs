//! Concurrently accessed, ordered set of mappings.
//!
//! Readers take an immutable snapshot in O(1); writers copy-on-write a whole
//! new `Vec` before swapping it in atomically, so a matching operation never
//! observes the store changing mid-flight (invariant 5) and readers never
//! block writers or vice versa (§5).

use crate::mapping::Mapping;
use arc_swap::ArcSwap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// A mapping plus the order it was inserted in, used only to break
/// priority/score ties (§4.6 step 4).
#[derive(Clone)]
pub struct StoreEntry {
    pub mapping: Arc<Mapping>,
    pub insertion_index: u64,
}

/// A frozen view of the store at one instant. A single matching operation
/// uses one snapshot for its entire duration.
#[derive(Clone)]
pub struct MappingSnapshot(Arc<Vec<StoreEntry>>);

impl MappingSnapshot {
    pub fn iter(&self) -> impl Iterator<Item = &StoreEntry> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn get(&self, id: Uuid) -> Option<&StoreEntry> {
        self.0.iter().find(|e| e.mapping.id == id)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("mapping {0} not found")]
    NotFound(Uuid),
    #[error("mapping {0} already exists")]
    DuplicateId(Uuid),
}

/// Ordered, concurrently accessed set of mappings. Iteration order is
/// insertion order; the matching algorithm does not depend on it (it only
/// uses it as the final tie-break).
pub struct MappingStore {
    entries: ArcSwap<Vec<StoreEntry>>,
    next_index: AtomicU64,
    // Writers serialize among themselves so two concurrent `add`s can't
    // both read the same base Vec and silently drop one of them. Readers
    // never touch this lock.
    write_lock: Mutex<()>,
}

impl Default for MappingStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MappingStore {
    pub fn new() -> Self {
        Self {
            entries: ArcSwap::from_pointee(Vec::new()),
            next_index: AtomicU64::new(0),
            write_lock: Mutex::new(()),
        }
    }

    pub fn snapshot(&self) -> MappingSnapshot {
        MappingSnapshot(self.entries.load_full())
    }

    pub fn list(&self) -> Vec<Arc<Mapping>> {
        self.snapshot().iter().map(|e| e.mapping.clone()).collect()
    }

    pub fn get(&self, id: Uuid) -> Option<Arc<Mapping>> {
        self.snapshot().get(id).map(|e| e.mapping.clone())
    }

    pub fn add(&self, mapping: Mapping) -> Result<Arc<Mapping>, StoreError> {
        let _guard = self.write_lock.lock().unwrap();
        let current = self.entries.load();
        if current.iter().any(|e| e.mapping.id == mapping.id) {
            return Err(StoreError::DuplicateId(mapping.id));
        }
        let index = self.next_index.fetch_add(1, Ordering::SeqCst);
        let mapping = Arc::new(mapping);
        let mut next: Vec<StoreEntry> = (**current).clone();
        next.push(StoreEntry {
            mapping: mapping.clone(),
            insertion_index: index,
        });
        self.entries.store(Arc::new(next));
        Ok(mapping)
    }

    /// Replace a mapping in place, preserving its original insertion index
    /// so an update doesn't jump the tie-break queue.
    pub fn update(&self, mapping: Mapping) -> Result<Arc<Mapping>, StoreError> {
        let _guard = self.write_lock.lock().unwrap();
        let current = self.entries.load();
        let pos = current
            .iter()
            .position(|e| e.mapping.id == mapping.id)
            .ok_or(StoreError::NotFound(mapping.id))?;
        let insertion_index = current[pos].insertion_index;
        let mapping = Arc::new(mapping);
        let mut next: Vec<StoreEntry> = (**current).clone();
        next[pos] = StoreEntry {
            mapping: mapping.clone(),
            insertion_index,
        };
        self.entries.store(Arc::new(next));
        Ok(mapping)
    }

    pub fn delete(&self, id: Uuid) -> Result<Arc<Mapping>, StoreError> {
        let _guard = self.write_lock.lock().unwrap();
        let current = self.entries.load();
        let pos = current
            .iter()
            .position(|e| e.mapping.id == id)
            .ok_or(StoreError::NotFound(id))?;
        let removed = current[pos].mapping.clone();
        let mut next: Vec<StoreEntry> = (**current).clone();
        next.remove(pos);
        self.entries.store(Arc::new(next));
        Ok(removed)
    }

    pub fn reset(&self) {
        let _guard = self.write_lock.lock().unwrap();
        self.entries.store(Arc::new(Vec::new()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::Mapping;

    #[test]
    fn add_then_list_preserves_insertion_order() {
        let store = MappingStore::new();
        let a = Mapping::builder().with_title("a").build();
        let b = Mapping::builder().with_title("b").build();
        store.add(a.clone()).unwrap();
        store.add(b.clone()).unwrap();

        let listed = store.list();
        assert_eq!(listed[0].title.as_deref(), Some("a"));
        assert_eq!(listed[1].title.as_deref(), Some("b"));
    }

    #[test]
    fn duplicate_id_is_rejected() {
        let store = MappingStore::new();
        let m = Mapping::builder().build();
        store.add(m.clone()).unwrap();
        assert!(matches!(store.add(m), Err(StoreError::DuplicateId(_))));
    }

    #[test]
    fn update_preserves_insertion_index() {
        let store = MappingStore::new();
        let a = Mapping::builder().with_title("a").build();
        let id = a.id;
        let b = Mapping::builder().with_title("b").build();
        store.add(a).unwrap();
        store.add(b).unwrap();

        let mut replacement = Mapping::builder().with_title("a-v2").build();
        replacement.id = id;
        store.update(replacement).unwrap();

        let listed = store.list();
        assert_eq!(listed[0].title.as_deref(), Some("a-v2"));
    }

    #[test]
    fn reset_empties_the_store() {
        let store = MappingStore::new();
        store.add(Mapping::builder().build()).unwrap();
        store.reset();
        assert_eq!(store.list().len(), 0);
    }

    #[test]
    fn delete_missing_mapping_errors() {
        let store = MappingStore::new();
        assert!(matches!(store.delete(Uuid::new_v4()), Err(StoreError::NotFound(_))));
    }
}
