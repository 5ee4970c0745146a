use super::store::StagedContent;
use super::types::FilterEntry;
use crate::error::{FilterError, Result};
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Identifies a position in the registry that survives URL replacement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotKey(u64);

#[derive(Debug)]
struct Slot {
    key: SlotKey,
    entry: FilterEntry,
}

#[derive(Debug, Default)]
struct Index {
    // Kept in insertion order; a replacement reuses its slot's position.
    slots: Vec<Slot>,
    next_slot: u64,
}

impl Index {
    fn position(&self, url: &str) -> Option<usize> {
        self.slots.iter().position(|s| s.entry.url == url)
    }

    fn position_of_id(&self, id: u64) -> Option<usize> {
        self.slots.iter().position(|s| s.entry.id == id)
    }
}

/// The authoritative in-memory index of filter entries.
///
/// All access goes through one mutex held only for index operations, and all
/// reads hand out clones.
#[derive(Debug)]
pub struct Registry {
    index: Mutex<Index>,
    next_id: AtomicU64,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    pub fn new() -> Self {
        Self {
            index: Mutex::new(Index::default()),
            next_id: AtomicU64::new(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Index> {
        // Every mutation below completes or leaves the index untouched, so a
        // poisoned guard still holds a consistent index.
        self.index.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Hands out the next entry ID. IDs start at 1 and are never reused.
    pub fn allocate_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    pub fn insert(&self, entry: FilterEntry) -> Result<SlotKey> {
        let mut index = self.lock();
        if index.position(&entry.url).is_some() {
            return Err(FilterError::DuplicateUrl(entry.url));
        }
        let key = SlotKey(index.next_slot);
        index.next_slot += 1;
        index.slots.push(Slot { key, entry });
        Ok(key)
    }

    /// Swaps whatever entry currently occupies `slot` for `entry` and returns
    /// the previous occupant.
    pub fn replace(&self, slot: SlotKey, entry: FilterEntry) -> Result<FilterEntry> {
        let mut index = self.lock();
        let Some(pos) = index.slots.iter().position(|s| s.key == slot) else {
            return Err(FilterError::NotFound(entry.url));
        };
        if let Some(other) = index.position(&entry.url) {
            if other != pos {
                return Err(FilterError::DuplicateUrl(entry.url));
            }
        }
        Ok(std::mem::replace(&mut index.slots[pos].entry, entry))
    }

    pub fn remove(&self, url: &str) -> Option<FilterEntry> {
        let mut index = self.lock();
        let pos = index.position(url)?;
        Some(index.slots.remove(pos).entry)
    }

    pub fn find(&self, url: &str) -> Option<FilterEntry> {
        self.find_slot(url).map(|(_, entry)| entry)
    }

    pub fn find_slot(&self, url: &str) -> Option<(SlotKey, FilterEntry)> {
        let index = self.lock();
        let pos = index.position(url)?;
        let slot = &index.slots[pos];
        Some((slot.key, slot.entry.clone()))
    }

    pub fn contains(&self, url: &str) -> bool {
        self.lock().position(url).is_some()
    }

    pub fn contains_id(&self, id: u64) -> bool {
        self.lock().position_of_id(id).is_some()
    }

    pub fn snapshot(&self) -> Vec<FilterEntry> {
        self.lock().slots.iter().map(|s| s.entry.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.lock().slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Updates `enabled` and `name` in place. Returns the record before and
    /// after the update.
    pub fn set_flags(
        &self,
        url: &str,
        enabled: bool,
        name: &str,
    ) -> Option<(FilterEntry, FilterEntry)> {
        let mut index = self.lock();
        let pos = index.position(url)?;
        let entry = &mut index.slots[pos].entry;
        let before = entry.clone();
        entry.enabled = enabled;
        if entry.name != name {
            entry.name = name.to_string();
        }
        Some((before, entry.clone()))
    }

    /// Renames `staged` over the content file of entry `id` and records the
    /// new counters in the same critical section. Returns `Ok(None)` and
    /// discards the staged file if the entry is gone.
    pub fn commit_content(
        &self,
        id: u64,
        staged: StagedContent,
        rule_count: u64,
        checksum: u64,
        updated_at: u64,
    ) -> io::Result<Option<FilterEntry>> {
        let mut index = self.lock();
        let Some(pos) = index.position_of_id(id) else {
            return Ok(None);
        };
        let entry = &mut index.slots[pos].entry;
        if staged.target() != entry.path {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!(
                    "staged content targets {} but entry {} lives at {}",
                    staged.target().display(),
                    id,
                    entry.path.display()
                ),
            ));
        }
        staged.persist()?;
        entry.rule_count = rule_count;
        entry.checksum = checksum;
        entry.last_updated = updated_at;
        Ok(Some(entry.clone()))
    }

    /// Records a successful download that did not change the content.
    pub fn touch(&self, id: u64, updated_at: u64) -> Option<FilterEntry> {
        let mut index = self.lock();
        let pos = index.position_of_id(id)?;
        let entry = &mut index.slots[pos].entry;
        entry.last_updated = updated_at;
        Some(entry.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn entry(registry: &Registry, url: &str) -> FilterEntry {
        let id = registry.allocate_id();
        FilterEntry {
            id,
            url: url.to_string(),
            name: url.to_string(),
            enabled: true,
            rule_count: 0,
            path: PathBuf::from(format!("{}.txt", id)),
            checksum: 0,
            last_updated: 0,
        }
    }

    #[test]
    fn test_ids_are_unique_and_non_zero() {
        let registry = Registry::new();
        let a = registry.allocate_id();
        let b = registry.allocate_id();
        assert_ne!(a, 0);
        assert!(b > a);
    }

    #[test]
    fn test_insert_rejects_duplicate_url() {
        let registry = Registry::new();
        registry.insert(entry(&registry, "http://a")).unwrap();
        let err = registry.insert(entry(&registry, "http://a")).unwrap_err();
        assert!(matches!(err, FilterError::DuplicateUrl(url) if url == "http://a"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_snapshot_is_insertion_ordered_copy() {
        let registry = Registry::new();
        for url in ["http://c", "http://a", "http://b"] {
            registry.insert(entry(&registry, url)).unwrap();
        }
        let mut snapshot = registry.snapshot();
        let urls: Vec<_> = snapshot.iter().map(|e| e.url.as_str()).collect();
        assert_eq!(urls, vec!["http://c", "http://a", "http://b"]);

        snapshot[0].enabled = false;
        snapshot.clear();
        assert!(registry.find("http://c").unwrap().enabled);
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn test_replace_keeps_position() {
        let registry = Registry::new();
        registry.insert(entry(&registry, "http://a")).unwrap();
        let old = entry(&registry, "http://b");
        let slot = registry.insert(old.clone()).unwrap();
        assert_eq!(registry.find_slot("http://b"), Some((slot, old.clone())));
        registry.insert(entry(&registry, "http://c")).unwrap();

        let new = entry(&registry, "http://b2");
        let superseded = registry.replace(slot, new.clone()).unwrap();
        assert_eq!(superseded, old);

        let urls: Vec<_> = registry.snapshot().into_iter().map(|e| e.url).collect();
        assert_eq!(urls, vec!["http://a", "http://b2", "http://c"]);
        assert!(registry.find("http://b").is_none());
    }

    #[test]
    fn test_replace_chains_on_the_same_slot() {
        let registry = Registry::new();
        let original = entry(&registry, "http://a");
        let slot = registry.insert(original.clone()).unwrap();

        let first = entry(&registry, "http://b");
        let second = entry(&registry, "http://c");
        assert_eq!(registry.replace(slot, first.clone()).unwrap(), original);
        assert_eq!(registry.replace(slot, second.clone()).unwrap(), first);
        assert_eq!(registry.snapshot(), vec![second]);
    }

    #[test]
    fn test_replace_errors() {
        let registry = Registry::new();
        let slot_a = registry.insert(entry(&registry, "http://a")).unwrap();
        registry.insert(entry(&registry, "http://b")).unwrap();

        let err = registry
            .replace(slot_a, entry(&registry, "http://b"))
            .unwrap_err();
        assert!(matches!(err, FilterError::DuplicateUrl(_)));

        registry.remove("http://a").unwrap();
        let err = registry
            .replace(slot_a, entry(&registry, "http://z"))
            .unwrap_err();
        assert!(matches!(err, FilterError::NotFound(_)));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_set_flags_returns_before_and_after() {
        let registry = Registry::new();
        let original = entry(&registry, "http://a");
        registry.insert(original.clone()).unwrap();

        let (before, after) = registry.set_flags("http://a", false, "renamed").unwrap();
        assert_eq!(before, original);
        assert!(!after.enabled);
        assert_eq!(after.name, "renamed");
        assert_eq!(after.id, original.id);
        assert_eq!(after.path, original.path);

        assert!(registry.set_flags("http://missing", true, "x").is_none());
    }

    #[test]
    fn test_remove_and_touch() {
        let registry = Registry::new();
        let e = entry(&registry, "http://a");
        registry.insert(e.clone()).unwrap();

        assert_eq!(registry.touch(e.id, 42).unwrap().last_updated, 42);
        assert_eq!(registry.remove("http://a").unwrap().id, e.id);
        assert!(registry.remove("http://a").is_none());
        assert!(registry.touch(e.id, 43).is_none());
        assert!(registry.is_empty());
    }
}
