// In-process memory tier.
// Bounded map evicting the oldest-inserted key once the cap is exceeded.

use indexmap::IndexMap;
use serde_json::Value;

/// Default cap on memory tier entries.
pub const MAX_MEMORY_ITEMS: usize = 50;

/// Memory tier with FIFO eviction.
///
/// Overwriting a key keeps its original insertion position, so a value that
/// is rewritten often still ages out in insertion order. Reads never affect
/// eviction order.
#[derive(Debug)]
pub struct MemoryTier {
    /// Kept in insertion order, oldest first.
    entries: IndexMap<String, Value>,
    max_items: usize,
}

impl Default for MemoryTier {
    fn default() -> Self {
        Self::new(MAX_MEMORY_ITEMS)
    }
}

impl MemoryTier {
    pub fn new(max_items: usize) -> Self {
        Self {
            entries: IndexMap::new(),
            max_items: max_items.max(1),
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Insert or overwrite. Returns the evicted key, if any.
    pub fn insert(&mut self, key: &str, value: Value) -> Option<String> {
        if let Some(existing) = self.entries.get_mut(key) {
            *existing = value;
            return None;
        }

        self.entries.insert(key.to_string(), value);
        if self.entries.len() > self.max_items {
            return self.entries.shift_remove_index(0).map(|(oldest, _)| oldest);
        }
        None
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.entries.shift_remove(key)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn max_items(&self) -> usize {
        self.max_items
    }

    /// Keys in insertion order, oldest first.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }
}
