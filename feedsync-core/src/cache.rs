//! Entry sets: the per-scope building block of every entity cache.
//!
//! An entry set holds an ordered collection, the instant it was last fetched and an
//! invalidation generation. A fetch remembers the generation it started under and only
//! stamps freshness if no invalidation happened meanwhile, so invalidation is monotonic.

use std::collections::HashSet;
use std::hash::Hash;
use std::time::Duration;

use tokio::time::Instant;

/// Entities that can live in an entry set.
pub trait Cacheable: Clone + Send + Sync + 'static {
    type Key: Copy + Eq + Hash;

    /// Stable server identifier of the entity.
    fn cache_key(&self) -> Self::Key;
}

/// How an incoming batch is combined with the entries already cached.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum MergeMode {
    /// Discard the previous entries.
    #[default]
    Replace,
    /// Append entities whose key is not cached yet, keeping the existing order.
    Merge,
}

#[derive(Debug, Clone)]
pub struct EntrySet<T> {
    items: Vec<T>,
    fetched_at: Option<Instant>,
    generation: u64,
}

impl<T> Default for EntrySet<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            fetched_at: None,
            generation: 0,
        }
    }
}

impl<T: Cacheable> EntrySet<T> {
    pub fn items(&self) -> &[T] {
        &self.items
    }

    pub fn items_mut(&mut self) -> impl Iterator<Item = &mut T> {
        self.items.iter_mut()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_fresh(&self, window: Duration) -> bool {
        self.fetched_at
            .map(|at| at.elapsed() < window)
            .unwrap_or(false)
    }

    pub fn get(&self, key: T::Key) -> Option<&T> {
        self.items.iter().find(|item| item.cache_key() == key)
    }

    pub fn get_mut(&mut self, key: T::Key) -> Option<&mut T> {
        self.items.iter_mut().find(|item| item.cache_key() == key)
    }

    pub fn contains(&self, key: T::Key) -> bool {
        self.get(key).is_some()
    }

    /// Combines `incoming` with the cached entries without touching freshness.
    ///
    /// Returns the number of entities that were added.
    pub fn replace_or_merge(&mut self, incoming: Vec<T>, mode: MergeMode) -> usize {
        match mode {
            MergeMode::Replace => {
                self.items = incoming;
                self.items.len()
            }
            MergeMode::Merge => {
                let mut known: HashSet<T::Key> =
                    self.items.iter().map(Cacheable::cache_key).collect();
                let before = self.items.len();
                for item in incoming {
                    if known.insert(item.cache_key()) {
                        self.items.push(item);
                    }
                }
                self.items.len() - before
            }
        }
    }

    /// Stores the result of a fetch that started under `started_generation`.
    ///
    /// The data is always written since it is the newest available; freshness is only
    /// stamped when no invalidation happened after the fetch began.
    pub fn store(&mut self, incoming: Vec<T>, mode: MergeMode, started_generation: u64) -> bool {
        self.replace_or_merge(incoming, mode);
        if started_generation == self.generation {
            self.fetched_at = Some(Instant::now());
            true
        } else {
            false
        }
    }

    /// Forces the next read to reach the network.
    pub fn invalidate(&mut self) {
        self.fetched_at = None;
        self.generation += 1;
    }

    /// Invalidates and drops the entries.
    pub fn clear(&mut self) {
        self.items.clear();
        self.invalidate();
    }

    pub fn insert_front(&mut self, item: T) {
        self.items.retain(|existing| existing.cache_key() != item.cache_key());
        self.items.insert(0, item);
    }

    pub fn push(&mut self, item: T) {
        self.items.retain(|existing| existing.cache_key() != item.cache_key());
        self.items.push(item);
    }

    pub fn remove(&mut self, key: T::Key) -> Option<T> {
        let index = self.items.iter().position(|item| item.cache_key() == key)?;
        Some(self.items.remove(index))
    }
}
