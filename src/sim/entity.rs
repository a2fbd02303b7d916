//! Generation-checked handles into flat slot arenas
//!
//! A [`Handle`] is an `(index, generation)` pair. When a slot is freed its
//! generation is bumped, so every handle taken before the free stops
//! resolving, even after the slot is reused by a new value.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;

use serde::{Deserialize, Serialize};

/// Stable reference to a value stored in an [`Arena<T>`]. Never owns its referent.
#[derive(Serialize, Deserialize)]
#[serde(bound = "")]
pub struct Handle<T> {
    index: u32,
    generation: u16,
    #[serde(skip)]
    _marker: PhantomData<fn() -> T>,
}

impl<T> Handle<T> {
    pub(crate) fn from_raw(index: u32, generation: u16) -> Self {
        Self {
            index,
            generation,
            _marker: PhantomData,
        }
    }

    /// Slot index. Also used as the transform id in state frames.
    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn generation(&self) -> u16 {
        self.generation
    }
}

impl<T> Clone for Handle<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Handle<T> {}

impl<T> PartialEq for Handle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index && self.generation == other.generation
    }
}

impl<T> Eq for Handle<T> {}

impl<T> Hash for Handle<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.index.hash(state);
        self.generation.hash(state);
    }
}

impl<T> fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}v{}", self.index, self.generation)
    }
}

/// Returned when an arena has no free slot left under its capacity limit
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("arena is full ({limit} slots)")]
pub struct ArenaFull {
    pub limit: usize,
}

#[derive(Debug, Clone)]
struct Slot<T> {
    generation: u16,
    value: Option<T>,
}

/// Flat slot table addressed by [`Handle`]s
#[derive(Debug, Clone)]
pub struct Arena<T> {
    slots: Vec<Slot<T>>,
    free: Vec<u32>,
    len: usize,
    limit: usize,
}

impl<T> Arena<T> {
    /// Create an arena that never grows beyond `limit` slots
    pub fn with_limit(limit: usize) -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            len: 0,
            limit,
        }
    }

    pub fn insert(&mut self, value: T) -> Result<Handle<T>, ArenaFull> {
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.value = Some(value);
            self.len += 1;
            return Ok(Handle::from_raw(index, slot.generation));
        }

        if self.slots.len() >= self.limit {
            return Err(ArenaFull { limit: self.limit });
        }

        let index = self.slots.len() as u32;
        self.slots.push(Slot {
            generation: 0,
            value: Some(value),
        });
        self.len += 1;
        Ok(Handle::from_raw(index, 0))
    }

    /// Resolve a handle. Returns `None` for freed or reused slots.
    pub fn get(&self, handle: Handle<T>) -> Option<&T> {
        self.slots
            .get(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.value.as_ref())
    }

    pub fn get_mut(&mut self, handle: Handle<T>) -> Option<&mut T> {
        self.slots
            .get_mut(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.value.as_mut())
    }

    pub fn contains(&self, handle: Handle<T>) -> bool {
        self.get(handle).is_some()
    }

    pub fn remove(&mut self, handle: Handle<T>) -> Option<T> {
        let slot = self.slots.get_mut(handle.index as usize)?;
        if slot.generation != handle.generation {
            return None;
        }
        let value = slot.value.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(handle.index);
        self.len -= 1;
        Some(value)
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of slots ever allocated (live or free)
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Handle<T>, &T)> {
        self.slots.iter().enumerate().filter_map(|(index, slot)| {
            slot.value
                .as_ref()
                .map(|value| (Handle::from_raw(index as u32, slot.generation), value))
        })
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (Handle<T>, &mut T)> {
        self.slots.iter_mut().enumerate().filter_map(|(index, slot)| {
            let generation = slot.generation;
            slot.value
                .as_mut()
                .map(|value| (Handle::from_raw(index as u32, generation), value))
        })
    }

    /// Snapshot of live handles, for loops that mutate the arena
    pub fn handles(&self) -> Vec<Handle<T>> {
        self.iter().map(|(handle, _)| handle).collect()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn stale_handle_stays_absent_after_reuse() {
        let mut arena = Arena::with_limit(8);
        let first = arena.insert("first").unwrap();
        assert_eq!(arena.remove(first), Some("first"));

        let second = arena.insert("second").unwrap();
        assert_eq!(second.index(), first.index());
        assert_ne!(second, first);

        for _ in 0..3 {
            assert!(arena.get(first).is_none());
        }
        assert_eq!(arena.get(second), Some(&"second"));
        assert!(arena.remove(first).is_none());
        assert_eq!(arena.len(), 1);
    }

    #[test]
    fn insert_fails_past_limit() {
        let mut arena = Arena::with_limit(2);
        arena.insert(1).unwrap();
        arena.insert(2).unwrap();
        assert_eq!(arena.insert(3), Err(ArenaFull { limit: 2 }));
    }
}
