//! Endpoint arena: stable `(index, generation)` handles plus a live bitmap.
//!
//! Unregistering only clears the live bit. The slot keeps its entry until
//! [`Arena::purge`] runs at the end of a reactor iteration, so a dispatch
//! snapshot taken earlier never observes a reused index as the old endpoint.

use std::sync::Arc;

use super::Dispatch;

/// Handle to a registered endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EndpointId {
    index: u32,
    generation: u32,
}

impl EndpointId {
    /// Arena slot of this handle.
    pub fn index(&self) -> usize {
        self.index as usize
    }
}

/// Growable bitmap of live slots.
#[derive(Debug, Default)]
pub(super) struct LiveBits {
    words: Vec<u64>,
}

impl LiveBits {
    pub(super) fn set(&mut self, index: usize) {
        let word = index / 64;
        if word >= self.words.len() {
            self.words.resize(word + 1, 0);
        }
        self.words[word] |= 1u64 << (index % 64);
    }

    pub(super) fn clear(&mut self, index: usize) {
        if let Some(word) = self.words.get_mut(index / 64) {
            *word &= !(1u64 << (index % 64));
        }
    }

    pub(super) fn contains(&self, index: usize) -> bool {
        self.words
            .get(index / 64)
            .is_some_and(|word| word & (1u64 << (index % 64)) != 0)
    }

    pub(super) fn count(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// Set bits in ascending index order.
    pub(super) fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.words.iter().enumerate().flat_map(|(word_idx, &word)| {
            (0..64usize)
                .filter(move |&bit| word & (1u64 << bit) != 0)
                .map(move |bit| word_idx * 64 + bit)
        })
    }
}

struct Slot {
    generation: u32,
    entry: Option<Arc<dyn Dispatch>>,
}

/// Registered endpoints.
#[derive(Default)]
pub(super) struct Arena {
    slots: Vec<Slot>,
    live: LiveBits,
    free: Vec<u32>,
}

impl Arena {
    pub(super) fn insert(&mut self, entry: Arc<dyn Dispatch>) -> EndpointId {
        let index = match self.free.pop() {
            Some(index) => index,
            None => {
                self.slots.push(Slot {
                    generation: 0,
                    entry: None,
                });
                (self.slots.len() - 1) as u32
            }
        };
        let slot = &mut self.slots[index as usize];
        slot.entry = Some(entry);
        self.live.set(index as usize);
        EndpointId {
            index,
            generation: slot.generation,
        }
    }

    /// Clear the live bit. Returns false for stale or unknown handles.
    pub(super) fn remove(&mut self, id: EndpointId) -> bool {
        if !self.is_live(id) {
            return false;
        }
        self.live.clear(id.index());
        true
    }

    pub(super) fn is_live(&self, id: EndpointId) -> bool {
        self.live.contains(id.index())
            && self
                .slots
                .get(id.index())
                .is_some_and(|s| s.generation == id.generation)
    }

    /// Whether `entry` already occupies a live slot.
    pub(super) fn contains(&self, entry: &Arc<dyn Dispatch>) -> bool {
        let target = Arc::as_ptr(entry) as *const ();
        self.live.iter().any(|index| {
            self.slots[index]
                .entry
                .as_ref()
                .is_some_and(|e| Arc::as_ptr(e) as *const () == target)
        })
    }

    /// Live entries in slot order.
    pub(super) fn live_entries(&self) -> impl Iterator<Item = (EndpointId, &Arc<dyn Dispatch>)> + '_ {
        self.live.iter().filter_map(|index| {
            let slot = &self.slots[index];
            slot.entry.as_ref().map(|entry| {
                (
                    EndpointId {
                        index: index as u32,
                        generation: slot.generation,
                    },
                    entry,
                )
            })
        })
    }

    pub(super) fn len(&self) -> usize {
        self.live.count()
    }

    /// Drop entries of removed slots and recycle their indices.
    ///
    /// Returns the dropped entries so the caller can release them outside
    /// its lock.
    pub(super) fn purge(&mut self) -> Vec<Arc<dyn Dispatch>> {
        let mut dropped = Vec::new();
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if slot.entry.is_some() && !self.live.contains(index) {
                if let Some(entry) = slot.entry.take() {
                    dropped.push(entry);
                }
                slot.generation = slot.generation.wrapping_add(1);
                self.free.push(index as u32);
            }
        }
        dropped
    }

    /// Take every entry, live or not.
    pub(super) fn drain(&mut self) -> Vec<Arc<dyn Dispatch>> {
        self.live = LiveBits::default();
        self.free.clear();
        self.slots.drain(..).filter_map(|s| s.entry).collect()
    }
}
