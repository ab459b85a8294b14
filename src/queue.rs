//! Ordered queue of pending entries with O(1) removal and move-to-tail.
//!
//! Entries live in an arena and are chained through `prev`/`next` indices, so any entry can be
//! unlinked or re-appended given only its [`EntryRef`]. Each arena slot carries a generation that
//! is bumped whenever the slot is vacated; a stale `EntryRef` therefore never aliases a newer entry
//! that happens to reuse the same slot.
//!
//! The queue is not internally synchronized. It is only ever touched while the owning coalescer's
//! lock is held.

use std::mem;

/// Arena capacity kept across drains regardless of batch size.
const RETAINED_CAPACITY: usize = 64;

/// Opaque handle to a live queue entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct EntryRef {
    index: u32,
    generation: u32,
}

enum Slot<T> {
    Occupied {
        value: T,
        prev: Option<u32>,
        next: Option<u32>,
    },
    Vacant {
        next_free: Option<u32>,
    },
}

struct Node<T> {
    generation: u32,
    slot: Slot<T>,
}

pub struct Queue<T> {
    nodes: Vec<Node<T>>,
    head: Option<u32>,
    tail: Option<u32>,
    free: Option<u32>,
    len: usize,
    /// Generation for freshly allocated nodes; above every generation the arena has handed out.
    base_generation: u32,
}

impl<T> Default for Queue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Queue<T> {
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            head: None,
            tail: None,
            free: None,
            len: 0,
            base_generation: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Add `value` at the tail.
    pub fn append(&mut self, value: T) -> EntryRef {
        let slot = Slot::Occupied {
            value,
            prev: None,
            next: None,
        };
        let index = match self.free {
            Some(index) => {
                let node = &mut self.nodes[index as usize];
                let Slot::Vacant { next_free } = node.slot else {
                    unreachable!("free list points at an occupied slot");
                };
                self.free = next_free;
                node.slot = slot;
                index
            }
            None => {
                let index = u32::try_from(self.nodes.len())
                    .expect("queue holds more than u32::MAX entries");
                self.nodes.push(Node {
                    generation: self.base_generation,
                    slot,
                });
                index
            }
        };
        self.link_tail(index);
        self.len += 1;
        EntryRef {
            index,
            generation: self.nodes[index as usize].generation,
        }
    }

    /// Unlink and return the entry, or `None` if `entry` no longer refers to a live entry.
    pub fn remove(&mut self, entry: EntryRef) -> Option<T> {
        if !self.is_live(entry) {
            return None;
        }
        self.unlink(entry.index);
        self.len -= 1;
        Some(self.vacate(entry.index))
    }

    /// Move the entry to the tail. Returns `false` if `entry` is stale.
    pub fn move_to_tail(&mut self, entry: EntryRef) -> bool {
        if !self.is_live(entry) {
            return false;
        }
        if self.tail != Some(entry.index) {
            self.unlink(entry.index);
            self.link_tail(entry.index);
        }
        true
    }

    pub fn get(&self, entry: EntryRef) -> Option<&T> {
        if !self.is_live(entry) {
            return None;
        }
        match &self.nodes[entry.index as usize].slot {
            Slot::Occupied { value, .. } => Some(value),
            Slot::Vacant { .. } => None,
        }
    }

    pub fn get_mut(&mut self, entry: EntryRef) -> Option<&mut T> {
        if !self.is_live(entry) {
            return None;
        }
        match &mut self.nodes[entry.index as usize].slot {
            Slot::Occupied { value, .. } => Some(value),
            Slot::Vacant { .. } => None,
        }
    }

    /// Detach the whole chain, head first. Every outstanding `EntryRef` becomes stale.
    pub fn take_all(&mut self) -> Vec<T> {
        let mut out = Vec::with_capacity(self.len);
        let mut cursor = self.head;
        while let Some(index) = cursor {
            cursor = match &self.nodes[index as usize].slot {
                Slot::Occupied { next, .. } => *next,
                Slot::Vacant { .. } => unreachable!("chain runs through a vacant slot"),
            };
            out.push(self.vacate(index));
        }
        self.head = None;
        self.tail = None;
        self.len = 0;
        self.reset_arena(out.len());
        out
    }

    /// Drop every entry.
    pub fn clear(&mut self) {
        drop(self.take_all());
    }

    /// Iterate head to tail.
    pub fn iter(&self) -> Iter<'_, T> {
        Iter {
            queue: self,
            cursor: self.head,
        }
    }

    /// Called once every node is vacant. Trims the arena to the last batch (at least
    /// `RETAINED_CAPACITY`); new nodes start past every generation handed out so far.
    fn reset_arena(&mut self, last_batch: usize) {
        if let Some(highest) = self.nodes.iter().map(|node| node.generation).max() {
            self.base_generation = self.base_generation.max(highest);
        }
        self.nodes.clear();
        self.nodes.shrink_to(last_batch.max(RETAINED_CAPACITY));
        self.free = None;
    }

    fn is_live(&self, entry: EntryRef) -> bool {
        self.nodes.get(entry.index as usize).is_some_and(|node| {
            node.generation == entry.generation && matches!(node.slot, Slot::Occupied { .. })
        })
    }

    fn links_mut(&mut self, index: u32) -> (&mut Option<u32>, &mut Option<u32>) {
        match &mut self.nodes[index as usize].slot {
            Slot::Occupied { prev, next, .. } => (prev, next),
            Slot::Vacant { .. } => unreachable!("linking a vacant slot"),
        }
    }

    fn link_tail(&mut self, index: u32) {
        let old_tail = self.tail;
        {
            let (prev, next) = self.links_mut(index);
            *prev = old_tail;
            *next = None;
        }
        match old_tail {
            Some(t) => *self.links_mut(t).1 = Some(index),
            None => self.head = Some(index),
        }
        self.tail = Some(index);
    }

    fn unlink(&mut self, index: u32) {
        let (prev, next) = {
            let (prev, next) = self.links_mut(index);
            (prev.take(), next.take())
        };
        match prev {
            Some(p) => *self.links_mut(p).1 = next,
            None => self.head = next,
        }
        match next {
            Some(n) => *self.links_mut(n).0 = prev,
            None => self.tail = prev,
        }
    }

    fn vacate(&mut self, index: u32) -> T {
        let node = &mut self.nodes[index as usize];
        let slot = mem::replace(
            &mut node.slot,
            Slot::Vacant {
                next_free: self.free,
            },
        );
        node.generation = node.generation.wrapping_add(1);
        self.free = Some(index);
        match slot {
            Slot::Occupied { value, .. } => value,
            Slot::Vacant { .. } => unreachable!("vacating a vacant slot"),
        }
    }
}

pub struct Iter<'a, T> {
    queue: &'a Queue<T>,
    cursor: Option<u32>,
}

impl<'a, T> Iterator for Iter<'a, T> {
    type Item = &'a T;

    fn next(&mut self) -> Option<&'a T> {
        let index = self.cursor?;
        match &self.queue.nodes[index as usize].slot {
            Slot::Occupied { value, next, .. } => {
                self.cursor = *next;
                Some(value)
            }
            Slot::Vacant { .. } => None,
        }
    }
}
