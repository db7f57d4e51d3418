// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! ## Property tables
//!
//! Open addressing hash table from property key to shape, using double
//! hashing with a power-of-two size. Removed entries become tombstones only
//! if another key's probe sequence may have passed over them, which is
//! tracked with a per-entry collision flag set during insertion probes.

use tracing::debug;

use crate::{
    error::{ShapeError, ShapeResult},
    heap::{
        HeapBudget,
        heap_bits::{CompactionLists, HeapMarkAndSweep, WorkQueues},
    },
    shape::Shape,
    types::PropertyKey,
};

pub const HASH_BITS: u32 = 32;
pub const MIN_SIZE_LOG2: u32 = 4;
pub const MIN_SIZE: usize = 1 << MIN_SIZE_LOG2;
/// Smallest chain worth hashing.
pub const MIN_ENTRIES: u32 = 7;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableEntry<T> {
    Free,
    /// Tombstone: the entry was live and a probe sequence may pass over it.
    Removed,
    Live {
        key: PropertyKey,
        value: T,
        collision: bool,
    },
}

/// Position of an entry, as returned by [`PropertyTable::search`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableSlot(usize);

impl TableSlot {
    pub fn index(self) -> usize {
        self.0
    }
}

#[derive(Debug, Clone)]
pub struct PropertyTable<T> {
    entries: Box<[TableEntry<T>]>,
    hash_shift: u32,
    entry_count: u32,
    removed_count: u32,
    generation: u32,
}

fn ceiling_log2(value: u32) -> u32 {
    if value <= 1 {
        0
    } else {
        u32::BITS - (value - 1).leading_zeros()
    }
}

fn allocate_entries<T: Copy>(
    size: usize,
    budget: &mut HeapBudget,
) -> ShapeResult<Box<[TableEntry<T>]>> {
    let bytes = size * size_of::<TableEntry<T>>();
    budget.charge(bytes)?;
    let mut entries = Vec::new();
    if let Err(err) = entries.try_reserve_exact(size) {
        budget.release(bytes);
        return Err(err.into());
    }
    entries.resize(size, TableEntry::Free);
    Ok(entries.into_boxed_slice())
}

impl<T: Copy + PartialEq> PropertyTable<T> {
    /// Create a table sized for `entry_count` live entries: twice that,
    /// rounded up to a power of two, never below [`MIN_SIZE`].
    pub fn new(budget: &mut HeapBudget, entry_count: u32) -> ShapeResult<Self> {
        let size_log2 = ceiling_log2(entry_count.saturating_mul(2)).max(MIN_SIZE_LOG2);
        Self::with_size_log2(budget, size_log2)
    }

    /// Create a table with exactly `1 << size_log2` entries.
    pub fn with_size_log2(budget: &mut HeapBudget, size_log2: u32) -> ShapeResult<Self> {
        if !(1..HASH_BITS).contains(&size_log2) {
            return Err(ShapeError::OutOfMemory);
        }
        Ok(Self {
            entries: allocate_entries(1 << size_log2, budget)?,
            hash_shift: HASH_BITS - size_log2,
            entry_count: 0,
            removed_count: 0,
            generation: 0,
        })
    }

    pub fn capacity(&self) -> usize {
        self.entries.len()
    }

    pub fn entry_count(&self) -> u32 {
        self.entry_count
    }

    pub fn removed_count(&self) -> u32 {
        self.removed_count
    }

    /// Number of times the table has been rebuilt.
    pub fn generation(&self) -> u32 {
        self.generation
    }

    fn size_log2(&self) -> u32 {
        HASH_BITS - self.hash_shift
    }

    #[inline]
    fn hash1(&self, hash0: u32) -> usize {
        (hash0 >> self.hash_shift) as usize
    }

    #[inline]
    fn hash2(&self, hash0: u32) -> usize {
        (((hash0 << self.size_log2()) >> self.hash_shift) | 1) as usize
    }

    pub fn entry(&self, slot: TableSlot) -> TableEntry<T> {
        self.entries[slot.0]
    }

    pub fn get(&self, slot: TableSlot) -> Option<T> {
        match self.entries[slot.0] {
            TableEntry::Live { value, .. } => Some(value),
            _ => None,
        }
    }

    /// Find `key` without touching collision flags.
    pub fn lookup(&self, key: PropertyKey) -> Option<T> {
        let hash0 = key.hash_number();
        let size_mask = self.capacity() - 1;
        let hash2 = self.hash2(hash0);
        let mut index = self.hash1(hash0);
        for _ in 0..self.capacity() {
            match self.entries[index] {
                TableEntry::Free => return None,
                TableEntry::Live { key: found, value, .. } if found == key => return Some(value),
                _ => {}
            }
            index = index.wrapping_sub(hash2) & size_mask;
        }
        None
    }

    /// Find the entry for `key`.
    ///
    /// If the key is absent, the returned slot is where it should be stored.
    /// When `adding`, that is the first tombstone met on the probe sequence,
    /// and every live entry passed over gets its collision flag set.
    pub fn search(&mut self, key: PropertyKey, adding: bool) -> TableSlot {
        let hash0 = key.hash_number();
        let mut index = self.hash1(hash0);
        match self.entries[index] {
            TableEntry::Free => return TableSlot(index),
            TableEntry::Live { key: found, .. } if found == key => return TableSlot(index),
            _ => {}
        }

        let size_mask = self.capacity() - 1;
        let hash2 = self.hash2(hash0);
        let mut first_removed = None;
        self.note_collision(index, adding, &mut first_removed);
        for _ in 1..self.capacity() {
            index = index.wrapping_sub(hash2) & size_mask;
            match self.entries[index] {
                TableEntry::Free => {
                    return TableSlot(match (adding, first_removed) {
                        (true, Some(removed)) => removed,
                        _ => index,
                    });
                }
                TableEntry::Live { key: found, .. } if found == key => return TableSlot(index),
                _ => self.note_collision(index, adding, &mut first_removed),
            }
        }
        // Growth keeps at least one free entry, so a full cycle only happens
        // on a table made of live entries and tombstones.
        match first_removed {
            Some(removed) => TableSlot(removed),
            None => unreachable!("property table has no free entry"),
        }
    }

    fn note_collision(&mut self, index: usize, adding: bool, first_removed: &mut Option<usize>) {
        match &mut self.entries[index] {
            TableEntry::Removed => {
                first_removed.get_or_insert(index);
            }
            TableEntry::Live { collision, .. } => {
                if adding {
                    *collision = true;
                }
            }
            TableEntry::Free => unreachable!(),
        }
    }

    /// Store `value` under `key` at a slot returned by [`Self::search`].
    ///
    /// Reusing a tombstone keeps its collision flag set.
    pub fn store(&mut self, slot: TableSlot, key: PropertyKey, value: T) {
        let collision = match self.entries[slot.0] {
            TableEntry::Free => {
                self.entry_count += 1;
                false
            }
            TableEntry::Removed => {
                self.entry_count += 1;
                self.removed_count -= 1;
                true
            }
            TableEntry::Live {
                key: found,
                collision,
                ..
            } => {
                debug_assert_eq!(found, key);
                collision
            }
        };
        self.entries[slot.0] = TableEntry::Live {
            key,
            value,
            collision,
        };
    }

    /// Remove the live entry at `slot`.
    pub fn remove(&mut self, slot: TableSlot) {
        let TableEntry::Live { collision, .. } = self.entries[slot.0] else {
            unreachable!("removing a dead property table entry");
        };
        if collision {
            self.entries[slot.0] = TableEntry::Removed;
            self.removed_count += 1;
        } else {
            self.entries[slot.0] = TableEntry::Free;
        }
        self.entry_count -= 1;
    }

    /// Drop every entry, keeping the allocation.
    pub fn clear(&mut self) {
        self.entries.fill(TableEntry::Free);
        self.entry_count = 0;
        self.removed_count = 0;
        self.generation += 1;
    }

    /// Live and removed entries together fill three quarters of the table.
    pub fn needs_to_grow(&self) -> bool {
        let size = self.capacity();
        (self.entry_count + self.removed_count) as usize >= size - (size >> 2)
    }

    /// Rebuild the table, doubling it unless a quarter of it is tombstones.
    ///
    /// A failed rebuild is tolerated as long as one more entry still fits
    /// while leaving a free entry behind.
    pub fn grow(&mut self, budget: &mut HeapBudget) -> ShapeResult<()> {
        let size = self.capacity();
        let delta = if (self.removed_count as usize) < (size >> 2) {
            1
        } else {
            0
        };
        match self.change(delta, budget) {
            Ok(()) => Ok(()),
            Err(err) if (self.entry_count + self.removed_count) as usize >= size - 1 => Err(err),
            Err(_) => Ok(()),
        }
    }

    /// Rebuild into a table of `1 << (size_log2 + log2_delta)` entries,
    /// dropping all tombstones and collision flags.
    pub fn change(&mut self, log2_delta: i32, budget: &mut HeapBudget) -> ShapeResult<()> {
        let new_size_log2 = self
            .size_log2()
            .checked_add_signed(log2_delta)
            .filter(|log2| (1..HASH_BITS).contains(log2))
            .ok_or(ShapeError::OutOfMemory)?;
        if (self.entry_count as usize) >= 1 << new_size_log2 {
            return Err(ShapeError::OutOfMemory);
        }
        let new_entries = allocate_entries(1 << new_size_log2, budget)?;
        let old_entries = core::mem::replace(&mut self.entries, new_entries);
        self.hash_shift = HASH_BITS - new_size_log2;
        self.removed_count = 0;
        self.generation += 1;
        for entry in old_entries.iter() {
            if let TableEntry::Live { key, value, .. } = *entry {
                let slot = self.search(key, true);
                debug_assert!(matches!(self.entries[slot.0], TableEntry::Free));
                self.entries[slot.0] = TableEntry::Live {
                    key,
                    value,
                    collision: false,
                };
            }
        }
        budget.release(old_entries.len() * size_of::<TableEntry<T>>());
        debug!(
            entries = self.entry_count,
            capacity = self.capacity(),
            generation = self.generation,
            "Rebuilt property table"
        );
        Ok(())
    }

    /// Halve the table once it is at most a quarter full.
    pub fn maybe_shrink(&mut self, budget: &mut HeapBudget) {
        let size = self.capacity();
        if size > MIN_SIZE && (self.entry_count as usize) <= size >> 2 {
            // Keeping the larger table is fine.
            let _ = self.change(-1, budget);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (PropertyKey, T)> + '_ {
        self.entries.iter().filter_map(|entry| match *entry {
            TableEntry::Live { key, value, .. } => Some((key, value)),
            _ => None,
        })
    }

    pub fn size_of_excluding_this(&self) -> usize {
        self.entries.len() * size_of::<TableEntry<T>>()
    }
}

impl HeapMarkAndSweep for PropertyTable<Shape> {
    fn mark_values(&self, queues: &mut WorkQueues) {
        self.iter().for_each(|(_, shape)| queues.shapes.push(shape));
    }

    fn sweep_values(&mut self, compactions: &CompactionLists) {
        self.entries.iter_mut().for_each(|entry| {
            if let TableEntry::Live { value, .. } = entry {
                value.sweep_values(compactions);
            }
        });
    }
}
