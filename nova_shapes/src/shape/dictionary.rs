// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! ## Dictionary mode
//!
//! An object in dictionary mode owns its shapes: a doubly linked list of
//! nodes in insertion order, headed by a copy of the root shape, plus a
//! property table over the list. Nodes are mutated in place, and every
//! mutation hands the object a fresh [`OwnShape`] so caches keyed on the
//! object's current shape miss.

use core::num::{NonZeroU32, NonZeroU64};

use ahash::AHashSet;
use tracing::debug;

use super::{BaseLayout, PropertyTable, SHAPE_MAXIMUM_SLOT, Shape};
use crate::{
    error::{ShapeError, ShapeResult},
    heap::{
        Heap, HeapBudget,
        heap_bits::{CompactionLists, HeapMarkAndSweep, WorkQueues},
        try_reserve,
    },
    types::{PropertyAttributes, PropertyKey, ShapeFlags},
};

/// Handle to a node of one object's dictionary list.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DictionaryShape(NonZeroU32);

impl DictionaryShape {
    #[inline(always)]
    pub(crate) fn get_index(self) -> usize {
        self.0.get().wrapping_sub(1) as usize
    }

    fn from_index(index: usize) -> Self {
        debug_assert!(index < u32::MAX as usize);
        // SAFETY: Number is not max value and will not overflow to zero.
        Self(unsafe { NonZeroU32::new_unchecked(index as u32 + 1) })
    }
}

/// Identity of a dictionary object's current layout.
///
/// Never repeats within a compartment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OwnShape(NonZeroU64);

impl Heap {
    pub(crate) fn new_own_shape(&mut self) -> OwnShape {
        let id = NonZeroU64::MIN.saturating_add(self.next_own_shape);
        self.next_own_shape += 1;
        OwnShape(id)
    }
}

#[derive(Debug, Clone)]
pub(crate) struct DictionaryShapeRecord {
    /// Unowned layout of the node.
    pub(crate) base: BaseLayout,
    pub(crate) key: Option<PropertyKey>,
    pub(crate) slot: Option<u32>,
    pub(crate) attrs: PropertyAttributes,
    pub(crate) flags: ShapeFlags,
    pub(crate) short_id: i16,
    pub(crate) previous: Option<DictionaryShape>,
    pub(crate) next: Option<DictionaryShape>,
}

impl DictionaryShapeRecord {
    pub(crate) fn has_slot(&self) -> bool {
        self.attrs.has_slot() && self.slot.is_some()
    }
}

#[derive(Debug)]
pub(crate) struct DictionaryShapes {
    nodes: Vec<Option<DictionaryShapeRecord>>,
    free_nodes: Vec<DictionaryShape>,
    head: DictionaryShape,
    tail: DictionaryShape,
    /// Nodes on the list, the head excluded.
    len: u32,
    pub(crate) table: PropertyTable<DictionaryShape>,
    pub(crate) num_fixed_slots: u32,
    pub(crate) slot_span: u32,
    slot_free_list: Vec<u32>,
    pub(crate) own_shape: OwnShape,
}

impl DictionaryShapes {
    /// Copy the chain ending at `last` into a fresh list and table.
    ///
    /// A shape shadowed by a younger one with the same key is not copied.
    /// Nothing observable changes if this fails.
    pub(crate) fn from_tree(heap: &mut Heap, last: Shape) -> ShapeResult<Box<Self>> {
        let last_record = &heap.shapes[last.get_index()];
        let entry_count = last_record.entry_count;
        let num_fixed_slots = last_record.num_fixed_slots;
        let slot_span = last_record.slot_span;

        let mut chain = Vec::new();
        chain.try_reserve_exact(entry_count as usize + 1)?;
        let mut seen = AHashSet::default();
        seen.try_reserve(entry_count as usize)?;
        let mut current = Some(last);
        while let Some(shape) = current {
            let record = &heap.shapes[shape.get_index()];
            if record.key.is_none_or(|key| seen.insert(key)) {
                chain.push(shape);
            }
            current = record.parent;
        }
        let count = chain.len();

        let mut nodes = Vec::new();
        try_reserve(&mut nodes, count, &mut heap.budget)?;
        let mut table = match PropertyTable::new(&mut heap.budget, (count - 1) as u32) {
            Ok(table) => table,
            Err(err) => {
                heap.budget.release(count * size_of::<Option<DictionaryShapeRecord>>());
                return Err(err);
            }
        };
        for (position, shape) in chain.iter().rev().enumerate() {
            let record = &heap.shapes[shape.get_index()];
            let node = DictionaryShape::from_index(position);
            if let Some(key) = record.key {
                let slot = table.search(key, true);
                table.store(slot, key, node);
            }
            nodes.push(Some(DictionaryShapeRecord {
                base: record.base.to_unowned(&*heap),
                key: record.key,
                slot: record.slot.filter(|_| record.has_slot()),
                attrs: record.attrs,
                flags: record.flags | ShapeFlags::IN_DICTIONARY,
                short_id: record.short_id,
                previous: position.checked_sub(1).map(DictionaryShape::from_index),
                next: (position + 1 < count).then(|| DictionaryShape::from_index(position + 1)),
            }));
        }

        debug!(?last, entry_count, "Converted object to dictionary mode");
        Ok(Box::new(Self {
            nodes,
            free_nodes: Vec::new(),
            head: DictionaryShape::from_index(0),
            tail: DictionaryShape::from_index(count - 1),
            len: (count - 1) as u32,
            table,
            num_fixed_slots,
            slot_span,
            slot_free_list: Vec::new(),
            own_shape: heap.new_own_shape(),
        }))
    }

    pub(crate) fn head(&self) -> DictionaryShape {
        self.head
    }

    pub(crate) fn tail(&self) -> DictionaryShape {
        self.tail
    }

    pub(crate) fn len(&self) -> u32 {
        self.len
    }

    pub(crate) fn get(&self, node: DictionaryShape) -> &DictionaryShapeRecord {
        self.nodes[node.get_index()]
            .as_ref()
            .expect("Invalid DictionaryShape: Found None at index")
    }

    pub(crate) fn get_mut(&mut self, node: DictionaryShape) -> &mut DictionaryShapeRecord {
        self.nodes[node.get_index()]
            .as_mut()
            .expect("Invalid DictionaryShape: Found None at index")
    }

    pub(crate) fn lookup(&self, key: PropertyKey) -> Option<DictionaryShape> {
        self.table.lookup(key)
    }

    /// The tail's layout, which is the object's layout.
    pub(crate) fn base(&self) -> BaseLayout {
        self.get(self.tail).base
    }

    /// Make room for one more node so that [`Self::append`] cannot fail.
    pub(crate) fn reserve_node(&mut self, budget: &mut HeapBudget) -> ShapeResult<()> {
        if self.free_nodes.is_empty() {
            try_reserve(&mut self.nodes, 1, budget)?;
        }
        Ok(())
    }

    /// Make room to unlink one node and free one slot so that
    /// [`Self::unlink`] and [`Self::free_slot`] cannot fail.
    pub(crate) fn reserve_removal(&mut self) -> ShapeResult<()> {
        self.free_nodes.try_reserve(1)?;
        self.slot_free_list.try_reserve(1)?;
        Ok(())
    }

    pub(crate) fn append(&mut self, mut record: DictionaryShapeRecord) -> DictionaryShape {
        record.previous = Some(self.tail);
        record.next = None;
        record.flags |= ShapeFlags::IN_DICTIONARY;
        let node = match self.free_nodes.pop() {
            Some(node) => {
                self.nodes[node.get_index()] = Some(record);
                node
            }
            None => {
                self.nodes.push(Some(record));
                DictionaryShape::from_index(self.nodes.len() - 1)
            }
        };
        let tail = self.tail;
        self.get_mut(tail).next = Some(node);
        self.tail = node;
        self.len += 1;
        node
    }

    /// Take `node` off the list. The head is never unlinked.
    pub(crate) fn unlink(&mut self, node: DictionaryShape) {
        debug_assert_ne!(node, self.head);
        let Some(record) = self.nodes[node.get_index()].take() else {
            unreachable!("Invalid DictionaryShape: Found None at index");
        };
        let Some(previous) = record.previous else {
            unreachable!("Dictionary list head cannot be unlinked");
        };
        self.get_mut(previous).next = record.next;
        match record.next {
            Some(next) => self.get_mut(next).previous = Some(previous),
            None => self.tail = previous,
        }
        self.free_nodes.push(node);
        self.len -= 1;
    }

    /// Drop every node but the head.
    pub(crate) fn clear(&mut self) {
        let head = self.head;
        let free_nodes = &mut self.free_nodes;
        self.nodes
            .iter_mut()
            .enumerate()
            .skip(1)
            .for_each(|(index, node)| {
                if node.take().is_some() {
                    free_nodes.push(DictionaryShape::from_index(index));
                }
            });
        self.get_mut(head).next = None;
        self.tail = head;
        self.len = 0;
        self.table.clear();
        self.slot_span = 0;
        self.slot_free_list.clear();
    }

    pub(crate) fn alloc_slot(&mut self) -> ShapeResult<u32> {
        if let Some(slot) = self.slot_free_list.pop() {
            debug_assert!(slot < self.slot_span);
            return Ok(slot);
        }
        let slot = self.slot_span;
        if slot >= SHAPE_MAXIMUM_SLOT {
            return Err(ShapeError::OutOfMemory);
        }
        self.slot_span += 1;
        Ok(slot)
    }

    pub(crate) fn free_slot(&mut self, slot: u32) {
        debug_assert!(slot < self.slot_span);
        debug_assert!(!self.slot_free_list.contains(&slot));
        self.slot_free_list.push(slot);
    }

    #[cfg(test)]
    pub(crate) fn free_slot_count(&self) -> usize {
        self.slot_free_list.len()
    }

    pub(crate) fn generate_own_shape(&mut self, heap: &mut Heap) {
        self.own_shape = heap.new_own_shape();
    }

    /// Nodes from the tail back to the head, the head excluded.
    pub(crate) fn iter_from_tail(&self) -> impl Iterator<Item = DictionaryShape> + '_ {
        let mut current = Some(self.tail);
        core::iter::from_fn(move || {
            let node = current.filter(|node| *node != self.head)?;
            current = self.get(node).previous;
            Some(node)
        })
    }

    pub(crate) fn size_of_excluding_this(&self) -> usize {
        self.nodes.capacity() * size_of::<Option<DictionaryShapeRecord>>()
            + self.free_nodes.capacity() * size_of::<DictionaryShape>()
            + self.slot_free_list.capacity() * size_of::<u32>()
            + self.table.size_of_excluding_this()
    }

    /// Check the list and table against each other.
    #[cfg(debug_assertions)]
    pub(crate) fn check_consistency(&self) {
        let head = self.get(self.head);
        assert!(head.previous.is_none());
        assert!(head.key.is_none());
        assert!(self.get(self.tail).next.is_none());
        let mut count = 0;
        for node in self.iter_from_tail() {
            let record = self.get(node);
            if let Some(next) = record.next {
                assert_eq!(self.get(next).previous, Some(node));
            }
            if let Some(slot) = record.slot.filter(|_| record.has_slot()) {
                assert!(slot < self.slot_span);
            }
            count += 1;
        }
        assert_eq!(count, self.len);
        assert_eq!(self.table.entry_count(), self.len);
        for (key, node) in self.table.iter() {
            assert_eq!(self.get(node).key, Some(key));
        }
    }
}

impl HeapMarkAndSweep for DictionaryShapes {
    fn mark_values(&self, queues: &mut WorkQueues) {
        self.nodes
            .iter()
            .flatten()
            .for_each(|node| node.base.mark_values(queues));
    }

    fn sweep_values(&mut self, compactions: &CompactionLists) {
        self.nodes
            .iter_mut()
            .flatten()
            .for_each(|node| node.base.sweep_values(compactions));
    }
}
