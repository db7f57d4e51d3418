// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

pub(crate) mod base_layout;
pub(crate) mod dictionary;
pub(crate) mod property_table;
pub(crate) mod property_tree;

use core::num::NonZeroU32;

use tracing::{debug, trace};

pub use base_layout::{BaseLayout, BaseLayoutKey, BaseLayoutRecord};
pub(crate) use base_layout::BaseLayoutSet;
pub use dictionary::{DictionaryShape, OwnShape};
pub(crate) use dictionary::{DictionaryShapeRecord, DictionaryShapes};
pub use property_table::{MIN_ENTRIES, MIN_SIZE, PropertyTable, TableEntry, TableSlot};
pub use property_tree::ChildShape;
pub(crate) use property_tree::{InitialShapeTable, ShapeChildren};

use crate::{
    compartment::Compartment,
    error::ShapeResult,
    heap::{
        CreateHeapData, Heap,
        heap_bits::{CompactionLists, HeapMarkAndSweep, HeapSweepWeakReference, WorkQueues},
    },
    types::{PropertyAttributes, PropertyKey, ShapeFlags},
};

/// Largest slot number a shape can describe.
pub const SHAPE_MAXIMUM_SLOT: u32 = (1 << 24) - 2;

/// Handle to a node of the property tree.
///
/// ## What is a shape?
///
/// A shape describes one property of an object (its key, slot and
/// attributes) together with the whole chain of properties added before it:
/// following the parent links from an object's last shape to the root
/// enumerates the object's properties from youngest to oldest. Objects built
/// by adding the same properties in the same order end up pointing at the
/// same shape, which is what lets a property cache key on shape identity.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Shape(NonZeroU32);

impl Shape {
    /// Get the implied usize index of the Shape reference.
    #[inline(always)]
    pub(crate) fn get_index(self) -> usize {
        self.0.get().wrapping_sub(1) as usize
    }

    /// Get a Shape pointing to the last Shape Record.
    pub(crate) fn last(shapes: &[ShapeRecord]) -> Self {
        debug_assert!(!shapes.is_empty());
        // SAFETY: The shapes list is not empty.
        Self(unsafe { NonZeroU32::new_unchecked(shapes.len() as u32) })
    }

    pub(crate) fn get_record(self, agent: &impl AsRef<[ShapeRecord]>) -> &ShapeRecord {
        &agent.as_ref()[self.get_index()]
    }

    pub fn get_base(self, agent: &impl AsRef<[ShapeRecord]>) -> BaseLayout {
        self.get_record(agent).base
    }

    /// Property key of the shape; `None` only for a root.
    pub fn get_key(self, agent: &impl AsRef<[ShapeRecord]>) -> Option<PropertyKey> {
        self.get_record(agent).key
    }

    pub fn get_parent(self, agent: &impl AsRef<[ShapeRecord]>) -> Option<Shape> {
        self.get_record(agent).parent
    }

    /// The stored slot. A slotless shape repeats its parent's slot here.
    pub fn get_maybe_slot(self, agent: &impl AsRef<[ShapeRecord]>) -> Option<u32> {
        self.get_record(agent).slot
    }

    pub fn has_slot(self, agent: &impl AsRef<[ShapeRecord]>) -> bool {
        self.get_record(agent).has_slot()
    }

    pub fn get_attributes(self, agent: &impl AsRef<[ShapeRecord]>) -> PropertyAttributes {
        self.get_record(agent).attrs
    }

    pub fn get_flags(self, agent: &impl AsRef<[ShapeRecord]>) -> ShapeFlags {
        self.get_record(agent).flags
    }

    pub fn get_short_id(self, agent: &impl AsRef<[ShapeRecord]>) -> i16 {
        self.get_record(agent).short_id
    }

    /// Number of shapes from this one to the root, the root excluded.
    pub fn get_entry_count(self, agent: &impl AsRef<[ShapeRecord]>) -> u32 {
        self.get_record(agent).entry_count
    }

    /// One past the highest slot used on the chain.
    pub fn get_slot_span(self, agent: &impl AsRef<[ShapeRecord]>) -> u32 {
        self.get_record(agent).slot_span
    }

    pub fn get_num_fixed_slots(self, agent: &impl AsRef<[ShapeRecord]>) -> u32 {
        self.get_record(agent).num_fixed_slots
    }

    pub fn is_empty_shape(self, agent: &impl AsRef<[ShapeRecord]>) -> bool {
        self.get_record(agent).key.is_none()
    }

    pub fn has_table(
        self,
        agent: &(impl AsRef<[ShapeRecord]> + AsRef<[BaseLayoutRecord]>),
    ) -> bool {
        self.get_base(agent).is_owned(agent)
    }

    /// Walk to the root of the chain.
    pub fn get_root(self, agent: &impl AsRef<[ShapeRecord]>) -> Shape {
        let mut shape = self;
        while let Some(parent) = shape.get_parent(agent) {
            shape = parent;
        }
        shape
    }

    /// Find the shape for `key` on the chain ending at this shape, without
    /// allocating.
    pub fn lookup(
        self,
        agent: &(impl AsRef<[ShapeRecord]> + AsRef<[BaseLayoutRecord]>),
        key: PropertyKey,
    ) -> Option<Shape> {
        if let Some(table) = self.get_base(agent).get_table(agent) {
            return table.lookup(key);
        }
        self.lookup_linear(agent, key)
    }

    fn lookup_linear(self, agent: &impl AsRef<[ShapeRecord]>, key: PropertyKey) -> Option<Shape> {
        let shapes = agent.as_ref();
        let mut current = Some(self);
        while let Some(shape) = current {
            let record = &shapes[shape.get_index()];
            if record.key == Some(key) {
                return Some(shape);
            }
            current = record.parent;
        }
        None
    }

    /// Find the shape for `key` on the chain ending at this shape.
    ///
    /// Every linear search is counted; once a long enough chain has been
    /// searched often enough it gets a property table. Failing to build the
    /// table is not an error: the search falls back to walking the chain.
    pub(crate) fn search(self, compartment: &mut Compartment, key: PropertyKey) -> Option<Shape> {
        let Compartment { options, heap } = compartment;
        let base = heap.shapes[self.get_index()].base;
        if let Some(table) = base.get_table(&*heap) {
            return table.lookup(key);
        }
        let record = &mut heap.shapes[self.get_index()];
        if record.num_linear_searches < options.linear_searches_max {
            record.num_linear_searches += 1;
        } else if record.entry_count >= options.min_hashify_entries {
            match self.hashify(heap) {
                Ok(()) => return self.lookup(&*heap, key),
                Err(err) => trace!(?err, "Could not hashify shape chain"),
            }
        }
        self.lookup_linear(&*heap, key)
    }

    /// Give this shape an owned layout with a table of the whole chain.
    ///
    /// When a key appears more than once on the chain, the youngest shape
    /// wins.
    pub(crate) fn hashify(self, heap: &mut Heap) -> ShapeResult<()> {
        let index = self.get_index();
        debug_assert!(!heap.shapes[index].base.is_owned(&*heap));
        let entry_count = heap.shapes[index].entry_count;
        let mut table = PropertyTable::new(&mut heap.budget, entry_count)?;
        let mut current = Some(self);
        while let Some(shape) = current {
            let record = &heap.shapes[shape.get_index()];
            if let Some(key) = record.key {
                let slot = table.search(key, true);
                if table.get(slot).is_none() {
                    table.store(slot, key, shape);
                }
            }
            current = record.parent;
        }

        let unowned = heap.shapes[index].base.to_unowned(&*heap);
        let key = unowned.get_key(&*heap);
        let table_size = table.size_of_excluding_this();
        let owned = match heap.create(BaseLayoutRecord::create_owned(unowned, key, table)) {
            Ok(owned) => owned,
            Err(err) => {
                heap.budget.release(table_size);
                return Err(err);
            }
        };
        heap.shapes[index].base = owned;
        debug!(shape = ?self, entry_count, "Hashified shape chain");
        Ok(())
    }
}

/// Data structure describing a node of the property tree.
///
/// Everything but `num_linear_searches` and `base` is immutable once the
/// record is created; `base` only changes when the chain is hashified, and
/// then only from the unowned layout to an owned twin of it.
#[derive(Debug)]
pub struct ShapeRecord {
    pub(crate) base: BaseLayout,
    pub(crate) key: Option<PropertyKey>,
    pub(crate) parent: Option<Shape>,
    pub(crate) slot: Option<u32>,
    pub(crate) slot_span: u32,
    pub(crate) num_fixed_slots: u32,
    pub(crate) entry_count: u32,
    pub(crate) attrs: PropertyAttributes,
    pub(crate) flags: ShapeFlags,
    pub(crate) short_id: i16,
    pub(crate) num_linear_searches: u8,
}

impl ShapeRecord {
    /// Create the root of a property tree.
    pub(crate) fn create_root(base: BaseLayout, num_fixed_slots: u32) -> Self {
        Self {
            base,
            key: None,
            parent: None,
            slot: None,
            slot_span: 0,
            num_fixed_slots,
            entry_count: 0,
            attrs: PropertyAttributes::SHARED,
            flags: ShapeFlags::empty(),
            short_id: 0,
            num_linear_searches: 0,
        }
    }

    pub(crate) fn create_child(
        parent: Shape,
        parent_record: &ShapeRecord,
        num_fixed_slots: u32,
        child: &ChildShape,
    ) -> Self {
        let slot_span = match child.slot {
            Some(slot) if child.attrs.has_slot() => parent_record.slot_span.max(slot + 1),
            _ => parent_record.slot_span,
        };
        Self {
            base: child.base,
            key: Some(child.key),
            parent: Some(parent),
            slot: child.slot,
            slot_span,
            num_fixed_slots,
            entry_count: parent_record.entry_count + 1,
            attrs: child.attrs,
            flags: child.flags.public_flags(),
            short_id: child.short_id,
            num_linear_searches: 0,
        }
    }

    pub(crate) fn has_slot(&self) -> bool {
        self.attrs.has_slot() && self.slot.is_some()
    }
}

impl HeapMarkAndSweep for Shape {
    fn mark_values(&self, queues: &mut WorkQueues) {
        queues.shapes.push(*self);
    }

    fn sweep_values(&mut self, compactions: &CompactionLists) {
        compactions.shapes.shift_non_zero_u32_index(&mut self.0);
    }
}

impl HeapSweepWeakReference for Shape {
    fn sweep_weak_reference(self, compactions: &CompactionLists) -> Option<Self> {
        compactions
            .shapes
            .shift_weak_non_zero_u32_index(self.0)
            .map(Self)
    }
}

impl HeapMarkAndSweep for ShapeRecord {
    fn mark_values(&self, queues: &mut WorkQueues) {
        self.base.mark_values(queues);
        self.parent.mark_values(queues);
    }

    fn sweep_values(&mut self, compactions: &CompactionLists) {
        self.base.sweep_values(compactions);
        self.parent.sweep_values(compactions);
    }
}
