// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use ahash::{AHashMap, RandomState};
use hashbrown::HashTable;
use tracing::trace;

use super::{BaseLayout, BaseLayoutKey, Shape, ShapeRecord};
use crate::{
    compartment::Compartment,
    error::ShapeResult,
    heap::{
        CreateHeapData, Heap,
        heap_bits::{
            CompactionLists, HeapMarkAndSweep, HeapSweepWeakReference, WeakReference, WorkQueues,
        },
    },
    types::{ClassId, ObjectFlags, ObjectRef, PropertyAttributes, PropertyKey, ShapeFlags},
};

/// A property about to be appended to a shape.
///
/// Two children of the same parent are the same shape exactly when their
/// descriptions are equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChildShape {
    /// Unowned layout of the child.
    pub base: BaseLayout,
    pub key: PropertyKey,
    pub slot: Option<u32>,
    pub attrs: PropertyAttributes,
    pub flags: ShapeFlags,
    pub short_id: i16,
}

impl ChildShape {
    pub(crate) fn from_record(record: &ShapeRecord, base: BaseLayout) -> Option<Self> {
        Some(Self {
            base,
            key: record.key?,
            slot: record.slot,
            attrs: record.attrs,
            flags: record.flags.public_flags(),
            short_id: record.short_id,
        })
    }

    /// Hash of everything but the layout. Layout handles move during
    /// compaction; hashed registries are never rehashed by the collector.
    fn transition_hash(&self, hasher: &RandomState) -> u64 {
        hasher.hash_one((self.key, self.slot, self.attrs, self.flags, self.short_id))
    }
}

type ChildEntry = (ChildShape, WeakReference<Shape>);

/// Registry of the children of one shape.
///
/// Starts out empty, holds a short list while the shape has few children and
/// switches to a hash table after that.
///
/// > NOTE: The children are weakly held. A child that nothing else keeps
/// > alive is dropped from its parent's registry during collection.
#[derive(Debug, Default)]
pub(crate) enum ShapeChildren {
    #[default]
    Empty,
    Linear(Vec<ChildEntry>),
    Hashed(HashTable<ChildEntry>),
}

impl ShapeChildren {
    pub(crate) fn find(&self, child: &ChildShape, hasher: &RandomState) -> Option<Shape> {
        match self {
            ShapeChildren::Empty => None,
            ShapeChildren::Linear(children) => children
                .iter()
                .find(|(candidate, _)| candidate == child)
                .map(|(_, shape)| shape.0),
            ShapeChildren::Hashed(table) => table
                .find(child.transition_hash(hasher), |(candidate, _)| candidate == child)
                .map(|(_, shape)| shape.0),
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        match self {
            ShapeChildren::Empty => 0,
            ShapeChildren::Linear(children) => children.len(),
            ShapeChildren::Hashed(table) => table.len(),
        }
    }

    #[cfg(test)]
    pub(crate) fn is_hashed(&self) -> bool {
        matches!(self, ShapeChildren::Hashed(_))
    }

    /// Make room for one more child so that [`Self::insert`] cannot fail.
    pub(crate) fn reserve_one(
        &mut self,
        max_linear: usize,
        hasher: &RandomState,
    ) -> ShapeResult<()> {
        match self {
            ShapeChildren::Empty => {
                let mut children = Vec::new();
                children.try_reserve(1)?;
                *self = ShapeChildren::Linear(children);
            }
            ShapeChildren::Linear(children) if children.len() < max_linear => {
                children.try_reserve(1)?;
            }
            ShapeChildren::Linear(children) => {
                let mut table = HashTable::new();
                table.try_reserve(children.len() + 1, |(child, _): &ChildEntry| {
                    child.transition_hash(hasher)
                })?;
                for entry in children.drain(..) {
                    table.insert_unique(entry.0.transition_hash(hasher), entry, |(child, _)| {
                        child.transition_hash(hasher)
                    });
                }
                *self = ShapeChildren::Hashed(table);
            }
            ShapeChildren::Hashed(table) => {
                table.try_reserve(1, |(child, _)| child.transition_hash(hasher))?;
            }
        }
        Ok(())
    }

    pub(crate) fn insert(&mut self, child: ChildShape, shape: Shape, hasher: &RandomState) {
        debug_assert!(self.find(&child, hasher).is_none());
        match self {
            ShapeChildren::Empty => {
                *self = ShapeChildren::Linear(vec![(child, WeakReference(shape))])
            }
            ShapeChildren::Linear(children) => children.push((child, WeakReference(shape))),
            ShapeChildren::Hashed(table) => {
                table.insert_unique(
                    child.transition_hash(hasher),
                    (child, WeakReference(shape)),
                    |(child, _)| child.transition_hash(hasher),
                );
            }
        }
    }
}

impl HeapMarkAndSweep for ShapeChildren {
    fn mark_values(&self, _queues: &mut WorkQueues) {
        // NOTE: values are weakly held; we do not mark them.
    }

    fn sweep_values(&mut self, compactions: &CompactionLists) {
        let sweep = |(child, shape): &mut ChildEntry| {
            // Note: if the child was held strongly by someone else, then we
            // keep it in our registry and sweep it and its layout.
            let Some(new_shape) = shape.0.sweep_weak_reference(compactions) else {
                return false;
            };
            shape.0 = new_shape;
            child.base.sweep_values(compactions);
            true
        };
        match self {
            ShapeChildren::Empty => {}
            ShapeChildren::Linear(children) => children.retain_mut(sweep),
            ShapeChildren::Hashed(table) => table.retain(sweep),
        }
    }
}

impl Shape {
    /// Get the child of this shape described by `child`, creating and
    /// registering it if it does not exist yet.
    pub fn get_child(
        self,
        compartment: &mut Compartment,
        num_fixed_slots: u32,
        child: &ChildShape,
    ) -> ShapeResult<Shape> {
        let Compartment { options, heap } = compartment;
        let index = self.get_index();
        if let Some(existing) = heap.shape_children[index].find(child, &heap.hasher) {
            trace!(parent = ?self, shape = ?existing, key = ?child.key, "Found child shape");
            return Ok(existing);
        }
        {
            let Heap {
                shape_children,
                hasher,
                ..
            } = &mut *heap;
            shape_children[index].reserve_one(options.max_linear_children, hasher)?;
        }
        let record = ShapeRecord::create_child(self, &heap.shapes[index], num_fixed_slots, child);
        let shape = heap.create(record)?;
        let Heap {
            shape_children,
            hasher,
            ..
        } = &mut *heap;
        shape_children[index].insert(*child, shape, hasher);
        trace!(parent = ?self, ?shape, key = ?child.key, "Created child shape");
        Ok(shape)
    }

    /// Get the root shape for objects of `class` with the given prototype,
    /// parent, fixed slot count and flags.
    pub(crate) fn get_initial_shape(
        compartment: &mut Compartment,
        class: ClassId,
        proto: Option<ObjectRef>,
        parent: Option<ObjectRef>,
        num_fixed_slots: u32,
        flags: ObjectFlags,
    ) -> ShapeResult<Shape> {
        let heap = &mut compartment.heap;
        let key = InitialShapeKey {
            class,
            proto,
            parent,
            num_fixed_slots,
            flags: flags.object_flags(),
        };
        if let Some(shape) = heap.initial_shapes.lookup(&key) {
            return Ok(shape);
        }
        heap.initial_shapes.table.try_reserve(1)?;
        let base = heap.get_unowned(BaseLayoutKey::new(class, parent, flags))?;
        let shape = heap.create(ShapeRecord::create_root(base, num_fixed_slots))?;
        heap.initial_shapes.table.insert(key, WeakReference(shape));
        trace!(?shape, ?key, "Created initial shape");
        Ok(shape)
    }

    /// Make `shape` the initial shape of its root's entry, so that new
    /// objects start out with its properties.
    pub(crate) fn insert_initial_shape(
        compartment: &mut Compartment,
        shape: Shape,
        proto: Option<ObjectRef>,
    ) -> ShapeResult<()> {
        let heap = &mut compartment.heap;
        let root = shape.get_root(&*heap);
        let layout = root.get_base(&*heap).get_key(&*heap);
        let key = InitialShapeKey {
            class: layout.class,
            proto,
            parent: layout.parent,
            num_fixed_slots: root.get_num_fixed_slots(&*heap),
            flags: layout.flags.object_flags(),
        };
        heap.initial_shapes.table.try_reserve(1)?;
        heap.initial_shapes.table.insert(key, WeakReference(shape));
        Ok(())
    }

    /// Get the shape equal to this one except for its layout, which becomes
    /// the unowned layout for `layout`.
    pub(crate) fn replace_last_property(
        self,
        compartment: &mut Compartment,
        layout: BaseLayoutKey,
        proto: Option<ObjectRef>,
    ) -> ShapeResult<Shape> {
        let num_fixed_slots = self.get_num_fixed_slots(&*compartment);
        let Some(parent) = self.get_parent(&*compartment) else {
            let initial = Shape::get_initial_shape(
                compartment,
                layout.class,
                proto,
                layout.parent,
                num_fixed_slots,
                layout.flags,
            )?;
            return Ok(initial.get_root(&*compartment));
        };
        let base = compartment.heap.get_unowned(layout)?;
        let Some(child) = ChildShape::from_record(&compartment.heap.shapes[self.get_index()], base)
        else {
            unreachable!("non-root shape without a key");
        };
        parent.get_child(compartment, num_fixed_slots, &child)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct InitialShapeKey {
    class: ClassId,
    proto: Option<ObjectRef>,
    parent: Option<ObjectRef>,
    num_fixed_slots: u32,
    flags: ObjectFlags,
}

/// Lookup-table to find the root shape of new objects.
///
/// > NOTE: The values in the map are weakly held. Entries are removed from
/// > the table once no object refers to their shape anymore.
#[derive(Debug, Default)]
#[repr(transparent)]
pub(crate) struct InitialShapeTable {
    table: AHashMap<InitialShapeKey, WeakReference<Shape>>,
}

impl InitialShapeTable {
    pub(crate) fn lookup(&self, key: &InitialShapeKey) -> Option<Shape> {
        self.table.get(key).map(|shape| shape.0)
    }

    pub(crate) fn len(&self) -> usize {
        self.table.len()
    }
}

impl HeapMarkAndSweep for InitialShapeTable {
    fn mark_values(&self, _queues: &mut WorkQueues) {
        // NOTE: values are weakly held; we do not mark them.
    }

    fn sweep_values(&mut self, compactions: &CompactionLists) {
        self.table.retain(|_, shape| {
            let Some(new_shape) = shape.0.sweep_weak_reference(compactions) else {
                return false;
            };
            shape.0 = new_shape;
            true
        });
    }
}
