// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! ## Objects
//!
//! A [`NativeObject`] is the shape side of an object: which properties it
//! has, in which order, with which slots and attributes. Property values
//! are stored elsewhere, in slots numbered by the shapes.
//!
//! An object starts out sharing shapes from the compartment's property tree
//! and may switch to dictionary mode, where it owns a private list of
//! shapes. The switch is one-way.

mod mutation;

pub use mutation::PropertyDefinition;

use crate::{
    compartment::Compartment,
    error::ShapeResult,
    heap::heap_bits::{CompactionLists, HeapMarkAndSweep, WorkQueues},
    shape::{
        BaseLayout, BaseLayoutRecord, DictionaryShape, DictionaryShapes, OwnShape, Shape,
        ShapeRecord,
    },
    types::{
        Accessor, ClassId, ObjectFlags, ObjectRef, PropertyAttributes, PropertyKey, ShapeFlags,
    },
};

#[derive(Debug)]
enum ObjectShape {
    Shared(Shape),
    Dictionary(Box<DictionaryShapes>),
}

/// Reference to one property's shape on an object.
///
/// A dictionary handle is only meaningful for the object that returned it,
/// and only until that object's next mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShapeHandle {
    Shared(Shape),
    Dictionary(DictionaryShape),
}

/// Identity of an object's current layout. Two objects with equal current
/// shapes have the same properties at the same slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CurrentShape {
    Shared(Shape),
    Dictionary(OwnShape),
}

/// Description of one property.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PropertyInfo {
    pub key: PropertyKey,
    /// Value slot, `None` for properties without one.
    pub slot: Option<u32>,
    pub attributes: PropertyAttributes,
    pub flags: ShapeFlags,
    pub short_id: i16,
    pub getter: Option<Accessor>,
    pub setter: Option<Accessor>,
}

/// The fields of a tree shape or dictionary node that describe its property.
#[derive(Debug, Clone, Copy)]
struct PropertyShape {
    base: BaseLayout,
    key: Option<PropertyKey>,
    slot: Option<u32>,
    attrs: PropertyAttributes,
    flags: ShapeFlags,
    short_id: i16,
}

impl PropertyShape {
    fn has_slot(&self) -> bool {
        self.attrs.has_slot() && self.slot.is_some()
    }

    /// The slot if the property has one.
    fn own_slot(&self) -> Option<u32> {
        self.slot.filter(|_| self.attrs.has_slot())
    }
}

#[derive(Debug)]
pub struct NativeObject {
    shape: ObjectShape,
    proto: Option<ObjectRef>,
}

impl NativeObject {
    /// Create an empty object of `class`.
    pub fn new(
        compartment: &mut Compartment,
        class: ClassId,
        proto: Option<ObjectRef>,
        parent: Option<ObjectRef>,
        num_fixed_slots: u32,
    ) -> ShapeResult<Self> {
        let shape = compartment.initial_shape(
            class,
            proto,
            parent,
            num_fixed_slots,
            ObjectFlags::empty(),
        )?;
        Ok(Self::from_shape(shape, proto))
    }

    /// Create an object whose properties are described by `shape`.
    pub fn from_shape(shape: Shape, proto: Option<ObjectRef>) -> Self {
        Self {
            shape: ObjectShape::Shared(shape),
            proto,
        }
    }

    pub fn proto(&self) -> Option<ObjectRef> {
        self.proto
    }

    pub fn in_dictionary_mode(&self) -> bool {
        matches!(self.shape, ObjectShape::Dictionary(_))
    }

    /// The youngest property's shape, or the root if there are none.
    pub fn last_property(&self) -> ShapeHandle {
        match &self.shape {
            ObjectShape::Shared(shape) => ShapeHandle::Shared(*shape),
            ObjectShape::Dictionary(dictionary) => ShapeHandle::Dictionary(dictionary.tail()),
        }
    }

    pub fn current_shape(&self) -> CurrentShape {
        match &self.shape {
            ObjectShape::Shared(shape) => CurrentShape::Shared(*shape),
            ObjectShape::Dictionary(dictionary) => CurrentShape::Dictionary(dictionary.own_shape),
        }
    }

    /// The object's layout: class, parent and object flags.
    pub fn base(&self, agent: &impl AsRef<[ShapeRecord]>) -> BaseLayout {
        match &self.shape {
            ObjectShape::Shared(shape) => shape.get_base(agent),
            ObjectShape::Dictionary(dictionary) => dictionary.base(),
        }
    }

    pub fn class(
        &self,
        agent: &(impl AsRef<[ShapeRecord]> + AsRef<[BaseLayoutRecord]>),
    ) -> ClassId {
        self.base(agent).get_class(agent)
    }

    pub fn parent(
        &self,
        agent: &(impl AsRef<[ShapeRecord]> + AsRef<[BaseLayoutRecord]>),
    ) -> Option<ObjectRef> {
        self.base(agent).get_parent(agent)
    }

    pub fn object_flags(
        &self,
        agent: &(impl AsRef<[ShapeRecord]> + AsRef<[BaseLayoutRecord]>),
    ) -> ObjectFlags {
        self.base(agent).get_flags(agent).object_flags()
    }

    pub fn is_extensible(
        &self,
        agent: &(impl AsRef<[ShapeRecord]> + AsRef<[BaseLayoutRecord]>),
    ) -> bool {
        !self.object_flags(agent).contains(ObjectFlags::NOT_EXTENSIBLE)
    }

    pub fn is_delegate(
        &self,
        agent: &(impl AsRef<[ShapeRecord]> + AsRef<[BaseLayoutRecord]>),
    ) -> bool {
        self.object_flags(agent).contains(ObjectFlags::DELEGATE)
    }

    /// Number of properties.
    pub fn property_count(&self, agent: &impl AsRef<[ShapeRecord]>) -> u32 {
        match &self.shape {
            ObjectShape::Shared(shape) => shape.get_entry_count(agent),
            ObjectShape::Dictionary(dictionary) => dictionary.len(),
        }
    }

    /// One past the highest slot in use.
    pub fn slot_span(&self, agent: &impl AsRef<[ShapeRecord]>) -> u32 {
        match &self.shape {
            ObjectShape::Shared(shape) => shape.get_slot_span(agent),
            ObjectShape::Dictionary(dictionary) => dictionary.slot_span,
        }
    }

    pub fn num_fixed_slots(&self, agent: &impl AsRef<[ShapeRecord]>) -> u32 {
        match &self.shape {
            ObjectShape::Shared(shape) => shape.get_num_fixed_slots(agent),
            ObjectShape::Dictionary(dictionary) => dictionary.num_fixed_slots,
        }
    }

    /// Find the property for `key` without side effects.
    pub fn lookup(
        &self,
        agent: &(impl AsRef<[ShapeRecord]> + AsRef<[BaseLayoutRecord]>),
        key: PropertyKey,
    ) -> Option<ShapeHandle> {
        match &self.shape {
            ObjectShape::Shared(shape) => shape.lookup(agent, key).map(ShapeHandle::Shared),
            ObjectShape::Dictionary(dictionary) => {
                dictionary.lookup(key).map(ShapeHandle::Dictionary)
            }
        }
    }

    /// Find the property for `key`.
    ///
    /// Unlike [`Self::lookup`], repeated searches of a long shared chain
    /// build a property table for it.
    pub fn search(&self, compartment: &mut Compartment, key: PropertyKey) -> Option<ShapeHandle> {
        match &self.shape {
            ObjectShape::Shared(shape) => shape.search(compartment, key).map(ShapeHandle::Shared),
            ObjectShape::Dictionary(dictionary) => {
                dictionary.lookup(key).map(ShapeHandle::Dictionary)
            }
        }
    }

    /// Describe the property of `handle`; `None` for the root.
    pub fn property(
        &self,
        agent: &(impl AsRef<[ShapeRecord]> + AsRef<[BaseLayoutRecord]>),
        handle: ShapeHandle,
    ) -> Option<PropertyInfo> {
        let shape = self.describe(agent, handle);
        let layout = shape.base.get_key(agent);
        Some(PropertyInfo {
            key: shape.key?,
            slot: shape.own_slot(),
            attributes: shape.attrs,
            flags: shape.flags.public_flags(),
            short_id: shape.short_id,
            getter: layout.getter,
            setter: layout.setter,
        })
    }

    /// Iterate over the property shapes from the youngest to the oldest.
    pub fn shapes_from_last<'a>(&'a self, agent: &'a impl AsRef<[ShapeRecord]>) -> ShapeRange<'a> {
        let inner = match &self.shape {
            ObjectShape::Shared(shape) => ShapeRangeInner::Shared {
                shapes: agent.as_ref(),
                cursor: Some(*shape),
            },
            ObjectShape::Dictionary(dictionary) => ShapeRangeInner::Dictionary {
                dictionary,
                cursor: Some(dictionary.tail()),
            },
        };
        ShapeRange { inner }
    }

    /// All properties in insertion order.
    pub fn properties(
        &self,
        agent: &(impl AsRef<[ShapeRecord]> + AsRef<[BaseLayoutRecord]>),
    ) -> Vec<PropertyInfo> {
        let mut properties: Vec<PropertyInfo> = self
            .shapes_from_last(agent)
            .filter_map(|handle| self.property(agent, handle))
            .collect();
        properties.reverse();
        properties
    }

    /// All property keys in insertion order.
    pub fn keys(
        &self,
        agent: &(impl AsRef<[ShapeRecord]> + AsRef<[BaseLayoutRecord]>),
    ) -> Vec<PropertyKey> {
        let mut keys: Vec<PropertyKey> = self
            .shapes_from_last(agent)
            .filter_map(|handle| self.describe(agent, handle).key)
            .collect();
        keys.reverse();
        keys
    }

    /// Move the object's shapes into a private dictionary list.
    pub fn to_dictionary_mode(&mut self, compartment: &mut Compartment) -> ShapeResult<()> {
        if let ObjectShape::Shared(last) = self.shape {
            let dictionary = DictionaryShapes::from_tree(&mut compartment.heap, last)?;
            self.shape = ObjectShape::Dictionary(dictionary);
        }
        Ok(())
    }

    fn describe(
        &self,
        agent: &(impl AsRef<[ShapeRecord]> + AsRef<[BaseLayoutRecord]>),
        handle: ShapeHandle,
    ) -> PropertyShape {
        match (&self.shape, handle) {
            (_, ShapeHandle::Shared(shape)) => {
                let record = shape.get_record(agent);
                PropertyShape {
                    base: record.base,
                    key: record.key,
                    slot: record.slot,
                    attrs: record.attrs,
                    flags: record.flags,
                    short_id: record.short_id,
                }
            }
            (ObjectShape::Dictionary(dictionary), ShapeHandle::Dictionary(node)) => {
                let record = dictionary.get(node);
                PropertyShape {
                    base: record.base,
                    key: record.key,
                    slot: record.slot,
                    attrs: record.attrs,
                    flags: record.flags,
                    short_id: record.short_id,
                }
            }
            (ObjectShape::Shared(_), ShapeHandle::Dictionary(_)) => {
                panic!("Dictionary shape handle used on an object in tree mode")
            }
        }
    }

    pub(crate) fn size_of_excluding_this(&self) -> usize {
        match &self.shape {
            ObjectShape::Shared(_) => 0,
            ObjectShape::Dictionary(dictionary) => {
                size_of::<DictionaryShapes>() + dictionary.size_of_excluding_this()
            }
        }
    }
}

/// Iterator over an object's property shapes, youngest first. The root is
/// not included.
#[derive(Debug)]
pub struct ShapeRange<'a> {
    inner: ShapeRangeInner<'a>,
}

#[derive(Debug)]
enum ShapeRangeInner<'a> {
    Shared {
        shapes: &'a [ShapeRecord],
        cursor: Option<Shape>,
    },
    Dictionary {
        dictionary: &'a DictionaryShapes,
        cursor: Option<DictionaryShape>,
    },
}

impl Iterator for ShapeRange<'_> {
    type Item = ShapeHandle;

    fn next(&mut self) -> Option<ShapeHandle> {
        match &mut self.inner {
            ShapeRangeInner::Shared { shapes, cursor } => {
                let shape = (*cursor)?;
                let record = &shapes[shape.get_index()];
                record.key?;
                *cursor = record.parent;
                Some(ShapeHandle::Shared(shape))
            }
            ShapeRangeInner::Dictionary { dictionary, cursor } => {
                let node = cursor.filter(|node| *node != dictionary.head())?;
                *cursor = dictionary.get(node).previous;
                Some(ShapeHandle::Dictionary(node))
            }
        }
    }
}

impl HeapMarkAndSweep for NativeObject {
    fn mark_values(&self, queues: &mut WorkQueues) {
        match &self.shape {
            ObjectShape::Shared(shape) => shape.mark_values(queues),
            ObjectShape::Dictionary(dictionary) => dictionary.mark_values(queues),
        }
    }

    fn sweep_values(&mut self, compactions: &CompactionLists) {
        match &mut self.shape {
            ObjectShape::Shared(shape) => shape.sweep_values(compactions),
            ObjectShape::Dictionary(dictionary) => dictionary.sweep_values(compactions),
        }
    }
}
