// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Adding, changing and removing properties.
//!
//! Every operation does all of its fallible work before the first visible
//! change, so an error leaves the object and the compartment as they were.

use tracing::trace;

use super::{NativeObject, ObjectShape, PropertyShape, ShapeHandle};
use crate::{
    compartment::Compartment,
    error::{ShapeError, ShapeResult},
    shape::{
        BaseLayout, BaseLayoutKey, ChildShape, DictionaryShapeRecord, SHAPE_MAXIMUM_SLOT, Shape,
    },
    types::{Accessor, ObjectFlags, ObjectRef, PropertyAttributes, PropertyKey, ShapeFlags},
};

/// Everything but the key that describes a property being defined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PropertyDefinition {
    pub getter: Option<Accessor>,
    pub setter: Option<Accessor>,
    /// Requested slot. `None` lets the object pick one if the property
    /// needs it.
    pub slot: Option<u32>,
    pub attrs: PropertyAttributes,
    pub flags: ShapeFlags,
    pub short_id: i16,
}

impl PropertyDefinition {
    /// A data property with the given attributes.
    pub fn data(attrs: PropertyAttributes) -> Self {
        Self {
            attrs,
            ..Default::default()
        }
    }

    /// An accessor property. Accessor properties have no slot.
    pub fn accessor(
        getter: Option<Accessor>,
        setter: Option<Accessor>,
        attrs: PropertyAttributes,
    ) -> Self {
        Self {
            getter,
            setter,
            attrs: attrs | PropertyAttributes::SHARED,
            ..Default::default()
        }
    }

    pub fn with_slot(self, slot: u32) -> Self {
        Self {
            slot: Some(slot),
            ..self
        }
    }

    pub fn with_short_id(self, short_id: i16) -> Self {
        Self { short_id, ..self }
    }

    fn normalize(mut self) -> Self {
        self.getter = Accessor::normalize(self.getter);
        self.setter = Accessor::normalize(self.setter);
        self.flags = self.flags.public_flags();
        if self.short_id != 0 {
            self.flags |= ShapeFlags::HAS_SHORTID;
        }
        if !self.attrs.has_slot() {
            self.slot = None;
        }
        self
    }
}

/// A non-configurable property stays non-configurable, and a
/// non-configurable data property with a slot keeps its slot.
fn check_can_change_attrs(
    key: PropertyKey,
    current: &PropertyShape,
    attrs: PropertyAttributes,
) -> ShapeResult<()> {
    if current.attrs.is_configurable() {
        return Ok(());
    }
    if !attrs.contains(PropertyAttributes::PERMANENT) {
        return Err(ShapeError::NotConfigurable { key });
    }
    if current.attrs.is_data_descriptor()
        && current.has_slot()
        && attrs.intersects(
            PropertyAttributes::GETTER | PropertyAttributes::SETTER | PropertyAttributes::SHARED,
        )
    {
        return Err(ShapeError::NotConfigurable { key });
    }
    Ok(())
}

/// Get or create the tree child of `parent` for `child`, picking a slot if
/// the child needs one and has none.
fn get_tree_child(
    compartment: &mut Compartment,
    parent: Shape,
    mut child: ChildShape,
) -> ShapeResult<Shape> {
    if !child.attrs.has_slot() {
        child.slot = parent.get_maybe_slot(&*compartment);
    } else {
        let slot = child
            .slot
            .unwrap_or_else(|| parent.get_slot_span(&*compartment));
        if slot >= SHAPE_MAXIMUM_SLOT {
            return Err(ShapeError::OutOfMemory);
        }
        child.slot = Some(slot);
    }
    let num_fixed_slots = parent.get_num_fixed_slots(&*compartment);
    parent.get_child(compartment, num_fixed_slots, &child)
}

impl NativeObject {
    /// Add a property that the object does not have yet.
    ///
    /// Adding a key the object already has replaces the old property, which
    /// moves the key to the end of the enumeration order.
    pub fn add_property(
        &mut self,
        compartment: &mut Compartment,
        key: PropertyKey,
        definition: PropertyDefinition,
    ) -> ShapeResult<ShapeHandle> {
        if !self.is_extensible(&*compartment) {
            return Err(ShapeError::NotExtensible { key });
        }
        let handle = self.add_property_internal(compartment, key, definition.normalize())?;
        self.check_shape_consistency(compartment);
        Ok(handle)
    }

    /// Define a property, adding it if missing and updating it otherwise.
    ///
    /// Updating with parameters equal to the current ones returns the
    /// current shape. When no slot is requested for a property that needs
    /// one, the property's current slot is kept.
    pub fn put_property(
        &mut self,
        compartment: &mut Compartment,
        key: PropertyKey,
        definition: PropertyDefinition,
    ) -> ShapeResult<ShapeHandle> {
        let definition = definition.normalize();
        let Some(handle) = self.search(compartment, key) else {
            if !self.is_extensible(&*compartment) {
                return Err(ShapeError::NotExtensible { key });
            }
            let handle = self.add_property_internal(compartment, key, definition)?;
            self.check_shape_consistency(compartment);
            return Ok(handle);
        };
        let handle = self.put_existing_property(compartment, key, handle, definition)?;
        self.check_shape_consistency(compartment);
        Ok(handle)
    }

    /// Change the attributes and accessors of the property at `handle`.
    ///
    /// The bits of the current attributes selected by `mask` are kept.
    pub fn change_property(
        &mut self,
        compartment: &mut Compartment,
        handle: ShapeHandle,
        attrs: PropertyAttributes,
        mask: PropertyAttributes,
        getter: Option<Accessor>,
        setter: Option<Accessor>,
    ) -> ShapeResult<ShapeHandle> {
        let current = self.describe(&*compartment, handle);
        let Some(key) = current.key else {
            unreachable!("Cannot change the root shape");
        };
        let attrs = attrs | (current.attrs & mask);
        let getter = Accessor::normalize(getter);
        let setter = Accessor::normalize(setter);
        check_can_change_attrs(key, &current, attrs)?;

        let layout = current.base.get_key(&*compartment);
        if current.attrs == attrs && layout.getter == getter && layout.setter == setter {
            return Ok(handle);
        }
        let definition = PropertyDefinition {
            getter,
            setter,
            slot: current.own_slot(),
            attrs,
            flags: current.flags,
            short_id: current.short_id,
        };
        self.put_property(compartment, key, definition)
    }

    /// Remove the property for `key`. Removing a missing key succeeds.
    pub fn remove_property(
        &mut self,
        compartment: &mut Compartment,
        key: PropertyKey,
    ) -> ShapeResult<()> {
        let Some(handle) = self.search(compartment, key) else {
            return Ok(());
        };
        if let ObjectShape::Shared(last) = self.shape {
            if handle != ShapeHandle::Shared(last) || !can_remove_last_property(compartment, last) {
                self.to_dictionary_mode(compartment)?;
            }
        }

        match &mut self.shape {
            ObjectShape::Shared(last) => {
                let Some(parent) = last.get_parent(&*compartment) else {
                    unreachable!("Cannot remove the root shape");
                };
                if last.has_slot(&*compartment) {
                    compartment.heap.property_removals += 1;
                }
                trace!(shape = ?*last, ?parent, ?key, "Removed last property");
                *last = parent;
            }
            ObjectShape::Dictionary(dictionary) => {
                let Some(node) = dictionary.lookup(key) else {
                    unreachable!("Dictionary is missing a property found by search");
                };
                dictionary.reserve_removal()?;
                let tail = dictionary.tail();
                let previous_base = if node == tail {
                    let Some(previous) = dictionary.get(node).previous else {
                        unreachable!("Dictionary list head cannot be removed");
                    };
                    let object_layout = dictionary.get(tail).base.get_key(&*compartment);
                    let previous_layout = dictionary.get(previous).base.get_key(&*compartment);
                    let layout = BaseLayoutKey::new(
                        object_layout.class,
                        object_layout.parent,
                        object_layout.flags,
                    )
                    .with_accessors(previous_layout.getter, previous_layout.setter);
                    Some(compartment.heap.get_unowned(layout)?)
                } else {
                    None
                };

                let record = dictionary.get(node);
                if let Some(slot) = record.slot.filter(|_| record.has_slot()) {
                    dictionary.free_slot(slot);
                    compartment.heap.property_removals += 1;
                }
                let table_slot = dictionary.table.search(key, false);
                dictionary.table.remove(table_slot);
                dictionary.unlink(node);
                if let Some(base) = previous_base {
                    let tail = dictionary.tail();
                    dictionary.get_mut(tail).base = base;
                }
                dictionary.generate_own_shape(&mut compartment.heap);
                dictionary.table.maybe_shrink(&mut compartment.heap.budget);
                trace!(?node, ?key, "Removed dictionary property");
            }
        }
        self.check_shape_consistency(compartment);
        Ok(())
    }

    /// Set object-level `flags` on the object's layout.
    pub fn set_flag(
        &mut self,
        compartment: &mut Compartment,
        flags: ObjectFlags,
    ) -> ShapeResult<()> {
        let mut layout = self.base(&*compartment).get_key(&*compartment);
        let flags = flags.object_flags();
        if layout.flags.contains(flags) {
            return Ok(());
        }
        layout.flags |= flags;
        self.replace_layout(compartment, layout)
    }

    /// Forbid adding properties to the object.
    pub fn prevent_extensions(&mut self, compartment: &mut Compartment) -> ShapeResult<()> {
        self.set_flag(compartment, ObjectFlags::NOT_EXTENSIBLE)
    }

    /// Mark the object as used as a prototype.
    pub fn set_delegate(&mut self, compartment: &mut Compartment) -> ShapeResult<()> {
        self.set_flag(compartment, ObjectFlags::DELEGATE)
    }

    pub fn set_parent(
        &mut self,
        compartment: &mut Compartment,
        parent: Option<ObjectRef>,
    ) -> ShapeResult<()> {
        let mut layout = self.base(&*compartment).get_key(&*compartment);
        if layout.parent == parent {
            return Ok(());
        }
        layout.parent = parent;
        self.replace_layout(compartment, layout)
    }

    /// Remove every property, keeping the object's class, parent and flags.
    pub fn clear(&mut self, compartment: &mut Compartment) -> ShapeResult<()> {
        let layout = self.base(&*compartment).get_key(&*compartment);
        let proto = self.proto;
        match &mut self.shape {
            ObjectShape::Shared(last) => {
                let num_fixed_slots = last.get_num_fixed_slots(&*compartment);
                let initial = Shape::get_initial_shape(
                    compartment,
                    layout.class,
                    proto,
                    layout.parent,
                    num_fixed_slots,
                    layout.flags,
                )?;
                *last = initial.get_root(&*compartment);
            }
            ObjectShape::Dictionary(dictionary) => {
                let base = compartment.heap.get_unowned(BaseLayoutKey::new(
                    layout.class,
                    layout.parent,
                    layout.flags,
                ))?;
                dictionary.clear();
                let head = dictionary.head();
                dictionary.get_mut(head).base = base;
                dictionary.generate_own_shape(&mut compartment.heap);
            }
        }
        compartment.heap.property_removals += 1;
        self.check_shape_consistency(compartment);
        Ok(())
    }

    /// Remove the youngest properties until the slot span is at most
    /// `slot_span`.
    ///
    /// Objects in dictionary mode are left as they are.
    pub fn rollback_properties(&mut self, compartment: &Compartment, slot_span: u32) {
        let ObjectShape::Shared(last) = &mut self.shape else {
            return;
        };
        while last.get_slot_span(compartment) > slot_span {
            let Some(parent) = last.get_parent(compartment) else {
                break;
            };
            *last = parent;
        }
        self.check_shape_consistency(compartment);
    }

    fn add_property_internal(
        &mut self,
        compartment: &mut Compartment,
        key: PropertyKey,
        mut definition: PropertyDefinition,
    ) -> ShapeResult<ShapeHandle> {
        let existing = self.search(compartment, key);
        if let Some(handle) = existing {
            let current = self.describe(&*compartment, handle);
            check_can_change_attrs(key, &current, definition.attrs)?;
            if !current.attrs.is_configurable() && definition.attrs.has_slot() {
                definition.slot = definition.slot.or(current.own_slot());
            }
        }
        if let ObjectShape::Shared(last) = self.shape {
            let last_slot = last.get_maybe_slot(&*compartment);
            let stable_slot = match (definition.slot, last_slot) {
                (None, _) | (_, None) => true,
                (Some(slot), Some(last_slot)) => Some(slot) == last_slot.checked_add(1),
            };
            let too_tall =
                last.get_entry_count(&*compartment) >= compartment.options.max_tree_height;
            if !stable_slot || too_tall || existing.is_some() {
                self.to_dictionary_mode(compartment)?;
            }
        }
        if let ObjectShape::Dictionary(dictionary) = &mut self.shape {
            if dictionary.table.needs_to_grow() {
                dictionary.table.grow(&mut compartment.heap.budget)?;
            }
        }

        let last_base = self.base(&*compartment);
        let mut layout = last_base.get_key(&*compartment);
        let base = if layout.matches_getter_setter(definition.getter, definition.setter)
            && !key.is_index()
        {
            last_base.to_unowned(&*compartment)
        } else {
            layout.update_getter_setter(definition.getter, definition.setter);
            if key.is_index() {
                layout.flags |= ObjectFlags::INDEXED;
            }
            compartment.heap.get_unowned(layout)?
        };

        let child = ChildShape {
            base,
            key,
            slot: definition.slot,
            attrs: definition.attrs,
            flags: definition.flags,
            short_id: definition.short_id,
        };
        self.get_child_property(compartment, child)
    }

    /// Append `child` to the object.
    fn get_child_property(
        &mut self,
        compartment: &mut Compartment,
        mut child: ChildShape,
    ) -> ShapeResult<ShapeHandle> {
        match &mut self.shape {
            ObjectShape::Shared(last) => {
                let shape = get_tree_child(compartment, *last, child)?;
                *last = shape;
                Ok(ShapeHandle::Shared(shape))
            }
            ObjectShape::Dictionary(dictionary) => {
                dictionary.reserve_node(&mut compartment.heap.budget)?;
                let replaced = dictionary.lookup(child.key);
                if replaced.is_some() {
                    dictionary.reserve_removal()?;
                }
                if !child.attrs.has_slot() {
                    child.slot = None;
                } else if let Some(slot) = child.slot {
                    if slot >= SHAPE_MAXIMUM_SLOT {
                        return Err(ShapeError::OutOfMemory);
                    }
                } else {
                    child.slot = Some(dictionary.alloc_slot()?);
                }

                let node = dictionary.append(DictionaryShapeRecord {
                    base: child.base,
                    key: Some(child.key),
                    slot: child.slot,
                    attrs: child.attrs,
                    flags: child.flags,
                    short_id: child.short_id,
                    previous: None,
                    next: None,
                });
                if let Some(slot) = child.slot {
                    dictionary.slot_span = dictionary.slot_span.max(slot + 1);
                }
                if let Some(replaced) = replaced {
                    let record = dictionary.get(replaced);
                    if let Some(slot) = record.slot.filter(|_| record.has_slot()) {
                        if child.slot != Some(slot) {
                            dictionary.free_slot(slot);
                        }
                    }
                    dictionary.unlink(replaced);
                }
                let table_slot = dictionary.table.search(child.key, true);
                dictionary.table.store(table_slot, child.key, node);
                dictionary.generate_own_shape(&mut compartment.heap);
                trace!(?node, key = ?child.key, "Appended dictionary property");
                Ok(ShapeHandle::Dictionary(node))
            }
        }
    }

    fn put_existing_property(
        &mut self,
        compartment: &mut Compartment,
        key: PropertyKey,
        mut handle: ShapeHandle,
        definition: PropertyDefinition,
    ) -> ShapeResult<ShapeHandle> {
        let current = self.describe(&*compartment, handle);
        check_can_change_attrs(key, &current, definition.attrs)?;

        let has_slot = definition.attrs.has_slot();
        let mut slot = definition.slot;
        if has_slot && slot.is_none() {
            slot = current.own_slot();
        }

        let mut layout = self.base(&*compartment).get_key(&*compartment);
        layout.update_getter_setter(definition.getter, definition.setter);
        if key.is_index() {
            layout.flags |= ObjectFlags::INDEXED;
        }
        let base = compartment.heap.get_unowned(layout)?;

        if current.base.to_unowned(&*compartment) == base
            && current.own_slot() == slot
            && current.attrs == definition.attrs
            && current.flags.public_flags() == definition.flags
            && current.short_id == definition.short_id
        {
            return Ok(handle);
        }

        if let ObjectShape::Shared(last) = self.shape {
            if handle != ShapeHandle::Shared(last) {
                self.to_dictionary_mode(compartment)?;
                let Some(node) = self.lookup(&*compartment, key) else {
                    unreachable!("Dictionary conversion lost a property");
                };
                handle = node;
            }
        }

        let new_handle = match &mut self.shape {
            ObjectShape::Dictionary(dictionary) => {
                let ShapeHandle::Dictionary(node) = handle else {
                    unreachable!("Shared handle for an object in dictionary mode");
                };
                let frees_slot = current.has_slot() && !has_slot;
                if frees_slot {
                    dictionary.reserve_removal()?;
                }
                if has_slot && slot.is_none() {
                    slot = Some(dictionary.alloc_slot()?);
                }
                if let Some(slot) = slot {
                    if slot >= SHAPE_MAXIMUM_SLOT {
                        return Err(ShapeError::OutOfMemory);
                    }
                    dictionary.slot_span = dictionary.slot_span.max(slot + 1);
                }
                let record = dictionary.get_mut(node);
                record.base = base;
                record.slot = slot;
                record.attrs = definition.attrs;
                record.flags = definition.flags | ShapeFlags::IN_DICTIONARY;
                record.short_id = definition.short_id;
                if frees_slot {
                    if let Some(old_slot) = current.own_slot() {
                        dictionary.free_slot(old_slot);
                    }
                }
                dictionary.generate_own_shape(&mut compartment.heap);
                ShapeHandle::Dictionary(node)
            }
            ObjectShape::Shared(last) => {
                let Some(parent) = last.get_parent(&*compartment) else {
                    unreachable!("Cannot put the root shape");
                };
                let child = ChildShape {
                    base,
                    key,
                    slot,
                    attrs: definition.attrs,
                    flags: definition.flags,
                    short_id: definition.short_id,
                };
                let shape = get_tree_child(compartment, parent, child)?;
                *last = shape;
                ShapeHandle::Shared(shape)
            }
        };

        if current.has_slot() && !has_slot {
            compartment.heap.property_removals += 1;
        }
        trace!(?key, from = ?handle, to = ?new_handle, "Updated property");
        Ok(new_handle)
    }

    /// Replace the layout of the object with the unowned layout for
    /// `layout`.
    fn replace_layout(
        &mut self,
        compartment: &mut Compartment,
        layout: BaseLayoutKey,
    ) -> ShapeResult<()> {
        let proto = self.proto;
        match &mut self.shape {
            ObjectShape::Shared(last) => {
                *last = last.replace_last_property(compartment, layout, proto)?;
            }
            ObjectShape::Dictionary(dictionary) => {
                let base: BaseLayout = compartment.heap.get_unowned(layout)?;
                let tail = dictionary.tail();
                dictionary.get_mut(tail).base = base;
                dictionary.generate_own_shape(&mut compartment.heap);
            }
        }
        self.check_shape_consistency(compartment);
        Ok(())
    }

    #[cfg(debug_assertions)]
    fn check_shape_consistency(&self, compartment: &Compartment) {
        match &self.shape {
            ObjectShape::Shared(last) => {
                let mut current = Some(*last);
                while let Some(shape) = current {
                    let record = shape.get_record(compartment);
                    if let Some(slot) = record.slot.filter(|_| record.has_slot()) {
                        assert!(slot < record.slot_span);
                    }
                    current = record.parent;
                    if let Some(parent) = current {
                        let parent_record = parent.get_record(compartment);
                        assert_eq!(parent_record.entry_count + 1, record.entry_count);
                        assert!(parent_record.slot_span <= record.slot_span);
                    }
                }
            }
            ObjectShape::Dictionary(dictionary) => dictionary.check_consistency(),
        }
    }

    #[cfg(not(debug_assertions))]
    fn check_shape_consistency(&self, _compartment: &Compartment) {}
}

/// The last shape can be retracted to its parent when the parent carries the
/// same object-level layout.
fn can_remove_last_property(compartment: &Compartment, last: Shape) -> bool {
    let Some(parent) = last.get_parent(compartment) else {
        return false;
    };
    let last_layout = last.get_base(compartment).get_key(compartment);
    let parent_layout = parent.get_base(compartment).get_key(compartment);
    last_layout.parent == parent_layout.parent
        && last_layout.flags.object_flags() == parent_layout.flags.object_flags()
}
