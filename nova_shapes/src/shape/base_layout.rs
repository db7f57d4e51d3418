// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use core::num::NonZeroU32;

use ahash::AHashMap;
use tracing::trace;

use super::{PropertyTable, Shape};
use crate::{
    error::ShapeResult,
    heap::{
        CreateHeapData, Heap,
        heap_bits::{
            CompactionLists, HeapMarkAndSweep, HeapSweepWeakReference, WeakReference, WorkQueues,
        },
    },
    types::{Accessor, ClassId, ObjectFlags, ObjectRef},
};

/// Handle to the layout data shared by a run of shapes: class, parent,
/// object flags and accessor pair.
///
/// A layout is either unowned, in which case it is interned and compared by
/// identity, or owned by exactly one shape, in which case it also carries
/// that shape's property table and points at its unowned twin.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BaseLayout(NonZeroU32);

impl BaseLayout {
    #[inline(always)]
    pub(crate) fn get_index(self) -> usize {
        self.0.get().wrapping_sub(1) as usize
    }

    pub(crate) fn last(layouts: &[BaseLayoutRecord]) -> Self {
        debug_assert!(!layouts.is_empty());
        // SAFETY: The layouts list is not empty.
        Self(unsafe { NonZeroU32::new_unchecked(layouts.len() as u32) })
    }

    pub fn get_key(self, agent: &impl AsRef<[BaseLayoutRecord]>) -> BaseLayoutKey {
        agent.as_ref()[self.get_index()].key
    }

    pub fn get_class(self, agent: &impl AsRef<[BaseLayoutRecord]>) -> ClassId {
        self.get_key(agent).class
    }

    pub fn get_parent(self, agent: &impl AsRef<[BaseLayoutRecord]>) -> Option<ObjectRef> {
        self.get_key(agent).parent
    }

    pub fn get_flags(self, agent: &impl AsRef<[BaseLayoutRecord]>) -> ObjectFlags {
        self.get_key(agent).flags
    }

    pub fn get_getter(self, agent: &impl AsRef<[BaseLayoutRecord]>) -> Option<Accessor> {
        self.get_key(agent).getter
    }

    pub fn get_setter(self, agent: &impl AsRef<[BaseLayoutRecord]>) -> Option<Accessor> {
        self.get_key(agent).setter
    }

    pub fn is_owned(self, agent: &impl AsRef<[BaseLayoutRecord]>) -> bool {
        agent.as_ref()[self.get_index()].owned.is_some()
    }

    /// The interned layout equal to this one.
    pub fn to_unowned(self, agent: &impl AsRef<[BaseLayoutRecord]>) -> BaseLayout {
        match &agent.as_ref()[self.get_index()].owned {
            Some(owned) => owned.unowned,
            None => self,
        }
    }

    pub fn get_table(
        self,
        agent: &impl AsRef<[BaseLayoutRecord]>,
    ) -> Option<&PropertyTable<Shape>> {
        agent.as_ref()[self.get_index()]
            .owned
            .as_ref()
            .map(|owned| &owned.table)
    }
}

/// Identity of an unowned layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BaseLayoutKey {
    pub class: ClassId,
    pub parent: Option<ObjectRef>,
    pub flags: ObjectFlags,
    pub getter: Option<Accessor>,
    pub setter: Option<Accessor>,
}

impl BaseLayoutKey {
    pub fn new(class: ClassId, parent: Option<ObjectRef>, flags: ObjectFlags) -> Self {
        Self {
            class,
            parent,
            flags: flags.object_flags(),
            getter: None,
            setter: None,
        }
    }

    pub fn with_accessors(mut self, getter: Option<Accessor>, setter: Option<Accessor>) -> Self {
        self.update_getter_setter(getter, setter);
        self
    }

    /// Replace the accessor pair, keeping the accessor-object flags in sync.
    pub(crate) fn update_getter_setter(
        &mut self,
        getter: Option<Accessor>,
        setter: Option<Accessor>,
    ) {
        let getter = Accessor::normalize(getter);
        let setter = Accessor::normalize(setter);
        self.flags.set(
            ObjectFlags::HAS_GETTER_OBJECT,
            getter.is_some_and(Accessor::is_object),
        );
        self.flags.set(
            ObjectFlags::HAS_SETTER_OBJECT,
            setter.is_some_and(Accessor::is_object),
        );
        self.getter = getter;
        self.setter = setter;
    }

    pub(crate) fn matches_getter_setter(
        &self,
        getter: Option<Accessor>,
        setter: Option<Accessor>,
    ) -> bool {
        self.getter == Accessor::normalize(getter) && self.setter == Accessor::normalize(setter)
    }
}

#[derive(Debug)]
pub struct BaseLayoutRecord {
    pub(crate) key: BaseLayoutKey,
    pub(crate) owned: Option<Box<OwnedBaseLayout>>,
}

/// Data only an owned layout has.
#[derive(Debug)]
pub(crate) struct OwnedBaseLayout {
    pub(crate) unowned: BaseLayout,
    pub(crate) table: PropertyTable<Shape>,
}

impl BaseLayoutRecord {
    pub(crate) fn create_unowned(key: BaseLayoutKey) -> Self {
        Self { key, owned: None }
    }

    pub(crate) fn create_owned(
        unowned: BaseLayout,
        key: BaseLayoutKey,
        table: PropertyTable<Shape>,
    ) -> Self {
        Self {
            key,
            owned: Some(Box::new(OwnedBaseLayout { unowned, table })),
        }
    }

    pub(crate) fn size_of_excluding_this(&self) -> usize {
        self.owned.as_ref().map_or(0, |owned| {
            size_of::<OwnedBaseLayout>() + owned.table.size_of_excluding_this()
        })
    }
}

/// Interning set of unowned layouts.
///
/// > NOTE: The layouts are weakly held. An entry whose layout was not marked
/// > by any shape is dropped from the set during collection.
#[derive(Debug, Default)]
#[repr(transparent)]
pub(crate) struct BaseLayoutSet {
    table: AHashMap<BaseLayoutKey, WeakReference<BaseLayout>>,
}

impl BaseLayoutSet {
    pub(crate) fn lookup(&self, key: &BaseLayoutKey) -> Option<BaseLayout> {
        self.table.get(key).map(|layout| layout.0)
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.table.len()
    }
}

impl Heap {
    /// Find or create the unowned layout for `key`.
    pub(crate) fn get_unowned(&mut self, key: BaseLayoutKey) -> ShapeResult<BaseLayout> {
        debug_assert_eq!(key.getter, Accessor::normalize(key.getter));
        debug_assert_eq!(key.setter, Accessor::normalize(key.setter));
        if let Some(layout) = self.base_layout_set.lookup(&key) {
            return Ok(layout);
        }
        self.base_layout_set.table.try_reserve(1)?;
        let layout = self.create(BaseLayoutRecord::create_unowned(key))?;
        self.base_layout_set
            .table
            .insert(key, WeakReference(layout));
        trace!(?layout, ?key, "Interned base layout");
        Ok(layout)
    }
}

impl HeapMarkAndSweep for BaseLayout {
    fn mark_values(&self, queues: &mut WorkQueues) {
        queues.base_layouts.push(*self);
    }

    fn sweep_values(&mut self, compactions: &CompactionLists) {
        compactions
            .base_layouts
            .shift_non_zero_u32_index(&mut self.0);
    }
}

impl HeapSweepWeakReference for BaseLayout {
    fn sweep_weak_reference(self, compactions: &CompactionLists) -> Option<Self> {
        compactions
            .base_layouts
            .shift_weak_non_zero_u32_index(self.0)
            .map(Self)
    }
}

impl HeapMarkAndSweep for BaseLayoutRecord {
    fn mark_values(&self, queues: &mut WorkQueues) {
        if let Some(owned) = &self.owned {
            owned.unowned.mark_values(queues);
            owned.table.mark_values(queues);
        }
    }

    fn sweep_values(&mut self, compactions: &CompactionLists) {
        if let Some(owned) = &mut self.owned {
            owned.unowned.sweep_values(compactions);
            owned.table.sweep_values(compactions);
        }
    }
}

impl HeapMarkAndSweep for BaseLayoutSet {
    fn mark_values(&self, _queues: &mut WorkQueues) {
        // NOTE: values are weakly held; we do not mark them.
    }

    fn sweep_values(&mut self, compactions: &CompactionLists) {
        self.table.retain(|_, layout| {
            let Some(new_layout) = layout.0.sweep_weak_reference(compactions) else {
                return false;
            };
            layout.0 = new_layout;
            true
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::NativeAccessor;

    #[test]
    fn unowned_layouts_are_interned() {
        let mut heap = Heap::new(None);
        let key = BaseLayoutKey::new(ClassId(1), None, ObjectFlags::empty());
        let a = heap.get_unowned(key).unwrap();
        let b = heap.get_unowned(key).unwrap();
        assert_eq!(a, b);
        assert_eq!(heap.base_layout_set.len(), 1);

        let delegate = BaseLayoutKey::new(ClassId(1), None, ObjectFlags::DELEGATE);
        let c = heap.get_unowned(delegate).unwrap();
        assert_ne!(a, c);
        assert_eq!(c.get_flags(&heap), ObjectFlags::DELEGATE);
        assert!(!c.is_owned(&heap));
        assert_eq!(c.to_unowned(&heap), c);
    }

    #[test]
    fn accessor_objects_set_flags() {
        let getter = Some(Accessor::Object(ObjectRef::from_u32(9).unwrap()));
        let setter = Some(Accessor::Native(NativeAccessor(3)));
        let key = BaseLayoutKey::new(ClassId(0), None, ObjectFlags::empty())
            .with_accessors(getter, setter);
        assert!(key.flags.contains(ObjectFlags::HAS_GETTER_OBJECT));
        assert!(!key.flags.contains(ObjectFlags::HAS_SETTER_OBJECT));
        assert!(key.matches_getter_setter(getter, setter));

        let cleared = key.with_accessors(Some(Accessor::Stub), None);
        assert_eq!(cleared.getter, None);
        assert!(!cleared.flags.contains(ObjectFlags::HAS_GETTER_OBJECT));
        assert!(cleared.matches_getter_setter(None, Some(Accessor::Stub)));
    }

    #[test]
    fn accessor_flags_are_dropped_from_new_keys() {
        let key = BaseLayoutKey::new(
            ClassId(0),
            None,
            ObjectFlags::INDEXED | ObjectFlags::HAS_SETTER_OBJECT,
        );
        assert_eq!(key.flags, ObjectFlags::INDEXED);
    }
}
