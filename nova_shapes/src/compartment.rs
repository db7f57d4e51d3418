// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use crate::{
    error::ShapeResult,
    heap::{Heap, heap_gc::heap_gc},
    object::NativeObject,
    shape::{BaseLayout, BaseLayoutKey, BaseLayoutRecord, Shape, ShapeRecord, property_table},
    types::{Atom, ClassId, ObjectFlags, ObjectRef, PropertyKey, parse_index},
};

#[derive(Debug, Clone)]
pub struct Options {
    /// Make [`Compartment::gc`] a no-op.
    pub disable_gc: bool,
    /// Tree chains at least this long go to dictionary mode on the next
    /// addition.
    pub max_tree_height: u32,
    /// Linear searches a tree shape allows before it is hashified.
    pub linear_searches_max: u8,
    /// Shortest chain that is worth hashifying.
    pub min_hashify_entries: u32,
    /// Children a shape keeps in a list before switching to a hash table.
    pub max_linear_children: usize,
    /// Byte budget of the compartment's shape data. `None` is unlimited.
    pub heap_limit: Option<usize>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            disable_gc: false,
            max_tree_height: 128,
            linear_searches_max: 24,
            min_hashify_entries: property_table::MIN_ENTRIES,
            max_linear_children: 8,
            heap_limit: None,
        }
    }
}

/// Bytes used by a compartment's shape data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MemoryUsage {
    pub shapes: usize,
    pub base_layouts: usize,
    pub property_tables: usize,
    pub atoms: usize,
}

impl MemoryUsage {
    pub fn total(&self) -> usize {
        self.shapes + self.base_layouts + self.property_tables + self.atoms
    }
}

/// Owner of all shape data shared between objects: the property tree, the
/// interned layouts and the initial shape table.
#[derive(Debug)]
pub struct Compartment {
    pub(crate) options: Options,
    pub(crate) heap: Heap,
}

impl Compartment {
    pub fn new(options: Options) -> Self {
        let heap = Heap::new(options.heap_limit);
        Self { options, heap }
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    /// Intern `name` as a property key. Canonical array index strings become
    /// integer keys.
    pub fn atomize(&mut self, name: &str) -> PropertyKey {
        match parse_index(name) {
            Some(index) => PropertyKey::Integer(index),
            None => PropertyKey::Atom(self.heap.atoms.atomize(name)),
        }
    }

    pub fn atom_str(&self, atom: Atom) -> &str {
        self.heap.atoms.get(atom)
    }

    /// The root shape for new objects with the given class, prototype,
    /// parent, fixed slot count and flags.
    pub fn initial_shape(
        &mut self,
        class: ClassId,
        proto: Option<ObjectRef>,
        parent: Option<ObjectRef>,
        num_fixed_slots: u32,
        flags: ObjectFlags,
    ) -> ShapeResult<Shape> {
        Shape::get_initial_shape(self, class, proto, parent, num_fixed_slots, flags)
    }

    /// Have new objects of the root's kind start out at `shape`.
    pub fn insert_initial_shape(
        &mut self,
        shape: Shape,
        proto: Option<ObjectRef>,
    ) -> ShapeResult<()> {
        Shape::insert_initial_shape(self, shape, proto)
    }

    pub fn get_unowned(&mut self, mut key: BaseLayoutKey) -> ShapeResult<BaseLayout> {
        key.update_getter_setter(key.getter, key.setter);
        self.heap.get_unowned(key)
    }

    /// Collect the shapes and layouts not reachable from `roots`.
    ///
    /// Every handle into the compartment held outside of `roots` is
    /// invalidated.
    pub fn gc<'a>(&mut self, roots: impl IntoIterator<Item = &'a mut NativeObject>) {
        if self.options.disable_gc {
            return;
        }
        let mut roots: Vec<&mut NativeObject> = roots.into_iter().collect();
        heap_gc(&mut self.heap, &mut roots);
    }

    /// Number of completed collections.
    pub fn gc_number(&self) -> u32 {
        self.heap.gc_number
    }

    /// Properties removed from objects in this compartment.
    pub fn property_removals(&self) -> u64 {
        self.heap.property_removals
    }

    pub fn shape_count(&self) -> usize {
        self.heap.shapes.len()
    }

    pub fn base_layout_count(&self) -> usize {
        self.heap.base_layouts.len()
    }

    pub fn initial_shape_count(&self) -> usize {
        self.heap.initial_shapes.len()
    }

    pub fn heap_used(&self) -> usize {
        self.heap.budget.used()
    }

    pub fn set_heap_limit(&mut self, limit: Option<usize>) {
        self.options.heap_limit = limit;
        self.heap.budget.set_limit(limit);
    }

    pub fn memory_usage(&self) -> MemoryUsage {
        let heap = &self.heap;
        MemoryUsage {
            shapes: heap.shapes.capacity() * size_of::<ShapeRecord>()
                + heap.shape_children.capacity() * size_of::<crate::shape::ShapeChildren>(),
            base_layouts: heap.base_layouts.capacity() * size_of::<BaseLayoutRecord>(),
            property_tables: heap.size_of_tables(),
            atoms: heap.atoms.size_of_excluding_this(),
        }
    }
}

impl AsRef<[ShapeRecord]> for Compartment {
    fn as_ref(&self) -> &[ShapeRecord] {
        &self.heap.shapes
    }
}

impl AsRef<[BaseLayoutRecord]> for Compartment {
    fn as_ref(&self) -> &[BaseLayoutRecord] {
        &self.heap.base_layouts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_names_become_integer_keys() {
        let mut compartment = Compartment::new(Options::default());
        assert_eq!(compartment.atomize("7"), PropertyKey::Integer(7));
        let PropertyKey::Atom(atom) = compartment.atomize("07") else {
            panic!("leading zero is not an index");
        };
        assert_eq!(compartment.atom_str(atom), "07");
        assert_eq!(compartment.atomize("07"), PropertyKey::Atom(atom));
    }

    #[test]
    fn memory_usage_grows_with_tables() {
        let mut compartment = Compartment::new(Options::default());
        let before = compartment.memory_usage();
        assert_eq!(before.property_tables, 0);
        compartment
            .initial_shape(ClassId(0), None, None, 0, ObjectFlags::empty())
            .unwrap();
        assert!(compartment.shape_count() == 1);
        assert!(compartment.base_layout_count() == 1);
        assert!(compartment.memory_usage().total() > 0);
    }
}
