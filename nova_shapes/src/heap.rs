// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

mod budget;
pub(crate) mod heap_bits;
pub(crate) mod heap_gc;

pub use budget::HeapBudget;
pub(crate) use budget::try_reserve;

use crate::{
    error::ShapeResult,
    shape::{
        BaseLayout, BaseLayoutRecord, BaseLayoutSet, InitialShapeTable, Shape, ShapeChildren,
        ShapeRecord,
    },
    types::AtomTable,
};

/// Arena storage of a compartment.
///
/// Shapes and base layouts live in vectors and are referred to by index
/// handles; the collector compacts the vectors and rewrites the handles.
#[derive(Debug)]
pub(crate) struct Heap {
    pub(crate) shapes: Vec<ShapeRecord>,
    /// Child registries, parallel to `shapes`.
    pub(crate) shape_children: Vec<ShapeChildren>,
    pub(crate) base_layouts: Vec<BaseLayoutRecord>,
    pub(crate) base_layout_set: BaseLayoutSet,
    pub(crate) initial_shapes: InitialShapeTable,
    pub(crate) atoms: AtomTable,
    pub(crate) budget: HeapBudget,
    pub(crate) hasher: ahash::RandomState,
    pub(crate) next_own_shape: u64,
    pub(crate) property_removals: u64,
    pub(crate) gc_number: u32,
}

/// Allocate `T` on the heap and return its handle `F`.
pub(crate) trait CreateHeapData<T, F> {
    fn create(&mut self, data: T) -> ShapeResult<F>;
}

impl Heap {
    pub(crate) fn new(heap_limit: Option<usize>) -> Self {
        Self {
            shapes: Vec::with_capacity(256),
            shape_children: Vec::with_capacity(256),
            base_layouts: Vec::with_capacity(32),
            base_layout_set: BaseLayoutSet::default(),
            initial_shapes: InitialShapeTable::default(),
            atoms: AtomTable::default(),
            budget: HeapBudget::new(heap_limit),
            hasher: ahash::RandomState::new(),
            next_own_shape: 0,
            property_removals: 0,
            gc_number: 0,
        }
    }

    /// Bytes held by the arenas and the tables of owned layouts.
    pub(crate) fn size_of_arenas(&self) -> usize {
        self.shapes.len() * (size_of::<ShapeRecord>() + size_of::<ShapeChildren>())
            + self.base_layouts.len() * size_of::<BaseLayoutRecord>()
            + self.size_of_tables()
    }

    pub(crate) fn size_of_tables(&self) -> usize {
        self.base_layouts
            .iter()
            .map(BaseLayoutRecord::size_of_excluding_this)
            .sum()
    }
}

impl CreateHeapData<ShapeRecord, Shape> for Heap {
    fn create(&mut self, data: ShapeRecord) -> ShapeResult<Shape> {
        try_reserve(&mut self.shapes, 1, &mut self.budget)?;
        if let Err(err) = try_reserve(&mut self.shape_children, 1, &mut self.budget) {
            self.budget.release(size_of::<ShapeRecord>());
            return Err(err);
        }
        self.shapes.push(data);
        self.shape_children.push(ShapeChildren::Empty);
        Ok(Shape::last(&self.shapes))
    }
}

impl CreateHeapData<BaseLayoutRecord, BaseLayout> for Heap {
    fn create(&mut self, data: BaseLayoutRecord) -> ShapeResult<BaseLayout> {
        try_reserve(&mut self.base_layouts, 1, &mut self.budget)?;
        self.base_layouts.push(data);
        Ok(BaseLayout::last(&self.base_layouts))
    }
}

impl AsRef<[ShapeRecord]> for Heap {
    fn as_ref(&self) -> &[ShapeRecord] {
        &self.shapes
    }
}

impl AsRef<[BaseLayoutRecord]> for Heap {
    fn as_ref(&self) -> &[BaseLayoutRecord] {
        &self.base_layouts
    }
}
