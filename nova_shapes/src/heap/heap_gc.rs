// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::{sync::atomic::Ordering, thread};

use tracing::debug;

use super::{
    Heap,
    heap_bits::{CompactionLists, HeapBits, HeapMarkAndSweep, WorkQueues, sweep_heap_vector_values},
};
use crate::{
    object::NativeObject,
    shape::{BaseLayout, Shape},
};

/// Mark everything reachable from `roots`, then compact the shape and layout
/// vectors and rewrite every handle held by the survivors and the roots.
pub(crate) fn heap_gc(heap: &mut Heap, roots: &mut [&mut NativeObject]) {
    let shapes_before = heap.shapes.len();
    let base_layouts_before = heap.base_layouts.len();
    let bits = HeapBits::new(heap);
    let mut queues = WorkQueues::new(heap);

    roots.iter().for_each(|object| object.mark_values(&mut queues));

    while !queues.is_empty() {
        let Heap {
            shapes,
            base_layouts,
            ..
        } = &*heap;
        let mut shape_marks: Box<[Shape]> = queues.shapes.drain(..).collect();
        shape_marks.sort();
        shape_marks.iter().for_each(|&shape| {
            let index = shape.get_index();
            if let Some(marked) = bits.shapes.get(index) {
                if marked.swap(true, Ordering::Relaxed) {
                    // Already marked, ignore
                    return;
                }
                shapes[index].mark_values(&mut queues);
            }
        });
        let mut base_layout_marks: Box<[BaseLayout]> = queues.base_layouts.drain(..).collect();
        base_layout_marks.sort();
        base_layout_marks.iter().for_each(|&layout| {
            let index = layout.get_index();
            if let Some(marked) = bits.base_layouts.get(index) {
                if marked.swap(true, Ordering::Relaxed) {
                    // Already marked, ignore
                    return;
                }
                base_layouts[index].mark_values(&mut queues);
            }
        });
    }

    sweep(heap, &bits, roots);

    heap.gc_number += 1;
    let dictionaries: usize = roots
        .iter()
        .map(|object| object.size_of_excluding_this())
        .sum();
    let used = heap.size_of_arenas() + dictionaries;
    heap.budget.reset_used(used);
    debug!(
        gc_number = heap.gc_number,
        shapes_before,
        shapes_after = heap.shapes.len(),
        base_layouts_before,
        base_layouts_after = heap.base_layouts.len(),
        used,
        "Collected shape heap"
    );
}

fn sweep(heap: &mut Heap, bits: &HeapBits, roots: &mut [&mut NativeObject]) {
    let compactions = CompactionLists::create_from_bits(bits);
    let Heap {
        shapes,
        shape_children,
        base_layouts,
        base_layout_set,
        initial_shapes,
        ..
    } = heap;

    thread::scope(|s| {
        s.spawn(|| {
            for object in roots.iter_mut() {
                object.sweep_values(&compactions);
            }
        });
        s.spawn(|| {
            sweep_heap_vector_values(shapes, &compactions, &bits.shapes);
        });
        s.spawn(|| {
            sweep_heap_vector_values(shape_children, &compactions, &bits.shapes);
        });
        s.spawn(|| {
            sweep_heap_vector_values(base_layouts, &compactions, &bits.base_layouts);
        });
        s.spawn(|| {
            base_layout_set.sweep_values(&compactions);
        });
        s.spawn(|| {
            initial_shapes.sweep_values(&compactions);
        });
    });
}
