// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use core::num::NonZeroU32;
use std::sync::atomic::{AtomicBool, Ordering};

use super::Heap;
use crate::shape::{BaseLayout, Shape};

#[derive(Debug)]
pub(crate) struct HeapBits {
    pub(crate) shapes: Box<[AtomicBool]>,
    pub(crate) base_layouts: Box<[AtomicBool]>,
}

#[derive(Debug)]
pub(crate) struct WorkQueues {
    pub(crate) shapes: Vec<Shape>,
    pub(crate) base_layouts: Vec<BaseLayout>,
}

impl HeapBits {
    pub(crate) fn new(heap: &Heap) -> Self {
        let shapes = (0..heap.shapes.len()).map(|_| AtomicBool::new(false));
        let base_layouts = (0..heap.base_layouts.len()).map(|_| AtomicBool::new(false));
        Self {
            shapes: shapes.collect(),
            base_layouts: base_layouts.collect(),
        }
    }
}

impl WorkQueues {
    pub(crate) fn new(heap: &Heap) -> Self {
        Self {
            shapes: Vec::with_capacity(heap.shapes.len() / 4),
            base_layouts: Vec::with_capacity(heap.base_layouts.len() / 4),
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.shapes.is_empty() && self.base_layouts.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct LiveRange {
    start: u32,
    end: u32,
    shift: u32,
}

/// Where every surviving index of one heap vector moves to.
///
/// The list is a sorted run of live ranges; an index that falls outside all
/// of them was not marked and has been swept away.
#[derive(Debug)]
pub(crate) struct CompactionList {
    ranges: Box<[LiveRange]>,
}

impl CompactionList {
    pub(crate) fn shift_u32_index(&self, index: u32) -> Option<u32> {
        let position = self.ranges.partition_point(|range| range.start <= index);
        let range = self.ranges.get(position.checked_sub(1)?)?;
        (index < range.end).then(|| index - range.shift)
    }

    /// Shift a strongly held handle.
    pub(crate) fn shift_non_zero_u32_index(&self, index: &mut NonZeroU32) {
        let shifted = self.shift_weak_non_zero_u32_index(*index);
        debug_assert!(shifted.is_some(), "Strongly held value was swept");
        if let Some(shifted) = shifted {
            *index = shifted;
        }
    }

    /// Shift a weakly held handle, or return `None` if it was swept.
    pub(crate) fn shift_weak_non_zero_u32_index(&self, index: NonZeroU32) -> Option<NonZeroU32> {
        let shifted = self.shift_u32_index(index.get() - 1)?;
        NonZeroU32::new(shifted + 1)
    }

    pub(crate) fn from_mark_bits(marks: &[AtomicBool]) -> Self {
        let mut builder = CompactionListBuilder::default();
        marks.iter().for_each(|bit| {
            if bit.load(Ordering::Relaxed) {
                builder.mark_used();
            } else {
                builder.mark_unused();
            }
        });
        builder.done()
    }
}

#[derive(Debug, Default)]
pub(crate) struct CompactionListBuilder {
    ranges: Vec<LiveRange>,
    current_index: u32,
    current_shift: u32,
}

impl CompactionListBuilder {
    pub(crate) fn mark_used(&mut self) {
        match self.ranges.last_mut() {
            Some(range) if range.end == self.current_index => range.end += 1,
            _ => self.ranges.push(LiveRange {
                start: self.current_index,
                end: self.current_index + 1,
                shift: self.current_shift,
            }),
        }
        self.current_index += 1;
    }

    pub(crate) fn mark_unused(&mut self) {
        self.current_shift += 1;
        self.current_index += 1;
    }

    pub(crate) fn done(self) -> CompactionList {
        CompactionList {
            ranges: self.ranges.into_boxed_slice(),
        }
    }
}

#[derive(Debug)]
pub(crate) struct CompactionLists {
    pub(crate) shapes: CompactionList,
    pub(crate) base_layouts: CompactionList,
}

impl CompactionLists {
    pub(crate) fn create_from_bits(bits: &HeapBits) -> Self {
        Self {
            shapes: CompactionList::from_mark_bits(&bits.shapes),
            base_layouts: CompactionList::from_mark_bits(&bits.base_layouts),
        }
    }
}

/// Tracing of the strong references held by a heap value.
pub(crate) trait HeapMarkAndSweep {
    /// Push every strongly held handle onto the work queues.
    fn mark_values(&self, queues: &mut WorkQueues);

    /// Rewrite every held handle to its post-compaction index. Strongly held
    /// values are live by construction.
    fn sweep_values(&mut self, compactions: &CompactionLists);
}

/// Handles held weakly: sweeping returns `None` for collected values.
pub(crate) trait HeapSweepWeakReference: Sized + Copy {
    fn sweep_weak_reference(self, compactions: &CompactionLists) -> Option<Self>;
}

/// A handle that does not keep its referent alive.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct WeakReference<T>(pub(crate) T);

impl<T: HeapMarkAndSweep> HeapMarkAndSweep for Option<T> {
    fn mark_values(&self, queues: &mut WorkQueues) {
        if let Some(content) = self {
            content.mark_values(queues);
        }
    }

    fn sweep_values(&mut self, compactions: &CompactionLists) {
        if let Some(content) = self {
            content.sweep_values(compactions);
        }
    }
}

/// Drop every unmarked element of `vec` and rewrite the handles held by the
/// survivors.
pub(crate) fn sweep_heap_vector_values<T: HeapMarkAndSweep>(
    vec: &mut Vec<T>,
    compactions: &CompactionLists,
    bits: &[AtomicBool],
) {
    assert_eq!(vec.len(), bits.len());
    let mut iter = bits.iter();
    vec.retain_mut(|item| {
        let marked = iter
            .next()
            .is_some_and(|bit| bit.load(Ordering::Relaxed));
        if marked {
            item.sweep_values(compactions);
        }
        marked
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn marks(bits: &[bool]) -> Box<[AtomicBool]> {
        bits.iter().map(|bit| AtomicBool::new(*bit)).collect()
    }

    #[test]
    fn compaction_list_shifts_survivors() {
        let list = CompactionList::from_mark_bits(&marks(&[
            true, false, false, true, true, false, true,
        ]));
        assert_eq!(list.shift_u32_index(0), Some(0));
        assert_eq!(list.shift_u32_index(1), None);
        assert_eq!(list.shift_u32_index(2), None);
        assert_eq!(list.shift_u32_index(3), Some(1));
        assert_eq!(list.shift_u32_index(4), Some(2));
        assert_eq!(list.shift_u32_index(5), None);
        assert_eq!(list.shift_u32_index(6), Some(3));
        assert_eq!(list.shift_u32_index(7), None);
    }

    #[test]
    fn leading_garbage_is_shifted_out() {
        let list = CompactionList::from_mark_bits(&marks(&[false, false, true]));
        assert_eq!(list.shift_u32_index(0), None);
        assert_eq!(list.shift_u32_index(2), Some(0));
    }

    #[test]
    fn handles_are_one_based() {
        let list = CompactionList::from_mark_bits(&marks(&[false, true]));
        let mut handle = NonZeroU32::new(2).unwrap();
        list.shift_non_zero_u32_index(&mut handle);
        assert_eq!(handle.get(), 1);
        assert_eq!(
            list.shift_weak_non_zero_u32_index(NonZeroU32::new(1).unwrap()),
            None
        );
    }

    #[test]
    fn empty_heap_has_no_survivors() {
        let list = CompactionList::from_mark_bits(&marks(&[]));
        assert_eq!(list.shift_u32_index(0), None);
    }
}
