// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use crate::error::{ShapeError, ShapeResult};

/// Byte budget of a compartment.
///
/// Every shape, base layout, dictionary node and property table is charged
/// against the budget when it is allocated. The collector recomputes the
/// used amount from the surviving data. Charging past the limit is how
/// allocation failure is reported, so an embedder can make any mutation
/// fail deterministically by lowering the limit.
#[derive(Debug, Clone, Default)]
pub struct HeapBudget {
    used: usize,
    limit: Option<usize>,
}

impl HeapBudget {
    pub fn new(limit: Option<usize>) -> Self {
        Self { used: 0, limit }
    }

    pub fn used(&self) -> usize {
        self.used
    }

    pub fn limit(&self) -> Option<usize> {
        self.limit
    }

    pub fn set_limit(&mut self, limit: Option<usize>) {
        self.limit = limit;
    }

    pub fn charge(&mut self, bytes: usize) -> ShapeResult<()> {
        let used = self
            .used
            .checked_add(bytes)
            .ok_or(ShapeError::OutOfMemory)?;
        if self.limit.is_some_and(|limit| used > limit) {
            return Err(ShapeError::OutOfMemory);
        }
        self.used = used;
        Ok(())
    }

    pub fn release(&mut self, bytes: usize) {
        self.used = self.used.saturating_sub(bytes);
    }

    pub(crate) fn reset_used(&mut self, used: usize) {
        self.used = used;
    }
}

/// Charge and reserve room for `additional` more elements of `vec`.
pub(crate) fn try_reserve<T>(
    vec: &mut Vec<T>,
    additional: usize,
    budget: &mut HeapBudget,
) -> ShapeResult<()> {
    let bytes = additional.saturating_mul(size_of::<T>());
    budget.charge(bytes)?;
    if let Err(err) = vec.try_reserve(additional) {
        budget.release(bytes);
        return Err(err.into());
    }
    Ok(())
}
