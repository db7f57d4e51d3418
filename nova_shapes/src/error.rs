// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::collections::TryReserveError;

use thiserror::Error;

use crate::types::PropertyKey;

/// Failure of a shape mutation.
///
/// Whenever one of these is returned the mutation has not happened: the
/// object still points at the shape it had before the call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ShapeError {
    /// A shape, base layout, dictionary node or property table could not be
    /// allocated, either because the heap limit was reached or because the
    /// system allocator refused.
    #[error("out of memory")]
    OutOfMemory,
    #[error("can't add property {key:?}: object is not extensible")]
    NotExtensible { key: PropertyKey },
    #[error("can't redefine non-configurable property {key:?}")]
    NotConfigurable { key: PropertyKey },
}

pub type ShapeResult<T> = Result<T, ShapeError>;

impl From<TryReserveError> for ShapeError {
    fn from(_: TryReserveError) -> Self {
        ShapeError::OutOfMemory
    }
}

impl From<hashbrown::TryReserveError> for ShapeError {
    fn from(_: hashbrown::TryReserveError) -> Self {
        ShapeError::OutOfMemory
    }
}
