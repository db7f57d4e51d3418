// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Property shapes for a JavaScript engine.
//!
//! Objects built by adding the same properties in the same order share
//! [`Shape`]s from a compartment-wide property tree; objects that are
//! mutated in ways the tree cannot describe cheaply switch to a private
//! dictionary of shapes. See [`NativeObject`] for the mutation protocol.

pub mod compartment;
pub mod error;
pub mod heap;
pub mod object;
pub mod shape;
pub mod types;

pub use compartment::{Compartment, MemoryUsage, Options};
pub use error::{ShapeError, ShapeResult};
pub use object::{
    CurrentShape, NativeObject, PropertyDefinition, PropertyInfo, ShapeHandle, ShapeRange,
};
pub use shape::{BaseLayout, BaseLayoutKey, ChildShape, PropertyTable, Shape};
pub use types::{
    Accessor, ClassId, NativeAccessor, ObjectFlags, ObjectRef, PropertyAttributes, PropertyKey,
    ShapeFlags, SymbolId,
};
