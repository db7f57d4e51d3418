// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

mod accessor;
mod attributes;
mod property_key;

pub use accessor::{Accessor, ClassId, NativeAccessor, ObjectRef};
pub use attributes::{ObjectFlags, PropertyAttributes, ShapeFlags};
pub(crate) use property_key::{AtomTable, parse_index};
pub use property_key::{Atom, MAX_ARRAY_INDEX, PropertyKey, SymbolId};
