// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use core::num::NonZeroU32;

/// Reference to an object owned by the embedder: a prototype, a parent
/// scope, or an accessor function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectRef(NonZeroU32);

impl ObjectRef {
    pub const fn new(id: NonZeroU32) -> Self {
        Self(id)
    }

    pub const fn from_u32(id: u32) -> Option<Self> {
        match NonZeroU32::new(id) {
            Some(id) => Some(Self(id)),
            None => None,
        }
    }

    pub const fn get(self) -> u32 {
        self.0.get()
    }
}

/// Object class of a layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct ClassId(pub u32);

/// Native accessor routine identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NativeAccessor(pub u32);

/// Getter or setter of a property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Accessor {
    /// The class's default accessor. Never stored: it normalizes to `None`.
    Stub,
    Native(NativeAccessor),
    Object(ObjectRef),
}

impl Accessor {
    /// Replace the default stub with "no accessor".
    pub const fn normalize(accessor: Option<Accessor>) -> Option<Accessor> {
        match accessor {
            Some(Accessor::Stub) | None => None,
            accessor => accessor,
        }
    }

    pub const fn is_object(self) -> bool {
        matches!(self, Accessor::Object(_))
    }
}
