// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use bitflags::bitflags;

bitflags! {
    /// Attribute bits of a single property.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct PropertyAttributes: u8 {
        const ENUMERATE = 1 << 0;
        const READONLY = 1 << 1;
        /// Non-configurable. Once set it is never cleared.
        const PERMANENT = 1 << 2;
        const GETTER = 1 << 4;
        const SETTER = 1 << 5;
        /// The property has no value slot.
        const SHARED = 1 << 6;
    }
}

impl PropertyAttributes {
    pub const fn is_enumerable(self) -> bool {
        self.contains(Self::ENUMERATE)
    }

    pub const fn is_writable(self) -> bool {
        !self.contains(Self::READONLY)
    }

    pub const fn is_configurable(self) -> bool {
        !self.contains(Self::PERMANENT)
    }

    pub const fn has_slot(self) -> bool {
        !self.contains(Self::SHARED)
    }

    pub const fn is_accessor_descriptor(self) -> bool {
        self.intersects(Self::GETTER.union(Self::SETTER))
    }

    pub const fn is_data_descriptor(self) -> bool {
        !self.is_accessor_descriptor()
    }
}

bitflags! {
    /// Per-shape flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ShapeFlags: u8 {
        /// The shape is a node of an object's dictionary list.
        const IN_DICTIONARY = 1 << 0;
        const HAS_SHORTID = 1 << 1;
    }
}

impl ShapeFlags {
    /// Flags a caller may pass when defining a property.
    pub const PUBLIC_FLAGS: Self = Self::HAS_SHORTID;

    pub const fn public_flags(self) -> Self {
        self.intersection(Self::PUBLIC_FLAGS)
    }
}

bitflags! {
    /// Object-level flags carried by a base layout.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ObjectFlags: u32 {
        /// The object is used as a prototype.
        const DELEGATE = 1 << 0;
        const NOT_EXTENSIBLE = 1 << 1;
        /// Some property key is an array index.
        const INDEXED = 1 << 2;
        const WATCHED = 1 << 3;
        const ITERATED_SINGLETON = 1 << 4;
        /// The layout's getter is an object.
        const HAS_GETTER_OBJECT = 1 << 8;
        /// The layout's setter is an object.
        const HAS_SETTER_OBJECT = 1 << 9;
    }
}

impl ObjectFlags {
    /// Flags that describe the layout's accessors rather than the object.
    pub const ACCESSOR_FLAGS: Self = Self::HAS_GETTER_OBJECT.union(Self::HAS_SETTER_OBJECT);

    pub const fn object_flags(self) -> Self {
        self.difference(Self::ACCESSOR_FLAGS)
    }
}
