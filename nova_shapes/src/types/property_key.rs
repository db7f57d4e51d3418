// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use core::num::NonZeroU32;

use ahash::AHashMap;

/// An interned property name.
///
/// Atoms are never collected: two atoms are the same name if and only if
/// they are the same index.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Atom(NonZeroU32);

impl Atom {
    #[inline(always)]
    pub(crate) fn get_index(self) -> usize {
        self.0.get().wrapping_sub(1) as usize
    }
}

/// Symbol identifier handed out by the embedder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SymbolId(pub u32);

/// Identifier of a property: the `id` every shape is labelled with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PropertyKey {
    /// Array index. Canonical index strings are always stored in this form.
    Integer(u32),
    Atom(Atom),
    Symbol(SymbolId),
}

/// Largest array index; `u32::MAX` itself is not an index.
pub const MAX_ARRAY_INDEX: u32 = u32::MAX - 1;

const GOLDEN_RATIO: u32 = 0x9E37_79B9;

impl PropertyKey {
    pub fn is_index(self) -> bool {
        matches!(self, PropertyKey::Integer(_))
    }

    pub fn as_index(self) -> Option<u32> {
        match self {
            PropertyKey::Integer(index) => Some(index),
            _ => None,
        }
    }

    /// Scrambled hash of the key used by property tables.
    ///
    /// The golden ratio multiplication moves entropy into the high bits,
    /// which is where the table takes its primary hash from.
    #[inline]
    pub(crate) fn hash_number(self) -> u32 {
        let (tag, payload) = match self {
            PropertyKey::Integer(index) => (0, index),
            PropertyKey::Atom(atom) => (1, atom.0.get()),
            PropertyKey::Symbol(symbol) => (2, symbol.0),
        };
        (payload.rotate_left(2) ^ tag).wrapping_mul(GOLDEN_RATIO)
    }
}

/// Parse a canonical array index: no sign, no leading zeroes, at most
/// [`MAX_ARRAY_INDEX`].
pub(crate) fn parse_index(name: &str) -> Option<u32> {
    let bytes = name.as_bytes();
    if bytes.is_empty() || bytes.len() > 10 || !bytes.iter().all(u8::is_ascii_digit) {
        return None;
    }
    if bytes.len() > 1 && bytes[0] == b'0' {
        return None;
    }
    let value: u64 = name.parse().ok()?;
    u32::try_from(value)
        .ok()
        .filter(|index| *index <= MAX_ARRAY_INDEX)
}

#[derive(Debug, Default)]
pub(crate) struct AtomTable {
    strings: Vec<Box<str>>,
    lookup: AHashMap<Box<str>, Atom>,
}

impl AtomTable {
    pub(crate) fn atomize(&mut self, name: &str) -> Atom {
        if let Some(atom) = self.lookup.get(name) {
            return *atom;
        }
        let index = u32::try_from(self.strings.len() + 1)
            .ok()
            .and_then(NonZeroU32::new)
            .expect("Unreasonable number of atoms");
        let atom = Atom(index);
        self.strings.push(name.into());
        self.lookup.insert(name.into(), atom);
        atom
    }

    pub(crate) fn get(&self, atom: Atom) -> &str {
        &self.strings[atom.get_index()]
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.strings.len()
    }

    pub(crate) fn size_of_excluding_this(&self) -> usize {
        let text: usize = self.strings.iter().map(|string| string.len()).sum();
        self.strings.capacity() * size_of::<Box<str>>()
            + self.lookup.capacity() * (size_of::<Box<str>>() + size_of::<Atom>())
            + text * 2
    }
}
