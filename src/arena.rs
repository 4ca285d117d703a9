//! Generational ID lists.
//!
//! Every engine entity (database, connection, transaction, request, cursor) lives
//! in an [`Arena`] and is referred to by a small copyable handle. A handle carries
//! the generation of the slot it was issued for, so a stale handle to a reused slot
//! resolves to nothing instead of to the new occupant.

use std::fmt;
use std::marker::PhantomData;

/// A generic slot index
pub type ID = u32;

/// Typed handle into an [`Arena`]
pub trait Handle: Copy + Eq + fmt::Debug {
    fn from_parts(index: ID, generation: u32) -> Self;
    fn index(&self) -> ID;
    fn generation(&self) -> u32;
}

macro_rules! define_handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name {
            index: $crate::arena::ID,
            generation: u32,
        }

        impl $crate::arena::Handle for $name {
            fn from_parts(index: $crate::arena::ID, generation: u32) -> Self {
                $name { index, generation }
            }

            fn index(&self) -> $crate::arena::ID {
                self.index
            }

            fn generation(&self) -> u32 {
                self.generation
            }
        }
    };
}

pub(crate) use define_handle;

struct Slot<T> {
    generation: u32,
    value: Option<T>,
}

/// Slot storage addressed by generational handles
pub struct Arena<H: Handle, T> {
    slots: Vec<Slot<T>>,
    free: Vec<ID>,
    len: usize,
    _handle: PhantomData<H>,
}

impl<H: Handle, T> Arena<H, T> {
    pub fn new() -> Self {
        Arena {
            slots: Vec::new(),
            free: Vec::new(),
            len: 0,
            _handle: PhantomData,
        }
    }

    /// Number of live entries
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Store a value and return its handle. Freed slots are reused with a bumped generation.
    pub fn insert(&mut self, value: T) -> H {
        self.len += 1;
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.value = Some(value);
            return H::from_parts(index, slot.generation);
        }

        let index = self.slots.len() as ID;
        self.slots.push(Slot {
            generation: 0,
            value: Some(value),
        });
        H::from_parts(index, 0)
    }

    pub fn get(&self, handle: H) -> Option<&T> {
        self.slots
            .get(handle.index() as usize)
            .filter(|slot| slot.generation == handle.generation())
            .and_then(|slot| slot.value.as_ref())
    }

    pub fn get_mut(&mut self, handle: H) -> Option<&mut T> {
        self.slots
            .get_mut(handle.index() as usize)
            .filter(|slot| slot.generation == handle.generation())
            .and_then(|slot| slot.value.as_mut())
    }

    pub fn contains(&self, handle: H) -> bool {
        self.get(handle).is_some()
    }

    /// Remove a value, invalidating every outstanding handle to it
    pub fn remove(&mut self, handle: H) -> Option<T> {
        let slot = self.slots.get_mut(handle.index() as usize)?;
        if slot.generation != handle.generation() {
            return None;
        }
        let value = slot.value.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(handle.index());
        self.len -= 1;
        Some(value)
    }

    /// Iterate over live entries in slot order
    pub fn iter(&self) -> impl Iterator<Item = (H, &T)> {
        self.slots.iter().enumerate().filter_map(|(index, slot)| {
            slot.value
                .as_ref()
                .map(|value| (H::from_parts(index as ID, slot.generation), value))
        })
    }

    /// Drop every entry. Handles issued before the call stay invalid afterwards.
    pub fn clear(&mut self) {
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if slot.value.take().is_some() {
                slot.generation = slot.generation.wrapping_add(1);
                self.free.push(index as ID);
            }
        }
        self.len = 0;
    }
}

impl<H: Handle, T> Default for Arena<H, T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<H: Handle, T: fmt::Debug> fmt::Debug for Arena<H, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}
