//! Arena index newtypes.
//!
//! The source this crate's design follows uses raw pointers for `progeny`,
//! `super`, and task `ci`/`cj` fields. We use `u32` arena indices instead
//! (see DESIGN.md, "pointer-rich cell tree"): cells and tasks live in flat
//! `Vec`s owned by `Space` / the scheduler, and are referenced by index.

use std::fmt;

macro_rules! arena_index {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(pub u32);

        impl $name {
            pub const INVALID: Self = Self(u32::MAX);

            #[inline]
            pub fn is_valid(self) -> bool {
                self.0 != u32::MAX
            }

            #[inline]
            pub fn as_usize(self) -> usize {
                self.0 as usize
            }

            #[inline]
            pub fn from_usize(i: usize) -> Self {
                Self(u32::try_from(i).expect("arena index overflow"))
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::INVALID
            }
        }
    };
}

arena_index!(CellIndex);
arena_index!(TaskIndex);
arena_index!(ProxyIndex);
arena_index!(NodeId);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_is_not_valid() {
        assert!(!CellIndex::INVALID.is_valid());
        assert!(CellIndex(0).is_valid());
    }

    #[test]
    fn roundtrip_usize() {
        let i = TaskIndex::from_usize(42);
        assert_eq!(i.as_usize(), 42);
    }
}
