//! # Comparator
//!
//! Total order over opaque byte-sequence keys.
//!
//! Every sorted structure in Tidewater (the memtable, the SSTable writer and
//! reader, the merge iterator) must agree on one ordering, otherwise binary
//! search silently returns wrong answers. The ordering is therefore injected
//! explicitly as a [`SharedComparator`] rather than read from global state.
//!
//! ## Byte-wise order
//!
//! [`Bytewise`] compares the first mismatching byte as an **unsigned** value.
//! When one key is a strict prefix of the other, the shorter key sorts first.
//!
//! ```rust
//! use comparator::{Bytewise, KeyComparator};
//! use std::cmp::Ordering;
//!
//! assert_eq!(Bytewise.compare(b"ab", b"abc"), Ordering::Less);
//! assert_eq!(Bytewise.compare(&[0x80], &[0x7f]), Ordering::Greater);
//! ```

use std::cmp::Ordering;
use std::sync::Arc;

/// A total order over byte-sequence keys.
pub trait KeyComparator: Send + Sync {
    /// Compares two keys.
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering;

    /// Stable name of the ordering, used in diagnostics.
    fn name(&self) -> &'static str;
}

/// Shared, thread-safe handle to a comparator.
pub type SharedComparator = Arc<dyn KeyComparator>;

/// Unsigned lexicographic byte order. Shorter prefixes sort first.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Bytewise;

impl KeyComparator for Bytewise {
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        let common = a.len().min(b.len());
        for i in 0..common {
            match a[i].cmp(&b[i]) {
                Ordering::Equal => continue,
                other => return other,
            }
        }
        a.len().cmp(&b.len())
    }

    fn name(&self) -> &'static str {
        "bytewise"
    }
}

/// Returns a shared handle to the [`Bytewise`] comparator.
pub fn bytewise() -> SharedComparator {
    Arc::new(Bytewise)
}
