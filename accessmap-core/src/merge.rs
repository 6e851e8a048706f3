//! Deep merge over the typed model tree.
//!
//! Every node of the [`Model`](crate::models::Model) implements [`Merge`]:
//! - `Option<T>`: `None` in the delta never erases; `Some` merges into an
//!   existing value or fills an empty slot
//! - `BTreeMap<K, V>`: recursive union, keys present on both sides merge
//! - records: field by field (see `merge_fields!`)
//! - scalars and lists: the later value replaces the earlier one

use std::collections::BTreeMap;
use std::collections::btree_map::Entry;

/// Merges a later fragment into `self`.
pub trait Merge {
    fn merge(&mut self, other: Self);
}

impl<T: Merge> Merge for Option<T> {
    fn merge(&mut self, other: Self) {
        let Some(other) = other else {
            return;
        };
        match self {
            Some(current) => current.merge(other),
            None => *self = Some(other),
        }
    }
}

impl<K: Ord, V: Merge> Merge for BTreeMap<K, V> {
    fn merge(&mut self, other: Self) {
        for (key, value) in other {
            match self.entry(key) {
                Entry::Occupied(entry) => entry.into_mut().merge(value),
                Entry::Vacant(entry) => {
                    entry.insert(value);
                }
            }
        }
    }
}

/// Implements [`Merge`] for a leaf type by replacement.
macro_rules! merge_leaf {
    ($($ty:ty),* $(,)?) => {
        $(
            impl $crate::merge::Merge for $ty {
                fn merge(&mut self, other: Self) {
                    *self = other;
                }
            }
        )*
    };
}

merge_leaf!(String, bool, u16, u32, i64, chrono::DateTime<chrono::Utc>);

// List leaves are replaced, never accumulated, across stages.
impl<T> Merge for Vec<T> {
    fn merge(&mut self, other: Self) {
        *self = other;
    }
}

/// Implements [`Merge`] for a record by merging each listed field.
macro_rules! merge_fields {
    ($ty:ty { $($field:ident),* $(,)? }) => {
        impl $crate::merge::Merge for $ty {
            fn merge(&mut self, other: Self) {
                $( $crate::merge::Merge::merge(&mut self.$field, other.$field); )*
            }
        }
    };
}

pub(crate) use {merge_fields, merge_leaf};
