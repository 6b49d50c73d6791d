//! Per-caller category filtering of a shared snapshot.

use std::{
    fmt::{self, Display, Formatter},
    ops::Deref,
    sync::Arc,
};

use crate::record::Categorized;

/// How a coalescer treats a filter that is present but empty (`Some("")`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EmptyFilter {
    /// An empty filter is still a filter: only items whose category is the
    /// empty string are returned.
    #[default]
    MatchEmpty,

    /// An empty filter is the same as no filter at all.
    MatchAll,
}

/// A normalized category filter. The category is lower-cased once, when the
/// filter is created, so that matching each item only lower-cases the item.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CategoryFilter {
    category: Option<String>,
}

impl CategoryFilter {
    /// A filter that keeps every item.
    pub fn all() -> Self {
        Self { category: None }
    }

    pub fn new(category: Option<&str>, empty: EmptyFilter) -> Self {
        let category = match (category, empty) {
            (Some(""), EmptyFilter::MatchAll) | (None, _) => None,
            (Some(category), _) => Some(category.to_lowercase()),
        };

        Self { category }
    }

    /// The lower-cased category, if this filter selects one.
    pub fn category(&self) -> Option<&str> {
        self.category.as_deref()
    }

    pub fn matches<T: Categorized + ?Sized>(&self, item: &T) -> bool {
        match self.category {
            None => true,
            Some(ref category) => item.category().to_lowercase() == *category,
        }
    }

    /// Clone the matching items out of `items`. `items` itself is never
    /// modified, so any number of callers can select from the same snapshot.
    pub fn select<T: Categorized + Clone>(&self, items: &[T]) -> Vec<T> {
        match self.category {
            None => items.to_vec(),
            Some(..) => items
                .iter()
                .filter(|item| self.matches(*item))
                .cloned()
                .collect(),
        }
    }
}

impl Display for CategoryFilter {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self.category {
            None => f.write_str("*"),
            Some(ref category) => write!(f, "{:?}", category),
        }
    }
}

/// The immutable outcome of one successful fetch, shared by every caller
/// that was attached to it.
#[derive(Debug)]
pub(crate) struct Snapshot<T> {
    items: Arc<[T]>,
}

impl<T> Snapshot<T> {
    pub(crate) fn new(items: Vec<T>) -> Self {
        Self {
            items: items.into(),
        }
    }
}

impl<T> Clone for Snapshot<T> {
    fn clone(&self) -> Self {
        Self {
            items: Arc::clone(&self.items),
        }
    }
}

impl<T> Deref for Snapshot<T> {
    type Target = [T];

    fn deref(&self) -> &[T] {
        &self.items
    }
}
