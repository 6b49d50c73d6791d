//! The records handed out by a coalescer, and the trait that lets the
//! coalescer filter them.

/// A single catalog entry as produced by a data source.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub id: i64,
    pub name: String,
    pub category: String,
    pub price: f64,
}

impl Record {
    pub fn new(id: i64, name: impl Into<String>, category: impl Into<String>, price: f64) -> Self {
        Self {
            id,
            name: name.into(),
            category: category.into(),
            price,
        }
    }
}

/// Items that can be selected by category. This is the only part of an item
/// the coalescer ever looks at; everything else is passed through untouched.
pub trait Categorized {
    fn category(&self) -> &str;
}

impl Categorized for Record {
    #[inline]
    fn category(&self) -> &str {
        &self.category
    }
}

impl<T: Categorized + ?Sized> Categorized for &T {
    #[inline]
    fn category(&self) -> &str {
        T::category(*self)
    }
}

impl<T: Categorized + ?Sized> Categorized for std::sync::Arc<T> {
    #[inline]
    fn category(&self) -> &str {
        T::category(self)
    }
}
