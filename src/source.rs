use std::future::Future;

/// The collaborator a [`RequestCoalescer`][crate::RequestCoalescer] sits in
/// front of. A data source takes no arguments and asynchronously returns
/// every record it knows about, or fails.
///
/// Any `Fn() -> Fut` closure whose future resolves to a
/// `Result<Vec<Item>, Error>` is already a `DataSource`, so most of the time
/// there's no need to implement this trait by hand.
pub trait DataSource {
    type Item;
    type Error;
    type Fetch: Future<Output = Result<Vec<Self::Item>, Self::Error>>;

    /// Begin a fetch. Every call to this method is one request against the
    /// underlying source; the coalescer's job is to call it as rarely as
    /// correctness allows.
    fn fetch_all(&self) -> Self::Fetch;
}

impl<F, Fut, Item, Error> DataSource for F
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<Vec<Item>, Error>>,
{
    type Item = Item;
    type Error = Error;
    type Fetch = Fut;

    #[inline]
    fn fetch_all(&self) -> Fut {
        self()
    }
}
