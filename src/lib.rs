//! Inflight is a request coalescer for asynchronous fetches. It sits in front
//! of a data source that, given no arguments, asynchronously returns every
//! record it has. While a fetch is running, any number of additional requests
//! attach to it instead of hitting the source again; once it settles, the
//! next request starts a fresh one. This is the classic "stampede" guard: a
//! burst of identical requests (say, a UI firing the same query on every
//! keystroke) costs a single round trip.
//!
//! ## Overview
//!
//! A data source is anything implementing [`DataSource`]. In practice that's
//! usually a closure returning a future:
//!
//! ```
//! use inflight::{FetchFailure, Record};
//!
//! async fn fetch_catalog() -> Result<Vec<Record>, FetchFailure> {
//!     Ok(vec![
//!         Record::new(1, "Laptop", "electronics", 899.0),
//!         Record::new(2, "Coffee Table", "furniture", 199.0),
//!     ])
//! }
//!
//! // `fetch_catalog` itself is a `Fn() -> impl Future`, and therefore a
//! // DataSource.
//! ```
//!
//! Wrap the source in a [`RequestCoalescer`], then request records with
//! [`get_records`]. Each caller can pass an optional category filter, which
//! is matched case-insensitively against [`Categorized::category`]. The
//! filter is applied per caller, after the fetch: callers asking for
//! different categories still share the same underlying request.
//!
//! ```
//! # use inflight::{FetchFailure, Record};
//! # async fn fetch_catalog() -> Result<Vec<Record>, FetchFailure> {
//! #     Ok(vec![
//! #         Record::new(1, "Laptop", "electronics", 899.0),
//! #         Record::new(2, "Coffee Table", "furniture", 199.0),
//! #     ])
//! # }
//! use futures::{executor, future};
//! use inflight::RequestCoalescer;
//!
//! let coalescer = RequestCoalescer::from_source(fetch_catalog);
//!
//! let everything = coalescer.get_records(None);
//! let electronics = coalescer.get_records(Some("Electronics"));
//!
//! // Both requests were made while the first fetch was in flight
//! assert_eq!(coalescer.fetches_started(), 1);
//!
//! let (everything, electronics) =
//!     executor::block_on(future::join(everything, electronics));
//!
//! assert_eq!(everything.unwrap().len(), 2);
//! assert_eq!(electronics.unwrap()[0].name, "Laptop");
//!
//! // The fetch has settled, so this starts a new one
//! let _again = coalescer.get_records(None);
//! assert_eq!(coalescer.fetches_started(), 2);
//! ```
//!
//! If the fetch fails, every attached caller receives a clone of the same
//! error, and the next request tries again with a fresh fetch. Nothing is
//! cached: the coalescer only remembers a fetch while it's in flight.
//!
//! ## Design notes
//!
//! ### Poll-driven sharing
//!
//! In keeping with Rust's polling async design, the fetch is not spawned on
//! any runtime. It's stored in a shared "flight" and driven in the
//! foreground by polling the [`RecordsFuture`]s attached to it. Only one of
//! them (the most recent to poll) is registered to drive the fetch; the
//! others are only woken once the result is available, or if the driving
//! future is dropped and someone else has to take over.
//!
//! Dropping a `RecordsFuture` never cancels the fetch for the futures still
//! attached to it. Once every attached future is gone, though, nothing is
//! left to drive the fetch, so it's abandoned: the flight is cleared and the
//! next call to [`get_records`] starts a new one.
//!
//! If the source's future panics, the flight is cleared in the same way. The
//! future that was polling it resumes the panic, and the other attached
//! futures panic when they're next polled, since there's no outcome for them
//! to return.
//!
//! A source must not call back into the coalescer wrapping it, from
//! `fetch_all` or while its future is being polled. Both happen under the
//! coalescer's locks.
//!
//! ### When is a fetch "in flight"?
//!
//! From the moment `get_records` calls [`DataSource::fetch_all`] until the
//! moment some attached future observes its output. The check for an
//! existing flight and the launch of a new one happen under a single lock,
//! so two callers can never start two fetches; and a settled flight is
//! never joined, so a caller arriving after settlement (even immediately
//! after) always triggers a new fetch.
//!
//! [`get_records`]: RequestCoalescer::get_records

mod coalesce;
mod error;
mod filter;
mod record;
mod source;
mod waiters;


pub use coalesce::{CoalesceRules, RecordsFuture, RequestCoalescer};
pub use error::FetchFailure;
pub use filter::{CategoryFilter, EmptyFilter};
pub use record::{Categorized, Record};
pub use source::DataSource;
