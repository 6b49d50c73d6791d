use std::{
    fmt::{self, Debug, Formatter},
    future::Future,
    mem,
    panic::{self, AssertUnwindSafe},
    pin::Pin,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    task::{Context, Poll},
};

use tracing::{debug, trace, warn};

use crate::{
    filter::{CategoryFilter, EmptyFilter, Snapshot},
    record::Categorized,
    source::DataSource,
    waiters::{WaiterToken, Waiters},
};

// Design notes:
//
// The fetch is never spawned. It lives inside the shared flight and is driven
// by whichever attached future polls it, exactly one driver at a time. When
// it completes, the driver stores the outcome in the flight, wakes everyone
// else, and releases the flight from the coalescer's slot. A settled flight
// is never joined again, so from the point of view of `get_records` the
// slot is empty as soon as the outcome is known, even before the release.
//
// A running flight with nobody attached has nobody to drive it, so the last
// caller to drop releases it too; the fetch future is dropped along with the
// flight.
enum Phase<Source: DataSource> {
    Running {
        fetch: Pin<Box<Source::Fetch>>,
        waiters: Waiters,
    },
    Settled(Result<Snapshot<Source::Item>, Source::Error>),

    // The fetch panicked while being polled. Every caller still attached
    // panics in turn when it next polls.
    Poisoned,
}

struct Flight<Source: DataSource> {
    id: u64,
    phase: Phase<Source>,

    // RecordsFutures holding this flight that haven't completed
    attached: usize,
}

type SharedFlight<Source> = Arc<Mutex<Flight<Source>>>;

struct Slot<Source: DataSource> {
    current: Option<SharedFlight<Source>>,
    started: u64,
}

// Locks are only ever held for the duration of a `get_records` call or a
// single poll, never across an await. Panics from the source's future are
// caught and turned into `Phase::Poisoned` before the lock is released, so
// poisoning could only come from a bug here; there's nothing to gain from
// propagating it.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Configuration for a [`RequestCoalescer`].
#[derive(Debug, Clone, Default)]
pub struct CoalesceRules<Source> {
    pub source: Source,
    pub empty_filter: EmptyFilter,
}

/// A `RequestCoalescer` sits in front of a [`DataSource`] and makes sure
/// that, at any instant, at most one `fetch_all` call is in flight. Calls to
/// [`get_records`][RequestCoalescer::get_records] made while a fetch is
/// running attach to it; the first call after it settles starts a new one.
///
/// Results are not cached: the coalescer only remembers a fetch while it
/// is in flight.
///
/// The source must not call back into the coalescer that wraps it.
/// `fetch_all` is called while the coalescer's slot is locked, and the
/// future it returns is polled while the shared flight is locked, so a
/// source that calls `get_records` or `in_flight` on the same coalescer
/// deadlocks.
pub struct RequestCoalescer<Source: DataSource> {
    source: Source,
    empty_filter: EmptyFilter,
    slot: Mutex<Slot<Source>>,
}

impl<Source: DataSource> RequestCoalescer<Source> {
    pub fn new(rules: CoalesceRules<Source>) -> Self {
        Self {
            source: rules.source,
            empty_filter: rules.empty_filter,
            slot: Mutex::new(Slot {
                current: None,
                started: 0,
            }),
        }
    }

    /// Create a coalescer with the default rules.
    pub fn from_source(source: Source) -> Self {
        Self::new(CoalesceRules {
            source,
            empty_filter: EmptyFilter::default(),
        })
    }

    #[inline]
    pub fn source(&self) -> &Source {
        &self.source
    }

    /// True if a fetch is currently running; a call to `get_records` right
    /// now would attach to it rather than call the source.
    pub fn in_flight(&self) -> bool {
        let slot = lock(&self.slot);

        slot.current
            .as_ref()
            .map_or(false, |flight| matches!(lock(flight).phase, Phase::Running { .. }))
    }

    /// The number of times this coalescer has called `fetch_all`.
    pub fn fetches_started(&self) -> u64 {
        lock(&self.slot).started
    }

    /// Clear the slot, if it still holds `flight`. By the time this is
    /// called another caller may already have replaced a settled flight with
    /// a new one, which must be left alone.
    fn release(&self, flight: &SharedFlight<Source>) {
        let mut slot = lock(&self.slot);

        if slot
            .current
            .as_ref()
            .map_or(false, |current| Arc::ptr_eq(current, flight))
        {
            slot.current = None;
        }
    }

    /// A caller lost interest before collecting its result. If it was
    /// driving the fetch, another waiter takes over. If it was the last
    /// caller attached, the fetch is abandoned and the slot cleared, so that
    /// a later call starts a fresh fetch instead of joining one that nobody
    /// has been driving.
    fn detach(&self, flight: &SharedFlight<Source>, waiter: Option<WaiterToken>) {
        // Slot before flight, the same order as `get_records`. Otherwise a
        // new caller could join between the count reaching zero and the
        // release.
        let mut slot = lock(&self.slot);
        let mut guard = lock(flight);

        guard.attached = guard.attached.saturating_sub(1);
        let flight_id = guard.id;
        let attached = guard.attached;

        if let Phase::Running {
            ref mut waiters, ..
        } = guard.phase
        {
            if let Some(token) = waiter {
                if waiters.leave(token) {
                    trace!(flight = flight_id, "driver dropped, woke a replacement");
                }
            }

            if attached == 0
                && slot
                    .current
                    .as_ref()
                    .map_or(false, |current| Arc::ptr_eq(current, flight))
            {
                debug!(flight = flight_id, "every caller dropped, abandoning fetch");
                slot.current = None;
            }
        }
    }
}

impl<Source> RequestCoalescer<Source>
where
    Source: DataSource,
    Source::Item: Categorized + Clone,
    Source::Error: Clone,
{
    /// Get every record from the source whose category matches `filter`
    /// (case-insensitively), or all of them if `filter` is `None`.
    ///
    /// If a fetch is already in flight, the returned future shares its
    /// outcome, whatever filter the other callers asked for. Otherwise the
    /// source's `fetch_all` is called before this method returns. Either
    /// way, the fetch makes progress when the returned future is polled.
    ///
    /// If the fetch fails, every caller attached to it gets a clone of the
    /// same error.
    pub fn get_records(&self, filter: Option<&str>) -> RecordsFuture<'_, Source> {
        let filter = CategoryFilter::new(filter, self.empty_filter);

        // Holding the slot lock from the check through to the launch ensures
        // that concurrent callers can't both decide to start a fetch.
        let mut slot = lock(&self.slot);

        if let Some(flight) = slot.current.as_ref() {
            let mut guard = lock(flight);

            if let Phase::Running { ref waiters, .. } = guard.phase {
                let waiting = waiters.len();
                let flight_id = guard.id;
                guard.attached += 1;

                debug!(
                    flight = flight_id,
                    attached = guard.attached,
                    waiters = waiting,
                    %filter,
                    "joining in-flight fetch"
                );
                drop(guard);

                return RecordsFuture {
                    coalescer: self,
                    flight: Some(Arc::clone(flight)),
                    flight_id,
                    waiter: None,
                    filter,
                };
            }
        }

        slot.started += 1;
        let flight_id = slot.started;
        debug!(flight = flight_id, %filter, "starting fetch");

        let flight = Arc::new(Mutex::new(Flight {
            id: flight_id,
            phase: Phase::Running {
                fetch: Box::pin(self.source.fetch_all()),
                waiters: Waiters::default(),
            },
            attached: 1,
        }));

        slot.current = Some(Arc::clone(&flight));

        RecordsFuture {
            coalescer: self,
            flight: Some(flight),
            flight_id,
            waiter: None,
            filter,
        }
    }
}

impl<Source> Debug for RequestCoalescer<Source>
where
    Source: DataSource + Debug,
{
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestCoalescer")
            .field("source", &self.source)
            .field("empty_filter", &self.empty_filter)
            .field("fetches_started", &self.fetches_started())
            .field("in_flight", &self.in_flight())
            .finish()
    }
}

/// A single caller's view of a (possibly shared) fetch. Created by
/// [`RequestCoalescer::get_records`]; resolves to that caller's filtered
/// records, or to the fetch's error.
///
/// Dropping a `RecordsFuture` never cancels the fetch for anyone else still
/// attached to it. If every attached future is dropped before the fetch
/// settles, the fetch is abandoned and the next call to `get_records` starts
/// a new one.
///
/// If the source's future panics, the panic is propagated to the caller that
/// was polling it, and every other attached caller panics when it next
/// polls. The coalescer itself stays usable: the next call starts a new
/// fetch.
#[must_use = "futures do nothing unless you `.await` or poll them"]
pub struct RecordsFuture<'a, Source: DataSource> {
    coalescer: &'a RequestCoalescer<Source>,
    flight: Option<SharedFlight<Source>>,
    flight_id: u64,
    waiter: Option<WaiterToken>,
    filter: CategoryFilter,
}

impl<'a, Source: DataSource> RecordsFuture<'a, Source> {
    /// Identifies the fetch this future is attached to. Futures with the same
    /// id, from the same coalescer, share a single `fetch_all` call.
    #[inline]
    pub fn flight_id(&self) -> u64 {
        self.flight_id
    }

    #[inline]
    pub fn filter(&self) -> &CategoryFilter {
        &self.filter
    }
}

impl<'a, Source> Future for RecordsFuture<'a, Source>
where
    Source: DataSource,
    Source::Item: Categorized + Clone,
    Source::Error: Clone,
{
    type Output = Result<Vec<Source::Item>, Source::Error>;

    fn poll(self: Pin<&mut Self>, ctx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();

        let flight = Arc::clone(
            this.flight
                .as_ref()
                .expect("RecordsFuture polled after completion"),
        );

        let mut guard = lock(&flight);
        let mut settled_here = false;

        if let Phase::Running {
            ref mut fetch,
            ref mut waiters,
        } = guard.phase
        {
            let polled = panic::catch_unwind(AssertUnwindSafe(|| fetch.as_mut().poll(ctx)));

            let result = match polled {
                Ok(Poll::Pending) => {
                    // Whoever polled last is responsible for driving the fetch
                    waiters.register(&mut this.waiter, ctx.waker());
                    return Poll::Pending;
                }
                Ok(Poll::Ready(result)) => result,
                Err(payload) => {
                    // The fetch future can't be polled again. Let the other
                    // waiters find out, and get it out of the slot so that
                    // the next call starts over.
                    mem::take(waiters).settle(this.waiter.take());
                    guard.phase = Phase::Poisoned;
                    guard.attached = guard.attached.saturating_sub(1);
                    drop(guard);

                    warn!(flight = this.flight_id, "data source panicked during fetch");
                    this.coalescer.release(&flight);
                    this.flight = None;

                    panic::resume_unwind(payload);
                }
            };

            // We're about to return our own result, so there's no need to
            // wake ourselves.
            mem::take(waiters).settle(this.waiter.take());

            debug!(
                flight = this.flight_id,
                ok = result.is_ok(),
                records = result.as_ref().map_or(0, Vec::len),
                "fetch settled"
            );

            guard.phase = Phase::Settled(result.map(Snapshot::new));
            settled_here = true;
        }

        guard.attached = guard.attached.saturating_sub(1);

        let outcome = match guard.phase {
            Phase::Settled(Ok(ref snapshot)) => Some(Ok(snapshot.clone())),
            Phase::Settled(Err(ref err)) => Some(Err(err.clone())),
            Phase::Poisoned => None,
            Phase::Running { .. } => {
                unreachable!("RecordsFuture found a running flight after settling")
            }
        };

        drop(guard);

        if settled_here {
            this.coalescer.release(&flight);
        }

        this.flight = None;
        this.waiter = None;

        match outcome {
            Some(outcome) => Poll::Ready(outcome.map(|snapshot| this.filter.select(&snapshot))),
            None => panic!(
                "data source panicked while fetching (flight {})",
                this.flight_id
            ),
        }
    }
}

impl<'a, Source: DataSource> Drop for RecordsFuture<'a, Source> {
    fn drop(&mut self) {
        // Completed futures have already given up their flight
        if let Some(flight) = self.flight.take() {
            self.coalescer.detach(&flight, self.waiter.take());
        }
    }
}

impl<'a, Source: DataSource> Debug for RecordsFuture<'a, Source> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordsFuture")
            .field("flight_id", &self.flight_id)
            .field("done", &self.flight.is_none())
            .field("waiter", &self.waiter)
            .field("filter", &self.filter)
            .finish()
    }
}
