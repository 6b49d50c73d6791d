use std::{collections::HashMap, task::Waker};

/// Identifies one future's entry in a [`Waiters`] set. Tokens are handed out
/// by the set and can't be cloned, so each one belongs to exactly one
/// future.
#[derive(Debug, PartialEq, Eq, Hash)]
pub(crate) struct WaiterToken(usize);

impl WaiterToken {
    fn duplicate(&self) -> Self {
        WaiterToken(self.0)
    }
}

/// The wakers of every future attached to a single in-flight fetch.
///
/// Only one task has to drive the fetch forward. That task is the "driver":
/// the waiter that most recently polled the fetch and got `Pending`. The
/// others are left alone until the fetch settles, at which point all of them
/// are woken to collect their result.
///
/// If the driver goes away before the fetch settles, some other waiter is
/// woken so that it can poll the fetch and become the new driver. As long as
/// futures call `leave` when they're dropped, a running fetch always has
/// someone to make progress on it.
#[derive(Debug, Default)]
pub(crate) struct Waiters {
    wakers: HashMap<WaiterToken, Waker>,
    driver: Option<WaiterToken>,

    // Sets only live as long as a single fetch; running out of tokens isn't
    // a concern.
    issued: usize,
}

impl Waiters {
    /// Record that the waiter holding `token` just polled the fetch with
    /// `waker`, making it the driver. If `token` is empty, a fresh entry is
    /// created and its token is stored there.
    pub(crate) fn register(&mut self, token: &mut Option<WaiterToken>, waker: &Waker) {
        let issued = &mut self.issued;
        let token = token.get_or_insert_with(|| {
            *issued += 1;
            WaiterToken(*issued)
        });

        match self.wakers.get_mut(token) {
            Some(existing) if existing.will_wake(waker) => {}
            Some(existing) => existing.clone_from(waker),
            None => {
                self.wakers.insert(token.duplicate(), waker.clone());
            }
        }

        self.driver = Some(token.duplicate());
    }

    /// Remove a waiter that lost interest before the fetch settled. If it was
    /// the driver (or there is no driver), another waiter is promoted and
    /// woken. Returns true if a new driver was woken.
    pub(crate) fn leave(&mut self, token: WaiterToken) -> bool {
        self.wakers.remove(&token);

        if self.driver.is_some() && self.driver != Some(token) {
            return false;
        }

        match self.wakers.iter().next() {
            None => {
                self.driver = None;
                false
            }
            Some((next, waker)) => {
                self.driver = Some(next.duplicate());
                waker.wake_by_ref();
                true
            }
        }
    }

    /// The fetch settled. Wake everyone except `settler`, which is the waiter
    /// that observed the settlement and is about to return its own result.
    pub(crate) fn settle(self, settler: Option<WaiterToken>) {
        self.wakers
            .into_iter()
            .filter(|(token, _)| settler.as_ref() != Some(token))
            .for_each(|(_, waker)| waker.wake());
    }

    pub(crate) fn len(&self) -> usize {
        self.wakers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cooked_waker::{IntoWaker, Wake, WakeRef};
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    #[derive(Debug, Clone, Default, IntoWaker)]
    struct CountingWaker {
        count: Arc<AtomicUsize>,
    }

    impl WakeRef for CountingWaker {
        fn wake_by_ref(&self) {
            self.count.fetch_add(1, Ordering::SeqCst);
        }
    }

    impl Wake for CountingWaker {}

    impl CountingWaker {
        fn count(&self) -> usize {
            self.count.load(Ordering::SeqCst)
        }
    }

    #[test]
    fn leaving_driver_promotes_another() {
        let first = CountingWaker::default();
        let second = CountingWaker::default();
        let mut waiters = Waiters::default();

        let mut first_token = None;
        let mut second_token = None;
        waiters.register(&mut first_token, &first.clone().into_waker());
        waiters.register(&mut second_token, &second.clone().into_waker());

        // `second` polled last, so it's the driver. `first` leaving doesn't
        // disturb anyone.
        assert!(!waiters.leave(first_token.take().unwrap()));
        assert_eq!(first.count() + second.count(), 0);

        // Re-registering makes `first` the driver again; `second` leaving is
        // likewise silent.
        waiters.register(&mut first_token, &first.clone().into_waker());
        assert!(!waiters.leave(second_token.take().unwrap()));
        assert_eq!(first.count() + second.count(), 0);

        // A new waiter takes over when the driver leaves.
        waiters.register(&mut second_token, &second.clone().into_waker());
        waiters.register(&mut first_token, &first.clone().into_waker());
        assert!(waiters.leave(first_token.take().unwrap()));
        assert_eq!(second.count(), 1);
        assert_eq!(first.count(), 0);

        // The last waiter leaving leaves nobody to wake.
        assert!(!waiters.leave(second_token.take().unwrap()));
        assert_eq!(waiters.len(), 0);
    }

    #[test]
    fn settle_skips_settler() {
        let wakers: Vec<CountingWaker> = (0..3).map(|_| CountingWaker::default()).collect();
        let mut waiters = Waiters::default();
        let mut tokens: Vec<Option<WaiterToken>> = (0..3).map(|_| None).collect();

        for (waker, token) in wakers.iter().zip(tokens.iter_mut()) {
            waiters.register(token, &waker.clone().into_waker());
        }

        waiters.settle(tokens[1].take());

        let counts: Vec<usize> = wakers.iter().map(CountingWaker::count).collect();
        assert_eq!(counts, [1, 0, 1]);
    }
}
