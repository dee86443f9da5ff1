use std::{collections::HashMap, default::Default, task::Waker};

#[derive(Debug, Eq, PartialEq, Hash)]
pub(crate) struct Token(u64);

impl Token {
    fn duplicate(&self) -> Token {
        Token(self.0)
    }
}

/// Data structure for managing a collection of wakers that are all interested
/// in a single shared batch. Only a single task needs to actually do the work
/// of driving the batch to completion, but other tasks can take its place if
/// that one is dropped.
///
/// Wakers can be added to a wakerset; when added, a token associated with the
/// Waker is returned. This token should be associated with a running future
/// and can be used to:
/// - replace the waker on subsequent polls
/// - discard the waker from the wakerset.
/// These tokens cannot be cloned or otherwise duplicated; this helps to ensure
/// that their lifespan are correctly associated with a particular task.
///
/// The WakerSet maintains the notion of the "driving waker"; this is the
/// waker that most recently polled the relevant future. If the driving waker
/// is discarded from the set, another is selected and woken. So long as
/// futures take care to discard their stored tokens when dropped, the shared
/// batch always has a path forward.
#[derive(Debug)]
pub(crate) struct WakerSet {
    wakers: HashMap<Token, Waker>,
    driving_waker: Option<Token>,

    // Tokens are an ever-increasing integer. WakerSets live for one batch,
    // so there's no chance of running out of these.
    next_token: u64,
}

impl Default for WakerSet {
    fn default() -> Self {
        Self {
            wakers: HashMap::with_capacity(1),
            next_token: 0,
            driving_waker: None,
        }
    }
}

impl WakerSet {
    /// Add a new waker to this set, and make it the driving waker. Return the
    /// token associated with this waker's entry in the set.
    #[must_use]
    pub(crate) fn add_waker(&mut self, waker: Waker) -> Token {
        let token = Token(self.next_token);
        self.next_token += 1;

        self.wakers.insert(token.duplicate(), waker);
        self.driving_waker = Some(token.duplicate());
        token
    }

    /// Set the waker for an existing token in this set and make it the
    /// driving waker. The waker is set with clone_from because it comes from
    /// a Context and would need to be cloned anyway.
    pub(crate) fn replace_waker(&mut self, token: &Token, waker: &Waker) {
        match self.wakers.get_mut(token) {
            Some(existing) => existing.clone_from(waker),
            None => {
                self.wakers.insert(token.duplicate(), waker.clone());
            }
        }

        self.driving_waker = Some(token.duplicate());
    }

    /// Either register a fresh waker or refresh an existing one, depending on
    /// whether the future already holds a token.
    pub(crate) fn upsert(&mut self, token: &mut Option<Token>, waker: &Waker) {
        match token {
            Some(token) => self.replace_waker(token, waker),
            None => *token = Some(self.add_waker(waker.clone())),
        }
    }

    /// Discard a waker from this set. If that waker was the current driving
    /// waker, the current driving waker is unset. This method should only be
    /// used when a future is completed; otherwise, discard_and_wake should
    /// be preferred.
    pub(crate) fn discard_waker(&mut self, token: Token) {
        self.wakers.remove(&token);
        if self.driving_waker.as_ref() == Some(&token) {
            self.driving_waker = None;
        }
    }

    /// Discard a waker from this set. If that waker was the current driving
    /// waker (or there is currently no driving waker), an arbitrary waker is
    /// made the current driving waker and awoken.
    pub(crate) fn discard_and_wake(&mut self, token: Token) {
        self.wakers.remove(&token);
        if self.driving_waker.as_ref() == Some(&token) || self.driving_waker.is_none() {
            match self.wakers.iter().next() {
                None => self.driving_waker = None,
                Some((token, waker)) => {
                    self.driving_waker = Some(token.duplicate());
                    waker.wake_by_ref();
                }
            }
        }
    }

    /// Wake the driving waker, so that it re-polls the batch. Used when a
    /// batch becomes ready to launch outside of a poll.
    pub(crate) fn wake_driver(&self) {
        let driver = self
            .driving_waker
            .as_ref()
            .and_then(|token| self.wakers.get(token))
            .or_else(|| self.wakers.values().next());

        if let Some(waker) = driver {
            waker.wake_by_ref();
        }
    }

    pub(crate) fn wake_all(self) {
        self.wakers
            .into_iter()
            .for_each(|(_token, waker)| waker.wake());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cooked_waker::{IntoWaker, WakeRef};
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

    impl cooked_waker::Wake for CountingWaker {}

    impl CountingWaker {
        fn count(&self) -> usize {
            self.count.load(Ordering::SeqCst)
        }
    }

    #[test]
    fn dropping_the_driver_wakes_a_replacement() {
        let first = CountingWaker::default();
        let second = CountingWaker::default();
        let mut set = WakerSet::default();

        let _first_token = set.add_waker(first.clone().into_waker());
        let second_token = set.add_waker(second.clone().into_waker());

        set.discard_and_wake(second_token);

        assert_eq!(first.count(), 1);
        assert_eq!(second.count(), 0);
    }

    #[test]
    fn dropping_a_follower_wakes_nobody() {
        let first = CountingWaker::default();
        let second = CountingWaker::default();
        let mut set = WakerSet::default();

        let first_token = set.add_waker(first.clone().into_waker());
        let _second_token = set.add_waker(second.clone().into_waker());

        set.discard_and_wake(first_token);

        assert_eq!(first.count(), 0);
        assert_eq!(second.count(), 0);
    }

    #[test]
    fn wake_all_reaches_every_waker() {
        let wakers: Vec<CountingWaker> = (0..3).map(|_| CountingWaker::default()).collect();
        let mut set = WakerSet::default();
        let mut tokens = Vec::new();
        for waker in &wakers {
            tokens.push(set.add_waker(waker.clone().into_waker()));
        }

        set.wake_all();

        assert!(wakers.iter().all(|waker| waker.count() == 1));
    }
}
