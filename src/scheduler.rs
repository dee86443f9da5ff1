//! Cooperative scheduling boundaries for batch windows.
//!
//! A batch must include every `load` issued before control yields back to
//! the runtime. The [`Scheduler`] tracks this with an epoch counter that
//! [`Scheduled`] advances each time the runtime polls the request future.
//! A [`Tick`] created in one epoch completes only once a later epoch has
//! begun, so all the sibling resolvers polled in the same pass land in the
//! same batch, no matter how many times the window itself gets polled during
//! that pass.

use std::{
    future::Future,
    pin::Pin,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, PoisonError,
    },
    task::{Context, Poll, Waker},
};

use futures::future::BoxFuture;

#[derive(Debug, Default)]
pub struct Scheduler {
    epoch: AtomicU64,

    // Wakers of windows that are waiting for the next epoch. They are woken
    // after the request future returns Pending, never during its poll, so
    // combinators that yield early when a child wakes itself (such as
    // FuturesUnordered) still poll every sibling before the epoch advances.
    parked: Mutex<Vec<Waker>>,
}

impl Scheduler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    /// A window that closes at the next scheduling boundary.
    pub fn tick(self: &Arc<Self>) -> Tick {
        Tick {
            scheduler: Arc::clone(self),
            opened: self.epoch(),
        }
    }

    /// Wrap the request future so that each poll from the runtime starts a
    /// new epoch.
    pub fn run<'a, F>(self: &Arc<Self>, fut: F) -> Scheduled<'a, F::Output>
    where
        F: Future + Send + 'a,
    {
        Scheduled {
            scheduler: Arc::clone(self),
            fut: Box::pin(fut),
        }
    }

    fn park(&self, waker: &Waker) {
        self.parked
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(waker.clone());
    }

    fn wake_parked(&self) {
        let parked = std::mem::take(&mut *self.parked.lock().unwrap_or_else(PoisonError::into_inner));
        parked.into_iter().for_each(Waker::wake);
    }
}

/// The batch window for a request. See the module documentation.
#[derive(Debug)]
pub struct Tick {
    scheduler: Arc<Scheduler>,
    opened: u64,
}

impl Future for Tick {
    type Output = ();

    fn poll(self: Pin<&mut Self>, ctx: &mut Context<'_>) -> Poll<()> {
        if self.scheduler.epoch() > self.opened {
            Poll::Ready(())
        } else {
            self.scheduler.park(ctx.waker());
            Poll::Pending
        }
    }
}

/// A request future running under a [`Scheduler`].
pub struct Scheduled<'a, T> {
    scheduler: Arc<Scheduler>,
    fut: BoxFuture<'a, T>,
}

impl<T> Future for Scheduled<'_, T> {
    type Output = T;

    fn poll(mut self: Pin<&mut Self>, ctx: &mut Context<'_>) -> Poll<T> {
        self.scheduler.epoch.fetch_add(1, Ordering::SeqCst);

        let poll = self.fut.as_mut().poll(ctx);
        if poll.is_pending() {
            self.scheduler.wake_parked();
        }
        poll
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::{executor, future, FutureExt};

    #[test]
    fn tick_waits_for_the_next_epoch() {
        let scheduler = Scheduler::new();
        let polls = std::sync::atomic::AtomicUsize::new(0);

        let result = executor::block_on(scheduler.run(async {
            let opened = scheduler.epoch();
            let mut tick = scheduler.tick();

            // However many times it's polled within one pass, the window
            // stays open.
            for _ in 0..3 {
                assert!(future::poll_fn(|ctx| Poll::Ready(tick.poll_unpin(ctx)))
                    .await
                    .is_pending());
                polls.fetch_add(1, Ordering::SeqCst);
            }

            tick.await;
            scheduler.epoch() - opened
        }));

        assert_eq!(polls.load(Ordering::SeqCst), 3);
        assert_eq!(result, 1);
    }
}
