use std::{
    collections::HashMap,
    fmt::{self, Debug, Formatter},
    future::Future,
    hash::Hash,
    mem,
    num::NonZeroUsize,
    pin::Pin,
    sync::{Arc, Mutex, MutexGuard, PoisonError, Weak},
    task::{Context, Poll},
};

use futures::FutureExt;
use tracing::trace;

use crate::{
    data::{KeySet, Token as KeyToken, ValueSet},
    wakerset::{Token as WakerToken, WakerSet},
};

// The crate is built with panic=abort, so a poisoned lock is never observed.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// The rules governing a [`BatchController`].
#[derive(Debug, Clone, Default)]
pub struct BatchRules<Batcher, Delayer> {
    /// The batch function: `KeySet<Key> -> Future<Result<ValueSet<Value>, Error>>`.
    pub batcher: Batcher,

    /// Creates the future that defines the window during which keys are
    /// collected. A batch is launched when this future completes.
    pub window: Delayer,

    /// If set, a batch is launched as soon as it holds this many unique keys,
    /// regardless of the window.
    pub max_keys: Option<NonZeroUsize>,
}

struct AccumulatingState<Key: Eq + Hash, Batcher, Delayer, Delay> {
    keys: KeySet<Key>,
    rules: Arc<BatchRules<Batcher, Delayer>>,
    delay: Option<Delay>,
    wakers: WakerSet,
}

impl<Key, Batcher, Delayer, Delay> Debug for AccumulatingState<Key, Batcher, Delayer, Delay>
where
    Key: Debug + Hash + Eq,
    Delay: Debug,
{
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccumulatingState")
            .field("keys", &self.keys)
            .field("batcher", &"<closure>")
            .field("delay", &self.delay)
            .field("wakers", &self.wakers)
            .finish()
    }
}

// Only one task needs to drive the batch future. However:
// - If a future is dropped, a different task must continue driving it
// - When the batch completes, ALL the tasks must be woken
struct RunningState<Fut> {
    fut: Pin<Box<Fut>>,
    wakers: WakerSet,
    dropped_tokens: Vec<KeyToken>,
}

enum State<Key: Hash + Eq, Value, Error, Fut, Batcher, Delayer, Delay> {
    Accum(AccumulatingState<Key, Batcher, Delayer, Delay>),
    Running(RunningState<Fut>),
    Done(Result<ValueSet<Value>, Error>),
}

type SharedState<Key, Value, Error, Fut, Batcher, Delayer, Delay> =
    Arc<Mutex<State<Key, Value, Error, Fut, Batcher, Delayer, Delay>>>;

/// Coordinates the batching logic for one loader: every key passed to
/// [`load`][BatchController::load] while a batch is accumulating joins that
/// batch, and the batch function is called once per batch.
pub struct BatchController<Key: Hash + Eq, Value, Error, Fut, Batcher, Delayer, Delay> {
    rules: Arc<BatchRules<Batcher, Delayer>>,

    // The currently accumulating batch, if any. It's owned by the futures
    // waiting on it; the controller only needs to find it to add keys.
    #[allow(clippy::type_complexity)]
    state: Mutex<Weak<Mutex<State<Key, Value, Error, Fut, Batcher, Delayer, Delay>>>>,

    // Values already delivered by this controller, for `load_cached`.
    cache: Mutex<HashMap<Key, Value>>,
}

impl<Key, Value, Error, Fut, Batcher, Delayer, Delay>
    BatchController<Key, Value, Error, Fut, Batcher, Delayer, Delay>
where
    Key: Eq + Hash,
    Value: Clone,
    Error: Clone,
    Delayer: Fn() -> Delay,
    Delay: Future<Output = ()> + Unpin,
    Batcher: Fn(KeySet<Key>) -> Fut,
    Fut: Future<Output = Result<ValueSet<Value>, Error>>,
{
    pub fn new(rules: BatchRules<Batcher, Delayer>) -> Self {
        Self {
            rules: Arc::new(rules),
            state: Mutex::new(Weak::new()),
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn load(&self, key: Key) -> BatchFuture<Key, Value, Error, Fut, Batcher, Delayer, Delay> {
        let mut guard = lock(&self.state);

        // If there is an existing state, and it's still in the accum state,
        // add a new key to it. Note that at no point do we check the timing;
        // we assume that if our window has closed, a future poll will advance
        // the state to Running.
        if let Some(state_handle) = guard.upgrade() {
            let mut state_guard = lock(&state_handle);
            if let State::Accum(ref mut state) = *state_guard {
                let key_token = state.keys.add_key(key);

                // If we've hit the key limit:
                // - Clear the window
                // - Wake the driver so the batch launches
                // - Detach the shared state from the controller
                match self.rules.max_keys {
                    Some(max_keys) if state.keys.len() >= max_keys.get() => {
                        state.delay = None;
                        state.wakers.wake_driver();
                        drop(state_guard);
                        *guard = Weak::new();
                    }
                    _ => drop(state_guard),
                }

                return BatchFuture {
                    key_token: Some(key_token),
                    waker_token: None,
                    state: Some(state_handle),
                };
            }
        }

        let mut keys = KeySet::new();
        let key_token = keys.add_key(key);

        let full = matches!(self.rules.max_keys, Some(max_keys) if max_keys.get() <= 1);
        let state = Arc::new(Mutex::new(State::Accum(AccumulatingState {
            keys,
            rules: Arc::clone(&self.rules),
            delay: if full { None } else { Some((self.rules.window)()) },
            wakers: WakerSet::default(),
        })));

        *guard = if full {
            Weak::new()
        } else {
            Arc::downgrade(&state)
        };

        BatchFuture {
            key_token: Some(key_token),
            waker_token: None,
            state: Some(state),
        }
    }

    /// Like [`load`][BatchController::load], but a key this controller has
    /// already delivered is answered from its cache without joining a batch.
    pub async fn load_cached(&self, key: Key) -> Result<Value, Error>
    where
        Key: Clone,
    {
        let cached = lock(&self.cache).get(&key).cloned();
        if let Some(value) = cached {
            return Ok(value);
        }

        let value = self.load(key.clone()).await?;
        lock(&self.cache).insert(key, value.clone());
        Ok(value)
    }
}

/// A request for a single key, sharing its batch with the other futures
/// created from the same [`BatchController`] during the batch window.
// Invariant: in order for this future to exist, its key must have been added
// to the state.
pub struct BatchFuture<Key: Hash + Eq, Value, Error, Fut, Batcher, Delayer, Delay> {
    key_token: Option<KeyToken>,
    waker_token: Option<WakerToken>,
    state: Option<SharedState<Key, Value, Error, Fut, Batcher, Delayer, Delay>>,
}

impl<Key, Value, Error, Fut, Batcher, Delayer, Delay> Future
    for BatchFuture<Key, Value, Error, Fut, Batcher, Delayer, Delay>
where
    Key: Eq + Hash,
    Value: Clone,
    Error: Clone,
    Delay: Future<Output = ()> + Unpin,
    Batcher: Fn(KeySet<Key>) -> Fut,
    Fut: Future<Output = Result<ValueSet<Value>, Error>>,
{
    type Output = Result<Value, Error>;

    fn poll(self: Pin<&mut Self>, ctx: &mut Context<'_>) -> Poll<Self::Output> {
        let unpinned = Pin::into_inner(self);

        // The lock is released when poll returns; it's never held across
        // polls.
        let shared = Arc::clone(
            unpinned
                .state
                .as_ref()
                .expect("Can't re-poll a completed BatchFuture"),
        );
        let mut guard = lock(&shared);

        if let State::Accum(ref mut state) = *guard {
            if let Some(ref mut delay) = state.delay {
                if delay.poll_unpin(ctx).is_pending() {
                    // This waker is now the driving waker for the window.
                    state.wakers.upsert(&mut unpinned.waker_token, ctx.waker());
                    return Poll::Pending;
                }
            }

            // Window is complete. Transition to the Running state.
            let wakers = mem::take(&mut state.wakers);
            let keyset = state.keys.take();
            trace!(keys = keyset.len(), "launching batch");

            let fut = Box::pin((state.rules.batcher)(keyset));

            *guard = State::Running(RunningState {
                fut,
                wakers,
                dropped_tokens: Vec::new(),
            });
        }

        if let State::Running(ref mut state) = *guard {
            let mut result = match state.fut.as_mut().poll(ctx) {
                Poll::Pending => {
                    // This is now the driving waker for the batch future.
                    state.wakers.upsert(&mut unpinned.waker_token, ctx.waker());
                    return Poll::Pending;
                }
                Poll::Ready(result) => result,
            };

            // Some futures may have lost interest while we were in the Running
            // state. Remove those tokens from the ValueSet.
            let dropped_tokens = mem::take(&mut state.dropped_tokens);
            if let Ok(values) = &mut result {
                dropped_tokens
                    .into_iter()
                    .for_each(|token| values.discard(token));
            }

            // Now that we have a result, signal all the waiting futures to
            // wake up so they can get their results.
            let mut wakers = mem::take(&mut state.wakers);
            if let Some(token) = unpinned.waker_token.take() {
                // We're about to grab our result, so we don't need to wake
                // ourself.
                wakers.discard_waker(token);
            }
            wakers.wake_all();

            *guard = State::Done(result);
        }

        let output = match *guard {
            State::Done(Ok(ref mut values)) => {
                let value = unpinned
                    .key_token
                    .take()
                    .and_then(|token| values.take(token));

                match value {
                    Some(value) => Ok(value),
                    None => {
                        drop(guard);
                        panic!("Unknown logic error: no value in ValueSet associated with Token");
                    }
                }
            }
            State::Done(Err(ref err)) => Err(err.clone()),
            _ => {
                drop(guard);
                panic!("BatchFuture contained invalid state");
            }
        };

        drop(guard);
        unpinned.state = None;
        Poll::Ready(output)
    }
}

impl<Key: Hash + Eq, Value, Error, Fut, Batcher, Delayer, Delay> Drop
    for BatchFuture<Key, Value, Error, Fut, Batcher, Delayer, Delay>
{
    fn drop(&mut self) {
        // The shared batch is only ever driven by a single future, so if we
        // were the driver, another future has to be woken to take over. That
        // logic is mostly handled by the WakerSet.
        let shared = match self.state.take() {
            Some(shared) => shared,
            None => return,
        };

        let mut guard = lock(&shared);
        match *guard {
            State::Accum(ref mut state) => {
                if let Some(waker_token) = self.waker_token.take() {
                    state.wakers.discard_and_wake(waker_token);
                }

                if let Some(key_token) = self.key_token.take() {
                    state.keys.discard_token(key_token);
                }
            }
            State::Running(ref mut state) => {
                if let Some(waker_token) = self.waker_token.take() {
                    state.wakers.discard_and_wake(waker_token);
                }

                // The KeySet is frozen (owned by the executing future). Add
                // our token to the list of dropped tokens so that it can be
                // discarded from the ValueSet when it's ready.
                if let Some(key_token) = self.key_token.take() {
                    state.dropped_tokens.push(key_token);
                }
            }
            State::Done(Ok(ref mut values)) => {
                if let Some(key_token) = self.key_token.take() {
                    values.discard(key_token);
                }
            }
            State::Done(Err(..)) => {}
        }
    }
}

impl<Key: Hash + Eq, Value, Error, Fut, Batcher, Delayer, Delay> Debug
    for BatchFuture<Key, Value, Error, Fut, Batcher, Delayer, Delay>
{
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchFuture")
            .field("key_token", &self.key_token)
            .field("waker_token", &self.waker_token)
            .field("completed", &self.state.is_none())
            .finish()
    }
}

impl<Key: Hash + Eq, Value, Error, Fut, Batcher, Delayer, Delay> Debug
    for BatchController<Key, Value, Error, Fut, Batcher, Delayer, Delay>
{
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchController")
            .field("max_keys", &self.rules.max_keys)
            .field("accumulating", &(lock(&self.state).strong_count() > 0))
            .finish()
    }
}
