//! # Effect Runner
//!
//! Single-flight ownership of asynchronous effects, one per [`Slot`].
//!
//! Every slot carries a generation counter. [`EffectRunner::run`] bumps the
//! generation, cancels the previous occupant and spawns the new operation
//! with a [`SlotToken`] bound to the new generation. An operation publishes
//! its results through [`SlotToken::deliver`], which re-checks the generation
//! under the slot lock, so a superseded operation cannot deliver anything
//! once `run` has returned.
//!
//! Cancelling does not wait for the runtime: the spawned task only polls the
//! operation through a shared cell, and the cancel function takes the
//! operation out of that cell and drops it on the spot. Whatever the
//! operation owned (a change stream, an in-flight gateway call) is released
//! before `run` starts the next one.
//!
//! Delivery closures run while the slot lock is held. They must not call back
//! into the runner (sending on a channel is fine).

use std::collections::HashMap;
use std::fmt;
use std::future::{poll_fn, Future};
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context, Poll};

use futures::future::BoxFuture;
use tracing::{debug, trace};

/// A named ownership point for at most one in-flight effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Slot {
    /// Create, update and delete calls.
    Mutation,
    /// The live change subscription driven by the key switcher.
    ChangeListener,
    /// Pre-commit reads.
    Lookup,
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Slot::Mutation => "mutation",
            Slot::ChangeListener => "change_listener",
            Slot::Lookup => "lookup",
        };
        f.write_str(name)
    }
}

/// Owns the cancel function of one running effect.
///
/// Cancelling consumes the handle; dropping it without cancelling leaves the
/// effect running.
pub struct EffectHandle {
    generation: u64,
    cancel: Box<dyn FnOnce() + Send>,
}

impl EffectHandle {
    pub fn new(generation: u64, cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            generation,
            cancel: Box::new(cancel),
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn cancel(self) {
        (self.cancel)()
    }
}

impl fmt::Debug for EffectHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EffectHandle")
            .field("generation", &self.generation)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Default)]
struct SlotState {
    generation: u64,
    handle: Option<EffectHandle>,
}

type Slots = Arc<Mutex<HashMap<Slot, SlotState>>>;

/// The operation of one effect, shared between its task and its handle.
type Pending = Arc<Mutex<Option<BoxFuture<'static, ()>>>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    // A panicking delivery closure must not wedge every other slot.
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Polls the operation if it is still there. `Ready(true)` once it finished,
/// `Ready(false)` if it was cancelled.
fn poll_pending(pending: &Pending, cx: &mut Context<'_>) -> Poll<bool> {
    let mut operation = lock(pending);
    let Some(future) = operation.as_mut() else {
        return Poll::Ready(false);
    };
    match future.as_mut().poll(cx) {
        Poll::Ready(()) => {
            *operation = None;
            Poll::Ready(true)
        }
        Poll::Pending => Poll::Pending,
    }
}

/// Capability handed to a running effect, bound to the generation it was
/// started with.
#[derive(Clone)]
pub struct SlotToken {
    slot: Slot,
    generation: u64,
    slots: Slots,
}

impl SlotToken {
    pub fn slot(&self) -> Slot {
        self.slot
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Whether this effect still owns its slot.
    pub fn is_current(&self) -> bool {
        let slots = lock(&self.slots);
        Self::owns(&slots, self.slot, self.generation)
    }

    /// Runs `f` only if this effect still owns its slot. Returns `None` when
    /// the effect has been superseded or cancelled.
    ///
    /// `f` runs under the slot lock. Keep it short and never call back into
    /// the runner or anything that consults it.
    pub fn deliver<R>(&self, f: impl FnOnce() -> R) -> Option<R> {
        let slots = lock(&self.slots);
        if Self::owns(&slots, self.slot, self.generation) {
            Some(f())
        } else {
            trace!(slot = %self.slot, generation = self.generation, "Stale delivery dropped");
            None
        }
    }

    fn owns(slots: &HashMap<Slot, SlotState>, slot: Slot, generation: u64) -> bool {
        slots
            .get(&slot)
            .is_some_and(|state| state.generation == generation && state.handle.is_some())
    }
}

/// Enforces at most one in-flight effect per [`Slot`].
///
/// Cloning yields another handle onto the same slots.
#[derive(Clone, Default)]
pub struct EffectRunner {
    slots: Slots,
    /// Serializes `run` so the cancel-then-start sequence of one call is
    /// never interleaved with another.
    starting: Arc<Mutex<()>>,
}

impl EffectRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts `operation` in `slot`, cancelling whatever occupied it.
    ///
    /// The previous operation is dropped before `operation` is called.
    /// Must be called from within a Tokio runtime. The slot is released when
    /// the operation finishes, unless it was superseded first.
    pub fn run<F, Fut>(&self, slot: Slot, operation: F) -> u64
    where
        F: FnOnce(SlotToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let _starting = lock(&self.starting);

        let (generation, previous) = {
            let mut slots = lock(&self.slots);
            let state = slots.entry(slot).or_default();
            state.generation += 1;
            (state.generation, state.handle.take())
        };
        // Outside the slot lock: the old operation may be mid-poll on another
        // worker and need the lock to finish its delivery.
        if let Some(previous) = previous {
            debug!(%slot, generation = previous.generation(), "Cancelling superseded effect");
            previous.cancel();
        }

        let mut slots = lock(&self.slots);
        let token = SlotToken {
            slot,
            generation,
            slots: self.slots.clone(),
        };
        let release = token.clone();
        let effect: BoxFuture<'static, ()> = Box::pin(operation(token));
        let pending: Pending = Arc::new(Mutex::new(Some(effect)));

        let polled = pending.clone();
        let task = tokio::spawn(async move {
            if !poll_fn(|cx| poll_pending(&polled, cx)).await {
                return;
            }
            let mut slots = lock(&release.slots);
            if let Some(state) = slots.get_mut(&release.slot) {
                if state.generation == release.generation {
                    state.handle = None;
                    trace!(slot = %release.slot, generation, "Slot released");
                }
            }
        });
        let abort = task.abort_handle();

        let state = slots.entry(slot).or_default();
        state.handle = Some(EffectHandle::new(generation, move || {
            drop(lock(&pending).take());
            abort.abort();
        }));
        debug!(%slot, generation, "Effect started");
        generation
    }

    /// Cancels the effect in `slot`, if any. Returns whether one was running.
    ///
    /// The operation has been dropped by the time this returns.
    pub fn cancel(&self, slot: Slot) -> bool {
        let handle = lock(&self.slots)
            .get_mut(&slot)
            .and_then(|state| state.handle.take());
        match handle {
            Some(handle) => {
                debug!(%slot, generation = handle.generation(), "Effect cancelled");
                handle.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancels every running effect.
    pub fn cancel_all(&self) {
        let handles: Vec<(Slot, EffectHandle)> = lock(&self.slots)
            .iter_mut()
            .filter_map(|(slot, state)| state.handle.take().map(|handle| (*slot, handle)))
            .collect();
        for (slot, handle) in handles {
            debug!(%slot, generation = handle.generation(), "Effect cancelled");
            handle.cancel();
        }
    }

    pub fn is_active(&self, slot: Slot) -> bool {
        lock(&self.slots)
            .get(&slot)
            .is_some_and(|state| state.handle.is_some())
    }

    /// Generation of the most recent effect started in `slot` (0 if none).
    pub fn generation(&self, slot: Slot) -> u64 {
        lock(&self.slots)
            .get(&slot)
            .map_or(0, |state| state.generation)
    }
}
