//! # User Middleware
//!
//! The only place allowed to perform side effects on behalf of the store.
//!
//! For every dispatched action the host calls [`UserMiddleware::handle`]
//! *before* reducing it. `handle` performs the pre-commit effect, if any, and
//! returns an [`AfterCommit`] continuation. After the reducer's output is
//! committed the host runs the continuation, which reads the committed
//! snapshot exactly once and starts the post-commit effect for the original
//! action:
//!
//! | action | before commit | after commit |
//! |---|---|---|
//! | `Register(id)` | `register(id)` | follow the snapshot key (or `id`) |
//! | `Read(id)` | `read(id)` in [`Slot::Lookup`] | - |
//! | `Start` | - | follow the snapshot key |
//! | `Create` | - | `create(key, fields)` in [`Slot::Mutation`] |
//! | `Update(fields)` | - | `update(key, map)` in [`Slot::Mutation`] |
//! | `Delete` | - | `delete(key)` in [`Slot::Mutation`] |
//! | `StateChanged(_)` | - | - |
//!
//! Provider failures go to the injected [`ErrorSink`]; they never come back
//! as actions. Only the change listener feeds the store, with
//! [`UserAction::StateChanged`].

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, info, instrument, warn};

use crate::action::{ActionSender, UserAction};
use crate::config::MiddlewareConfig;
use crate::framework::{
    EffectFailure, EffectRunner, ErrorSink, KeySwitcher, Operation, Slot, SwitcherState,
};
use crate::gateway::{ProviderError, UserGateway};
use crate::model::{UserFields, UserState};

/// Pull accessor for the store's committed state.
pub type StateReader = Arc<dyn Fn() -> UserState + Send + Sync>;

/// Effect started by [`UserMiddleware::handle`] before the reducer runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Immediate {
    Registered(String),
    Lookup(String),
}

/// Effect started by an [`AfterCommit`] continuation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    Create(String),
    Update(String),
    Delete(String),
    Listen(String),
}

/// What `handle` hands back to the host.
#[must_use = "the host must run `after_commit` once the reducer output is committed"]
pub struct Handled {
    pub immediate: Option<Immediate>,
    pub after_commit: AfterCommit,
}

/// Continuation to run after the store committed the reducer's output for
/// the action it was created from.
#[must_use = "an AfterCommit does nothing unless run"]
pub struct AfterCommit {
    action: UserAction,
    inner: Arc<Inner>,
}

struct Context {
    get_state: StateReader,
    switcher: KeySwitcher,
}

struct Inner {
    gateway: Arc<dyn UserGateway>,
    runner: EffectRunner,
    errors: Arc<dyn ErrorSink>,
    config: MiddlewareConfig,
    context: Mutex<Option<Context>>,
}

/// Bridges the pure store to the [`UserGateway`].
///
/// Cloning yields another handle onto the same middleware.
#[derive(Clone)]
pub struct UserMiddleware {
    inner: Arc<Inner>,
}

impl UserMiddleware {
    pub fn new(
        gateway: Arc<dyn UserGateway>,
        errors: Arc<dyn ErrorSink>,
        config: MiddlewareConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                gateway,
                runner: EffectRunner::new(),
                errors,
                config,
                context: Mutex::new(None),
            }),
        }
    }

    pub fn config(&self) -> &MiddlewareConfig {
        &self.inner.config
    }

    /// Wires the middleware to its host and sets up the change listener,
    /// idle until a key is known.
    ///
    /// Call once, before the first action. Attaching again requires a
    /// [`detach`](Self::detach) first; violating this is a bug in the host
    /// (debug builds panic, release builds tear down the old wiring).
    pub fn attach(
        &self,
        get_state: impl Fn() -> UserState + Send + Sync + 'static,
        output: ActionSender,
    ) {
        let switcher = KeySwitcher::new(
            self.inner.gateway.clone(),
            self.inner.runner.clone(),
            output,
            self.inner.errors.clone(),
        );
        let previous = self.inner.context().replace(Context {
            get_state: Arc::new(get_state),
            switcher,
        });
        debug_assert!(previous.is_none(), "attach called twice without detach");
        if let Some(previous) = previous {
            warn!("Re-attaching without detach, tearing down previous wiring");
            previous.switcher.stop();
            self.inner.runner.cancel_all();
        }
        info!("Attached to store");
    }

    /// Cancels every running effect and forgets the host.
    pub fn detach(&self) {
        // Stopped outside the context lock; a running listener may read it.
        let context = self.inner.context().take();
        if let Some(context) = context {
            context.switcher.stop();
        }
        self.inner.runner.cancel_all();
        info!("Detached from store");
    }

    pub fn is_attached(&self) -> bool {
        self.inner.context().is_some()
    }

    /// State of the change listener; idle when detached.
    pub fn listener(&self) -> SwitcherState {
        self.inner
            .context()
            .as_ref()
            .map_or(SwitcherState::Idle, |context| context.switcher.state())
    }

    /// Whether an effect currently occupies `slot`.
    pub fn is_busy(&self, slot: Slot) -> bool {
        self.inner.runner.is_active(slot)
    }

    /// Runs the pre-commit branch for `action` and returns the continuation
    /// the host must run after committing.
    ///
    /// While detached no effect is started: `Register` and `Read` are logged
    /// and skipped, and the returned continuation is inert.
    ///
    /// Must be called from within a Tokio runtime.
    #[instrument(skip_all, fields(action = action.name()))]
    pub fn handle(&self, action: UserAction) -> Handled {
        let attached = self.is_attached();
        let immediate = match &action {
            UserAction::Register(_) | UserAction::Read(_) if !attached => {
                warn!("Not attached, skipping");
                None
            }
            UserAction::Register(key) => {
                debug!(%key, "Registering");
                self.inner.gateway.register(key);
                Some(Immediate::Registered(key.clone()))
            }
            UserAction::Read(key) => {
                debug!(%key, "Reading");
                self.inner.lookup(key.clone());
                Some(Immediate::Lookup(key.clone()))
            }
            _ => {
                debug!("Not handled before commit");
                None
            }
        };

        Handled {
            immediate,
            after_commit: AfterCommit {
                action,
                inner: self.inner.clone(),
            },
        }
    }
}

impl AfterCommit {
    pub fn action(&self) -> &UserAction {
        &self.action
    }

    /// Reads the committed state and starts the post-commit effect.
    ///
    /// Returns the effect that was started, or `None` when the action needs
    /// none, the middleware is detached, or the snapshot has no key.
    #[instrument(skip_all, fields(action = self.action.name()))]
    pub fn run(self) -> Option<Effect> {
        let Self { action, inner } = self;
        let (get_state, switcher) = match inner.context().as_ref() {
            Some(context) => (context.get_state.clone(), context.switcher.clone()),
            None => {
                warn!("Not attached, skipping");
                return None;
            }
        };

        let snapshot = get_state();
        debug!(state = %snapshot, "Running after commit");

        match action {
            UserAction::Create => {
                let key = inner.require_key(&snapshot, Operation::Create)?;
                let fields = UserFields::from_info(&snapshot.value, inner.config.name_style);
                inner.mutate(Operation::Create, key.clone(), move |gateway, key| async move {
                    gateway.create(&key, fields).await
                });
                Some(Effect::Create(key))
            }
            UserAction::Update(update) => {
                let key = inner.require_key(&snapshot, Operation::Update)?;
                let fields = match update.to_fields() {
                    Ok(fields) => fields,
                    Err(error) => {
                        inner.report(Operation::Update, Some(&key), error);
                        return None;
                    }
                };
                inner.mutate(Operation::Update, key.clone(), move |gateway, key| async move {
                    gateway.update(&key, fields).await
                });
                Some(Effect::Update(key))
            }
            UserAction::Delete => {
                let key = inner.require_key(&snapshot, Operation::Delete)?;
                inner.mutate(Operation::Delete, key.clone(), |gateway, key| async move {
                    gateway.delete(&key).await
                });
                Some(Effect::Delete(key))
            }
            UserAction::Start => match snapshot.key {
                Some(key) => {
                    switcher.push(key.clone());
                    Some(Effect::Listen(key))
                }
                None => {
                    debug!("No key to follow yet");
                    None
                }
            },
            UserAction::Register(id) => {
                let key = snapshot.key.unwrap_or(id);
                switcher.push(key.clone());
                Some(Effect::Listen(key))
            }
            UserAction::Read(_) | UserAction::StateChanged(_) => {
                debug!("Not handled after commit");
                None
            }
        }
    }
}

impl Inner {
    fn context(&self) -> MutexGuard<'_, Option<Context>> {
        self.context
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn report(&self, operation: Operation, key: Option<&str>, error: ProviderError) {
        self.errors
            .report(&EffectFailure::new(operation, key, error));
    }

    fn require_key(&self, snapshot: &UserState, operation: Operation) -> Option<String> {
        if snapshot.key.is_none() {
            self.report(
                operation,
                None,
                ProviderError::NotFound("no key in committed state".into()),
            );
        }
        snapshot.key.clone()
    }

    /// Starts a gateway call in the mutation slot, superseding any pending one.
    fn mutate<F, Fut>(&self, operation: Operation, key: String, call: F)
    where
        F: FnOnce(Arc<dyn UserGateway>, String) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), ProviderError>> + Send + 'static,
    {
        let gateway = self.gateway.clone();
        let errors = self.errors.clone();
        self.runner.run(Slot::Mutation, move |token| async move {
            let result = call(gateway, key.clone()).await;
            // Reported after the slot lock is released.
            match token.deliver(|| result) {
                Some(Ok(())) => info!(%operation, %key, "Effect completed"),
                Some(Err(error)) => {
                    errors.report(&EffectFailure::new(operation, Some(&key), error))
                }
                None => {}
            }
        });
    }

    fn lookup(&self, key: String) {
        let gateway = self.gateway.clone();
        let errors = self.errors.clone();
        self.runner.run(Slot::Lookup, move |token| async move {
            let result = gateway.read(&key).await;
            match token.deliver(|| result) {
                Some(Ok(json)) => info!(%key, bytes = json.len(), "Read completed"),
                Some(Err(error)) => {
                    errors.report(&EffectFailure::new(Operation::Read, Some(&key), error))
                }
                None => {}
            }
        });
    }
}
