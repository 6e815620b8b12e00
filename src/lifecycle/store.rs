//! # Host Store
//!
//! A minimal single-state store that hosts a [`UserMiddleware`]. It owns the
//! committed [`UserState`] and processes its mailbox one action at a time:
//!
//! 1. `middleware.handle(action)` (pre-commit effect)
//! 2. `reducer(&state, &action)` produces the next state
//! 3. the new state is committed
//! 4. the returned continuation runs against the committed state
//!
//! Because the loop is sequential, a continuation always observes exactly the
//! state committed for its own action.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::error::SystemError;
use crate::action::{ActionSender, UserAction};
use crate::middleware::UserMiddleware;
use crate::model::UserState;

/// Pure state transition supplied by the host application.
pub type Reducer = Arc<dyn Fn(&UserState, &UserAction) -> UserState + Send + Sync>;

pub struct Store {
    sender: ActionSender,
    state: watch::Receiver<UserState>,
    middleware: UserMiddleware,
    stop: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

impl Store {
    /// Attaches `middleware` and starts the dispatch loop.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn spawn(
        initial: UserState,
        reducer: impl Fn(&UserState, &UserAction) -> UserState + Send + Sync + 'static,
        middleware: UserMiddleware,
    ) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        let (committed, state) = watch::channel(initial);
        let (stop, stopped) = oneshot::channel();

        let reader = state.clone();
        middleware.attach(move || reader.borrow().clone(), sender.clone());

        let handle = tokio::spawn(run(
            receiver,
            committed,
            Arc::new(reducer),
            middleware.clone(),
            stopped,
        ));

        Self {
            sender,
            state,
            middleware,
            stop,
            handle,
        }
    }

    pub fn dispatch(&self, action: UserAction) -> Result<(), SystemError> {
        self.sender
            .send(action)
            .map_err(|_| SystemError::StoreClosed)
    }

    /// The most recently committed state.
    pub fn state(&self) -> UserState {
        self.state.borrow().clone()
    }

    /// A receiver that observes every commit.
    pub fn watch(&self) -> watch::Receiver<UserState> {
        self.state.clone()
    }

    /// Waits until the committed state satisfies `predicate`.
    pub async fn wait_for(
        &self,
        predicate: impl FnMut(&UserState) -> bool,
    ) -> Result<UserState, SystemError> {
        let mut state = self.state.clone();
        let found = state
            .wait_for(predicate)
            .await
            .map_err(|_| SystemError::StoreClosed)?;
        Ok(found.clone())
    }

    pub fn middleware(&self) -> &UserMiddleware {
        &self.middleware
    }

    /// Detaches the middleware, drains actions already queued and stops the
    /// loop.
    pub async fn shutdown(self) -> Result<(), SystemError> {
        self.middleware.detach();
        let _ = self.stop.send(());
        drop(self.sender);
        self.handle
            .await
            .map_err(|e| SystemError::TaskFailed(e.to_string()))
    }
}

async fn run(
    mut receiver: mpsc::UnboundedReceiver<UserAction>,
    committed: watch::Sender<UserState>,
    reducer: Reducer,
    middleware: UserMiddleware,
    mut stopped: oneshot::Receiver<()>,
) {
    info!("Store started");
    let mut stopping = false;
    let mut processed: u64 = 0;

    loop {
        tokio::select! {
            _ = &mut stopped, if !stopping => {
                stopping = true;
                receiver.close();
            }
            next = receiver.recv() => {
                let Some(action) = next else { break };
                debug!(action = action.name(), "Dispatch");
                let handled = middleware.handle(action.clone());
                let next_state = {
                    let current = committed.borrow();
                    reducer(&current, &action)
                };
                committed.send_replace(next_state);
                processed += 1;
                if let Some(effect) = handled.after_commit.run() {
                    debug!(?effect, "Post-commit effect started");
                }
            }
        }
    }

    info!(processed, "Store stopped");
}
