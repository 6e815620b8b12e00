//! # Key Switcher
//!
//! Keeps one live subscription to the gateway's change stream and re-targets
//! it whenever a new key is pushed.
//!
//! ```text
//! Idle ──push(k)──▶ Subscribed(k) ──push(k')──▶ Subscribed(k')
//!                        │
//!                        └──stream failure──▶ Idle
//! ```
//!
//! The subscription lives in [`Slot::ChangeListener`], so pushing a key
//! drops the previous stream before the new one is requested from the
//! gateway. Once `push` has returned the old key is fully unsubscribed.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use futures::StreamExt;
use tracing::{debug, info, warn};

use super::runner::{EffectRunner, Slot};
use super::sink::{EffectFailure, ErrorSink, Operation};
use crate::action::{ActionSender, UserAction};
use crate::gateway::UserGateway;

/// Observable state of a [`KeySwitcher`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SwitcherState {
    #[default]
    Idle,
    Subscribed(String),
}

impl SwitcherState {
    pub fn key(&self) -> Option<&str> {
        match self {
            SwitcherState::Idle => None,
            SwitcherState::Subscribed(key) => Some(key),
        }
    }
}

impl fmt::Display for SwitcherState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SwitcherState::Idle => f.write_str("idle"),
            SwitcherState::Subscribed(key) => write!(f, "subscribed({key})"),
        }
    }
}

/// Single-slot "current key" signal driving the change listener.
#[derive(Clone)]
pub struct KeySwitcher {
    gateway: Arc<dyn UserGateway>,
    runner: EffectRunner,
    output: ActionSender,
    errors: Arc<dyn ErrorSink>,
    state: Arc<Mutex<SwitcherState>>,
}

impl KeySwitcher {
    pub fn new(
        gateway: Arc<dyn UserGateway>,
        runner: EffectRunner,
        output: ActionSender,
        errors: Arc<dyn ErrorSink>,
    ) -> Self {
        Self {
            gateway,
            runner,
            output,
            errors,
            state: Arc::new(Mutex::new(SwitcherState::Idle)),
        }
    }

    pub fn state(&self) -> SwitcherState {
        lock(&self.state).clone()
    }

    /// Re-targets the live subscription to `key`.
    ///
    /// Every snapshot emitted for `key` is dispatched as
    /// [`UserAction::StateChanged`]. Pushing the current key again restarts
    /// its stream.
    pub fn push(&self, key: impl Into<String>) {
        let key = key.into();
        let gateway = self.gateway.clone();
        let output = self.output.clone();
        let errors = self.errors.clone();
        let state = self.state.clone();

        self.runner.run(Slot::ChangeListener, move |token| {
            // Runs under the slot lock: the old stream is already cancelled
            // and no delivery from this one can precede the state change.
            let mut changes = gateway.change_listener(&key);
            *lock(&state) = SwitcherState::Subscribed(key.clone());
            info!(%key, generation = token.generation(), "Listening for changes");

            async move {
                while let Some(next) = changes.next().await {
                    match next {
                        Ok(user) => {
                            debug!(%key, user = %user, "State change received");
                            let sent = token.deliver(|| output.send(UserAction::StateChanged(user)));
                            match sent {
                                Some(Ok(())) => {}
                                Some(Err(_)) => {
                                    warn!(%key, "Store closed, dropping subscription");
                                    token.deliver(|| *lock(&state) = SwitcherState::Idle);
                                    return;
                                }
                                None => return,
                            }
                        }
                        Err(error) => {
                            // Reported outside the slot lock so the sink may
                            // inspect the middleware.
                            let current =
                                token.deliver(|| *lock(&state) = SwitcherState::Idle);
                            if current.is_some() {
                                errors.report(&EffectFailure::new(
                                    Operation::Listen,
                                    Some(&key),
                                    error,
                                ));
                            }
                            return;
                        }
                    }
                }
                token.deliver(|| {
                    *lock(&state) = SwitcherState::Idle;
                    info!(%key, "Change stream completed");
                });
            }
        });
    }

    /// Drops the live subscription, if any.
    pub fn stop(&self) {
        self.runner.cancel(Slot::ChangeListener);
        *lock(&self.state) = SwitcherState::Idle;
    }
}

fn lock(state: &Mutex<SwitcherState>) -> MutexGuard<'_, SwitcherState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::framework::mock::MockGateway;
    use crate::gateway::ProviderError;
    use crate::model::{UserInfo, UserState};
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn user(key: &str, email: &str) -> UserState {
        UserState::new(key, UserInfo::new(email, "Ada", "Lovelace"))
    }

    struct Fixture {
        switcher: KeySwitcher,
        actions: mpsc::UnboundedReceiver<UserAction>,
        failures: mpsc::UnboundedReceiver<EffectFailure>,
    }

    fn fixture(mock: &MockGateway) -> Fixture {
        let (tx, actions) = mpsc::unbounded_channel();
        let (failed, failures) = mpsc::unbounded_channel();
        let switcher = KeySwitcher::new(
            Arc::new(mock.clone()),
            EffectRunner::new(),
            tx,
            Arc::new(move |failure: &EffectFailure| {
                let _ = failed.send(failure.clone());
            }),
        );
        Fixture {
            switcher,
            actions,
            failures,
        }
    }

    async fn next<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> T {
        tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("timed out")
            .expect("channel closed")
    }

    #[tokio::test]
    async fn test_idle_until_pushed() {
        let mock = MockGateway::new();
        let mut f = fixture(&mock);
        assert_eq!(f.switcher.state(), SwitcherState::Idle);
        tokio::task::yield_now().await;
        assert!(f.actions.try_recv().is_err());
        assert!(mock.listened_keys().is_empty());
    }

    #[tokio::test]
    async fn test_switching_keys_drops_old_stream() {
        let mock = MockGateway::new();
        let mut f = fixture(&mock);

        f.switcher.push("k1");
        assert!(mock.is_listening("k1"));
        assert_eq!(mock.emit("k1", Ok(user("k1", "one@a.com"))), 1);
        let first = next(&mut f.actions).await;
        assert_eq!(first.as_state_changed().unwrap().value.email, "one@a.com");

        f.switcher.push("k2");
        // Checked right away: the old stream is gone before push returns.
        assert_eq!(f.switcher.state(), SwitcherState::Subscribed("k2".into()));
        assert!(!mock.is_listening("k1"));
        assert!(mock.is_listening("k2"));

        assert_eq!(mock.emit("k1", Ok(user("k1", "late@a.com"))), 0);
        mock.emit("k2", Ok(user("k2", "two@a.com")));
        let second = next(&mut f.actions).await;
        assert_eq!(second.as_state_changed().unwrap().key.as_deref(), Some("k2"));
        assert_eq!(mock.listened_keys(), vec!["k1".to_string(), "k2".to_string()]);
    }

    #[tokio::test]
    async fn test_queued_change_for_old_key_is_not_delivered() {
        let mock = MockGateway::new();
        let mut f = fixture(&mock);

        f.switcher.push("k1");
        // Emitted but not yet forwarded when the key changes.
        mock.emit("k1", Ok(user("k1", "stale@a.com")));
        f.switcher.push("k2");
        mock.emit("k2", Ok(user("k2", "fresh@a.com")));

        let delivered = next(&mut f.actions).await;
        assert_eq!(delivered.as_state_changed().unwrap().key.as_deref(), Some("k2"));
        assert!(f.actions.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_stream_failure_goes_idle() {
        let mock = MockGateway::new();
        let mut f = fixture(&mock);

        f.switcher.push("k1");
        mock.emit("k1", Err(ProviderError::Decoding("bad payload".into())));
        let failure = next(&mut f.failures).await;
        assert_eq!(failure.operation, Operation::Listen);
        assert_eq!(failure.key.as_deref(), Some("k1"));

        assert_eq!(f.switcher.state(), SwitcherState::Idle);
        assert!(!mock.is_listening("k1"));
        assert!(f.actions.try_recv().is_err());

        // No automatic resubscription; a new push is required.
        assert_eq!(mock.listened_keys().len(), 1);
        f.switcher.push("k1");
        assert_eq!(mock.listened_keys().len(), 2);
    }

    #[tokio::test]
    async fn test_stop() {
        let mock = MockGateway::new();
        let f = fixture(&mock);
        f.switcher.push("k1");
        f.switcher.stop();
        assert_eq!(f.switcher.state(), SwitcherState::Idle);
        assert!(!mock.is_listening("k1"));
    }
}
