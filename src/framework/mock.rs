//! # Mock Gateway
//!
//! An in-process [`UserGateway`] for tests. It records every call, answers
//! from a queue of scripted expectations and hands out change streams that
//! the test feeds by hand.
//!
//! ```ignore
//! let mock = MockGateway::new();
//! mock.expect_create().return_err(ProviderError::Creation("quota".into()));
//!
//! let gateway: Arc<dyn UserGateway> = Arc::new(mock.clone());
//! // ... drive the middleware ...
//! assert_eq!(mock.calls().len(), 1);
//! mock.verify();
//! ```
//!
//! Calls that find no matching expectation succeed (`read` answers
//! `NotFound`). Use [`MockGateway::hold`] to keep calls in flight until
//! [`MockGateway::release`], which is how cancellation is observed: a
//! cancelled call never completes and drops out of [`MockGateway::active_calls`].

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::{mpsc, watch, Notify};
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::gateway::{ChangeStream, ProviderError, UserGateway};
use crate::model::{FieldMap, UserFields, UserState};

/// A call observed by the mock, in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub enum GatewayCall {
    Register(String),
    Create { key: String, fields: UserFields },
    Update { key: String, fields: FieldMap },
    Delete(String),
    Read(String),
    Listen(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AckKind {
    Create,
    Update,
    Delete,
}

enum Expectation {
    Ack(AckKind, Result<(), ProviderError>),
    Read(Result<String, ProviderError>),
}

type ChangeFeed = mpsc::UnboundedSender<Result<UserState, ProviderError>>;

struct MockState {
    calls: Mutex<Vec<GatewayCall>>,
    expectations: Mutex<VecDeque<Expectation>>,
    feeds: Mutex<HashMap<String, Vec<ChangeFeed>>>,
    active: AtomicUsize,
    peak: AtomicUsize,
    completed: AtomicUsize,
    held: watch::Sender<bool>,
    changed: Notify,
}

impl MockState {
    fn touch(&self) {
        self.changed.notify_waiters();
    }
}

/// Scriptable [`UserGateway`]. Clones share state.
#[derive(Clone)]
pub struct MockGateway {
    state: Arc<MockState>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Counts a call as active for as long as its future is alive.
struct ActiveCall<'a>(&'a MockState);

impl<'a> ActiveCall<'a> {
    fn enter(state: &'a MockState) -> Self {
        let now = state.active.fetch_add(1, Ordering::SeqCst) + 1;
        state.peak.fetch_max(now, Ordering::SeqCst);
        state.touch();
        Self(state)
    }
}

impl Drop for ActiveCall<'_> {
    fn drop(&mut self) {
        self.0.active.fetch_sub(1, Ordering::SeqCst);
        self.0.touch();
    }
}

impl Default for MockGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl MockGateway {
    pub fn new() -> Self {
        let (held, _) = watch::channel(false);
        Self {
            state: Arc::new(MockState {
                calls: Mutex::new(Vec::new()),
                expectations: Mutex::new(VecDeque::new()),
                feeds: Mutex::new(HashMap::new()),
                active: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
                completed: AtomicUsize::new(0),
                held,
                changed: Notify::new(),
            }),
        }
    }

    pub fn expect_create(&self) -> AckExpectationBuilder {
        AckExpectationBuilder {
            state: self.state.clone(),
            kind: AckKind::Create,
        }
    }

    pub fn expect_update(&self) -> AckExpectationBuilder {
        AckExpectationBuilder {
            state: self.state.clone(),
            kind: AckKind::Update,
        }
    }

    pub fn expect_delete(&self) -> AckExpectationBuilder {
        AckExpectationBuilder {
            state: self.state.clone(),
            kind: AckKind::Delete,
        }
    }

    pub fn expect_read(&self) -> ReadExpectationBuilder {
        ReadExpectationBuilder {
            state: self.state.clone(),
        }
    }

    /// Panics if scripted expectations were left unused.
    pub fn verify(&self) {
        let remaining = lock(&self.state.expectations).len();
        if remaining > 0 {
            panic!("Not all expectations were met. {remaining} remaining");
        }
    }

    /// Keeps every async call pending until [`release`](Self::release).
    pub fn hold(&self) {
        self.state.held.send_replace(true);
    }

    pub fn release(&self) {
        self.state.held.send_replace(false);
    }

    pub fn calls(&self) -> Vec<GatewayCall> {
        lock(&self.state.calls).clone()
    }

    pub fn create_calls(&self) -> Vec<(String, UserFields)> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                GatewayCall::Create { key, fields } => Some((key, fields)),
                _ => None,
            })
            .collect()
    }

    pub fn update_calls(&self) -> Vec<(String, FieldMap)> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                GatewayCall::Update { key, fields } => Some((key, fields)),
                _ => None,
            })
            .collect()
    }

    pub fn listened_keys(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                GatewayCall::Listen(key) => Some(key),
                _ => None,
            })
            .collect()
    }

    /// Resolves once `done` holds. Re-checked whenever a call is recorded,
    /// starts, finishes or is dropped.
    ///
    /// ```ignore
    /// mock.wait_until(|m| m.active_calls() == 1).await;
    /// ```
    pub async fn wait_until(&self, mut done: impl FnMut(&Self) -> bool) {
        loop {
            let changed = self.state.changed.notified();
            if done(self) {
                return;
            }
            changed.await;
        }
    }

    /// Async calls currently in flight (started, not finished, not cancelled).
    pub fn active_calls(&self) -> usize {
        self.state.active.load(Ordering::SeqCst)
    }

    /// Highest number of async calls ever in flight at once.
    pub fn peak_active_calls(&self) -> usize {
        self.state.peak.load(Ordering::SeqCst)
    }

    /// Async calls that ran to completion.
    pub fn completed_calls(&self) -> usize {
        self.state.completed.load(Ordering::SeqCst)
    }

    /// Whether a change stream for `key` is still held by someone.
    pub fn is_listening(&self, key: &str) -> bool {
        lock(&self.state.feeds)
            .get(key)
            .is_some_and(|feeds| feeds.iter().any(|feed| !feed.is_closed()))
    }

    /// Pushes `item` into every open change stream for `key`. Returns how
    /// many streams received it.
    pub fn emit(&self, key: &str, item: Result<UserState, ProviderError>) -> usize {
        let mut all = lock(&self.state.feeds);
        let Some(feeds) = all.get_mut(key) else {
            return 0;
        };
        feeds.retain(|feed| !feed.is_closed());
        feeds
            .iter()
            .filter(|feed| feed.send(item.clone()).is_ok())
            .count()
    }

    fn record(&self, call: GatewayCall) {
        lock(&self.state.calls).push(call);
        self.state.touch();
    }

    fn next_expectation(&self, wanted: impl Fn(&Expectation) -> bool) -> Option<Expectation> {
        let mut expectations = lock(&self.state.expectations);
        let position = expectations.iter().position(wanted)?;
        expectations.remove(position)
    }

    async fn wait_for_release(&self) {
        let mut held = self.state.held.subscribe();
        // Sender lives in `self`, so this only ends when released.
        let _ = held.wait_for(|held| !*held).await;
    }

    async fn ack(&self, kind: AckKind) -> Result<(), ProviderError> {
        let _active = ActiveCall::enter(&self.state);
        self.wait_for_release().await;
        let response = match self.next_expectation(|e| matches!(e, Expectation::Ack(k, _) if *k == kind)) {
            Some(Expectation::Ack(_, response)) => response,
            _ => Ok(()),
        };
        self.state.completed.fetch_add(1, Ordering::SeqCst);
        self.state.touch();
        response
    }
}

/// Builder for create/update/delete expectations.
pub struct AckExpectationBuilder {
    state: Arc<MockState>,
    kind: AckKind,
}

impl AckExpectationBuilder {
    pub fn return_ok(self) {
        lock(&self.state.expectations).push_back(Expectation::Ack(self.kind, Ok(())));
    }

    pub fn return_err(self, error: ProviderError) {
        lock(&self.state.expectations).push_back(Expectation::Ack(self.kind, Err(error)));
    }
}

/// Builder for read expectations.
pub struct ReadExpectationBuilder {
    state: Arc<MockState>,
}

impl ReadExpectationBuilder {
    pub fn return_ok(self, json: impl Into<String>) {
        lock(&self.state.expectations).push_back(Expectation::Read(Ok(json.into())));
    }

    pub fn return_err(self, error: ProviderError) {
        lock(&self.state.expectations).push_back(Expectation::Read(Err(error)));
    }
}

#[async_trait]
impl UserGateway for MockGateway {
    fn register(&self, key: &str) {
        self.record(GatewayCall::Register(key.to_string()));
    }

    async fn create(&self, key: &str, fields: UserFields) -> Result<(), ProviderError> {
        self.record(GatewayCall::Create {
            key: key.to_string(),
            fields,
        });
        self.ack(AckKind::Create).await
    }

    async fn update(&self, key: &str, fields: FieldMap) -> Result<(), ProviderError> {
        self.record(GatewayCall::Update {
            key: key.to_string(),
            fields,
        });
        self.ack(AckKind::Update).await
    }

    async fn delete(&self, key: &str) -> Result<(), ProviderError> {
        self.record(GatewayCall::Delete(key.to_string()));
        self.ack(AckKind::Delete).await
    }

    async fn read(&self, key: &str) -> Result<String, ProviderError> {
        self.record(GatewayCall::Read(key.to_string()));
        let _active = ActiveCall::enter(&self.state);
        self.wait_for_release().await;
        let response = match self.next_expectation(|e| matches!(e, Expectation::Read(_))) {
            Some(Expectation::Read(response)) => response,
            _ => Err(ProviderError::NotFound(key.to_string())),
        };
        self.state.completed.fetch_add(1, Ordering::SeqCst);
        self.state.touch();
        response
    }

    fn change_listener(&self, key: &str) -> ChangeStream {
        let (feed, changes) = mpsc::unbounded_channel();
        lock(&self.state.feeds)
            .entry(key.to_string())
            .or_default()
            .push(feed);
        self.record(GatewayCall::Listen(key.to_string()));
        UnboundedReceiverStream::new(changes).boxed()
    }
}
