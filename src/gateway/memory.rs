//! # In-Memory Gateway
//!
//! An actor that owns a map of user records and a `watch` channel per watched
//! key. [`MemoryGateway`] is the cloneable client half; it turns each
//! [`UserGateway`] call into a [`GatewayRequest`] and awaits the one-shot reply.
//!
//! Every successful mutation publishes the resulting [`UserState`] to the
//! key's watchers, which is what feeds the middleware's change listener.
//! A deleted record is published as the key bound to [`UserInfo::empty`].

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use tokio::sync::{mpsc, oneshot, watch};
use tokio_stream::wrappers::WatchStream;
use tracing::{debug, info, warn};

use super::{ChangeStream, ProviderError, UserGateway};
use crate::model::{FieldMap, UserFields, UserInfo, UserState, UserUpdate};

/// One-shot reply channel used by the actor.
pub type Response<T> = oneshot::Sender<Result<T, ProviderError>>;

type Watcher = watch::Receiver<Option<UserState>>;

/// Messages understood by [`MemoryActor`].
#[derive(Debug)]
pub enum GatewayRequest {
    Register {
        key: String,
    },
    Create {
        key: String,
        fields: UserFields,
        respond_to: Response<()>,
    },
    Update {
        key: String,
        fields: FieldMap,
        respond_to: Response<()>,
    },
    Delete {
        key: String,
        respond_to: Response<()>,
    },
    Read {
        key: String,
        respond_to: Response<String>,
    },
    Subscribe {
        key: String,
        respond_to: Response<Watcher>,
    },
}

/// Server half of the in-memory gateway.
///
/// Requests are processed sequentially, so the record map needs no lock.
pub struct MemoryActor {
    receiver: mpsc::Receiver<GatewayRequest>,
    records: HashMap<String, UserInfo>,
    watchers: HashMap<String, watch::Sender<Option<UserState>>>,
    registered: HashSet<String>,
    next_beacon_fn: Box<dyn FnMut() -> u16 + Send>,
}

impl MemoryActor {
    /// Creates the actor and its client.
    ///
    /// `next_beacon` assigns the beacon id of every created record.
    pub fn new(
        buffer_size: usize,
        next_beacon: impl FnMut() -> u16 + Send + 'static,
    ) -> (Self, MemoryGateway) {
        let (sender, receiver) = mpsc::channel(buffer_size);
        let actor = Self {
            receiver,
            records: HashMap::new(),
            watchers: HashMap::new(),
            registered: HashSet::new(),
            next_beacon_fn: Box::new(next_beacon),
        };
        (actor, MemoryGateway::new(sender))
    }

    /// Same as [`new`](Self::new) with beacon ids counting up from 1.
    pub fn with_counter(buffer_size: usize) -> (Self, MemoryGateway) {
        let mut next: u16 = 0;
        Self::new(buffer_size, move || {
            next = next.wrapping_add(1);
            next
        })
    }

    /// Preloads a record before the actor starts.
    pub fn seed(mut self, key: impl Into<String>, info: UserInfo) -> Self {
        self.records.insert(key.into(), info);
        self
    }

    /// Runs the request loop until every client is dropped.
    pub async fn run(mut self) {
        info!(records = self.records.len(), "Gateway started");

        while let Some(msg) = self.receiver.recv().await {
            self.handle(msg);
        }

        info!(size = self.records.len(), "Gateway shutdown");
    }

    fn handle(&mut self, msg: GatewayRequest) {
        match msg {
            GatewayRequest::Register { key } => {
                let first = self.registered.insert(key.clone());
                debug!(%key, first, "Register");
            }
            GatewayRequest::Create {
                key,
                fields,
                respond_to,
            } => {
                debug!(%key, ?fields, "Create");
                if self.records.contains_key(&key) {
                    warn!(%key, "Already exists");
                    let _ = respond_to.send(Err(ProviderError::Creation(format!(
                        "{key} already exists"
                    ))));
                    return;
                }
                let info = UserInfo {
                    beacon_id: Some((self.next_beacon_fn)()),
                    ..UserInfo::new(fields.email, fields.given_name, fields.family_name)
                };
                self.records.insert(key.clone(), info.clone());
                self.publish(&key, UserState::new(key.clone(), info));
                info!(%key, size = self.records.len(), "Created");
                let _ = respond_to.send(Ok(()));
            }
            GatewayRequest::Update {
                key,
                fields,
                respond_to,
            } => {
                debug!(%key, ?fields, "Update");
                let Some(current) = self.records.get(&key) else {
                    warn!(%key, "Not found");
                    let _ = respond_to.send(Err(ProviderError::NotFound(key)));
                    return;
                };
                let update = match UserUpdate::from_fields(&fields) {
                    Ok(update) => update,
                    Err(e) => {
                        warn!(%key, error = %e, "Update rejected");
                        let _ = respond_to.send(Err(e));
                        return;
                    }
                };
                let next = update.apply_to(current);
                self.records.insert(key.clone(), next.clone());
                self.publish(&key, UserState::new(key.clone(), next));
                info!(%key, changed = fields.len(), "Updated");
                let _ = respond_to.send(Ok(()));
            }
            GatewayRequest::Delete { key, respond_to } => {
                debug!(%key, "Delete");
                if self.records.remove(&key).is_none() {
                    warn!(%key, "Not found");
                    let _ = respond_to.send(Err(ProviderError::NotFound(key)));
                    return;
                }
                self.publish(&key, UserState::new(key.clone(), UserInfo::empty()));
                info!(%key, size = self.records.len(), "Deleted");
                let _ = respond_to.send(Ok(()));
            }
            GatewayRequest::Read { key, respond_to } => {
                let found = self.records.get(&key);
                debug!(%key, found = found.is_some(), "Read");
                let result = match found {
                    Some(info) => {
                        serde_json::to_string(&UserState::new(key.clone(), info.clone()))
                            .map_err(|e| ProviderError::Encoding(e.to_string()))
                    }
                    None => Err(ProviderError::NotFound(key)),
                };
                let _ = respond_to.send(result);
            }
            GatewayRequest::Subscribe { key, respond_to } => {
                self.watchers.retain(|_, sender| sender.receiver_count() > 0);
                let current = self
                    .records
                    .get(&key)
                    .map(|info| UserState::new(key.clone(), info.clone()));
                let watcher = self
                    .watchers
                    .entry(key.clone())
                    .or_insert_with(|| watch::channel(current).0)
                    .subscribe();
                debug!(%key, "Subscribe");
                let _ = respond_to.send(Ok(watcher));
            }
        }
    }

    fn publish(&mut self, key: &str, state: UserState) {
        if let Some(sender) = self.watchers.get(key) {
            if sender.receiver_count() == 0 {
                self.watchers.remove(key);
                return;
            }
            let next = Some(state);
            sender.send_if_modified(|current| {
                if *current == next {
                    false
                } else {
                    *current = next;
                    true
                }
            });
        }
    }
}

/// Client half of the in-memory gateway. Cheap to clone.
#[derive(Clone)]
pub struct MemoryGateway {
    sender: mpsc::Sender<GatewayRequest>,
}

impl MemoryGateway {
    pub fn new(sender: mpsc::Sender<GatewayRequest>) -> Self {
        Self { sender }
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(Response<T>) -> GatewayRequest,
    ) -> Result<T, ProviderError> {
        let (respond_to, response) = oneshot::channel();
        self.sender
            .send(build(respond_to))
            .await
            .map_err(|_| ProviderError::Closed)?;
        response.await.map_err(|_| ProviderError::Closed)?
    }
}

#[async_trait]
impl UserGateway for MemoryGateway {
    fn register(&self, key: &str) {
        let key = key.to_string();
        if let Err(e) = self.sender.try_send(GatewayRequest::Register { key }) {
            warn!(error = %e, "Register dropped");
        }
    }

    async fn create(&self, key: &str, fields: UserFields) -> Result<(), ProviderError> {
        let key = key.to_string();
        self.request(|respond_to| GatewayRequest::Create {
            key,
            fields,
            respond_to,
        })
        .await
    }

    async fn update(&self, key: &str, fields: FieldMap) -> Result<(), ProviderError> {
        let key = key.to_string();
        self.request(|respond_to| GatewayRequest::Update {
            key,
            fields,
            respond_to,
        })
        .await
    }

    async fn delete(&self, key: &str) -> Result<(), ProviderError> {
        let key = key.to_string();
        self.request(|respond_to| GatewayRequest::Delete { key, respond_to })
            .await
    }

    async fn read(&self, key: &str) -> Result<String, ProviderError> {
        let key = key.to_string();
        self.request(|respond_to| GatewayRequest::Read { key, respond_to })
            .await
    }

    fn change_listener(&self, key: &str) -> ChangeStream {
        let client = self.clone();
        let key = key.to_string();
        stream::once(async move {
            client
                .request(|respond_to| GatewayRequest::Subscribe { key, respond_to })
                .await
        })
        .map(|subscribed| match subscribed {
            Ok(watcher) => WatchStream::new(watcher)
                .filter_map(|state| async move { state.map(Ok::<_, ProviderError>) })
                .boxed(),
            Err(e) => stream::iter([Err(e)]).boxed(),
        })
        .flatten()
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(email: &str) -> UserFields {
        UserFields {
            email: email.into(),
            given_name: "Ada".into(),
            family_name: "Lovelace".into(),
            display_name: "Ada Lovelace".into(),
        }
    }

    #[tokio::test]
    async fn test_create_read_delete() {
        let (actor, gateway) = MemoryActor::with_counter(8);
        tokio::spawn(actor.run());

        gateway.create("u1", fields("ada@example.com")).await.unwrap();
        let json = gateway.read("u1").await.unwrap();
        let state: UserState = serde_json::from_str(&json).unwrap();
        assert_eq!(state.key.as_deref(), Some("u1"));
        assert_eq!(state.value.email, "ada@example.com");
        assert_eq!(state.value.beacon_id, Some(1));

        let again = gateway.create("u1", fields("x@example.com")).await;
        assert!(matches!(again, Err(ProviderError::Creation(_))));

        gateway.delete("u1").await.unwrap();
        assert_eq!(
            gateway.read("u1").await,
            Err(ProviderError::NotFound("u1".into()))
        );
    }

    #[tokio::test]
    async fn test_update_rejects_unknown_fields() {
        let (actor, gateway) = MemoryActor::with_counter(8);
        tokio::spawn(actor.run());
        gateway.create("u1", fields("a@b.com")).await.unwrap();

        let mut map = FieldMap::new();
        map.insert("nickname".into(), serde_json::json!("ace"));
        let result = gateway.update("u1", map).await;
        assert!(matches!(result, Err(ProviderError::Decoding(_))));

        let missing = gateway.update("nobody", FieldMap::new()).await;
        assert_eq!(missing, Err(ProviderError::NotFound("nobody".into())));
    }

    #[tokio::test]
    async fn test_change_listener_follows_mutations() {
        let (actor, gateway) = MemoryActor::with_counter(8);
        let actor = actor.seed("u1", UserInfo::new("a@b.com", "Ada", "Lovelace"));
        tokio::spawn(actor.run());

        let mut changes = gateway.change_listener("u1");
        let first = changes.next().await.unwrap().unwrap();
        assert_eq!(first.value.email, "a@b.com");

        let update = UserUpdate {
            email: Some("ada@c.org".into()),
            ..Default::default()
        };
        gateway.update("u1", update.to_fields().unwrap()).await.unwrap();
        let second = changes.next().await.unwrap().unwrap();
        assert_eq!(second.value.email, "ada@c.org");

        gateway.delete("u1").await.unwrap();
        let third = changes.next().await.unwrap().unwrap();
        assert_eq!(third.key.as_deref(), Some("u1"));
        assert!(third.value.is_empty());
    }

    fn subscribe(actor: &mut MemoryActor, key: &str) -> Watcher {
        let (respond_to, mut response) = oneshot::channel();
        actor.handle(GatewayRequest::Subscribe {
            key: key.into(),
            respond_to,
        });
        response.try_recv().unwrap().unwrap()
    }

    #[test]
    fn test_unwatched_keys_are_pruned() {
        let (mut actor, _gateway) = MemoryActor::with_counter(8);

        let first = subscribe(&mut actor, "u1");
        let second = subscribe(&mut actor, "u2");
        assert_eq!(actor.watchers.len(), 2);

        drop(first);
        let _third = subscribe(&mut actor, "u3");
        assert!(!actor.watchers.contains_key("u1"));
        assert_eq!(actor.watchers.len(), 2);

        // Publishing to a key nobody watches any more drops its channel too.
        drop(second);
        let (respond_to, _reply) = oneshot::channel();
        actor.handle(GatewayRequest::Create {
            key: "u2".into(),
            fields: fields("a@b.com"),
            respond_to,
        });
        assert!(!actor.watchers.contains_key("u2"));
        assert_eq!(actor.records.len(), 1);
    }

    #[test]
    fn test_resubscribe_sees_current_record() {
        let (actor, _gateway) = MemoryActor::with_counter(8);
        let mut actor = actor.seed("u1", UserInfo::new("a@b.com", "Ada", "Lovelace"));

        drop(subscribe(&mut actor, "u1"));
        let (respond_to, _reply) = oneshot::channel();
        actor.handle(GatewayRequest::Delete {
            key: "u1".into(),
            respond_to,
        });

        let watcher = subscribe(&mut actor, "u1");
        assert_eq!(*watcher.borrow(), None);
    }

    #[tokio::test]
    async fn test_closed_gateway() {
        let (actor, gateway) = MemoryActor::with_counter(8);
        drop(actor);
        assert_eq!(gateway.delete("u1").await, Err(ProviderError::Closed));
        let mut changes = gateway.change_listener("u1");
        assert_eq!(changes.next().await, Some(Err(ProviderError::Closed)));
    }
}
