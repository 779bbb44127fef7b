/*
[INPUT]:  Router URL + realm
[OUTPUT]: SessionTransport with correlated calls and fanned-out subscription events
[POS]:    WAMP layer - WebSocket connection handling
[UPDATE]: When adding WAMP roles or changing connection logic
*/

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tracing::{debug, info, warn};
use url::Url;

use super::message::WampMessage;
use crate::session::{EventCallback, Result, SessionError, SessionTransport, callback_id};

const WAMP_SUBPROTOCOL: &str = "wamp.2.json";
const FRAME_SAMPLE_LIMIT: usize = 3;
const PARSE_FAIL_LOG_LIMIT: usize = 3;
const RAW_LOG_MAX_BYTES: usize = 1024;

static FRAME_SAMPLE_COUNT: AtomicUsize = AtomicUsize::new(0);
static PARSE_FAIL_LOG_COUNT: AtomicUsize = AtomicUsize::new(0);

enum PendingRequest {
    Call {
        procedure: String,
        reply: oneshot::Sender<Result<Value>>,
    },
    Subscribe {
        topic: String,
        callback: EventCallback,
        reply: oneshot::Sender<Result<()>>,
    },
}

#[derive(Default)]
struct TopicEntry {
    callbacks: Vec<EventCallback>,
}

#[derive(Default)]
struct SubscriptionRegistry {
    by_topic: HashMap<String, TopicEntry>,
    by_id: HashMap<u64, String>,
}

impl SubscriptionRegistry {
    /// Forgets `topic` and returns every router id that mapped to it.
    fn detach(&mut self, topic: &str) -> Vec<u64> {
        self.by_topic.remove(topic);
        let ids: Vec<u64> = self
            .by_id
            .iter()
            .filter(|(_, mapped)| mapped.as_str() == topic)
            .map(|(id, _)| *id)
            .collect();
        for id in &ids {
            self.by_id.remove(id);
        }
        ids
    }
}

fn subscribe_in_flight(pending: &HashMap<u64, PendingRequest>, topic: &str) -> bool {
    pending.values().any(|request| {
        matches!(request, PendingRequest::Subscribe { topic: pending_topic, .. } if pending_topic == topic)
    })
}

struct Shared {
    next_request: AtomicU64,
    pending: Mutex<HashMap<u64, PendingRequest>>,
    subscriptions: Mutex<SubscriptionRegistry>,
    outbound: mpsc::UnboundedSender<WsMessage>,
    closed: AtomicBool,
}

impl Shared {
    fn next_request_id(&self) -> u64 {
        self.next_request.fetch_add(1, Ordering::Relaxed)
    }

    fn send(&self, message: &WampMessage) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(SessionError::Closed);
        }
        self.outbound
            .send(WsMessage::Text(message.to_text().into()))
            .map_err(|_| SessionError::Closed)
    }

    /// Removes `callback` from `topic`; queues UNSUBSCRIBE when it was the
    /// topic's last local callback and no SUBSCRIBE for the topic is in flight.
    fn remove_callback(&self, topic: &str, callback: &EventCallback) -> Result<()> {
        // Held until the UNSUBSCRIBE is queued so a concurrent SUBSCRIBE is
        // either seen here or sent after it.
        let pending = self.pending.lock();
        let subscriptions = {
            let mut registry = self.subscriptions.lock();
            let entry = registry.by_topic.get_mut(topic).ok_or_else(|| {
                SessionError::UnknownSubscription {
                    topic: topic.to_string(),
                }
            })?;
            let position = entry
                .callbacks
                .iter()
                .position(|registered| Arc::ptr_eq(registered, callback))
                .ok_or_else(|| SessionError::UnknownSubscription {
                    topic: topic.to_string(),
                })?;
            entry.callbacks.remove(position);

            if !entry.callbacks.is_empty() {
                return Ok(());
            }
            if subscribe_in_flight(&pending, topic) {
                // The router answers a repeated SUBSCRIBE with this same id.
                debug!(topic, "wamp unsubscribe deferred");
                return Ok(());
            }
            registry.detach(topic)
        };

        self.queue_unsubscribe(topic, subscriptions);
        Ok(())
    }

    /// Drops a topic entry left without callbacks once nothing is
    /// subscribing to it anymore.
    fn release_if_idle(&self, topic: &str) {
        let pending = self.pending.lock();
        if subscribe_in_flight(&pending, topic) {
            return;
        }
        let subscriptions = {
            let mut registry = self.subscriptions.lock();
            let idle = registry
                .by_topic
                .get(topic)
                .is_some_and(|entry| entry.callbacks.is_empty());
            if !idle {
                return;
            }
            registry.detach(topic)
        };
        self.queue_unsubscribe(topic, subscriptions);
    }

    fn queue_unsubscribe(&self, topic: &str, subscriptions: Vec<u64>) {
        for subscription in subscriptions {
            let request = self.next_request_id();
            debug!(topic, subscription, request, "wamp unsubscribe queued");
            // A closed socket already dropped the router-side subscription.
            let _ = self.send(&WampMessage::Unsubscribe {
                request,
                subscription,
            });
        }
    }

    fn handle_incoming(&self, message: WampMessage) {
        match message {
            WampMessage::Result { request, args, .. } => {
                let pending = self.pending.lock().remove(&request);
                if let Some(PendingRequest::Call { reply, .. }) = pending {
                    let value = args.into_iter().next().unwrap_or(Value::Null);
                    let _ = reply.send(Ok(value));
                } else {
                    debug!(request, "wamp result for unknown request dropped");
                }
            }
            WampMessage::Error {
                request,
                error,
                args,
                ..
            } => {
                let pending = self.pending.lock().remove(&request);
                let text = WampMessage::error_text(&error, &args);
                match pending {
                    Some(PendingRequest::Call { procedure, reply }) => {
                        debug!(request, procedure = %procedure, error = %error, "wamp call rejected");
                        let _ = reply.send(Err(SessionError::EngineRejection {
                            uri: error,
                            message: text,
                        }));
                    }
                    Some(PendingRequest::Subscribe { topic, reply, .. }) => {
                        warn!(request, topic = %topic, error = %error, "wamp subscribe rejected");
                        let _ = reply.send(Err(SessionError::EngineRejection {
                            uri: error,
                            message: text,
                        }));
                        self.release_if_idle(&topic);
                    }
                    None => debug!(request, error = %error, "wamp error for unknown request"),
                }
            }
            WampMessage::Subscribed {
                request,
                subscription,
            } => self.handle_subscribed(request, subscription),
            WampMessage::Unsubscribed { request } => {
                debug!(request, "wamp unsubscribed");
            }
            WampMessage::Event {
                subscription, args, ..
            } => {
                let callbacks: Vec<EventCallback> = {
                    let registry = self.subscriptions.lock();
                    registry
                        .by_id
                        .get(&subscription)
                        .and_then(|topic| registry.by_topic.get(topic))
                        .map(|entry| entry.callbacks.clone())
                        .unwrap_or_default()
                };
                if callbacks.is_empty() {
                    debug!(subscription, "wamp event without local subscriber dropped");
                }
                for callback in callbacks {
                    callback(args.clone());
                }
            }
            WampMessage::Goodbye { reason, .. } => {
                info!(reason = %reason, "wamp router said goodbye");
                let _ = self.send(&WampMessage::Goodbye {
                    details: json!({}),
                    reason: "wamp.close.goodbye_and_out".to_string(),
                });
            }
            other => {
                debug!(message = other.name(), "wamp frame ignored");
            }
        }
    }

    fn handle_subscribed(&self, request: u64, subscription: u64) {
        let mut pending = self.pending.lock();
        let removed = pending.remove(&request);
        let Some(PendingRequest::Subscribe {
            topic,
            callback,
            reply,
        }) = removed
        else {
            drop(pending);
            // The subscriber went away before the router answered.
            let known = self.subscriptions.lock().by_id.get(&subscription).cloned();
            match known {
                Some(topic) => self.release_if_idle(&topic),
                None => {
                    debug!(subscription, "wamp orphaned subscription released");
                    let request = self.next_request_id();
                    let _ = self.send(&WampMessage::Unsubscribe {
                        request,
                        subscription,
                    });
                }
            }
            return;
        };

        {
            // Registered before the pending lock is released so a racing
            // unsubscribe sees the new holder.
            let mut registry = self.subscriptions.lock();
            registry.by_id.insert(subscription, topic.clone());
            registry
                .by_topic
                .entry(topic.clone())
                .or_default()
                .callbacks
                .push(callback.clone());
        }
        drop(pending);
        info!(topic = %topic, subscription, callback = callback_id(&callback), "wamp subscribed");

        if reply.send(Ok(())).is_err() {
            let _ = self.remove_callback(&topic, &callback);
        }
    }

    fn shut_down(&self) {
        self.closed.store(true, Ordering::Release);
        let drained: Vec<PendingRequest> = self.pending.lock().drain().map(|(_, p)| p).collect();
        for pending in drained {
            match pending {
                PendingRequest::Call { reply, .. } => {
                    let _ = reply.send(Err(SessionError::Closed));
                }
                PendingRequest::Subscribe { reply, .. } => {
                    let _ = reply.send(Err(SessionError::Closed));
                }
            }
        }
        // Dropping the callbacks ends every bridged channel.
        let mut registry = self.subscriptions.lock();
        registry.by_topic.clear();
        registry.by_id.clear();
    }
}

/// Removes a pending request when the awaiting future is dropped.
struct PendingGuard<'a> {
    shared: &'a Shared,
    request: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        let abandoned = self.shared.pending.lock().remove(&self.request);
        if let Some(PendingRequest::Subscribe { topic, .. }) = abandoned {
            self.shared.release_if_idle(&topic);
        }
    }
}

/// WAMP v2 client acting as caller and subscriber.
pub struct WampSession {
    shared: Arc<Shared>,
    session_id: u64,
}

impl WampSession {
    /// Connect to `url`, join `realm`, and start the socket loop.
    pub async fn connect(url: &str, realm: &str) -> Result<Self> {
        let url = Url::parse(url)?;
        let mut request = url.as_str().into_client_request()?;
        request.headers_mut().insert(
            "Sec-WebSocket-Protocol",
            HeaderValue::from_static(WAMP_SUBPROTOCOL),
        );

        let (ws_stream, _response) = connect_async(request).await?;
        let (mut write, mut read) = ws_stream.split();

        write
            .send(WsMessage::Text(WampMessage::hello(realm).to_text().into()))
            .await?;

        let session_id = loop {
            let frame = match read.next().await {
                Some(Ok(WsMessage::Text(text))) => text.to_string(),
                Some(Ok(WsMessage::Close(_))) | None => return Err(SessionError::Closed),
                Some(Ok(_)) => continue,
                Some(Err(err)) => return Err(err.into()),
            };
            match WampMessage::parse(&frame)? {
                WampMessage::Welcome { session, .. } => break session,
                WampMessage::Abort { reason, .. } => {
                    return Err(SessionError::Protocol(format!("router aborted join: {reason}")));
                }
                other => {
                    return Err(SessionError::Protocol(format!(
                        "expected WELCOME, got {}",
                        other.name()
                    )));
                }
            }
        };
        info!(url = %url, realm, session_id, "wamp session established");

        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<WsMessage>();
        let shared = Arc::new(Shared {
            next_request: AtomicU64::new(1),
            pending: Mutex::new(HashMap::new()),
            subscriptions: Mutex::new(SubscriptionRegistry::default()),
            outbound: outbound_tx,
            closed: AtomicBool::new(false),
        });
        let shared_for_task = shared.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    outbound = outbound_rx.recv() => {
                        match outbound {
                            Some(message) => {
                                if write.send(message).await.is_err() {
                                    break;
                                }
                            }
                            None => {
                                let _ = write.send(WsMessage::Close(None)).await;
                                break;
                            }
                        }
                    }
                    incoming = read.next() => {
                        match incoming {
                            Some(Ok(WsMessage::Close(_))) => {
                                let _ = write.send(WsMessage::Close(None)).await;
                                break;
                            }
                            Some(Ok(WsMessage::Ping(_))) | Some(Ok(WsMessage::Pong(_))) => {}
                            Some(Ok(message)) => {
                                if let Some(parsed) = parse_frame(message) {
                                    shared_for_task.handle_incoming(parsed);
                                }
                            }
                            Some(Err(err)) => {
                                warn!(error = %err, "wamp socket error");
                                break;
                            }
                            None => break,
                        }
                    }
                }
            }

            shared_for_task.shut_down();
            info!("wamp session closed");
        });

        Ok(Self { shared, session_id })
    }

    pub fn session_id(&self) -> u64 {
        self.session_id
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }
}

impl Drop for WampSession {
    fn drop(&mut self) {
        let _ = self.shared.send(&WampMessage::Goodbye {
            details: json!({}),
            reason: "wamp.close.system_shutdown".to_string(),
        });
    }
}

#[async_trait]
impl SessionTransport for WampSession {
    async fn call(&self, method: &str, args: Vec<Value>) -> Result<Value> {
        if self.is_closed() {
            return Err(SessionError::NotConnected);
        }

        let request = self.shared.next_request_id();
        let (tx, rx) = oneshot::channel();
        self.shared.pending.lock().insert(
            request,
            PendingRequest::Call {
                procedure: method.to_string(),
                reply: tx,
            },
        );
        let _guard = PendingGuard {
            shared: &self.shared,
            request,
        };

        self.shared.send(&WampMessage::Call {
            request,
            options: json!({}),
            procedure: method.to_string(),
            args,
        })?;
        debug!(request, procedure = method, "wamp call sent");

        rx.await.map_err(|_| SessionError::Closed)?
    }

    async fn subscribe(&self, topic: &str, callback: EventCallback) -> Result<()> {
        if self.is_closed() {
            return Err(SessionError::NotConnected);
        }

        let request = self.shared.next_request_id();
        let (tx, rx) = oneshot::channel();
        self.shared.pending.lock().insert(
            request,
            PendingRequest::Subscribe {
                topic: topic.to_string(),
                callback,
                reply: tx,
            },
        );
        let _guard = PendingGuard {
            shared: &self.shared,
            request,
        };

        self.shared.send(&WampMessage::Subscribe {
            request,
            options: json!({}),
            topic: topic.to_string(),
        })?;
        debug!(request, topic, "wamp subscribe sent");

        rx.await.map_err(|_| SessionError::Closed)?
    }

    fn unsubscribe(&self, topic: &str, callback: &EventCallback) -> Result<()> {
        self.shared.remove_callback(topic, callback)
    }
}

fn parse_frame(message: WsMessage) -> Option<WampMessage> {
    let text: String = match message {
        WsMessage::Text(text) => text.to_string(),
        WsMessage::Binary(bytes) => String::from_utf8(bytes.to_vec()).ok()?,
        _ => return None,
    };

    match WampMessage::parse(&text) {
        Ok(parsed) => {
            log_frame_sample_once(&parsed);
            Some(parsed)
        }
        Err(err) => {
            log_parse_fail_once(&err, &text);
            None
        }
    }
}

fn log_frame_sample_once(message: &WampMessage) {
    let count = FRAME_SAMPLE_COUNT.fetch_add(1, Ordering::Relaxed);
    if count < FRAME_SAMPLE_LIMIT {
        info!(
            sample_index = count + 1,
            sample_limit = FRAME_SAMPLE_LIMIT,
            message = message.name(),
            "wamp frame sample"
        );
    }
}

fn log_parse_fail_once(err: &SessionError, raw: &str) {
    let count = PARSE_FAIL_LOG_COUNT.fetch_add(1, Ordering::Relaxed);
    if count < PARSE_FAIL_LOG_LIMIT {
        info!(
            sample_index = count + 1,
            sample_limit = PARSE_FAIL_LOG_LIMIT,
            error = %err,
            bytes = raw.len(),
            "wamp frame parse failed"
        );
        let preview = truncate_for_log(raw, RAW_LOG_MAX_BYTES);
        debug!(
            sample_index = count + 1,
            sample_limit = PARSE_FAIL_LOG_LIMIT,
            error = %err,
            message = %preview,
            "wamp frame parse failed"
        );
    }
}

fn truncate_for_log(value: &str, max_len: usize) -> String {
    if value.len() <= max_len {
        return value.to_string();
    }
    let mut cut = max_len;
    while !value.is_char_boundary(cut) {
        cut -= 1;
    }
    let mut out = String::with_capacity(cut + 3);
    out.push_str(&value[..cut]);
    out.push_str("...");
    out
}
