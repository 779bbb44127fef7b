/*
[INPUT]:  Scripted replies and test-driven publications
[OUTPUT]: In-process SessionTransport with call and subscription logs
[POS]:    Test support - deterministic stand-in for the engine
[UPDATE]: When tests need new scripting hooks
*/

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{Notify, oneshot};

use crate::session::{EventCallback, Result, SessionError, SessionTransport, callback_id};

#[derive(Debug, Clone)]
enum Script {
    Respond(Value),
    Reject(String),
    Fail(String),
    Hold,
}

/// One call observed by the mock.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    pub method: String,
    pub args: Vec<Value>,
}

/// One subscribe or unsubscribe observed by the mock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedSubscription {
    pub topic: String,
    pub callback: usize,
}

#[derive(Default)]
struct MockState {
    scripts: HashMap<String, Script>,
    calls: Vec<RecordedCall>,
    completed: Vec<RecordedCall>,
    parked: VecDeque<(String, oneshot::Sender<Result<Value>>)>,
    subscribers: Vec<(String, EventCallback)>,
    subscribe_log: Vec<RecordedSubscription>,
    unsubscribe_log: Vec<RecordedSubscription>,
}

/// Scriptable engine double.
///
/// Methods without a script answer `null`. Held methods park every call
/// until [`MockSession::release`] resolves them, which lets tests observe
/// whether the caller was still waiting.
#[derive(Default)]
pub struct MockSession {
    state: Mutex<MockState>,
    changed: Notify,
}

impl MockSession {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Every call to `method` succeeds with `value`.
    pub fn respond(&self, method: &str, value: Value) {
        self.script(method, Script::Respond(value));
    }

    /// Every call to `method` fails with an engine rejection carrying `message`.
    pub fn reject(&self, method: &str, message: &str) {
        self.script(method, Script::Reject(message.to_string()));
    }

    /// Every call to `method` fails at the transport level.
    pub fn fail(&self, method: &str, message: &str) {
        self.script(method, Script::Fail(message.to_string()));
    }

    /// Calls to `method` wait until released.
    pub fn hold(&self, method: &str) {
        self.script(method, Script::Hold);
    }

    /// Resolve every parked call to `method` with `value`.
    ///
    /// Returns how many callers were still waiting to receive it.
    pub fn release(&self, method: &str, value: Value) -> usize {
        let parked: Vec<oneshot::Sender<Result<Value>>> = {
            let mut state = self.state.lock();
            let (matching, rest): (VecDeque<_>, VecDeque<_>) =
                state.parked.drain(..).partition(|(name, _)| name == method);
            state.parked = rest;
            matching.into_iter().map(|(_, reply)| reply).collect()
        };
        parked
            .into_iter()
            .filter(|reply| !reply.is_closed())
            .map(|reply| reply.send(Ok(value.clone())))
            .filter(|sent| sent.is_ok())
            .count()
    }

    /// Deliver `args` to every callback registered on `topic`.
    pub fn publish(&self, topic: &str, args: Vec<Value>) -> usize {
        let callbacks: Vec<EventCallback> = self
            .state
            .lock()
            .subscribers
            .iter()
            .filter(|(registered, _)| registered == topic)
            .map(|(_, callback)| callback.clone())
            .collect();
        for callback in &callbacks {
            callback(args.clone());
        }
        callbacks.len()
    }

    /// Drop every registration, as a broken connection would.
    pub fn disconnect(&self) {
        let dropped = std::mem::take(&mut self.state.lock().subscribers);
        drop(dropped);
        self.changed.notify_waiters();
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.state.lock().calls.clone()
    }

    pub fn calls_to(&self, method: &str) -> Vec<RecordedCall> {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|call| call.method == method)
            .cloned()
            .collect()
    }

    /// Calls whose reply reached the caller.
    pub fn completed_calls_to(&self, method: &str) -> Vec<RecordedCall> {
        self.state
            .lock()
            .completed
            .iter()
            .filter(|call| call.method == method)
            .cloned()
            .collect()
    }

    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.state
            .lock()
            .subscribers
            .iter()
            .filter(|(registered, _)| registered == topic)
            .count()
    }

    /// Callbacks currently registered on `topic`, in registration order.
    pub fn callbacks(&self, topic: &str) -> Vec<EventCallback> {
        self.state
            .lock()
            .subscribers
            .iter()
            .filter(|(registered, _)| registered == topic)
            .map(|(_, callback)| callback.clone())
            .collect()
    }

    pub fn subscribe_log(&self) -> Vec<RecordedSubscription> {
        self.state.lock().subscribe_log.clone()
    }

    pub fn unsubscribe_log(&self) -> Vec<RecordedSubscription> {
        self.state.lock().unsubscribe_log.clone()
    }

    /// Wait until at least `count` calls to `method` were made.
    pub async fn wait_for_calls(&self, method: &str, count: usize) {
        loop {
            let notified = self.changed.notified();
            if self.calls_to(method).len() >= count {
                return;
            }
            notified.await;
        }
    }

    /// Wait until exactly `count` callbacks are registered on `topic`.
    pub async fn wait_for_subscribers(&self, topic: &str, count: usize) {
        loop {
            let notified = self.changed.notified();
            if self.subscriber_count(topic) == count {
                return;
            }
            notified.await;
        }
    }

    fn script(&self, method: &str, script: Script) {
        self.state.lock().scripts.insert(method.to_string(), script);
    }
}

#[async_trait]
impl SessionTransport for MockSession {
    async fn call(&self, method: &str, args: Vec<Value>) -> Result<Value> {
        let record = RecordedCall {
            method: method.to_string(),
            args,
        };

        let (script, parked) = {
            let mut state = self.state.lock();
            state.calls.push(record.clone());
            let script = state
                .scripts
                .get(method)
                .cloned()
                .unwrap_or(Script::Respond(Value::Null));
            let parked = if matches!(script, Script::Hold) {
                let (tx, rx) = oneshot::channel();
                state.parked.push_back((method.to_string(), tx));
                Some(rx)
            } else {
                None
            };
            (script, parked)
        };
        self.changed.notify_waiters();

        let result = match (script, parked) {
            (_, Some(rx)) => rx.await.map_err(|_| SessionError::Closed)?,
            (Script::Respond(value), None) => Ok(value),
            (Script::Reject(message), None) => Err(SessionError::EngineRejection {
                uri: "wamp.error.runtime_error".to_string(),
                message,
            }),
            (Script::Fail(message), None) => Err(SessionError::Transport(message)),
            (Script::Hold, None) => Err(SessionError::Closed),
        };

        self.state.lock().completed.push(record);
        self.changed.notify_waiters();
        result
    }

    async fn subscribe(&self, topic: &str, callback: EventCallback) -> Result<()> {
        {
            let mut state = self.state.lock();
            state.subscribe_log.push(RecordedSubscription {
                topic: topic.to_string(),
                callback: callback_id(&callback),
            });
            state.subscribers.push((topic.to_string(), callback));
        }
        self.changed.notify_waiters();
        Ok(())
    }

    fn unsubscribe(&self, topic: &str, callback: &EventCallback) -> Result<()> {
        let removed = {
            let mut state = self.state.lock();
            let position = state.subscribers.iter().position(|(registered, existing)| {
                registered == topic && Arc::ptr_eq(existing, callback)
            });
            position.map(|index| {
                state.unsubscribe_log.push(RecordedSubscription {
                    topic: topic.to_string(),
                    callback: callback_id(callback),
                });
                state.subscribers.remove(index)
            })
        };
        self.changed.notify_waiters();

        match removed {
            // Released outside the lock; the callback owns channel senders.
            Some(entry) => {
                drop(entry);
                Ok(())
            }
            None => Err(SessionError::UnknownSubscription {
                topic: topic.to_string(),
            }),
        }
    }
}
