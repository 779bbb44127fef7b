/*
[INPUT]:  Session + topic + event mapper
[OUTPUT]: EventChannel: ordered, cancellable pull sequence over a push subscription
[POS]:    Bridge layer - callback delivery to flow-consumable events
[UPDATE]: When changing registration or teardown guarantees
*/

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use anyhow::{Context as _, Result};
use serde_json::Value;
use taskpanel_session::{EventCallback, Session, callback_id};
use tokio::sync::mpsc;
use tracing::{debug, warn};

type WeakCallback = Weak<dyn Fn(Vec<Value>) + Send + Sync>;

/// Single-consumer FIFO of mapped events from one topic.
///
/// The session owns the only strong reference to the registered callback,
/// and the callback owns the queue's sender. When the session drops its
/// registrations (connection lost) [`EventChannel::receive`] yields `None`.
///
/// Dropping the channel deregisters it, so a flow that is aborted mid-await
/// still releases its subscription.
pub struct EventChannel<T> {
    session: Session,
    topic: String,
    callback: WeakCallback,
    callback_id: usize,
    open: Arc<AtomicBool>,
    rx: mpsc::UnboundedReceiver<T>,
}

impl<T: Send + 'static> EventChannel<T> {
    /// Register on `topic`; every delivery is passed through `map_event`.
    /// Deliveries the mapper rejects are logged and dropped.
    pub async fn open<F>(session: &Session, topic: &str, map_event: F) -> Result<Self>
    where
        F: Fn(Vec<Value>) -> Result<T> + Send + Sync + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let open = Arc::new(AtomicBool::new(true));

        let gate = open.clone();
        let label = topic.to_string();
        let callback: EventCallback = Arc::new(move |args: Vec<Value>| {
            if !gate.load(Ordering::Acquire) {
                debug!(topic = %label, "event after close ignored");
                return;
            }
            match map_event(args) {
                Ok(event) => {
                    let _ = tx.send(event);
                }
                Err(err) => warn!(topic = %label, error = %format!("{err:#}"), "malformed event dropped"),
            }
        });
        let weak = Arc::downgrade(&callback);
        let id = callback_id(&callback);

        session
            .subscribe(topic, callback)
            .await
            .with_context(|| format!("subscribe topic={topic}"))?;
        debug!(topic, callback = id, "event channel opened");

        Ok(Self {
            session: session.clone(),
            topic: topic.to_string(),
            callback: weak,
            callback_id: id,
            open,
            rx,
        })
    }

    /// Next event in arrival order; `None` once the channel is closed or the
    /// session dropped the subscription.
    pub async fn receive(&mut self) -> Option<T> {
        self.rx.recv().await
    }
}

impl<T> EventChannel<T> {
    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    /// Deregister from the session. Idempotent.
    pub fn close(&mut self) {
        if !self.open.swap(false, Ordering::AcqRel) {
            return;
        }
        self.rx.close();

        let Some(callback) = self.callback.upgrade() else {
            debug!(topic = %self.topic, "subscription already released by session");
            return;
        };
        match self.session.unsubscribe(&self.topic, &callback) {
            Ok(()) => debug!(topic = %self.topic, callback = self.callback_id, "event channel closed"),
            Err(err) => warn!(topic = %self.topic, error = %err, "unsubscribe failed"),
        }
    }
}

impl<T> Drop for EventChannel<T> {
    fn drop(&mut self) {
        self.close();
    }
}
