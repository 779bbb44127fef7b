/*
[INPUT]:  Any concrete transport (WAMP socket, mock)
[OUTPUT]: Session handle shared by every flow
[POS]:    Session layer - request/response and push-subscription primitives
[UPDATE]: When transport primitives change
*/

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;

use super::error::Result;

/// Push-delivery callback. Teardown matches on pointer identity, so the
/// same `Arc` handed to `subscribe` must be handed to `unsubscribe`.
pub type EventCallback = Arc<dyn Fn(Vec<Value>) + Send + Sync>;

/// Stable address of a callback, for logs and test assertions.
pub fn callback_id(callback: &EventCallback) -> usize {
    Arc::as_ptr(callback) as *const () as usize
}

/// Bidirectional channel to the compute engine.
#[async_trait]
pub trait SessionTransport: Send + Sync {
    /// Single request/response round trip keyed by method name.
    async fn call(&self, method: &str, args: Vec<Value>) -> Result<Value>;

    /// Register `callback` for every message published on `topic`.
    async fn subscribe(&self, topic: &str, callback: EventCallback) -> Result<()>;

    /// Remove exactly `callback` from `topic`.
    ///
    /// Synchronous so that it can run from `Drop`; any wire traffic it needs
    /// is queued rather than awaited.
    fn unsubscribe(&self, topic: &str, callback: &EventCallback) -> Result<()>;
}

/// Shared handle to one live engine connection.
#[derive(Clone)]
pub struct Session {
    transport: Arc<dyn SessionTransport>,
}

impl Session {
    pub fn new<T>(transport: T) -> Self
    where
        T: SessionTransport + 'static,
    {
        Self {
            transport: Arc::new(transport),
        }
    }

    pub fn from_arc(transport: Arc<dyn SessionTransport>) -> Self {
        Self { transport }
    }

    pub async fn call(&self, method: &str, args: Vec<Value>) -> Result<Value> {
        self.transport.call(method, args).await
    }

    /// Call and decode the reply into `T`.
    pub async fn call_as<T>(&self, method: &str, args: Vec<Value>) -> Result<T>
    where
        T: DeserializeOwned,
    {
        let value = self.transport.call(method, args).await?;
        Ok(serde_json::from_value(value)?)
    }

    pub async fn subscribe(&self, topic: &str, callback: EventCallback) -> Result<()> {
        self.transport.subscribe(topic, callback).await
    }

    pub fn unsubscribe(&self, topic: &str, callback: &EventCallback) -> Result<()> {
        self.transport.unsubscribe(topic, callback)
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session").finish_non_exhaustive()
    }
}
