//! Pub/sub seam
//!
//! Publishing and subscribing are separate traits so the two directions can
//! run over separate connections: a subscription waiting for messages must
//! never hold up outgoing publishes.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::stream::{self, Stream};
use tokio::sync::{broadcast, Mutex};
use tracing::warn;

use crate::error::EngineResult;

/// Stream of raw message payloads from one channel
pub type MessageStream = Pin<Box<dyn Stream<Item = Vec<u8>> + Send>>;

#[async_trait]
pub trait Publisher: Send + Sync {
    /// Publish one payload; succeeding with no subscribers is fine
    async fn publish(&self, channel: &str, payload: Vec<u8>) -> EngineResult<()>;
}

#[async_trait]
pub trait Subscriber: Send + Sync {
    /// Subscribe to a channel; only messages published afterwards arrive
    async fn subscribe(&self, channel: &str) -> EngineResult<MessageStream>;
}

/// The publish and subscribe halves handed to the engine
#[derive(Clone)]
pub struct BusHandles {
    pub publisher: Arc<dyn Publisher>,
    pub subscriber: Arc<dyn Subscriber>,
}

impl BusHandles {
    /// Both halves backed by one in-process bus
    pub fn local() -> Self {
        Self::from_local(LocalBus::new())
    }

    pub fn from_local(bus: LocalBus) -> Self {
        Self {
            publisher: Arc::new(bus.clone()),
            subscriber: Arc::new(bus),
        }
    }

    /// Connect to NATS when a URL is configured, otherwise stay in-process
    pub async fn connect(url: Option<&str>) -> EngineResult<Self> {
        match url {
            Some(url) => super::nats::connect(url).await,
            None => Ok(Self::local()),
        }
    }
}

const LOCAL_CAPACITY: usize = 256;

/// In-process bus built on tokio broadcast channels
///
/// Clones share the same channels.
#[derive(Clone, Default)]
pub struct LocalBus {
    channels: Arc<Mutex<HashMap<String, broadcast::Sender<Vec<u8>>>>>,
}

impl LocalBus {
    pub fn new() -> Self {
        Self::default()
    }

    async fn sender(&self, channel: &str) -> broadcast::Sender<Vec<u8>> {
        self.channels
            .lock()
            .await
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(LOCAL_CAPACITY).0)
            .clone()
    }
}

#[async_trait]
impl Publisher for LocalBus {
    async fn publish(&self, channel: &str, payload: Vec<u8>) -> EngineResult<()> {
        // Send only fails when nobody is listening
        let _ = self.sender(channel).await.send(payload);
        Ok(())
    }
}

#[async_trait]
impl Subscriber for LocalBus {
    async fn subscribe(&self, channel: &str) -> EngineResult<MessageStream> {
        let receiver = self.sender(channel).await.subscribe();
        let channel = channel.to_string();

        let messages = stream::unfold((receiver, channel), |(mut receiver, channel)| async move {
            loop {
                match receiver.recv().await {
                    Ok(payload) => return Some((payload, (receiver, channel))),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(%channel, skipped, "subscriber lagged, messages dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        });
        Ok(Box::pin(messages))
    }
}
