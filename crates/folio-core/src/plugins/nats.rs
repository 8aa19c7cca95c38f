//! NATS-backed bus
//!
//! Publishing and subscribing use two separate client connections.

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::StreamExt;
use tracing::{debug, info};

use super::bus::{BusHandles, MessageStream, Publisher, Subscriber};
use crate::error::{EngineError, EngineResult};

pub struct NatsPublisher {
    client: async_nats::Client,
}

pub struct NatsSubscriber {
    client: async_nats::Client,
}

async fn open(url: &str, role: &str) -> EngineResult<async_nats::Client> {
    info!(url, role, "connecting to NATS server");
    async_nats::connect(url)
        .await
        .map_err(|e| EngineError::Bus(format!("failed to connect to {url}: {e}")))
}

/// Open the publish and subscribe connections
pub async fn connect(url: &str) -> EngineResult<BusHandles> {
    let publisher = NatsPublisher {
        client: open(url, "publish").await?,
    };
    let subscriber = NatsSubscriber {
        client: open(url, "subscribe").await?,
    };
    info!("NATS connections established");

    Ok(BusHandles {
        publisher: Arc::new(publisher),
        subscriber: Arc::new(subscriber),
    })
}

#[async_trait]
impl Publisher for NatsPublisher {
    async fn publish(&self, channel: &str, payload: Vec<u8>) -> EngineResult<()> {
        self.client
            .publish(channel.to_string(), payload.into())
            .await
            .map_err(|e| EngineError::Bus(format!("failed to publish to {channel}: {e}")))?;
        self.client
            .flush()
            .await
            .map_err(|e| EngineError::Bus(format!("failed to flush {channel}: {e}")))?;
        debug!(channel, "published message");
        Ok(())
    }
}

#[async_trait]
impl Subscriber for NatsSubscriber {
    async fn subscribe(&self, channel: &str) -> EngineResult<MessageStream> {
        let subscription = self
            .client
            .subscribe(channel.to_string())
            .await
            .map_err(|e| EngineError::Bus(format!("failed to subscribe to {channel}: {e}")))?;
        info!(channel, "subscribed");
        Ok(Box::pin(subscription.map(|message| message.payload.to_vec())))
    }
}
