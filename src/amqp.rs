use crate::event::OutputEvent;
use anyhow::{Context, Result};
use lapin::options::{BasicPublishOptions, ExchangeDeclareOptions};
use lapin::types::{FieldTable, ShortString};
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties, ExchangeKind};
use log::{debug, error, warn};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

pub const EXCHANGE_NAME_EVENTS: &str = "switchboard.events";
pub const ROUTING_PREFIX_OUTPUT: &str = "output";

/// Live output events are only useful fresh.
const MESSAGE_TTL_MILLIS: &str = "10000";

/// Publishes output events to a topic exchange, routing key
/// `output.<id>`, so other shack services can react to state changes.
#[derive(Debug)]
pub struct EventPublisher {
    chan: Channel,
}

impl EventPublisher {
    pub async fn connect(addr: &str) -> Result<EventPublisher> {
        let conn = Connection::connect(addr, ConnectionProperties::default())
            .await
            .context("unable to connect to RabbitMQ")?;

        let chan = conn
            .create_channel()
            .await
            .context("unable to set up AMQP channel")?;

        chan.exchange_declare(
            EXCHANGE_NAME_EVENTS,
            ExchangeKind::Topic,
            ExchangeDeclareOptions {
                passive: false,
                durable: false,
                auto_delete: false,
                internal: false,
                nowait: false,
            },
            FieldTable::default(),
        )
        .await
        .context(format!("unable to set up exchange {}", EXCHANGE_NAME_EVENTS))?;

        Ok(EventPublisher { chan })
    }

    pub async fn publish_event(&self, event: &OutputEvent) -> Result<()> {
        let payload = serde_json::to_vec(event).context("unable to encode event")?;
        let routing_key = format!("{}.{}", ROUTING_PREFIX_OUTPUT, event.id);
        debug!("publishing {} bytes to {}", payload.len(), routing_key);
        self.chan
            .basic_publish(
                EXCHANGE_NAME_EVENTS,
                &routing_key,
                BasicPublishOptions {
                    // Does not need to be routed anywhere (i.e., no subscribers?)
                    mandatory: false,
                    immediate: false,
                },
                &payload,
                BasicProperties::default()
                    .with_expiration(ShortString::from(MESSAGE_TTL_MILLIS))
                    .with_delivery_mode(1),
            )
            .await
            .context("unable to basic.publish")?;
        Ok(())
    }
}

/// Forwards events from the in-process channel to the exchange until
/// cancelled. Publish failures are logged, not retried.
pub async fn run_publisher(
    publisher: EventPublisher,
    mut events: broadcast::Receiver<OutputEvent>,
    token: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = token.cancelled() => {
                debug!("amqp publisher: shutting down");
                return;
            }
            event = events.recv() => {
                match event {
                    Ok(ev) => {
                        if let Err(e) = publisher.publish_event(&ev).await {
                            error!("amqp publisher: unable to publish: {:#}", e);
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("amqp publisher: dropped {} events", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => return,
                }
            }
        }
    }
}
