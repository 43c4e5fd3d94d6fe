// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Consumer Registration
//!
//! This module tracks the active consumers of a bus. Registering a consumer
//! binds a handler to a queue: a spawned task drives the broker's delivery
//! stream and routes every decoded message to the handler. Entries are keyed
//! by consumer tag and removed on explicit cancellation or when the delivery
//! stream ends with the channel.

use crate::{consumer::process_delivery, delivery::Delivery, errors::AmqpError};
use async_trait::async_trait;
use futures_util::StreamExt;
use lapin::{
    options::{BasicCancelOptions, BasicConsumeOptions},
    types::FieldTable,
    Channel,
};
use opentelemetry::global;
use std::{collections::HashMap, future::Future, sync::Arc};
use tokio::sync::Mutex;
use tracing::{debug, error, warn};
use uuid::Uuid;

/// Handler invoked for each decoded delivery of a registered consumer.
///
/// The handler owns the acknowledgment protocol: it must resolve each
/// delivery it receives with exactly one of ack, nack or reject. The
/// [`Delivery`] API makes a second resolution impossible; a handler that
/// resolves none leaves the message unacknowledged until the channel closes.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DeliveryHandler: Send + Sync {
    async fn handle(&self, delivery: Delivery);
}

#[async_trait]
impl<F, Fut> DeliveryHandler for F
where
    F: Fn(Delivery) -> Fut + Send + Sync,
    Fut: Future<Output = ()> + Send,
{
    async fn handle(&self, delivery: Delivery) {
        (self)(delivery).await;
    }
}

/// Options applied when registering a consumer.
///
/// Acknowledgment is manual by default; with [`auto_ack`](Self::auto_ack) the
/// broker settles messages on delivery and the handler's resolution calls
/// become no-ops.
#[derive(Debug, Clone, Default)]
pub struct ConsumeOptions {
    pub(crate) auto_ack: bool,
    pub(crate) exclusive: bool,
}

impl ConsumeOptions {
    /// Creates the default options: manual ack, non-exclusive.
    pub fn new() -> ConsumeOptions {
        ConsumeOptions::default()
    }

    /// Lets the broker settle messages on delivery, without explicit acks.
    pub fn auto_ack(mut self) -> Self {
        self.auto_ack = true;
        self
    }

    /// Makes this the only consumer allowed on the queue.
    pub fn exclusive(mut self) -> Self {
        self.exclusive = true;
        self
    }
}

/// A registered consumer: its queue and ack mode, keyed by consumer tag.
struct ConsumerEntry {
    queue: String,
    auto_ack: bool,
}

/// Tracks the active consumers of one bus.
pub(crate) struct ConsumerRegistry {
    entries: Arc<Mutex<HashMap<String, ConsumerEntry>>>,
}

impl ConsumerRegistry {
    pub(crate) fn new() -> ConsumerRegistry {
        ConsumerRegistry {
            entries: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Registers a consumer on the given queue and spawns its delivery loop.
    ///
    /// # Returns
    /// The consumer tag, or `AmqpError::BindingConsumerError` when the
    /// consumer cannot be declared.
    pub(crate) async fn consume(
        &self,
        channel: &Channel,
        queue: &str,
        handler: Arc<dyn DeliveryHandler>,
        options: ConsumeOptions,
    ) -> Result<String, AmqpError> {
        let tag = format!("consumer-{}", Uuid::new_v4());

        let mut consumer = match channel
            .basic_consume(
                queue,
                &tag,
                BasicConsumeOptions {
                    no_local: false,
                    no_ack: options.auto_ack,
                    exclusive: options.exclusive,
                    nowait: false,
                },
                FieldTable::default(),
            )
            .await
        {
            Ok(consumer) => consumer,
            Err(err) => {
                error!(error = err.to_string(), "error to create the consumer");
                return Err(AmqpError::BindingConsumerError(queue.to_owned()));
            }
        };

        self.entries.lock().await.insert(
            tag.clone(),
            ConsumerEntry {
                queue: queue.to_owned(),
                auto_ack: options.auto_ack,
            },
        );

        let entries = self.entries.clone();
        let task_tag = tag.clone();
        let task_queue = queue.to_owned();
        let auto_ack = options.auto_ack;

        tokio::spawn(async move {
            let tracer = global::tracer("amqp consumer");

            while let Some(result) = consumer.next().await {
                match result {
                    Ok(delivery) => {
                        if let Err(err) =
                            process_delivery(&tracer, &task_queue, delivery, &handler, auto_ack)
                                .await
                        {
                            error!(error = err.to_string(), "error consume msg");
                        }
                    }
                    Err(err) => error!(error = err.to_string(), "errors consume msg"),
                }
            }

            // the stream only ends when the channel or connection goes away
            warn!(tag = task_tag.as_str(), "consumer stream ended, unregistering");
            entries.lock().await.remove(&task_tag);
        });

        debug!(tag = tag.as_str(), queue = queue, "consumer registered");
        Ok(tag)
    }

    /// Cancels a consumer at the broker and forgets its registration.
    pub(crate) async fn cancel(&self, channel: &Channel, tag: &str) -> Result<(), AmqpError> {
        self.forget(tag).await?;

        channel
            .basic_cancel(tag, BasicCancelOptions::default())
            .await
            .map_err(|err| {
                error!(error = err.to_string(), "error to cancel the consumer");
                AmqpError::CancelConsumerError(tag.to_owned())
            })
    }

    /// Drops a registration without talking to the broker.
    pub(crate) async fn forget(&self, tag: &str) -> Result<(), AmqpError> {
        match self.entries.lock().await.remove(tag) {
            Some(entry) => {
                debug!(
                    tag = tag,
                    queue = entry.queue.as_str(),
                    auto_ack = entry.auto_ack,
                    "consumer unregistered"
                );
                Ok(())
            }
            None => Err(AmqpError::CancelConsumerError(tag.to_owned())),
        }
    }

    /// Number of currently registered consumers.
    pub(crate) async fn active(&self) -> usize {
        self.entries.lock().await.len()
    }

    /// Drops every registration, used on bus shutdown.
    pub(crate) async fn clear(&self) {
        self.entries.lock().await.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex as StdMutex;

    #[test]
    fn consume_options_default_to_manual_ack() {
        let options = ConsumeOptions::new();
        assert!(!options.auto_ack);
        assert!(!options.exclusive);

        let options = ConsumeOptions::new().auto_ack().exclusive();
        assert!(options.auto_ack);
        assert!(options.exclusive);
    }

    #[tokio::test]
    async fn closures_are_delivery_handlers() {
        use lapin::{acker::Acker, protocol::basic::AMQPProperties};

        let seen = Arc::new(StdMutex::new(0));
        let sink = seen.clone();

        let handler: Arc<dyn DeliveryHandler> = Arc::new(move |delivery: Delivery| {
            let sink = sink.clone();
            async move {
                *sink.lock().unwrap() += 1;
                let _ = delivery.ack().await;
            }
        });

        let delivery = Delivery::new(
            "orders",
            json!({}),
            lapin::message::Delivery {
                delivery_tag: 1,
                exchange: "".into(),
                routing_key: "orders".into(),
                redelivered: false,
                properties: AMQPProperties::default(),
                data: vec![],
                acker: Acker::default(),
            },
            true,
        );

        handler.handle(delivery).await;
        assert_eq!(*seen.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn forgetting_an_unknown_tag_is_an_error() {
        let registry = ConsumerRegistry::new();

        assert_eq!(registry.active().await, 0);
        assert_eq!(
            registry.forget("ctag-1").await,
            Err(AmqpError::CancelConsumerError("ctag-1".to_owned()))
        );
    }
}
