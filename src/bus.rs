// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # AMQP Bus Facade
//!
//! This module exposes the single operation surface of the crate. A bus is
//! either disabled (no broker configured) or enabled with a resolved
//! connection profile; the variant is fixed at construction. On a disabled
//! bus every query reports false, `emit` is a guaranteed-safe no-op and every
//! explicit operation fails fast with `NotConfigured` before any I/O.
//!
//! `emit` is intentionally fault tolerant: an event bus must not crash the
//! emitting business logic, so every failure is logged and swallowed. The
//! explicit queue and exchange operations propagate errors instead, since
//! their callers opted into handling broker failures.

use crate::{
    channel::ConnectionSupervisor,
    config::{AmqpConfig, ConnectionProfile},
    dispatcher::{ConsumeOptions, ConsumerRegistry, DeliveryHandler},
    errors::AmqpError,
    exchange::ExchangeDefinition,
    publisher::{self, MessageOptions},
    queue::{QueueBinding, QueueDefinition},
    topology,
};
use serde::Serialize;
use std::{fmt, future::Future, sync::Arc};
use tracing::{debug, error, warn};

/// Prefix of the queues derived for emitted events
pub const EVENT_QUEUE_PREFIX: &str = "events.";

/// The service facade over the broker client.
pub struct AmqpBus {
    backing: Backing,
}

impl fmt::Debug for AmqpBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self.backing {
            Backing::Disabled => "disabled",
            Backing::Enabled(_) => "enabled",
        };
        f.debug_struct("AmqpBus").field("backing", &state).finish()
    }
}

enum Backing {
    Disabled,
    Enabled(Enabled),
}

struct Enabled {
    profile: ConnectionProfile,
    supervisor: ConnectionSupervisor,
    consumers: ConsumerRegistry,
}

impl AmqpBus {
    /// Creates a bus with no broker behind it.
    pub fn disabled() -> AmqpBus {
        AmqpBus {
            backing: Backing::Disabled,
        }
    }

    /// Creates a bus from an optional configuration.
    ///
    /// No configuration yields a disabled bus. A supplied configuration is
    /// resolved into a connection profile; the broker itself is only dialed
    /// on first use.
    pub fn new(config: Option<AmqpConfig>) -> Result<AmqpBus, AmqpError> {
        let Some(config) = config else {
            debug!("no broker configured, bus is disabled");
            return Ok(AmqpBus::disabled());
        };

        let profile = ConnectionProfile::resolve(config)?;

        Ok(AmqpBus {
            backing: Backing::Enabled(Enabled {
                supervisor: ConnectionSupervisor::new(profile.clone()),
                consumers: ConsumerRegistry::new(),
                profile,
            }),
        })
    }

    /// Creates a bus from an asynchronously produced configuration.
    ///
    /// The factory is awaited exactly once, before any connection attempt. A
    /// factory failure aborts construction: a broker that was asked for but
    /// cannot be configured is fatal, unlike a broker never asked for.
    pub async fn from_factory<F, Fut>(factory: F) -> Result<AmqpBus, AmqpError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<AmqpConfig, AmqpError>>,
    {
        let config = factory().await?;
        AmqpBus::new(Some(config))
    }

    /// Whether a broker profile was supplied at construction.
    ///
    /// Independent of current connectivity.
    pub fn is_enabled(&self) -> bool {
        matches!(self.backing, Backing::Enabled(_))
    }

    /// Whether a live channel currently exists. Never dials.
    pub async fn is_connected(&self) -> bool {
        match &self.backing {
            Backing::Enabled(enabled) => enabled.supervisor.is_connected().await,
            Backing::Disabled => false,
        }
    }

    /// Emits a fire-and-forget event.
    ///
    /// The event lands on the derived queue `events.<event>`. Failures are
    /// logged and swallowed; this method never fails, whether the bus is
    /// disabled or the broker is unreachable.
    pub async fn emit<T: Serialize>(&self, event: &str, payload: &T) {
        self.emit_with(event, payload, MessageOptions::new()).await;
    }

    /// Emits a fire-and-forget event with per-message options.
    pub async fn emit_with<T: Serialize>(&self, event: &str, payload: &T, options: MessageOptions) {
        if !self.is_enabled() {
            debug!(event = event, "broker disabled, dropping event");
            return;
        }

        if let Err(err) = self
            .send_to_queue(&event_queue(event), payload, options)
            .await
        {
            warn!(
                error = err.to_string(),
                event = event,
                "failure to emit event"
            );
        }
    }

    /// Sends a message to a queue through the default exchange.
    ///
    /// # Returns
    /// Whether the broker acked the message, or an error when serialization,
    /// the dial or the publish failed.
    pub async fn send_to_queue<T: Serialize>(
        &self,
        queue: &str,
        payload: &T,
        options: MessageOptions,
    ) -> Result<bool, AmqpError> {
        let enabled = self.enabled()?;
        let channel = enabled.supervisor.ensure_channel().await?;
        let payload = serialize(payload)?;

        publisher::publish_bytes(
            &channel,
            "",
            queue,
            &payload,
            enabled.profile.persistent(),
            &options,
        )
        .await
    }

    /// Publishes a message to an exchange with a routing key.
    ///
    /// # Returns
    /// Whether the broker acked the message, or an error when serialization,
    /// the dial or the publish failed.
    pub async fn publish<T: Serialize>(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: &T,
        options: MessageOptions,
    ) -> Result<bool, AmqpError> {
        let enabled = self.enabled()?;
        let channel = enabled.supervisor.ensure_channel().await?;
        let payload = serialize(payload)?;

        publisher::publish_bytes(
            &channel,
            exchange,
            routing_key,
            &payload,
            enabled.profile.persistent(),
            &options,
        )
        .await
    }

    /// Declares a queue.
    pub async fn declare_queue(&self, def: &QueueDefinition) -> Result<(), AmqpError> {
        let enabled = self.enabled()?;
        let channel = enabled.supervisor.ensure_channel().await?;
        topology::declare_queue(&channel, def).await
    }

    /// Declares an exchange.
    pub async fn declare_exchange(&self, def: &ExchangeDefinition) -> Result<(), AmqpError> {
        let enabled = self.enabled()?;
        let channel = enabled.supervisor.ensure_channel().await?;
        topology::declare_exchange(&channel, def).await
    }

    /// Binds a queue to an exchange.
    pub async fn bind_queue(&self, binding: &QueueBinding<'_>) -> Result<(), AmqpError> {
        let enabled = self.enabled()?;
        let channel = enabled.supervisor.ensure_channel().await?;
        topology::bind_queue(&channel, binding).await
    }

    /// Declares the topology named in the connection profile: the default
    /// exchange, the default queue, and the binding between them.
    pub async fn declare_defaults(&self) -> Result<(), AmqpError> {
        let enabled = self.enabled()?;
        let channel = enabled.supervisor.ensure_channel().await?;
        let profile = &enabled.profile;

        if let Some(exchange) = profile.exchange() {
            let mut def = ExchangeDefinition::new(exchange).kind(profile.exchange_kind().clone());
            if !profile.durable() {
                def = def.transient();
            }
            topology::declare_exchange(&channel, &def).await?;
        }

        if let Some(queue) = profile.queue() {
            let mut def = QueueDefinition::new(queue);
            if !profile.durable() {
                def = def.transient();
            }
            topology::declare_queue(&channel, &def).await?;
        }

        if let (Some(queue), Some(exchange)) = (profile.queue(), profile.exchange()) {
            let binding = QueueBinding::new(queue)
                .exchange(exchange)
                .routing_key(profile.routing_key().unwrap_or(""));
            topology::bind_queue(&channel, &binding).await?;
        }

        Ok(())
    }

    /// Registers a consumer on a queue.
    ///
    /// # Returns
    /// The consumer tag, used for [`cancel`](Self::cancel).
    pub async fn consume(
        &self,
        queue: &str,
        handler: Arc<dyn DeliveryHandler>,
        options: ConsumeOptions,
    ) -> Result<String, AmqpError> {
        let enabled = self.enabled()?;
        let channel = enabled.supervisor.ensure_channel().await?;
        enabled.consumers.consume(&channel, queue, handler, options).await
    }

    /// Cancels a consumer by tag.
    pub async fn cancel(&self, tag: &str) -> Result<(), AmqpError> {
        let enabled = self.enabled()?;

        // without a live channel there is no broker-side consumer left to
        // cancel, only the local registration
        if !enabled.supervisor.is_connected().await {
            return enabled.consumers.forget(tag).await;
        }

        let channel = enabled.supervisor.ensure_channel().await?;
        enabled.consumers.cancel(&channel, tag).await
    }

    /// Number of currently registered consumers.
    pub async fn active_consumers(&self) -> usize {
        match &self.backing {
            Backing::Enabled(enabled) => enabled.consumers.active().await,
            Backing::Disabled => 0,
        }
    }

    /// Closes the channel and connection.
    ///
    /// Idempotent and safe to call from a process teardown hook; in-flight
    /// handler invocations are not forcibly cancelled. Never fails.
    pub async fn shutdown(&self) {
        if let Backing::Enabled(enabled) = &self.backing {
            enabled.consumers.clear().await;
            enabled.supervisor.shutdown().await;
        }
    }

    fn enabled(&self) -> Result<&Enabled, AmqpError> {
        match &self.backing {
            Backing::Enabled(enabled) => Ok(enabled),
            Backing::Disabled => Err(AmqpError::NotConfigured),
        }
    }
}

/// Derives the queue name an event is emitted to.
pub(crate) fn event_queue(event: &str) -> String {
    format!("{}{}", EVENT_QUEUE_PREFIX, event)
}

fn serialize<T: Serialize>(payload: &T) -> Result<Vec<u8>, AmqpError> {
    serde_json::to_vec(payload).map_err(|err| {
        error!(error = err.to_string(), "failure to serialize payload");
        AmqpError::SerializePayloadError
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delivery::Delivery;
    use serde_json::json;

    fn unreachable_config() -> AmqpConfig {
        // nothing listens on port 1, so the dial is refused immediately
        AmqpConfig {
            url: "amqp://127.0.0.1:1".to_owned(),
            ..Default::default()
        }
    }

    fn noop_handler() -> Arc<dyn DeliveryHandler> {
        Arc::new(|delivery: Delivery| async move {
            let _ = delivery.ack().await;
        })
    }

    #[tokio::test]
    async fn disabled_bus_reports_disabled_and_disconnected() {
        let bus = AmqpBus::new(None).unwrap();

        assert!(!bus.is_enabled());
        assert!(!bus.is_connected().await);
        assert_eq!(bus.active_consumers().await, 0);
    }

    #[tokio::test]
    async fn disabled_bus_swallows_emitted_events() {
        let bus = AmqpBus::disabled();

        // must resolve without error and without any broker I/O
        bus.emit("user.created", &json!({"id": 1})).await;
    }

    #[tokio::test]
    async fn disabled_bus_fails_explicit_operations_fast() {
        let bus = AmqpBus::disabled();

        assert_eq!(
            bus.send_to_queue("orders", &json!({}), MessageOptions::new())
                .await,
            Err(AmqpError::NotConfigured)
        );
        assert_eq!(
            bus.publish("commerce", "orders.created", &json!({}), MessageOptions::new())
                .await,
            Err(AmqpError::NotConfigured)
        );
        assert_eq!(
            bus.declare_queue(&QueueDefinition::new("orders")).await,
            Err(AmqpError::NotConfigured)
        );
        assert_eq!(
            bus.declare_exchange(&ExchangeDefinition::new("commerce"))
                .await,
            Err(AmqpError::NotConfigured)
        );
        assert_eq!(
            bus.bind_queue(&QueueBinding::new("orders").exchange("commerce"))
                .await,
            Err(AmqpError::NotConfigured)
        );
        assert_eq!(bus.declare_defaults().await, Err(AmqpError::NotConfigured));
        assert_eq!(
            bus.consume("orders", noop_handler(), ConsumeOptions::new())
                .await,
            Err(AmqpError::NotConfigured)
        );
        assert_eq!(bus.cancel("ctag-1").await, Err(AmqpError::NotConfigured));
    }

    #[tokio::test]
    async fn invalid_configuration_aborts_construction() {
        let err = AmqpBus::new(Some(AmqpConfig::default())).unwrap_err();
        assert!(matches!(err, AmqpError::InvalidConfiguration(_)));
    }

    #[tokio::test]
    async fn factory_configuration_enables_the_bus() {
        let bus = AmqpBus::from_factory(|| async { Ok(unreachable_config()) })
            .await
            .unwrap();

        assert!(bus.is_enabled());
        assert!(!bus.is_connected().await);
    }

    #[tokio::test]
    async fn factory_failure_aborts_construction() {
        let err = AmqpBus::from_factory(|| async { Err(AmqpError::InternalError) })
            .await
            .unwrap_err();

        assert_eq!(err, AmqpError::InternalError);
    }

    #[tokio::test]
    async fn unreachable_broker_propagates_from_explicit_operations() {
        let bus = AmqpBus::new(Some(unreachable_config())).unwrap();

        assert!(bus.is_enabled());
        assert_eq!(
            bus.send_to_queue("orders", &json!({"a": 1}), MessageOptions::new())
                .await,
            Err(AmqpError::ConnectionError)
        );
        assert!(!bus.is_connected().await);
    }

    #[tokio::test]
    async fn unreachable_broker_keeps_emit_silent() {
        let bus = AmqpBus::new(Some(unreachable_config())).unwrap();

        // same underlying dial failure as the explicit path, swallowed here
        bus.emit("user.created", &json!({"id": 1})).await;
    }

    #[tokio::test]
    async fn shutdown_is_idempotent_on_any_bus() {
        let disabled = AmqpBus::disabled();
        disabled.shutdown().await;

        let enabled = AmqpBus::new(Some(unreachable_config())).unwrap();
        enabled.shutdown().await;
        enabled.shutdown().await;
    }

    #[test]
    fn event_queue_is_namespaced_by_event_name() {
        assert_eq!(event_queue("user.created"), "events.user.created");
    }
}
