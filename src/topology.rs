// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Topology Declaration
//!
//! This module declares broker-side objects: exchanges, queues and the
//! bindings between them. Declarations are idempotent on the broker as long
//! as the definition matches the existing object. Queues may carry TTL,
//! max-length and dead-letter arguments; the Dead Letter Queue itself is
//! declared here before the main queue references it.

use crate::{
    errors::AmqpError,
    exchange::ExchangeDefinition,
    queue::{QueueBinding, QueueDefinition},
};
use lapin::{
    options::{ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions},
    types::{AMQPValue, FieldTable, LongInt, LongString, ShortString},
    Channel,
};
use std::collections::BTreeMap;
use tracing::{debug, error};

/// Header field naming the dead letter exchange of a queue
pub const AMQP_HEADERS_DEAD_LETTER_EXCHANGE: &str = "x-dead-letter-exchange";
/// Header field naming the dead letter routing key of a queue
pub const AMQP_HEADERS_DEAD_LETTER_ROUTING_KEY: &str = "x-dead-letter-routing-key";
/// Header field carrying the message TTL of a queue
pub const AMQP_HEADERS_MESSAGE_TTL: &str = "x-message-ttl";
/// Header field carrying the maximum length of a queue
pub const AMQP_HEADERS_MAX_LENGTH: &str = "x-max-length";

/// Declares an exchange on the given channel.
///
/// # Returns
/// Ok(()) on success or `AmqpError::DeclareExchangeError` on failure.
pub async fn declare_exchange(
    channel: &Channel,
    def: &ExchangeDefinition,
) -> Result<(), AmqpError> {
    debug!("creating exchange: {}", def.name);

    match channel
        .exchange_declare(
            &def.name,
            def.kind.clone().into(),
            ExchangeDeclareOptions {
                passive: def.passive,
                durable: def.durable,
                auto_delete: def.delete,
                internal: def.internal,
                nowait: def.no_wait,
            },
            FieldTable::default(),
        )
        .await
    {
        Err(err) => {
            error!(
                error = err.to_string(),
                name = def.name(),
                "failure to declare the exchange"
            );
            Err(AmqpError::DeclareExchangeError(def.name.clone()))
        }
        _ => {
            debug!("exchange: {} was created", def.name);
            Ok(())
        }
    }
}

/// Declares a queue on the given channel.
///
/// When the definition carries a DLQ, the DLQ is declared first and the main
/// queue is created with dead-letter arguments routing rejected and expired
/// messages to it through the default exchange.
///
/// # Returns
/// Ok(()) on success or `AmqpError::DeclareQueueError` on failure.
pub async fn declare_queue(channel: &Channel, def: &QueueDefinition) -> Result<(), AmqpError> {
    debug!("creating queue: {}", def.name);

    if let Some(dlq_name) = &def.dlq_name {
        declare_dlq(channel, def, dlq_name).await?;
    }

    match channel
        .queue_declare(
            &def.name,
            QueueDeclareOptions {
                passive: def.passive,
                durable: def.durable,
                exclusive: def.exclusive,
                auto_delete: def.delete,
                nowait: def.no_wait,
            },
            FieldTable::from(queue_arguments(def)),
        )
        .await
    {
        Err(err) => {
            error!(
                error = err.to_string(),
                name = def.name(),
                "failure to declare the queue"
            );
            Err(AmqpError::DeclareQueueError(def.name.clone()))
        }
        _ => {
            debug!("queue: {} was created", def.name);
            Ok(())
        }
    }
}

/// Binds a queue to an exchange on the given channel.
///
/// # Returns
/// Ok(()) on success or `AmqpError::BindingExchangeToQueueError` on failure.
pub async fn bind_queue(channel: &Channel, binding: &QueueBinding<'_>) -> Result<(), AmqpError> {
    debug!(
        "binding queue: {} to the exchange: {} with the key: {}",
        binding.queue_name, binding.exchange_name, binding.routing_key
    );

    match channel
        .queue_bind(
            binding.queue_name,
            binding.exchange_name,
            binding.routing_key,
            QueueBindOptions { nowait: false },
            FieldTable::default(),
        )
        .await
    {
        Err(err) => {
            error!(error = err.to_string(), "failure to bind queue to exchange");
            Err(AmqpError::BindingExchangeToQueueError(
                binding.exchange_name.to_owned(),
                binding.queue_name.to_owned(),
            ))
        }
        _ => {
            debug!("queue was bound");
            Ok(())
        }
    }
}

async fn declare_dlq(
    channel: &Channel,
    def: &QueueDefinition,
    dlq_name: &str,
) -> Result<(), AmqpError> {
    debug!("creating dlq: {}", dlq_name);

    match channel
        .queue_declare(
            dlq_name,
            QueueDeclareOptions {
                passive: def.passive,
                durable: def.durable,
                exclusive: def.exclusive,
                auto_delete: def.delete,
                nowait: def.no_wait,
            },
            FieldTable::default(),
        )
        .await
    {
        Err(err) => {
            error!(error = err.to_string(), "failure to declare the dlq");
            Err(AmqpError::DeclareQueueError(dlq_name.to_owned()))
        }
        _ => Ok(()),
    }
}

/// Builds the x-arguments of a queue declaration from its definition.
pub(crate) fn queue_arguments(def: &QueueDefinition) -> BTreeMap<ShortString, AMQPValue> {
    let mut args = BTreeMap::new();

    if let Some(dlq_name) = &def.dlq_name {
        args.insert(
            ShortString::from(AMQP_HEADERS_DEAD_LETTER_EXCHANGE),
            AMQPValue::LongString(LongString::from("")),
        );
        args.insert(
            ShortString::from(AMQP_HEADERS_DEAD_LETTER_ROUTING_KEY),
            AMQPValue::LongString(LongString::from(dlq_name.clone())),
        );
    }

    if let Some(ttl) = def.ttl {
        args.insert(
            ShortString::from(AMQP_HEADERS_MESSAGE_TTL),
            AMQPValue::LongInt(LongInt::from(ttl)),
        );
    }

    if let Some(max) = def.max_length {
        args.insert(
            ShortString::from(AMQP_HEADERS_MAX_LENGTH),
            AMQPValue::LongInt(LongInt::from(max)),
        );
    }

    args
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_queue_has_no_arguments() {
        let def = QueueDefinition::new("orders");
        assert!(queue_arguments(&def).is_empty());
    }

    #[test]
    fn dlq_queue_routes_dead_letters_through_default_exchange() {
        let def = QueueDefinition::new("orders").with_dlq();
        let args = queue_arguments(&def);

        assert_eq!(
            args.get(&ShortString::from(AMQP_HEADERS_DEAD_LETTER_EXCHANGE)),
            Some(&AMQPValue::LongString(LongString::from("")))
        );
        assert_eq!(
            args.get(&ShortString::from(AMQP_HEADERS_DEAD_LETTER_ROUTING_KEY)),
            Some(&AMQPValue::LongString(LongString::from("orders-dlq")))
        );
    }

    #[test]
    fn ttl_and_max_length_become_arguments() {
        let def = QueueDefinition::new("orders").ttl(30_000).max_length(500);
        let args = queue_arguments(&def);

        assert_eq!(
            args.get(&ShortString::from(AMQP_HEADERS_MESSAGE_TTL)),
            Some(&AMQPValue::LongInt(LongInt::from(30_000)))
        );
        assert_eq!(
            args.get(&ShortString::from(AMQP_HEADERS_MAX_LENGTH)),
            Some(&AMQPValue::LongInt(LongInt::from(500)))
        );
    }
}
