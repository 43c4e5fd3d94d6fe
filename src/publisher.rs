// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Message Publishing
//!
//! This module builds outbound messages and hands them to the broker client.
//! Payloads are serialized JSON; properties carry a generated message id, the
//! persistence mode (defaulted from the connection profile, overridable per
//! message), and user headers merged with the propagated trace context.

use crate::{errors::AmqpError, otel::AmqpTracePropagator};
use lapin::{
    options::BasicPublishOptions,
    publisher_confirm::Confirmation,
    types::{AMQPValue, FieldTable, LongInt, LongLongInt, LongString, LongUInt, ShortString},
    BasicProperties, Channel,
};
use opentelemetry::{global, Context};
use std::collections::{BTreeMap, HashMap};
use tracing::error;
use uuid::Uuid;

/// Content type stamped on every published message
pub const JSON_CONTENT_TYPE: &str = "application/json";

/// Delivery mode marking a message as persisted by the broker
const DELIVERY_MODE_PERSISTENT: u8 = 2;
/// Delivery mode marking a message as transient
const DELIVERY_MODE_TRANSIENT: u8 = 1;

/// A typed header value attached to an outbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum HeaderValue {
    Text(String),
    Bool(bool),
    Int(i32),
    LongInt(i64),
    UInt(u32),
}

/// Per-message options applied when publishing.
///
/// Everything is optional; unset fields fall back to the profile defaults
/// (persistence) or are simply omitted from the message properties.
#[derive(Debug, Clone, Default)]
pub struct MessageOptions {
    pub(crate) persistent: Option<bool>,
    pub(crate) priority: Option<u8>,
    pub(crate) expiration: Option<String>,
    pub(crate) message_type: Option<String>,
    pub(crate) headers: HashMap<String, HeaderValue>,
}

impl MessageOptions {
    /// Creates empty options, leaving every field at its default.
    pub fn new() -> MessageOptions {
        MessageOptions::default()
    }

    /// Overrides the profile-level persistence for this message.
    pub fn persistent(mut self, persistent: bool) -> Self {
        self.persistent = Some(persistent);
        self
    }

    /// Sets the message priority.
    pub fn priority(mut self, priority: u8) -> Self {
        self.priority = Some(priority);
        self
    }

    /// Sets the per-message expiration, in milliseconds.
    pub fn expiration(mut self, expiration: &str) -> Self {
        self.expiration = Some(expiration.to_owned());
        self
    }

    /// Sets the message type property used by consumers to route handlers.
    pub fn message_type(mut self, message_type: &str) -> Self {
        self.message_type = Some(message_type.to_owned());
        self
    }

    /// Adds a single header to the message.
    pub fn header(mut self, key: &str, value: HeaderValue) -> Self {
        self.headers.insert(key.to_owned(), value);
        self
    }
}

/// Publishes a serialized payload and waits for the publisher confirm.
///
/// # Returns
/// `Ok(true)` when the broker acked (or confirms were not requested),
/// `Ok(false)` on a broker nack, `AmqpError::PublishingError` when the
/// publish itself failed.
pub(crate) async fn publish_bytes(
    channel: &Channel,
    exchange: &str,
    routing_key: &str,
    payload: &[u8],
    default_persistent: bool,
    options: &MessageOptions,
) -> Result<bool, AmqpError> {
    let mut headers = BTreeMap::<ShortString, AMQPValue>::default();

    global::get_text_map_propagator(|propagator| {
        propagator.inject_context(&Context::current(), &mut AmqpTracePropagator::new(&mut headers))
    });

    append_headers(&options.headers, &mut headers);

    let confirm = match channel
        .basic_publish(
            exchange,
            routing_key,
            BasicPublishOptions {
                immediate: false,
                mandatory: false,
            },
            payload,
            properties(default_persistent, options, headers),
        )
        .await
    {
        Ok(confirm) => confirm,
        Err(err) => {
            error!(error = err.to_string(), "error publishing message");
            return Err(AmqpError::PublishingError);
        }
    };

    match confirm.await {
        Ok(confirmation) => Ok(!matches!(confirmation, Confirmation::Nack(_))),
        Err(err) => {
            error!(error = err.to_string(), "error awaiting publisher confirm");
            Err(AmqpError::PublishingError)
        }
    }
}

/// Builds the AMQP properties for one outbound message.
fn properties(
    default_persistent: bool,
    options: &MessageOptions,
    headers: BTreeMap<ShortString, AMQPValue>,
) -> BasicProperties {
    let persistent = options.persistent.unwrap_or(default_persistent);
    let delivery_mode = if persistent {
        DELIVERY_MODE_PERSISTENT
    } else {
        DELIVERY_MODE_TRANSIENT
    };

    let mut props = BasicProperties::default()
        .with_content_type(ShortString::from(JSON_CONTENT_TYPE))
        .with_message_id(ShortString::from(Uuid::new_v4().to_string()))
        .with_delivery_mode(delivery_mode)
        .with_headers(FieldTable::from(headers));

    if let Some(priority) = options.priority {
        props = props.with_priority(priority);
    }

    if let Some(expiration) = &options.expiration {
        props = props.with_expiration(ShortString::from(expiration.clone()));
    }

    if let Some(message_type) = &options.message_type {
        props = props.with_kind(ShortString::from(message_type.clone()));
    }

    props
}

/// Converts user header values into AMQP field-table values.
fn append_headers(
    headers: &HashMap<String, HeaderValue>,
    btree: &mut BTreeMap<ShortString, AMQPValue>,
) {
    for (key, value) in headers {
        let amqp_value = match value {
            HeaderValue::Text(v) => AMQPValue::LongString(LongString::from(v.clone())),
            HeaderValue::Bool(v) => AMQPValue::Boolean(*v),
            HeaderValue::Int(v) => AMQPValue::LongInt(LongInt::from(*v)),
            HeaderValue::LongInt(v) => AMQPValue::LongLongInt(LongLongInt::from(*v)),
            HeaderValue::UInt(v) => AMQPValue::LongUInt(LongUInt::from(*v)),
        };

        btree.insert(ShortString::from(key.clone()), amqp_value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn properties_default_to_persistent_json() {
        let props = properties(true, &MessageOptions::new(), BTreeMap::default());

        assert_eq!(props.delivery_mode(), &Some(DELIVERY_MODE_PERSISTENT));
        assert_eq!(
            props.content_type(),
            &Some(ShortString::from(JSON_CONTENT_TYPE))
        );
        assert!(props.message_id().is_some());
        assert_eq!(props.priority(), &None);
        assert_eq!(props.expiration(), &None);
    }

    #[test]
    fn per_message_persistence_overrides_profile_default() {
        let options = MessageOptions::new().persistent(false);
        let props = properties(true, &options, BTreeMap::default());

        assert_eq!(props.delivery_mode(), &Some(DELIVERY_MODE_TRANSIENT));
    }

    #[test]
    fn optional_properties_are_applied() {
        let options = MessageOptions::new()
            .priority(5)
            .expiration("60000")
            .message_type("order.created");
        let props = properties(false, &options, BTreeMap::default());

        assert_eq!(props.priority(), &Some(5));
        assert_eq!(props.expiration(), &Some(ShortString::from("60000")));
        assert_eq!(props.kind(), &Some(ShortString::from("order.created")));
    }

    #[test]
    fn headers_convert_to_amqp_values() {
        let headers = HashMap::from([
            ("tenant".to_owned(), HeaderValue::Text("acme".to_owned())),
            ("replayed".to_owned(), HeaderValue::Bool(true)),
            ("attempt".to_owned(), HeaderValue::Int(3)),
            ("offset".to_owned(), HeaderValue::LongInt(1_234_567)),
            ("shard".to_owned(), HeaderValue::UInt(7)),
        ]);

        let mut btree = BTreeMap::default();
        append_headers(&headers, &mut btree);

        assert_eq!(
            btree.get(&ShortString::from("tenant")),
            Some(&AMQPValue::LongString(LongString::from("acme")))
        );
        assert_eq!(
            btree.get(&ShortString::from("replayed")),
            Some(&AMQPValue::Boolean(true))
        );
        assert_eq!(
            btree.get(&ShortString::from("attempt")),
            Some(&AMQPValue::LongInt(3))
        );
        assert_eq!(
            btree.get(&ShortString::from("offset")),
            Some(&AMQPValue::LongLongInt(1_234_567))
        );
        assert_eq!(
            btree.get(&ShortString::from("shard")),
            Some(&AMQPValue::LongUInt(7))
        );
    }
}
