// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Inbound Deliveries
//!
//! A [`Delivery`] is one inbound message handed to a handler: the decoded
//! payload, the message metadata, and the acknowledgment protocol bound to
//! that specific message. The ack, nack and reject methods consume the value,
//! so resolving a delivery twice does not compile; dropping a manual-ack
//! delivery without resolving it logs a warning, since the broker will keep
//! the message in limbo until the channel closes.

use crate::errors::AmqpError;
use lapin::{
    acker::Acker,
    options::{BasicAckOptions, BasicNackOptions, BasicRejectOptions},
    protocol::basic::AMQPProperties,
};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{error, warn};

/// One inbound message scoped to a single handler invocation.
pub struct Delivery {
    payload: Value,
    queue: String,
    exchange: String,
    routing_key: String,
    redelivered: bool,
    properties: AMQPProperties,
    acker: Acker,
    auto_ack: bool,
    resolved: bool,
}

impl Delivery {
    pub(crate) fn new(
        queue: &str,
        payload: Value,
        delivery: lapin::message::Delivery,
        auto_ack: bool,
    ) -> Delivery {
        Delivery {
            payload,
            queue: queue.to_owned(),
            exchange: delivery.exchange.to_string(),
            routing_key: delivery.routing_key.to_string(),
            redelivered: delivery.redelivered,
            properties: delivery.properties,
            acker: delivery.acker,
            // in auto-ack mode the broker already considers the message settled
            auto_ack,
            resolved: auto_ack,
        }
    }

    /// The decoded JSON payload.
    pub fn payload(&self) -> &Value {
        &self.payload
    }

    /// Decodes the payload into a typed value.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, AmqpError> {
        serde_json::from_value(self.payload.clone()).map_err(|err| {
            error!(error = err.to_string(), "failure to decode payload");
            AmqpError::ParsePayloadError
        })
    }

    /// The queue this message was consumed from.
    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// The exchange the message was published to.
    pub fn exchange(&self) -> &str {
        &self.exchange
    }

    /// The routing key the message was published with.
    pub fn routing_key(&self) -> &str {
        &self.routing_key
    }

    /// Whether the broker redelivered this message.
    pub fn redelivered(&self) -> bool {
        self.redelivered
    }

    /// The AMQP properties of the message.
    pub fn properties(&self) -> &AMQPProperties {
        &self.properties
    }

    /// Acknowledges the message, removing it from the queue.
    pub async fn ack(mut self) -> Result<(), AmqpError> {
        if self.auto_ack {
            return Ok(());
        }
        self.resolved = true;

        self.acker
            .ack(BasicAckOptions { multiple: false })
            .await
            .map_err(|err| {
                error!(error = err.to_string(), "error whiling ack msg");
                AmqpError::AckMessageError
            })
    }

    /// Negative-acknowledges the message.
    ///
    /// # Parameters
    /// * `requeue` - true re-enqueues the message at the broker for
    ///   redelivery; false drops it or routes it to the queue's dead letter
    ///   destination, when one is configured.
    pub async fn nack(mut self, requeue: bool) -> Result<(), AmqpError> {
        if self.auto_ack {
            return Ok(());
        }
        self.resolved = true;

        self.acker
            .nack(BasicNackOptions {
                multiple: false,
                requeue,
            })
            .await
            .map_err(|err| {
                error!(error = err.to_string(), "error whiling nack msg");
                AmqpError::NackMessageError
            })
    }

    /// Rejects the message without requeueing it.
    pub async fn reject(mut self) -> Result<(), AmqpError> {
        if self.auto_ack {
            return Ok(());
        }
        self.resolved = true;

        self.acker
            .reject(BasicRejectOptions { requeue: false })
            .await
            .map_err(|err| {
                error!(error = err.to_string(), "error whiling reject msg");
                AmqpError::RejectMessageError
            })
    }
}

impl Drop for Delivery {
    fn drop(&mut self) {
        if !self.resolved {
            warn!(
                queue = self.queue.as_str(),
                "delivery dropped without ack, nack or reject"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    fn lapin_delivery() -> lapin::message::Delivery {
        lapin::message::Delivery {
            delivery_tag: 1,
            exchange: "commerce".into(),
            routing_key: "orders.created".into(),
            redelivered: true,
            properties: AMQPProperties::default(),
            data: vec![],
            acker: Acker::default(),
        }
    }

    #[test]
    fn exposes_message_metadata() {
        let delivery = Delivery::new("orders", json!({"id": 7}), lapin_delivery(), true);

        assert_eq!(delivery.queue(), "orders");
        assert_eq!(delivery.exchange(), "commerce");
        assert_eq!(delivery.routing_key(), "orders.created");
        assert!(delivery.redelivered());
        assert_eq!(delivery.payload()["id"], 7);
    }

    #[test]
    fn decodes_typed_payloads() {
        #[derive(Debug, PartialEq, Deserialize)]
        struct Order {
            id: u64,
        }

        let delivery = Delivery::new("orders", json!({"id": 7}), lapin_delivery(), true);
        assert_eq!(delivery.decode::<Order>().unwrap(), Order { id: 7 });

        let delivery = Delivery::new("orders", json!("not an order"), lapin_delivery(), true);
        assert_eq!(
            delivery.decode::<Order>().unwrap_err(),
            AmqpError::ParsePayloadError
        );
    }

    #[tokio::test]
    async fn auto_ack_resolution_is_a_no_op() {
        let delivery = Delivery::new("orders", json!({}), lapin_delivery(), true);
        assert_eq!(delivery.ack().await, Ok(()));

        let delivery = Delivery::new("orders", json!({}), lapin_delivery(), true);
        assert_eq!(delivery.nack(true).await, Ok(()));

        let delivery = Delivery::new("orders", json!({}), lapin_delivery(), true);
        assert_eq!(delivery.reject().await, Ok(()));
    }
}
