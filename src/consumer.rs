// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Delivery Processing
//!
//! This module implements the processing of one inbound message: extract the
//! propagated trace context, decode the payload, and hand a [`Delivery`] to
//! the registered handler. A payload that cannot be decoded is rejected
//! without requeue and never reaches the handler, so a malformed message
//! cannot wedge the queue.

use crate::{delivery::Delivery, dispatcher::DeliveryHandler, errors::AmqpError, otel};
use lapin::options::BasicRejectOptions;
use opentelemetry::{
    global::BoxedTracer,
    trace::{Span, Status},
};
use serde_json::Value;
use std::{borrow::Cow, sync::Arc};
use tracing::{debug, error};

/// Decodes one delivery and dispatches it to the handler.
///
/// The handler owns the acknowledgment of the delivery it receives; this
/// function only acks on the handler's behalf when the message is discarded
/// before the handler ever sees it.
pub(crate) async fn process_delivery(
    tracer: &BoxedTracer,
    queue: &str,
    delivery: lapin::message::Delivery,
    handler: &Arc<dyn DeliveryHandler>,
    auto_ack: bool,
) -> Result<(), AmqpError> {
    let ctx = otel::extract_context(&delivery.properties);
    let mut span = otel::consumer_span(tracer, queue, &ctx);

    debug!(
        "received message - queue: {} - exchange: {}",
        queue,
        delivery.exchange.to_string(),
    );

    let payload: Value = match serde_json::from_slice(&delivery.data) {
        Ok(payload) => payload,
        Err(err) => {
            error!(
                error = err.to_string(),
                queue = queue,
                "rejecting message with undecodable payload"
            );
            span.record_error(&AmqpError::ParsePayloadError);
            span.set_status(Status::Error {
                description: Cow::from("failure to parse payload"),
            });

            if !auto_ack {
                if let Err(err) = delivery
                    .acker
                    .reject(BasicRejectOptions { requeue: false })
                    .await
                {
                    error!(error = err.to_string(), "error whiling reject msg");
                    return Err(AmqpError::RejectMessageError);
                }
            }

            return Ok(());
        }
    };

    handler
        .handle(Delivery::new(queue, payload, delivery, auto_ack))
        .await;

    span.set_status(Status::Ok);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::MockDeliveryHandler;
    use lapin::{acker::Acker, protocol::basic::AMQPProperties};
    use opentelemetry::global;
    use serde_json::json;
    use std::sync::Mutex;

    fn lapin_delivery(data: &[u8]) -> lapin::message::Delivery {
        lapin::message::Delivery {
            delivery_tag: 1,
            exchange: "".into(),
            routing_key: "orders".into(),
            redelivered: false,
            properties: AMQPProperties::default(),
            data: data.to_vec(),
            acker: Acker::default(),
        }
    }

    #[tokio::test]
    async fn undecodable_payload_never_reaches_the_handler() {
        let mut handler = MockDeliveryHandler::new();
        handler.expect_handle().times(0);
        let handler: Arc<dyn DeliveryHandler> = Arc::new(handler);

        let tracer = global::tracer("test");
        let _ = process_delivery(&tracer, "orders", lapin_delivery(b"not json"), &handler, false)
            .await;
    }

    #[tokio::test]
    async fn decoded_payload_is_dispatched_to_the_handler() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();

        let handler: Arc<dyn DeliveryHandler> = Arc::new(move |delivery: Delivery| {
            let sink = sink.clone();
            async move {
                sink.lock().unwrap().push(delivery.payload().clone());
                let _ = delivery.ack().await;
            }
        });

        let tracer = global::tracer("test");
        let result = process_delivery(
            &tracer,
            "orders",
            lapin_delivery(br#"{"id": 7}"#),
            &handler,
            true,
        )
        .await;

        assert_eq!(result, Ok(()));
        assert_eq!(seen.lock().unwrap().as_slice(), &[json!({"id": 7})]);
    }
}
