// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Error Types for the AMQP Bus
//!
//! This module provides a comprehensive set of error types for broker operations.
//! The `AmqpError` enum represents all possible error scenarios that can occur during
//! configuration resolution, connection, channel, exchange, queue, and message
//! handling operations.

use thiserror::Error;

/// Represents errors that can occur during AMQP/RabbitMQ operations.
///
/// This enum covers all error scenarios for broker interactions, including the
/// not-configured fast path, connection issues, channel creation, exchange and
/// queue declarations, message publishing, and consumer-related errors. Each
/// variant provides specific context about what operation failed.
///
/// Teardown failures have no variant on purpose: closing a channel or a
/// connection must never fail application shutdown, so those errors are only
/// logged where they happen.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum AmqpError {
    /// Internal errors that don't fit into other categories
    #[error("internal error")]
    InternalError,

    /// The operation requires a broker but none was configured
    #[error("broker is not configured")]
    NotConfigured,

    /// The supplied configuration could not be resolved into a profile
    #[error("invalid broker configuration: {0}")]
    InvalidConfiguration(String),

    /// Error establishing a connection to the broker
    #[error("failure to connect")]
    ConnectionError,

    /// Error creating a channel from an established connection
    #[error("failure to create a channel")]
    ChannelError,

    /// Error configuring Quality of Service parameters
    #[error("failure to configure qos `{0}`")]
    QoSDeclarationError(String),

    /// Error declaring an exchange with the given name
    #[error("failure to declare an exchange `{0}`")]
    DeclareExchangeError(String),

    /// Error declaring a queue with the given name
    #[error("failure to declare a queue `{0}`")]
    DeclareQueueError(String),

    /// Error binding a queue to an exchange
    #[error("failure to bind queue `{1}` to exchange `{0}`")]
    BindingExchangeToQueueError(String, String),

    /// Error serializing an outbound payload
    #[error("failure to serialize payload")]
    SerializePayloadError,

    /// Error parsing an inbound message payload
    #[error("failure to parse payload")]
    ParsePayloadError,

    /// Error publishing a message
    #[error("failure to publish")]
    PublishingError,

    /// Error binding a consumer to a queue
    #[error("failure to declare consumer `{0}`")]
    BindingConsumerError(String),

    /// Error cancelling a consumer
    #[error("failure to cancel consumer `{0}`")]
    CancelConsumerError(String),

    /// Error acknowledging a message
    #[error("failure to ack message")]
    AckMessageError,

    /// Error negative-acknowledging a message
    #[error("failure to nack message")]
    NackMessageError,

    /// Error rejecting a message
    #[error("failure to reject message")]
    RejectMessageError,

    /// Error consuming a message
    #[error("failure to consume message `{0}`")]
    ConsumerError(String),
}
