// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Queue Management
//!
//! This module provides types for defining broker queues and their bindings.
//! It includes support for message TTL, bounded queue length and Dead Letter
//! Queues (DLQ), which give rejected messages a destination instead of
//! dropping them.

/// Definition of a broker queue with its configuration parameters.
///
/// This struct implements the builder pattern to create and configure queue
/// definitions. Queues are durable by default; use [`transient`](Self::transient)
/// to opt out.
#[derive(Debug, Clone)]
pub struct QueueDefinition {
    pub(crate) name: String,
    pub(crate) durable: bool,
    pub(crate) delete: bool,
    pub(crate) exclusive: bool,
    pub(crate) passive: bool,
    pub(crate) no_wait: bool,
    pub(crate) ttl: Option<i32>,
    pub(crate) max_length: Option<i32>,
    pub(crate) dlq_name: Option<String>,
}

impl QueueDefinition {
    /// Creates a new durable queue definition with the given name.
    pub fn new(name: &str) -> QueueDefinition {
        QueueDefinition {
            name: name.to_owned(),
            durable: true,
            delete: false,
            exclusive: false,
            passive: false,
            no_wait: false,
            ttl: None,
            max_length: None,
            dlq_name: None,
        }
    }

    /// Makes the queue non-durable, so it is gone after a broker restart.
    pub fn transient(mut self) -> Self {
        self.durable = false;
        self
    }

    /// Sets the queue to auto-delete when no longer used.
    pub fn delete(mut self) -> Self {
        self.delete = true;
        self
    }

    /// Makes the queue exclusive to the connection.
    pub fn exclusive(mut self) -> Self {
        self.exclusive = true;
        self
    }

    /// Makes the declaration passive, checking for existence without creating.
    pub fn passive(mut self) -> Self {
        self.passive = true;
        self
    }

    /// Sets the no_wait flag, making the declaration non-blocking.
    pub fn no_wait(mut self) -> Self {
        self.no_wait = true;
        self
    }

    /// Sets the message Time-To-Live for the queue.
    ///
    /// Messages that exceed this TTL are removed from the queue, or dead
    /// lettered when a DLQ is configured.
    ///
    /// # Parameters
    /// * `ttl` - TTL in milliseconds
    pub fn ttl(mut self, ttl: i32) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// Sets the maximum number of messages the queue can hold.
    ///
    /// # Parameters
    /// * `max` - Maximum number of messages
    pub fn max_length(mut self, max: i32) -> Self {
        self.max_length = Some(max);
        self
    }

    /// Adds a Dead Letter Queue to the queue.
    ///
    /// The DLQ receives messages that are rejected, expired or overflow from
    /// the main queue. Its name is the main queue name with a `-dlq` suffix.
    pub fn with_dlq(mut self) -> Self {
        self.dlq_name = Some(format!("{}-dlq", self.name));
        self
    }

    /// The name of the queue.
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Configuration for binding a queue to an exchange.
///
/// Queue bindings define how messages flow from exchanges to queues based on
/// routing keys and exchange kinds.
pub struct QueueBinding<'qb> {
    pub(crate) queue_name: &'qb str,
    pub(crate) exchange_name: &'qb str,
    pub(crate) routing_key: &'qb str,
}

impl<'qb> QueueBinding<'qb> {
    /// Creates a new binding for the given queue.
    ///
    /// The exchange name and routing key default to empty strings and should
    /// be set with [`exchange`](Self::exchange) and
    /// [`routing_key`](Self::routing_key).
    pub fn new(queue: &'qb str) -> QueueBinding<'qb> {
        QueueBinding {
            queue_name: queue,
            exchange_name: "",
            routing_key: "",
        }
    }

    /// Sets the exchange to bind the queue to.
    pub fn exchange(mut self, exchange: &'qb str) -> Self {
        self.exchange_name = exchange;
        self
    }

    /// Sets the routing key for the binding.
    pub fn routing_key(mut self, key: &'qb str) -> Self {
        self.routing_key = key;
        self
    }
}
