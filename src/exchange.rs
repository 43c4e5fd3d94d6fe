// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Exchange Management
//!
//! This module provides types for defining broker exchanges. Exchanges are the
//! routing mechanism that determines how published messages are distributed to
//! queues. The module defines the supported exchange kinds and a builder for
//! exchange definitions.

use serde::Deserialize;

/// Represents the kinds of exchanges supported by the bus.
///
/// Each kind has specific routing behavior:
/// - Direct: Routes messages to queues based on an exact match of routing keys
/// - Fanout: Broadcasts messages to all bound queues regardless of routing keys
/// - Topic: Routes messages based on wildcard pattern matching of routing keys
/// - Headers: Routes based on message header values instead of routing keys
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExchangeKind {
    #[default]
    Direct,
    Fanout,
    Topic,
    Headers,
}

impl From<ExchangeKind> for lapin::ExchangeKind {
    fn from(kind: ExchangeKind) -> lapin::ExchangeKind {
        match kind {
            ExchangeKind::Direct => lapin::ExchangeKind::Direct,
            ExchangeKind::Fanout => lapin::ExchangeKind::Fanout,
            ExchangeKind::Topic => lapin::ExchangeKind::Topic,
            ExchangeKind::Headers => lapin::ExchangeKind::Headers,
        }
    }
}

/// Definition of a broker exchange with its configuration parameters.
///
/// This struct implements the builder pattern to create and configure exchange
/// definitions. Exchanges are durable by default; use [`transient`](Self::transient)
/// to opt out.
#[derive(Debug, Clone)]
pub struct ExchangeDefinition {
    pub(crate) name: String,
    pub(crate) kind: ExchangeKind,
    pub(crate) delete: bool,
    pub(crate) durable: bool,
    pub(crate) passive: bool,
    pub(crate) internal: bool,
    pub(crate) no_wait: bool,
}

impl ExchangeDefinition {
    /// Creates a new durable direct exchange definition with the given name.
    pub fn new(name: &str) -> ExchangeDefinition {
        ExchangeDefinition {
            name: name.to_owned(),
            kind: ExchangeKind::Direct,
            delete: false,
            durable: true,
            passive: false,
            internal: false,
            no_wait: false,
        }
    }

    /// Sets the exchange kind.
    pub fn kind(mut self, kind: ExchangeKind) -> Self {
        self.kind = kind;
        self
    }

    /// Sets the exchange kind to Direct.
    pub fn direct(mut self) -> Self {
        self.kind = ExchangeKind::Direct;
        self
    }

    /// Sets the exchange kind to Fanout.
    pub fn fanout(mut self) -> Self {
        self.kind = ExchangeKind::Fanout;
        self
    }

    /// Sets the exchange kind to Topic.
    pub fn topic(mut self) -> Self {
        self.kind = ExchangeKind::Topic;
        self
    }

    /// Sets the exchange kind to Headers.
    pub fn headers(mut self) -> Self {
        self.kind = ExchangeKind::Headers;
        self
    }

    /// Makes the exchange non-durable, so it is gone after a broker restart.
    pub fn transient(mut self) -> Self {
        self.durable = false;
        self
    }

    /// Sets the exchange to auto-delete when no longer used.
    pub fn delete(mut self) -> Self {
        self.delete = true;
        self
    }

    /// Makes the declaration passive, checking for existence without creating.
    pub fn passive(mut self) -> Self {
        self.passive = true;
        self
    }

    /// Makes the exchange internal, preventing direct publishing.
    pub fn internal(mut self) -> Self {
        self.internal = true;
        self
    }

    /// Sets the no_wait flag, making the declaration non-blocking.
    pub fn no_wait(mut self) -> Self {
        self.no_wait = true;
        self
    }

    /// The name of the exchange.
    pub fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn definition_is_durable_direct_by_default() {
        let def = ExchangeDefinition::new("commerce");

        assert_eq!(def.name(), "commerce");
        assert_eq!(def.kind, ExchangeKind::Direct);
        assert!(def.durable);
        assert!(!def.delete);
        assert!(!def.passive);
        assert!(!def.internal);
    }

    #[test]
    fn builder_overrides_defaults() {
        let def = ExchangeDefinition::new("events").topic().transient().delete();

        assert_eq!(def.kind, ExchangeKind::Topic);
        assert!(!def.durable);
        assert!(def.delete);
    }

    #[test]
    fn kind_converts_to_lapin() {
        assert!(matches!(
            lapin::ExchangeKind::from(ExchangeKind::Fanout),
            lapin::ExchangeKind::Fanout
        ));
        assert!(matches!(
            lapin::ExchangeKind::from(ExchangeKind::Headers),
            lapin::ExchangeKind::Headers
        ));
    }

    #[test]
    fn kind_deserializes_lowercase() {
        let kind: ExchangeKind = serde_json::from_str("\"topic\"").unwrap();
        assert_eq!(kind, ExchangeKind::Topic);
    }
}
