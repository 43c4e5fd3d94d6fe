// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # AMQP Channel Supervision
//!
//! This module owns the broker connection and channel pair. The supervisor
//! establishes both lazily, detects failure or closure, and re-establishes
//! them on the next use. Recovery is reactive: a lost connection is only
//! noticed and repaired when an operation asks for a channel again, and a
//! failed dial surfaces to the caller instead of being retried here.

use crate::{config::ConnectionProfile, errors::AmqpError};
use lapin::{
    options::{BasicQosOptions, ConfirmSelectOptions},
    types::LongString,
    Channel, Connection, ConnectionProperties,
};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use tokio::sync::Mutex;
use tracing::{debug, error, warn};

/// AMQP reply code sent on graceful channel and connection close
const REPLY_SUCCESS: u16 = 200;

/// An open connection and channel pair.
///
/// Owned exclusively by the [`ConnectionSupervisor`]; operations never hold
/// one of these, they receive a fresh [`Channel`] clone per call. The poison
/// flag is flipped by the connection-level error observer so the supervisor
/// drops the pair on its next use.
pub struct ChannelHandle {
    connection: Connection,
    channel: Channel,
    poisoned: Arc<AtomicBool>,
}

impl ChannelHandle {
    fn is_live(&self) -> bool {
        !self.poisoned.load(Ordering::Relaxed)
            && self.connection.status().connected()
            && self.channel.status().connected()
    }
}

/// Supervises the broker connection and channel for one bus.
///
/// All channel access is serialized behind an async mutex: lapin channels must
/// have a single logical writer, and dialing happens under the same lock so
/// concurrent operations after a failure trigger exactly one re-dial.
pub struct ConnectionSupervisor {
    profile: ConnectionProfile,
    handle: Mutex<Option<ChannelHandle>>,
}

impl ConnectionSupervisor {
    /// Creates a supervisor for the given profile. Does not dial.
    pub fn new(profile: ConnectionProfile) -> ConnectionSupervisor {
        ConnectionSupervisor {
            profile,
            handle: Mutex::new(None),
        }
    }

    /// Returns a live channel, dialing the broker if needed.
    ///
    /// A cached live handle is returned immediately without re-dialing. A
    /// stale handle (closed, errored or poisoned) is dropped and replaced.
    ///
    /// # Returns
    /// A channel clone ready for use, or `ConnectionError`/`ChannelError` when
    /// the broker cannot be reached. Callers decide whether to retry.
    pub async fn ensure_channel(&self) -> Result<Channel, AmqpError> {
        let mut guard = self.handle.lock().await;

        if let Some(handle) = guard.as_ref() {
            if handle.is_live() {
                return Ok(handle.channel.clone());
            }

            warn!("cached amqp channel is stale, re-dialing");
            *guard = None;
        }

        let handle = self.dial().await?;
        let channel = handle.channel.clone();
        *guard = Some(handle);

        Ok(channel)
    }

    async fn dial(&self) -> Result<ChannelHandle, AmqpError> {
        debug!("creating amqp connection...");

        let options = ConnectionProperties::default()
            .with_connection_name(LongString::from(env!("CARGO_PKG_NAME")));

        let connection = match Connection::connect(self.profile.url(), options).await {
            Ok(conn) => conn,
            Err(err) => {
                error!(error = err.to_string(), "failure to connect");
                return Err(AmqpError::ConnectionError);
            }
        };
        debug!("amqp connected");

        let poisoned = Arc::new(AtomicBool::new(false));
        let observer = poisoned.clone();
        connection.on_error(move |err| {
            error!(error = err.to_string(), "amqp connection errored");
            observer.store(true, Ordering::Relaxed);
        });

        debug!("creating amqp channel...");
        let channel = match connection.create_channel().await {
            Ok(channel) => channel,
            Err(err) => {
                error!(error = err.to_string(), "failure to create the channel");
                return Err(AmqpError::ChannelError);
            }
        };

        if let Some(count) = self.profile.prefetch() {
            debug!(prefetch = count, "configuring channel qos");
            if let Err(err) = channel.basic_qos(count, BasicQosOptions::default()).await {
                error!(error = err.to_string(), "failure to configure qos");
                return Err(AmqpError::QoSDeclarationError(err.to_string()));
            }
        }

        // publisher confirms are what make the publish ack meaningful
        if let Err(err) = channel
            .confirm_select(ConfirmSelectOptions::default())
            .await
        {
            error!(error = err.to_string(), "failure to enable publisher confirms");
            return Err(AmqpError::ChannelError);
        }

        debug!("channel created");

        Ok(ChannelHandle {
            connection,
            channel,
            poisoned,
        })
    }

    /// Drops the cached handle so the next use re-dials.
    pub async fn invalidate(&self) {
        *self.handle.lock().await = None;
    }

    /// Whether a live channel handle is currently cached. Never dials.
    pub async fn is_connected(&self) -> bool {
        self.handle
            .lock()
            .await
            .as_ref()
            .is_some_and(|handle| handle.is_live())
    }

    /// Closes the channel and then the connection, tolerating either being
    /// already gone. Teardown errors are logged, never propagated: shutting
    /// down the application must not fail because the broker is unreachable.
    pub async fn shutdown(&self) {
        let Some(handle) = self.handle.lock().await.take() else {
            return;
        };

        if let Err(err) = handle.channel.close(REPLY_SUCCESS, "shutdown").await {
            warn!(error = err.to_string(), "failure to close amqp channel");
        }

        if let Err(err) = handle.connection.close(REPLY_SUCCESS, "shutdown").await {
            warn!(error = err.to_string(), "failure to close amqp connection");
        }
    }
}
