//! The event hub connection contract.
//!
//! The server only ever talks to the hub through [`Connection`]. Handlers see
//! the narrower [`Subscriber`] view, which is all a `register` entry point
//! needs to hook itself up.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::Result;

/// An event delivered by the hub.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Event {
    #[serde(default)]
    pub id: String,

    pub topic: String,

    #[serde(default)]
    pub data: Value,

    #[serde(default)]
    pub source: Value,
}

impl Event {
    #[must_use]
    pub fn new(topic: impl Into<String>, data: Value) -> Self {
        Self {
            topic: topic.into(),
            data,
            ..Default::default()
        }
    }
}

/// Callback invoked for every event matching a subscription.
pub type EventCallback = Arc<dyn Fn(&Event) + Send + Sync>;

/// Identifier handed back by [`Subscriber::subscribe`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubscriptionId(pub String);

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// The part of a connection visible to handler plugins.
pub trait Subscriber {
    /// Subscribe `callback` to events matching `expression`
    /// (see [`Subscription`](crate::Subscription)).
    ///
    /// # Errors
    ///
    /// Returns [`Error::Subscription`](crate::Error::Subscription) if the
    /// expression does not parse.
    fn subscribe(&mut self, expression: &str, callback: EventCallback) -> Result<SubscriptionId>;
}

/// A handle to the remote event hub.
///
/// Not meant for concurrent mutation: exactly one server owns it at a time.
pub trait Connection: Subscriber + Send + 'static {
    /// Whether the link to the hub is currently established.
    fn is_connected(&self) -> bool;

    /// Whether the connection establishes its link by itself in the
    /// background, in which case the owner should poll [`is_connected`](Self::is_connected)
    /// rather than call [`connect`](Self::connect).
    fn auto_connects(&self) -> bool;

    /// The connection's own timeout for establishing its link, if it has one.
    fn connect_timeout(&self) -> Option<Duration> {
        None
    }

    /// Establish the link synchronously.
    fn connect(&mut self) -> impl Future<Output = Result<()>> + Send;

    /// Tear down the link. Subscriptions are kept.
    fn disconnect(&mut self) -> impl Future<Output = Result<()>> + Send;

    /// Release everything the connection holds.
    fn close(&mut self);

    /// Deliver events to subscribers until the link ends.
    ///
    /// Returns `Ok(())` when the link was closed and an error when it failed.
    /// Must be cancel safe: dropping the future loses no events already
    /// delivered.
    fn wait_for_events(&mut self) -> impl Future<Output = Result<()>> + Send;
}

/// The `register` callable exposed by a handler plugin.
pub trait EntryPoint: Send + Sync {
    /// Hook the handler up to the hub.
    ///
    /// # Errors
    ///
    /// Any error is reported as a registration failure for this plugin only.
    fn register(&self, hub: &mut dyn Subscriber) -> Result<()>;
}

impl<F> EntryPoint for F
where
    F: Fn(&mut dyn Subscriber) -> Result<()> + Send + Sync,
{
    fn register(&self, hub: &mut dyn Subscriber) -> Result<()> {
        self(hub)
    }
}
