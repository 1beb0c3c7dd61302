//! Channel registry and the fan-out entry point.
//!
//! The gateway owns every live topic, creating one on first subscribe and
//! deleting it when its last member leaves. Mutations are serialized per
//! channel by the concurrent map's entry locking; unrelated channels never
//! contend on a shared lock.

use crate::connection::{ConnectionId, SubscriberHandle};
use crate::topic::{ChannelId, Topic, TopicError};
use dashmap::DashMap;
use shortwave_protocol::{ClickEntry, ServerMessage};
use thiserror::Error;
use tracing::{debug, trace};

/// Registry errors.
///
/// Topic membership errors pass through unchanged so their display text
/// stays the wire reply.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum GatewayError {
    /// No topic exists for the named channel.
    #[error("Channel not found")]
    ChannelNotFound,

    /// The connection holds too many subscriptions already.
    #[error("Maximum subscriptions reached")]
    MaxSubscriptionsReached,

    /// Membership error from the topic itself.
    #[error(transparent)]
    Topic(#[from] TopicError),
}

/// Gateway configuration.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Maximum channel subscriptions a single connection may hold.
    pub max_subscriptions_per_connection: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            max_subscriptions_per_connection: 100,
        }
    }
}

/// The channel registry.
///
/// Business logic publishes click entries through [`Gateway::publish`]; the
/// connection layer drives membership with subscribe/unsubscribe.
pub struct Gateway {
    /// Topics indexed by channel name.
    topics: DashMap<ChannelId, Topic>,
    /// Reverse index: connection id -> channels it belongs to.
    subscriptions: DashMap<ConnectionId, dashmap::DashSet<ChannelId>>,
    config: GatewayConfig,
}

impl Gateway {
    /// Create a gateway with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(GatewayConfig::default())
    }

    /// Create a gateway with custom configuration.
    #[must_use]
    pub fn with_config(config: GatewayConfig) -> Self {
        Self {
            topics: DashMap::new(),
            subscriptions: DashMap::new(),
            config,
        }
    }

    /// Attach a connection to a channel, creating the topic if absent.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection is already a member or holds too
    /// many subscriptions.
    pub fn subscribe(&self, channel: &str, subscriber: SubscriberHandle) -> Result<(), GatewayError> {
        let connection = subscriber.id().clone();

        let conn_subs = self.subscriptions.entry(connection.clone()).or_default();
        if conn_subs.len() >= self.config.max_subscriptions_per_connection {
            return Err(GatewayError::MaxSubscriptionsReached);
        }
        if conn_subs.contains(channel) {
            return Err(TopicError::AlreadySubscribed.into());
        }

        let mut topic = self.topics.entry(channel.to_string()).or_insert_with(|| {
            debug!(channel = %channel, "Creating channel");
            Topic::new(channel)
        });

        if let Err(e) = topic.subscribe(subscriber) {
            // A freshly created topic must not outlive the failed attach
            drop(topic);
            self.topics.remove_if(channel, |_, topic| topic.is_empty());
            return Err(e.into());
        }

        conn_subs.insert(channel.to_string());
        debug!(
            channel = %channel,
            connection = %connection,
            subscribers = topic.member_count(),
            "Subscribed"
        );
        Ok(())
    }

    /// Detach a connection from a channel, deleting the topic if it empties.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::ChannelNotFound`] for an unknown channel and
    /// [`TopicError::NotSubscribed`] for a non-member.
    pub fn unsubscribe(&self, connection_id: &ConnectionId, channel: &str) -> Result<(), GatewayError> {
        if !self.topics.contains_key(channel) {
            return Err(GatewayError::ChannelNotFound);
        }

        // Reverse index first; lock order is subscriptions -> topics
        if let Some(conn_subs) = self.subscriptions.get(connection_id) {
            conn_subs.remove(channel);
        }

        {
            let mut topic = self
                .topics
                .get_mut(channel)
                .ok_or(GatewayError::ChannelNotFound)?;
            topic.unsubscribe(connection_id)?;
            debug!(
                channel = %channel,
                connection = %connection_id,
                subscribers = topic.member_count(),
                "Unsubscribed"
            );
        }

        if self
            .topics
            .remove_if(channel, |_, topic| topic.is_empty())
            .is_some()
        {
            debug!(channel = %channel, "Deleted empty channel");
        }

        Ok(())
    }

    /// Detach a connection from every channel it belongs to.
    ///
    /// Best effort; covers ungraceful disconnects where no unsubscribe ever
    /// arrived.
    pub fn unsubscribe_all(&self, connection_id: &ConnectionId) {
        if let Some((_, channels)) = self.subscriptions.remove(connection_id) {
            for channel in channels.iter() {
                if let Some(mut topic) = self.topics.get_mut(channel.as_str()) {
                    let _ = topic.unsubscribe(connection_id);
                }
                self.topics
                    .remove_if(channel.as_str(), |_, topic| topic.is_empty());
            }
        }

        debug!(connection = %connection_id, "Unsubscribed from all channels");
    }

    /// Fan a click entry out to every subscriber of a channel.
    ///
    /// A channel nobody watches is not an error; there is simply nobody to
    /// notify. Returns the number of connections that received the entry.
    pub fn publish(&self, channel: &str, entry: ClickEntry) -> usize {
        let Some(topic) = self.topics.get(channel) else {
            trace!(channel = %channel, "Publish with no subscribers");
            return 0;
        };

        let delivered = topic.publish(&ServerMessage::Data(entry));
        trace!(channel = %channel, recipients = delivered, "Published entry");
        delivered
    }

    /// Check if a channel exists.
    #[must_use]
    pub fn channel_exists(&self, channel: &str) -> bool {
        self.topics.contains_key(channel)
    }

    /// Get the subscriber count for a channel.
    #[must_use]
    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.topics
            .get(channel)
            .map(|topic| topic.member_count())
            .unwrap_or(0)
    }

    /// Get the channels a connection is subscribed to.
    #[must_use]
    pub fn connection_channels(&self, connection_id: &ConnectionId) -> Vec<ChannelId> {
        self.subscriptions
            .get(connection_id)
            .map(|subs| subs.iter().map(|channel| channel.clone()).collect())
            .unwrap_or_default()
    }

    /// Get registry statistics.
    #[must_use]
    pub fn stats(&self) -> GatewayStats {
        GatewayStats {
            channel_count: self.topics.len(),
            connection_count: self.subscriptions.len(),
            total_subscriptions: self.subscriptions.iter().map(|subs| subs.len()).sum(),
        }
    }
}

impl Default for Gateway {
    fn default() -> Self {
        Self::new()
    }
}

/// Registry statistics.
#[derive(Debug, Clone)]
pub struct GatewayStats {
    /// Number of live channels.
    pub channel_count: usize,
    /// Number of connections holding at least one subscription.
    pub connection_count: usize,
    /// Total number of subscriptions.
    pub total_subscriptions: usize,
}
