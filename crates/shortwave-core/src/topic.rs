//! Per-channel fan-out groups.
//!
//! A topic is the set of connections watching one channel. Channels are
//! named by the history id they track.

use crate::connection::{ConnectionId, SubscriberHandle};
use shortwave_protocol::ServerMessage;
use std::collections::HashMap;
use thiserror::Error;
use tracing::{debug, trace, warn};

/// A channel identifier.
pub type ChannelId = String;

/// Membership errors.
///
/// The display text is the exact message sent back to the offending
/// connection.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TopicError {
    /// The connection is already a member.
    #[error("Socket already subscribed")]
    AlreadySubscribed,

    /// The connection is not a member.
    #[error("Socket is not subscribed")]
    NotSubscribed,
}

/// A fan-out group of connections watching one channel.
#[derive(Debug)]
pub struct Topic {
    name: ChannelId,
    members: HashMap<ConnectionId, SubscriberHandle>,
}

impl Topic {
    /// Create an empty topic.
    #[must_use]
    pub fn new(name: impl Into<ChannelId>) -> Self {
        Self {
            name: name.into(),
            members: HashMap::new(),
        }
    }

    /// Get the channel name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the number of members.
    #[must_use]
    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    /// Check if a connection is a member.
    #[must_use]
    pub fn is_member(&self, id: &ConnectionId) -> bool {
        self.members.contains_key(id)
    }

    /// Check if the topic has no members.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Attach a connection to the topic.
    ///
    /// # Errors
    ///
    /// Returns [`TopicError::AlreadySubscribed`] if the connection is
    /// already a member.
    pub fn subscribe(&mut self, subscriber: SubscriberHandle) -> Result<(), TopicError> {
        if self.members.contains_key(subscriber.id()) {
            return Err(TopicError::AlreadySubscribed);
        }

        debug!(channel = %self.name, connection = %subscriber.id(), "Connection subscribed");
        self.members.insert(subscriber.id().clone(), subscriber);
        Ok(())
    }

    /// Detach a connection from the topic.
    ///
    /// # Errors
    ///
    /// Returns [`TopicError::NotSubscribed`] if the connection is not a
    /// member.
    pub fn unsubscribe(&mut self, id: &ConnectionId) -> Result<(), TopicError> {
        if self.members.remove(id).is_none() {
            return Err(TopicError::NotSubscribed);
        }

        debug!(channel = %self.name, connection = %id, "Connection unsubscribed");
        Ok(())
    }

    /// Deliver a message to every member.
    ///
    /// A failed delivery is logged and skipped; it never reaches the caller
    /// and never blocks delivery to the remaining members. Returns the
    /// number of members that received the message.
    pub fn publish(&self, message: &ServerMessage) -> usize {
        trace!(channel = %self.name, "Publishing message");

        let mut delivered = 0;
        for member in self.members.values() {
            match member.send(message.clone()) {
                Ok(()) => delivered += 1,
                Err(e) => {
                    warn!(channel = %self.name, error = %e, "Dropping delivery to closed connection");
                }
            }
        }
        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shortwave_protocol::ClickEntry;
    use tokio::sync::mpsc::{self, UnboundedReceiver};

    fn subscriber(id: &str) -> (SubscriberHandle, UnboundedReceiver<ServerMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (SubscriberHandle::new(ConnectionId::new(id), tx), rx)
    }

    #[test]
    fn topic_creation() {
        let topic = Topic::new("abc123");
        assert_eq!(topic.name(), "abc123");
        assert_eq!(topic.member_count(), 0);
        assert!(topic.is_empty());
    }

    #[test]
    fn subscribe_unsubscribe() {
        let mut topic = Topic::new("abc123");
        let (first, _rx1) = subscriber("viewer-1");
        let (second, _rx2) = subscriber("viewer-2");

        topic.subscribe(first).unwrap();
        assert_eq!(topic.member_count(), 1);
        assert!(topic.is_member(&ConnectionId::new("viewer-1")));

        topic.subscribe(second).unwrap();
        assert_eq!(topic.member_count(), 2);

        topic.unsubscribe(&ConnectionId::new("viewer-1")).unwrap();
        assert_eq!(topic.member_count(), 1);
        assert!(!topic.is_member(&ConnectionId::new("viewer-1")));
    }

    #[test]
    fn duplicate_subscribe_is_rejected_without_growing_membership() {
        let mut topic = Topic::new("abc123");
        let (first, _rx1) = subscriber("viewer-1");
        let (again, _rx2) = subscriber("viewer-1");

        topic.subscribe(first).unwrap();
        assert_eq!(
            topic.subscribe(again).unwrap_err(),
            TopicError::AlreadySubscribed
        );
        assert_eq!(topic.member_count(), 1);
    }

    #[test]
    fn failed_unsubscribe_does_not_shrink_membership() {
        let mut topic = Topic::new("abc123");
        let (member, _rx) = subscriber("viewer-1");
        topic.subscribe(member).unwrap();

        assert_eq!(
            topic.unsubscribe(&ConnectionId::new("stranger")).unwrap_err(),
            TopicError::NotSubscribed
        );
        assert_eq!(topic.member_count(), 1);

        topic.unsubscribe(&ConnectionId::new("viewer-1")).unwrap();
        assert_eq!(
            topic.unsubscribe(&ConnectionId::new("viewer-1")).unwrap_err(),
            TopicError::NotSubscribed
        );
        assert!(topic.is_empty());
    }

    #[tokio::test]
    async fn publish_reaches_every_member() {
        let mut topic = Topic::new("abc123");
        let (first, mut rx1) = subscriber("viewer-1");
        let (second, mut rx2) = subscriber("viewer-2");
        topic.subscribe(first).unwrap();
        topic.subscribe(second).unwrap();

        let message = ServerMessage::Data(ClickEntry::new(1_700_000_000_000, "203.0.113.7"));
        assert_eq!(topic.publish(&message), 2);

        assert_eq!(rx1.recv().await.unwrap(), message);
        assert_eq!(rx2.recv().await.unwrap(), message);
    }

    #[test]
    fn publish_with_no_members_is_a_no_op() {
        let topic = Topic::new("abc123");
        assert_eq!(topic.publish(&ServerMessage::Ack), 0);
    }

    #[tokio::test]
    async fn failed_delivery_is_isolated_from_other_members() {
        let mut topic = Topic::new("abc123");
        let (dead, dead_rx) = subscriber("viewer-1");
        let (live, mut live_rx) = subscriber("viewer-2");
        topic.subscribe(dead).unwrap();
        topic.subscribe(live).unwrap();
        drop(dead_rx);

        let message = ServerMessage::Data(ClickEntry::new(1_700_000_000_000, "203.0.113.7"));
        assert_eq!(topic.publish(&message), 1);
        assert_eq!(live_rx.recv().await.unwrap(), message);
    }
}
