//! Channel registry
//!
//! Channel name to subscriber set. Plain data with no synchronization: the
//! dispatcher loop is its only owner.

use std::collections::HashMap;
use tokio::sync::mpsc::error::TrySendError;

use crate::client::{Client, ClientId};
use crate::envelope::Frame;

/// Subscribers of every channel, keyed by client id.
#[derive(Debug, Default)]
pub struct Registry {
    channels: HashMap<String, HashMap<ClientId, Client>>,
}

/// Outcome of fanning one frame out to a channel.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Clients whose queue accepted the frame
    pub delivered: usize,
    /// Clients removed because their queue was full
    pub overflowed: Vec<ClientId>,
    /// Clients removed because their write pump had already gone
    pub disconnected: Vec<ClientId>,
}

impl Delivery {
    pub fn dropped(&self) -> usize {
        self.overflowed.len() + self.disconnected.len()
    }
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a client to its channel. Returns false if that id is already there,
    /// in which case the new value is discarded.
    pub fn insert(&mut self, client: Client) -> bool {
        let subscribers = self.channels.entry(client.channel().to_string()).or_default();
        if subscribers.contains_key(&client.id()) {
            return false;
        }
        subscribers.insert(client.id(), client);
        true
    }

    /// Remove a client, pruning the channel entry when it empties.
    pub fn remove(&mut self, channel: &str, id: ClientId) -> Option<Client> {
        let subscribers = self.channels.get_mut(channel)?;
        let removed = subscribers.remove(&id);
        if subscribers.is_empty() {
            self.channels.remove(channel);
        }
        removed
    }

    pub fn contains(&self, channel: &str, id: ClientId) -> bool {
        self.channels
            .get(channel)
            .is_some_and(|subscribers| subscribers.contains_key(&id))
    }

    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.channels.get(channel).map_or(0, HashMap::len)
    }

    /// Channel names with their subscriber counts.
    pub fn channels(&self) -> impl Iterator<Item = (&str, usize)> {
        self.channels
            .iter()
            .map(|(name, subscribers)| (name.as_str(), subscribers.len()))
    }

    /// Total clients across every channel.
    pub fn len(&self) -> usize {
        self.channels.values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Offer `frame` to every subscriber of `channel` without waiting.
    ///
    /// Subscribers whose queue is full or closed are removed and dropped,
    /// which closes their queue.
    pub fn deliver(&mut self, channel: &str, frame: &Frame) -> Delivery {
        let mut delivery = Delivery::default();
        let Some(subscribers) = self.channels.get_mut(channel) else {
            return delivery;
        };

        for (id, client) in subscribers.iter() {
            match client.try_deliver(frame) {
                Ok(()) => delivery.delivered += 1,
                Err(TrySendError::Full(_)) => delivery.overflowed.push(*id),
                Err(TrySendError::Closed(_)) => delivery.disconnected.push(*id),
            }
        }

        for id in delivery.overflowed.iter().chain(&delivery.disconnected) {
            subscribers.remove(id);
        }
        if subscribers.is_empty() {
            self.channels.remove(channel);
        }
        delivery
    }

    /// Drop every client, closing all queues. Returns how many were dropped.
    pub fn clear(&mut self) -> usize {
        let count = self.len();
        self.channels.clear();
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_remove() {
        let mut registry = Registry::new();
        let (client, _queue) = Client::new("orders", None, 4);
        let id = client.id();

        assert!(registry.insert(client));
        assert!(registry.contains("orders", id));
        assert_eq!(registry.subscriber_count("orders"), 1);

        let removed = registry.remove("orders", id).unwrap();
        assert_eq!(removed.id(), id);
        assert!(!registry.contains("orders", id));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_remove_unknown_is_noop() {
        let mut registry = Registry::new();
        let (client, _queue) = Client::new("orders", None, 4);
        let id = client.id();
        registry.insert(client);

        assert!(registry.remove("reports", id).is_none());
        assert!(registry.remove("orders", ClientId(u64::MAX)).is_none());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_channels_listing() {
        let mut registry = Registry::new();
        let (a, _qa) = Client::new("orders", None, 4);
        let (b, _qb) = Client::new("orders", None, 4);
        let (c, _qc) = Client::new("reports", None, 4);
        registry.insert(a);
        registry.insert(b);
        registry.insert(c);

        let mut channels: Vec<(String, usize)> = registry
            .channels()
            .map(|(name, count)| (name.to_string(), count))
            .collect();
        channels.sort();
        assert_eq!(
            channels,
            vec![("orders".to_string(), 2), ("reports".to_string(), 1)]
        );
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn test_deliver_only_reaches_target_channel() {
        let mut registry = Registry::new();
        let (a, mut qa) = Client::new("orders", None, 4);
        let (b, mut qb) = Client::new("reports", None, 4);
        registry.insert(a);
        registry.insert(b);

        let delivery = registry.deliver("orders", &Frame::from("hello"));
        assert_eq!(delivery.delivered, 1);
        assert_eq!(delivery.dropped(), 0);
        assert_eq!(qa.try_recv().unwrap(), Frame::from("hello"));
        assert!(qb.try_recv().is_err());
    }

    #[test]
    fn test_deliver_drops_full_queue() {
        let mut registry = Registry::new();
        let (slow, mut slow_q) = Client::new("orders", None, 1);
        let (fast, mut fast_q) = Client::new("orders", None, 4);
        let slow_id = slow.id();
        let fast_id = fast.id();
        registry.insert(slow);
        registry.insert(fast);

        registry.deliver("orders", &Frame::from("1"));
        let delivery = registry.deliver("orders", &Frame::from("2"));

        assert_eq!(delivery.overflowed, vec![slow_id]);
        assert_eq!(delivery.delivered, 1);
        assert!(!registry.contains("orders", slow_id));
        assert!(registry.contains("orders", fast_id));

        // the slow queue keeps what it had, then reports closed
        assert_eq!(slow_q.try_recv().unwrap(), Frame::from("1"));
        assert!(matches!(
            slow_q.try_recv(),
            Err(tokio::sync::mpsc::error::TryRecvError::Disconnected)
        ));
        assert_eq!(fast_q.try_recv().unwrap(), Frame::from("1"));
        assert_eq!(fast_q.try_recv().unwrap(), Frame::from("2"));
    }

    #[test]
    fn test_deliver_drops_closed_queue() {
        let mut registry = Registry::new();
        let (client, queue) = Client::new("orders", None, 4);
        let id = client.id();
        registry.insert(client);
        drop(queue);

        let delivery = registry.deliver("orders", &Frame::from("x"));
        assert_eq!(delivery.disconnected, vec![id]);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_clear_closes_everything() {
        let mut registry = Registry::new();
        let (a, mut qa) = Client::new("orders", None, 4);
        let (b, mut qb) = Client::new("reports", None, 4);
        registry.insert(a);
        registry.insert(b);

        assert_eq!(registry.clear(), 2);
        assert!(registry.is_empty());
        assert!(qa.try_recv().is_err());
        assert!(qb.try_recv().is_err());
    }
}
