//! Event Broker — in-process topic broadcast to a dynamic
//! fan-out of bounded subscriber queues. Publish is non-blocking: on a
//! full queue the message for that subscriber is dropped silently, since
//! subscribers always rehydrate via the REST detail endpoint on
//! reconnect. Topics are generic (`job_id`, or `(session_id, run_id)`) so
//! the same machinery backs both the job supervisor and the chat
//! supervisor.

use std::collections::HashMap;
use std::hash::Hash;

use parking_lot::Mutex;
use tokio::sync::mpsc;

/// One subscriber's inbox.
pub type Subscription<E> = mpsc::Receiver<E>;

struct Topic<E> {
    next_id: u64,
    subscribers: HashMap<u64, mpsc::Sender<E>>,
}

impl<E> Default for Topic<E> {
    fn default() -> Self {
        Self { next_id: 0, subscribers: HashMap::new() }
    }
}

/// A broker for a single event type `E`, keyed by topic `K`. Construct one
/// per event family (jobs get one instance, chat runs get another) so
/// their capacities can differ (jobs default to 200, chat runs to 500).
pub struct Broker<K, E> {
    capacity: usize,
    topics: Mutex<HashMap<K, Topic<E>>>,
}

/// Handle returned from `subscribe`; dropping it (or calling
/// `Broker::unsubscribe` explicitly) removes the subscriber and garbage
/// collects the topic entry once it is empty.
pub struct SubscriberHandle {
    pub id: u64,
}

impl<K, E> Broker<K, E>
where
    K: Eq + Hash + Clone,
    E: Clone,
{
    pub fn new(capacity: usize) -> Self {
        Self { capacity, topics: Mutex::new(HashMap::new()) }
    }

    /// Subscribe to `topic`, returning a handle (for unsubscribing) and
    /// the receiving end of a fresh bounded queue.
    pub fn subscribe(&self, topic: K) -> (SubscriberHandle, Subscription<E>) {
        let (tx, rx) = mpsc::channel(self.capacity);
        let mut topics = self.topics.lock();
        let entry = topics.entry(topic).or_default();
        let id = entry.next_id;
        entry.next_id += 1;
        entry.subscribers.insert(id, tx);
        (SubscriberHandle { id }, rx)
    }

    /// Publish `event` to every subscriber of `topic`. Non-blocking: a
    /// saturated subscriber's queue is skipped rather than awaited.
    /// Subscribers whose receiver has already been dropped are pruned.
    pub fn publish(&self, topic: &K, event: E) {
        let mut topics = self.topics.lock();
        let Some(entry) = topics.get_mut(topic) else { return };
        entry.subscribers.retain(|_, tx| match tx.try_send(event.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => true,
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });
        if entry.subscribers.is_empty() {
            topics.remove(topic);
        }
    }

    /// Subscribe to `topic`, seeding the new subscriber's queue with
    /// `seed` (if given) before any other publish can reach it — used to
    /// hand a fresh subscriber an immediate snapshot without broadcasting
    /// that snapshot to everyone else already subscribed.
    pub fn subscribe_seeded(&self, topic: K, seed: Option<E>) -> (SubscriberHandle, Subscription<E>) {
        let (tx, rx) = mpsc::channel(self.capacity);
        if let Some(event) = seed {
            let _ = tx.try_send(event);
        }
        let mut topics = self.topics.lock();
        let entry = topics.entry(topic).or_default();
        let id = entry.next_id;
        entry.next_id += 1;
        entry.subscribers.insert(id, tx);
        (SubscriberHandle { id }, rx)
    }

    /// Explicitly unsubscribe. Empty topic entries are garbage collected.
    pub fn unsubscribe(&self, topic: &K, handle: &SubscriberHandle) {
        let mut topics = self.topics.lock();
        if let Some(entry) = topics.get_mut(topic) {
            entry.subscribers.remove(&handle.id);
            if entry.subscribers.is_empty() {
                topics.remove(topic);
            }
        }
    }

    #[cfg(test)]
    pub fn subscriber_count(&self, topic: &K) -> usize {
        self.topics.lock().get(topic).map(|t| t.subscribers.len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_reaches_all_subscribers() {
        let broker: Broker<String, i32> = Broker::new(8);
        let (_h1, mut rx1) = broker.subscribe("job1".to_string());
        let (_h2, mut rx2) = broker.subscribe("job1".to_string());
        broker.publish(&"job1".to_string(), 42);
        assert_eq!(rx1.recv().await, Some(42));
        assert_eq!(rx2.recv().await, Some(42));
    }

    #[tokio::test]
    async fn full_queue_drops_silently_without_blocking() {
        let broker: Broker<String, i32> = Broker::new(2);
        let (_h, mut rx) = broker.subscribe("job1".to_string());
        // Fill the queue beyond capacity; publish must never block.
        for i in 0..10 {
            broker.publish(&"job1".to_string(), i);
        }
        // Only the first `capacity` messages survive; no panic, no hang.
        assert_eq!(rx.recv().await, Some(0));
        assert_eq!(rx.recv().await, Some(1));
    }

    #[tokio::test]
    async fn unsubscribe_garbage_collects_empty_topic() {
        let broker: Broker<String, i32> = Broker::new(8);
        let (handle, _rx) = broker.subscribe("job1".to_string());
        assert_eq!(broker.subscriber_count(&"job1".to_string()), 1);
        broker.unsubscribe(&"job1".to_string(), &handle);
        assert_eq!(broker.subscriber_count(&"job1".to_string()), 0);
    }

    #[tokio::test]
    async fn subscribe_seeded_delivers_snapshot_only_to_new_subscriber() {
        let broker: Broker<String, i32> = Broker::new(8);
        let (_h1, mut rx1) = broker.subscribe("job1".to_string());
        let (_h2, mut rx2) = broker.subscribe_seeded("job1".to_string(), Some(99));
        assert_eq!(rx2.recv().await, Some(99));
        broker.publish(&"job1".to_string(), 1);
        assert_eq!(rx1.recv().await, Some(1));
        assert_eq!(rx2.recv().await, Some(1));
    }

    #[tokio::test]
    async fn dropped_receiver_is_pruned_on_next_publish() {
        let broker: Broker<String, i32> = Broker::new(8);
        let (_handle, rx) = broker.subscribe("job1".to_string());
        drop(rx);
        broker.publish(&"job1".to_string(), 1);
        assert_eq!(broker.subscriber_count(&"job1".to_string()), 0);
    }
}
