//! Process-local bus backed by `std::sync::mpsc` channels.

use std::sync::{Mutex, mpsc};

use crate::bus::{EventBus, Subscription};

#[derive(Debug)]
pub enum InMemoryBusError {
    /// The subscriber list lock was poisoned by a panicking publisher.
    Poisoned,
}

/// One sender per live subscription; `publish` clones the message into each.
///
/// Senders whose subscription was dropped are pruned on the next publish, so
/// a stopped worker never blocks or fails the dispatcher.
#[derive(Debug)]
pub struct InMemoryEventBus<M> {
    senders: Mutex<Vec<mpsc::Sender<M>>>,
}

impl<M> InMemoryEventBus<M> {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    fn subscriber_count(&self) -> usize {
        self.senders.lock().map(|s| s.len()).unwrap_or(0)
    }
}

impl<M> Default for InMemoryEventBus<M> {
    fn default() -> Self {
        Self {
            senders: Mutex::new(Vec::new()),
        }
    }
}

impl<M> EventBus<M> for InMemoryEventBus<M>
where
    M: Clone + Send + 'static,
{
    type Error = InMemoryBusError;

    fn publish(&self, message: M) -> Result<(), Self::Error> {
        let mut senders = self.senders.lock().map_err(|_| InMemoryBusError::Poisoned)?;
        senders.retain(|tx| tx.send(message.clone()).is_ok());
        Ok(())
    }

    fn subscribe(&self) -> Subscription<M> {
        let (tx, rx) = mpsc::channel();
        match self.senders.lock() {
            Ok(mut senders) => senders.push(tx),
            Err(poisoned) => poisoned.into_inner().push(tx),
        }
        Subscription::new(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn each_worker_gets_its_own_copy() {
        let bus: InMemoryEventBus<&'static str> = InMemoryEventBus::new();
        let stats = bus.subscribe();
        let audit = bus.subscribe();

        bus.publish("orders.order.placed").unwrap();

        assert_eq!(stats.try_recv().unwrap(), "orders.order.placed");
        assert_eq!(audit.try_recv().unwrap(), "orders.order.placed");
    }

    #[test]
    fn stopped_workers_are_forgotten() {
        let bus: InMemoryEventBus<u64> = InMemoryEventBus::new();
        let live = bus.subscribe();
        drop(bus.subscribe());
        assert_eq!(bus.subscriber_count(), 2);

        bus.publish(1).unwrap();
        bus.publish(2).unwrap();

        assert_eq!(live.try_recv().unwrap(), 1);
        assert_eq!(live.try_recv().unwrap(), 2);
        assert_eq!(bus.subscriber_count(), 1);
    }

    #[test]
    fn messages_published_before_subscribing_are_not_seen() {
        let bus: InMemoryEventBus<u64> = InMemoryEventBus::new();
        bus.publish(1).unwrap();

        let late = bus.subscribe();
        bus.publish(2).unwrap();

        assert_eq!(late.try_recv().unwrap(), 2);
        assert!(late.try_recv().is_err());
    }
}
