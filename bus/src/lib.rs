//! Single-producer single-consumer queues for the engine boundary
//!
//! Each queue carries one record type between exactly one producer and one
//! consumer: market updates from the feed to the engine, order requests from
//! the engine to the gateway, and order responses from the gateway back to
//! the engine. Callers own the SPSC contract; the channel itself does not
//! enforce it.

#![deny(warnings)]
#![deny(clippy::all)]
#![deny(missing_docs)]
#![forbid(unsafe_code)]

use anyhow::Result;
use crossbeam::channel;
use std::time::Duration;

/// Create a bounded SPSC queue with the given capacity
#[must_use]
pub fn bounded<T: Send + Sync + 'static>(capacity: usize) -> (Sender<T>, Receiver<T>) {
    let (tx, rx) = channel::bounded(capacity);
    (Sender { tx }, Receiver { rx })
}

/// Create an unbounded SPSC queue
#[must_use]
pub fn unbounded<T: Send + Sync + 'static>() -> (Sender<T>, Receiver<T>) {
    let (tx, rx) = channel::unbounded();
    (Sender { tx }, Receiver { rx })
}

/// Producing endpoint of a queue
pub struct Sender<T> {
    tx: channel::Sender<T>,
}

impl<T> Clone for Sender<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<T: Send + Sync + 'static> Sender<T> {
    /// Enqueue a record, blocking while a bounded queue is full
    pub fn send(&self, msg: T) -> Result<()> {
        self.tx.send(msg)?;
        Ok(())
    }

    /// Enqueue a record without blocking
    pub fn try_send(&self, msg: T) -> Result<()> {
        self.tx.try_send(msg)?;
        Ok(())
    }
}

/// Consuming endpoint of a queue
pub struct Receiver<T> {
    rx: channel::Receiver<T>,
}

impl<T> Receiver<T> {
    /// Dequeue a record, blocking until one arrives
    pub fn recv(&self) -> Result<T> {
        Ok(self.rx.recv()?)
    }

    /// Dequeue a record if one is ready
    pub fn try_recv(&self) -> Result<Option<T>> {
        match self.rx.try_recv() {
            Ok(msg) => Ok(Some(msg)),
            Err(channel::TryRecvError::Empty) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Dequeue a record, giving up after `timeout`
    pub fn recv_timeout(&self, timeout: Duration) -> Result<Option<T>> {
        match self.rx.recv_timeout(timeout) {
            Ok(msg) => Ok(Some(msg)),
            Err(channel::RecvTimeoutError::Timeout) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Number of records currently queued
    #[must_use]
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    /// Whether the queue is currently empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounded_queue_delivers_in_fifo_order() -> Result<()> {
        let (tx, rx) = bounded::<u64>(16);
        for i in 0..8 {
            tx.send(i)?;
        }
        for i in 0..8 {
            assert_eq!(rx.recv()?, i);
        }
        Ok(())
    }

    #[test]
    fn try_recv_on_empty_queue_returns_none() -> Result<()> {
        let (_tx, rx) = unbounded::<u64>();
        assert!(rx.try_recv()?.is_none());
        Ok(())
    }

    #[test]
    fn try_send_on_full_queue_fails() {
        let (tx, _rx) = bounded::<u64>(1);
        tx.try_send(1).expect("first send fits");
        assert!(tx.try_send(2).is_err());
    }

    #[test]
    fn recv_timeout_expires_on_empty_queue() -> Result<()> {
        let (_tx, rx) = unbounded::<u64>();
        assert!(rx.recv_timeout(Duration::from_millis(5))?.is_none());
        Ok(())
    }

    #[test]
    fn cross_thread_handoff() -> Result<()> {
        let (tx, rx) = bounded::<u64>(128);
        let producer = std::thread::spawn(move || {
            for i in 0..100 {
                tx.send(i).expect("send");
            }
        });
        let mut seen = Vec::new();
        while seen.len() < 100 {
            if let Some(v) = rx.try_recv()? {
                seen.push(v);
            }
        }
        producer.join().expect("join");
        assert_eq!(seen, (0..100).collect::<Vec<_>>());
        Ok(())
    }
}
