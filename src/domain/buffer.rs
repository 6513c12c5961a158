//! Inbound chunk queue shared between the notification path and readers.

use crate::domain::models::ReadOrder;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Queue of received notification chunks.
///
/// Cloning yields another handle onto the same queue. The transport's
/// notification callback holds one clone and the serial facade another; all
/// mutation happens under the inner lock. Unbounded, no deduplication.
#[derive(Debug, Clone, Default)]
pub struct InboundBuffer {
    chunks: Arc<Mutex<VecDeque<Vec<u8>>>>,
    order: ReadOrder,
}

impl InboundBuffer {
    pub fn new(order: ReadOrder) -> Self {
        Self {
            chunks: Arc::new(Mutex::new(VecDeque::new())),
            order,
        }
    }

    pub fn order(&self) -> ReadOrder {
        self.order
    }

    /// Queue one notification payload.
    pub fn receive(&self, chunk: &[u8]) {
        let mut chunks = self.lock();
        match self.order {
            ReadOrder::Fifo => chunks.push_back(chunk.to_vec()),
            ReadOrder::Lifo => chunks.push_front(chunk.to_vec()),
        }
    }

    /// Remove and return the next chunk, never waiting for data.
    pub fn pop(&self) -> Option<Vec<u8>> {
        self.lock().pop_front()
    }

    /// Number of queued chunks (not bytes).
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    // A panicking reader must not wedge the notification path.
    fn lock(&self) -> MutexGuard<'_, VecDeque<Vec<u8>>> {
        self.chunks.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_fifo_hands_out_oldest_first() {
        let buffer = InboundBuffer::new(ReadOrder::Fifo);
        buffer.receive(b"first");
        buffer.receive(b"second");
        assert_eq!(buffer.pop().as_deref(), Some(&b"first"[..]));
        assert_eq!(buffer.pop().as_deref(), Some(&b"second"[..]));
        assert_eq!(buffer.pop(), None);
    }

    #[test]
    fn test_lifo_hands_out_newest_first() {
        let buffer = InboundBuffer::new(ReadOrder::Lifo);
        buffer.receive(b"first");
        buffer.receive(b"second");
        assert_eq!(buffer.pop().as_deref(), Some(&b"second"[..]));
        assert_eq!(buffer.pop().as_deref(), Some(&b"first"[..]));
    }

    #[test]
    fn test_len_counts_chunks() {
        let buffer = InboundBuffer::default();
        assert!(buffer.is_empty());
        buffer.receive(&[1, 2, 3]);
        buffer.receive(&[]);
        assert_eq!(buffer.len(), 2);
        buffer.clear();
        assert_eq!(buffer.len(), 0);
    }

    #[test]
    fn test_clones_share_queue_across_threads() {
        let buffer = InboundBuffer::default();
        let producers: Vec<_> = (0..4u8)
            .map(|i| {
                let handle = buffer.clone();
                thread::spawn(move || {
                    for j in 0..250u8 {
                        handle.receive(&[i, j]);
                    }
                })
            })
            .collect();
        for producer in producers {
            producer.join().unwrap();
        }
        assert_eq!(buffer.len(), 1000);
    }
}
