use std::collections::VecDeque;
use std::sync::Mutex;

use crate::error::{Error, Result};
use crate::transport::Request;

/// Deferred requests in arrival order.
///
/// Whether a request belongs here is decided once, on receipt; the queue
/// never reorders.
#[derive(Debug, Default)]
pub struct PendingQueue {
    q: Mutex<VecDeque<Request>>,
}

impl PendingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&self, req: Request) {
        self.lock().push_back(req);
    }

    pub fn dequeue(&self) -> Result<Request> {
        self.lock().pop_front().ok_or(Error::EmptyQueue)
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<Request>> {
        self.q.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::PendingQueue;
    use crate::error::Error;
    use crate::transport::Request;

    #[test]
    fn fifo_not_timestamp_order() {
        let q = PendingQueue::new();
        q.enqueue(Request::new(9, "late"));
        q.enqueue(Request::new(2, "early"));
        assert_eq!(q.len(), 2);
        assert_eq!(q.dequeue().unwrap(), Request::new(9, "late"));
        assert_eq!(q.dequeue().unwrap(), Request::new(2, "early"));
        assert!(q.is_empty());
    }

    #[test]
    fn empty_dequeue_is_a_fault() {
        let q = PendingQueue::new();
        assert!(matches!(q.dequeue(), Err(Error::EmptyQueue)));
    }
}
