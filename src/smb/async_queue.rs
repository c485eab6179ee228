//! SMB Async Response Queue: per-session FIFO for
//! responses that must not jump ahead of a synchronous reply still
//! being written, and for oplock-break / notify completions generated
//! outside the request/response cycle.

use std::collections::VecDeque;
use std::sync::Mutex;

/// Whether the pipeline currently has unread bytes queued.
pub trait PipelineState {
    fn has_unread_bytes(&self) -> bool;
}

#[derive(Default)]
pub struct AsyncResponseQueue {
    queue: Mutex<VecDeque<Vec<u8>>>,
}

impl AsyncResponseQueue {
    pub fn new() -> Self {
        AsyncResponseQueue::default()
    }

    /// Enqueues or returns a response to send immediately: queued if
    /// the pipeline still has unread bytes, sent right away otherwise.
    pub fn offer(&self, response: Vec<u8>, pipeline: &dyn PipelineState) -> Option<Vec<u8>> {
        if pipeline.has_unread_bytes() {
            self.queue.lock().unwrap().push_back(response);
            None
        } else {
            Some(response)
        }
    }

    /// Drains queued responses in FIFO order, called after the
    /// synchronous response for a command has been flushed.
    pub fn drain(&self) -> Vec<Vec<u8>> {
        self.queue.lock().unwrap().drain(..).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.lock().unwrap().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(bool);
    impl PipelineState for Fixed {
        fn has_unread_bytes(&self) -> bool {
            self.0
        }
    }

    #[test]
    fn sends_immediately_when_pipeline_drained() {
        let queue = AsyncResponseQueue::new();
        let sent = queue.offer(vec![1, 2, 3], &Fixed(false));
        assert_eq!(sent, Some(vec![1, 2, 3]));
        assert!(queue.is_empty());
    }

    #[test]
    fn enqueues_when_pipeline_has_unread_bytes() {
        let queue = AsyncResponseQueue::new();
        let sent = queue.offer(vec![9], &Fixed(true));
        assert_eq!(sent, None);
        assert_eq!(queue.drain(), vec![vec![9]]);
    }

    #[test]
    fn drains_in_fifo_order() {
        let queue = AsyncResponseQueue::new();
        queue.offer(vec![1], &Fixed(true));
        queue.offer(vec![2], &Fixed(true));
        assert_eq!(queue.drain(), vec![vec![1], vec![2]]);
    }
}
