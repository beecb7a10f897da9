//! Bounded per-channel frame queues.
//!
//! The two data channels of a peer want different overflow behavior: the
//! reliable channel must preserve ordering, so a full queue disconnects the
//! peer; the unreliable channel is best-effort, so a full queue evicts the
//! oldest undelivered frame. tokio's mpsc cannot evict, hence this small
//! primitive: a mutex-guarded ring plus a `Notify` for the single consumer.
//!
//! Producers never wait — `push` is synchronous and runs on the central
//! task. The sole consumer is the channel's write pump.

use std::collections::VecDeque;
use std::sync::Mutex;

use bytes::Bytes;
use tokio::sync::Notify;

/// What happens when a push finds the queue full.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverflowPolicy {
    /// Refuse the frame; the caller disconnects the peer.
    Disconnect,
    /// Evict the oldest queued frame and accept the new one.
    DropOldest,
}

/// Successful push outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pushed {
    Stored,
    /// Stored, but the oldest frame was evicted to make room.
    EvictedOldest,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PushError {
    #[error("queue closed")]
    Closed,
    /// Only produced under [`OverflowPolicy::Disconnect`].
    #[error("queue full")]
    Overflow,
}

#[derive(Debug)]
struct Inner {
    frames: VecDeque<Bytes>,
    closed: bool,
}

/// A bounded multi-frame queue with a pluggable overflow policy.
#[derive(Debug)]
pub struct FrameQueue {
    inner: Mutex<Inner>,
    notify: Notify,
    capacity: usize,
    policy: OverflowPolicy,
}

impl FrameQueue {
    pub fn new(capacity: usize, policy: OverflowPolicy) -> Self {
        assert!(capacity > 0, "queue capacity must be non-zero");
        Self {
            inner: Mutex::new(Inner {
                frames: VecDeque::with_capacity(capacity),
                closed: false,
            }),
            notify: Notify::new(),
            capacity,
            policy,
        }
    }

    pub fn push(&self, frame: Bytes) -> Result<Pushed, PushError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.closed {
            return Err(PushError::Closed);
        }
        let outcome = if inner.frames.len() >= self.capacity {
            match self.policy {
                OverflowPolicy::Disconnect => return Err(PushError::Overflow),
                OverflowPolicy::DropOldest => {
                    inner.frames.pop_front();
                    inner.frames.push_back(frame);
                    Pushed::EvictedOldest
                }
            }
        } else {
            inner.frames.push_back(frame);
            Pushed::Stored
        };
        drop(inner);
        self.notify.notify_one();
        Ok(outcome)
    }

    /// Await the next frame; `None` once the queue is closed and drained of
    /// nothing (close discards pending frames — a dead peer gets no more
    /// writes).
    pub async fn pop(&self) -> Option<Bytes> {
        loop {
            let notified = self.notify.notified();
            {
                let mut inner = self.inner.lock().unwrap();
                if inner.closed {
                    return None;
                }
                if let Some(frame) = inner.frames.pop_front() {
                    return Some(frame);
                }
            }
            notified.await;
        }
    }

    /// Close the queue and discard anything still buffered.
    pub fn close(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.closed = true;
        inner.frames.clear();
        drop(inner);
        self.notify.notify_waiters();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
