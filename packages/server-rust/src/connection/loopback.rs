//! Self-paired loopback connection.

use std::collections::VecDeque;

use parking_lot::Mutex;

use super::Connection;

/// A connection that is both of its own endpoints: everything sent is
/// received back in order.
///
/// The control-plane provider is backed by one of these — its replies
/// re-enter the normal dispatch path and get routed to the requester by
/// correlation id. Loopbacks never report disconnected; they live until the
/// controller tears the world down.
#[derive(Debug, Default)]
pub struct LoopbackConnection {
    queue: Mutex<VecDeque<String>>,
}

impl LoopbackConnection {
    /// Creates an empty loopback.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Connection for LoopbackConnection {
    fn send(&self, message: &str) -> bool {
        self.queue.lock().push_back(message.to_owned());
        true
    }

    fn receive(&self) -> Option<String> {
        self.queue.lock().pop_front()
    }

    fn is_message_available(&self) -> bool {
        !self.queue.lock().is_empty()
    }

    fn is_connected(&self) -> bool {
        true
    }

    fn disconnect(&self) {}
}
