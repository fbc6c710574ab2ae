//! Paired in-process connections.
//!
//! [`callback_pair`] creates two endpoints exchanging messages directly
//! through shared mailboxes — the in-process analog of a socket pair, used
//! for intra-process services and tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use super::Connection;

#[derive(Debug, Default)]
struct Mailbox {
    queue: Mutex<VecDeque<String>>,
}

impl Mailbox {
    fn push(&self, message: String) {
        self.queue.lock().push_back(message);
    }

    fn pop(&self) -> Option<String> {
        self.queue.lock().pop_front()
    }

    fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }
}

/// One endpoint of an in-process connection pair.
///
/// Cloning yields another handle to the same endpoint. Disconnecting either
/// endpoint disconnects the pair; messages already delivered remain
/// receivable so a drain in progress can finish.
#[derive(Debug, Clone)]
pub struct CallbackConnection {
    inbox: Arc<Mailbox>,
    peer_inbox: Arc<Mailbox>,
    connected: Arc<AtomicBool>,
}

/// Creates a connected pair of in-process endpoints.
#[must_use]
pub fn callback_pair() -> (CallbackConnection, CallbackConnection) {
    let left = Arc::new(Mailbox::default());
    let right = Arc::new(Mailbox::default());
    let connected = Arc::new(AtomicBool::new(true));

    (
        CallbackConnection {
            inbox: Arc::clone(&left),
            peer_inbox: Arc::clone(&right),
            connected: Arc::clone(&connected),
        },
        CallbackConnection {
            inbox: right,
            peer_inbox: left,
            connected,
        },
    )
}

impl Connection for CallbackConnection {
    fn send(&self, message: &str) -> bool {
        if !self.is_connected() {
            return false;
        }
        self.peer_inbox.push(message.to_owned());
        true
    }

    fn receive(&self) -> Option<String> {
        self.inbox.pop()
    }

    fn is_message_available(&self) -> bool {
        !self.inbox.is_empty()
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    fn disconnect(&self) {
        self.connected.store(false, Ordering::Release);
    }
}
