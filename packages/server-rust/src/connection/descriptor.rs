//! Controller bookkeeping record for a tracked connection.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use super::Connection;

/// Per-connection state the controller sweeps over: identity, sliding
/// expiration, and the in-flight flag that keeps two routers from
/// processing the same connection concurrently.
///
/// Shared as `Arc` between the connection map, the active-work queue, and
/// the service registry's back-reference; the descriptor (and through it
/// the connection) is released when the last of those drops it.
#[derive(Debug)]
pub struct ConnectionDescriptor {
    id: u64,
    connection: Arc<dyn Connection>,
    /// Sliding window size; `None` means the connection never expires.
    idle_timeout: Option<Duration>,
    /// Absolute deadline, pushed forward on traffic.
    expires_at: Mutex<Option<Instant>>,
    in_flight: AtomicBool,
}

impl ConnectionDescriptor {
    /// Creates a descriptor with its expiration one idle window from now.
    #[must_use]
    pub fn new(id: u64, connection: Arc<dyn Connection>, idle_timeout: Option<Duration>) -> Self {
        Self {
            id,
            connection,
            idle_timeout,
            expires_at: Mutex::new(idle_timeout.map(|window| Instant::now() + window)),
            in_flight: AtomicBool::new(false),
        }
    }

    /// Unique id; doubles as the correlation `client-id` stamped into
    /// forwarded requests.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The underlying connection.
    #[must_use]
    pub fn connection(&self) -> &Arc<dyn Connection> {
        &self.connection
    }

    /// Whether the sliding idle window has elapsed. Never true for
    /// non-expiring descriptors.
    #[must_use]
    pub fn is_expired(&self, now: Instant) -> bool {
        self.expires_at
            .lock()
            .is_some_and(|deadline| now >= deadline)
    }

    /// Pushes the expiration one idle window forward. No-op for
    /// non-expiring descriptors.
    pub fn refresh_expiration(&self) {
        if let Some(window) = self.idle_timeout {
            *self.expires_at.lock() = Some(Instant::now() + window);
        }
    }

    /// Marks the descriptor as owned (or released) by a router.
    pub fn set_in_flight(&self, in_flight: bool) {
        self.in_flight.store(in_flight, Ordering::Release);
    }

    /// `true` while a router owns this descriptor.
    #[must_use]
    pub fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use crate::connection::callback_pair;

    use super::*;

    fn descriptor(idle_timeout: Option<Duration>) -> ConnectionDescriptor {
        let (endpoint, _peer) = callback_pair();
        ConnectionDescriptor::new(1, Arc::new(endpoint), idle_timeout)
    }

    #[test]
    fn expires_after_idle_window() {
        let descriptor = descriptor(Some(Duration::from_millis(20)));
        assert!(!descriptor.is_expired(Instant::now()));
        assert!(descriptor.is_expired(Instant::now() + Duration::from_millis(25)));
    }

    #[test]
    fn refresh_slides_the_deadline() {
        let descriptor = descriptor(Some(Duration::from_millis(400)));
        std::thread::sleep(Duration::from_millis(300));

        // Without the refresh the original deadline would pass during the
        // second sleep.
        descriptor.refresh_expiration();
        std::thread::sleep(Duration::from_millis(300));

        assert!(!descriptor.is_expired(Instant::now()));
        assert!(descriptor.is_expired(Instant::now() + Duration::from_millis(500)));
    }

    #[test]
    fn never_expires_without_idle_timeout() {
        let descriptor = descriptor(None);
        assert!(!descriptor.is_expired(Instant::now() + Duration::from_secs(3600)));
    }

    #[test]
    fn in_flight_flag_round_trips() {
        let descriptor = descriptor(None);
        assert!(!descriptor.is_in_flight());
        descriptor.set_in_flight(true);
        assert!(descriptor.is_in_flight());
        descriptor.set_in_flight(false);
        assert!(!descriptor.is_in_flight());
    }
}
