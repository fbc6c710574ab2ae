//! Connection lifecycle controller.
//!
//! The controller owns the connection map and the service registry, feeds
//! connections with waiting traffic into the active-work queue, and drives
//! the ordered shutdown sequence. One sweep thread is the single writer of
//! the connection map; router workers only read it (correlation lookups)
//! and own individual descriptors between pop and release.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use switchboard_core::messages::{
    disconnect_notice, shutdown_notice, BUILTIN_MODULE, REASON_SESSION_TIMEOUT,
    REASON_SUPERSEDED, SVC_NO_OP, SVC_REGISTER_SERVICE, SVC_SHUTDOWN,
};
use switchboard_core::SwitchboardError;

use crate::config::ControllerConfig;
use crate::connection::{Connection, ConnectionDescriptor, IdleTimeout, LoopbackConnection};
use crate::queue::ActiveQueue;
use crate::registry::{RegistryError, ServiceRegistration, ServiceRegistry};
use crate::router;
use crate::transport::Transport;

struct RegisteredTransport {
    transport: Box<dyn Transport>,
    /// Managed transports are shut down by the controller at teardown;
    /// unmanaged ones are the caller's responsibility.
    managed: bool,
}

/// The connection lifecycle controller.
///
/// Construct with [`Controller::new`], share behind an `Arc`, call
/// [`Controller::start`] to spawn the sweep thread and router pool, and
/// [`Controller::stop`] / [`Controller::join`] to tear everything down in
/// order.
pub struct Controller {
    config: ControllerConfig,
    connections: DashMap<u64, Arc<ConnectionDescriptor>>,
    /// Descriptor ids start at 1; 0 is reserved as "no connection".
    next_id: AtomicU64,
    active: ActiveQueue,
    registry: ServiceRegistry,
    transports: Mutex<Vec<RegisteredTransport>>,
    stop: AtomicBool,
    sweep_handle: Mutex<Option<JoinHandle<()>>>,
    router_handles: Mutex<Vec<JoinHandle<()>>>,
}

impl Controller {
    /// Creates a controller with the built-in control-plane provider
    /// already registered on a loopback connection. No threads run until
    /// [`Controller::start`].
    #[must_use]
    pub fn new(config: ControllerConfig) -> Self {
        let controller = Self {
            config,
            connections: DashMap::new(),
            next_id: AtomicU64::new(1),
            active: ActiveQueue::new(),
            registry: ServiceRegistry::new(),
            transports: Mutex::new(Vec::new()),
            stop: AtomicBool::new(false),
            sweep_handle: Mutex::new(None),
            router_handles: Mutex::new(Vec::new()),
        };

        // Control plane: loopback-backed, never expires.
        let loopback: Arc<dyn Connection> = Arc::new(LoopbackConnection::new());
        let descriptor = controller.track(loopback, None);
        controller.registry.register_builtin(
            BUILTIN_MODULE,
            descriptor,
            [SVC_NO_OP, SVC_SHUTDOWN, SVC_REGISTER_SERVICE]
                .into_iter()
                .map(str::to_owned),
        );

        controller
    }

    // -----------------------------------------------------------------------
    // Public lifecycle API
    // -----------------------------------------------------------------------

    /// Spawns the router pool and the sweep thread.
    pub fn start(self: &Arc<Self>) {
        {
            let mut routers = self.router_handles.lock();
            for _ in 0..self.config.router_count {
                routers.push(router::spawn_router(Arc::clone(self)));
            }
        }

        let controller = Arc::clone(self);
        *self.sweep_handle.lock() = Some(thread::spawn(move || run_sweep(&controller)));

        info!(routers = self.config.router_count, "controller started");
    }

    /// Signals every controller thread to stop. Returns immediately; the
    /// sweep thread runs the shutdown sequence and [`Controller::join`]
    /// waits for it.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::Release);
        // Wake workers parked on the empty queue so they see the flag now.
        self.active.notify_all();
    }

    /// Waits for the sweep thread (and therefore the whole shutdown
    /// sequence) to finish.
    pub fn join(&self) {
        let handle = self.sweep_handle.lock().take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                warn!("sweep thread panicked");
            }
        }
    }

    /// Whether [`Controller::stop`] has been called.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }

    /// The configuration this controller runs with.
    #[must_use]
    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    // -----------------------------------------------------------------------
    // Connections and transports
    // -----------------------------------------------------------------------

    /// Registers a transport-level collaborator. Managed transports are
    /// shut down by the controller at teardown.
    ///
    /// Returns `false` (and drops the transport) when it is not active —
    /// a transport that failed to initialize must not be silently kept.
    pub fn register_interface(&self, transport: Box<dyn Transport>, managed: bool) -> bool {
        if !transport.is_active() {
            warn!(transport = transport.name(), "refusing inactive transport");
            return false;
        }
        debug!(transport = transport.name(), managed, "transport registered");
        self.transports
            .lock()
            .push(RegisteredTransport { transport, managed });
        true
    }

    /// Starts tracking a connection and returns its descriptor id.
    pub fn add_connection(&self, connection: Arc<dyn Connection>, timeout: IdleTimeout) -> u64 {
        let idle = match timeout {
            IdleTimeout::Default => Some(self.config.default_idle_timeout),
            IdleTimeout::Never => None,
            IdleTimeout::After(window) => Some(window),
        };
        self.track(connection, idle).id()
    }

    fn track(
        &self,
        connection: Arc<dyn Connection>,
        idle: Option<std::time::Duration>,
    ) -> Arc<ConnectionDescriptor> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let descriptor = Arc::new(ConnectionDescriptor::new(id, connection, idle));
        self.connections.insert(id, Arc::clone(&descriptor));
        debug!(id, "connection tracked");
        descriptor
    }

    /// Looks up a tracked connection by descriptor id (correlation
    /// routing).
    #[must_use]
    pub fn get_connection(&self, client_id: u64) -> Option<Arc<ConnectionDescriptor>> {
        self.connections
            .get(&client_id)
            .map(|entry| Arc::clone(entry.value()))
    }

    /// Number of tracked connections.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    // -----------------------------------------------------------------------
    // Service registry
    // -----------------------------------------------------------------------

    /// Registers (or extends) a provider, tearing down a superseded
    /// registration from another connection.
    ///
    /// # Errors
    ///
    /// Propagates [`RegistryError`] when the name cannot be taken.
    pub fn register_provider(
        &self,
        name: &str,
        descriptor: Arc<ConnectionDescriptor>,
        services: impl IntoIterator<Item = String>,
    ) -> Result<(), RegistryError> {
        let outcome = self.registry.register(name, descriptor, services)?;
        if let Some(old) = outcome.superseded {
            info!(
                provider = name,
                old_id = old.descriptor().id(),
                new_id = outcome.registration.descriptor().id(),
                "provider registration superseded"
            );
            let connection = old.descriptor().connection();
            connection.send(&disconnect_notice(REASON_SUPERSEDED).encode());
            connection.disconnect();
        }
        Ok(())
    }

    /// Removes a provider registration by name.
    pub fn unregister_provider(&self, name: &str) -> Option<Arc<ServiceRegistration>> {
        self.registry.unregister(name)
    }

    /// Looks up the provider registered for a module name.
    #[must_use]
    pub fn get_provider(&self, name: &str) -> Option<Arc<ServiceRegistration>> {
        self.registry.get(name)
    }

    // -----------------------------------------------------------------------
    // Sweep
    // -----------------------------------------------------------------------

    pub(crate) fn active_queue(&self) -> &ActiveQueue {
        &self.active
    }

    /// One sweep pass: reap dead and expired connections, queue those with
    /// waiting traffic.
    pub(crate) fn sweep(&self) {
        let now = Instant::now();
        let tracked: Vec<Arc<ConnectionDescriptor>> = self
            .connections
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();

        for descriptor in tracked {
            if !descriptor.connection().is_connected() {
                self.teardown(&descriptor, &SwitchboardError::TransportDisconnected);
            } else if descriptor.is_expired(now) && !descriptor.is_in_flight() {
                self.teardown(&descriptor, &SwitchboardError::ExpiredIdleConnection);
            } else if !descriptor.is_in_flight()
                && !self.active.is_in_queue(descriptor.id())
                // Membership is checked first: the sweep must not probe a
                // connection a router currently owns.
                && descriptor.connection().is_message_available()
            {
                descriptor.refresh_expiration();
                descriptor.set_in_flight(true);
                self.active.push(&descriptor);
            }
        }
    }

    /// Removes a connection, unregistering its provider if it had one.
    ///
    /// An expired connection can still hear from us, so it gets a
    /// disconnect notice before the link is closed; a dead transport gets
    /// none.
    fn teardown(&self, descriptor: &Arc<ConnectionDescriptor>, cause: &SwitchboardError) {
        if let Some(registration) = self.registry.unregister_descriptor(descriptor.id()) {
            info!(
                provider = registration.name(),
                id = descriptor.id(),
                cause = %cause,
                "provider connection gone; unregistered"
            );
        }

        let connection = descriptor.connection();
        if matches!(cause, SwitchboardError::ExpiredIdleConnection) {
            connection.send(&disconnect_notice(REASON_SESSION_TIMEOUT).encode());
        }
        connection.disconnect();
        self.connections.remove(&descriptor.id());
        debug!(id = descriptor.id(), cause = %cause, "connection removed");
    }

    /// Ordered teardown, run by the sweep thread after the stop flag is
    /// observed: routers first (no new dispatch), then provider
    /// notifications, then transports, queue, and connections.
    fn shutdown_sequence(&self) {
        info!("controller stopping");

        let router_handles: Vec<JoinHandle<()>> =
            self.router_handles.lock().drain(..).collect();
        for handle in router_handles {
            if handle.join().is_err() {
                warn!("router thread panicked");
            }
        }

        for registration in self.registry.drain() {
            if registration.is_builtin() {
                continue;
            }
            info!(provider = registration.name(), "notifying provider of shutdown");
            registration
                .descriptor()
                .connection()
                .send(&shutdown_notice().encode());
        }

        let transports: Vec<RegisteredTransport> = self.transports.lock().drain(..).collect();
        for entry in transports {
            if entry.managed {
                debug!(transport = entry.transport.name(), "shutting down transport");
                entry.transport.shutdown();
            }
        }

        self.active.drain();

        let tracked: Vec<Arc<ConnectionDescriptor>> = self
            .connections
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        for descriptor in tracked {
            descriptor.connection().disconnect();
        }
        self.connections.clear();

        info!("controller stopped");
    }
}

fn run_sweep(controller: &Arc<Controller>) {
    while !controller.is_stopped() {
        controller.sweep();
        thread::sleep(controller.config.sweep_interval);
    }
    controller.shutdown_sequence();
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use serde_json::json;

    use switchboard_core::messages::{
        no_op_request, register_service_request, ERROR_UNREGISTERED_PROVIDER,
        SVC_DISCONNECT,
    };
    use switchboard_core::Envelope;

    use crate::connection::{callback_pair, CallbackConnection};

    use super::*;

    fn test_config() -> ControllerConfig {
        ControllerConfig {
            router_count: 2,
            default_idle_timeout: Duration::from_secs(60),
            sweep_interval: Duration::from_millis(5),
            poll_interval: Duration::from_millis(5),
        }
    }

    fn started_controller() -> Arc<Controller> {
        let controller = Arc::new(Controller::new(test_config()));
        controller.start();
        controller
    }

    /// Adds a client connection, returning the caller-side endpoint.
    fn connect(controller: &Controller, timeout: IdleTimeout) -> CallbackConnection {
        let (user_end, controller_end) = callback_pair();
        controller.add_connection(Arc::new(controller_end), timeout);
        user_end
    }

    fn wait_message(endpoint: &CallbackConnection) -> String {
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if let Some(raw) = endpoint.receive() {
                return raw;
            }
            thread::sleep(Duration::from_millis(2));
        }
        panic!("no message arrived within the deadline");
    }

    fn wait_reply(endpoint: &CallbackConnection) -> Envelope {
        Envelope::decode(&wait_message(endpoint)).unwrap()
    }

    #[test]
    fn no_op_round_trips_through_the_control_plane() {
        let controller = started_controller();
        let client = connect(&controller, IdleTimeout::Never);

        client.send(&no_op_request().encode());
        let reply = wait_reply(&client);
        assert!(reply.body_field("status").is_some());

        controller.stop();
        controller.join();
    }

    #[test]
    fn request_without_provider_yields_error_scenario() {
        let controller = started_controller();
        let client = connect(&controller, IdleTimeout::Never);

        let mut request = Envelope::request("Echo", "Go");
        request.set_body_field("a", json!(1));
        client.send(&request.encode());

        let reply = wait_reply(&client);
        assert_eq!(
            reply.body_field("error"),
            Some(&json!(ERROR_UNREGISTERED_PROVIDER))
        );
        assert_eq!(
            reply.body_field("original-message"),
            Some(&serde_json::to_value(&request).unwrap())
        );

        controller.stop();
        controller.join();
    }

    #[test]
    fn register_then_route_and_correlate_scenario() {
        let controller = started_controller();
        let provider = connect(&controller, IdleTimeout::Never);
        let client = connect(&controller, IdleTimeout::Never);

        provider.send(&register_service_request("Echo", &["Go"]).encode());
        let ack = wait_reply(&provider);
        assert!(ack.body_field("status").is_some());

        let mut request = Envelope::request("Echo", "Go");
        request.set_body_field("a", json!(1));
        client.send(&request.encode());

        // The provider sees the request with the correlation id stamped.
        let delivered = wait_reply(&provider);
        assert_eq!(delivered.module, "Echo");
        assert_eq!(delivered.service, "Go");
        assert!(delivered.client_id >= 0);
        assert_eq!(delivered.body_field("a"), Some(&json!(1)));

        // The provider's reply comes back to the client verbatim.
        let mut response = delivered.clone();
        response.set_body_field("result", json!(2));
        let response_raw = response.encode();
        provider.send(&response_raw);

        assert_eq!(wait_message(&client), response_raw);

        controller.stop();
        controller.join();
    }

    #[test]
    fn provider_handles_interleaved_clients_by_correlation() {
        let controller = started_controller();
        let provider = connect(&controller, IdleTimeout::Never);
        let first = connect(&controller, IdleTimeout::Never);
        let second = connect(&controller, IdleTimeout::Never);

        provider.send(&register_service_request("Math", &["Add"]).encode());
        wait_reply(&provider);

        first.send(&Envelope::request("Math", "Add").encode());
        second.send(&Envelope::request("Math", "Add").encode());

        for _ in 0..2 {
            let mut delivered = wait_reply(&provider);
            delivered.set_body_field("echo-of", json!(delivered.client_id));
            provider.send(&delivered.encode());
        }

        let first_reply = wait_reply(&first);
        let second_reply = wait_reply(&second);
        assert_eq!(
            first_reply.body_field("echo-of"),
            Some(&json!(first_reply.client_id))
        );
        assert_eq!(
            second_reply.body_field("echo-of"),
            Some(&json!(second_reply.client_id))
        );
        assert_ne!(first_reply.client_id, second_reply.client_id);

        controller.stop();
        controller.join();
    }

    #[test]
    fn reregistration_from_new_connection_supersedes_old() {
        let controller = started_controller();
        let old_provider = connect(&controller, IdleTimeout::Never);
        let new_provider = connect(&controller, IdleTimeout::Never);

        old_provider.send(&register_service_request("Echo", &["Go"]).encode());
        wait_reply(&old_provider);

        new_provider.send(&register_service_request("Echo", &["Go"]).encode());

        // The old provider gets a disconnect notice and loses its link.
        let notice = wait_reply(&old_provider);
        assert_eq!(notice.service, SVC_DISCONNECT);
        assert_eq!(
            notice.body_field("disconnect-reason"),
            Some(&json!(REASON_SUPERSEDED))
        );
        let deadline = Instant::now() + Duration::from_secs(2);
        while old_provider.is_connected() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(2));
        }
        assert!(!old_provider.is_connected());

        // New registration answers requests now.
        wait_reply(&new_provider);
        let client = connect(&controller, IdleTimeout::Never);
        client.send(&Envelope::request("Echo", "Go").encode());
        let delivered = wait_reply(&new_provider);
        assert_eq!(delivered.module, "Echo");

        controller.stop();
        controller.join();
    }

    #[test]
    fn idle_connection_expires_with_notice() {
        let controller = started_controller();
        let client = connect(&controller, IdleTimeout::After(Duration::from_millis(50)));

        let notice = wait_reply(&client);
        assert_eq!(
            notice.body_field("disconnect-reason"),
            Some(&json!(REASON_SESSION_TIMEOUT))
        );

        let deadline = Instant::now() + Duration::from_secs(2);
        while client.is_connected() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(2));
        }
        assert!(!client.is_connected());

        controller.stop();
        controller.join();
    }

    #[test]
    fn traffic_refreshes_the_idle_window() {
        let controller = started_controller();
        let client = connect(&controller, IdleTimeout::After(Duration::from_millis(300)));

        // Keep the connection busy past several original windows.
        let until = Instant::now() + Duration::from_millis(900);
        while Instant::now() < until {
            client.send(&no_op_request().encode());
            wait_reply(&client);
            thread::sleep(Duration::from_millis(50));
        }
        assert!(client.is_connected());

        controller.stop();
        controller.join();
    }

    #[test]
    fn expired_descriptor_is_not_reaped_while_in_flight() {
        let controller = Arc::new(Controller::new(test_config()));
        let (user_end, controller_end) = callback_pair();
        let id = controller.add_connection(
            Arc::new(controller_end),
            IdleTimeout::After(Duration::from_millis(1)),
        );
        let descriptor = controller.get_connection(id).unwrap();

        thread::sleep(Duration::from_millis(10));
        descriptor.set_in_flight(true);
        controller.sweep();
        assert!(controller.get_connection(id).is_some());

        descriptor.set_in_flight(false);
        controller.sweep();
        assert!(controller.get_connection(id).is_none());
        assert!(!user_end.is_connected());
    }

    #[test]
    fn shutdown_notifies_providers_and_disconnects_everything() {
        let controller = started_controller();
        let provider = connect(&controller, IdleTimeout::Never);
        let client = connect(&controller, IdleTimeout::Never);

        provider.send(&register_service_request("Echo", &["Go"]).encode());
        wait_reply(&provider);

        controller.stop();
        controller.join();

        let notice = wait_reply(&provider);
        assert_eq!(notice.module, BUILTIN_MODULE);
        assert_eq!(notice.service, SVC_SHUTDOWN);
        assert!(!provider.is_connected());
        assert!(!client.is_connected());
        assert_eq!(controller.connection_count(), 0);
    }

    #[test]
    fn shutdown_control_message_stops_the_controller() {
        let controller = started_controller();
        let client = connect(&controller, IdleTimeout::Never);

        client.send(&shutdown_notice().encode());
        controller.join();
        assert!(controller.is_stopped());
    }
}
