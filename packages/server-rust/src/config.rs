//! Controller configuration types.

use std::time::Duration;

/// Tuning knobs for the controller, its sweep loop, and the router pool.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Number of router worker threads dispatching messages.
    pub router_count: usize,
    /// Sliding idle timeout applied to connections added with
    /// [`IdleTimeout::Default`](crate::connection::IdleTimeout::Default).
    pub default_idle_timeout: Duration,
    /// Interval between controller sweep passes. Bounds how quickly new
    /// traffic is noticed and dead connections are reaped.
    pub sweep_interval: Duration,
    /// Bounded wait used by router workers when the active queue is empty.
    /// Also bounds shutdown latency per worker.
    pub poll_interval: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            router_count: 2,
            default_idle_timeout: Duration::from_secs(60),
            sweep_interval: Duration::from_millis(10),
            poll_interval: Duration::from_millis(10),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn controller_config_defaults() {
        let config = ControllerConfig::default();
        assert_eq!(config.router_count, 2);
        assert_eq!(config.default_idle_timeout, Duration::from_secs(60));
        assert_eq!(config.sweep_interval, Duration::from_millis(10));
        assert_eq!(config.poll_interval, Duration::from_millis(10));
    }
}
