//! Configuration structures for clients, servers and the loopback network.

/// Client-side batching behavior.
#[derive(Clone, Debug, Default)]
pub struct ClientConfig {
    /// Reject a call with [`CallError::Timeout`](crate::CallError::Timeout)
    /// if no response arrived this many ticks after it was enqueued.
    ///
    /// `None` keeps calls pending until a response arrives or the connection
    /// closes. A call that expires before its batch is flushed is never sent,
    /// so `Some(0)` rejects every call without sending it.
    pub call_timeout_ticks: Option<u64>,
}

impl ClientConfig {
    /// Create a configuration with no call timeout.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable a per-call deadline of `ticks` ticks.
    pub fn with_call_timeout(mut self, ticks: u64) -> Self {
        self.call_timeout_ticks = Some(ticks);
        self
    }
}

/// Server-side orchestration behavior.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Push the manifest to every newly opened connection.
    pub push_manifest: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            push_manifest: true,
        }
    }
}

impl ServerConfig {
    /// Create the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable or disable the manifest push on connect.
    pub fn with_manifest_push(mut self, enabled: bool) -> Self {
        self.push_manifest = enabled;
        self
    }
}

/// Behavior of the in-memory [`LoopbackNetwork`](crate::loopback::LoopbackNetwork).
#[derive(Clone, Debug)]
pub struct LoopbackConfig {
    /// Ticks between send and delivery. Zero delivers on the current tick,
    /// after the sender yields.
    pub latency_ticks: u32,

    /// Probability in `[0, 1]` that a message is silently lost.
    pub drop_probability: f64,
}

impl Default for LoopbackConfig {
    fn default() -> Self {
        Self {
            latency_ticks: 1,
            drop_probability: 0.0,
        }
    }
}

impl LoopbackConfig {
    /// Reliable delivery with one tick of latency.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set delivery latency.
    pub fn with_latency(mut self, ticks: u32) -> Self {
        self.latency_ticks = ticks;
        self
    }

    /// Set loss probability, clamped to `[0, 1]`.
    pub fn with_drop_probability(mut self, probability: f64) -> Self {
        self.drop_probability = probability.clamp(0.0, 1.0);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        assert_eq!(ClientConfig::default().call_timeout_ticks, None);
        assert!(ServerConfig::default().push_manifest);
        let loopback = LoopbackConfig::default();
        assert_eq!(loopback.latency_ticks, 1);
        assert_eq!(loopback.drop_probability, 0.0);
    }

    #[test]
    fn test_builders() {
        assert_eq!(
            ClientConfig::new().with_call_timeout(30).call_timeout_ticks,
            Some(30)
        );
        assert!(!ServerConfig::new().with_manifest_push(false).push_manifest);
        assert_eq!(
            LoopbackConfig::new().with_drop_probability(3.0).drop_probability,
            1.0
        );
    }
}
