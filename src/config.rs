//! Discovery configuration.

use std::time::Duration;

use tonic::transport::ClientTlsConfig;

/// Namespace the control plane is installed into by default.
pub const DEFAULT_NAMESPACE: &str = "istio-system";

/// Conventional service name of the control plane.
pub const DEFAULT_SERVICE_NAME: &str = "istiod";

/// Plaintext discovery (ADS) port.
pub const DISCOVERY_PORT: u16 = 15010;

/// TLS discovery (ADS) port.
pub const DISCOVERY_TLS_PORT: u16 = 15012;

/// Control-plane debug/monitoring port.
pub const DEBUG_PORT: u16 = 15014;

/// Kubelet read-only API port.
pub const KUBELET_READ_ONLY_PORT: u16 = 10255;

/// Local Envoy sidecar admin API.
pub const ENVOY_ADMIN_URL: &str = "http://127.0.0.1:15000";

/// Node identity presented on every discovery request.
pub const NODE_ID: &str = "sidecar~127.0.0.1~meshprobe.default~default.svc.cluster.local";

/// Configuration for control-plane discovery and retrieval.
#[derive(Clone, Debug)]
pub struct DiscoveryConfig {
    /// Namespace the control plane is expected in.
    pub namespace: String,

    /// Conventional service name of the control plane.
    pub service_name: String,

    /// Plaintext discovery port.
    pub discovery_port: u16,

    /// TLS discovery port, tried only when `tls` is set.
    pub discovery_tls_port: u16,

    /// Debug endpoint port.
    pub debug_port: u16,

    /// Kubelet read-only port probed by the subnet scan.
    pub kubelet_port: u16,

    /// Envoy admin URL queried for the sidecar bootstrap.
    pub envoy_admin_url: String,

    /// Node identity sent with discovery requests.
    pub node_id: String,

    /// Deadline for establishing a discovery connection.
    pub dial_timeout: Duration,

    /// Deadline for a single discovery request/response exchange.
    pub request_timeout: Duration,

    /// Deadline for a single reachability probe or HTTP call.
    pub probe_timeout: Duration,

    /// TLS settings for the discovery connection, if any.
    pub tls: Option<ClientTlsConfig>,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_NAMESPACE.to_string(),
            service_name: DEFAULT_SERVICE_NAME.to_string(),
            discovery_port: DISCOVERY_PORT,
            discovery_tls_port: DISCOVERY_TLS_PORT,
            debug_port: DEBUG_PORT,
            kubelet_port: KUBELET_READ_ONLY_PORT,
            envoy_admin_url: ENVOY_ADMIN_URL.to_string(),
            node_id: NODE_ID.to_string(),
            dial_timeout: Duration::from_millis(500),
            request_timeout: Duration::from_secs(10),
            probe_timeout: Duration::from_secs(1),
            tls: None,
        }
    }
}

impl DiscoveryConfig {
    /// Creates a configuration with the conventional defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the namespace the control plane is expected in.
    #[must_use]
    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Sets the control-plane service name.
    #[must_use]
    pub fn service_name(mut self, service_name: impl Into<String>) -> Self {
        self.service_name = service_name.into();
        self
    }

    /// Sets the Envoy admin URL.
    #[must_use]
    pub fn envoy_admin_url(mut self, url: impl Into<String>) -> Self {
        self.envoy_admin_url = url.into();
        self
    }

    /// Sets the node identity.
    #[must_use]
    pub fn node_id(mut self, node_id: impl Into<String>) -> Self {
        self.node_id = node_id.into();
        self
    }

    /// Sets the connection deadline.
    #[must_use]
    pub fn dial_timeout(mut self, timeout: Duration) -> Self {
        self.dial_timeout = timeout;
        self
    }

    /// Sets the per-request deadline.
    #[must_use]
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Sets the per-probe deadline.
    #[must_use]
    pub fn probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    /// Enables TLS for discovery connections.
    #[must_use]
    pub fn tls(mut self, tls: ClientTlsConfig) -> Self {
        self.tls = Some(tls);
        self
    }

    /// Discovery ports to try, in order.
    pub(crate) fn discovery_ports(&self) -> Vec<u16> {
        if self.tls.is_some() {
            vec![self.discovery_tls_port, self.discovery_port]
        } else {
            vec![self.discovery_port]
        }
    }
}
