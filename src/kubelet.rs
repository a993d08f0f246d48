//! Kubelet read-only API client.
//!
//! The kubelet's read-only port serves the pods scheduled on its node without
//! authentication. The subnet strategy uses it to find control-plane pods and
//! the ports they expose.

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use k8s_openapi::List;
use k8s_openapi::api::core::v1::{ContainerPort, Pod};

use crate::error::{Error, Result};

/// Port of a control-plane container.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Port {
    /// A numeric port number.
    Number(u16),
    /// A named container port.
    Name(String),
}

impl From<u16> for Port {
    fn from(port: u16) -> Self {
        Self::Number(port)
    }
}

impl From<&str> for Port {
    fn from(name: &str) -> Self {
        Self::Name(name.to_string())
    }
}

impl From<String> for Port {
    fn from(name: String) -> Self {
        Self::Name(name)
    }
}

/// Named container port serving the discovery protocol.
pub const DISCOVERY_PORT_NAME: &str = "grpc-xds";

/// Named container port serving the debug endpoints.
pub const DEBUG_PORT_NAME: &str = "http-monitoring";

/// Client for one kubelet's read-only API.
#[derive(Clone, Debug)]
pub struct KubeletClient {
    base: String,
    http: reqwest::Client,
}

impl KubeletClient {
    /// Connects to the kubelet at `address` (`host:port`) and checks that it
    /// answers its health probe.
    ///
    /// # Errors
    ///
    /// Fails if the ping request fails or returns a non-success status.
    pub async fn new(address: &str, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(timeout)
            .timeout(timeout)
            .build()
            .map_err(|e| Error::http(address, e))?;

        let client = Self {
            base: format!("http://{address}"),
            http,
        };

        let url = format!("{}/healthz/ping", client.base);
        client
            .http
            .get(&url)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| Error::http(&url, e))?;

        tracing::debug!("kubelet at {address} is alive");
        Ok(client)
    }

    /// Lists the pods on the kubelet's node.
    ///
    /// # Errors
    ///
    /// Fails on transport errors or an undecodable pod list.
    pub async fn pods(&self) -> Result<Vec<Pod>> {
        let url = format!("{}/pods", self.base);
        let body = self
            .http
            .get(&url)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| Error::http(&url, e))?
            .bytes()
            .await
            .map_err(|e| Error::http(&url, e))?;

        let list: List<Pod> = serde_json::from_slice(&body).map_err(|e| Error::json(&url, e))?;
        Ok(list.items)
    }
}

/// A control-plane pod found on a kubelet.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ControlPlanePod {
    /// `namespace/name` of the pod.
    pub name: String,
    /// Pod IP.
    pub ip: IpAddr,
    /// Discovery address, if the port resolved.
    pub discovery: Option<SocketAddr>,
    /// Debug address, if the port resolved.
    pub debug: Option<SocketAddr>,
}

/// Selects control-plane pods from a pod list.
#[derive(Clone, Debug)]
pub struct PodFilter {
    labels: Vec<(String, String)>,
    discovery: Port,
    debug: Port,
}

impl Default for PodFilter {
    fn default() -> Self {
        Self {
            labels: vec![
                ("istio".to_string(), "pilot".to_string()),
                ("app".to_string(), "istiod".to_string()),
            ],
            discovery: DISCOVERY_PORT_NAME.into(),
            debug: DEBUG_PORT_NAME.into(),
        }
    }
}

impl PodFilter {
    /// Creates a filter matching the conventional control-plane labels and
    /// named ports.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the discovery port (number or name).
    #[must_use]
    pub fn discovery_port(mut self, port: impl Into<Port>) -> Self {
        self.discovery = port.into();
        self
    }

    /// Sets the debug port (number or name).
    #[must_use]
    pub fn debug_port(mut self, port: impl Into<Port>) -> Self {
        self.debug = port.into();
        self
    }

    /// Returns the running, ready pods that carry any control-plane label.
    #[must_use]
    pub fn select(&self, pods: &[Pod]) -> Vec<ControlPlanePod> {
        pods.iter().filter_map(|pod| self.candidate(pod)).collect()
    }

    fn candidate(&self, pod: &Pod) -> Option<ControlPlanePod> {
        let labels = pod.metadata.labels.as_ref()?;
        let matched = self
            .labels
            .iter()
            .any(|(k, v)| labels.get(k).is_some_and(|l| l == v));
        if !matched || !is_ready(pod) {
            return None;
        }

        let ip: IpAddr = pod.status.as_ref()?.pod_ip.as_deref()?.parse().ok()?;
        let ports = container_ports(pod);

        Some(ControlPlanePod {
            name: format!(
                "{}/{}",
                pod.metadata.namespace.as_deref().unwrap_or_default(),
                pod.metadata.name.as_deref().unwrap_or_default()
            ),
            ip,
            discovery: resolve_port(&self.discovery, &ports).map(|p| SocketAddr::new(ip, p)),
            debug: resolve_port(&self.debug, &ports).map(|p| SocketAddr::new(ip, p)),
        })
    }
}

/// A pod is ready if it is running and its `Ready` condition is true or unset.
fn is_ready(pod: &Pod) -> bool {
    let Some(status) = pod.status.as_ref() else {
        return false;
    };

    if status.phase.as_deref() != Some("Running") {
        return false;
    }

    status
        .conditions
        .as_ref()
        .and_then(|conditions| conditions.iter().find(|c| c.type_ == "Ready"))
        .is_none_or(|c| c.status == "True")
}

fn container_ports(pod: &Pod) -> Vec<&ContainerPort> {
    pod.spec
        .iter()
        .flat_map(|spec| &spec.containers)
        .flat_map(|c| c.ports.iter().flatten())
        .collect()
}

fn resolve_port(port: &Port, ports: &[&ContainerPort]) -> Option<u16> {
    match port {
        Port::Number(n) => Some(*n),
        Port::Name(name) => ports
            .iter()
            .find(|p| p.name.as_deref() == Some(name.as_str()))
            .and_then(|p| u16::try_from(p.container_port).ok()),
    }
}
