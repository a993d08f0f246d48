//! Discovers the mesh control plane, snapshots its configuration and prints
//! audit findings.
//!
//! # Running in Kubernetes
//!
//! Run from any pod in the cluster. The well-known service name is tried
//! first; outside the control-plane namespace's DNS reach, the kubelet subnet
//! sweep and the local sidecar are used.
//!
//! # Environment Variables
//!
//! - `MESH_NAMESPACE`: control-plane namespace (default: istio-system)
//! - `MESH_SERVICE_NAME`: control-plane service name (default: istiod)
//! - `ENVOY_ADMIN_URL`: local sidecar admin API (default: http://127.0.0.1:15000)
//! - `DIAL_TIMEOUT_MS`: discovery dial deadline (default: 500)
//! - `PROBE_TIMEOUT_MS`: per-probe deadline (default: 1000)

use std::env;
use std::time::Duration;

use meshprobe::audit::{AuditContext, AuditorRegistry};
use meshprobe::{DiscoveryConfig, discover, snapshot};
use tracing::{Level, error, info, warn};

fn millis(name: &str) -> Option<Duration> {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .map(Duration::from_millis)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(Level::INFO.into()),
        )
        .init();

    let mut config = DiscoveryConfig::new();
    if let Ok(namespace) = env::var("MESH_NAMESPACE") {
        config = config.namespace(namespace);
    }

    if let Ok(service_name) = env::var("MESH_SERVICE_NAME") {
        config = config.service_name(service_name);
    }

    if let Ok(url) = env::var("ENVOY_ADMIN_URL") {
        config = config.envoy_admin_url(url);
    }

    if let Some(timeout) = millis("DIAL_TIMEOUT_MS") {
        config = config.dial_timeout(timeout);
    }

    if let Some(timeout) = millis("PROBE_TIMEOUT_MS") {
        config = config.probe_timeout(timeout);
    }

    info!("Looking for {} in {}", config.service_name, config.namespace);

    let mut state = match discover(&config).await {
        Ok(state) => state,
        Err(e) => {
            error!("Discovery failed: {e}");
            return Err(e.into());
        }
    };

    let snapshot = snapshot(&mut state, &config).await?;
    info!(
        "Snapshot: {} namespaces, {} peer authentications, {} authorization policies, \
         {} destination rules, {} gateways, {} virtual services",
        snapshot.namespaces().len(),
        snapshot.peer_authentications().len(),
        snapshot.authorization_policies().len(),
        snapshot.destination_rules().len(),
        snapshot.gateways().len(),
        snapshot.virtual_services().len()
    );

    let namespace = state.namespace.as_deref().unwrap_or(&config.namespace);
    let report = AuditorRegistry::standard().run(&AuditContext {
        snapshot: &snapshot,
        namespace,
        version: state.version.as_deref(),
    });

    for finding in &report.findings {
        info!("{finding}");
    }

    for failure in &report.failures {
        warn!("Auditor {} failed: {}", failure.auditor, failure.error);
    }

    info!("Total findings: {}", report.findings.len());

    Ok(())
}
