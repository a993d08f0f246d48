//! End-to-end discovery: find the control plane, then pull its configuration.

use crate::ads::{AdsClient, ClientConfig};
use crate::catalog::Catalog;
use crate::config::DiscoveryConfig;
use crate::configz::DebugClient;
use crate::error::{Error, Result};
use crate::snapshot::ResourceSnapshot;
use crate::strategy::{
    DefaultNamespace, DiscoveryState, Runner, SidecarBootstrap, SubnetScan, WellKnownName,
};

/// Chain establishing the control-plane namespace.
#[must_use]
pub fn namespace_chain(config: &DiscoveryConfig) -> Runner {
    Runner::new("namespace").with(DefaultNamespace::new(config.namespace.clone()))
}

/// Chain establishing a control-plane address, in priority order: the
/// conventional service name, a kubelet subnet sweep, then the local sidecar.
#[must_use]
pub fn control_plane_chain(config: &DiscoveryConfig) -> Runner {
    Runner::new("control plane")
        .with(WellKnownName::new(config.clone()))
        .with(SubnetScan::new(config.clone()))
        .with(SidecarBootstrap::new(config.clone()))
}

/// Runs the namespace and control-plane chains.
///
/// # Errors
///
/// Fails if either chain is exhausted.
pub async fn discover(config: &DiscoveryConfig) -> Result<DiscoveryState> {
    let mut state = DiscoveryState::default();
    for chain in [namespace_chain(config), control_plane_chain(config)] {
        let outcome = chain.run(&mut state).await?;
        if !outcome.attempts.is_empty() {
            tracing::debug!(
                "{} succeeded after: {}",
                outcome.strategy,
                outcome.diagnostics()
            );
        }
    }

    tracing::info!(
        "control plane: discovery={:?} debug={:?} version={:?}",
        state.discovery_address,
        state.debug_address,
        state.version
    );
    Ok(state)
}

/// Retrieves a snapshot from the discovered control plane.
///
/// The discovery stream is preferred. The debug endpoint is used when no
/// discovery address is known or the stream is unreachable. The version is
/// recorded in `state` if it was not known yet.
///
/// # Errors
///
/// Returns [`Error::NoControlPlane`] if `state` holds no address, otherwise
/// the retrieval error.
pub async fn snapshot(
    state: &mut DiscoveryState,
    config: &DiscoveryConfig,
) -> Result<ResourceSnapshot> {
    if let Some(address) = state.discovery_address.clone() {
        match from_stream(&address, state, config).await {
            Ok(snapshot) => return Ok(snapshot),
            Err(e) if e.is_connectivity() && state.debug_address.is_some() => {
                tracing::warn!(
                    "discovery stream at {address} unreachable, using debug endpoint: {e}"
                );
            }
            Err(e) => return Err(e),
        }
    }

    match state.debug_address.as_deref() {
        Some(address) => from_debug(address, config).await,
        None => Err(Error::NoControlPlane),
    }
}

async fn from_stream(
    address: &str,
    state: &mut DiscoveryState,
    config: &DiscoveryConfig,
) -> Result<ResourceSnapshot> {
    let mut client_config = ClientConfig::from(config);
    if !address.ends_with(&format!(":{}", config.discovery_tls_port)) {
        client_config.tls = None;
    }

    let mut client = AdsClient::connect(address, client_config).await?;
    let objects = client.resources().await?;

    // A failed exchange closes the client, so the version comes last.
    if state.version.is_none() {
        match client.version().await {
            Ok(version) => state.version = Some(version),
            Err(e) => tracing::warn!("control-plane version unavailable: {e}"),
        }
    }
    client.close();

    let snapshot = ResourceSnapshot::from_objects(objects);
    tracing::debug!("snapshot of {} objects from {address}", snapshot.len());
    Ok(snapshot)
}

async fn from_debug(address: &str, config: &DiscoveryConfig) -> Result<ResourceSnapshot> {
    let client = DebugClient::new(address, config.probe_timeout).await?;
    let objects = client.objects(&Catalog::mesh()).await?;

    let snapshot = ResourceSnapshot::from_objects(objects);
    tracing::debug!("snapshot of {} objects from {address}/debug/configz", snapshot.len());
    Ok(snapshot)
}
