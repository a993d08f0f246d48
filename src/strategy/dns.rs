use async_trait::async_trait;

use super::{DiscoveryState, DiscoveryUpdate, Strategy, confirm_control_plane, verify_address};
use crate::ads::ClientConfig;
use crate::config::DiscoveryConfig;
use crate::error::{Error, Result};
use crate::scan::join_host_port;

/// Probes the control plane at its conventional in-cluster service name,
/// `<service>.<namespace>.svc`.
#[derive(Clone, Debug)]
pub struct WellKnownName {
    config: DiscoveryConfig,
}

impl WellKnownName {
    /// Creates the strategy.
    #[must_use]
    pub fn new(config: DiscoveryConfig) -> Self {
        Self { config }
    }

    fn host(&self, namespace: &str) -> String {
        format!("{}.{namespace}.svc", self.config.service_name)
    }
}

#[async_trait]
impl Strategy for WellKnownName {
    fn name(&self) -> &'static str {
        "well-known-name"
    }

    async fn run(&self, state: &DiscoveryState) -> Result<DiscoveryUpdate> {
        let namespace = state
            .namespace
            .as_deref()
            .ok_or_else(|| Error::Verify("namespace not yet discovered".to_string()))?;
        let host = self.host(namespace);

        let mut last = Error::NoControlPlane;
        for port in self.config.discovery_ports() {
            let address = join_host_port(&host, port);
            let mut client_config = ClientConfig::from(&self.config);
            if port != self.config.discovery_tls_port {
                client_config.tls = None;
            }

            match confirm_control_plane(&address, client_config).await {
                Ok(version) => {
                    return Ok(DiscoveryUpdate {
                        discovery_address: Some(address),
                        debug_address: Some(join_host_port(&host, self.config.debug_port)),
                        version: Some(version),
                        ..Default::default()
                    });
                }
                Err(e) => {
                    tracing::debug!("no discovery service at {address}: {e}");
                    last = e;
                }
            }
        }

        Err(last)
    }

    fn verify(&self, update: &DiscoveryUpdate) -> Result<()> {
        verify_address(update.discovery_address.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn conventional_host() {
        let strategy = WellKnownName::new(DiscoveryConfig::new().service_name("pilot"));
        assert_eq!(strategy.host("mesh"), "pilot.mesh.svc");
    }

    #[tokio::test]
    async fn requires_namespace() {
        let strategy = WellKnownName::new(DiscoveryConfig::new());
        let err = strategy.run(&DiscoveryState::default()).await.unwrap_err();

        assert!(matches!(err, Error::Verify(_)));
    }

    #[tokio::test]
    async fn unresolvable_name_fails() {
        let config = DiscoveryConfig::new()
            .service_name("meshprobe-does-not-exist")
            .dial_timeout(Duration::from_millis(200));
        let strategy = WellKnownName::new(config);
        let state = DiscoveryState {
            namespace: Some("invalid".to_string()),
            ..Default::default()
        };

        assert!(strategy.run(&state).await.is_err());
    }

    #[test]
    fn verify_requires_discovery_address() {
        let strategy = WellKnownName::new(DiscoveryConfig::new());

        assert!(strategy.verify(&DiscoveryUpdate::default()).is_err());
        assert!(
            strategy
                .verify(&DiscoveryUpdate {
                    discovery_address: Some("istiod.istio-system.svc:15010".to_string()),
                    ..Default::default()
                })
                .is_ok()
        );
    }
}
