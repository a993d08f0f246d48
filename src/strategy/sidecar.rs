use async_trait::async_trait;

use super::{DiscoveryState, DiscoveryUpdate, Strategy, verify_address};
use crate::bootstrap::{self, EnvoyAdminClient};
use crate::config::DiscoveryConfig;
use crate::error::{Error, Result};

/// Reads the discovery address the local Envoy sidecar was bootstrapped with.
#[derive(Clone, Debug)]
pub struct SidecarBootstrap {
    config: DiscoveryConfig,
}

impl SidecarBootstrap {
    /// Creates the strategy.
    #[must_use]
    pub fn new(config: DiscoveryConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Strategy for SidecarBootstrap {
    fn name(&self) -> &'static str {
        "sidecar-bootstrap"
    }

    async fn run(&self, _state: &DiscoveryState) -> Result<DiscoveryUpdate> {
        let admin = EnvoyAdminClient::new(&self.config.envoy_admin_url, self.config.probe_timeout)?;
        let dump = admin.config_dump().await?;
        let address = bootstrap::discovery_address(&dump).ok_or_else(|| {
            Error::Verify("sidecar config_dump names no discovery address".to_string())
        })?;

        tracing::debug!("sidecar bootstrap points at {address}");
        Ok(DiscoveryUpdate {
            discovery_address: Some(address),
            ..Default::default()
        })
    }

    fn verify(&self, update: &DiscoveryUpdate) -> Result<()> {
        verify_address(update.discovery_address.as_deref())
    }
}
