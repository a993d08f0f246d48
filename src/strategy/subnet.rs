use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;

use async_trait::async_trait;
use futures::StreamExt;

use super::{DiscoveryState, DiscoveryUpdate, Strategy, confirm_control_plane, verify_address};
use crate::ads::ClientConfig;
use crate::config::DiscoveryConfig;
use crate::configz::DebugClient;
use crate::error::{Error, Result};
use crate::kubelet::{ControlPlanePod, KubeletClient, PodFilter};
use crate::scan::{Protocol, ScanJob, subnet_hosts};

/// Kubelet sweeps stay one below the generic scanner ceiling.
const KUBELET_SCAN_CONCURRENCY: usize = 255;

const ROUTE_TABLE: &str = "/proc/net/route";

/// Sweeps the default gateway's /24 for kubelets and asks each for
/// control-plane pods.
#[derive(Clone, Debug)]
pub struct SubnetScan {
    config: DiscoveryConfig,
    filter: PodFilter,
    route_table: PathBuf,
}

impl SubnetScan {
    /// Creates the strategy.
    #[must_use]
    pub fn new(config: DiscoveryConfig) -> Self {
        Self {
            config,
            filter: PodFilter::new(),
            route_table: PathBuf::from(ROUTE_TABLE),
        }
    }

    /// Replaces the control-plane pod filter.
    #[must_use]
    pub fn filter(mut self, filter: PodFilter) -> Self {
        self.filter = filter;
        self
    }

    /// Reads the routing table from `path` instead of `/proc/net/route`.
    #[must_use]
    pub fn route_table(mut self, path: impl Into<PathBuf>) -> Self {
        self.route_table = path.into();
        self
    }

    async fn kubelets(&self, gateway: Ipv4Addr) -> Result<Vec<String>> {
        let found = ScanJob::new(
            subnet_hosts(gateway),
            vec![self.config.kubelet_port],
            Protocol::Tcp,
        )
        .concurrency(KUBELET_SCAN_CONCURRENCY)
        .timeout(self.config.probe_timeout)
        .run()?
        .collect()
        .await;

        Ok(found)
    }

    async fn candidates(&self, kubelets: &[String]) -> Vec<ControlPlanePod> {
        let mut candidates = Vec::new();
        for kubelet in kubelets {
            let pods = match KubeletClient::new(kubelet, self.config.probe_timeout).await {
                Ok(client) => client.pods().await,
                Err(e) => Err(e),
            };

            match pods {
                Ok(pods) => candidates.extend(self.filter.select(&pods)),
                Err(e) => tracing::debug!("kubelet {kubelet}: {e}"),
            }
        }

        candidates
    }

    /// Probes a candidate pod, returning whichever of its addresses answer.
    ///
    /// Fails with the discovery error when neither address answers.
    async fn probe(&self, pod: &ControlPlanePod) -> Result<DiscoveryUpdate> {
        let mut update = DiscoveryUpdate::default();

        let discovery = pod
            .discovery
            .unwrap_or_else(|| SocketAddr::new(pod.ip, self.config.discovery_port))
            .to_string();
        let mut client_config = ClientConfig::from(&self.config);
        client_config.tls = None;
        let failure = match confirm_control_plane(&discovery, client_config).await {
            Ok(version) => {
                update.version = Some(version);
                update.discovery_address = Some(discovery);
                None
            }
            Err(e) => {
                tracing::debug!("pod {}: no discovery service at {discovery}: {e}", pod.name);
                Some(e)
            }
        };

        if let Some(debug) = pod.debug.map(|addr| addr.to_string()) {
            match DebugClient::new(&debug, self.config.probe_timeout).await {
                Ok(_) => update.debug_address = Some(debug),
                Err(e) => tracing::debug!("pod {}: no debug endpoint: {e}", pod.name),
            }
        }

        match failure {
            Some(e) if update.debug_address.is_none() => Err(e),
            _ => Ok(update),
        }
    }
}

#[async_trait]
impl Strategy for SubnetScan {
    fn name(&self) -> &'static str {
        "subnet-scan"
    }

    async fn run(&self, _state: &DiscoveryState) -> Result<DiscoveryUpdate> {
        let routes = tokio::fs::read_to_string(&self.route_table).await?;
        let gateway = parse_default_gateway(&routes)
            .ok_or_else(|| Error::Verify("no default route".to_string()))?;

        let kubelets = self.kubelets(gateway).await?;
        tracing::debug!("found {} kubelets near {gateway}", kubelets.len());

        let mut last = None;
        for pod in self.candidates(&kubelets).await {
            match self.probe(&pod).await {
                Ok(update) => {
                    tracing::debug!("control-plane pod {} answered", pod.name);
                    return Ok(DiscoveryUpdate { kubelets, ..update });
                }
                Err(e) => {
                    tracing::warn!("control-plane pod {} did not answer: {e}", pod.name);
                    last = Some(e);
                }
            }
        }

        if let Some(e) = last {
            return Err(e);
        }

        Ok(DiscoveryUpdate {
            kubelets,
            ..Default::default()
        })
    }

    fn verify(&self, update: &DiscoveryUpdate) -> Result<()> {
        if update.kubelets.is_empty() {
            return Err(Error::Verify("no kubelet answered".to_string()));
        }

        match (&update.discovery_address, &update.debug_address) {
            (None, None) => Err(Error::Verify("no control-plane pod answered".to_string())),
            (Some(address), _) | (None, Some(address)) => verify_address(Some(address)),
        }
    }
}

/// Finds the default gateway in a `/proc/net/route` table.
///
/// Addresses in the table are little-endian hex.
#[must_use]
pub fn parse_default_gateway(table: &str) -> Option<Ipv4Addr> {
    table.lines().skip(1).find_map(|line| {
        let mut fields = line.split_whitespace();
        let (_iface, destination, gateway) = (fields.next()?, fields.next()?, fields.next()?);
        if destination != "00000000" {
            return None;
        }

        let raw = u32::from_str_radix(gateway, 16).ok()?;
        Some(Ipv4Addr::from(raw.to_le_bytes()))
    })
}
