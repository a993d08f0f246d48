//! Envoy sidecar bootstrap inspection.
//!
//! A sidecar knows where its control plane lives: the address is in its
//! bootstrap node metadata and shows up again in the names of the clusters
//! and routes it was handed.

use std::time::Duration;

use serde_json::Value;

use crate::config::DISCOVERY_TLS_PORT;
use crate::error::{Error, Result};

const DISCOVERY_ADDRESS: &str = "/bootstrap/node/metadata/PROXY_CONFIG/discoveryAddress";

const CLUSTER_LISTS: [&str; 3] = [
    "static_clusters",
    "dynamic_active_clusters",
    "dynamic_warming_clusters",
];

const ROUTE_LISTS: [&str; 2] = ["static_route_configs", "dynamic_route_configs"];

/// Client for the local Envoy admin API.
#[derive(Clone, Debug)]
pub struct EnvoyAdminClient {
    base: String,
    http: reqwest::Client,
}

impl EnvoyAdminClient {
    /// Creates a client for the admin API at `admin_url`.
    ///
    /// # Errors
    ///
    /// Fails if the HTTP client cannot be built.
    pub fn new(admin_url: &str, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(timeout)
            .timeout(timeout)
            .build()
            .map_err(|e| Error::http(admin_url, e))?;

        Ok(Self {
            base: admin_url.trim_end_matches('/').to_string(),
            http,
        })
    }

    /// Fetches `/config_dump`.
    ///
    /// # Errors
    ///
    /// Fails on transport errors or a body that is not JSON.
    pub async fn config_dump(&self) -> Result<Value> {
        let url = format!("{}/config_dump", self.base);
        self.http
            .get(&url)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| Error::http(&url, e))?
            .json()
            .await
            .map_err(|e| Error::http(&url, e))
    }
}

/// Extracts the control-plane discovery address from a `config_dump`.
///
/// The bootstrap's `discoveryAddress` wins. Otherwise the first cluster or
/// virtual host naming the TLS discovery port is used.
#[must_use]
pub fn discovery_address(dump: &Value) -> Option<String> {
    let configs = dump.get("configs")?.as_array()?;

    if let Some(address) = configs
        .iter()
        .filter_map(|c| c.pointer(DISCOVERY_ADDRESS).and_then(Value::as_str))
        .find(|a| !a.is_empty())
    {
        return Some(address.to_string());
    }

    configs.iter().find_map(|config| {
        cluster_names(config)
            .find_map(from_cluster_name)
            .or_else(|| virtual_host_names(config).find_map(from_virtual_host))
    })
}

fn entries<'a>(config: &'a Value, lists: &'a [&str]) -> impl Iterator<Item = &'a Value> + 'a {
    lists
        .iter()
        .filter_map(|list| config.get(*list).and_then(Value::as_array))
        .flatten()
}

fn cluster_names(config: &Value) -> impl Iterator<Item = &str> {
    entries(config, &CLUSTER_LISTS)
        .filter_map(|c| c.pointer("/cluster/name").and_then(Value::as_str))
}

fn virtual_host_names(config: &Value) -> impl Iterator<Item = &str> {
    entries(config, &ROUTE_LISTS)
        .filter_map(|r| r.pointer("/route_config/virtual_hosts").and_then(Value::as_array))
        .flatten()
        .filter_map(|vh| vh.get("name").and_then(Value::as_str))
}

/// `outbound|15012||istiod.istio-system.svc.cluster.local`
fn from_cluster_name(name: &str) -> Option<String> {
    let mut parts = name.split('|');
    let (_, port, _, host) = (parts.next()?, parts.next()?, parts.next()?, parts.next()?);
    let matches = port.parse::<u16>().ok() == Some(DISCOVERY_TLS_PORT) && !host.is_empty();
    matches.then(|| format!("{host}:{port}"))
}

/// `istiod.istio-system.svc.cluster.local:15012`
fn from_virtual_host(name: &str) -> Option<String> {
    let (host, port) = name.rsplit_once(':')?;
    let matches = port.parse::<u16>().ok() == Some(DISCOVERY_TLS_PORT) && !host.is_empty();
    matches.then(|| name.to_string())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::testing;

    fn clusters(names: &[&str]) -> Value {
        json!({
            "@type": "type.googleapis.com/envoy.admin.v3.ClustersConfigDump",
            "dynamic_active_clusters": names
                .iter()
                .map(|n| json!({"cluster": {"name": n}}))
                .collect::<Vec<_>>()
        })
    }

    #[test]
    fn bootstrap_field_wins() {
        let dump = json!({"configs": [
            {
                "@type": "type.googleapis.com/envoy.admin.v3.BootstrapConfigDump",
                "bootstrap": {"node": {"metadata": {"PROXY_CONFIG": {
                    "discoveryAddress": "istiod.istio-system.svc:15012"
                }}}}
            },
            clusters(&["outbound|15012||istiod-canary.istio-system.svc.cluster.local"])
        ]});

        assert_eq!(
            discovery_address(&dump).as_deref(),
            Some("istiod.istio-system.svc:15012")
        );
    }

    #[test]
    fn falls_back_to_cluster_names() {
        let dump = json!({"configs": [
            {"bootstrap": {"node": {"id": "sidecar~10.0.0.1~web.default~default.svc.cluster.local"}}},
            clusters(&[
                "outbound|9080||reviews.default.svc.cluster.local",
                "outbound|15012||istiod.istio-system.svc.cluster.local",
            ])
        ]});

        assert_eq!(
            discovery_address(&dump).as_deref(),
            Some("istiod.istio-system.svc.cluster.local:15012")
        );
    }

    #[test]
    fn falls_back_to_virtual_hosts() {
        let dump = json!({"configs": [{
            "dynamic_route_configs": [{"route_config": {"virtual_hosts": [
                {"name": "reviews.default.svc.cluster.local:9080"},
                {"name": "istiod.istio-system.svc.cluster.local:15012"}
            ]}}]
        }]});

        assert_eq!(
            discovery_address(&dump).as_deref(),
            Some("istiod.istio-system.svc.cluster.local:15012")
        );
    }

    #[test]
    fn nothing_found() {
        assert_eq!(discovery_address(&json!({})), None);
        let dump = json!({"configs": [clusters(&["BlackHoleCluster"])]});
        assert_eq!(discovery_address(&dump), None);
    }

    #[test]
    fn name_parsing() {
        assert_eq!(from_cluster_name("outbound|15012|"), None);
        assert_eq!(from_cluster_name("outbound|15012||"), None);
        assert_eq!(from_virtual_host("allow_any"), None);
        assert_eq!(from_virtual_host(":15012"), None);
    }

    #[tokio::test]
    async fn admin_client_fetches_config_dump() {
        let dump = json!({"configs": [clusters(&[
            "outbound|15012||istiod.istio-system.svc.cluster.local"
        ])]});
        let addr = testing::serve(&[("/config_dump", dump.to_string())]).await;

        let client =
            EnvoyAdminClient::new(&format!("http://{addr}/"), Duration::from_secs(2)).unwrap();
        let fetched = client.config_dump().await.unwrap();

        assert_eq!(fetched, dump);
    }
}
