//! Control-plane debug endpoint client.

use std::time::Duration;

use serde_json::Value;

use crate::catalog::{Catalog, MeshObject};
use crate::error::{Error, Result};

const CONFIGZ_PATH: &str = "/debug/configz";

/// Client for the control plane's `/debug/configz` endpoint, which dumps
/// every configuration object it holds as a JSON array.
#[derive(Clone, Debug)]
pub struct DebugClient {
    url: String,
    http: reqwest::Client,
}

impl DebugClient {
    /// Connects to the debug endpoint at `address` (`host:port`), checking it
    /// with a `HEAD` request.
    ///
    /// # Errors
    ///
    /// Fails if the endpoint is unreachable or answers with an error status.
    pub async fn new(address: &str, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(timeout)
            .timeout(timeout)
            .build()
            .map_err(|e| Error::http(address, e))?;
        let url = format!("http://{address}{CONFIGZ_PATH}");

        http.head(&url)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| Error::http(&url, e))?;

        tracing::debug!("debug endpoint at {address} is alive");
        Ok(Self { url, http })
    }

    /// Fetches and decodes every object, in the order served.
    ///
    /// Each element is decoded on its own from its `apiVersion` and `kind`.
    ///
    /// # Errors
    ///
    /// Fails on transport errors, a body that is not a JSON array, or any
    /// element that does not decode.
    pub async fn objects(&self, catalog: &Catalog) -> Result<Vec<MeshObject>> {
        let body = self
            .http
            .get(&self.url)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| Error::http(&self.url, e))?
            .bytes()
            .await
            .map_err(|e| Error::http(&self.url, e))?;

        let items: Vec<Value> =
            serde_json::from_slice(&body).map_err(|e| Error::json(CONFIGZ_PATH, e))?;
        tracing::debug!("configz returned {} objects", items.len());

        items
            .into_iter()
            .map(|item| catalog.decode_json(item))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::snapshot::ResourceSnapshot;
    use crate::testing;

    fn configz() -> String {
        json!([
            {"apiVersion": "v1", "kind": "Namespace", "metadata": {"name": "default"}},
            {
                "apiVersion": "security.istio.io/v1beta1",
                "kind": "PeerAuthentication",
                "metadata": {"name": "default", "namespace": "default"},
                "spec": {"mtls": {"mode": "STRICT"}}
            },
            {
                "apiVersion": "networking.istio.io/v1alpha3",
                "kind": "ServiceEntry",
                "metadata": {"name": "external", "namespace": "default"},
                "spec": {}
            }
        ])
        .to_string()
    }

    #[tokio::test]
    async fn objects_decode_by_embedded_type() {
        let addr = testing::serve(&[(CONFIGZ_PATH, configz())]).await;
        let client = DebugClient::new(&addr.to_string(), Duration::from_secs(2))
            .await
            .unwrap();

        let objects = client.objects(&Catalog::mesh()).await.unwrap();
        assert_eq!(objects.len(), 3);

        let snapshot = ResourceSnapshot::from_objects(objects);
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot.peer_authentications().len(), 1);
    }

    #[tokio::test]
    async fn non_array_body_is_rejected() {
        let addr = testing::serve(&[(CONFIGZ_PATH, "{}".to_string())]).await;
        let client = DebugClient::new(&addr.to_string(), Duration::from_secs(2))
            .await
            .unwrap();

        let err = client.objects(&Catalog::mesh()).await.unwrap_err();
        assert!(matches!(err, Error::Json { .. }));
    }

    #[tokio::test]
    async fn missing_endpoint_fails_construction() {
        let addr = testing::serve(&[]).await;
        assert!(DebugClient::new(&addr.to_string(), Duration::from_secs(2)).await.is_err());
    }
}
