//! Aggregated discovery client.
//!
//! The client owns a single bidirectional `StreamAggregatedResources` stream
//! and uses it for one-shot exchanges: each call sends a wildcard request for
//! one kind and reads exactly one response. It does not acknowledge versions
//! or track nonces, so it yields a point-in-time view and is not meant for
//! long-lived subscriptions.
//!
//! # States
//!
//! ```text
//! connect() ──> Connected ──first exchange──> Streaming ──close()──> Closed
//! ```
//!
//! The stream is opened lazily on the first exchange, after the first request
//! is queued, because some servers hold back response headers until they have
//! a message to send.

use std::time::Duration;

use futures::StreamExt;
use futures::stream::BoxStream;
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tonic::transport::{Channel, ClientTlsConfig};

use crate::catalog::{Catalog, KindEntry, MeshObject};
use crate::config::DiscoveryConfig;
use crate::dial::dial;
use crate::error::{Error, Result};
use crate::proto::{self, DiscoveryRequest, DiscoveryResponse};

/// Type URL used to learn the control plane's version. Its resources are
/// ignored.
pub const VERSION_TYPE_URL: &str = "istio.io/debug/syncz";

/// Settings for an [`AdsClient`].
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// Node identity sent with each request.
    pub node_id: String,
    /// Deadline for establishing the connection.
    pub dial_timeout: Duration,
    /// Deadline for each request/response exchange.
    pub request_timeout: Duration,
    /// TLS settings, if the endpoint requires TLS.
    pub tls: Option<ClientTlsConfig>,
}

impl From<&DiscoveryConfig> for ClientConfig {
    fn from(config: &DiscoveryConfig) -> Self {
        Self {
            node_id: config.node_id.clone(),
            dial_timeout: config.dial_timeout,
            request_timeout: config.request_timeout,
            tls: config.tls.clone(),
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        (&DiscoveryConfig::default()).into()
    }
}

type Responses = BoxStream<'static, Result<DiscoveryResponse, tonic::Status>>;

enum Stream {
    /// Connected, stream not opened yet.
    Idle {
        channel: Channel,
        outbound: mpsc::Receiver<DiscoveryRequest>,
    },
    Open(Responses),
    Closed,
}

/// A client for the aggregated discovery stream of one control plane.
///
/// A client is not shareable: requests and responses are paired by order, so
/// callers wanting concurrent fetches need separate clients.
pub struct AdsClient {
    address: String,
    config: ClientConfig,
    catalog: Catalog,
    requests: Option<mpsc::Sender<DiscoveryRequest>>,
    stream: Stream,
}

impl std::fmt::Debug for AdsClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdsClient")
            .field("address", &self.address)
            .field("open", &self.requests.is_some())
            .finish_non_exhaustive()
    }
}

impl AdsClient {
    /// Connects to the control plane at `address` (`host:port`).
    ///
    /// # Errors
    ///
    /// Returns a connectivity error if the dial does not complete within
    /// the configured deadline.
    pub async fn connect(address: &str, config: ClientConfig) -> Result<Self> {
        let channel = dial(address, config.tls.clone(), config.dial_timeout).await?;
        let (tx, rx) = mpsc::channel(4);

        tracing::debug!("connected to discovery service at {address}");
        Ok(Self {
            address: address.to_string(),
            config,
            catalog: Catalog::mesh(),
            requests: Some(tx),
            stream: Stream::Idle {
                channel,
                outbound: rx,
            },
        })
    }

    /// Builds a client over an already-open request sink and response stream.
    #[cfg(test)]
    pub(crate) fn from_parts(
        address: &str,
        config: ClientConfig,
        requests: mpsc::Sender<DiscoveryRequest>,
        responses: Responses,
    ) -> Self {
        Self {
            address: address.to_string(),
            config,
            catalog: Catalog::mesh(),
            requests: Some(requests),
            stream: Stream::Open(responses),
        }
    }

    /// Replaces the kind catalog.
    #[must_use]
    pub fn with_catalog(mut self, catalog: Catalog) -> Self {
        self.catalog = catalog;
        self
    }

    /// Address this client is connected to.
    #[must_use]
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Fetches the control plane's build version.
    ///
    /// # Errors
    ///
    /// Fails if the exchange fails or the control-plane identifier is absent
    /// or not valid JSON.
    pub async fn version(&mut self) -> Result<String> {
        let response = self.exchange(VERSION_TYPE_URL).await?;
        let identifier = response
            .control_plane
            .map(|cp| cp.identifier)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| Error::Protocol("response has no control-plane identifier".into()))?;

        parse_version(&identifier)
    }

    /// Fetches every object of one kind.
    ///
    /// # Errors
    ///
    /// Fails on transport errors, a type URL mismatch, or any object that
    /// does not decode.
    pub async fn fetch(&mut self, kind: &KindEntry) -> Result<Vec<MeshObject>> {
        let response = self.exchange(kind.type_url()).await?;
        decode_response(kind, response)
    }

    /// Fetches every object of the kind registered under `type_url`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnregisteredKind`] if the catalog has no such kind,
    /// otherwise as [`fetch`](Self::fetch).
    pub async fn fetch_type_url(&mut self, type_url: &str) -> Result<Vec<MeshObject>> {
        let kind = self
            .catalog
            .by_type_url(type_url)
            .cloned()
            .ok_or_else(|| Error::UnregisteredKind(type_url.to_string()))?;
        self.fetch(&kind).await
    }

    /// Fetches every kind in the catalog, in catalog order.
    ///
    /// # Errors
    ///
    /// Fails as a whole if any single kind fails; no partial result is
    /// returned.
    pub async fn resources(&mut self) -> Result<Vec<MeshObject>> {
        let kinds = self.catalog.kinds().to_vec();
        let mut objects = Vec::new();

        for kind in &kinds {
            let fetched = self.fetch(kind).await.map_err(|source| Error::Fetch {
                kind: kind.type_url().to_string(),
                source: Box::new(source),
            })?;

            tracing::debug!("fetched {} {} objects", fetched.len(), kind.gvk().kind);
            objects.extend(fetched);
        }

        Ok(objects)
    }

    /// Tears down the stream. Calling it again has no effect.
    pub fn close(&mut self) {
        if self.requests.take().is_some() {
            tracing::debug!("closing discovery stream to {}", self.address);
        }

        self.stream = Stream::Closed;
    }

    /// Closes the client on any failure; a late response would otherwise be
    /// read as the answer to the next request.
    async fn exchange(&mut self, type_url: &str) -> Result<DiscoveryResponse> {
        let timeout = self.config.request_timeout;
        let result = match tokio::time::timeout(timeout, self.exchange_inner(type_url)).await {
            Ok(result) => result,
            Err(_) => Err(Error::RequestTimeout {
                type_url: type_url.to_string(),
                timeout,
            }),
        };

        if let Err(e) = &result {
            tracing::debug!("exchange with {} failed: {e}", self.address);
            self.close();
        }

        result
    }

    async fn exchange_inner(&mut self, type_url: &str) -> Result<DiscoveryResponse> {
        let requests = self.requests.as_ref().ok_or(Error::StreamClosed)?;
        let request = DiscoveryRequest::for_type(type_url, self.config.node_id.clone());
        requests
            .send(request)
            .await
            .map_err(|_| Error::StreamClosed)?;

        let responses = self.open().await?;
        let response = match responses.next().await {
            Some(response) => response?,
            None => return Err(Error::StreamClosed),
        };

        if response.type_url != type_url {
            return Err(Error::TypeUrlMismatch {
                requested: type_url.to_string(),
                received: response.type_url,
            });
        }

        Ok(response)
    }

    async fn open(&mut self) -> Result<&mut Responses> {
        let responses = match std::mem::replace(&mut self.stream, Stream::Closed) {
            Stream::Idle { channel, outbound } => {
                let mut grpc = tonic::client::Grpc::new(channel);
                grpc.ready().await.map_err(|e| {
                    tonic::Status::unavailable(format!("service was not ready: {e}"))
                })?;

                let codec =
                    tonic_prost::ProstCodec::<DiscoveryRequest, DiscoveryResponse>::default();
                let path = http::uri::PathAndQuery::from_static(proto::ADS_PATH);
                let response = grpc
                    .streaming(
                        tonic::Request::new(ReceiverStream::new(outbound)),
                        path,
                        codec,
                    )
                    .await?;

                response.into_inner().boxed()
            }
            Stream::Open(responses) => responses,
            Stream::Closed => return Err(Error::StreamClosed),
        };

        self.stream = Stream::Open(responses);
        let Stream::Open(responses) = &mut self.stream else {
            return Err(Error::StreamClosed);
        };
        Ok(responses)
    }
}

fn decode_response(kind: &KindEntry, response: DiscoveryResponse) -> Result<Vec<MeshObject>> {
    let mut objects = Vec::with_capacity(response.resources.len());
    for any in response.resources {
        let envelope = <proto::Resource as prost::Message>::decode(any.value.as_slice())
            .map_err(|source| Error::Decode {
                kind: kind.type_url().to_string(),
                source,
            })?;
        objects.push(kind.decode_envelope(envelope)?);
    }

    Ok(objects)
}

#[derive(Deserialize)]
struct ControlPlaneIdentity {
    #[serde(rename = "Info")]
    info: BuildInfo,
}

#[derive(Deserialize)]
struct BuildInfo {
    version: String,
}

fn parse_version(identifier: &str) -> Result<String> {
    let identity: ControlPlaneIdentity = serde_json::from_str(identifier)
        .map_err(|e| Error::json("control-plane identifier", e))?;
    Ok(identity.info.version)
}

#[cfg(test)]
mod tests {
    use prost::Message;

    use super::*;
    use crate::istio::security::{MtlsMode, MutualTls, PeerAuthenticationSpec};

    const IDENTITY: &str =
        r#"{"Component":"istiod","ID":"istiod-5d8c7f9b4-x2x9q","Info":{"version":"1.19.3","revision":"abc","status":"Clean"}}"#;

    /// Serves canned responses: for each request, `respond` builds the reply.
    fn fake_control_plane<F>(respond: F) -> AdsClient
    where
        F: Fn(&DiscoveryRequest) -> Result<DiscoveryResponse, tonic::Status> + Send + 'static,
    {
        let (req_tx, mut req_rx) = mpsc::channel::<DiscoveryRequest>(4);
        let (rsp_tx, rsp_rx) = mpsc::channel(4);

        tokio::spawn(async move {
            while let Some(request) = req_rx.recv().await {
                if rsp_tx.send(respond(&request)).await.is_err() {
                    break;
                }
            }
        });

        let config = ClientConfig {
            request_timeout: Duration::from_secs(2),
            ..Default::default()
        };
        AdsClient::from_parts(
            "fake:15010",
            config,
            req_tx,
            ReceiverStream::new(rsp_rx).boxed(),
        )
    }

    fn envelope(name: &str, spec: &impl Message) -> prost_types::Any {
        let resource = proto::Resource {
            metadata: Some(proto::Metadata {
                name: name.to_string(),
                ..Default::default()
            }),
            body: Some(prost_types::Any {
                type_url: String::new(),
                value: spec.encode_to_vec(),
            }),
        };

        prost_types::Any {
            type_url: "type.googleapis.com/istio.mcp.v1alpha1.Resource".to_string(),
            value: resource.encode_to_vec(),
        }
    }

    fn strict() -> PeerAuthenticationSpec {
        PeerAuthenticationSpec {
            mtls: Some(MutualTls {
                mode: MtlsMode::Strict.into(),
            }),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn fetch_decodes_envelopes() {
        let mut client = fake_control_plane(|request| {
            Ok(DiscoveryResponse {
                type_url: request.type_url.clone(),
                resources: vec![envelope("default/policy-a", &strict())],
                ..Default::default()
            })
        });

        let catalog = Catalog::mesh();
        let kind = catalog
            .by_type_url("security.istio.io/v1beta1/PeerAuthentication")
            .unwrap();
        let objects = client.fetch(kind).await.unwrap();

        assert_eq!(objects.len(), 1);
        let MeshObject::PeerAuthentication(policy) = &objects[0] else {
            panic!("unexpected kind");
        };
        assert_eq!(policy.metadata.namespace.as_deref(), Some("default"));
        assert_eq!(policy.metadata.name.as_deref(), Some("policy-a"));
        assert_eq!(policy.spec, strict());
    }

    #[tokio::test]
    async fn mismatched_type_url_is_rejected() {
        let mut client = fake_control_plane(|_| {
            Ok(DiscoveryResponse {
                type_url: "networking.istio.io/v1alpha3/Gateway".to_string(),
                resources: vec![envelope("default/policy-a", &strict())],
                ..Default::default()
            })
        });

        let catalog = Catalog::mesh();
        let kind = catalog
            .by_type_url("security.istio.io/v1beta1/PeerAuthentication")
            .unwrap();
        let err = client.fetch(kind).await.unwrap_err();

        assert!(matches!(err, Error::TypeUrlMismatch { .. }), "{err}");
    }

    #[tokio::test]
    async fn resources_requests_every_kind_in_order() {
        let mut client = fake_control_plane(|request| {
            Ok(DiscoveryResponse {
                type_url: request.type_url.clone(),
                ..Default::default()
            })
        });

        let objects = client.resources().await.unwrap();
        assert!(objects.is_empty());
    }

    #[tokio::test]
    async fn resources_fails_if_any_kind_fails() {
        let mut client = fake_control_plane(|request| {
            if request.type_url.ends_with("/Gateway") {
                return Err(tonic::Status::permission_denied("nope"));
            }

            Ok(DiscoveryResponse {
                type_url: request.type_url.clone(),
                ..Default::default()
            })
        });

        let err = client.resources().await.unwrap_err();
        let Error::Fetch { kind, source } = err else {
            panic!("unexpected error");
        };
        assert_eq!(kind, "networking.istio.io/v1alpha3/Gateway");
        assert!(matches!(*source, Error::Status(_)));
    }

    #[tokio::test]
    async fn malformed_name_fails_the_fetch() {
        let mut client = fake_control_plane(|request| {
            Ok(DiscoveryResponse {
                type_url: request.type_url.clone(),
                resources: vec![envelope("no-namespace", &strict())],
                ..Default::default()
            })
        });

        let catalog = Catalog::mesh();
        let kind = catalog
            .by_type_url("security.istio.io/v1beta1/PeerAuthentication")
            .unwrap();
        let err = client.fetch(kind).await.unwrap_err();

        assert!(matches!(err, Error::MalformedName(_)), "{err}");
    }

    #[tokio::test]
    async fn unregistered_kind_is_not_requested() {
        let mut client = fake_control_plane(|_| panic!("no request expected"));
        let err = client
            .fetch_type_url("networking.istio.io/v1alpha3/Sidecar")
            .await
            .unwrap_err();

        assert!(matches!(err, Error::UnregisteredKind(_)));
    }

    #[tokio::test]
    async fn fetch_by_type_url() {
        let mut client = fake_control_plane(|request| {
            Ok(DiscoveryResponse {
                type_url: request.type_url.clone(),
                resources: vec![envelope("/billing", &crate::istio::NamespaceSpec::default())],
                ..Default::default()
            })
        });

        let objects = client.fetch_type_url("core/v1/Namespace").await.unwrap();
        assert!(matches!(objects.as_slice(), [MeshObject::Namespace(_)]));
    }

    #[tokio::test]
    async fn version_parses_control_plane_identifier() {
        let mut client = fake_control_plane(|request| {
            assert_eq!(request.type_url, VERSION_TYPE_URL);
            Ok(DiscoveryResponse {
                type_url: request.type_url.clone(),
                control_plane: Some(proto::ControlPlane {
                    identifier: IDENTITY.to_string(),
                }),
                ..Default::default()
            })
        });

        assert_eq!(client.version().await.unwrap(), "1.19.3");
    }

    #[tokio::test]
    async fn version_requires_identifier() {
        let mut client = fake_control_plane(|request| {
            Ok(DiscoveryResponse {
                type_url: request.type_url.clone(),
                ..Default::default()
            })
        });

        assert!(matches!(client.version().await, Err(Error::Protocol(_))));
    }

    #[tokio::test]
    async fn closed_client_refuses_requests() {
        let mut client = fake_control_plane(|request| {
            Ok(DiscoveryResponse {
                type_url: request.type_url.clone(),
                ..Default::default()
            })
        });

        client.close();
        client.close();

        assert!(matches!(client.version().await, Err(Error::StreamClosed)));
    }

    #[tokio::test]
    async fn silent_server_times_out() {
        let (req_tx, _req_rx) = mpsc::channel::<DiscoveryRequest>(4);
        let (_rsp_tx, rsp_rx) = mpsc::channel(1);
        let config = ClientConfig {
            request_timeout: Duration::from_millis(50),
            ..Default::default()
        };
        let mut client = AdsClient::from_parts(
            "fake:15010",
            config,
            req_tx,
            ReceiverStream::new(rsp_rx).boxed(),
        );

        let err = client.version().await.unwrap_err();
        assert!(matches!(err, Error::RequestTimeout { .. }), "{err}");
        assert!(err.is_connectivity());
    }

    #[tokio::test]
    async fn late_response_is_not_paired_with_next_request() {
        let (req_tx, mut req_rx) = mpsc::channel::<DiscoveryRequest>(4);
        let (rsp_tx, rsp_rx) = mpsc::channel(4);

        tokio::spawn(async move {
            while let Some(request) = req_rx.recv().await {
                tokio::time::sleep(Duration::from_millis(200)).await;
                let response = DiscoveryResponse {
                    type_url: request.type_url.clone(),
                    ..Default::default()
                };
                if rsp_tx.send(Ok(response)).await.is_err() {
                    break;
                }
            }
        });

        let config = ClientConfig {
            request_timeout: Duration::from_millis(100),
            ..Default::default()
        };
        let mut client = AdsClient::from_parts(
            "fake:15010",
            config,
            req_tx,
            ReceiverStream::new(rsp_rx).boxed(),
        );

        let err = client.fetch_type_url("core/v1/Namespace").await.unwrap_err();
        assert!(matches!(err, Error::RequestTimeout { .. }), "{err}");

        tokio::time::sleep(Duration::from_millis(200)).await;
        let err = client
            .fetch_type_url("networking.istio.io/v1alpha3/Gateway")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::StreamClosed), "{err}");
    }

    #[tokio::test]
    async fn mismatch_closes_the_client() {
        let mut client = fake_control_plane(|_| {
            Ok(DiscoveryResponse {
                type_url: "core/v1/Namespace".to_string(),
                ..Default::default()
            })
        });

        let err = client.version().await.unwrap_err();
        assert!(matches!(err, Error::TypeUrlMismatch { .. }), "{err}");
        assert!(matches!(client.version().await, Err(Error::StreamClosed)));
    }

    #[test]
    fn parse_version_rejects_garbage() {
        assert!(parse_version("not json").is_err());
        assert_eq!(parse_version(IDENTITY).unwrap(), "1.19.3");
    }
}
