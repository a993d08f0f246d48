//! `networking.istio.io/v1alpha3` resources.

use std::collections::BTreeMap;

use kube::CustomResource;
use serde::{Deserialize, Serialize};

/// Client-side TLS mode of a destination rule.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum ClientTlsMode {
    /// Disable.
    Disable = 0,
    /// Server-authenticated TLS.
    Simple = 1,
    /// Mutual TLS with supplied certificates.
    Mutual = 2,
    /// Mutual TLS with mesh-issued certificates.
    IstioMutual = 3,
}

named_enum!(client_tls_mode => ClientTlsMode {
    Disable = "DISABLE",
    Simple = "SIMPLE",
    Mutual = "MUTUAL",
    IstioMutual = "ISTIO_MUTUAL",
});

/// Server-side TLS mode of a gateway server.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum ServerTlsMode {
    /// Forwards by SNI without terminating.
    Passthrough = 0,
    /// Server-authenticated TLS.
    Simple = 1,
    /// Requires client certificates.
    Mutual = 2,
    /// Passthrough with SNI-derived routing.
    AutoPassthrough = 3,
    /// Mutual TLS with mesh-issued certificates.
    IstioMutual = 4,
    /// Client certificates requested but optional.
    OptionalMutual = 5,
}

named_enum!(server_tls_mode => ServerTlsMode {
    Passthrough = "PASSTHROUGH",
    Simple = "SIMPLE",
    Mutual = "MUTUAL",
    AutoPassthrough = "AUTO_PASSTHROUGH",
    IstioMutual = "ISTIO_MUTUAL",
    OptionalMutual = "OPTIONAL_MUTUAL",
});

/// Traffic policy applied to a destination.
#[derive(CustomResource, Clone, PartialEq, prost::Message, Serialize, Deserialize)]
#[kube(
    group = "networking.istio.io",
    version = "v1alpha3",
    kind = "DestinationRule",
    namespaced,
    schema = "disabled",
    derive = "Default",
    derive = "PartialEq"
)]
#[serde(default, rename_all = "camelCase")]
pub struct DestinationRuleSpec {
    /// Service the rule applies to.
    #[prost(string, tag = "1")]
    pub host: String,
    /// Default policy for all subsets.
    #[prost(message, optional, tag = "2")]
    pub traffic_policy: Option<TrafficPolicy>,
    /// Named versions of the service.
    #[prost(message, repeated, tag = "3")]
    pub subsets: Vec<Subset>,
    /// Namespaces the rule is visible to.
    #[prost(string, repeated, tag = "4")]
    pub export_to: Vec<String>,
}

/// Traffic settings for a destination or subset.
#[derive(Clone, PartialEq, Eq, prost::Message, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TrafficPolicy {
    /// TLS towards the upstream.
    #[prost(message, optional, tag = "4")]
    pub tls: Option<ClientTlsSettings>,
}

/// TLS settings for upstream connections.
#[derive(Clone, PartialEq, Eq, prost::Message, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ClientTlsSettings {
    /// A [`ClientTlsMode`].
    #[prost(enumeration = "ClientTlsMode", tag = "1")]
    #[serde(with = "client_tls_mode")]
    pub mode: i32,
    /// Client certificate path.
    #[prost(string, tag = "2")]
    pub client_certificate: String,
    /// Client key path.
    #[prost(string, tag = "3")]
    pub private_key: String,
    /// CA bundle path.
    #[prost(string, tag = "4")]
    pub ca_certificates: String,
    /// Accepted server identities.
    #[prost(string, repeated, tag = "5")]
    pub subject_alt_names: Vec<String>,
    /// SNI to present.
    #[prost(string, tag = "6")]
    pub sni: String,
    /// Secret holding the certificates.
    #[prost(string, tag = "7")]
    pub credential_name: String,
}

/// A named subset of a service's endpoints.
#[derive(Clone, PartialEq, Eq, prost::Message, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Subset {
    /// Subset name, referenced by routes.
    #[prost(string, tag = "1")]
    pub name: String,
    /// Pod labels selecting the subset.
    #[prost(btree_map = "string, string", tag = "2")]
    pub labels: BTreeMap<String, String>,
    /// Overrides the rule-level policy.
    #[prost(message, optional, tag = "3")]
    pub traffic_policy: Option<TrafficPolicy>,
}

/// Load balancer at the edge of the mesh.
#[derive(CustomResource, Clone, PartialEq, prost::Message, Serialize, Deserialize)]
#[kube(
    group = "networking.istio.io",
    version = "v1alpha3",
    kind = "Gateway",
    namespaced,
    schema = "disabled",
    derive = "Default",
    derive = "PartialEq"
)]
#[serde(default, rename_all = "camelCase")]
pub struct GatewaySpec {
    /// Listeners.
    #[prost(message, repeated, tag = "1")]
    pub servers: Vec<Server>,
    /// Gateway pods this applies to.
    #[prost(btree_map = "string, string", tag = "2")]
    pub selector: BTreeMap<String, String>,
}

/// A gateway listener.
#[derive(Clone, PartialEq, Eq, prost::Message, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Server {
    /// Listening port.
    #[prost(message, optional, tag = "1")]
    pub port: Option<ServerPort>,
    /// Hosts exposed, `namespace/host` or `host`.
    #[prost(string, repeated, tag = "2")]
    pub hosts: Vec<String>,
    /// TLS settings for the listener.
    #[prost(message, optional, tag = "3")]
    pub tls: Option<ServerTlsSettings>,
    /// Bind address.
    #[prost(string, tag = "4")]
    pub bind: String,
    /// Listener name.
    #[prost(string, tag = "6")]
    pub name: String,
}

/// Port a gateway listens on.
#[derive(Clone, PartialEq, Eq, prost::Message, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ServerPort {
    /// Port number.
    #[prost(uint32, tag = "1")]
    pub number: u32,
    /// Protocol name, e.g. `HTTPS`.
    #[prost(string, tag = "2")]
    pub protocol: String,
    /// Port name.
    #[prost(string, tag = "3")]
    pub name: String,
}

/// TLS settings for a gateway listener.
#[derive(Clone, PartialEq, Eq, prost::Message, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ServerTlsSettings {
    /// Redirect plaintext to HTTPS.
    #[prost(bool, tag = "1")]
    pub https_redirect: bool,
    /// A [`ServerTlsMode`].
    #[prost(enumeration = "ServerTlsMode", tag = "2")]
    #[serde(with = "server_tls_mode")]
    pub mode: i32,
    /// Secret holding the certificates.
    #[prost(string, tag = "10")]
    pub credential_name: String,
}

/// Routing rules for a set of hosts.
#[derive(CustomResource, Clone, PartialEq, prost::Message, Serialize, Deserialize)]
#[kube(
    group = "networking.istio.io",
    version = "v1alpha3",
    kind = "VirtualService",
    namespaced,
    schema = "disabled",
    derive = "Default",
    derive = "PartialEq"
)]
#[serde(default, rename_all = "camelCase")]
pub struct VirtualServiceSpec {
    /// Destination hosts.
    #[prost(string, repeated, tag = "1")]
    pub hosts: Vec<String>,
    /// Gateways and sidecars the routes apply to.
    #[prost(string, repeated, tag = "2")]
    pub gateways: Vec<String>,
    /// HTTP routes in match order.
    #[prost(message, repeated, tag = "3")]
    pub http: Vec<HttpRoute>,
    /// Namespaces the service is visible to.
    #[prost(string, repeated, tag = "6")]
    pub export_to: Vec<String>,
}

/// An HTTP route.
#[derive(Clone, PartialEq, Eq, prost::Message, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct HttpRoute {
    /// Weighted destinations.
    #[prost(message, repeated, tag = "2")]
    pub route: Vec<HttpRouteDestination>,
    /// Route name, used in logs.
    #[prost(string, tag = "17")]
    pub name: String,
}

/// A weighted route destination.
#[derive(Clone, PartialEq, Eq, prost::Message, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct HttpRouteDestination {
    /// Where to send the traffic.
    #[prost(message, optional, tag = "1")]
    pub destination: Option<Destination>,
    /// Share of traffic, in percent.
    #[prost(int32, tag = "2")]
    pub weight: i32,
}

/// Upstream service of a route.
#[derive(Clone, PartialEq, Eq, prost::Message, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Destination {
    /// Service host.
    #[prost(string, tag = "1")]
    pub host: String,
    /// Subset of a destination rule.
    #[prost(string, tag = "2")]
    pub subset: String,
    /// Port on the host; required when it exposes several.
    #[prost(message, optional, tag = "3")]
    pub port: Option<PortSelector>,
}

/// Port of a destination.
#[derive(Clone, PartialEq, Eq, prost::Message, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PortSelector {
    /// Port number.
    #[prost(uint32, tag = "1")]
    pub number: u32,
}
