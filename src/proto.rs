//! Wire messages for the aggregated discovery service and MCP envelopes.
//!
//! Only the fields this crate reads or writes are declared; `prost` skips
//! unknown fields when decoding.

use std::collections::HashMap;

/// Full gRPC path of the aggregated discovery stream.
pub const ADS_PATH: &str =
    "/envoy.service.discovery.v3.AggregatedDiscoveryService/StreamAggregatedResources";

/// `envoy.config.core.v3.Node`.
#[derive(Clone, PartialEq, prost::Message)]
pub struct Node {
    /// Opaque node identifier.
    #[prost(string, tag = "1")]
    pub id: String,
    /// Cluster the node belongs to.
    #[prost(string, tag = "2")]
    pub cluster: String,
}

/// `envoy.config.core.v3.ControlPlane`.
#[derive(Clone, PartialEq, prost::Message)]
pub struct ControlPlane {
    /// Identity of the serving control plane.
    #[prost(string, tag = "1")]
    pub identifier: String,
}

/// `envoy.service.discovery.v3.DiscoveryRequest`.
#[derive(Clone, PartialEq, prost::Message)]
pub struct DiscoveryRequest {
    /// Last accepted version; always empty here.
    #[prost(string, tag = "1")]
    pub version_info: String,
    /// Requesting node.
    #[prost(message, optional, tag = "2")]
    pub node: Option<Node>,
    /// Requested names; empty means everything.
    #[prost(string, repeated, tag = "3")]
    pub resource_names: Vec<String>,
    /// Kind being requested.
    #[prost(string, tag = "4")]
    pub type_url: String,
    /// Nonce of the response being acknowledged.
    #[prost(string, tag = "5")]
    pub response_nonce: String,
}

/// `envoy.service.discovery.v3.DiscoveryResponse`.
#[derive(Clone, PartialEq, prost::Message)]
pub struct DiscoveryResponse {
    /// Version of the served configuration.
    #[prost(string, tag = "1")]
    pub version_info: String,
    /// Envelope records.
    #[prost(message, repeated, tag = "2")]
    pub resources: Vec<prost_types::Any>,
    /// Kind being served.
    #[prost(string, tag = "4")]
    pub type_url: String,
    /// Response nonce.
    #[prost(string, tag = "5")]
    pub nonce: String,
    /// Serving control plane.
    #[prost(message, optional, tag = "6")]
    pub control_plane: Option<ControlPlane>,
}

/// `istio.mcp.v1alpha1.Metadata`.
#[derive(Clone, PartialEq, prost::Message)]
pub struct Metadata {
    /// Combined `namespace/name`.
    #[prost(string, tag = "1")]
    pub name: String,
    /// Version stamp of the object.
    #[prost(string, tag = "3")]
    pub version: String,
    /// Object labels.
    #[prost(map = "string, string", tag = "4")]
    pub labels: HashMap<String, String>,
    /// Object annotations.
    #[prost(map = "string, string", tag = "5")]
    pub annotations: HashMap<String, String>,
}

/// `istio.mcp.v1alpha1.Resource`: metadata plus an opaque body.
#[derive(Clone, PartialEq, prost::Message)]
pub struct Resource {
    /// Structural metadata.
    #[prost(message, optional, tag = "1")]
    pub metadata: Option<Metadata>,
    /// Serialized spec; its type depends on the requested kind.
    #[prost(message, optional, tag = "2")]
    pub body: Option<prost_types::Any>,
}

impl DiscoveryRequest {
    /// Builds a wildcard request for `type_url`.
    #[must_use]
    pub fn for_type(type_url: impl Into<String>, node_id: impl Into<String>) -> Self {
        Self {
            node: Some(Node {
                id: node_id.into(),
                cluster: String::new(),
            }),
            type_url: type_url.into(),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use prost::Message;

    use super::*;

    #[test]
    fn request_carries_node_and_type() {
        let request = DiscoveryRequest::for_type("networking.istio.io/v1alpha3/Gateway", "node-1");

        assert_eq!(request.type_url, "networking.istio.io/v1alpha3/Gateway");
        assert_eq!(request.node.as_ref().map(|n| n.id.as_str()), Some("node-1"));
        assert!(request.resource_names.is_empty());
        assert!(request.response_nonce.is_empty());
    }

    #[test]
    fn response_skips_unknown_fields() {
        // Field 3 (canary) is not declared; decoding must ignore it.
        let mut bytes = DiscoveryResponse {
            type_url: "core/v1/Namespace".to_string(),
            ..Default::default()
        }
        .encode_to_vec();
        bytes.extend_from_slice(&[0x18, 0x01]);

        let decoded = DiscoveryResponse::decode(bytes.as_slice()).unwrap();
        assert_eq!(decoded.type_url, "core/v1/Namespace");
    }
}
