//! `security.istio.io/v1beta1` resources.

use std::collections::BTreeMap;

use kube::CustomResource;
use serde::{Deserialize, Serialize};

use super::WorkloadSelector;

/// Peer authentication mode.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum MtlsMode {
    /// Inherits from the parent scope.
    Unset = 0,
    /// Plaintext only.
    Disable = 1,
    /// Accepts both plaintext and mutual TLS.
    Permissive = 2,
    /// Mutual TLS only.
    Strict = 3,
}

named_enum!(mtls_mode => MtlsMode {
    Unset = "UNSET",
    Disable = "DISABLE",
    Permissive = "PERMISSIVE",
    Strict = "STRICT",
});

/// Action taken when an authorization policy matches.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum Action {
    /// Allows matching requests.
    Allow = 0,
    /// Denies matching requests.
    Deny = 1,
    /// Audits matching requests without enforcing.
    Audit = 2,
    /// Delegates to an external authorizer.
    Custom = 3,
}

named_enum!(action => Action {
    Allow = "ALLOW",
    Deny = "DENY",
    Audit = "AUDIT",
    Custom = "CUSTOM",
});

/// Mutual TLS settings.
#[derive(Clone, PartialEq, Eq, prost::Message, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MutualTls {
    /// A [`MtlsMode`].
    #[prost(enumeration = "MtlsMode", tag = "1")]
    #[serde(with = "mtls_mode")]
    pub mode: i32,
}

/// Peer authentication policy for workloads.
#[derive(CustomResource, Clone, PartialEq, prost::Message, Serialize, Deserialize)]
#[kube(
    group = "security.istio.io",
    version = "v1beta1",
    kind = "PeerAuthentication",
    namespaced,
    schema = "disabled",
    derive = "Default",
    derive = "PartialEq"
)]
#[serde(default, rename_all = "camelCase")]
pub struct PeerAuthenticationSpec {
    /// Workloads the policy applies to; all in the namespace when absent.
    #[prost(message, optional, tag = "1")]
    pub selector: Option<WorkloadSelector>,
    /// Mode for every port.
    #[prost(message, optional, tag = "2")]
    pub mtls: Option<MutualTls>,
    /// Per-port overrides.
    #[prost(btree_map = "uint32, message", tag = "3")]
    pub port_level_mtls: BTreeMap<u32, MutualTls>,
}

impl PeerAuthenticationSpec {
    /// Effective mode of the policy, ignoring port-level overrides.
    #[must_use]
    pub fn mode(&self) -> MtlsMode {
        self.mtls.as_ref().map_or(MtlsMode::Unset, MutualTls::mode)
    }

    /// Whether the policy applies to every workload in its namespace.
    #[must_use]
    pub fn is_namespace_wide(&self) -> bool {
        self.selector
            .as_ref()
            .is_none_or(|selector| selector.match_labels.is_empty())
    }
}

/// Authorization policy.
#[derive(CustomResource, Clone, PartialEq, prost::Message, Serialize, Deserialize)]
#[kube(
    group = "security.istio.io",
    version = "v1beta1",
    kind = "AuthorizationPolicy",
    namespaced,
    schema = "disabled",
    derive = "Default",
    derive = "PartialEq"
)]
#[serde(default, rename_all = "camelCase")]
pub struct AuthorizationPolicySpec {
    /// Workloads the policy applies to; all in the namespace when absent.
    #[prost(message, optional, tag = "1")]
    pub selector: Option<WorkloadSelector>,
    /// Rules, any of which matches.
    #[prost(message, repeated, tag = "2")]
    pub rules: Vec<Rule>,
    /// An [`Action`].
    #[prost(enumeration = "Action", tag = "3")]
    #[serde(with = "action")]
    pub action: i32,
}

/// A single authorization rule.
#[derive(Clone, PartialEq, Eq, prost::Message, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Rule {
    /// Source clauses.
    #[prost(message, repeated, tag = "1")]
    pub from: Vec<RuleFrom>,
    /// Operation clauses.
    #[prost(message, repeated, tag = "2")]
    pub to: Vec<RuleTo>,
    /// Extra conditions.
    #[prost(message, repeated, tag = "3")]
    pub when: Vec<Condition>,
}

/// Request source clause.
#[derive(Clone, PartialEq, Eq, prost::Message, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RuleFrom {
    /// Who sent the request.
    #[prost(message, optional, tag = "1")]
    pub source: Option<Source>,
}

/// Request operation clause.
#[derive(Clone, PartialEq, Eq, prost::Message, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RuleTo {
    /// What the request does.
    #[prost(message, optional, tag = "1")]
    pub operation: Option<Operation>,
}

/// Request source matchers.
#[derive(Clone, PartialEq, Eq, prost::Message, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Source {
    /// Peer identities.
    #[prost(string, repeated, tag = "1")]
    pub principals: Vec<String>,
    /// Request identities (`iss/sub`).
    #[prost(string, repeated, tag = "2")]
    pub request_principals: Vec<String>,
    /// Peer namespaces.
    #[prost(string, repeated, tag = "3")]
    pub namespaces: Vec<String>,
    /// Peer IP blocks.
    #[prost(string, repeated, tag = "4")]
    pub ip_blocks: Vec<String>,
    /// Negated `principals`.
    #[prost(string, repeated, tag = "5")]
    pub not_principals: Vec<String>,
    /// Negated `request_principals`.
    #[prost(string, repeated, tag = "6")]
    pub not_request_principals: Vec<String>,
    /// Negated `namespaces`.
    #[prost(string, repeated, tag = "7")]
    pub not_namespaces: Vec<String>,
    /// Negated `ip_blocks`.
    #[prost(string, repeated, tag = "8")]
    pub not_ip_blocks: Vec<String>,
    /// Original client IP blocks.
    #[prost(string, repeated, tag = "9")]
    pub remote_ip_blocks: Vec<String>,
    /// Negated `remote_ip_blocks`.
    #[prost(string, repeated, tag = "10")]
    pub not_remote_ip_blocks: Vec<String>,
}

/// Request operation matchers.
#[derive(Clone, PartialEq, Eq, prost::Message, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Operation {
    /// Request hosts.
    #[prost(string, repeated, tag = "1")]
    pub hosts: Vec<String>,
    /// Destination ports.
    #[prost(string, repeated, tag = "2")]
    pub ports: Vec<String>,
    /// HTTP methods.
    #[prost(string, repeated, tag = "3")]
    pub methods: Vec<String>,
    /// Request paths.
    #[prost(string, repeated, tag = "4")]
    pub paths: Vec<String>,
    /// Negated `hosts`.
    #[prost(string, repeated, tag = "5")]
    pub not_hosts: Vec<String>,
    /// Negated `ports`.
    #[prost(string, repeated, tag = "6")]
    pub not_ports: Vec<String>,
    /// Negated `methods`.
    #[prost(string, repeated, tag = "7")]
    pub not_methods: Vec<String>,
    /// Negated `paths`.
    #[prost(string, repeated, tag = "8")]
    pub not_paths: Vec<String>,
}

/// Additional request condition.
#[derive(Clone, PartialEq, Eq, prost::Message, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Condition {
    /// Attribute name, e.g. `request.headers[x-token]`.
    #[prost(string, tag = "1")]
    pub key: String,
    /// Allowed values.
    #[prost(string, repeated, tag = "2")]
    pub values: Vec<String>,
    /// Excluded values.
    #[prost(string, repeated, tag = "3")]
    pub not_values: Vec<String>,
}

impl Source {
    /// Whether any negative matcher is set.
    #[must_use]
    pub fn has_negative_match(&self) -> bool {
        !(self.not_principals.is_empty()
            && self.not_request_principals.is_empty()
            && self.not_namespaces.is_empty()
            && self.not_ip_blocks.is_empty()
            && self.not_remote_ip_blocks.is_empty())
    }
}

impl Operation {
    /// Whether any negative matcher is set.
    #[must_use]
    pub fn has_negative_match(&self) -> bool {
        !(self.not_hosts.is_empty()
            && self.not_ports.is_empty()
            && self.not_methods.is_empty()
            && self.not_paths.is_empty())
    }
}
