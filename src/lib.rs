#![deny(missing_docs)]
#![deny(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

//! Service-mesh control-plane discovery and configuration audit.
//!
//! Locating a mesh control plane from inside a cluster usually needs nothing
//! more than its conventional service name, but that name is not always
//! resolvable from where an audit runs. This crate tries a fixed chain of
//! strategies until one yields a reachable control plane, pulls the live
//! configuration over the aggregated discovery stream (or the debug endpoint),
//! and runs rule checkers over the resulting snapshot.
//!
//! # Features
//!
//! - **Fallback discovery**: well-known service name, kubelet subnet sweep and
//!   local sidecar bootstrap, tried in order with every failure reported
//! - **Bounded dials**: unreachable or TLS-hostile endpoints fail fast
//! - **Typed configuration**: MCP envelopes decoded into Kubernetes-style
//!   objects through a kind registry
//! - **Pluggable auditors**: mTLS enforcement, authorization-policy polarity
//!   and known CVEs out of the box
//!
//! # Usage
//!
//! ```ignore
//! use meshprobe::audit::{AuditContext, AuditorRegistry};
//! use meshprobe::{DiscoveryConfig, discover, snapshot};
//!
//! let config = DiscoveryConfig::new();
//! let mut state = discover(&config).await?;
//! let snapshot = snapshot(&mut state, &config).await?;
//!
//! let report = AuditorRegistry::standard().run(&AuditContext {
//!     snapshot: &snapshot,
//!     namespace: state.namespace.as_deref().unwrap_or(&config.namespace),
//!     version: state.version.as_deref(),
//! });
//! for finding in &report.findings {
//!     println!("{finding}");
//! }
//! ```

mod ads;
pub mod audit;
mod bootstrap;
mod catalog;
mod config;
mod configz;
mod dial;
mod discovery;
mod error;
pub mod istio;
mod kubelet;
pub mod proto;
mod scan;
mod snapshot;
pub mod strategy;
#[cfg(test)]
mod testing;

pub use ads::{AdsClient, ClientConfig, VERSION_TYPE_URL};
pub use bootstrap::{EnvoyAdminClient, discovery_address};
pub use catalog::{Catalog, DecodedResource, KindEntry, MeshKind, MeshObject, type_url};
pub use config::{
    DEBUG_PORT, DEFAULT_NAMESPACE, DEFAULT_SERVICE_NAME, DISCOVERY_PORT, DISCOVERY_TLS_PORT,
    DiscoveryConfig, ENVOY_ADMIN_URL, KUBELET_READ_ONLY_PORT, NODE_ID,
};
pub use configz::DebugClient;
pub use dial::dial;
pub use discovery::{control_plane_chain, discover, namespace_chain, snapshot};
pub use error::{Attempt, Error, Result};
pub use kubelet::{ControlPlanePod, KubeletClient, PodFilter, Port};
pub use scan::{
    DEFAULT_CONCURRENCY, MAX_FD_ATTEMPTS, Protocol, ScanJob, join_host_port, scan, subnet_hosts,
};
pub use snapshot::ResourceSnapshot;
