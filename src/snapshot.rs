//! Aggregation of decoded objects into a typed snapshot.

use k8s_openapi::api::core::v1::Namespace;

use crate::catalog::MeshObject;
use crate::istio::networking::{DestinationRule, Gateway, VirtualService};
use crate::istio::security::{AuthorizationPolicy, PeerAuthentication};

/// Configuration objects retrieved in one discovery run, grouped by kind.
///
/// Objects keep their arrival order within each kind.
#[derive(Clone, Debug, Default)]
pub struct ResourceSnapshot {
    namespaces: Vec<Namespace>,
    peer_authentications: Vec<PeerAuthentication>,
    authorization_policies: Vec<AuthorizationPolicy>,
    destination_rules: Vec<DestinationRule>,
    gateways: Vec<Gateway>,
    virtual_services: Vec<VirtualService>,
}

impl ResourceSnapshot {
    /// Buckets objects by kind. Objects of unrecognized kinds are logged and
    /// skipped.
    pub fn from_objects(objects: impl IntoIterator<Item = MeshObject>) -> Self {
        let mut snapshot = Self::default();
        for object in objects {
            snapshot.push(object);
        }

        snapshot
    }

    fn push(&mut self, object: MeshObject) {
        match object {
            MeshObject::Namespace(o) => self.namespaces.push(o),
            MeshObject::PeerAuthentication(o) => self.peer_authentications.push(o),
            MeshObject::AuthorizationPolicy(o) => self.authorization_policies.push(o),
            MeshObject::DestinationRule(o) => self.destination_rules.push(o),
            MeshObject::Gateway(o) => self.gateways.push(o),
            MeshObject::VirtualService(o) => self.virtual_services.push(o),
            MeshObject::Unrecognized(o) => {
                let kind = o.types.as_ref().map_or("<unknown>", |t| t.kind.as_str());
                tracing::warn!(
                    "skipping object {}/{} of unrecognized kind {kind}",
                    o.metadata.namespace.as_deref().unwrap_or_default(),
                    o.metadata.name.as_deref().unwrap_or_default()
                );
            }
        }
    }

    /// Namespaces.
    #[must_use]
    pub fn namespaces(&self) -> &[Namespace] {
        &self.namespaces
    }

    /// Peer authentication policies.
    #[must_use]
    pub fn peer_authentications(&self) -> &[PeerAuthentication] {
        &self.peer_authentications
    }

    /// Authorization policies.
    #[must_use]
    pub fn authorization_policies(&self) -> &[AuthorizationPolicy] {
        &self.authorization_policies
    }

    /// Destination rules.
    #[must_use]
    pub fn destination_rules(&self) -> &[DestinationRule] {
        &self.destination_rules
    }

    /// Gateways.
    #[must_use]
    pub fn gateways(&self) -> &[Gateway] {
        &self.gateways
    }

    /// Virtual services.
    #[must_use]
    pub fn virtual_services(&self) -> &[VirtualService] {
        &self.virtual_services
    }

    /// Total number of objects.
    #[must_use]
    pub fn len(&self) -> usize {
        self.namespaces.len()
            + self.peer_authentications.len()
            + self.authorization_policies.len()
            + self.destination_rules.len()
            + self.gateways.len()
            + self.virtual_services.len()
    }

    /// Whether the snapshot holds no objects.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl FromIterator<MeshObject> for ResourceSnapshot {
    fn from_iter<I: IntoIterator<Item = MeshObject>>(iter: I) -> Self {
        Self::from_objects(iter)
    }
}

#[cfg(test)]
mod tests {
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use kube::core::{DynamicObject, TypeMeta};

    use super::*;
    use crate::istio::networking::{GatewaySpec, VirtualServiceSpec};

    fn namespace(name: &str) -> MeshObject {
        MeshObject::Namespace(Namespace {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            ..Default::default()
        })
    }

    fn unrecognized(kind: &str) -> MeshObject {
        let mut object = DynamicObject {
            types: Some(TypeMeta {
                api_version: "networking.istio.io/v1alpha3".to_string(),
                kind: kind.to_string(),
            }),
            metadata: ObjectMeta::default(),
            data: serde_json::Value::Null,
        };
        object.metadata.name = Some("external".to_string());
        MeshObject::Unrecognized(object)
    }

    #[test]
    fn unrecognized_kind_is_dropped() {
        let objects = vec![
            namespace("default"),
            unrecognized("ServiceEntry"),
            MeshObject::Gateway(Gateway::new("ingress", GatewaySpec::default())),
            MeshObject::VirtualService(VirtualService::new(
                "reviews",
                VirtualServiceSpec::default(),
            )),
        ];

        let snapshot = ResourceSnapshot::from_objects(objects);

        assert_eq!(snapshot.len(), 3);
        assert_eq!(snapshot.namespaces().len(), 1);
        assert_eq!(snapshot.gateways().len(), 1);
        assert_eq!(snapshot.virtual_services().len(), 1);
    }

    #[test]
    fn arrival_order_is_kept() {
        let snapshot: ResourceSnapshot = ["default", "billing", "payments"]
            .into_iter()
            .map(namespace)
            .collect();

        let names: Vec<&str> = snapshot
            .namespaces()
            .iter()
            .filter_map(|ns| ns.metadata.name.as_deref())
            .collect();
        assert_eq!(names, vec!["default", "billing", "payments"]);
    }

    #[test]
    fn empty_snapshot() {
        let snapshot = ResourceSnapshot::from_objects(Vec::new());
        assert!(snapshot.is_empty());
        assert!(snapshot.authorization_policies().is_empty());
        assert!(snapshot.destination_rules().is_empty());
    }
}
