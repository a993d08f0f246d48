//! Registry of the configuration kinds this crate can decode.
//!
//! MCP envelopes carry an opaque body whose type is only known from the kind
//! that was requested. Each [`KindEntry`] holds monomorphized constructors for
//! one kind, so picking the concrete type at runtime is a table lookup.

use std::collections::BTreeMap;
use std::collections::HashMap;

use k8s_openapi::api::core::v1::{Namespace, NamespaceSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::Resource;
use kube::core::{DynamicObject, GroupVersionKind};
use prost::Message as _;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{Error, Result};
use crate::istio::networking::{DestinationRule, Gateway, VirtualService};
use crate::istio::security::{AuthorizationPolicy, PeerAuthentication};
use crate::{istio, proto};

/// A decoded configuration object of any supported kind.
#[derive(Clone, Debug)]
pub enum MeshObject {
    /// A namespace.
    Namespace(Namespace),
    /// A peer authentication policy.
    PeerAuthentication(PeerAuthentication),
    /// An authorization policy.
    AuthorizationPolicy(AuthorizationPolicy),
    /// A destination rule.
    DestinationRule(DestinationRule),
    /// A gateway.
    Gateway(Gateway),
    /// A virtual service.
    VirtualService(VirtualService),
    /// An object of a kind outside the catalog.
    Unrecognized(DynamicObject),
}

impl MeshObject {
    /// Kind name of the object.
    #[must_use]
    pub fn kind(&self) -> String {
        match self {
            Self::Namespace(_) => Namespace::kind(&()).into_owned(),
            Self::PeerAuthentication(_) => PeerAuthentication::kind(&()).into_owned(),
            Self::AuthorizationPolicy(_) => AuthorizationPolicy::kind(&()).into_owned(),
            Self::DestinationRule(_) => DestinationRule::kind(&()).into_owned(),
            Self::Gateway(_) => Gateway::kind(&()).into_owned(),
            Self::VirtualService(_) => VirtualService::kind(&()).into_owned(),
            Self::Unrecognized(obj) => obj
                .types
                .as_ref()
                .map(|t| t.kind.clone())
                .unwrap_or_default(),
        }
    }
}

/// A kind whose objects can be built from metadata plus a protobuf spec.
pub trait MeshKind: Resource<DynamicType = ()> + DeserializeOwned + Into<MeshObject> {
    /// Wire type of the spec carried in an MCP body.
    type Wire: prost::Message + Default;

    /// Whether objects of this kind live in a namespace.
    const NAMESPACED: bool = true;

    /// Builds an object from its metadata and decoded spec.
    fn from_wire(metadata: ObjectMeta, spec: Self::Wire) -> Self;

    /// Group/version/kind of this type.
    fn gvk() -> GroupVersionKind {
        GroupVersionKind::gvk(&Self::group(&()), &Self::version(&()), &Self::kind(&()))
    }
}

macro_rules! mesh_kinds {
    ($($ty:ident => $spec:ty),+ $(,)?) => {
        $(
            impl MeshKind for $ty {
                type Wire = $spec;

                fn from_wire(metadata: ObjectMeta, spec: Self::Wire) -> Self {
                    let mut object = Self::new("", spec);
                    object.metadata = metadata;
                    object
                }
            }

            impl From<$ty> for MeshObject {
                fn from(object: $ty) -> Self {
                    Self::$ty(object)
                }
            }
        )+
    };
}

mesh_kinds! {
    PeerAuthentication => istio::security::PeerAuthenticationSpec,
    AuthorizationPolicy => istio::security::AuthorizationPolicySpec,
    DestinationRule => istio::networking::DestinationRuleSpec,
    Gateway => istio::networking::GatewaySpec,
    VirtualService => istio::networking::VirtualServiceSpec,
}

impl MeshKind for Namespace {
    type Wire = istio::NamespaceSpec;

    const NAMESPACED: bool = false;

    fn from_wire(metadata: ObjectMeta, spec: Self::Wire) -> Self {
        Namespace {
            metadata,
            spec: Some(NamespaceSpec {
                finalizers: (!spec.finalizers.is_empty()).then_some(spec.finalizers),
            }),
            status: None,
        }
    }
}

impl From<Namespace> for MeshObject {
    fn from(namespace: Namespace) -> Self {
        Self::Namespace(namespace)
    }
}

/// Wire type URL of a kind, e.g. `networking.istio.io/v1alpha3/Gateway`.
#[must_use]
pub fn type_url(gvk: &GroupVersionKind) -> String {
    let group = if gvk.group.is_empty() {
        "core"
    } else {
        gvk.group.as_str()
    };

    format!("{group}/{}/{}", gvk.version, gvk.kind)
}

/// One kind pulled off the wire before it is turned into a typed object.
#[derive(Clone, Debug, PartialEq)]
pub struct DecodedResource {
    /// Kind of the resource.
    pub gvk: GroupVersionKind,
    /// Structural metadata.
    pub metadata: ObjectMeta,
    /// Serialized spec.
    pub payload: Vec<u8>,
}

impl DecodedResource {
    /// Splits an MCP envelope into metadata and payload.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedName`] unless the name is `namespace/name`
    /// with exactly one `/`. Cluster-scoped kinds may leave the namespace
    /// empty (`/name`).
    pub fn from_envelope(entry: &KindEntry, envelope: proto::Resource) -> Result<Self> {
        let meta = envelope.metadata.unwrap_or_default();
        let (namespace, name) = split_name(&meta.name, entry.namespaced)?;

        let metadata = ObjectMeta {
            name: Some(name),
            namespace,
            labels: non_empty(meta.labels),
            annotations: non_empty(meta.annotations),
            resource_version: (!meta.version.is_empty()).then_some(meta.version),
            ..Default::default()
        };

        Ok(Self {
            gvk: entry.gvk.clone(),
            metadata,
            payload: envelope.body.map(|body| body.value).unwrap_or_default(),
        })
    }
}

fn split_name(full: &str, namespaced: bool) -> Result<(Option<String>, String)> {
    let malformed = || Error::MalformedName(full.to_string());
    let (namespace, name) = full.split_once('/').ok_or_else(malformed)?;
    if name.is_empty() || name.contains('/') || (namespaced && namespace.is_empty()) {
        return Err(malformed());
    }

    let namespace = (!namespace.is_empty()).then(|| namespace.to_string());
    Ok((namespace, name.to_string()))
}

fn non_empty(map: HashMap<String, String>) -> Option<BTreeMap<String, String>> {
    (!map.is_empty()).then(|| map.into_iter().collect())
}

/// Constructors for one registered kind.
#[derive(Clone, Debug)]
pub struct KindEntry {
    gvk: GroupVersionKind,
    type_url: String,
    namespaced: bool,
    from_wire: fn(ObjectMeta, &[u8]) -> Result<MeshObject, prost::DecodeError>,
    from_json: fn(Value) -> serde_json::Result<MeshObject>,
}

impl KindEntry {
    fn of<K: MeshKind>() -> Self {
        let gvk = K::gvk();
        Self {
            type_url: type_url(&gvk),
            gvk,
            namespaced: K::NAMESPACED,
            from_wire: from_wire::<K>,
            from_json: from_json::<K>,
        }
    }

    /// Group/version/kind of the entry.
    #[must_use]
    pub fn gvk(&self) -> &GroupVersionKind {
        &self.gvk
    }

    /// Wire type URL requested for this kind.
    #[must_use]
    pub fn type_url(&self) -> &str {
        &self.type_url
    }

    /// Whether objects of this kind are namespaced.
    #[must_use]
    pub fn namespaced(&self) -> bool {
        self.namespaced
    }

    /// Builds a typed object, decoding the payload into its spec.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Decode`] if the payload does not parse.
    pub fn instantiate(&self, resource: DecodedResource) -> Result<MeshObject> {
        (self.from_wire)(resource.metadata, &resource.payload).map_err(|source| Error::Decode {
            kind: self.type_url.clone(),
            source,
        })
    }

    /// Decodes one MCP envelope into a typed object.
    ///
    /// # Errors
    ///
    /// Fails on a malformed name or an unparseable body.
    pub fn decode_envelope(&self, envelope: proto::Resource) -> Result<MeshObject> {
        self.instantiate(DecodedResource::from_envelope(self, envelope)?)
    }
}

fn from_wire<K: MeshKind>(
    metadata: ObjectMeta,
    payload: &[u8],
) -> Result<MeshObject, prost::DecodeError> {
    let spec = K::Wire::decode(payload)?;
    Ok(K::from_wire(metadata, spec).into())
}

fn from_json<K: MeshKind>(value: Value) -> serde_json::Result<MeshObject> {
    serde_json::from_value::<K>(value).map(Into::into)
}

/// The finite set of kinds that can be decoded.
#[derive(Clone, Debug)]
pub struct Catalog {
    kinds: Vec<KindEntry>,
}

impl Default for Catalog {
    fn default() -> Self {
        Self::mesh()
    }
}

impl Catalog {
    /// A catalog with no kinds.
    #[must_use]
    pub fn empty() -> Self {
        Self { kinds: Vec::new() }
    }

    /// The six kinds consumed by the auditors.
    #[must_use]
    pub fn mesh() -> Self {
        Self::empty()
            .register::<Namespace>()
            .register::<PeerAuthentication>()
            .register::<AuthorizationPolicy>()
            .register::<DestinationRule>()
            .register::<Gateway>()
            .register::<VirtualService>()
    }

    /// Adds a kind.
    #[must_use]
    pub fn register<K: MeshKind>(mut self) -> Self {
        self.kinds.push(KindEntry::of::<K>());
        self
    }

    /// Registered kinds, in registration order.
    #[must_use]
    pub fn kinds(&self) -> &[KindEntry] {
        &self.kinds
    }

    /// Looks a kind up by its wire type URL.
    #[must_use]
    pub fn by_type_url(&self, type_url: &str) -> Option<&KindEntry> {
        self.kinds.iter().find(|k| k.type_url == type_url)
    }

    /// Looks a kind up by group and kind, ignoring version.
    #[must_use]
    pub fn by_group_kind(&self, group: &str, kind: &str) -> Option<&KindEntry> {
        self.kinds
            .iter()
            .find(|k| k.gvk.group == group && k.gvk.kind == kind)
    }

    /// Decodes a self-describing JSON object using its `apiVersion` and `kind`.
    ///
    /// Objects of kinds outside the catalog come back as
    /// [`MeshObject::Unrecognized`].
    ///
    /// # Errors
    ///
    /// Fails if the object lacks type metadata or does not match its kind.
    pub fn decode_json(&self, value: Value) -> Result<MeshObject> {
        let api_version = value.get("apiVersion").and_then(Value::as_str);
        let kind = value.get("kind").and_then(Value::as_str);
        let (Some(api_version), Some(kind)) = (api_version, kind) else {
            return Err(Error::Protocol("object without apiVersion/kind".to_string()));
        };

        let group = api_version.rsplit_once('/').map_or("", |(group, _)| group);
        match self.by_group_kind(group, kind) {
            Some(entry) => (entry.from_json)(value).map_err(|e| Error::json(&entry.type_url, e)),
            None => {
                let label = format!("{api_version}/{kind}");
                serde_json::from_value::<DynamicObject>(value)
                    .map(MeshObject::Unrecognized)
                    .map_err(|e| Error::json(label, e))
            }
        }
    }
}
