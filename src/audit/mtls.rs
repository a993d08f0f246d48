use super::{AuditContext, Auditor, Finding};
use crate::error::Result;
use crate::istio::security::{MtlsMode, PeerAuthentication};

/// Flags namespaces whose workloads accept plaintext traffic.
///
/// A namespace-wide policy in a namespace overrides the mesh-wide policy in
/// the root namespace. With neither, the mesh default is permissive.
#[derive(Clone, Copy, Debug, Default)]
pub struct MtlsAuditor;

const NAME: &str = "mtls";

impl Auditor for MtlsAuditor {
    fn name(&self) -> &'static str {
        NAME
    }

    fn audit(&self, ctx: &AuditContext<'_>) -> Result<Vec<Finding>> {
        let policies = ctx.snapshot.peer_authentications();
        let mesh_mode = namespace_mode(policies, ctx.namespace).unwrap_or(MtlsMode::Permissive);

        let mut findings = Vec::new();
        for namespace in ctx.snapshot.namespaces() {
            let Some(name) = namespace.metadata.name.as_deref() else {
                continue;
            };

            let mode = namespace_mode(policies, name).unwrap_or(mesh_mode);
            if mode != MtlsMode::Strict {
                findings.push(Finding::new(
                    NAME,
                    Some(format!("namespace/{name}")),
                    format!("mutual TLS is {} rather than STRICT", mode.as_str_name()),
                ));
            }
        }

        for policy in policies {
            for (port, tls) in &policy.spec.port_level_mtls {
                if tls.mode() == MtlsMode::Disable {
                    findings.push(Finding::new(
                        NAME,
                        Some(resource_name(policy)),
                        format!("mutual TLS is disabled on port {port}"),
                    ));
                }
            }
        }

        Ok(findings)
    }
}

/// Mode set by the namespace-wide policy of `namespace`, if any.
fn namespace_mode(policies: &[PeerAuthentication], namespace: &str) -> Option<MtlsMode> {
    policies
        .iter()
        .filter(|p| p.metadata.namespace.as_deref() == Some(namespace))
        .filter(|p| p.spec.is_namespace_wide())
        .map(|p| p.spec.mode())
        .find(|mode| *mode != MtlsMode::Unset)
}

fn resource_name(policy: &PeerAuthentication) -> String {
    format!(
        "peerauthentication/{}/{}",
        policy.metadata.namespace.as_deref().unwrap_or_default(),
        policy.metadata.name.as_deref().unwrap_or_default()
    )
}
