use super::{AuditContext, Auditor, Finding};
use crate::error::Result;
use crate::istio::security::{Action, AuthorizationPolicy, Rule};

/// Flags authorization policies whose matchers point the wrong way.
///
/// `ALLOW` with negative matchers allows whatever was not anticipated, and
/// `DENY` with positive path matchers is bypassed by path variants the
/// matcher does not normalize. The safe forms are `ALLOW` with positive
/// matching and `DENY` with negative matching.
#[derive(Clone, Copy, Debug, Default)]
pub struct AuthzPolarityAuditor;

const NAME: &str = "authz-polarity";

impl Auditor for AuthzPolarityAuditor {
    fn name(&self) -> &'static str {
        NAME
    }

    fn audit(&self, ctx: &AuditContext<'_>) -> Result<Vec<Finding>> {
        let mut findings = Vec::new();

        for policy in ctx.snapshot.authorization_policies() {
            let rules = &policy.spec.rules;
            match policy.spec.action() {
                Action::Allow if rules.iter().any(has_negative_match) => {
                    findings.push(Finding::new(
                        NAME,
                        Some(resource_name(policy)),
                        "ALLOW policy uses negative matching; use positive matching instead",
                    ));
                }
                Action::Deny if rules.iter().any(has_positive_path) => {
                    findings.push(Finding::new(
                        NAME,
                        Some(resource_name(policy)),
                        "DENY policy matches paths positively; use notPaths instead",
                    ));
                }
                _ => {}
            }
        }

        Ok(findings)
    }
}

fn has_negative_match(rule: &Rule) -> bool {
    rule.from
        .iter()
        .filter_map(|f| f.source.as_ref())
        .any(|s| s.has_negative_match())
        || rule
            .to
            .iter()
            .filter_map(|t| t.operation.as_ref())
            .any(|o| o.has_negative_match())
        || rule.when.iter().any(|c| !c.not_values.is_empty())
}

fn has_positive_path(rule: &Rule) -> bool {
    rule.to
        .iter()
        .filter_map(|t| t.operation.as_ref())
        .any(|o| !o.paths.is_empty())
}

fn resource_name(policy: &AuthorizationPolicy) -> String {
    format!(
        "authorizationpolicy/{}/{}",
        policy.metadata.namespace.as_deref().unwrap_or_default(),
        policy.metadata.name.as_deref().unwrap_or_default()
    )
}
