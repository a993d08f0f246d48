use super::{AuditContext, Auditor, Finding};
use crate::error::{Error, Result};

/// `major.minor.patch`.
type Version = (u32, u32, u32);

/// A published vulnerability and the version ranges it affects.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KnownCve {
    /// CVE identifier.
    pub id: &'static str,
    /// Affected `[from, to)` ranges.
    pub affected: &'static [(Version, Version)],
    /// Short summary.
    pub summary: &'static str,
}

impl KnownCve {
    fn affects(&self, version: Version) -> bool {
        self.affected
            .iter()
            .any(|(from, to)| (*from..*to).contains(&version))
    }
}

const KNOWN_CVES: &[KnownCve] = &[
    KnownCve {
        id: "CVE-2020-8595",
        affected: &[((1, 2, 0), (1, 3, 8)), ((1, 4, 0), (1, 4, 4))],
        summary: "authorization bypass through case-insensitive exact path matching",
    },
    KnownCve {
        id: "CVE-2021-34824",
        affected: &[((1, 0, 0), (1, 8, 6)), ((1, 9, 0), (1, 9, 6))],
        summary: "gateway TLS credentials readable across namespaces",
    },
    KnownCve {
        id: "CVE-2021-39156",
        affected: &[
            ((1, 0, 0), (1, 9, 8)),
            ((1, 10, 0), (1, 10, 4)),
            ((1, 11, 0), (1, 11, 1)),
        ],
        summary: "authorization bypass through URI fragments",
    },
    KnownCve {
        id: "CVE-2022-21679",
        affected: &[((1, 12, 0), (1, 12, 2))],
        summary: "authorization policies misapplied for proxies older than the control plane",
    },
    KnownCve {
        id: "CVE-2022-23635",
        affected: &[
            ((1, 0, 0), (1, 11, 7)),
            ((1, 12, 0), (1, 12, 4)),
            ((1, 13, 0), (1, 13, 1)),
        ],
        summary: "control plane crash from a crafted unauthenticated request",
    },
    KnownCve {
        id: "CVE-2022-24726",
        affected: &[
            ((1, 0, 0), (1, 11, 8)),
            ((1, 12, 0), (1, 12, 5)),
            ((1, 13, 0), (1, 13, 2)),
        ],
        summary: "control plane crash from a crafted webhook request",
    },
];

/// Reports known vulnerabilities of the control-plane version.
#[derive(Clone, Debug)]
pub struct CveAuditor {
    known: Vec<KnownCve>,
}

impl Default for CveAuditor {
    fn default() -> Self {
        Self {
            known: KNOWN_CVES.to_vec(),
        }
    }
}

impl CveAuditor {
    /// Checks against `known` instead of the built-in table.
    #[must_use]
    pub fn with_known(known: Vec<KnownCve>) -> Self {
        Self { known }
    }
}

const NAME: &str = "cve";

impl Auditor for CveAuditor {
    fn name(&self) -> &'static str {
        NAME
    }

    fn audit(&self, ctx: &AuditContext<'_>) -> Result<Vec<Finding>> {
        let raw = ctx.version.unwrap_or_default();
        let version = parse_version(raw).ok_or_else(|| Error::UnknownVersion(raw.to_string()))?;

        Ok(self
            .known
            .iter()
            .filter(|cve| cve.affects(version))
            .map(|cve| {
                Finding::new(
                    NAME,
                    None,
                    format!("{} affects control plane {raw}: {}", cve.id, cve.summary),
                )
            })
            .collect())
    }
}

/// Parses `1.19.3`, `v1.19.3` or `1.19.3-distroless`. A missing patch is 0.
fn parse_version(raw: &str) -> Option<Version> {
    let core = raw.strip_prefix('v').unwrap_or(raw);
    let core = core.split(['-', '+']).next()?;

    let mut parts = core.split('.').map(str::parse::<u32>);
    let major = parts.next()?.ok()?;
    let minor = parts.next()?.ok()?;
    let patch = parts.next().transpose().ok()?.unwrap_or(0);
    Some((major, minor, patch))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::ResourceSnapshot;

    fn audit(version: Option<&str>) -> Result<Vec<Finding>> {
        let snapshot = ResourceSnapshot::default();
        let ctx = AuditContext {
            snapshot: &snapshot,
            namespace: "istio-system",
            version,
        };
        CveAuditor::default().audit(&ctx)
    }

    fn ids(findings: &[Finding]) -> Vec<&str> {
        findings
            .iter()
            .filter_map(|f| f.description.split_whitespace().next())
            .collect()
    }

    #[test]
    fn version_parsing() {
        assert_eq!(parse_version("1.19.3"), Some((1, 19, 3)));
        assert_eq!(parse_version("v1.12.1"), Some((1, 12, 1)));
        assert_eq!(parse_version("1.20.0-distroless"), Some((1, 20, 0)));
        assert_eq!(parse_version("1.8"), Some((1, 8, 0)));
        assert_eq!(parse_version("unknown"), None);
        assert_eq!(parse_version(""), None);
    }

    #[test]
    fn vulnerable_version_is_reported() {
        let findings = audit(Some("1.12.1")).unwrap();
        assert_eq!(
            ids(&findings),
            vec!["CVE-2022-21679", "CVE-2022-23635", "CVE-2022-24726"]
        );
    }

    #[test]
    fn range_end_is_exclusive() {
        let findings = audit(Some("1.13.2")).unwrap();
        assert!(findings.is_empty(), "{findings:?}");
    }

    #[test]
    fn current_version_is_clean() {
        assert!(audit(Some("1.22.0")).unwrap().is_empty());
    }

    #[test]
    fn unknown_version_fails() {
        assert!(matches!(audit(None), Err(Error::UnknownVersion(_))));
        assert!(matches!(audit(Some("dev")), Err(Error::UnknownVersion(_))));
    }
}
