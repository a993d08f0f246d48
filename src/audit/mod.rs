//! Rule checkers run over a [`ResourceSnapshot`].
//!
//! Auditors are collected into an [`AuditorRegistry`] by the caller and run
//! in registration order. An auditor that fails is reported alongside the
//! findings of the others; it never stops the pipeline.

mod authz;
mod cve;
mod mtls;

use std::fmt;

pub use self::authz::AuthzPolarityAuditor;
pub use self::cve::{CveAuditor, KnownCve};
pub use self::mtls::MtlsAuditor;
use crate::error::{Error, Result};
use crate::snapshot::ResourceSnapshot;

/// Something an auditor flagged.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Finding {
    /// Name of the auditor that produced the finding.
    pub auditor: &'static str,
    /// Affected resource, e.g. `namespace/billing`.
    pub resource: Option<String>,
    /// What is wrong.
    pub description: String,
}

impl Finding {
    pub(crate) fn new(
        auditor: &'static str,
        resource: Option<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            auditor,
            resource,
            description: description.into(),
        }
    }
}

impl fmt::Display for Finding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.resource {
            Some(resource) => write!(f, "[{}] {resource}: {}", self.auditor, self.description),
            None => write!(f, "[{}] {}", self.auditor, self.description),
        }
    }
}

/// Inputs available to every auditor.
#[derive(Clone, Copy, Debug)]
pub struct AuditContext<'a> {
    /// Configuration under audit.
    pub snapshot: &'a ResourceSnapshot,
    /// Control-plane (root) namespace.
    pub namespace: &'a str,
    /// Control-plane build version, if known.
    pub version: Option<&'a str>,
}

/// A single rule checker.
pub trait Auditor: Send + Sync {
    /// Name used in findings and failure reports.
    fn name(&self) -> &'static str;

    /// Checks the configuration.
    ///
    /// # Errors
    ///
    /// Fails if the auditor cannot evaluate its rule against this input.
    fn audit(&self, ctx: &AuditContext<'_>) -> Result<Vec<Finding>>;
}

/// An auditor that could not complete.
#[derive(Debug)]
pub struct AuditFailure {
    /// Name of the auditor.
    pub auditor: &'static str,
    /// Why it failed.
    pub error: Error,
}

/// Findings and failures of one pipeline run.
#[derive(Debug, Default)]
pub struct AuditReport {
    /// Findings from every auditor that completed, in registration order.
    pub findings: Vec<Finding>,
    /// Auditors that failed.
    pub failures: Vec<AuditFailure>,
}

/// Ordered set of auditors.
#[derive(Default)]
pub struct AuditorRegistry {
    auditors: Vec<Box<dyn Auditor>>,
}

impl fmt::Debug for AuditorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.auditors.iter().map(|a| a.name()))
            .finish()
    }
}

impl AuditorRegistry {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The built-in auditors.
    #[must_use]
    pub fn standard() -> Self {
        Self::new()
            .with(MtlsAuditor)
            .with(AuthzPolarityAuditor)
            .with(CveAuditor::default())
    }

    /// Adds an auditor.
    #[must_use]
    pub fn with(mut self, auditor: impl Auditor + 'static) -> Self {
        self.auditors.push(Box::new(auditor));
        self
    }

    /// Names of the registered auditors.
    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.auditors.iter().map(|a| a.name())
    }

    /// Runs every auditor.
    #[must_use]
    pub fn run(&self, ctx: &AuditContext<'_>) -> AuditReport {
        let mut report = AuditReport::default();

        for auditor in &self.auditors {
            match auditor.audit(ctx) {
                Ok(findings) => {
                    tracing::debug!("auditor {}: {} findings", auditor.name(), findings.len());
                    report.findings.extend(findings);
                }
                Err(error) => {
                    tracing::warn!("auditor {} failed: {error}", auditor.name());
                    report.failures.push(AuditFailure {
                        auditor: auditor.name(),
                        error,
                    });
                }
            }
        }

        report
    }
}
