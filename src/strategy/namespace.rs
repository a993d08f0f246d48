use async_trait::async_trait;

use super::{DiscoveryState, DiscoveryUpdate, Strategy};
use crate::error::{Error, Result};

/// Assumes the control plane lives in a configured namespace.
#[derive(Clone, Debug)]
pub struct DefaultNamespace {
    namespace: String,
}

impl DefaultNamespace {
    /// Creates the strategy for `namespace`.
    #[must_use]
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
        }
    }
}

#[async_trait]
impl Strategy for DefaultNamespace {
    fn name(&self) -> &'static str {
        "default-namespace"
    }

    async fn run(&self, _state: &DiscoveryState) -> Result<DiscoveryUpdate> {
        Ok(DiscoveryUpdate {
            namespace: Some(self.namespace.clone()),
            ..Default::default()
        })
    }

    fn verify(&self, update: &DiscoveryUpdate) -> Result<()> {
        let namespace = update.namespace.as_deref().unwrap_or_default();
        if is_dns_label(namespace) {
            Ok(())
        } else {
            Err(Error::Verify(format!("{namespace:?} is not a valid namespace name")))
        }
    }
}

/// RFC 1123 label, as required for namespace names.
fn is_dns_label(name: &str) -> bool {
    (1..=63).contains(&name.len())
        && name
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
        && !name.starts_with('-')
        && !name.ends_with('-')
}
