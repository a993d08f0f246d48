//! Ordered fallback strategies for establishing facts about the environment.
//!
//! A [`Runner`] tries its strategies strictly in order. Each strategy first
//! [runs](Strategy::run), producing a [`DiscoveryUpdate`] without touching the
//! shared state, and then [verifies](Strategy::verify) that update. The first
//! strategy passing both has its update merged into the [`DiscoveryState`] and
//! ends the chain; every earlier failure is kept for the combined error.

mod dns;
mod namespace;
mod sidecar;
mod subnet;

use async_trait::async_trait;

pub use self::dns::WellKnownName;
pub use self::namespace::DefaultNamespace;
pub use self::sidecar::SidecarBootstrap;
pub use self::subnet::{SubnetScan, parse_default_gateway};
use crate::ads::{AdsClient, ClientConfig};
use crate::error::{Attempt, Error, Result};

/// Facts accumulated over one discovery run.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DiscoveryState {
    /// Namespace the control plane runs in.
    pub namespace: Option<String>,
    /// Discovery (ADS) address, `host:port`.
    pub discovery_address: Option<String>,
    /// Debug endpoint address, `host:port`.
    pub debug_address: Option<String>,
    /// Kubelets that answered on their read-only port.
    pub kubelets: Vec<String>,
    /// Control-plane build version.
    pub version: Option<String>,
}

impl DiscoveryState {
    /// Merges a verified update. Fields that are already set keep their
    /// value.
    pub fn merge(&mut self, update: DiscoveryUpdate) {
        fill(&mut self.namespace, update.namespace);
        fill(&mut self.discovery_address, update.discovery_address);
        fill(&mut self.debug_address, update.debug_address);
        fill(&mut self.version, update.version);
        if self.kubelets.is_empty() {
            self.kubelets = update.kubelets;
        }
    }

    /// Whether any control-plane address is known.
    #[must_use]
    pub fn has_control_plane(&self) -> bool {
        self.discovery_address.is_some() || self.debug_address.is_some()
    }
}

fn fill(slot: &mut Option<String>, value: Option<String>) {
    if slot.is_none() {
        *slot = value;
    }
}

/// Output of a single strategy run, merged only once verified.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DiscoveryUpdate {
    /// Namespace found.
    pub namespace: Option<String>,
    /// Discovery address found.
    pub discovery_address: Option<String>,
    /// Debug address found.
    pub debug_address: Option<String>,
    /// Kubelets found.
    pub kubelets: Vec<String>,
    /// Version learned along the way.
    pub version: Option<String>,
}

/// One way of establishing a fact.
#[async_trait]
pub trait Strategy: Send + Sync {
    /// Short name used in logs and errors.
    fn name(&self) -> &'static str;

    /// Attempts the strategy against the current state.
    async fn run(&self, state: &DiscoveryState) -> Result<DiscoveryUpdate>;

    /// Checks that a successful run produced something usable.
    fn verify(&self, update: &DiscoveryUpdate) -> Result<()>;
}

/// Result of a chain that established its fact.
#[derive(Debug)]
pub struct Outcome {
    /// Strategy whose update was merged.
    pub strategy: &'static str,
    /// Strategies that failed before it, in order.
    pub attempts: Vec<Attempt>,
}

impl Outcome {
    /// Every earlier failure as `name: error`, separated by `; `.
    #[must_use]
    pub fn diagnostics(&self) -> String {
        self.attempts
            .iter()
            .map(|a| format!("{}: {}", a.strategy, a.error))
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// An ordered chain of strategies for one fact.
pub struct Runner {
    fact: &'static str,
    strategies: Vec<Box<dyn Strategy>>,
}

impl std::fmt::Debug for Runner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.strategies.iter().map(|s| s.name()).collect();
        f.debug_struct("Runner")
            .field("fact", &self.fact)
            .field("strategies", &names)
            .finish()
    }
}

impl Runner {
    /// Creates an empty chain establishing `fact`.
    #[must_use]
    pub fn new(fact: &'static str) -> Self {
        Self {
            fact,
            strategies: Vec::new(),
        }
    }

    /// Appends a strategy.
    #[must_use]
    pub fn with(mut self, strategy: impl Strategy + 'static) -> Self {
        self.strategies.push(Box::new(strategy));
        self
    }

    /// Runs the chain, returning the strategy that succeeded along with the
    /// failures before it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Exhausted`] listing every attempt if no strategy both
    /// runs and verifies.
    pub async fn run(&self, state: &mut DiscoveryState) -> Result<Outcome> {
        let mut attempts = Vec::new();

        for strategy in &self.strategies {
            let name = strategy.name();
            tracing::debug!("{}: trying strategy {name}", self.fact);

            let outcome = match strategy.run(state).await {
                Ok(update) => strategy.verify(&update).map(|()| update),
                Err(e) => Err(e),
            };

            match outcome {
                Ok(update) => {
                    tracing::info!("{}: strategy {name} succeeded", self.fact);
                    state.merge(update);
                    return Ok(Outcome {
                        strategy: name,
                        attempts,
                    });
                }
                Err(error) => {
                    tracing::debug!("{}: strategy {name} failed: {error}", self.fact);
                    attempts.push(Attempt {
                        strategy: name,
                        error,
                    });
                }
            }
        }

        Err(Error::Exhausted {
            fact: self.fact,
            attempts,
        })
    }
}

/// Connects to `address` and completes a version exchange, proving it speaks
/// the discovery protocol rather than merely accepting connections.
pub(crate) async fn confirm_control_plane(address: &str, config: ClientConfig) -> Result<String> {
    let mut client = AdsClient::connect(address, config).await?;
    let version = client.version().await;
    client.close();
    version
}

/// Checks that `address` is a usable `host:port`.
pub(crate) fn verify_address(address: Option<&str>) -> Result<()> {
    let address = address.ok_or_else(|| Error::Verify("no address found".to_string()))?;
    let authority: http::uri::Authority = address
        .parse()
        .map_err(|_| Error::Verify(format!("{address:?} is not host:port")))?;

    if authority.host().is_empty() || authority.port_u16().is_none() {
        return Err(Error::Verify(format!("{address:?} is not host:port")));
    }

    Ok(())
}
