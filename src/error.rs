//! Error taxonomy for discovery and retrieval.

use std::fmt::Write as _;
use std::io;
use std::time::Duration;

/// Result type for discovery operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// A single failed strategy attempt, kept for diagnostics.
#[derive(Debug)]
pub struct Attempt {
    /// Name of the strategy that failed.
    pub strategy: &'static str,
    /// Why it failed.
    pub error: Error,
}

/// Errors raised while discovering or talking to the control plane.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The caller's deadline elapsed before a connection was established.
    #[error("dial {address}: deadline exceeded after {timeout:?}")]
    DeadlineExceeded {
        /// Target address.
        address: String,
        /// Deadline that elapsed.
        timeout: Duration,
    },

    /// The raw socket dial failed.
    #[error("dial {address}: {source}")]
    Dial {
        /// Target address.
        address: String,
        /// Underlying socket error.
        #[source]
        source: io::Error,
    },

    /// The transport (HTTP/2 or TLS) could not be established.
    #[error("connect {address}: {source}")]
    Transport {
        /// Target address.
        address: String,
        /// Underlying transport error.
        #[source]
        source: tonic::transport::Error,
    },

    /// An address could not be turned into an endpoint.
    #[error("invalid address {0:?}")]
    InvalidAddress(String),

    /// The discovery stream returned a gRPC status.
    #[error("discovery stream: {0}")]
    Status(#[from] tonic::Status),

    /// No response arrived for a discovery request in time.
    #[error("no response for {type_url} within {timeout:?}")]
    RequestTimeout {
        /// Type URL of the unanswered request.
        type_url: String,
        /// Request deadline that elapsed.
        timeout: Duration,
    },

    /// The client was closed or the server ended the stream.
    #[error("discovery stream closed")]
    StreamClosed,

    /// A response did not echo the requested type URL.
    #[error("type URL mismatch: requested {requested}, received {received}")]
    TypeUrlMismatch {
        /// Type URL sent in the request.
        requested: String,
        /// Type URL found in the response.
        received: String,
    },

    /// A resource identifier was not of the form `namespace/name`.
    #[error("malformed resource name {0:?}: expected namespace/name")]
    MalformedName(String),

    /// The requested or received kind is not in the catalog.
    #[error("kind {0} is not registered")]
    UnregisteredKind(String),

    /// A protobuf payload failed to parse.
    #[error("decode {kind}: {source}")]
    Decode {
        /// Kind being decoded.
        kind: String,
        /// Underlying protobuf error.
        #[source]
        source: prost::DecodeError,
    },

    /// A JSON document failed to parse.
    #[error("decode {kind}: {source}")]
    Json {
        /// What was being decoded.
        kind: String,
        /// Underlying JSON error.
        #[source]
        source: serde_json::Error,
    },

    /// The control plane sent something the client cannot interpret.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Fetching a single kind failed.
    #[error("fetch {kind}: {source}")]
    Fetch {
        /// Type URL of the kind.
        kind: String,
        /// What went wrong.
        #[source]
        source: Box<Error>,
    },

    /// An HTTP request failed.
    #[error("http {url}: {source}")]
    Http {
        /// Request URL.
        url: String,
        /// Underlying client error.
        #[source]
        source: reqwest::Error,
    },

    /// A strategy produced a result that failed verification.
    #[error("verification failed: {0}")]
    Verify(String),

    /// Every strategy for a fact failed.
    #[error("no {fact} strategy succeeded{}", render_attempts(.attempts))]
    Exhausted {
        /// The fact the chain was trying to establish.
        fact: &'static str,
        /// Every failed attempt, in order.
        attempts: Vec<Attempt>,
    },

    /// A control-plane version string could not be interpreted.
    #[error("unrecognized control-plane version {0:?}")]
    UnknownVersion(String),

    /// Discovery finished without a usable control-plane address.
    #[error("no control-plane address discovered")]
    NoControlPlane,

    /// Local I/O failed.
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl Error {
    /// Returns `true` for dial, handshake and timeout failures, which callers
    /// recover from by trying the next candidate.
    #[must_use]
    pub fn is_connectivity(&self) -> bool {
        match self {
            Self::DeadlineExceeded { .. }
            | Self::RequestTimeout { .. }
            | Self::Dial { .. }
            | Self::Transport { .. }
            | Self::Http { .. } => true,
            Self::Status(status) => status.code() == tonic::Code::Unavailable,
            Self::Fetch { source, .. } => source.is_connectivity(),
            _ => false,
        }
    }

    pub(crate) fn json(kind: impl Into<String>, source: serde_json::Error) -> Self {
        Self::Json {
            kind: kind.into(),
            source,
        }
    }

    pub(crate) fn http(url: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Http {
            url: url.into(),
            source,
        }
    }
}

fn render_attempts(attempts: &[Attempt]) -> String {
    let mut out = String::new();
    for attempt in attempts {
        let _ = write!(out, "; {}: {}", attempt.strategy, attempt.error);
    }

    out
}
