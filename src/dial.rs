//! Bounded connection establishment.
//!
//! `tonic` keeps retrying a failing connect under its own backoff, and a TLS
//! handshake against a plaintext listener may only fail once an outer timeout
//! fires. [`dial`] runs the real connect on a background task, reports the raw
//! socket failure through a single-slot channel the moment it happens, and
//! races both against the caller's deadline.

use std::io;
use std::time::Duration;

use hyper_util::rt::TokioIo;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tonic::transport::{Channel, ClientTlsConfig, Endpoint, Uri};

use crate::error::{Error, Result};

/// Connects to `address` (`host:port`), returning within `timeout`.
///
/// When `tls` is set the connection is made over `https` and the handshake is
/// part of the bounded attempt. No retries are performed.
///
/// # Errors
///
/// - [`Error::DeadlineExceeded`] when the deadline elapses first
/// - [`Error::Dial`] when the socket connect fails
/// - [`Error::Transport`] when the HTTP/2 or TLS handshake fails
pub async fn dial(
    address: &str,
    tls: Option<ClientTlsConfig>,
    timeout: Duration,
) -> Result<Channel> {
    let deadline = Instant::now() + timeout;
    let expired = || Error::DeadlineExceeded {
        address: address.to_string(),
        timeout,
    };
    if timeout.is_zero() {
        return Err(expired());
    }

    let endpoint = endpoint(address, tls)?;

    // Only the first failure matters; later ones are dropped by `try_send`.
    let (failed_tx, mut failed_rx) = mpsc::channel::<io::Error>(1);

    let connector = tower::service_fn(move |uri: Uri| {
        let failed_tx = failed_tx.clone();
        async move {
            let target = authority(&uri)?;
            match TcpStream::connect(&target).await {
                Ok(stream) => Ok::<_, io::Error>(TokioIo::new(stream)),
                Err(e) => {
                    let _ = failed_tx.try_send(io::Error::new(e.kind(), e.to_string()));
                    Err(e)
                }
            }
        }
    });

    let mut connect =
        tokio::spawn(async move { endpoint.connect_with_connector(connector).await });
    let sleep = tokio::time::sleep_until(deadline);
    tokio::pin!(sleep);

    let outcome = tokio::select! {
        biased;

        () = &mut sleep => Err(expired()),

        Some(source) = failed_rx.recv() => Err(Error::Dial {
            address: address.to_string(),
            source,
        }),

        joined = &mut connect => match joined {
            Ok(Ok(_)) if Instant::now() >= deadline => Err(expired()),
            Ok(Ok(channel)) => Ok(channel),
            Ok(Err(source)) => Err(Error::Transport {
                address: address.to_string(),
                source,
            }),
            Err(join) => Err(Error::Io(io::Error::other(join))),
        },
    };

    if outcome.is_err() {
        connect.abort();
    }

    match &outcome {
        Ok(_) => tracing::debug!("connected to {address}"),
        Err(e) => tracing::debug!("dial failed: {e}"),
    }

    outcome
}

fn endpoint(address: &str, tls: Option<ClientTlsConfig>) -> Result<Endpoint> {
    let scheme = if tls.is_some() { "https" } else { "http" };
    let endpoint = Endpoint::from_shared(format!("{scheme}://{address}"))
        .map_err(|_| Error::InvalidAddress(address.to_string()))?;

    match tls {
        Some(tls) => endpoint.tls_config(tls).map_err(|source| Error::Transport {
            address: address.to_string(),
            source,
        }),
        None => Ok(endpoint),
    }
}

fn authority(uri: &Uri) -> io::Result<String> {
    let host = uri
        .host()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "missing host"))?;
    let port = uri
        .port_u16()
        .unwrap_or(if uri.scheme_str() == Some("https") { 443 } else { 80 });

    Ok(format!("{host}:{port}"))
}
