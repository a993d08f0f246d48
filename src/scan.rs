//! Bounded-concurrency reachability scanning.
//!
//! A [`ScanJob`] probes every `host × port` pair on its own task, admitted
//! through a semaphore so that sweeping a whole /24 cannot exhaust file
//! descriptors. Reachable addresses are streamed back in completion order;
//! failed probes are silently omitted.
//!
//! The returned stream ends once every probe has finished. Dropping it early
//! cancels probes that have not completed yet.

use std::io;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::sync::{Semaphore, mpsc};
use tokio_stream::wrappers::ReceiverStream;

use crate::error::{Error, Result};

/// Default number of probes in flight.
pub const DEFAULT_CONCURRENCY: usize = 256;

/// Connect attempts per TCP probe while file descriptors are exhausted.
pub const MAX_FD_ATTEMPTS: u32 = 3;

/// How a pair is probed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Protocol {
    /// Plain TCP connect.
    Tcp,
    /// HTTP `HEAD` over plaintext.
    Http,
    /// HTTP `HEAD` over TLS, without certificate verification.
    Https,
}

impl std::str::FromStr for Protocol {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "tcp" => Ok(Self::Tcp),
            "http" => Ok(Self::Http),
            "https" => Ok(Self::Https),
            other => Err(Error::Protocol(format!("unknown scan protocol {other:?}"))),
        }
    }
}

/// A set of hosts and ports to probe.
#[derive(Clone, Debug)]
pub struct ScanJob {
    hosts: Vec<String>,
    ports: Vec<u16>,
    protocol: Protocol,
    concurrency: usize,
    timeout: Duration,
}

impl ScanJob {
    /// Creates a job probing every host on every port.
    #[must_use]
    pub fn new(hosts: Vec<String>, ports: Vec<u16>, protocol: Protocol) -> Self {
        Self {
            hosts,
            ports,
            protocol,
            concurrency: DEFAULT_CONCURRENCY,
            timeout: Duration::from_secs(1),
        }
    }

    /// Sets the maximum number of probes in flight.
    #[must_use]
    pub fn concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Sets the per-probe timeout.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Starts the scan and returns a stream of reachable `host:port` strings.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Fails only if the HTTP client cannot be built.
    pub fn run(self) -> Result<ReceiverStream<String>> {
        let prober = Prober::new(self.protocol, self.timeout)?;
        let (tx, rx) = mpsc::channel(self.concurrency);

        tokio::spawn(async move {
            let semaphore = Arc::new(Semaphore::new(self.concurrency));
            let prober = Arc::new(prober);

            'hosts: for host in &self.hosts {
                for port in &self.ports {
                    let permit = tokio::select! {
                        permit = semaphore.clone().acquire_owned() => match permit {
                            Ok(permit) => permit,
                            Err(_) => break 'hosts,
                        },
                        () = tx.closed() => break 'hosts,
                    };

                    let address = join_host_port(host, *port);
                    let prober = prober.clone();
                    let tx = tx.clone();
                    tokio::spawn(async move {
                        let _permit = permit;
                        let open = tokio::select! {
                            open = prober.probe(&address) => open,
                            () = tx.closed() => false,
                        };

                        if open {
                            let _ = tx.send(address).await;
                        }
                    });
                }
            }

            // Each probe task holds a sender clone, so the stream ends when
            // the last one finishes.
            tracing::debug!(
                "scan of {} hosts x {} ports dispatched",
                self.hosts.len(),
                self.ports.len()
            );
        });

        Ok(ReceiverStream::new(rx))
    }
}

/// Scans `hosts × ports` with default settings.
///
/// # Errors
///
/// Fails only if the HTTP client cannot be built.
pub fn scan(
    hosts: Vec<String>,
    ports: Vec<u16>,
    protocol: Protocol,
    timeout: Duration,
) -> Result<ReceiverStream<String>> {
    ScanJob::new(hosts, ports, protocol).timeout(timeout).run()
}

/// Hosts of the /24 network containing `addr`, excluding network and broadcast.
#[must_use]
pub fn subnet_hosts(addr: Ipv4Addr) -> Vec<String> {
    match ipnet::Ipv4Net::new(addr, 24) {
        Ok(net) => net.trunc().hosts().map(|ip| ip.to_string()).collect(),
        Err(_) => Vec::new(),
    }
}

/// Joins a host and port, bracketing IPv6 literals.
#[must_use]
pub fn join_host_port(host: &str, port: u16) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("[{host}]:{port}")
    } else {
        format!("{host}:{port}")
    }
}

struct Prober {
    protocol: Protocol,
    timeout: Duration,
    http: Option<reqwest::Client>,
}

impl Prober {
    fn new(protocol: Protocol, timeout: Duration) -> Result<Self> {
        let http = match protocol {
            Protocol::Tcp => None,
            Protocol::Http | Protocol::Https => Some(
                reqwest::Client::builder()
                    .danger_accept_invalid_certs(true)
                    .connect_timeout(timeout)
                    .timeout(timeout)
                    .build()
                    .map_err(|e| Error::http("scanner", e))?,
            ),
        };

        Ok(Self {
            protocol,
            timeout,
            http,
        })
    }

    async fn probe(&self, address: &str) -> bool {
        match (self.protocol, &self.http) {
            (Protocol::Http, Some(http)) => head(http, "http", address).await,
            (Protocol::Https, Some(http)) => head(http, "https", address).await,
            _ => probe_tcp(address, self.timeout, connect_tcp).await,
        }
    }
}

/// Any HTTP round-trip counts as open, whatever the status.
async fn head(http: &reqwest::Client, scheme: &str, address: &str) -> bool {
    http.head(format!("{scheme}://{address}")).send().await.is_ok()
}

async fn connect_tcp(address: String) -> io::Result<()> {
    TcpStream::connect(address).await.map(drop)
}

/// Retries only on fd exhaustion, sleeping `timeout` between attempts.
async fn probe_tcp<F, Fut>(address: &str, timeout: Duration, connect: F) -> bool
where
    F: Fn(String) -> Fut,
    Fut: Future<Output = io::Result<()>>,
{
    let mut attempt = 1;
    loop {
        match tokio::time::timeout(timeout, connect(address.to_string())).await {
            Ok(Ok(())) => return true,
            Ok(Err(e)) if is_fd_exhaustion(&e) && attempt < MAX_FD_ATTEMPTS => {
                tracing::warn!("probe {address}: {e}, attempt {attempt}/{MAX_FD_ATTEMPTS}");
                attempt += 1;
                tokio::time::sleep(timeout).await;
            }
            _ => return false,
        }
    }
}

fn is_fd_exhaustion(e: &io::Error) -> bool {
    matches!(e.raw_os_error(), Some(libc::EMFILE | libc::ENFILE))
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use futures::StreamExt;
    use tokio::net::TcpListener;

    use super::*;

    async fn closed_port() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        port
    }

    #[tokio::test]
    async fn tcp_scan_yields_only_open_ports() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let open = listener.local_addr().unwrap().port();
        let closed = closed_port().await;

        let found: Vec<String> = scan(
            vec!["127.0.0.1".to_string()],
            vec![open, closed],
            Protocol::Tcp,
            Duration::from_millis(500),
        )
        .unwrap()
        .collect()
        .await;

        assert_eq!(found, vec![format!("127.0.0.1:{open}")]);
    }

    #[tokio::test]
    async fn scan_with_no_pairs_terminates() {
        let found: Vec<String> =
            scan(Vec::new(), vec![80], Protocol::Tcp, Duration::from_millis(100))
                .unwrap()
                .collect()
                .await;

        assert!(found.is_empty());
    }

    #[tokio::test]
    async fn scan_with_nothing_open_terminates() {
        let closed = closed_port().await;
        let found: Vec<String> = ScanJob::new(
            vec!["127.0.0.1".to_string()],
            vec![closed],
            Protocol::Tcp,
        )
        .concurrency(1)
        .timeout(Duration::from_millis(200))
        .run()
        .unwrap()
        .collect()
        .await;

        assert!(found.is_empty());
    }

    #[tokio::test]
    async fn every_open_pair_reported_once() {
        let mut listeners = Vec::new();
        let mut ports = Vec::new();
        for _ in 0..5 {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            ports.push(listener.local_addr().unwrap().port());
            listeners.push(listener);
        }

        let mut found: Vec<String> = ScanJob::new(
            vec!["127.0.0.1".to_string()],
            ports.clone(),
            Protocol::Tcp,
        )
        .concurrency(2)
        .run()
        .unwrap()
        .collect()
        .await;
        found.sort();

        let mut expected: Vec<String> = ports.iter().map(|p| format!("127.0.0.1:{p}")).collect();
        expected.sort();
        assert_eq!(found, expected);
    }

    #[tokio::test]
    async fn http_probe_accepts_any_response() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            use tokio::io::{AsyncReadExt, AsyncWriteExt};

            while let Ok((mut socket, _)) = listener.accept().await {
                let mut buf = [0_u8; 1024];
                let _ = socket.read(&mut buf).await;
                let _ = socket
                    .write_all(b"HTTP/1.1 404 Not Found\r\ncontent-length: 0\r\n\r\n")
                    .await;
            }
        });

        let found: Vec<String> = scan(
            vec!["127.0.0.1".to_string()],
            vec![port],
            Protocol::Http,
            Duration::from_secs(2),
        )
        .unwrap()
        .collect()
        .await;

        assert_eq!(found, vec![format!("127.0.0.1:{port}")]);
    }

    #[test]
    fn protocol_from_str() {
        assert_eq!("tcp".parse::<Protocol>().unwrap(), Protocol::Tcp);
        assert_eq!("https".parse::<Protocol>().unwrap(), Protocol::Https);
        assert!("udp".parse::<Protocol>().is_err());
    }

    #[test]
    fn subnet_hosts_covers_slash_24() {
        let hosts = subnet_hosts(Ipv4Addr::new(10, 1, 2, 1));

        assert_eq!(hosts.len(), 254);
        assert_eq!(hosts.first().map(String::as_str), Some("10.1.2.1"));
        assert_eq!(hosts.last().map(String::as_str), Some("10.1.2.254"));
    }

    #[test]
    fn join_host_port_brackets_ipv6() {
        assert_eq!(join_host_port("10.0.0.1", 10255), "10.0.0.1:10255");
        assert_eq!(join_host_port("::1", 15010), "[::1]:15010");
        assert_eq!(join_host_port("[::1]", 15010), "[::1]:15010");
    }

    #[test]
    fn fd_exhaustion_detection() {
        assert!(is_fd_exhaustion(&io::Error::from_raw_os_error(libc::EMFILE)));
        assert!(!is_fd_exhaustion(&io::Error::from(io::ErrorKind::ConnectionRefused)));
    }

    #[tokio::test]
    async fn tcp_probe_gives_up_on_refusal() {
        let closed = closed_port().await;
        let address = format!("127.0.0.1:{closed}");
        assert!(!probe_tcp(&address, Duration::from_millis(200), connect_tcp).await);
    }

    #[tokio::test]
    async fn fd_exhaustion_is_retried_a_bounded_number_of_times() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let open = probe_tcp("10.0.0.1:10255", Duration::from_millis(10), move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>(io::Error::from_raw_os_error(libc::EMFILE)) }
        })
        .await;

        assert!(!open);
        assert_eq!(calls.load(Ordering::SeqCst), MAX_FD_ATTEMPTS);
    }

    #[tokio::test]
    async fn fd_exhaustion_recovers_once_descriptors_free_up() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let open = probe_tcp("10.0.0.1:10255", Duration::from_millis(10), move |_| {
            let call = counter.fetch_add(1, Ordering::SeqCst);
            async move {
                if call == 0 {
                    Err(io::Error::from_raw_os_error(libc::EMFILE))
                } else {
                    Ok(())
                }
            }
        })
        .await;

        assert!(open);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn other_errors_are_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let open = probe_tcp("10.0.0.1:10255", Duration::from_millis(10), move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>(io::Error::from(io::ErrorKind::ConnectionRefused)) }
        })
        .await;

        assert!(!open);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn dropping_the_stream_stops_probing() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let accepted = Arc::new(AtomicU32::new(0));
        let counter = accepted.clone();
        tokio::spawn(async move {
            while listener.accept().await.is_ok() {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        let hosts = vec!["127.0.0.1".to_string(); 200];
        let mut found = ScanJob::new(hosts, vec![port], Protocol::Tcp)
            .concurrency(1)
            .timeout(Duration::from_millis(500))
            .run()
            .unwrap();
        assert!(found.next().await.is_some());
        drop(found);

        tokio::time::sleep(Duration::from_millis(200)).await;
        let settled = accepted.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(300)).await;

        assert_eq!(accepted.load(Ordering::SeqCst), settled);
        assert!(settled < 200, "{settled} probes ran after the stream was dropped");
    }
}
