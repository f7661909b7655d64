//! TCP readiness probing for freshly created instances.

use std::io;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use thiserror::Error;
use tokio::net::TcpStream;
use tokio::time::{Instant, sleep, timeout};
use tracing::{debug, info, warn};

/// Port probed before remote configuration starts.
pub const DEFAULT_SSH_PORT: u16 = 22;
/// Delay between connection attempts.
pub const DEFAULT_PROBE_INTERVAL: Duration = Duration::from_secs(2);
/// Upper bound on a single connection attempt.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// Raised when the host never accepts a connection in time.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error("{address} not reachable after {} seconds ({attempts} attempts)", timeout.as_secs())]
pub struct ReadinessError {
    /// Socket address that was probed.
    pub address: SocketAddr,
    /// Total time allowed.
    pub timeout: Duration,
    /// Connection attempts made.
    pub attempts: u32,
}

/// Polls a TCP port until it accepts a connection.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ReadinessProber {
    port: u16,
    poll_interval: Duration,
    connect_timeout: Duration,
}

impl Default for ReadinessProber {
    fn default() -> Self {
        Self {
            port: DEFAULT_SSH_PORT,
            poll_interval: DEFAULT_PROBE_INTERVAL,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

impl ReadinessProber {
    /// Overrides the probed port.
    #[must_use]
    pub const fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Overrides the delay between attempts.
    #[must_use]
    pub const fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Overrides the per-attempt connect timeout.
    #[must_use]
    pub const fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }

    /// Port the prober connects to.
    #[must_use]
    pub const fn port(&self) -> u16 {
        self.port
    }

    /// Blocks until `host` accepts a TCP connection or `limit` elapses.
    ///
    /// Each connection is closed straight away. With the defaults a 6 s limit
    /// allows at most three attempts.
    ///
    /// # Errors
    ///
    /// Returns [`ReadinessError`] when no attempt succeeds before the deadline.
    pub async fn wait_until_ready(&self, host: IpAddr, limit: Duration) -> Result<(), ReadinessError> {
        let address = SocketAddr::new(host, self.port);
        self.poll(address, limit, |address| async move {
            TcpStream::connect(address).await.map(drop)
        })
        .await
    }

    async fn poll<F, Fut>(
        &self,
        address: SocketAddr,
        limit: Duration,
        mut connect: F,
    ) -> Result<(), ReadinessError>
    where
        F: FnMut(SocketAddr) -> Fut,
        Fut: Future<Output = io::Result<()>>,
    {
        let deadline = Instant::now() + limit;
        let mut attempts = 0_u32;

        info!(%address, timeout_secs = limit.as_secs(), "waiting for host to accept connections");
        loop {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            attempts += 1;
            let budget = self.connect_timeout.min(deadline - now);
            match timeout(budget, connect(address)).await {
                Ok(Ok(())) => {
                    info!(%address, attempts, "host is ready");
                    return Ok(());
                }
                Ok(Err(err)) => debug!(%address, attempts, error = %err, "connection refused"),
                Err(_) => debug!(%address, attempts, "connection attempt timed out"),
            }
            sleep(self.poll_interval).await;
        }

        warn!(%address, attempts, "host not ready before timeout");
        Err(ReadinessError {
            address,
            timeout: limit,
            attempts,
        })
    }
}
