//! TCP front end: one JSON request and one JSON response per connection.

mod handlers;
mod middleware;
mod types;

pub use handlers::handle_connection;
pub use middleware::{hash_secret, Authenticator, RateLimitState};
pub use types::*;

use crate::config::ServerConfig;
use crate::coordinator::Coordinator;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{info, warn};

/// Bounds on a single request.
#[derive(Debug, Clone, Copy)]
pub struct Limits {
    pub read_timeout: Duration,
    pub max_request_bytes: usize,
}

impl From<&ServerConfig> for Limits {
    fn from(config: &ServerConfig) -> Self {
        Self {
            read_timeout: config.read_timeout,
            max_request_bytes: config.max_request_bytes,
        }
    }
}

impl Default for Limits {
    fn default() -> Self {
        Self::from(&ServerConfig::default())
    }
}

/// State shared by every connection.
pub struct ServerState {
    /// Lease allocator
    pub coordinator: Arc<Coordinator>,
    /// Shared secret check
    pub auth: Authenticator,
    /// Global admission limit
    pub rate_limit: RateLimitState,
    /// Our tunnel public key, returned to registered clients
    pub server_public_key: Option<String>,
    /// Request bounds
    pub limits: Limits,
}

/// Listening server.
pub struct Server {
    listener: TcpListener,
    state: Arc<ServerState>,
}

impl Server {
    /// Bind the listener.
    pub async fn bind(addr: SocketAddr, state: ServerState) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            state: Arc::new(state),
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections until `shutdown` completes.
    ///
    /// Connections already accepted run to completion on their own tasks.
    pub async fn run_until<F>(self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        if let Ok(addr) = self.local_addr() {
            info!("Listening on {}", addr);
        }

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Stopping listener");
                    break;
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        tokio::spawn(handle_connection(self.state.clone(), stream, peer));
                    }
                    Err(e) => {
                        warn!(error = %e, "Accept failed");
                        tokio::time::sleep(Duration::from_millis(100)).await;
                    }
                },
            }
        }
    }
}
