//! Lease server - Entry point.

use anyhow::{Context, Result};
use lease_server::{
    config::{Config, LogConfig},
    server::{Authenticator, Limits, RateLimitState, Server, ServerState},
    CjdnsActivator, Coordinator, Store,
};
use secrecy::SecretString;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use tunnel_admin::AdminClient;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::load().context("Failed to load configuration")?;

    init_logging(&config.log);

    info!("Starting lease server v{}", env!("CARGO_PKG_VERSION"));

    let range = config.lease.range().context("Invalid lease range")?;
    info!(range = %range, "Leasing from range");

    // Initialize storage
    let store = if config.store.persist {
        Store::open(config.store.path.clone(), range.start())
            .await
            .context("Failed to open lease store")?
    } else {
        info!("Persistence disabled, using in-memory storage");
        Store::memory(range.start())
    };

    // Tunnel daemon
    let admin = AdminClient::new(
        config.tunnel.admin_socket_addr()?,
        config
            .tunnel
            .admin_password
            .clone()
            .unwrap_or_else(|| SecretString::new(String::new())),
        config.tunnel.timeout,
    );
    let activator = CjdnsActivator::new(admin, config.tunnel.prefix);
    match activator.probe().await {
        Ok(()) => info!("cjdns admin interface reachable"),
        Err(e) => warn!(error = %e, "cjdns admin interface not reachable, activations will fail"),
    }

    let coordinator = Arc::new(
        Coordinator::open(store, range, Arc::new(activator))
            .await
            .context("Failed to recover lease state")?,
    );

    // Bring the tunnel daemon in line with what is on record
    let report = coordinator
        .replay_all()
        .await
        .context("Failed to replay leases")?;
    if !report.is_complete() {
        warn!(failed = ?report.failed, "Some leases could not be activated");
    }

    #[cfg(unix)]
    spawn_reload_handler(coordinator.clone())?;

    let password = config
        .server
        .password
        .as_ref()
        .context("server.password must be set")?;

    let state = ServerState {
        coordinator,
        auth: Authenticator::new(password),
        rate_limit: RateLimitState::new(config.rate_limit.per_minute),
        server_public_key: config.tunnel.public_key.clone(),
        limits: Limits::from(&config.server),
    };

    let addr = config.server.socket_addr()?;
    let server = Server::bind(addr, state)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    server.run_until(shutdown_signal()).await;

    info!("Shutting down...");
    Ok(())
}

fn init_logging(config: &LogConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.level));

    if config.format == "json" {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

/// Replay every lease into the tunnel daemon on SIGHUP.
#[cfg(unix)]
fn spawn_reload_handler(coordinator: Arc<Coordinator>) -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut hangup = signal(SignalKind::hangup()).context("Failed to install SIGHUP handler")?;

    tokio::spawn(async move {
        while hangup.recv().await.is_some() {
            info!("SIGHUP received, replaying leases");
            match coordinator.replay_all().await {
                Ok(report) if !report.is_complete() => {
                    warn!(failed = ?report.failed, "Some leases could not be activated");
                }
                Ok(_) => {}
                Err(e) => error!(error = %e, "Replay failed"),
            }
        }
    });

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut s) => {
                s.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!("Shutdown signal received");
}
