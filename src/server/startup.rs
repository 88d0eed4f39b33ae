//! Testable server startup logic.
//!
//! Provides [`ServerConfig`] and [`ServerHandle`] so integration tests can
//! start a real server on an ephemeral port, drive its endpoints and shut it
//! down cleanly. `main.rs` goes through the same path.

use std::future::Future;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::hooks::{HookError, HookRegistry, HookService};
use crate::logging::targets;
use crate::server::http::{create_router, HttpConfig};

/// Time in-flight requests get to finish once shutdown starts
pub const SHUTDOWN_GRACE_PERIOD: Duration = Duration::from_secs(10);

/// Everything needed to start a server.
pub struct ServerConfig {
    pub http_config: HttpConfig,
    pub service: Arc<HookService>,
    pub bind_address: SocketAddr,
}

impl ServerConfig {
    /// Minimal config suitable for integration tests.
    ///
    /// Binds to `127.0.0.1:0` (OS-assigned port) with the given admin token.
    pub fn for_testing(service: Arc<HookService>, admin_token: &str) -> Self {
        ServerConfig {
            http_config: HttpConfig {
                admin_token: admin_token.to_string(),
                ..Default::default()
            },
            service,
            bind_address: SocketAddr::from(([127, 0, 0, 1], 0)),
        }
    }

    /// Assemble from a validated [`Config`]: create the storage and flags
    /// directories and open the hook store.
    pub fn from_config(config: &Config) -> Result<Self, Box<dyn std::error::Error>> {
        let storage_path = config.hooks.storage_path.as_path();
        let flags_dir = config.hooks.flags_dir.as_path();

        ensure_dir(storage_path.parent().unwrap_or(Path::new("")))?;
        ensure_dir(flags_dir)?;

        let registry = HookRegistry::open(storage_path)?;
        info!(
            target: targets::SERVER,
            path = %storage_path.display(),
            hooks = registry.len(),
            "hook store loaded"
        );

        let service = Arc::new(HookService::new(Arc::new(registry), flags_dir));
        let bind_address = resolve_bind_address(&config.server.host, config.server.port)?;

        Ok(ServerConfig {
            http_config: HttpConfig::from_settings(&config.server),
            service,
            bind_address,
        })
    }
}

fn ensure_dir(dir: &Path) -> Result<(), HookError> {
    if dir.as_os_str().is_empty() {
        return Ok(());
    }
    std::fs::create_dir_all(dir)
        .map_err(|e| HookError::io(format!("failed to create directory {}", dir.display()), e))
}

/// Resolve `host:port`; hostnames such as `localhost` go through the resolver.
fn resolve_bind_address(host: &str, port: u16) -> Result<SocketAddr, std::io::Error> {
    use std::net::ToSocketAddrs;

    (host, port).to_socket_addrs()?.next().ok_or_else(|| {
        std::io::Error::new(
            std::io::ErrorKind::AddrNotAvailable,
            format!("could not resolve bind address {}:{}", host, port),
        )
    })
}

/// Handle to a running server.  Returned by [`run_server_with_config`].
pub struct ServerHandle {
    local_addr: SocketAddr,
    shutdown_tx: watch::Sender<bool>,
    server_task: JoinHandle<Result<(), std::io::Error>>,
}

impl ServerHandle {
    /// The port the server actually bound to (useful when binding to port 0).
    pub fn port(&self) -> u16 {
        self.local_addr.port()
    }

    /// The full local address (ip + port).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// `http://ip:port` base URL for the running server.
    pub fn base_url(&self) -> String {
        format!("http://{}", self.local_addr)
    }

    /// Stop accepting connections and wait for in-flight requests, bounded
    /// by [`SHUTDOWN_GRACE_PERIOD`].
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        self.wait().await;
    }

    /// Run until `signal` resolves, then shut down gracefully.
    pub async fn run_until<F>(self, signal: F)
    where
        F: Future<Output = ()>,
    {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        tokio::select! {
            _ = signal => {
                info!(target: targets::SERVER, "shutdown signal received, draining requests");
            }
            _ = shutdown_rx.changed() => {}
        }
        self.shutdown().await;
    }

    async fn wait(self) {
        match tokio::time::timeout(SHUTDOWN_GRACE_PERIOD, self.server_task).await {
            Ok(Ok(Ok(()))) => info!(target: targets::SERVER, "server stopped"),
            Ok(Ok(Err(e))) => error!(target: targets::SERVER, error = %e, "server task returned error"),
            Ok(Err(e)) => error!(target: targets::SERVER, error = %e, "server task panicked"),
            Err(_) => warn!(
                target: targets::SERVER,
                "server did not finish within {}s, forcing exit",
                SHUTDOWN_GRACE_PERIOD.as_secs()
            ),
        }
    }
}

/// Start a server from a fully-assembled [`ServerConfig`].
///
/// Returns a [`ServerHandle`] that exposes the actual bound address and
/// provides a [`ServerHandle::shutdown`] method for clean teardown.
pub async fn run_server_with_config(
    config: ServerConfig,
) -> Result<ServerHandle, Box<dyn std::error::Error>> {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let base_path = config.http_config.base_path.clone();
    let app = create_router(config.http_config, config.service);

    // Port 0 gets an ephemeral port
    let listener = tokio::net::TcpListener::bind(config.bind_address).await?;
    let local_addr = listener.local_addr()?;
    info!(
        target: targets::SERVER,
        addr = %local_addr,
        base_path = %base_path,
        "server listening"
    );

    let mut shutdown_watch = shutdown_rx;
    let server_task = tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move {
            loop {
                if *shutdown_watch.borrow() {
                    break;
                }
                if shutdown_watch.changed().await.is_err() {
                    break;
                }
            }
        })
        .await
    });

    Ok(ServerHandle {
        local_addr,
        shutdown_tx,
        server_task,
    })
}
