//! Lifecycle supervisor: owns the shared context, the startup order, and
//! graceful shutdown.

use amb_core::{BridgeError, BridgeResult};
use serde_json::{json, Value};
use std::os::unix::fs::PermissionsExt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, UnixListener};
use tokio::sync::broadcast;
use tracing::warn;

use crate::config::Config;
use crate::events::EventRing;
use crate::http;
use crate::listener;
use crate::registry::ClientRegistry;
use crate::router::Router;

/// Bound on how long shutdown waits for in-flight connections to close.
const SHUTDOWN_GRACE: Duration = Duration::from_millis(1500);

/// Shared daemon context threaded through the stream listener and the HTTP
/// plane.
pub struct BridgeCtx {
    pub config: Arc<Config>,
    pub registry: Arc<ClientRegistry>,
    pub router: Arc<Router>,
    pub events: Arc<EventRing>,
    next_conn_id: AtomicU64,
    active_conns: AtomicUsize,
}

impl BridgeCtx {
    pub fn next_conn_id(&self) -> u64 {
        self.next_conn_id.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn conn_opened(&self) {
        self.active_conns.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn conn_closed(&self) {
        self.active_conns.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn active_conns(&self) -> usize {
        self.active_conns.load(Ordering::Relaxed)
    }
}

/// The bridge daemon instance.
pub struct BridgeDaemon {
    ctx: Arc<BridgeCtx>,
    shutdown_tx: broadcast::Sender<()>,
}

impl BridgeDaemon {
    /// Build the daemon: freeze the registry, create the runtime directory,
    /// open the event log. Every failure here is a startup fatal.
    pub fn new(config: Config) -> BridgeResult<Self> {
        let registry = Arc::new(ClientRegistry::from_descriptors(&config.clients)?);

        // the runtime directory must exist before the socket and log land in it
        for dir in [config.socket_path.parent(), config.log_file.parent()]
            .into_iter()
            .flatten()
        {
            if !dir.as_os_str().is_empty() {
                std::fs::create_dir_all(dir).map_err(|e| {
                    BridgeError::Config(format!(
                        "cannot create runtime dir {}: {e}",
                        dir.display()
                    ))
                })?;
            }
        }

        let events = Arc::new(EventRing::new(Some(&config.log_file))?);
        let router = Arc::new(Router::new(config.queue_limit, events.clone()));

        let (shutdown_tx, _) = broadcast::channel(4);
        Ok(Self {
            ctx: Arc::new(BridgeCtx {
                config: Arc::new(config),
                registry,
                router,
                events,
                next_conn_id: AtomicU64::new(1),
                active_conns: AtomicUsize::new(0),
            }),
            shutdown_tx,
        })
    }

    pub fn ctx(&self) -> Arc<BridgeCtx> {
        self.ctx.clone()
    }

    /// Bind both listeners and serve until shutdown. Startup order: stale
    /// socket cleanup, stream bind, socket mode, HTTP bind.
    pub async fn run(&self) -> BridgeResult<()> {
        let config = self.ctx.config.clone();

        // stale socket from a previous crash; removal is best-effort
        if config.socket_path.exists() {
            if let Err(e) = std::fs::remove_file(&config.socket_path) {
                self.ctx.events.warn(
                    "startup",
                    format!(
                        "could not remove stale socket {}: {e}",
                        config.socket_path.display()
                    ),
                    Value::Null,
                );
            }
        }

        let unix = UnixListener::bind(&config.socket_path)?;
        std::fs::set_permissions(
            &config.socket_path,
            std::fs::Permissions::from_mode(config.socket_mode),
        )?;

        let http_addr = format!("{}:{}", config.http_host, config.http_port);
        let tcp = TcpListener::bind(&http_addr).await?;

        self.ctx.events.info(
            "startup",
            format!(
                "bridge listening on {} (http {http_addr})",
                config.socket_path.display()
            ),
            json!({
                "socketPath": config.socket_path.display().to_string(),
                "http": http_addr,
                "clients": self.ctx.registry.len(),
            }),
        );

        let app = http::api_router(self.ctx.clone());
        let mut http_shutdown = self.shutdown_tx.subscribe();
        let http_task = tokio::spawn(async move {
            let served = axum::serve(tcp, app)
                .with_graceful_shutdown(async move {
                    let _ = http_shutdown.recv().await;
                })
                .await;
            if let Err(e) = served {
                warn!(error = %e, "http server error");
            }
        });

        listener::run(unix, self.ctx.clone(), self.shutdown_tx.clone()).await;

        let _ = http_task.await;
        Ok(())
    }

    /// Signal-path shutdown: warn event, stop both listeners, wait briefly
    /// for connections to drain, unlink the socket. Bounded by
    /// [`SHUTDOWN_GRACE`]; in-flight writes past that are abandoned.
    pub async fn shutdown(&self) {
        self.ctx.events.warn(
            "shutdown",
            "termination signal received, shutting down",
            Value::Null,
        );
        let _ = self.shutdown_tx.send(());

        let deadline = tokio::time::Instant::now() + SHUTDOWN_GRACE;
        while self.ctx.active_conns() > 0 && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(25)).await;
        }

        if self.ctx.config.socket_path.exists() {
            if let Err(e) = std::fs::remove_file(&self.ctx.config.socket_path) {
                warn!(error = %e, "could not remove socket file");
            }
        }
    }
}
