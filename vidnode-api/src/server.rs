//! Worker HTTP server with hot restart.
//!
//! Every worker binds the same address with `SO_REUSEPORT` and the kernel
//! spreads connections across them. HTTP and WebSocket share the listener.

use anyhow::Context;
use axum::Router;
use hyper_util::rt::{TokioExecutor, TokioIo, TokioTimer};
use hyper_util::server::conn::auto;
use hyper_util::service::TowerToHyperService;
use parking_lot::Mutex;
use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use std::collections::HashSet;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::task::JoinHandle;
use tokio_rustls::server::TlsStream;
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};
use uuid::Uuid;
use vidnode_core::config::TlsConfig;

use crate::http::create_router;
use crate::runtime::AppState;

const LISTEN_BACKLOG: u32 = 1024;
const TLS_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
/// Idle keep-alive connections are closed after this long without a new
/// request. Request bodies themselves are never timed out.
pub const KEEP_ALIVE_TIMEOUT: Duration = Duration::from_secs(10);

struct RunningServer {
    address: SocketAddr,
    tls: bool,
    shutdown: CancellationToken,
    task: JoinHandle<()>,
}

pub struct HttpServer {
    state: AppState,
    running: tokio::sync::Mutex<Option<RunningServer>>,
    handled_restarts: Mutex<HashSet<Uuid>>,
}

impl HttpServer {
    #[must_use]
    pub fn new(state: AppState) -> Self {
        Self {
            state,
            running: tokio::sync::Mutex::new(None),
            handled_restarts: Mutex::new(HashSet::new()),
        }
    }

    /// Bind and serve with the current configuration.
    pub async fn start(&self) -> anyhow::Result<SocketAddr> {
        let mut running = self.running.lock().await;
        if let Some(server) = running.as_ref() {
            return Ok(server.address);
        }
        let server = self.spawn_server().await?;
        let address = server.address;
        *running = Some(server);
        drop(running);

        if let Err(e) = self.state.link.announce_listening(address.to_string()) {
            warn!(error = %e, "Failed to announce listener to coordinator");
        }
        Ok(address)
    }

    /// Restart once per `restart_id`; repeats are ignored.
    pub async fn restart_once(&self, restart_id: Uuid) -> anyhow::Result<Option<SocketAddr>> {
        if !self.handled_restarts.lock().insert(restart_id) {
            debug!(restart_id = %restart_id, "Restart already handled");
            return Ok(None);
        }
        self.restart().await.map(Some)
    }

    /// Tear the server down in order, reload configuration and start again.
    ///
    /// 1. WebSockets get a close frame, bounded wait for the flush
    /// 2. in-flight HTTP requests drain, bounded, then the rest are cut
    /// 3. the WebSocket side is reset
    /// 4. the listener is gone once the serve task has ended
    /// 5. configuration is reloaded and the server started again
    ///
    /// If the reloaded configuration cannot be served, the previous one is
    /// put back and started instead. An error means the worker is left
    /// without a listener.
    pub async fn restart(&self) -> anyhow::Result<SocketAddr> {
        let mut running = self.running.lock().await;
        info!(worker_id = self.state.worker_id, "Restarting HTTP server");

        let previous = self.state.config();
        if let Some(server) = running.take() {
            self.stop_server(server).await;
        }

        let config = self.state.reload_config();
        debug!(address = %config.http_address(), tls = config.server.tls.enabled, "Configuration reloaded");

        let server = match self.spawn_server().await {
            Ok(server) => server,
            Err(e) if !Arc::ptr_eq(&config, &previous) => {
                warn!(
                    worker_id = self.state.worker_id,
                    error = format!("{e:#}"),
                    "Reloaded configuration cannot be served, falling back to the previous one"
                );
                self.state.restore_config(previous);
                self.spawn_server()
                    .await
                    .context("HTTP server failed to start with the previous configuration")?
            }
            Err(e) => return Err(e),
        };
        let address = server.address;
        *running = Some(server);
        drop(running);

        if let Err(e) = self.state.link.announce_listening(address.to_string()) {
            warn!(error = %e, "Failed to announce listener to coordinator");
        }
        info!(worker_id = self.state.worker_id, address = %address, "HTTP server restarted");
        Ok(address)
    }

    /// Stop serving for good.
    pub async fn stop(&self) {
        if let Some(server) = self.running.lock().await.take() {
            self.stop_server(server).await;
        }
    }

    async fn stop_server(&self, server: RunningServer) {
        let config = self.state.config();
        let RunningServer {
            address,
            tls,
            shutdown,
            mut task,
        } = server;

        let closed = self
            .state
            .sockets
            .close_all(Duration::from_millis(config.server.ws_close_timeout_ms))
            .await;
        debug!(address = %address, sockets = closed, "WebSockets closed");

        shutdown.cancel();
        let drain = Duration::from_secs(config.server.drain_timeout_secs);
        if tokio::time::timeout(drain, &mut task).await.is_err() {
            warn!(address = %address, "In-flight requests did not drain in time, terminating");
            task.abort();
            let _ = task.await;
        }

        self.state.sockets.reset();
        info!(address = %address, tls, "HTTP server stopped");
    }

    async fn spawn_server(&self) -> anyhow::Result<RunningServer> {
        let config = self.state.config();
        let http_address = config.http_address();
        let addr: SocketAddr = tokio::net::lookup_host(&http_address)
            .await
            .with_context(|| format!("Invalid HTTP address '{http_address}'"))?
            .next()
            .with_context(|| format!("HTTP address '{http_address}' did not resolve"))?;

        let listener = bind_shared(addr).with_context(|| format!("Failed to bind HTTP address {addr}"))?;
        let address = listener.local_addr()?;
        let router = create_router(self.state.clone());
        let shutdown = CancellationToken::new();

        let tls = config.server.tls.enabled;
        let task = if tls {
            let acceptor = load_tls_acceptor(&config.server.tls)?;
            let listener = TlsListener { inner: listener, acceptor };
            tokio::spawn(serve(listener, router, shutdown.clone()))
        } else {
            tokio::spawn(serve(listener, router, shutdown.clone()))
        };

        info!(
            worker_id = self.state.worker_id,
            address = %address,
            tls,
            "HTTP server listening"
        );
        Ok(RunningServer {
            address,
            tls,
            shutdown,
            task,
        })
    }
}

/// Accept loop. Each connection is served with upgrades (WebSocket) and the
/// keep-alive idle limit. On `shutdown` the listener is dropped, every
/// connection is asked to finish gracefully and the loop waits for them.
async fn serve<L>(mut listener: L, router: Router, shutdown: CancellationToken)
where
    L: axum::serve::Listener<Addr = SocketAddr>,
{
    let connections = TaskTracker::new();
    loop {
        let (io, peer) = tokio::select! {
            accepted = listener.accept() => accepted,
            () = shutdown.cancelled() => break,
        };
        let service = TowerToHyperService::new(router.clone());
        let shutdown = shutdown.clone();

        connections.spawn(async move {
            let mut builder = auto::Builder::new(TokioExecutor::new());
            builder
                .http1()
                .timer(TokioTimer::new())
                .header_read_timeout(KEEP_ALIVE_TIMEOUT);

            let connection = builder.serve_connection_with_upgrades(TokioIo::new(io), service);
            tokio::pin!(connection);
            let result = tokio::select! {
                result = connection.as_mut() => result,
                () = shutdown.cancelled() => {
                    connection.as_mut().graceful_shutdown();
                    connection.await
                }
            };
            if let Err(e) = result {
                debug!(peer = %peer, error = %e, "Connection ended with error");
            }
        });
    }

    drop(listener);
    connections.close();
    connections.wait().await;
    debug!("All HTTP connections finished");
}

/// Bind so that every worker can listen on the same port.
fn bind_shared(addr: SocketAddr) -> io::Result<TcpListener> {
    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()?
    } else {
        TcpSocket::new_v6()?
    };
    socket.set_reuseaddr(true)?;
    #[cfg(unix)]
    socket.set_reuseport(true)?;
    socket.bind(addr)?;
    socket.listen(LISTEN_BACKLOG)
}

fn load_tls_acceptor(tls: &TlsConfig) -> anyhow::Result<TlsAcceptor> {
    let cert_path = tls.cert_path.as_deref().context("server.tls.cert_path is not set")?;
    let key_path = tls.key_path.as_deref().context("server.tls.key_path is not set")?;

    let certs = CertificateDer::pem_file_iter(cert_path)
        .with_context(|| format!("Failed to open certificate {cert_path}"))?
        .collect::<Result<Vec<_>, _>>()
        .with_context(|| format!("Failed to parse certificate {cert_path}"))?;
    let key = PrivateKeyDer::from_pem_file(key_path)
        .with_context(|| format!("Failed to load private key {key_path}"))?;

    let config = rustls::ServerConfig::builder_with_provider(Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_safe_default_protocol_versions()
    .context("Unsupported TLS protocol configuration")?
    .with_no_client_auth()
    .with_single_cert(certs, key)
    .context("Invalid TLS certificate or key")?;

    Ok(TlsAcceptor::from(Arc::new(config)))
}

/// TCP listener that completes the TLS handshake before handing the
/// connection to axum. Failed handshakes are logged and skipped.
struct TlsListener {
    inner: TcpListener,
    acceptor: TlsAcceptor,
}

impl axum::serve::Listener for TlsListener {
    type Io = TlsStream<TcpStream>;
    type Addr = SocketAddr;

    async fn accept(&mut self) -> (Self::Io, Self::Addr) {
        loop {
            let (stream, peer) = match self.inner.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    debug!(error = %e, "TCP accept failed");
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    continue;
                }
            };
            match tokio::time::timeout(TLS_HANDSHAKE_TIMEOUT, self.acceptor.accept(stream)).await {
                Ok(Ok(tls)) => return (tls, peer),
                Ok(Err(e)) => debug!(peer = %peer, error = %e, "TLS handshake failed"),
                Err(_) => debug!(peer = %peer, "TLS handshake timed out"),
            }
        }
    }

    fn local_addr(&self) -> io::Result<Self::Addr> {
        self.inner.local_addr()
    }
}
