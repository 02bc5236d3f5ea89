//! Accept loop and per-connection serving.
//!
//! # Responsibilities
//! - Accept TCP connections within the listener's connection limit
//! - Serve each connection with hyper's auto builder (HTTP/1.1 or h2c)
//! - Hand every request to the protocol mux
//! - On shutdown: stop accepting, ask connections to finish, wait for
//!   them up to the drain timeout

use std::convert::Infallible;
use std::net::SocketAddr;
use std::time::Duration;

use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use tokio::net::TcpStream;
use tokio::sync::broadcast;

use crate::http::mux::ProtocolMux;
use crate::net::{ConnectionPermit, ConnectionTracker, Listener, ListenerError};

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error(transparent)]
    Listener(#[from] ListenerError),
    #[error("failed to read local address: {0}")]
    LocalAddr(#[source] std::io::Error),
}

/// The single-port server: gRPC and HTTP/JSON on the same listener.
#[derive(Debug)]
pub struct MeshServer {
    mux: ProtocolMux,
    tracker: ConnectionTracker,
    drain_timeout: Duration,
}

impl MeshServer {
    pub fn new(mux: ProtocolMux, drain_timeout: Duration) -> Self {
        Self {
            mux,
            tracker: ConnectionTracker::new(),
            drain_timeout,
        }
    }

    pub fn tracker(&self) -> &ConnectionTracker {
        &self.tracker
    }

    /// Serve until `shutdown` fires, then drain.
    pub async fn run(
        self,
        listener: Listener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), ServerError> {
        let addr = listener.local_addr().map_err(ServerError::LocalAddr)?;
        tracing::info!(address = %addr, "Mesh server starting");

        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer, permit)) => self.spawn_connection(stream, peer, permit),
                    Err(ListenerError::Accept(e)) => {
                        // Usually fd exhaustion; back off instead of spinning.
                        tracing::warn!(error = %e, "Accept failed");
                        tokio::time::sleep(Duration::from_millis(50)).await;
                    }
                    Err(e) => return Err(e.into()),
                },
                _ = shutdown.recv() => {
                    tracing::info!("Shutdown requested, no longer accepting connections");
                    break;
                }
            }
        }
        drop(listener);

        self.tracker.begin_drain();
        let active = self.tracker.active_count();
        if active > 0 {
            tracing::info!(active, timeout = ?self.drain_timeout, "Draining connections");
        }
        if self.tracker.wait_idle(self.drain_timeout).await {
            tracing::info!("Mesh server stopped");
        } else {
            tracing::warn!(
                remaining = self.tracker.active_count(),
                "Drain timeout elapsed, abandoning connections"
            );
        }
        Ok(())
    }

    fn spawn_connection(&self, stream: TcpStream, peer: SocketAddr, permit: ConnectionPermit) {
        let mux = self.mux.clone();
        let guard = self.tracker.track();
        let mut drain = self.tracker.drain_signal();

        tokio::spawn(async move {
            let _permit = permit;
            let connection_id = guard.id();
            tracing::debug!(connection_id = %connection_id, peer_addr = %peer, "Serving connection");

            let service = service_fn(move |request: hyper::Request<Incoming>| {
                let mux = mux.clone();
                async move {
                    let response = mux.route(request.map(axum::body::Body::new)).await;
                    Ok::<_, Infallible>(response)
                }
            });

            let builder = auto::Builder::new(TokioExecutor::new());
            let conn = builder.serve_connection(TokioIo::new(stream), service);
            tokio::pin!(conn);

            let result = tokio::select! {
                result = conn.as_mut() => result,
                _ = drain.wait() => {
                    conn.as_mut().graceful_shutdown();
                    conn.await
                }
            };
            if let Err(e) = result {
                tracing::debug!(connection_id = %connection_id, error = %e, "Connection ended with error");
            }
            drop(guard);
        });
    }
}
