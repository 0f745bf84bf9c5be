//! TCP server loop

use std::net::SocketAddr;
use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use sockrpc_transport::frame_codec;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::{Duration, sleep};
use tokio_util::codec::Framed;
use tracing::{debug, info, trace, warn};

use crate::config::ServerConfig;
use crate::error::ServerResult;
use crate::lifecycle::{ServerLifecycle, ShutdownHandle, ShutdownSignal};
use crate::registry::ServiceRegistry;

/// Reply-side RPC server
///
/// Each accepted connection is served sequentially: one request is read,
/// dispatched and answered before the next is read. Handlers across all
/// connections share a concurrency limit.
pub struct Server {
    config: ServerConfig,
    registry: Arc<ServiceRegistry>,
    listener: TcpListener,
    local_addr: SocketAddr,
    lifecycle: Arc<ServerLifecycle>,
    limiter: Arc<Semaphore>,
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("config", &self.config)
            .field("local_addr", &self.local_addr)
            .field("registry", &self.registry)
            .finish()
    }
}

impl Server {
    /// Validate `config` and bind the listening socket
    pub async fn bind(config: ServerConfig, registry: Arc<ServiceRegistry>) -> ServerResult<Self> {
        config.validate()?;
        let listener = TcpListener::bind((config.bind_address.as_str(), config.port)).await?;
        let local_addr = listener.local_addr()?;
        info!(
            %local_addr,
            services = registry.service_count(),
            methods = registry.method_count(),
            "Server bound"
        );

        Ok(Self {
            limiter: Arc::new(Semaphore::new(config.max_concurrent_requests)),
            config,
            registry,
            listener,
            local_addr,
            lifecycle: Arc::new(ServerLifecycle::new()),
        })
    }

    /// Address the server is listening on
    #[must_use]
    pub const fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Get server configuration
    #[must_use]
    pub const fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Get a handle that stops [`serve`](Self::serve)
    #[must_use]
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle::new(Arc::clone(&self.lifecycle))
    }

    /// Accept and serve connections until shutdown is requested
    ///
    /// Returns once every open connection has finished its current request.
    pub async fn serve(self) -> ServerResult<()> {
        let Self {
            config,
            registry,
            listener,
            local_addr,
            lifecycle,
            limiter,
        } = self;

        let mut shutdown = lifecycle.shutdown_signal();
        if !lifecycle.start().await {
            lifecycle.stopped().await;
            return Ok(());
        }
        info!(%local_addr, "Serving");

        let mut connections = JoinSet::new();
        loop {
            tokio::select! {
                _ = shutdown.recv() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        trace!(%peer, "Accepted connection");
                        connections.spawn(serve_connection(
                            stream,
                            peer,
                            Arc::clone(&registry),
                            Arc::clone(&limiter),
                            config.max_frame_length,
                            lifecycle.shutdown_signal(),
                        ));
                    }
                    Err(e) => {
                        warn!(error = %e, "Accept failed");
                        sleep(Duration::from_millis(50)).await;
                    }
                },
                Some(joined) = connections.join_next(), if !connections.is_empty() => {
                    if let Err(e) = joined && e.is_panic() {
                        warn!("Connection task panicked: {}", e);
                    }
                }
            }
        }

        drop(listener);
        debug!(open = connections.len(), "Waiting for connections to finish");
        while connections.join_next().await.is_some() {}

        lifecycle.stopped().await;
        info!(%local_addr, "Server stopped");
        Ok(())
    }
}

async fn serve_connection(
    stream: TcpStream,
    peer: SocketAddr,
    registry: Arc<ServiceRegistry>,
    limiter: Arc<Semaphore>,
    max_frame_length: usize,
    mut shutdown: ShutdownSignal,
) {
    if let Err(e) = stream.set_nodelay(true) {
        debug!(%peer, "Failed to set TCP_NODELAY: {}", e);
    }
    let mut framed = Framed::new(stream, frame_codec(max_frame_length));

    loop {
        let frame = tokio::select! {
            _ = shutdown.recv() => break,
            frame = framed.next() => frame,
        };
        let frame = match frame {
            Some(Ok(frame)) => frame,
            Some(Err(e)) => {
                debug!(%peer, "Connection read failed: {}", e);
                break;
            }
            None => break,
        };

        let reply = {
            let Ok(_permit) = limiter.acquire().await else {
                break;
            };
            registry.handle(&frame).await
        };
        let reply = match reply {
            Ok(reply) => reply,
            Err(e) => {
                warn!(%peer, "Failed to encode response: {}", e);
                break;
            }
        };

        if let Err(e) = framed.send(reply).await {
            debug!(%peer, "Connection write failed: {}", e);
            break;
        }
    }

    trace!(%peer, "Connection closed");
}
