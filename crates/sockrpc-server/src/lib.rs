//! # sockrpc server
//!
//! Reply side of sockrpc. The server accepts TCP connections framed with the
//! same length-prefixed codec as the transport, decodes each request envelope,
//! dispatches it to the handler registered for its method and writes back the
//! response envelope.
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use sockrpc_server::{HandlerError, Server, ServerConfig, ServiceRegistry, handler_fn};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let registry = Arc::new(ServiceRegistry::new());
//!     registry.register(
//!         ".echo.EchoService.Echo",
//!         handler_fn(|request| async move { Ok::<_, HandlerError>(request.request_proto) }),
//!     )?;
//!
//!     let server = Server::bind(ServerConfig::new("0.0.0.0", 7400), registry).await?;
//!     let shutdown = server.shutdown_handle();
//!     tokio::spawn(async move {
//!         let _ = tokio::signal::ctrl_c().await;
//!         shutdown.shutdown().await;
//!     });
//!     server.serve().await?;
//!     Ok(())
//! }
//! ```

#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub,
    clippy::all
)]
#![deny(unsafe_code)]
#![cfg_attr(docsrs, feature(doc_cfg))]
#![allow(
    clippy::module_name_repetitions,
    clippy::missing_errors_doc,
    clippy::must_use_candidate,
    clippy::return_self_not_must_use
)]

pub mod config;
pub mod error;
pub mod lifecycle;
pub mod registry;
pub mod server;

pub use config::{DEFAULT_MAX_CONCURRENT_REQUESTS, ServerConfig};
pub use error::{HandlerError, ServerError, ServerResult};
pub use lifecycle::{ServerLifecycle, ServerState, ShutdownHandle, ShutdownSignal};
pub use registry::{FnHandler, MethodHandler, ServiceRegistry, handler_fn};
pub use server::Server;
