//! # sockrpc transport
//!
//! Pooled request-reply transport: send opaque binary payloads to one or
//! more remote peers and get each reply (or failure) back exactly once, with
//! bounded concurrency and per-request timeouts.
//!
//! ## Module Organization
//!
//! ```text
//! sockrpc-transport/
//! ├── core/         # Transport traits, endpoints and transport errors
//! ├── tcp/          # Length-prefixed TCP transport and its factory
//! ├── memory/       # In-process transport
//! ├── connection/   # Pooled connections and their identities
//! ├── pool/         # Bounded connection pool
//! ├── correlation/  # Pending requests keyed by connection
//! ├── channel/      # Public send / close façade
//! ├── config/       # Channel and pool configuration
//! ├── error/        # Channel and pool errors
//! └── metrics/      # Channel statistics
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use sockrpc_transport::{Channel, ChannelConfig};
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ChannelConfig::builder()
//!     .addresses(["127.0.0.1:5555", "127.0.0.1:5556"])
//!     .min(2)
//!     .max(8)
//!     .request_timeout(Duration::from_secs(2))
//!     .build()?;
//!
//! let channel = Channel::new(config)?;
//! let reply = channel.send(&b"payload"[..]).await?;
//! println!("{} bytes back", reply.len());
//! channel.close();
//! # Ok(())
//! # }
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
    clippy::cast_possible_truncation,
    clippy::must_use_candidate,
    clippy::return_self_not_must_use
)]

pub mod channel;
pub mod config;
pub mod connection;
pub mod core;
pub mod correlation;
pub mod error;
pub mod memory;
pub mod metrics;
pub mod pool;
pub mod tcp;

pub use channel::{Channel, ResponseFuture};
pub use config::{ChannelConfig, ChannelConfigBuilder, PoolConfig};
pub use connection::{Connection, ConnectionId, ConnectionState};
pub use core::{
    Endpoint, Transport, TransportError, TransportFactory, TransportResult, TransportState,
};
pub use correlation::{CorrelationTable, Registration, Responder};
pub use error::{ChannelError, ChannelResult, PoolError, PoolResult};
pub use memory::{MemoryTransport, MemoryTransportFactory};
pub use metrics::ChannelStats;
pub use pool::{Pool, PoolStats};
pub use tcp::{TcpConfig, TcpTransport, TcpTransportFactory, frame_codec};
