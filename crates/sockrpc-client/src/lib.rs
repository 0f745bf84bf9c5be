//! # sockrpc client
//!
//! Calls `package.Service.Method` on a sockrpc server. Requests are wrapped
//! in an [`RpcRequest`](sockrpc_protocol::RpcRequest) envelope, sent over a
//! pooled [`Channel`](sockrpc_transport::Channel) and the reply envelope is
//! unwrapped back into the encoded response message or a [`ClientError`].
//!
//! ## Example
//!
//! ```no_run
//! use sockrpc_client::RpcClient;
//! use sockrpc_transport::{Channel, ChannelConfig};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ChannelConfig::builder()
//!     .addresses(["10.0.0.1:7400", "10.0.0.2:7400"])
//!     .build()?;
//! let client = RpcClient::new(Channel::new(config)?);
//!
//! let reply = client.call(".echo.EchoService.Echo", &b"hello"[..]).await?;
//! assert_eq!(&reply[..], b"hello");
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
#![allow(
    clippy::module_name_repetitions,
    clippy::missing_errors_doc,
    clippy::must_use_candidate
)]

pub mod client;
pub mod error;

pub use client::RpcClient;
pub use error::{ClientError, ClientResult};
