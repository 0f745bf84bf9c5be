//! # sockrpc protocol
//!
//! Wire envelope for RPC calls carried over a sockrpc channel. A request names
//! `package.Service.Method`, carries the encoded request message as opaque
//! bytes and optional caller headers. A response carries either the encoded
//! reply or an [`ErrorCode`] with a message. Envelopes are MessagePack.
//!
//! ```
//! use sockrpc_protocol::{MethodName, RpcRequest, decode_request, encode_request};
//!
//! let method: MethodName = ".echo.EchoService.Echo".parse().unwrap();
//! let request = RpcRequest::new(&method, &b"hi"[..]).with_request_id(1);
//! let bytes = encode_request(&request).unwrap();
//! assert_eq!(decode_request(&bytes).unwrap(), request);
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

pub mod codec;
pub mod envelope;
pub mod error;
pub mod method;

pub use codec::{decode_request, decode_response, encode_request, encode_response};
pub use envelope::{RequestHeaders, RpcRequest, RpcResponse};
pub use error::{ErrorCode, ProtocolError, ProtocolResult};
pub use method::MethodName;
