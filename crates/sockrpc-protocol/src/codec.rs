//! MessagePack encoding of envelopes.

use bytes::Bytes;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::trace;

use crate::envelope::{RpcRequest, RpcResponse};
use crate::error::{ProtocolError, ProtocolResult};

fn encode<T: Serialize>(value: &T) -> ProtocolResult<Bytes> {
    rmp_serde::to_vec_named(value)
        .map(Bytes::from)
        .map_err(|e| ProtocolError::Encode(e.to_string()))
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> ProtocolResult<T> {
    rmp_serde::from_slice(bytes).map_err(|e| {
        trace!(len = bytes.len(), "Failed to decode envelope: {}", e);
        ProtocolError::Decode(e.to_string())
    })
}

/// Encode a request envelope
pub fn encode_request(request: &RpcRequest) -> ProtocolResult<Bytes> {
    encode(request)
}

/// Decode a request envelope
pub fn decode_request(bytes: &[u8]) -> ProtocolResult<RpcRequest> {
    decode(bytes)
}

/// Encode a response envelope
pub fn encode_response(response: &RpcResponse) -> ProtocolResult<Bytes> {
    encode(response)
}

/// Decode a response envelope
pub fn decode_response(bytes: &[u8]) -> ProtocolResult<RpcResponse> {
    decode(bytes)
}
