//! RPC client over a [`Channel`]

use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use sockrpc_protocol::{MethodName, RequestHeaders, RpcRequest, decode_response, encode_request};
use sockrpc_transport::{Channel, ChannelResult};
use tracing::trace;

use crate::error::{ClientError, ClientResult};

/// Issues calls to `package.Service.Method` over a shared channel
///
/// Cheap to share by reference; every call draws a fresh request id.
#[derive(Debug)]
pub struct RpcClient {
    channel: Channel,
    next_id: AtomicU64,
    stamp_headers: bool,
}

impl RpcClient {
    /// Client sending over `channel`
    #[must_use]
    pub fn new(channel: Channel) -> Self {
        Self {
            channel,
            next_id: AtomicU64::new(1),
            stamp_headers: false,
        }
    }

    /// Attach [`RequestHeaders::for_current_process`] to calls made without
    /// explicit headers
    #[must_use]
    pub fn stamp_process_headers(mut self) -> Self {
        self.stamp_headers = true;
        self
    }

    /// Underlying channel
    #[must_use]
    pub const fn channel(&self) -> &Channel {
        &self.channel
    }

    /// Call `method` with an encoded request message
    pub async fn call(&self, method: &str, request: impl Into<Bytes>) -> ClientResult<Bytes> {
        let headers = self.default_headers();
        self.call_with_headers(method, request, headers).await
    }

    /// Call `method` with explicit caller headers
    pub async fn call_with_headers(
        &self,
        method: &str,
        request: impl Into<Bytes>,
        headers: RequestHeaders,
    ) -> ClientResult<Bytes> {
        let (request_id, frame) = self.encode(method, request.into(), headers)?;
        let reply = self.channel.send(frame).await;
        read_reply(request_id, reply)
    }

    /// Call `method` and hand the outcome to `callback`
    ///
    /// The callback runs exactly once on a runtime task, unless the channel
    /// is closed while the call is outstanding.
    pub fn call_with<F>(&self, method: &str, request: impl Into<Bytes>, callback: F)
    where
        F: FnOnce(ClientResult<Bytes>) + Send + 'static,
    {
        let headers = self.default_headers();
        match self.encode(method, request.into(), headers) {
            Ok((request_id, frame)) => self
                .channel
                .send_with(frame, move |reply| callback(read_reply(request_id, reply))),
            Err(e) => {
                tokio::spawn(async move { callback(Err(e)) });
            }
        }
    }

    fn default_headers(&self) -> RequestHeaders {
        if self.stamp_headers {
            RequestHeaders::for_current_process()
        } else {
            RequestHeaders::default()
        }
    }

    fn encode(
        &self,
        method: &str,
        request: Bytes,
        headers: RequestHeaders,
    ) -> ClientResult<(u64, Bytes)> {
        let method: MethodName = method.parse()?;
        let request_id = self.next_id.fetch_add(1, Ordering::Relaxed);
        trace!(%method, request_id, len = request.len(), "Encoding call");

        let envelope = RpcRequest::new(&method, request)
            .with_headers(headers)
            .with_request_id(request_id);
        Ok((request_id, encode_request(&envelope)?))
    }
}

fn read_reply(request_id: u64, reply: ChannelResult<Bytes>) -> ClientResult<Bytes> {
    let response = decode_response(&reply?)?;
    if let Some(code) = response.error_code {
        return Err(ClientError::Remote {
            code,
            message: response.error_message.unwrap_or_default(),
        });
    }
    if response.request_id != request_id {
        return Err(ClientError::ResponseMismatch {
            expected: request_id,
            actual: response.request_id,
        });
    }
    Ok(response.response_proto)
}
