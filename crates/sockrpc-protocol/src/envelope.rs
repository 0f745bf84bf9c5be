//! Request and response envelopes.
//!
//! The envelope names the target service and method and carries the caller's
//! request message as opaque bytes. Responses carry either the opaque reply
//! message or an [`ErrorCode`] with a message.

use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::ErrorCode;
use crate::method::MethodName;

/// Caller metadata attached to a request
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RequestHeaders {
    /// Send time in milliseconds since the Unix epoch
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp_ms: Option<u64>,
    /// Host the request came from
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    /// Process name of the caller
    #[serde(skip_serializing_if = "Option::is_none")]
    pub procname: Option<String>,
    /// Process id of the caller
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
}

impl RequestHeaders {
    /// Headers describing the current process, stamped with the current time
    #[must_use]
    pub fn for_current_process() -> Self {
        let timestamp_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .ok()
            .map(|elapsed| elapsed.as_millis() as u64);
        let procname = std::env::current_exe()
            .ok()
            .and_then(|path| path.file_name().map(|n| n.to_string_lossy().into_owned()));

        Self {
            timestamp_ms,
            hostname: std::env::var("HOSTNAME").ok(),
            procname,
            pid: Some(std::process::id()),
        }
    }
}

/// One remote call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcRequest {
    /// Fully qualified service name
    pub service_name: String,
    /// Method within the service
    pub method_name: String,
    /// Encoded request message
    pub request_proto: Bytes,
    /// Caller metadata
    #[serde(default)]
    pub headers: RequestHeaders,
    /// Identifier echoed back in the response
    #[serde(default)]
    pub request_id: u64,
}

impl RpcRequest {
    /// Build a request for `method`
    pub fn new(method: &MethodName, request_proto: impl Into<Bytes>) -> Self {
        Self {
            service_name: method.service().to_string(),
            method_name: method.method().to_string(),
            request_proto: request_proto.into(),
            headers: RequestHeaders::default(),
            request_id: 0,
        }
    }

    /// Set the caller metadata
    #[must_use]
    pub fn with_headers(mut self, headers: RequestHeaders) -> Self {
        self.headers = headers;
        self
    }

    /// Set the request identifier
    #[must_use]
    pub const fn with_request_id(mut self, request_id: u64) -> Self {
        self.request_id = request_id;
        self
    }

    /// Target method as a [`MethodName`]
    #[must_use]
    pub fn method(&self) -> MethodName {
        MethodName::new(&self.service_name, &self.method_name)
    }
}

/// Outcome of one remote call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcResponse {
    /// Encoded reply message; empty on error
    #[serde(default)]
    pub response_proto: Bytes,
    /// Failure reason, absent on success
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<ErrorCode>,
    /// Human readable failure description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Identifier of the request this answers
    #[serde(default)]
    pub request_id: u64,
}

impl RpcResponse {
    /// Successful response
    pub fn success(request_id: u64, response_proto: impl Into<Bytes>) -> Self {
        Self {
            response_proto: response_proto.into(),
            error_code: None,
            error_message: None,
            request_id,
        }
    }

    /// Failed response
    pub fn error(request_id: u64, code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            response_proto: Bytes::new(),
            error_code: Some(code),
            error_message: Some(message.into()),
            request_id,
        }
    }

    /// Whether the call failed
    #[must_use]
    pub const fn is_error(&self) -> bool {
        self.error_code.is_some()
    }

    /// Reply bytes, or the error code and message
    pub fn into_result(self) -> Result<Bytes, (ErrorCode, String)> {
        match self.error_code {
            None => Ok(self.response_proto),
            Some(code) => Err((
                code,
                self.error_message
                    .unwrap_or_else(|| code.as_str().to_string()),
            )),
        }
    }
}
