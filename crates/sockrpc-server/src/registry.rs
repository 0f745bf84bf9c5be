//! Service registry and request dispatch
//!
//! Handlers are registered per fully qualified method name. The registry
//! decodes incoming envelopes, finds the handler and encodes the response,
//! turning every failure into an error response that echoes the request id.
//!
//! ```
//! use bytes::Bytes;
//! use sockrpc_server::{HandlerError, ServiceRegistry, handler_fn};
//!
//! let registry = ServiceRegistry::new();
//! registry
//!     .register(
//!         ".echo.EchoService.Echo",
//!         handler_fn(|request| async move { Ok::<_, HandlerError>(request.request_proto) }),
//!     )
//!     .unwrap();
//! assert!(registry.contains("echo.EchoService", "Echo"));
//! ```

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use sockrpc_protocol::{
    ErrorCode, MethodName, ProtocolResult, RpcRequest, RpcResponse, decode_request,
    encode_response,
};
use tracing::{debug, trace};

use crate::error::{HandlerError, ServerError, ServerResult};

/// Handles calls to one method
#[async_trait]
pub trait MethodHandler: Send + Sync {
    /// Produce the encoded reply for `request`
    async fn call(&self, request: RpcRequest) -> Result<Bytes, HandlerError>;
}

/// [`MethodHandler`] backed by an async closure, see [`handler_fn`]
pub struct FnHandler<F> {
    f: F,
}

impl<F> fmt::Debug for FnHandler<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnHandler").finish_non_exhaustive()
    }
}

/// Wrap an async closure as a [`MethodHandler`]
pub fn handler_fn<F, Fut>(f: F) -> FnHandler<F>
where
    F: Fn(RpcRequest) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Bytes, HandlerError>> + Send,
{
    FnHandler { f }
}

#[async_trait]
impl<F, Fut> MethodHandler for FnHandler<F>
where
    F: Fn(RpcRequest) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Bytes, HandlerError>> + Send,
{
    async fn call(&self, request: RpcRequest) -> Result<Bytes, HandlerError> {
        (self.f)(request).await
    }
}

type Methods = HashMap<String, Arc<dyn MethodHandler>>;

/// Service name to method name to handler
#[derive(Default)]
pub struct ServiceRegistry {
    services: RwLock<HashMap<String, Methods>>,
}

impl fmt::Debug for ServiceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceRegistry")
            .field("services", &self.service_count())
            .field("methods", &self.method_count())
            .finish()
    }
}

impl ServiceRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `method` (`[.]package.Service.Method`)
    ///
    /// Registering the same method twice is an error.
    pub fn register<H>(&self, method: &str, handler: H) -> ServerResult<()>
    where
        H: MethodHandler + 'static,
    {
        let name: MethodName = method.parse()?;
        let mut services = self.services.write();
        let methods = services.entry(name.service().to_string()).or_default();
        if methods.contains_key(name.method()) {
            return Err(ServerError::Registry(format!(
                "'{name}' is already registered"
            )));
        }
        methods.insert(name.method().to_string(), Arc::new(handler));
        debug!(method = %name, "Registered handler");
        Ok(())
    }

    /// Remove the handler for `method`; true if one was registered
    pub fn unregister(&self, method: &str) -> bool {
        let Ok(name) = method.parse::<MethodName>() else {
            return false;
        };
        let mut services = self.services.write();
        let Some(methods) = services.get_mut(name.service()) else {
            return false;
        };
        let removed = methods.remove(name.method()).is_some();
        if methods.is_empty() {
            services.remove(name.service());
        }
        removed
    }

    /// Whether `service.method` has a handler
    pub fn contains(&self, service: &str, method: &str) -> bool {
        self.services
            .read()
            .get(service)
            .is_some_and(|methods| methods.contains_key(method))
    }

    /// Number of services with at least one method
    pub fn service_count(&self) -> usize {
        self.services.read().len()
    }

    /// Number of registered methods across all services
    pub fn method_count(&self) -> usize {
        self.services.read().values().map(HashMap::len).sum()
    }

    fn lookup(&self, request: &RpcRequest) -> Result<Arc<dyn MethodHandler>, RpcResponse> {
        let services = self.services.read();
        let Some(methods) = services.get(&request.service_name) else {
            return Err(RpcResponse::error(
                request.request_id,
                ErrorCode::ServiceNotFound,
                format!("service '{}' not found", request.service_name),
            ));
        };
        methods.get(&request.method_name).cloned().ok_or_else(|| {
            RpcResponse::error(
                request.request_id,
                ErrorCode::MethodNotFound,
                format!(
                    "method '{}' not found in '{}'",
                    request.method_name, request.service_name
                ),
            )
        })
    }

    /// Run a decoded request through its handler
    pub async fn dispatch(&self, request: RpcRequest) -> RpcResponse {
        let handler = match self.lookup(&request) {
            Ok(handler) => handler,
            Err(response) => return response,
        };
        let request_id = request.request_id;
        trace!(
            service = %request.service_name,
            method = %request.method_name,
            request_id,
            "Dispatching request"
        );

        match handler.call(request).await {
            Ok(reply) => RpcResponse::success(request_id, reply),
            Err(e) => {
                debug!(request_id, "Handler failed: {}", e);
                RpcResponse::error(request_id, e.code, e.message)
            }
        }
    }

    /// Decode one request frame, dispatch it and encode the response
    pub async fn handle(&self, frame: &[u8]) -> ProtocolResult<Bytes> {
        let response = match decode_request(frame) {
            Ok(request) => self.dispatch(request).await,
            Err(e) => RpcResponse::error(0, ErrorCode::InvalidRequestProto, e.to_string()),
        };
        encode_response(&response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use sockrpc_protocol::{decode_response, encode_request};

    fn registry() -> ServiceRegistry {
        let registry = ServiceRegistry::new();
        registry
            .register(
                "math.Calc.Double",
                handler_fn(|request| async move {
                    let n = request
                        .request_proto
                        .first()
                        .copied()
                        .ok_or_else(|| HandlerError::bad_request("empty request"))?;
                    Ok::<_, HandlerError>(Bytes::from(vec![n.wrapping_mul(2)]))
                }),
            )
            .unwrap();
        registry
            .register(
                "math.Calc.Fail",
                handler_fn(|_| async { Err::<Bytes, _>(HandlerError::from("boom")) }),
            )
            .unwrap();
        registry
    }

    async fn call(registry: &ServiceRegistry, method: &str, body: &[u8]) -> RpcResponse {
        let method: MethodName = method.parse().unwrap();
        let request = RpcRequest::new(&method, body.to_vec()).with_request_id(77);
        let frame = registry
            .handle(&encode_request(&request).unwrap())
            .await
            .unwrap();
        decode_response(&frame).unwrap()
    }

    #[tokio::test]
    async fn test_success() {
        let response = call(&registry(), "math.Calc.Double", &[21]).await;
        assert_eq!(response, RpcResponse::success(77, vec![42u8]));
    }

    #[tokio::test]
    async fn test_error_codes() {
        let registry = registry();

        let response = call(&registry, "math.Nope.Double", &[1]).await;
        assert_eq!(response.error_code, Some(ErrorCode::ServiceNotFound));
        assert_eq!(response.request_id, 77);

        let response = call(&registry, "math.Calc.Triple", &[1]).await;
        assert_eq!(response.error_code, Some(ErrorCode::MethodNotFound));

        let response = call(&registry, "math.Calc.Fail", &[1]).await;
        assert_eq!(response.error_code, Some(ErrorCode::RpcError));
        assert_eq!(response.error_message.as_deref(), Some("boom"));

        let response = call(&registry, "math.Calc.Double", &[]).await;
        assert_eq!(response.error_code, Some(ErrorCode::BadRequestData));
    }

    #[tokio::test]
    async fn test_undecodable_frame() {
        let frame = registry().handle(b"\xc1").await.unwrap();
        let response = decode_response(&frame).unwrap();
        assert_eq!(response.error_code, Some(ErrorCode::InvalidRequestProto));
    }

    #[test]
    fn test_register_and_unregister() {
        let registry = registry();
        assert_eq!(registry.service_count(), 1);
        assert_eq!(registry.method_count(), 2);

        let duplicate = registry.register(
            ".math.Calc.Double",
            handler_fn(|_| async { Ok::<_, HandlerError>(Bytes::new()) }),
        );
        assert!(matches!(duplicate, Err(ServerError::Registry(_))));

        let invalid = registry.register(
            "Double",
            handler_fn(|_| async { Ok::<_, HandlerError>(Bytes::new()) }),
        );
        assert!(matches!(invalid, Err(ServerError::Protocol(_))));

        assert!(registry.unregister("math.Calc.Double"));
        assert!(!registry.unregister("math.Calc.Double"));
        assert!(registry.unregister("math.Calc.Fail"));
        assert_eq!(registry.service_count(), 0);
    }
}
