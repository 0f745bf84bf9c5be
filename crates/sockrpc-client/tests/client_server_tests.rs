//! Client against a live server over TCP.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use pretty_assertions::assert_eq;
use sockrpc_client::{ClientError, RpcClient};
use sockrpc_protocol::{ErrorCode, RequestHeaders};
use sockrpc_server::{HandlerError, Server, ServerConfig, ServiceRegistry, handler_fn};
use sockrpc_transport::{Channel, ChannelConfig, ChannelError};
use tokio::net::TcpListener;

fn registry() -> ServiceRegistry {
    let registry = ServiceRegistry::new();
    registry
        .register(
            ".echo.EchoService.Echo",
            handler_fn(|request| async move { Ok::<_, HandlerError>(request.request_proto) }),
        )
        .unwrap();
    registry
        .register(
            ".echo.EchoService.Whoami",
            handler_fn(|request| async move {
                let name = request
                    .headers
                    .hostname
                    .ok_or_else(|| HandlerError::bad_request("no hostname"))?;
                Ok::<_, HandlerError>(Bytes::from(name))
            }),
        )
        .unwrap();
    registry
        .register(
            ".echo.EchoService.Refuse",
            handler_fn(|_| async { Err::<Bytes, _>(HandlerError::failed("refused")) }),
        )
        .unwrap();
    registry
        .register(
            ".echo.EchoService.Stall",
            handler_fn(|_| async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok::<_, HandlerError>(Bytes::new())
            }),
        )
        .unwrap();
    registry
}

async fn server() -> (String, sockrpc_server::ShutdownHandle) {
    let server = Server::bind(ServerConfig::default(), Arc::new(registry()))
        .await
        .unwrap();
    let address = server.local_addr().to_string();
    let shutdown = server.shutdown_handle();
    tokio::spawn(server.serve());
    (address, shutdown)
}

fn client(addresses: &[&str], timeout: Duration) -> RpcClient {
    let config = ChannelConfig::builder()
        .addresses(addresses.iter().copied())
        .min(1)
        .max(4)
        .request_timeout(timeout)
        .build()
        .unwrap();
    RpcClient::new(Channel::new(config).unwrap())
}

#[tokio::test]
async fn test_call_and_remote_errors() {
    let _ = tracing_subscriber::fmt::try_init();
    let (address, shutdown) = server().await;
    let client = client(&[address.as_str()], Duration::from_secs(5));

    let reply = client
        .call("echo.EchoService.Echo", &b"ping"[..])
        .await
        .unwrap();
    assert_eq!(reply, Bytes::from_static(b"ping"));

    let err = client
        .call("echo.EchoService.Shout", Bytes::new())
        .await
        .unwrap_err();
    assert_eq!(err.code(), Some(ErrorCode::MethodNotFound));

    let err = client
        .call("other.Service.Echo", Bytes::new())
        .await
        .unwrap_err();
    assert_eq!(err.code(), Some(ErrorCode::ServiceNotFound));

    let err = client
        .call("echo.EchoService.Refuse", Bytes::new())
        .await
        .unwrap_err();
    assert_eq!(
        err,
        ClientError::Remote {
            code: ErrorCode::RpcFailed,
            message: "refused".to_string(),
        }
    );

    client.channel().close();
    shutdown.shutdown().await;
}

#[tokio::test]
async fn test_headers_reach_handler() {
    let (address, shutdown) = server().await;
    let client = client(&[address.as_str()], Duration::from_secs(5));

    let headers = RequestHeaders {
        hostname: Some("web-7".to_string()),
        ..RequestHeaders::default()
    };
    let reply = client
        .call_with_headers("echo.EchoService.Whoami", Bytes::new(), headers)
        .await
        .unwrap();
    assert_eq!(reply, Bytes::from_static(b"web-7"));

    let err = client
        .call("echo.EchoService.Whoami", Bytes::new())
        .await
        .unwrap_err();
    assert_eq!(err.code(), Some(ErrorCode::BadRequestData));

    shutdown.shutdown().await;
}

#[tokio::test]
async fn test_timeout_then_recovery() {
    let (address, shutdown) = server().await;
    let client = client(&[address.as_str()], Duration::from_millis(150));

    let err = client
        .call("echo.EchoService.Stall", Bytes::new())
        .await
        .unwrap_err();
    assert!(err.is_timeout(), "{err}");
    assert!(matches!(
        err,
        ClientError::Channel(ChannelError::Timeout { .. })
    ));

    let reply = client
        .call("echo.EchoService.Echo", &b"after"[..])
        .await
        .unwrap();
    assert_eq!(reply, Bytes::from_static(b"after"));

    shutdown.shutdown().await;
}

#[tokio::test]
async fn test_failover_to_live_address() {
    let (live, shutdown) = server().await;
    let dead = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().to_string()
    };
    let client = client(&[dead.as_str(), live.as_str()], Duration::from_secs(5));

    for i in 0..8u8 {
        let reply = client.call("echo.EchoService.Echo", vec![i]).await.unwrap();
        assert_eq!(&reply[..], &[i]);
    }

    shutdown.shutdown().await;
}

#[tokio::test]
async fn test_callback_form() {
    let (address, shutdown) = server().await;
    let client = client(&[address.as_str()], Duration::from_secs(5));

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    for word in ["a", "b", "c"] {
        let tx = tx.clone();
        client.call_with("echo.EchoService.Echo", word, move |result| {
            let _ = tx.send(result);
        });
    }
    drop(tx);

    let mut replies = Vec::new();
    while let Some(result) = rx.recv().await {
        replies.push(result.unwrap());
    }
    replies.sort();
    assert_eq!(
        replies,
        vec![
            Bytes::from_static(b"a"),
            Bytes::from_static(b"b"),
            Bytes::from_static(b"c")
        ]
    );

    shutdown.shutdown().await;
}
