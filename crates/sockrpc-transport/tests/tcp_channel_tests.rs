//! Channel over real TCP sockets.

use std::time::Duration;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use sockrpc_transport::tcp::DEFAULT_MAX_FRAME_LENGTH;
use sockrpc_transport::{Channel, ChannelConfig, ChannelError, frame_codec};
use tokio::net::TcpListener;
use tokio_util::codec::Framed;

/// Reply server: `upper` uppercases, `close` hangs up, `sleep` never answers
async fn reply_server() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap().to_string();

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut framed = Framed::new(stream, frame_codec(DEFAULT_MAX_FRAME_LENGTH));
                while let Some(Ok(frame)) = framed.next().await {
                    match &frame[..] {
                        b"close" => return,
                        b"sleep" => std::future::pending::<()>().await,
                        _ => {
                            let reply = Bytes::from(frame.to_ascii_uppercase());
                            if framed.send(reply).await.is_err() {
                                return;
                            }
                        }
                    }
                }
            });
        }
    });

    address
}

async fn unused_address() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap().to_string();
    drop(listener);
    address
}

#[tokio::test]
async fn test_request_reply_over_tcp() {
    let _ = tracing_subscriber::fmt::try_init();
    let address = reply_server().await;
    let config = ChannelConfig::builder()
        .address(&address)
        .min(1)
        .max(4)
        .request_timeout(Duration::from_secs(5))
        .build()
        .unwrap();
    let channel = Channel::new(config).unwrap();

    let replies = futures::future::join_all(
        ["alpha", "beta", "gamma", "delta", "epsilon"]
            .into_iter()
            .map(|word| channel.send(word.as_bytes().to_vec())),
    )
    .await;

    let replies: Vec<Bytes> = replies.into_iter().map(Result::unwrap).collect();
    assert_eq!(replies[0], Bytes::from_static(b"ALPHA"));
    assert_eq!(replies[4], Bytes::from_static(b"EPSILON"));
    assert!(channel.stats().pool.peak_size <= 4);

    channel.close();
}

#[tokio::test]
async fn test_peer_hangup_is_transport_error() {
    let address = reply_server().await;
    let config = ChannelConfig::builder()
        .address(&address)
        .min(0)
        .max(1)
        .build()
        .unwrap();
    let channel = Channel::new(config).unwrap();

    let err = channel.send(&b"close"[..]).await.unwrap_err();
    assert!(matches!(err, ChannelError::Transport(_)), "{err}");

    // A fresh connection replaces the broken one
    let reply = channel.send(&b"again"[..]).await.unwrap();
    assert_eq!(reply, Bytes::from_static(b"AGAIN"));
    assert_eq!(channel.stats().pool.destroyed, 1);
}

#[tokio::test]
async fn test_timeout_over_tcp() {
    let address = reply_server().await;
    let config = ChannelConfig::builder()
        .address(&address)
        .min(0)
        .max(1)
        .request_timeout(Duration::from_millis(100))
        .build()
        .unwrap();
    let channel = Channel::new(config).unwrap();

    let err = channel.send(&b"sleep"[..]).await.unwrap_err();
    assert_eq!(err.timed_out_payload(), Some(&Bytes::from_static(b"sleep")));

    let reply = channel.send(&b"ok"[..]).await.unwrap();
    assert_eq!(reply, Bytes::from_static(b"OK"));
}

#[tokio::test]
async fn test_dead_address_is_skipped() {
    let live = reply_server().await;
    let dead = unused_address().await;
    let config = ChannelConfig::builder()
        .addresses([dead.as_str(), live.as_str()])
        .min(2)
        .max(2)
        .build()
        .unwrap();
    let channel = Channel::new(config).unwrap();

    for _ in 0..6 {
        let reply = channel.send(&b"x"[..]).await.unwrap();
        assert_eq!(reply, Bytes::from_static(b"X"));
    }
    assert_eq!(channel.stats().pool.creation_failures, 0);
}

#[tokio::test]
async fn test_no_live_address() {
    let config = ChannelConfig::builder()
        .address(unused_address().await)
        .min(0)
        .max(1)
        .build()
        .unwrap();
    let channel = Channel::new(config).unwrap();

    let err = channel.send(&b"x"[..]).await.unwrap_err();
    assert!(matches!(err, ChannelError::Acquisition(_)), "{err}");
}
