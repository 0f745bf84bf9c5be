//! Property: every request sent through a channel is answered exactly once,
//! whatever mix of replies, failures and timeouts the peer produces.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use proptest::prelude::*;
use sockrpc_transport::{
    Channel, ChannelConfig, ChannelError, Endpoint, MemoryTransportFactory, TransportError,
};
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Reply {
    Echo,
    Fail,
    Hang,
    Late,
}

impl Reply {
    const fn tag(self) -> u8 {
        match self {
            Self::Echo => 0,
            Self::Fail => 1,
            Self::Hang => 2,
            Self::Late => 3,
        }
    }
}

fn reply_strategy() -> impl Strategy<Value = Reply> {
    prop_oneof![
        4 => Just(Reply::Echo),
        1 => Just(Reply::Fail),
        1 => Just(Reply::Hang),
        1 => Just(Reply::Late),
    ]
}

const REQUEST_TIMEOUT_MS: u64 = 50;

fn peer() -> MemoryTransportFactory {
    MemoryTransportFactory::new(|payload: Bytes| async move {
        let tag = payload.first().copied();
        match tag {
            Some(1) => Err(TransportError::ReceiveFailed("dropped".to_string())),
            Some(2) => std::future::pending().await,
            Some(3) => {
                tokio::time::sleep(Duration::from_millis(REQUEST_TIMEOUT_MS * 2)).await;
                Ok(payload)
            }
            _ => Ok(payload),
        }
    })
}

fn run(replies: &[Reply], min: usize, max: usize) -> Vec<Vec<Result<Bytes, ChannelError>>> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .start_paused(true)
        .build()
        .unwrap();

    runtime.block_on(async {
        let config = ChannelConfig {
            addresses: vec![Endpoint::new("memory", 1)],
            min,
            max,
            request_timeout_ms: REQUEST_TIMEOUT_MS,
            ..ChannelConfig::default()
        };
        let channel = Channel::with_factory(config, Arc::new(peer())).unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();

        for (index, reply) in replies.iter().enumerate() {
            let tx = tx.clone();
            let payload = Bytes::from(vec![reply.tag(), index as u8]);
            channel.send_with(payload, move |result| {
                let _ = tx.send((index, result));
            });
        }
        drop(tx);

        let mut delivered = vec![Vec::new(); replies.len()];
        while let Some((index, result)) = rx.recv().await {
            delivered[index].push(result);
        }

        // Nothing may trickle in after every callback has run
        tokio::time::sleep(Duration::from_millis(REQUEST_TIMEOUT_MS * 10)).await;
        assert_eq!(channel.pending(), 0);
        assert!(channel.stats().pool.peak_size <= max);
        delivered
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn every_request_resolves_exactly_once(
        replies in prop::collection::vec(reply_strategy(), 1..24),
        min in 0usize..3,
        extra in 0usize..4,
    ) {
        let max = (min + extra).max(1);
        let delivered = run(&replies, min, max);

        for (index, (reply, results)) in replies.iter().zip(&delivered).enumerate() {
            prop_assert_eq!(results.len(), 1, "request {} answered {} times", index, results.len());
            let result = &results[0];
            match reply {
                Reply::Echo => prop_assert_eq!(
                    result,
                    &Ok(Bytes::from(vec![reply.tag(), index as u8]))
                ),
                Reply::Fail => prop_assert!(matches!(result, Err(ChannelError::Transport(_)))),
                Reply::Hang | Reply::Late => prop_assert!(
                    matches!(result, Err(ChannelError::Timeout { .. })),
                    "expected timeout, got {:?}",
                    result
                ),
            }
        }
    }
}
