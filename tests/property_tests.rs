//! Property-based tests for the secure channel.

use proptest::prelude::*;
use std::io::Cursor;
use tether_core::{ChannelConfig, ChannelError, ChannelReceiver, ChannelSender};
use tether_crypto::SessionSecrets;
use tether_integration_tests::fixtures::tcp_channel_pair;
use tokio::runtime::Runtime;

fn runtime() -> Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    /// The byte stream the receiver hands out equals the concatenation of
    /// everything sent, for any message sizes and any read sizes.
    #[test]
    fn prop_tcp_stream_equals_concatenation(
        sizes in proptest::collection::vec(0usize..=4096, 1..16),
        read_sizes in proptest::collection::vec(1usize..5000, 1..8),
        seed in any::<u8>(),
    ) {
        let messages: Vec<Vec<u8>> = sizes
            .iter()
            .enumerate()
            .map(|(i, &n)| (0..n).map(|j| (j as u8).wrapping_mul(31) ^ seed ^ i as u8).collect())
            .collect();
        let expected = messages.concat();

        let received = runtime().block_on(async {
            let secrets = SessionSecrets::generate().unwrap();
            let (alice, mut bob) = tcp_channel_pair(&secrets).await;
            let (mut tx, _rx) = alice.into_split();

            let sending = tokio::spawn(async move {
                for message in &messages {
                    tx.send(message).await.unwrap();
                }
                tx
            });

            let mut out = Vec::new();
            let mut turn = 0;
            while out.len() < expected.len() {
                let mut buf = vec![0u8; read_sizes[turn % read_sizes.len()]];
                let n = bob.recv(&mut buf).await.unwrap();
                out.extend_from_slice(&buf[..n]);
                turn += 1;
            }
            sending.await.unwrap();
            out
        });

        prop_assert_eq!(received, expected);
    }

    /// Any single-bit change anywhere in a message fails authentication.
    #[test]
    fn prop_any_bit_flip_is_rejected(
        data in proptest::collection::vec(any::<u8>(), 0..256),
        position in any::<proptest::sample::Index>(),
        bit in 0u8..8,
    ) {
        let outcome = runtime().block_on(async {
            let secrets = SessionSecrets::generate().unwrap();
            let config = ChannelConfig::default();

            let mut tx = ChannelSender::new(Vec::new(), &secrets, &config).unwrap();
            tx.send(&data).await.unwrap();
            let mut wire = tx.get_ref().clone();
            let index = position.index(wire.len());
            wire[index] ^= 1 << bit;

            let mut rx = ChannelReceiver::new(Cursor::new(wire), &secrets, &config).unwrap();
            let result = rx.recv_message().await;
            (result, rx.is_faulted())
        });

        let (result, faulted) = outcome;
        prop_assert!(
            matches!(result, Err(ChannelError::Authentication { .. })),
            "bit flip not rejected as forgery: {:?}",
            result
        );
        prop_assert!(faulted);
    }
}
