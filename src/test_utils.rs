//! Helpers shared by unit tests and benchmarks

#![cfg(any(test, feature = "benchmark"))]

use bytes::{Bytes, BytesMut};

use crate::wire::{DEFAULT_PAYLOAD, Packet};

/// Encode one default packet for `client_id`.
pub fn encoded_packet(client_id: u32) -> Bytes {
    Packet::new(client_id, DEFAULT_PAYLOAD).to_bytes().expect("default payload fits a frame")
}

/// Encode default packets for `client_ids` back to back, as one stream.
pub fn encoded_stream<I>(client_ids: I) -> Bytes
where
    I: IntoIterator<Item = u32>,
{
    let mut wire = BytesMut::new();
    for id in client_ids {
        wire.extend_from_slice(&encoded_packet(id));
    }
    wire.freeze()
}

/// Install a test subscriber honouring `RUST_LOG`; safe to call repeatedly.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
