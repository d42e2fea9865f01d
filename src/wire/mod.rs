//! Emitter → ingest wire format.
//!
//! Every packet is one self-framing record with a fixed 3-byte header:
//!
//! ```text
//! +-------+---------------+----------------+-----------------+
//! | magic | body_len (BE) | client_id (BE) | payload         |
//! | u8    | u16           | u32            | body_len - 4    |
//! +-------+---------------+----------------+-----------------+
//! ```
//!
//! The id is a full `u32`, so it is recoverable for any fleet size. The
//! decoder reassembles records split across reads and reports corrupt input
//! as [`Decoded::Malformed`] items rather than stream errors, so one bad
//! record never tears down the connection.

mod codec;

pub use codec::{Decoded, FrameError, Packet, PacketCodec};

/// First byte of every record.
pub const MAGIC: u8 = 0xA7;

/// Bytes before the body: magic plus body length.
pub const HEADER_LEN: usize = 3;

/// Smallest valid body: the client id alone.
pub const MIN_BODY_LEN: usize = 4;

/// Largest body the decoder accepts.
pub const MAX_BODY_LEN: usize = 1024;

/// Payload tag emitters attach to every packet.
pub const DEFAULT_PAYLOAD: &[u8] = b"data";
