use thiserror::Error;

#[macro_use]
mod macros;

pub mod cursor;

mod channel;
mod chunk;
mod flow;

pub use crate::channel::{ChannelDef, ChannelName, ChannelOptions};
pub use crate::chunk::{Chunk, ChunkFlags, ChunkHeader, DEFAULT_CHUNK_LENGTH};
pub use crate::flow::{FlowAck, FlowControl, FlowDelay, FlowKind, FlowQuota};

use crate::cursor::{ReadCursor, WriteCursor};

pub type PduResult<T> = Result<T, PduError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PduError {
    #[error("not enough bytes: received {received}, expected {expected}")]
    NotEnoughBytes { received: usize, expected: usize },
    #[error("invalid `{field}`: {reason}")]
    InvalidField {
        field: &'static str,
        reason: &'static str,
    },
    #[error("unexpected message type ({got})")]
    UnexpectedMessageType { got: u8 },
}

/// A type that can be encoded into its wire representation.
pub trait Encode {
    fn encode(&self, dst: &mut WriteCursor<'_>) -> PduResult<()>;

    /// Name of the structure, for diagnostics.
    fn name(&self) -> &'static str;

    /// Exact size in bytes of the encoded representation.
    fn size(&self) -> usize;
}

/// A type that can be decoded from its wire representation.
pub trait Decode<'de>: Sized {
    fn decode(src: &mut ReadCursor<'de>) -> PduResult<Self>;
}

/// Encodes a structure into a freshly allocated vector.
pub fn encode_vec<T: Encode + ?Sized>(pdu: &T) -> PduResult<Vec<u8>> {
    let mut buf = vec![0; pdu.size()];
    let mut cursor = WriteCursor::new(&mut buf);
    pdu.encode(&mut cursor)?;
    let written = cursor.pos();
    buf.truncate(written);
    Ok(buf)
}

/// Decodes a structure from the beginning of `src`.
pub fn decode<'de, T: Decode<'de>>(src: &'de [u8]) -> PduResult<T> {
    let mut cursor = ReadCursor::new(src);
    T::decode(&mut cursor)
}
