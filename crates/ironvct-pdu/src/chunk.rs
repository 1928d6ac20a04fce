use bitflags::bitflags;

use crate::cursor::{ReadCursor, WriteCursor};
use crate::{Decode, Encode, PduError, PduResult};

/// Default negotiated maximum chunk length when the backend reports none.
pub const DEFAULT_CHUNK_LENGTH: usize = 1600;

bitflags! {
    /// Chunk boundary and control flags carried in the channel PDU header.
    ///
    /// A chunk with neither FIRST nor LAST set is an interior (middle) chunk.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
    pub struct ChunkFlags: u32 {
        const FIRST = 0x0000_0001;
        const LAST = 0x0000_0002;
        const ONLY = Self::FIRST.bits() | Self::LAST.bits();
        const SHOW_PROTOCOL = 0x0000_0010;
        const SUSPEND = 0x0000_0020;
        const RESUME = 0x0000_0040;
        const FAIL = 0x0000_0100;
    }
}

impl ChunkFlags {
    pub fn is_first(self) -> bool {
        self.contains(Self::FIRST)
    }

    pub fn is_last(self) -> bool {
        self.contains(Self::LAST)
    }

    pub fn is_only(self) -> bool {
        self.contains(Self::ONLY)
    }

    pub fn is_middle(self) -> bool {
        !self.intersects(Self::ONLY)
    }
}

/// Channel PDU header prefixed to every chunk on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkHeader {
    /// The total length in bytes of the uncompressed channel message, excluding this header.
    ///
    /// The message can span multiple chunks and the individual chunks will
    /// need to be reassembled in that case.
    pub total_length: u32,
    pub flags: ChunkFlags,
}

impl ChunkHeader {
    const NAME: &'static str = "ChunkHeader";

    const FIXED_PART_SIZE: usize = 4 /* totalLength */ + 4 /* flags */;

    pub const SIZE: usize = Self::FIXED_PART_SIZE;
}

impl Encode for ChunkHeader {
    fn encode(&self, dst: &mut WriteCursor<'_>) -> PduResult<()> {
        ensure_fixed_part_size!(in: dst);

        dst.write_u32(self.total_length);
        dst.write_u32(self.flags.bits());

        Ok(())
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn size(&self) -> usize {
        Self::FIXED_PART_SIZE
    }
}

impl<'de> Decode<'de> for ChunkHeader {
    fn decode(src: &mut ReadCursor<'de>) -> PduResult<Self> {
        ensure_fixed_part_size!(in: src);

        let total_length = src.read_u32();
        let flags = ChunkFlags::from_bits_truncate(src.read_u32());

        Ok(Self { total_length, flags })
    }
}

/// One chunk of a channel message as placed on the wire: header plus payload slice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk<'a> {
    pub header: ChunkHeader,
    pub data: &'a [u8],
}

impl<'a> Chunk<'a> {
    const NAME: &'static str = "Chunk";

    pub fn new(total_length: u32, flags: ChunkFlags, data: &'a [u8]) -> Self {
        Self {
            header: ChunkHeader { total_length, flags },
            data,
        }
    }
}

impl Encode for Chunk<'_> {
    fn encode(&self, dst: &mut WriteCursor<'_>) -> PduResult<()> {
        ensure_size!(in: dst, size: self.size());

        self.header.encode(dst)?;
        dst.write_slice(self.data);

        Ok(())
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn size(&self) -> usize {
        ChunkHeader::SIZE + self.data.len()
    }
}

impl<'de> Decode<'de> for Chunk<'de> {
    fn decode(src: &mut ReadCursor<'de>) -> PduResult<Self> {
        let header = ChunkHeader::decode(src)?;
        let data = src.read_remaining();

        if data.len() > header.total_length as usize {
            return Err(PduError::InvalidField {
                field: "totalLength",
                reason: "chunk payload exceeds declared message length",
            });
        }

        Ok(Self { header, data })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER_ENCODED: [u8; 8] = [0x10, 0x27, 0x00, 0x00, 0x03, 0x00, 0x00, 0x00];

    #[test]
    fn header_encodes_to_known_bytes() {
        let header = ChunkHeader {
            total_length: 10000,
            flags: ChunkFlags::ONLY,
        };

        let encoded = crate::encode_vec(&header).unwrap();
        assert_eq!(encoded, HEADER_ENCODED);
    }

    #[test]
    fn header_decodes_from_known_bytes() {
        let header: ChunkHeader = crate::decode(&HEADER_ENCODED).unwrap();
        assert_eq!(header.total_length, 10000);
        assert!(header.flags.is_only());
    }

    #[test]
    fn middle_flags_are_empty() {
        let flags = ChunkFlags::empty();
        assert!(flags.is_middle());
        assert!(!flags.is_first());
        assert!(!flags.is_last());
    }

    #[test]
    fn oversized_chunk_payload_is_rejected() {
        let mut encoded = Vec::new();
        encoded.extend_from_slice(&2u32.to_le_bytes());
        encoded.extend_from_slice(&ChunkFlags::ONLY.bits().to_le_bytes());
        encoded.extend_from_slice(&[0xAA; 4]);

        assert!(crate::decode::<Chunk<'_>>(&encoded).is_err());
    }

    #[test]
    fn chunk_roundtrip() {
        let payload = [0x42; 32];
        let chunk = Chunk::new(64, ChunkFlags::FIRST, &payload);

        let encoded = crate::encode_vec(&chunk).unwrap();
        let decoded: Chunk<'_> = crate::decode(&encoded).unwrap();

        assert_eq!(decoded, chunk);
    }
}
