use core::{fmt, str};

use bitflags::bitflags;

use crate::cursor::{ReadCursor, WriteCursor};
use crate::{Decode, Encode, PduResult};

/// An 8-byte array containing a null-terminated collection of up to seven ANSI characters
/// with the purpose of uniquely identifying a channel.
///
/// Only the first seven characters are significant and lookups treat names
/// case-insensitively, matching the vendor channel-name length limit. Longer
/// input is truncated on construction; this lossy behavior is part of the
/// contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChannelName {
    inner: [u8; Self::SIZE],
}

impl ChannelName {
    pub const SIZE: usize = 8;

    /// Number of significant characters in a channel name.
    pub const SIGNIFICANT: usize = 7;

    /// Creates a channel name using the provided array, ensuring the last byte is always the null terminator.
    pub const fn new(mut value: [u8; Self::SIZE]) -> Self {
        value[Self::SIZE - 1] = 0;
        Self { inner: value }
    }

    /// Converts an UTF-8 string into a channel name by copying up to 7 ASCII bytes.
    ///
    /// Returns `None` when the string contains a non-ASCII character within the
    /// significant prefix.
    pub fn from_utf8(value: &str) -> Option<Self> {
        let mut inner = [0; Self::SIZE];

        value
            .chars()
            .take(Self::SIGNIFICANT)
            .zip(inner.iter_mut())
            .try_for_each(|(src, dst)| {
                let c = u8::try_from(src).ok()?;
                c.is_ascii().then(|| *dst = c)
            })?;

        Some(Self { inner })
    }

    /// Converts a static u8 array into a channel name.
    ///
    /// # Panics
    ///
    /// Panics if input is not null-terminated.
    pub const fn from_static(value: &'static [u8; Self::SIZE]) -> Self {
        if value[Self::SIZE - 1] != 0 {
            panic!("channel name must be null-terminated")
        }

        Self { inner: *value }
    }

    /// Returns the underlying raw representation of the channel name (an 8-byte array).
    pub fn as_bytes(&self) -> &[u8; Self::SIZE] {
        &self.inner
    }

    /// Get a &str if this channel name is a valid ASCII string.
    pub fn as_str(&self) -> Option<&str> {
        if self.inner.iter().all(u8::is_ascii) {
            let terminator_idx = self
                .inner
                .iter()
                .position(|c| *c == 0)
                .expect("null-terminated ASCII string");
            Some(str::from_utf8(&self.inner[..terminator_idx]).expect("ASCII characters"))
        } else {
            None
        }
    }

    /// The seven significant characters, folded to uppercase.
    ///
    /// Two channels whose normalized forms are equal name the same channel.
    pub fn normalized(&self) -> [u8; Self::SIGNIFICANT] {
        let mut out = [0; Self::SIGNIFICANT];
        for (dst, src) in out.iter_mut().zip(self.inner.iter()) {
            *dst = src.to_ascii_uppercase();
        }
        out
    }

    pub fn eq_ignore_case(&self, other: &Self) -> bool {
        self.normalized() == other.normalized()
    }
}

impl fmt::Display for ChannelName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.as_str() {
            Some(name) => write!(f, "{name}"),
            None => write!(f, "{:?}", self.inner),
        }
    }
}

bitflags! {
    /// Channel Definition Structure option flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ChannelOptions: u32 {
        const INITIALIZED = 0x8000_0000;
        const ENCRYPT_RDP = 0x4000_0000;
        const PRI_HIGH = 0x0800_0000;
        const PRI_MED = 0x0400_0000;
        const PRI_LOW = 0x0200_0000;
        const COMPRESS = 0x0040_0000;
        const SHOW_PROTOCOL = 0x0020_0000;
        const REMOTE_CONTROL_PERSISTENT = 0x0010_0000;
    }
}

/// Channel definition record supplied to the backend at initialization time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelDef {
    pub name: ChannelName,
    pub options: ChannelOptions,
}

impl ChannelDef {
    const NAME: &'static str = "ChannelDef";

    const FIXED_PART_SIZE: usize = ChannelName::SIZE + 4 /* options */;
}

impl Encode for ChannelDef {
    fn encode(&self, dst: &mut WriteCursor<'_>) -> PduResult<()> {
        ensure_fixed_part_size!(in: dst);

        dst.write_slice(self.name.as_bytes());
        dst.write_u32(self.options.bits());

        Ok(())
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn size(&self) -> usize {
        Self::FIXED_PART_SIZE
    }
}

impl<'de> Decode<'de> for ChannelDef {
    fn decode(src: &mut ReadCursor<'de>) -> PduResult<Self> {
        ensure_fixed_part_size!(in: src);

        let name = ChannelName::new(src.read_array());
        let options = ChannelOptions::from_bits_truncate(src.read_u32());

        Ok(Self { name, options })
    }
}
