use crate::cursor::{ReadCursor, WriteCursor};
use crate::{Decode, Encode, PduError, PduResult};

/// Ack-windowed flow descriptor: the writer may not exceed `window_size`
/// outstanding bytes before an acknowledgment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlowAck {
    pub max_window_size: u16,
    pub window_size: u16,
}

/// Delay-based flow descriptor: minimum time between two writes, in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlowDelay {
    pub delay_time: u32,
}

/// Quota-based flow descriptor: per-tick byte budget ceiling paired with a
/// maximum byte count per single write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlowQuota {
    pub max_window_size: u16,
    pub max_byte_count: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowKind {
    None,
    Ack(FlowAck),
    Delay(FlowDelay),
    Quota(FlowQuota),
}

impl FlowKind {
    pub fn class(&self) -> u8 {
        match self {
            Self::None => 0,
            Self::Ack(_) => 1,
            Self::Delay(_) => 2,
            Self::Quota(_) => 3,
        }
    }
}

/// Per-channel flow-control descriptor advertised to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlowControl {
    pub bandwidth_quota: u8,
    pub kind: FlowKind,
}

impl FlowControl {
    const NAME: &'static str = "FlowControl";

    const FIXED_PART_SIZE: usize = 1 /* quota */ + 1 /* class */ + 2 /* pad */ + 4 /* descriptor */;

    pub const SIZE: usize = Self::FIXED_PART_SIZE;

    pub const fn none() -> Self {
        Self {
            bandwidth_quota: 0,
            kind: FlowKind::None,
        }
    }
}

impl Encode for FlowControl {
    fn encode(&self, dst: &mut WriteCursor<'_>) -> PduResult<()> {
        ensure_fixed_part_size!(in: dst);

        dst.write_u8(self.bandwidth_quota);
        dst.write_u8(self.kind.class());
        dst.write_slice(&[0, 0]); // pad

        match self.kind {
            FlowKind::None => dst.write_u32(0),
            FlowKind::Ack(ack) => {
                dst.write_u16(ack.max_window_size);
                dst.write_u16(ack.window_size);
            }
            FlowKind::Delay(delay) => dst.write_u32(delay.delay_time),
            FlowKind::Quota(quota) => {
                dst.write_u16(quota.max_window_size);
                dst.write_u16(quota.max_byte_count);
            }
        }

        Ok(())
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn size(&self) -> usize {
        Self::FIXED_PART_SIZE
    }
}

impl<'de> Decode<'de> for FlowControl {
    fn decode(src: &mut ReadCursor<'de>) -> PduResult<Self> {
        ensure_fixed_part_size!(in: src);

        let bandwidth_quota = src.read_u8();
        let class = src.read_u8();
        let _pad = src.read_array::<2>();

        let kind = match class {
            0 => {
                let _ = src.read_u32();
                FlowKind::None
            }
            1 => FlowKind::Ack(FlowAck {
                max_window_size: src.read_u16(),
                window_size: src.read_u16(),
            }),
            2 => FlowKind::Delay(FlowDelay {
                delay_time: src.read_u32(),
            }),
            3 => FlowKind::Quota(FlowQuota {
                max_window_size: src.read_u16(),
                max_byte_count: src.read_u16(),
            }),
            got => return Err(PduError::UnexpectedMessageType { got }),
        };

        Ok(Self { bandwidth_quota, kind })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ack_descriptor_roundtrip() {
        let flow = FlowControl {
            bandwidth_quota: 0,
            kind: FlowKind::Ack(FlowAck {
                max_window_size: 4096,
                window_size: 2048,
            }),
        };

        let encoded = crate::encode_vec(&flow).unwrap();
        assert_eq!(encoded.len(), FlowControl::SIZE);

        let decoded: FlowControl = crate::decode(&encoded).unwrap();
        assert_eq!(decoded, flow);
    }

    #[test]
    fn unknown_class_is_rejected() {
        let encoded = [0, 9, 0, 0, 0, 0, 0, 0];
        assert_eq!(
            crate::decode::<FlowControl>(&encoded),
            Err(PduError::UnexpectedMessageType { got: 9 })
        );
    }

    #[test]
    fn none_descriptor_roundtrip() {
        let encoded = crate::encode_vec(&FlowControl::none()).unwrap();
        let decoded: FlowControl = crate::decode(&encoded).unwrap();
        assert_eq!(decoded, FlowControl::none());
    }
}
