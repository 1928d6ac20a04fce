use ironvct_pdu::cursor::{ReadCursor, WriteCursor};
use ironvct_pdu::{ensure_fixed_part_size, ensure_size, ChannelName, Decode, Encode, FlowControl, PduResult};
use ironvct_transport::{TransportError, TransportResult};

pub const MODULE_CLASS_VIRTUAL_DRIVER: u8 = 3;

const MODULE_NAME_LEN: usize = 13;
const HOST_MODULE_NAME_LEN: usize = 9;

/// Client-to-host module advertisement header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleC2h {
    pub byte_count: u16,
    pub module_count: u8,
    pub module_class: u8,
    pub version_low: u8,
    pub version_high: u8,
    pub module_name: [u8; MODULE_NAME_LEN],
    pub host_module_name: [u8; HOST_MODULE_NAME_LEN],
    pub module_date: u16,
    pub module_time: u16,
    pub module_size: u32,
}

impl ModuleC2h {
    const NAME: &'static str = "ModuleC2h";

    const FIXED_PART_SIZE: usize = 2 /* byteCount */ + 1 /* moduleCount */ + 1 /* moduleClass */
        + 1 /* versionL */ + 1 /* versionH */ + MODULE_NAME_LEN + HOST_MODULE_NAME_LEN
        + 2 /* moduleDate */ + 2 /* moduleTime */ + 4 /* moduleSize */;

    pub const SIZE: usize = Self::FIXED_PART_SIZE;
}

impl Encode for ModuleC2h {
    fn encode(&self, dst: &mut WriteCursor<'_>) -> PduResult<()> {
        ensure_fixed_part_size!(in: dst);

        dst.write_u16(self.byte_count);
        dst.write_u8(self.module_count);
        dst.write_u8(self.module_class);
        dst.write_u8(self.version_low);
        dst.write_u8(self.version_high);
        dst.write_slice(&self.module_name);
        dst.write_slice(&self.host_module_name);
        dst.write_u16(self.module_date);
        dst.write_u16(self.module_time);
        dst.write_u32(self.module_size);

        Ok(())
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn size(&self) -> usize {
        Self::FIXED_PART_SIZE
    }
}

impl<'de> Decode<'de> for ModuleC2h {
    fn decode(src: &mut ReadCursor<'de>) -> PduResult<Self> {
        ensure_fixed_part_size!(in: src);

        Ok(Self {
            byte_count: src.read_u16(),
            module_count: src.read_u8(),
            module_class: src.read_u8(),
            version_low: src.read_u8(),
            version_high: src.read_u8(),
            module_name: src.read_array(),
            host_module_name: src.read_array(),
            module_date: src.read_u16(),
            module_time: src.read_u16(),
            module_size: src.read_u32(),
        })
    }
}

/// Virtual driver client-to-host advertisement: module header, channel mask
/// and the flow-control descriptor the host should honor for the channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VdC2h {
    pub header: ModuleC2h,
    pub channel_mask: u32,
    pub flow: FlowControl,
}

impl VdC2h {
    const NAME: &'static str = "VdC2h";

    pub const SIZE: usize = ModuleC2h::SIZE + 4 /* channelMask */ + FlowControl::SIZE;

    /// Builds the advertisement for one virtual channel.
    pub fn for_channel(name: &ChannelName, channel_mask: u32, flow: FlowControl) -> Self {
        let mut host_module_name = [0; HOST_MODULE_NAME_LEN];
        for (dst, src) in host_module_name.iter_mut().zip(name.as_bytes()) {
            *dst = *src;
        }

        Self {
            header: ModuleC2h {
                byte_count: Self::SIZE as u16,
                module_count: 1,
                module_class: MODULE_CLASS_VIRTUAL_DRIVER,
                version_low: 1,
                version_high: 1,
                module_name: [0; MODULE_NAME_LEN],
                host_module_name,
                module_date: 0,
                module_time: 0,
                module_size: 0,
            },
            channel_mask,
            flow,
        }
    }
}

impl Encode for VdC2h {
    fn encode(&self, dst: &mut WriteCursor<'_>) -> PduResult<()> {
        ensure_size!(in: dst, size: self.size());

        self.header.encode(dst)?;
        dst.write_u32(self.channel_mask);
        self.flow.encode(dst)?;

        Ok(())
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn size(&self) -> usize {
        Self::SIZE
    }
}

impl<'de> Decode<'de> for VdC2h {
    fn decode(src: &mut ReadCursor<'de>) -> PduResult<Self> {
        let header = ModuleC2h::decode(src)?;
        ensure_size!(in: src, size: 4 + FlowControl::SIZE);
        let channel_mask = src.read_u32();
        let flow = FlowControl::decode(src)?;

        Ok(Self {
            header,
            channel_mask,
            flow,
        })
    }
}

/// Serves the driver-info request: writes the advertisement into the
/// engine-supplied buffer.
///
/// An undersized buffer fails with `BufferTooSmall` carrying the required
/// length, which the engine echoes back on retry.
pub fn driver_info(record: &VdC2h, dst: &mut [u8]) -> TransportResult<usize> {
    let required = record.size();

    if dst.len() < required {
        debug!(available = dst.len(), required, "driver info buffer too small");
        return Err(TransportError::BufferTooSmall { required });
    }

    let mut cursor = WriteCursor::new(dst);
    record.encode(&mut cursor)?;
    Ok(cursor.pos())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> VdC2h {
        VdC2h::for_channel(
            &ChannelName::from_static(b"SNDVC\0\0\0"),
            1 << 5,
            FlowControl::none(),
        )
    }

    #[test]
    fn advertisement_roundtrip() {
        let record = record();

        let encoded = ironvct_pdu::encode_vec(&record).unwrap();
        assert_eq!(encoded.len(), VdC2h::SIZE);

        let decoded: VdC2h = ironvct_pdu::decode(&encoded).unwrap();
        assert_eq!(decoded, record);
    }

    #[test]
    fn driver_info_reports_required_length() {
        let record = record();
        let mut short = [0; 16];

        assert_eq!(
            driver_info(&record, &mut short),
            Err(TransportError::BufferTooSmall { required: VdC2h::SIZE })
        );

        let mut exact = vec![0; VdC2h::SIZE];
        assert_eq!(driver_info(&record, &mut exact), Ok(VdC2h::SIZE));
    }
}
