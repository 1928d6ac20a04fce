use std::sync::Arc;

use ironvct_pdu::{assert_obj_safe, ChannelName};
use ironvct_transport::{Reliability, Ticket, TransportError, TransportResult};

/// Native client status codes of the driver boundary.
pub mod status {
    pub const SUCCESS: i32 = 0;
    pub const ERROR_RETRY: i32 = 30;
    pub const ERROR: i32 = 1000;
    pub const BUFFER_TOO_SMALL: i32 = 1004;
    pub const NULL_MEM_POINTER: i32 = 1011;
    pub const NO_OUTBUF: i32 = 1016;
}

/// Maps a native client status code onto the transport error taxonomy.
///
/// `required` qualifies `BUFFER_TOO_SMALL`: the length the caller must retry
/// with, when the driver reported one.
pub fn status_error(code: i32, required: usize) -> TransportError {
    match code {
        status::BUFFER_TOO_SMALL => TransportError::BufferTooSmall { required },
        status::NULL_MEM_POINTER => TransportError::NullPointer,
        status::NO_OUTBUF => TransportError::NoOutBuf,
        code => TransportError::Backend { code },
    }
}

/// Information classes served by the winstation driver query protocol.
///
/// The vendor enumeration carries dozens of classes; these are the ones this
/// transport consumes. Anything else is answered with `Unsupported`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WdQueryClass {
    HostVersion,
    OpenVirtualChannel,
    LastError,
}

/// Information classes accepted by the winstation driver set protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WdSetClass {
    CallbackComplete,
}

/// Write hook binding returned when the driver registers for a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteHookBinding {
    /// Largest section the engine accepts in one virtual write.
    pub maximum_write_size: u16,
    /// Whether the engine write path carries reliability class and ticket.
    pub qos: bool,
    /// Whether the engine wires the queued write procedure; otherwise the
    /// driver goes through the legacy reserve/append/commit out-buffer path.
    pub queued_writes: bool,
}

/// Inbound data sink registered together with the write hook.
pub trait DataArrivalSink: Send + Sync {
    fn data_arrival(&self, channel: u16, data: &[u8]);
}

assert_obj_safe!(DataArrivalSink);

/// The winstation driver boundary, as a typed-property-bag protocol: class
/// tag plus opaque byte payload in either direction.
///
/// Implemented by the native glue over the real driver procedure table, and
/// by test doubles.
pub trait WdSession: Send {
    /// Queries one information class into `buf`, returning the number of
    /// bytes written. An undersized `buf` fails with `BufferTooSmall`
    /// carrying the required length; the caller retries with that length.
    fn query_information(&mut self, class: WdQueryClass, buf: &mut [u8]) -> TransportResult<usize>;

    fn set_information(&mut self, class: WdSetClass, data: &[u8]) -> TransportResult<()>;

    /// Hooks the driver into the engine's write path for `channel` and
    /// registers `on_data` for inbound traffic.
    fn register_write_hook(
        &mut self,
        channel: u16,
        on_data: Arc<dyn DataArrivalSink>,
    ) -> TransportResult<WriteHookBinding>;

    /// Queues one section for transmission, with its QoS metadata when the
    /// hook binding reports a QoS-capable engine. Fails with `NoOutBuf` when
    /// the engine has no out-buffers left; the caller retries on the next
    /// poll.
    fn queue_virtual_write(
        &mut self,
        channel: u16,
        data: &[u8],
        reliability: Reliability,
        ticket: Option<Ticket>,
        flush: bool,
    ) -> TransportResult<()>;

    /// Legacy out-buffer write path: reserve an engine buffer, fill it, then
    /// commit it. Engines that wire the queued write procedure supersede
    /// these; the hook binding says which path is active.
    fn outbuf_reserve(&mut self, byte_count: usize) -> TransportResult<()>;

    fn outbuf_append(&mut self, data: &[u8]) -> TransportResult<()>;

    /// Prepends the per-channel header to the reserved buffer.
    fn append_vd_header(&mut self, channel: u16, byte_count: u16) -> TransportResult<()>;

    /// Commits the reserved buffer to the wire.
    fn outbuf_write(&mut self) -> TransportResult<()>;
}

assert_obj_safe!(WdSession);

/// Host version reported by the winstation driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostVersion {
    pub major: u16,
    pub minor: u16,
}

/// Last error recorded by the winstation driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverError {
    pub code: i32,
    pub message: String,
}

const HOST_VERSION_LEN: usize = 4;
const OPEN_CHANNEL_LEN: usize = ChannelName::SIZE + 2;
const MAX_ERROR_MESSAGE: usize = 288;
const LAST_ERROR_LEN: usize = 4 + MAX_ERROR_MESSAGE;

fn query_with_retry(
    wd: &mut dyn WdSession,
    class: WdQueryClass,
    buf: &mut Vec<u8>,
) -> TransportResult<usize> {
    match wd.query_information(class, buf) {
        Err(TransportError::BufferTooSmall { required }) => {
            buf.resize(required, 0);
            wd.query_information(class, buf)
        }
        other => other,
    }
}

/// Queries the host version, retrying once with the reported length if the
/// initial buffer is undersized.
pub fn query_host_version(wd: &mut dyn WdSession) -> TransportResult<HostVersion> {
    let mut buf = vec![0; HOST_VERSION_LEN];
    let len = query_with_retry(wd, WdQueryClass::HostVersion, &mut buf)?;

    if len < HOST_VERSION_LEN {
        return Err(TransportError::BufferTooSmall {
            required: HOST_VERSION_LEN,
        });
    }

    Ok(HostVersion {
        major: u16::from_le_bytes([buf[0], buf[1]]),
        minor: u16::from_le_bytes([buf[2], buf[3]]),
    })
}

/// Requests a virtual channel for `name` and returns the channel number the
/// host assigned.
pub fn open_virtual_channel(wd: &mut dyn WdSession, name: &ChannelName) -> TransportResult<u16> {
    let mut buf = vec![0; OPEN_CHANNEL_LEN];
    buf[..ChannelName::SIZE].copy_from_slice(name.as_bytes());

    let len = query_with_retry(wd, WdQueryClass::OpenVirtualChannel, &mut buf)?;

    if len < OPEN_CHANNEL_LEN {
        return Err(TransportError::BufferTooSmall {
            required: OPEN_CHANNEL_LEN,
        });
    }

    Ok(u16::from_le_bytes([buf[ChannelName::SIZE], buf[ChannelName::SIZE + 1]]))
}

/// Retrieves the last error recorded by the winstation driver.
pub fn query_last_error(wd: &mut dyn WdSession) -> TransportResult<DriverError> {
    let mut buf = vec![0; LAST_ERROR_LEN];
    let len = query_with_retry(wd, WdQueryClass::LastError, &mut buf)?;

    if len < 4 {
        return Err(TransportError::BufferTooSmall { required: LAST_ERROR_LEN });
    }

    let code = i32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
    let message = &buf[4..len];
    let terminator = message.iter().position(|b| *b == 0).unwrap_or(message.len());
    let message = String::from_utf8_lossy(&message[..terminator]).into_owned();

    Ok(DriverError { code, message })
}

/// Signals the driver's callback completion back to the engine.
pub fn callback_complete(wd: &mut dyn WdSession) -> TransportResult<()> {
    wd.set_information(WdSetClass::CallbackComplete, &[])
}
