use core::fmt;

use ironvct_pdu::{assert_obj_safe, ChannelDef, ChannelName};
use ironvct_transport::{Reliability, Ticket, TransportError};

use crate::CHANNEL_MAX_COUNT;

/// Event codes delivered by the native SVC dispatch.
pub mod event_code {
    pub const INITIALIZED: u32 = 0;
    pub const CONNECTED: u32 = 1;
    pub const V1_CONNECTED: u32 = 2;
    pub const DISCONNECTED: u32 = 3;
    pub const TERMINATED: u32 = 4;
    pub const DATA_RECEIVED: u32 = 10;
    pub const WRITE_COMPLETE: u32 = 11;
    pub const WRITE_CANCELLED: u32 = 12;
    pub const USER: u32 = 1000;
}

/// Return codes of the native virtual channel entry points.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelRc {
    Ok,
    AlreadyInitialized,
    NotInitialized,
    AlreadyConnected,
    NotConnected,
    TooManyChannels,
    BadChannel,
    BadChannelHandle,
    NoBuffer,
    BadInitHandle,
    NotOpen,
    BadProc,
    NoMemory,
    UnknownChannelName,
    AlreadyOpen,
    NotInVirtualChannelEntry,
    NullData,
    ZeroLength,
    Other(u32),
}

impl ChannelRc {
    pub fn from_u32(value: u32) -> Self {
        match value {
            0 => Self::Ok,
            1 => Self::AlreadyInitialized,
            2 => Self::NotInitialized,
            3 => Self::AlreadyConnected,
            4 => Self::NotConnected,
            5 => Self::TooManyChannels,
            6 => Self::BadChannel,
            7 => Self::BadChannelHandle,
            8 => Self::NoBuffer,
            9 => Self::BadInitHandle,
            10 => Self::NotOpen,
            11 => Self::BadProc,
            12 => Self::NoMemory,
            13 => Self::UnknownChannelName,
            14 => Self::AlreadyOpen,
            15 => Self::NotInVirtualChannelEntry,
            16 => Self::NullData,
            17 => Self::ZeroLength,
            other => Self::Other(other),
        }
    }

    pub fn as_u32(self) -> u32 {
        match self {
            Self::Ok => 0,
            Self::AlreadyInitialized => 1,
            Self::NotInitialized => 2,
            Self::AlreadyConnected => 3,
            Self::NotConnected => 4,
            Self::TooManyChannels => 5,
            Self::BadChannel => 6,
            Self::BadChannelHandle => 7,
            Self::NoBuffer => 8,
            Self::BadInitHandle => 9,
            Self::NotOpen => 10,
            Self::BadProc => 11,
            Self::NoMemory => 12,
            Self::UnknownChannelName => 13,
            Self::AlreadyOpen => 14,
            Self::NotInVirtualChannelEntry => 15,
            Self::NullData => 16,
            Self::ZeroLength => 17,
            Self::Other(other) => other,
        }
    }
}

impl fmt::Display for ChannelRc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ok => write!(f, "ok"),
            Self::AlreadyInitialized => write!(f, "already initialized"),
            Self::NotInitialized => write!(f, "not initialized"),
            Self::AlreadyConnected => write!(f, "already connected"),
            Self::NotConnected => write!(f, "not connected"),
            Self::TooManyChannels => write!(f, "too many channels"),
            Self::BadChannel => write!(f, "bad channel"),
            Self::BadChannelHandle => write!(f, "bad channel handle"),
            Self::NoBuffer => write!(f, "no buffer"),
            Self::BadInitHandle => write!(f, "bad init handle"),
            Self::NotOpen => write!(f, "not open"),
            Self::BadProc => write!(f, "bad proc"),
            Self::NoMemory => write!(f, "no memory"),
            Self::UnknownChannelName => write!(f, "unknown channel name"),
            Self::AlreadyOpen => write!(f, "already open"),
            Self::NotInVirtualChannelEntry => write!(f, "not in VirtualChannelEntry"),
            Self::NullData => write!(f, "null data"),
            Self::ZeroLength => write!(f, "zero length"),
            Self::Other(code) => write!(f, "vendor code {code}"),
        }
    }
}

impl From<ChannelRc> for TransportError {
    fn from(rc: ChannelRc) -> Self {
        match rc {
            ChannelRc::TooManyChannels => Self::TooManyChannels {
                limit: CHANNEL_MAX_COUNT,
            },
            ChannelRc::BadChannel | ChannelRc::UnknownChannelName | ChannelRc::BadChannelHandle => Self::BadChannel,
            ChannelRc::NotOpen => Self::NotOpen,
            ChannelRc::AlreadyOpen => Self::AlreadyOpen,
            ChannelRc::NotConnected | ChannelRc::NotInitialized => Self::NotConnected,
            ChannelRc::NoMemory => Self::OutOfMemory,
            ChannelRc::NoBuffer => Self::NoOutBuf,
            ChannelRc::NullData => Self::NullPointer,
            other => Self::Backend {
                code: other.as_u32() as i32,
            },
        }
    }
}

/// Native virtual channel entry points, basic or extended calling convention.
///
/// The extended convention differs only by threading an explicit user
/// parameter and init handle through every call; implementations hide that
/// difference behind this one interface, the way the adapter consumes it.
pub trait SvcEntryPoints: Send {
    /// Supplies the channel definitions. Called once, before the connection.
    fn init(&mut self, channels: &[ChannelDef], version_requested: u32) -> Result<(), ChannelRc>;

    fn open(&mut self, name: &ChannelName) -> Result<u32, ChannelRc>;

    fn close(&mut self, open_handle: u32) -> Result<(), ChannelRc>;

    /// Plain write. `user_data` is echoed back in the completion event.
    fn write(&mut self, open_handle: u32, data: &[u8], user_data: u32) -> Result<(), ChannelRc>;

    /// QoS write carrying an explicit reliability class and delivery ticket.
    fn write_qos(
        &mut self,
        open_handle: u32,
        data: &[u8],
        reliability: Reliability,
        ticket: Ticket,
        user_data: u32,
    ) -> Result<(), ChannelRc>;
}

assert_obj_safe!(SvcEntryPoints);
