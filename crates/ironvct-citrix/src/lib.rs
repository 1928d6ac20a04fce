#[macro_use]
extern crate tracing;

mod adapter;
mod info;
mod module;

pub use crate::adapter::{CitrixAdapter, PollOutcome};
pub use crate::info::{
    callback_complete, open_virtual_channel, query_host_version, query_last_error, status, status_error,
    DataArrivalSink, DriverError, HostVersion, WdQueryClass, WdSession, WdSetClass, WriteHookBinding,
};
pub use crate::module::{driver_info, ModuleC2h, VdC2h, MODULE_CLASS_VIRTUAL_DRIVER};

/// Width of the per-session channel mask; the historic ceiling on channels
/// when the winstation driver does not report one.
pub const CITRIX_CHANNEL_LIMIT: usize = 32;

/// At most this many chunks are handed to the engine per poll request, so an
/// upload cannot saturate the half-duplex native queue.
pub const MAX_CHUNK_BATCH_SEND: usize = 8;
