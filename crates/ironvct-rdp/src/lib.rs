#[macro_use]
extern crate tracing;

mod adapter;
mod entry;

pub use crate::adapter::RdpAdapter;
pub use crate::entry::{event_code, ChannelRc, SvcEntryPoints};

/// Maximum number of static channel definitions accepted at init time.
pub const CHANNEL_MAX_COUNT: usize = 30;

/// Maximum chunk payload carried per virtual channel PDU.
pub const CHANNEL_CHUNK_LENGTH: usize = 1600;

pub const VIRTUAL_CHANNEL_VERSION_WIN2000: u32 = 1;

/// Ceiling on native writes outstanding at once; chunks beyond it wait in the
/// adapter's queue so the dispatch thread is never blocked.
pub const MAX_CHUNKS_IN_FLIGHT: usize = 64;
