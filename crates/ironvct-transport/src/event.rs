use ironvct_pdu::ChunkHeader;

use crate::ticket::Ticket;

/// Event produced by a backend adapter and relayed to channel owners.
///
/// Session-scoped variants (everything except the data and write outcomes)
/// are delivered without a channel handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// The backend accepted the channel definitions.
    Initialized,
    /// The session connection is established.
    Connected { server_name: Option<String> },
    /// Connected to a host that only speaks the legacy protocol revision.
    V1Connected,
    Disconnected,
    /// The backend is going away for good; the session must tear down.
    Terminated,
    /// One chunk of channel data arrived.
    DataReceived { header: ChunkHeader, data: Vec<u8> },
    WriteComplete { ticket: Option<Ticket> },
    /// Terminal outcome for the write; the transport never retries it.
    WriteCancelled { ticket: Option<Ticket> },
    /// Vendor-defined event code outside the standard set.
    User { code: u32 },
}
