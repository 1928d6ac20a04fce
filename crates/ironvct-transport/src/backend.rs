use ironvct_pdu::{assert_obj_safe, ChannelName, ChunkHeader};

use crate::event::ChannelEvent;
use crate::pool::OutBuf;
use crate::ticket::Ticket;
use crate::TransportResult;

/// Handle to an open channel within a backend adapter.
///
/// Valid only between a successful `open_channel` and the matching
/// `close_channel` (or a backend disconnect).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BackendHandle(pub u32);

/// Capability set implemented by every vendor adapter.
///
/// The transport core drives adapters exclusively through this trait; inbound
/// traffic flows the other way, through the [`EventSink`] installed when the
/// adapter is created.
pub trait ChannelBackend: Send {
    /// Negotiated maximum payload bytes per chunk.
    fn max_chunk_len(&self) -> usize;

    /// Backend-imposed ceiling on the number of channels per session.
    fn channel_limit(&self) -> usize;

    fn open_channel(&mut self, name: &ChannelName) -> TransportResult<BackendHandle>;

    /// Hands one chunk to the native transport.
    ///
    /// `buf` holds the chunk payload; `header` describes its boundaries.
    /// Ownership of `buf` transfers to the adapter until the backend signals
    /// write-complete or write-cancelled, after which the adapter returns it
    /// to the pool. Must not block: adapters queue internally when the native
    /// transport cannot take more data.
    fn write_chunk(&mut self, handle: BackendHandle, buf: OutBuf, header: ChunkHeader) -> TransportResult<()>;

    fn close_channel(&mut self, handle: BackendHandle) -> TransportResult<()>;

    /// Checks out a delivery ticket for an unreliable write.
    fn checkout_ticket(&mut self) -> TransportResult<Ticket>;
}

assert_obj_safe!(ChannelBackend);

/// Inbound event sink invoked from the backend's native dispatch context.
///
/// Implementations must not block: event delivery owns the backend's single
/// dispatch thread, and stalling it would head-of-line block every channel.
pub trait EventSink: Send + Sync {
    /// `handle` is `None` for session-scoped events (Initialized, Connected,
    /// V1Connected, Disconnected, Terminated).
    fn handle_event(&self, handle: Option<BackendHandle>, event: ChannelEvent);
}

assert_obj_safe!(EventSink);
