#[macro_use]
extern crate tracing;

mod backend;
mod chunking;
mod event;
mod flow;
mod pool;
mod registry;
mod ticket;
mod transport;

pub use crate::backend::{BackendHandle, ChannelBackend, EventSink};
pub use crate::chunking::{chunkify, Reassembler};
pub use crate::event::ChannelEvent;
pub use crate::flow::{Admission, FlowController, FlowPolicy};
pub use crate::pool::{BufferPool, OutBuf, Reliability};
pub use crate::registry::{ChannelEntry, ChannelId, ChannelRegistry, ChannelState};
pub use crate::ticket::{Ticket, TicketPool};
pub use crate::transport::{ChannelHandler, Transport, TransportConfig, WriteStatus};

use ironvct_pdu::{ChannelName, PduError};
use thiserror::Error;

pub type TransportResult<T> = Result<T, TransportError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("channel name already registered: {0}")]
    DuplicateName(ChannelName),
    #[error("too many channels (backend limit is {limit})")]
    TooManyChannels { limit: usize },
    #[error("no channel registered under this name or id")]
    BadChannel,
    #[error("channel is already open")]
    AlreadyOpen,
    #[error("channel is not open")]
    NotOpen,
    #[error("backend is not connected")]
    NotConnected,
    #[error("chunk sequence violation: {reason}")]
    CorruptStream { reason: &'static str },
    #[error("message of {size} bytes exceeds the configured maximum of {max}")]
    MessageTooLarge { size: usize, max: usize },
    #[error("write of {len} bytes can never satisfy the flow policy limit of {limit}")]
    WriteTooLarge { len: usize, limit: usize },
    #[error("buffer too small: {required} bytes required")]
    BufferTooSmall { required: usize },
    #[error("out of memory")]
    OutOfMemory,
    #[error("no outbound buffer available")]
    NoOutBuf,
    #[error("null pointer passed across the driver boundary")]
    NullPointer,
    #[error("delivery ticket {0} is attached to a write still in flight")]
    TicketInUse(Ticket),
    #[error("delivery ticket {0} is not checked out")]
    TicketNotCheckedOut(Ticket),
    #[error("flow policy can only be changed while the channel is idle")]
    PolicyChangeWhileBusy,
    #[error("unsupported information class")]
    Unsupported,
    #[error("backend failure (code {code})")]
    Backend { code: i32 },
    #[error(transparent)]
    Pdu(#[from] PduError),
}
