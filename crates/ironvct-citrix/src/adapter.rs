use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, OnceLock};

use ironvct_pdu::cursor::WriteCursor;
use ironvct_pdu::{ChannelName, ChunkHeader, Encode, FlowControl};
use ironvct_transport::{
    BackendHandle, BufferPool, ChannelBackend, ChannelEvent, EventSink, OutBuf, Ticket, TicketPool, TransportError,
    TransportResult,
};

use crate::info::{open_virtual_channel, WdSession};
use crate::module::{driver_info, VdC2h};
use crate::{DataArrivalSink, CITRIX_CHANNEL_LIMIT, MAX_CHUNK_BATCH_SEND};

/// Outcome of one poll-driven drain of the outbound queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// The queue is drained; nothing is waiting.
    Idle,
    /// More chunks are waiting, or the engine ran out of buffers; the driver
    /// must request another poll.
    Retry,
}

struct CitrixState {
    /// Open handle to host-assigned channel number.
    channels: HashMap<u32, u16>,
    /// Largest section the engine accepts, learned from the write hook.
    max_write_size: Option<usize>,
    /// Whether the engine wired the queued write procedure; otherwise the
    /// legacy reserve/append/commit path is used.
    queued_writes: bool,
    /// Wire-encoded chunks waiting for the next poll.
    outbound: VecDeque<(u16, OutBuf)>,
    /// Chunk the engine refused on the previous poll; retried first.
    write_last_miss: Option<(u16, OutBuf)>,
}

struct CitrixInner {
    wd: Mutex<Box<dyn WdSession>>,
    pool: BufferPool,
    sink: OnceLock<Arc<dyn EventSink>>,
    state: Mutex<CitrixState>,
    tickets: Mutex<TicketPool>,
}

/// ICA virtual driver backend adapter.
///
/// Outbound chunks are queued and drained on the engine's poll cadence, a
/// bounded batch per poll; inbound traffic arrives through the registered
/// write hook and is decoded from its in-band chunk header. Clones share
/// state: hand one clone to the transport and keep another for the native
/// driver entry points.
#[derive(Clone)]
pub struct CitrixAdapter {
    inner: Arc<CitrixInner>,
}

impl CitrixAdapter {
    pub fn new(wd: Box<dyn WdSession>, pool: BufferPool) -> Self {
        Self {
            inner: Arc::new(CitrixInner {
                wd: Mutex::new(wd),
                pool,
                sink: OnceLock::new(),
                state: Mutex::new(CitrixState {
                    channels: HashMap::new(),
                    max_write_size: None,
                    queued_writes: true,
                    outbound: VecDeque::new(),
                    write_last_miss: None,
                }),
                tickets: Mutex::new(TicketPool::new()),
            }),
        }
    }

    /// Installs the inbound event sink. Events arriving before this are dropped.
    pub fn set_sink(&self, sink: Arc<dyn EventSink>) {
        if self.inner.sink.set(sink).is_err() {
            warn!("event sink installed twice");
        }
    }

    /// Serves the engine's driver-info request for `name`, advertising the
    /// currently open channels and the given flow descriptor.
    pub fn driver_info(&self, name: &ChannelName, flow: FlowControl, dst: &mut [u8]) -> TransportResult<usize> {
        let mask = {
            let state = self.inner.state.lock().expect("adapter state lock");
            state
                .channels
                .values()
                .fold(0u32, |mask, channel| mask | 1u32.wrapping_shl(u32::from(*channel)))
        };

        driver_info(&VdC2h::for_channel(name, mask, flow), dst)
    }

    /// Drains queued chunks into the engine, at most a fixed batch per call.
    ///
    /// Returns `Retry` when the engine ran out of out-buffers or chunks are
    /// still waiting; the native glue maps that onto the poll-retry status.
    pub fn poll(&self) -> TransportResult<PollOutcome> {
        let mut completed = Vec::new();
        let mut cancelled = None;

        // Completion events are emitted only after the state lock is
        // released; the sink takes per-channel locks of its own.
        let outcome = {
            let mut state = self.inner.state.lock().expect("adapter state lock");
            let mut sent = 0;

            loop {
                let next = state.write_last_miss.take().or_else(|| state.outbound.pop_front());
                let Some((channel, buf)) = next else {
                    break Ok(PollOutcome::Idle);
                };

                let result = {
                    let mut wd = self.inner.wd.lock().expect("wd session lock");
                    if state.queued_writes {
                        wd.queue_virtual_write(channel, buf.as_slice(), buf.reliability(), buf.ticket(), false)
                    } else {
                        Self::legacy_outbuf_write(wd.as_mut(), channel, buf.as_slice())
                    }
                };

                match result {
                    Ok(()) => {
                        trace!(channel, len = buf.len(), "chunk queued to engine");
                        completed.push((channel, buf));
                        sent += 1;

                        if sent >= MAX_CHUNK_BATCH_SEND {
                            break if state.outbound.is_empty() {
                                Ok(PollOutcome::Idle)
                            } else {
                                Ok(PollOutcome::Retry)
                            };
                        }
                    }
                    Err(TransportError::NoOutBuf) => {
                        debug!(channel, "engine out of buffers, retrying next poll");
                        state.write_last_miss = Some((channel, buf));
                        break Ok(PollOutcome::Retry);
                    }
                    Err(e) => {
                        error!(channel, error = %e, "virtual write failed");
                        cancelled = Some((channel, buf));
                        break Err(e);
                    }
                }
            }
        };

        for (channel, buf) in completed {
            self.retire(channel, buf);
        }
        if let Some((channel, buf)) = cancelled {
            self.retire_cancelled(channel, buf);
        }

        outcome
    }

    fn legacy_outbuf_write(wd: &mut dyn WdSession, channel: u16, data: &[u8]) -> TransportResult<()> {
        wd.outbuf_reserve(data.len())?;

        let byte_count = u16::try_from(data.len()).map_err(|_| TransportError::MessageTooLarge {
            size: data.len(),
            max: usize::from(u16::MAX),
        })?;
        wd.append_vd_header(channel, byte_count)?;
        wd.outbuf_append(data)?;
        wd.outbuf_write()
    }

    /// Signals that the session connection is established.
    pub fn notify_connected(&self, server_name: Option<String>) {
        self.forward(None, ChannelEvent::Connected { server_name });
    }

    pub fn notify_disconnected(&self) {
        self.fail_outstanding_writes();
        self.forward(None, ChannelEvent::Disconnected);
    }

    /// Driver unload: fails everything still queued and reports Terminated.
    pub fn notify_terminated(&self) {
        self.fail_outstanding_writes();
        self.forward(None, ChannelEvent::Terminated);
    }

    fn forward(&self, handle: Option<BackendHandle>, event: ChannelEvent) {
        match self.inner.sink.get() {
            Some(sink) => sink.handle_event(handle, event),
            None => warn!("event dropped: no sink installed"),
        }
    }

    /// The engine accepted the section: the write is as complete as this
    /// half-duplex transport ever reports, so the ticket is checked in and
    /// the buffer comes home.
    fn retire(&self, channel: u16, buf: OutBuf) {
        let ticket = self.checkin(buf.ticket());
        self.inner.pool.release(buf);
        self.forward(
            Some(BackendHandle(u32::from(channel))),
            ChannelEvent::WriteComplete { ticket },
        );
    }

    fn retire_cancelled(&self, channel: u16, buf: OutBuf) {
        let ticket = self.checkin(buf.ticket());
        self.inner.pool.release(buf);
        self.forward(
            Some(BackendHandle(u32::from(channel))),
            ChannelEvent::WriteCancelled { ticket },
        );
    }

    fn checkin(&self, ticket: Option<Ticket>) -> Option<Ticket> {
        if let Some(ticket) = ticket {
            if let Err(e) = self.inner.tickets.lock().expect("ticket pool lock").checkin(ticket) {
                warn!(%ticket, error = %e, "ticket check-in failed");
            }
        }
        ticket
    }

    fn fail_outstanding_writes(&self) {
        let (queued, missed) = {
            let mut state = self.inner.state.lock().expect("adapter state lock");
            state.channels.clear();
            state.max_write_size = None;
            (
                state.outbound.drain(..).collect::<Vec<_>>(),
                state.write_last_miss.take(),
            )
        };

        let dropped = queued.len() + usize::from(missed.is_some());
        if dropped > 0 {
            debug!(count = dropped, "failing queued writes");
        }

        for (channel, buf) in queued.into_iter().chain(missed) {
            self.retire_cancelled(channel, buf);
        }
    }
}

impl DataArrivalSink for CitrixAdapter {
    /// Inbound path: the engine delivers raw sections carrying the chunk
    /// header in-band.
    fn data_arrival(&self, channel: u16, data: &[u8]) {
        let (header, payload) = match ironvct_pdu::decode::<ChunkHeader>(data) {
            Ok(header) => (header, &data[ChunkHeader::SIZE..]),
            Err(e) => {
                error!(channel, error = %e, "undecodable chunk from engine");
                return;
            }
        };

        self.forward(
            Some(BackendHandle(u32::from(channel))),
            ChannelEvent::DataReceived {
                header,
                data: payload.to_vec(),
            },
        );
    }
}

impl ChannelBackend for CitrixAdapter {
    fn max_chunk_len(&self) -> usize {
        let state = self.inner.state.lock().expect("adapter state lock");
        state
            .max_write_size
            .unwrap_or(ironvct_pdu::DEFAULT_CHUNK_LENGTH + ChunkHeader::SIZE)
            .saturating_sub(ChunkHeader::SIZE)
    }

    fn channel_limit(&self) -> usize {
        CITRIX_CHANNEL_LIMIT
    }

    fn open_channel(&mut self, name: &ChannelName) -> TransportResult<BackendHandle> {
        let sink: Arc<dyn DataArrivalSink> = Arc::new(self.clone());

        let (channel, binding) = {
            let mut wd = self.inner.wd.lock().expect("wd session lock");
            let channel = open_virtual_channel(wd.as_mut(), name)?;
            let binding = wd.register_write_hook(channel, sink)?;
            (channel, binding)
        };

        let minimum = ChunkHeader::SIZE + 1;
        if usize::from(binding.maximum_write_size) < minimum {
            return Err(TransportError::BufferTooSmall { required: minimum });
        }

        debug!(
            name = %name,
            channel,
            maximum_write_size = binding.maximum_write_size,
            qos = binding.qos,
            "virtual channel open"
        );

        let mut state = self.inner.state.lock().expect("adapter state lock");
        state.channels.insert(u32::from(channel), channel);
        state.max_write_size = Some(usize::from(binding.maximum_write_size));
        state.queued_writes = binding.queued_writes;

        Ok(BackendHandle(u32::from(channel)))
    }

    fn write_chunk(&mut self, handle: BackendHandle, buf: OutBuf, header: ChunkHeader) -> TransportResult<()> {
        let mut state = self.inner.state.lock().expect("adapter state lock");

        let Some(channel) = state.channels.get(&handle.0).copied() else {
            self.inner.pool.release(buf);
            return Err(TransportError::NotOpen);
        };

        // The engine carries no chunk metadata of its own; the header rides
        // in-band ahead of the payload.
        let mut wire = self.inner.pool.acquire(ChunkHeader::SIZE + buf.len())?;

        let mut encoded_header = [0; ChunkHeader::SIZE];
        let mut cursor = WriteCursor::new(&mut encoded_header);
        header.encode(&mut cursor)?;

        wire.append(&encoded_header)?;
        wire.append(buf.as_slice())?;
        wire.set_reliability(buf.reliability());
        wire.set_ticket(buf.ticket());

        self.inner.pool.release(buf);

        state.outbound.push_back((channel, wire));

        Ok(())
    }

    fn close_channel(&mut self, handle: BackendHandle) -> TransportResult<()> {
        let mut state = self.inner.state.lock().expect("adapter state lock");

        if state.channels.remove(&handle.0).is_none() {
            return Err(TransportError::NotOpen);
        }

        // Writes already queued for this channel are dropped; the engine has
        // no per-channel close of its own.
        let (keep, drop_writes): (VecDeque<_>, VecDeque<_>) = state
            .outbound
            .drain(..)
            .partition(|(channel, _)| u32::from(*channel) != handle.0);
        state.outbound = keep;

        drop(state);

        for (channel, buf) in drop_writes {
            self.retire_cancelled(channel, buf);
        }

        Ok(())
    }

    fn checkout_ticket(&mut self) -> TransportResult<Ticket> {
        Ok(self.inner.tickets.lock().expect("ticket pool lock").checkout())
    }
}
