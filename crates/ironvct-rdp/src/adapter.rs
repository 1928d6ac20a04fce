use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, OnceLock};

use ironvct_pdu::{ChannelDef, ChannelName, ChunkFlags, ChunkHeader};
use ironvct_transport::{
    BackendHandle, BufferPool, ChannelBackend, ChannelEvent, EventSink, OutBuf, Ticket, TicketPool, TransportError,
    TransportResult,
};

use crate::entry::{event_code, SvcEntryPoints};
use crate::{CHANNEL_CHUNK_LENGTH, CHANNEL_MAX_COUNT, MAX_CHUNKS_IN_FLIGHT, VIRTUAL_CHANNEL_VERSION_WIN2000};

struct InFlightWrite {
    buf: OutBuf,
    ticket: Option<Ticket>,
}

struct QueuedWrite {
    handle: u32,
    buf: OutBuf,
}

#[derive(Default)]
struct AdapterState {
    next_marker: u32,
    in_flight: HashMap<u32, InFlightWrite>,
    in_flight_tickets: HashSet<Ticket>,
    queued: VecDeque<QueuedWrite>,
    handles: HashSet<u32>,
}

struct RdpInner {
    entry: Mutex<Box<dyn SvcEntryPoints>>,
    pool: BufferPool,
    sink: OnceLock<Arc<dyn EventSink>>,
    state: Mutex<AdapterState>,
    tickets: Mutex<TicketPool>,
}

/// Static virtual channel backend adapter.
///
/// Translates the unified transport operations into the native entry-point
/// calling convention and the native event callbacks into [`ChannelEvent`]s.
/// Clones share state: hand one clone to the transport and keep another for
/// routing the native callbacks in.
#[derive(Clone)]
pub struct RdpAdapter {
    inner: Arc<RdpInner>,
}

impl RdpAdapter {
    pub fn new(entry: Box<dyn SvcEntryPoints>, pool: BufferPool) -> Self {
        Self {
            inner: Arc::new(RdpInner {
                entry: Mutex::new(entry),
                pool,
                sink: OnceLock::new(),
                state: Mutex::new(AdapterState::default()),
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

    /// Supplies the channel definitions to the native stack.
    ///
    /// Fails with `TooManyChannels` above the fixed native ceiling.
    pub fn init(&self, channels: &[ChannelDef]) -> TransportResult<()> {
        if channels.len() > CHANNEL_MAX_COUNT {
            return Err(TransportError::TooManyChannels {
                limit: CHANNEL_MAX_COUNT,
            });
        }

        let mut entry = self.inner.entry.lock().expect("entry points lock");
        entry
            .init(channels, VIRTUAL_CHANNEL_VERSION_WIN2000)
            .map_err(TransportError::from)
    }

    /// Landing pad for the native init-event callback.
    pub fn session_event(&self, event: u32, server_name: Option<String>) {
        let translated = match event {
            event_code::INITIALIZED => ChannelEvent::Initialized,
            event_code::CONNECTED => ChannelEvent::Connected { server_name },
            event_code::V1_CONNECTED => ChannelEvent::V1Connected,
            event_code::DISCONNECTED => {
                self.fail_outstanding_writes();
                ChannelEvent::Disconnected
            }
            event_code::TERMINATED => {
                self.fail_outstanding_writes();
                ChannelEvent::Terminated
            }
            code if code >= event_code::USER => ChannelEvent::User { code },
            unknown => {
                error!(unknown, "unknown channel init event");
                return;
            }
        };

        self.forward(None, translated);
    }

    /// Landing pad for the native open-event data callback.
    ///
    /// `total_length` and `data_flags` describe the chunk boundaries exactly
    /// as the native dispatch reported them.
    pub fn data_event(&self, open_handle: u32, data: &[u8], total_length: u32, data_flags: u32) {
        let header = ChunkHeader {
            total_length,
            flags: ChunkFlags::from_bits_truncate(data_flags),
        };

        trace!(
            open_handle,
            data_length = data.len(),
            total_length,
            "data received"
        );

        self.forward(
            Some(BackendHandle(open_handle)),
            ChannelEvent::DataReceived {
                header,
                data: data.to_vec(),
            },
        );
    }

    /// Landing pad for the native write-complete callback.
    pub fn write_complete_event(&self, open_handle: u32, marker: u32) {
        let ticket = self.retire_write(marker);
        self.pump_queue();
        self.forward(Some(BackendHandle(open_handle)), ChannelEvent::WriteComplete { ticket });
    }

    /// Landing pad for the native write-cancelled callback.
    pub fn write_cancelled_event(&self, open_handle: u32, marker: u32) {
        let ticket = self.retire_write(marker);
        self.pump_queue();
        self.forward(Some(BackendHandle(open_handle)), ChannelEvent::WriteCancelled { ticket });
    }

    fn forward(&self, handle: Option<BackendHandle>, event: ChannelEvent) {
        match self.inner.sink.get() {
            Some(sink) => sink.handle_event(handle, event),
            None => warn!("event dropped: no sink installed"),
        }
    }

    /// Removes the completed write from the in-flight set, returning its
    /// buffer to the pool and checking its ticket back in.
    fn retire_write(&self, marker: u32) -> Option<Ticket> {
        let mut state = self.inner.state.lock().expect("adapter state lock");

        let Some(write) = state.in_flight.remove(&marker) else {
            trace!(marker, "completion for unknown write marker");
            return None;
        };

        let ticket = write.ticket;
        if let Some(ticket) = ticket {
            state.in_flight_tickets.remove(&ticket);
            if let Err(e) = self.inner.tickets.lock().expect("ticket pool lock").checkin(ticket) {
                warn!(%ticket, error = %e, "ticket check-in failed");
            }
        }

        self.inner.pool.release(write.buf);
        ticket
    }

    /// Moves queued chunks into the native transport while the in-flight
    /// ceiling allows.
    fn pump_queue(&self) {
        let mut state = self.inner.state.lock().expect("adapter state lock");

        while state.in_flight.len() < MAX_CHUNKS_IN_FLIGHT {
            let Some(next) = state.queued.pop_front() else {
                break;
            };
            if let Err(e) = self.submit(&mut state, next.handle, next.buf) {
                warn!(error = %e, "queued write failed");
                break;
            }
        }
    }

    fn submit(&self, state: &mut AdapterState, handle: u32, buf: OutBuf) -> TransportResult<()> {
        let marker = state.next_marker;
        state.next_marker = state.next_marker.wrapping_add(1);

        let ticket = buf.ticket();

        let result = {
            let mut entry = self.inner.entry.lock().expect("entry points lock");
            match ticket {
                Some(ticket) => entry.write_qos(handle, buf.as_slice(), buf.reliability(), ticket, marker),
                None => entry.write(handle, buf.as_slice(), marker),
            }
        };

        match result {
            Ok(()) => {
                if let Some(ticket) = ticket {
                    state.in_flight_tickets.insert(ticket);
                }
                state.in_flight.insert(marker, InFlightWrite { buf, ticket });
                Ok(())
            }
            Err(rc) => {
                if let Some(ticket) = ticket {
                    let _ = self.inner.tickets.lock().expect("ticket pool lock").checkin(ticket);
                }
                self.inner.pool.release(buf);
                Err(rc.into())
            }
        }
    }

    /// Fails every in-flight and queued write. Native disconnect already
    /// cancelled them; buffers and tickets must still come home.
    fn fail_outstanding_writes(&self) {
        let mut state = self.inner.state.lock().expect("adapter state lock");

        let in_flight = state.in_flight.drain().collect::<Vec<_>>();
        let queued = state.queued.drain(..).collect::<Vec<_>>();
        state.in_flight_tickets.clear();
        state.handles.clear();

        if !in_flight.is_empty() || !queued.is_empty() {
            debug!(
                in_flight = in_flight.len(),
                queued = queued.len(),
                "failing outstanding writes"
            );
        }

        drop(state);

        let mut tickets = self.inner.tickets.lock().expect("ticket pool lock");
        for (_, write) in in_flight {
            if let Some(ticket) = write.ticket {
                let _ = tickets.checkin(ticket);
            }
            self.inner.pool.release(write.buf);
        }
        for write in queued {
            if let Some(ticket) = write.buf.ticket() {
                let _ = tickets.checkin(ticket);
            }
            self.inner.pool.release(write.buf);
        }
    }
}

impl ChannelBackend for RdpAdapter {
    fn max_chunk_len(&self) -> usize {
        CHANNEL_CHUNK_LENGTH
    }

    fn channel_limit(&self) -> usize {
        CHANNEL_MAX_COUNT
    }

    fn open_channel(&mut self, name: &ChannelName) -> TransportResult<BackendHandle> {
        let open_handle = {
            let mut entry = self.inner.entry.lock().expect("entry points lock");
            entry.open(name).map_err(TransportError::from)?
        };

        self.inner
            .state
            .lock()
            .expect("adapter state lock")
            .handles
            .insert(open_handle);

        debug!(name = %name, open_handle, "channel open");

        Ok(BackendHandle(open_handle))
    }

    // The native stack tracks chunk boundaries itself and reports them back
    // through dataFlags, so the header is not carried in-band here.
    fn write_chunk(&mut self, handle: BackendHandle, buf: OutBuf, _header: ChunkHeader) -> TransportResult<()> {
        let mut state = self.inner.state.lock().expect("adapter state lock");

        if !state.handles.contains(&handle.0) {
            self.inner.pool.release(buf);
            return Err(TransportError::NotOpen);
        }

        if let Some(ticket) = buf.ticket() {
            if state.in_flight_tickets.contains(&ticket)
                || state.queued.iter().any(|write| write.buf.ticket() == Some(ticket))
            {
                self.inner.pool.release(buf);
                return Err(TransportError::TicketInUse(ticket));
            }
            if !self.inner.tickets.lock().expect("ticket pool lock").is_outstanding(ticket) {
                self.inner.pool.release(buf);
                return Err(TransportError::TicketNotCheckedOut(ticket));
            }
        }

        if state.in_flight.len() >= MAX_CHUNKS_IN_FLIGHT {
            state.queued.push_back(QueuedWrite { handle: handle.0, buf });
            return Ok(());
        }

        self.submit(&mut state, handle.0, buf)
    }

    fn close_channel(&mut self, handle: BackendHandle) -> TransportResult<()> {
        self.inner
            .state
            .lock()
            .expect("adapter state lock")
            .handles
            .remove(&handle.0);

        let mut entry = self.inner.entry.lock().expect("entry points lock");
        entry.close(handle.0).map_err(TransportError::from)
    }

    fn checkout_ticket(&mut self) -> TransportResult<Ticket> {
        Ok(self.inner.tickets.lock().expect("ticket pool lock").checkout())
    }
}
