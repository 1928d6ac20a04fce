//! Test doubles shared by the integration test suite.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use ironvct_citrix::{DataArrivalSink, WdQueryClass, WdSession, WdSetClass, WriteHookBinding};
use ironvct_pdu::{ChannelDef, ChannelName, ChunkHeader};
use ironvct_rdp::{ChannelRc, SvcEntryPoints};
use ironvct_transport::{
    BackendHandle, BufferPool, ChannelBackend, ChannelEvent, ChannelHandler, EventSink, OutBuf, Reliability, Ticket,
    TicketPool, TransportError, TransportResult,
};

/// One chunk as a mock backend saw it.
#[derive(Debug, Clone)]
pub struct WrittenChunk {
    pub handle: BackendHandle,
    pub header: ChunkHeader,
    pub data: Vec<u8>,
    pub reliability: Reliability,
    pub ticket: Option<Ticket>,
}

/// In-memory [`ChannelBackend`] recording everything handed to it.
pub struct MockBackend {
    pool: BufferPool,
    written: Arc<Mutex<Vec<WrittenChunk>>>,
    pub max_chunk_len: usize,
    pub limit: usize,
    tickets: TicketPool,
    next_handle: u32,
}

impl MockBackend {
    pub fn new(pool: BufferPool) -> (Self, Arc<Mutex<Vec<WrittenChunk>>>) {
        let written = Arc::new(Mutex::new(Vec::new()));
        (
            Self {
                pool,
                written: Arc::clone(&written),
                max_chunk_len: 1600,
                limit: 30,
                tickets: TicketPool::new(),
                next_handle: 1,
            },
            written,
        )
    }
}

impl ChannelBackend for MockBackend {
    fn max_chunk_len(&self) -> usize {
        self.max_chunk_len
    }

    fn channel_limit(&self) -> usize {
        self.limit
    }

    fn open_channel(&mut self, _name: &ChannelName) -> TransportResult<BackendHandle> {
        let handle = BackendHandle(self.next_handle);
        self.next_handle += 1;
        Ok(handle)
    }

    fn write_chunk(&mut self, handle: BackendHandle, buf: OutBuf, header: ChunkHeader) -> TransportResult<()> {
        self.written.lock().unwrap().push(WrittenChunk {
            handle,
            header,
            data: buf.as_slice().to_vec(),
            reliability: buf.reliability(),
            ticket: buf.ticket(),
        });
        self.pool.release(buf);
        Ok(())
    }

    fn close_channel(&mut self, _handle: BackendHandle) -> TransportResult<()> {
        Ok(())
    }

    fn checkout_ticket(&mut self) -> TransportResult<Ticket> {
        Ok(self.tickets.checkout())
    }
}

/// Everything a [`CollectingHandler`] observed.
#[derive(Debug, Default)]
pub struct HandlerLog {
    pub messages: Vec<Vec<u8>>,
    pub errors: Vec<TransportError>,
    pub opened: usize,
    pub closed: usize,
    pub completes: Vec<Option<Ticket>>,
    pub cancels: Vec<Option<Ticket>>,
}

/// [`ChannelHandler`] recording every callback into a shared log.
pub struct CollectingHandler(Arc<Mutex<HandlerLog>>);

impl CollectingHandler {
    #[allow(clippy::new_ret_no_self)]
    pub fn new() -> (Box<dyn ChannelHandler>, Arc<Mutex<HandlerLog>>) {
        let log = Arc::new(Mutex::new(HandlerLog::default()));
        (Box::new(Self(Arc::clone(&log))), log)
    }
}

impl ChannelHandler for CollectingHandler {
    fn on_open(&mut self) {
        self.0.lock().unwrap().opened += 1;
    }

    fn on_message(&mut self, payload: Vec<u8>) {
        self.0.lock().unwrap().messages.push(payload);
    }

    fn on_error(&mut self, error: &TransportError) {
        self.0.lock().unwrap().errors.push(error.clone());
    }

    fn on_write_complete(&mut self, ticket: Option<Ticket>) {
        self.0.lock().unwrap().completes.push(ticket);
    }

    fn on_write_cancelled(&mut self, ticket: Option<Ticket>) {
        self.0.lock().unwrap().cancels.push(ticket);
    }

    fn on_closed(&mut self) {
        self.0.lock().unwrap().closed += 1;
    }
}

/// [`EventSink`] collecting raw events, for driving adapters directly.
#[derive(Default)]
pub struct EventCollector(Mutex<Vec<(Option<BackendHandle>, ChannelEvent)>>);

impl EventCollector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<(Option<BackendHandle>, ChannelEvent)> {
        self.0.lock().unwrap().clone()
    }
}

impl EventSink for EventCollector {
    fn handle_event(&self, handle: Option<BackendHandle>, event: ChannelEvent) {
        self.0.lock().unwrap().push((handle, event));
    }
}

/// One section as the mock engine accepted it.
#[derive(Debug, Clone)]
pub struct EngineWrite {
    pub channel: u16,
    pub data: Vec<u8>,
    pub qos: Option<(Reliability, Option<Ticket>)>,
}

/// Scripted winstation driver session state.
pub struct MockWdInner {
    pub host_version: (u16, u16),
    /// Length the host-version query demands before answering, to exercise
    /// the undersized-buffer retry.
    pub host_version_len: usize,
    pub next_channel: u16,
    pub hooks: HashMap<u16, Arc<dyn DataArrivalSink>>,
    pub max_write_size: u16,
    /// Whether the engine wires the queued write procedure.
    pub queued_writes: bool,
    /// Sections the engine accepted.
    pub engine: Vec<EngineWrite>,
    /// Engine capacity; further writes report no out-buffers.
    pub capacity: usize,
    pub callback_completes: usize,
    /// Reserved legacy out-buffer being assembled, with its channel header.
    pub reserved: Option<Vec<u8>>,
}

impl Default for MockWdInner {
    fn default() -> Self {
        Self {
            host_version: (6, 0),
            host_version_len: 4,
            next_channel: 3,
            hooks: HashMap::new(),
            max_write_size: 2048,
            queued_writes: true,
            engine: Vec::new(),
            capacity: usize::MAX,
            callback_completes: 0,
            reserved: None,
        }
    }
}

/// Scripted winstation driver session. Clones share state so tests keep a
/// handle after giving one to the adapter.
#[derive(Clone, Default)]
pub struct MockWd {
    pub inner: Arc<Mutex<MockWdInner>>,
}

impl MockWd {
    pub fn new() -> Self {
        Self::default()
    }
}

impl WdSession for MockWd {
    fn query_information(&mut self, class: WdQueryClass, buf: &mut [u8]) -> TransportResult<usize> {
        let mut inner = self.inner.lock().unwrap();
        match class {
            WdQueryClass::HostVersion => {
                if buf.len() < inner.host_version_len {
                    return Err(TransportError::BufferTooSmall {
                        required: inner.host_version_len,
                    });
                }
                buf[0..2].copy_from_slice(&inner.host_version.0.to_le_bytes());
                buf[2..4].copy_from_slice(&inner.host_version.1.to_le_bytes());
                Ok(4)
            }
            WdQueryClass::OpenVirtualChannel => {
                if buf.len() < ChannelName::SIZE + 2 {
                    return Err(TransportError::BufferTooSmall {
                        required: ChannelName::SIZE + 2,
                    });
                }
                let channel = inner.next_channel;
                inner.next_channel += 1;
                buf[ChannelName::SIZE..ChannelName::SIZE + 2].copy_from_slice(&channel.to_le_bytes());
                Ok(ChannelName::SIZE + 2)
            }
            WdQueryClass::LastError => Err(TransportError::Unsupported),
        }
    }

    fn set_information(&mut self, class: WdSetClass, _data: &[u8]) -> TransportResult<()> {
        match class {
            WdSetClass::CallbackComplete => {
                self.inner.lock().unwrap().callback_completes += 1;
                Ok(())
            }
        }
    }

    fn register_write_hook(
        &mut self,
        channel: u16,
        on_data: Arc<dyn DataArrivalSink>,
    ) -> TransportResult<WriteHookBinding> {
        let mut inner = self.inner.lock().unwrap();
        inner.hooks.insert(channel, on_data);
        Ok(WriteHookBinding {
            maximum_write_size: inner.max_write_size,
            qos: inner.queued_writes,
            queued_writes: inner.queued_writes,
        })
    }

    fn queue_virtual_write(
        &mut self,
        channel: u16,
        data: &[u8],
        reliability: Reliability,
        ticket: Option<Ticket>,
        _flush: bool,
    ) -> TransportResult<()> {
        let mut inner = self.inner.lock().unwrap();
        if inner.engine.len() >= inner.capacity {
            return Err(TransportError::NoOutBuf);
        }
        inner.engine.push(EngineWrite {
            channel,
            data: data.to_vec(),
            qos: Some((reliability, ticket)),
        });
        Ok(())
    }

    fn outbuf_reserve(&mut self, byte_count: usize) -> TransportResult<()> {
        let mut inner = self.inner.lock().unwrap();
        if inner.engine.len() >= inner.capacity {
            return Err(TransportError::NoOutBuf);
        }
        inner.reserved = Some(Vec::with_capacity(byte_count));
        Ok(())
    }

    fn outbuf_append(&mut self, data: &[u8]) -> TransportResult<()> {
        let mut inner = self.inner.lock().unwrap();
        match inner.reserved.as_mut() {
            Some(reserved) => {
                reserved.extend_from_slice(data);
                Ok(())
            }
            None => Err(TransportError::NoOutBuf),
        }
    }

    fn append_vd_header(&mut self, channel: u16, byte_count: u16) -> TransportResult<()> {
        let mut inner = self.inner.lock().unwrap();
        match inner.reserved.as_mut() {
            Some(reserved) => {
                reserved.extend_from_slice(&channel.to_le_bytes());
                reserved.extend_from_slice(&byte_count.to_le_bytes());
                Ok(())
            }
            None => Err(TransportError::NoOutBuf),
        }
    }

    fn outbuf_write(&mut self) -> TransportResult<()> {
        let mut inner = self.inner.lock().unwrap();
        let Some(reserved) = inner.reserved.take() else {
            return Err(TransportError::NoOutBuf);
        };
        let channel = u16::from_le_bytes([reserved[0], reserved[1]]);
        inner.engine.push(EngineWrite {
            channel,
            data: reserved[4..].to_vec(),
            qos: None,
        });
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct NativeWrite {
    pub handle: u32,
    pub data: Vec<u8>,
    pub qos: Option<(Reliability, Ticket)>,
    pub marker: u32,
}

/// Scripted native SVC entry point state.
#[derive(Debug, Default)]
pub struct MockEntryInner {
    pub defs: Vec<ChannelDef>,
    pub writes: Vec<NativeWrite>,
    pub fail_open: Option<ChannelRc>,
    pub fail_write: Option<ChannelRc>,
    pub closed: Vec<u32>,
    next_handle: u32,
}

/// Scripted native SVC entry points. Clones share state so tests keep a
/// handle after giving one to the adapter.
#[derive(Debug, Clone, Default)]
pub struct MockEntry {
    pub inner: Arc<Mutex<MockEntryInner>>,
}

impl MockEntry {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SvcEntryPoints for MockEntry {
    fn init(&mut self, channels: &[ChannelDef], _version_requested: u32) -> Result<(), ChannelRc> {
        self.inner.lock().unwrap().defs = channels.to_vec();
        Ok(())
    }

    fn open(&mut self, _name: &ChannelName) -> Result<u32, ChannelRc> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(rc) = inner.fail_open {
            return Err(rc);
        }
        inner.next_handle += 1;
        Ok(inner.next_handle)
    }

    fn close(&mut self, open_handle: u32) -> Result<(), ChannelRc> {
        self.inner.lock().unwrap().closed.push(open_handle);
        Ok(())
    }

    fn write(&mut self, open_handle: u32, data: &[u8], user_data: u32) -> Result<(), ChannelRc> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(rc) = inner.fail_write {
            return Err(rc);
        }
        inner.writes.push(NativeWrite {
            handle: open_handle,
            data: data.to_vec(),
            qos: None,
            marker: user_data,
        });
        Ok(())
    }

    fn write_qos(
        &mut self,
        open_handle: u32,
        data: &[u8],
        reliability: Reliability,
        ticket: Ticket,
        user_data: u32,
    ) -> Result<(), ChannelRc> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(rc) = inner.fail_write {
            return Err(rc);
        }
        inner.writes.push(NativeWrite {
            handle: open_handle,
            data: data.to_vec(),
            qos: Some((reliability, ticket)),
            marker: user_data,
        });
        Ok(())
    }
}
