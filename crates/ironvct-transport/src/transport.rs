use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use ironvct_pdu::{ChannelName, ChannelOptions, ChunkFlags, ChunkHeader};

use crate::backend::{BackendHandle, ChannelBackend, EventSink};
use crate::chunking::{chunkify, Reassembler};
use crate::event::ChannelEvent;
use crate::flow::{Admission, FlowController, FlowPolicy};
use crate::pool::{BufferPool, Reliability};
use crate::registry::{ChannelId, ChannelRegistry};
use crate::ticket::Ticket;
use crate::{TransportError, TransportResult};

const DEFAULT_MAX_MESSAGE_SIZE: usize = 4 * 1024 * 1024;

/// Consumer side of a channel: clipboard, audio, seamless-window control and
/// friends implement this to receive traffic and lifecycle notifications.
///
/// Callbacks run with that channel's lock held; they must not call back into
/// the same channel and must return promptly.
pub trait ChannelHandler: Send {
    /// The backend confirmed the channel is open.
    fn on_open(&mut self) {}

    /// A complete reassembled message arrived.
    fn on_message(&mut self, payload: Vec<u8>);

    /// A malformed inbound chunk or other channel-scoped failure. The
    /// reassembly accumulator has already been reset.
    fn on_error(&mut self, error: &TransportError) {
        let _ = error;
    }

    fn on_write_complete(&mut self, ticket: Option<Ticket>) {
        let _ = ticket;
    }

    /// Terminal outcome; the write will not be retried.
    fn on_write_cancelled(&mut self, ticket: Option<Ticket>) {
        let _ = ticket;
    }

    fn on_closed(&mut self) {}
}

#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Reassembled messages above this size fail with `MessageTooLarge`
    /// instead of growing without bound.
    pub max_message_size: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }
}

/// Outcome of [`Transport::write`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteStatus {
    /// The message was admitted and handed to the backend.
    Sent,
    /// Flow control queued the message; it goes out once the policy admits it.
    /// This is not an error path.
    Queued,
}

struct ChannelRuntime {
    flow: FlowController<Vec<u8>>,
    reassembler: Reassembler,
    handler: Box<dyn ChannelHandler>,
    suspended: bool,
}

/// Orchestrates the registry, flow controllers, fragmentation engine and
/// buffer pool over whichever backend adapter is active.
///
/// Lock order is registry, then handle map, then a single channel runtime,
/// then the backend. Per-channel state never guards another channel, so
/// cross-channel operations proceed fully in parallel.
pub struct Transport {
    config: TransportConfig,
    backend: Mutex<Box<dyn ChannelBackend>>,
    registry: Mutex<ChannelRegistry>,
    runtimes: Mutex<HashMap<ChannelId, Arc<Mutex<ChannelRuntime>>>>,
    by_handle: Mutex<HashMap<BackendHandle, ChannelId>>,
    pool: BufferPool,
    torn_down: AtomicBool,
}

impl Transport {
    pub fn new(backend: Box<dyn ChannelBackend>, pool: BufferPool, config: TransportConfig) -> Self {
        let limit = backend.channel_limit();

        Self {
            config,
            backend: Mutex::new(backend),
            registry: Mutex::new(ChannelRegistry::new(limit)),
            runtimes: Mutex::new(HashMap::new()),
            by_handle: Mutex::new(HashMap::new()),
            pool,
            torn_down: AtomicBool::new(false),
        }
    }

    pub fn buffer_pool(&self) -> &BufferPool {
        &self.pool
    }

    /// Registers a channel ahead of the connection. The channel becomes
    /// writable only after [`Transport::open`] succeeds.
    pub fn register(
        &self,
        name: ChannelName,
        options: ChannelOptions,
        reliability: Reliability,
        policy: FlowPolicy,
        handler: Box<dyn ChannelHandler>,
    ) -> TransportResult<ChannelId> {
        let id = self.registry.lock().expect("registry lock").register(name, options, reliability)?;

        self.runtimes.lock().expect("runtime map lock").insert(
            id,
            Arc::new(Mutex::new(ChannelRuntime {
                flow: FlowController::new(policy),
                reassembler: Reassembler::new(self.config.max_message_size),
                handler,
                suspended: false,
            })),
        );

        Ok(id)
    }

    pub fn lookup(&self, name: &ChannelName) -> Option<ChannelId> {
        self.registry.lock().expect("registry lock").lookup(name)
    }

    /// Opens the channel against the active backend and binds the handle.
    pub fn open(&self, id: ChannelId) -> TransportResult<()> {
        if self.torn_down.load(Ordering::SeqCst) {
            return Err(TransportError::NotConnected);
        }

        let name = {
            let registry = self.registry.lock().expect("registry lock");
            let entry = registry.get(id).ok_or(TransportError::BadChannel)?;
            if entry.is_open() {
                return Err(TransportError::AlreadyOpen);
            }
            *entry.name()
        };

        let handle = self.backend.lock().expect("backend lock").open_channel(&name)?;

        if let Err(e) = self.registry.lock().expect("registry lock").open(id, handle) {
            let _ = self.backend.lock().expect("backend lock").close_channel(handle);
            return Err(e);
        }

        self.by_handle.lock().expect("handle map lock").insert(handle, id);

        self.runtime(id)?.lock().expect("channel lock").handler.on_open();

        debug!(name = %name, ?handle, "channel open");

        Ok(())
    }

    /// Closes the channel. Closing a channel that is not open fails with
    /// `NotOpen` and has no side effects.
    pub fn close(&self, id: ChannelId) -> TransportResult<()> {
        let handle = self.registry.lock().expect("registry lock").close(id)?;
        self.by_handle.lock().expect("handle map lock").remove(&handle);

        {
            let runtime = self.runtime(id)?;
            let mut rt = runtime.lock().expect("channel lock");
            let dropped = rt.flow.drain();
            if !dropped.is_empty() {
                debug!(count = dropped.len(), "dropped queued writes on close");
            }
            rt.reassembler.reset();
            rt.handler.on_closed();
        }

        self.backend.lock().expect("backend lock").close_channel(handle)
    }

    /// Submits a message for transmission on the channel.
    ///
    /// The message is fragmented to the backend's negotiated chunk size; flow
    /// control may queue it instead of sending immediately.
    pub fn write(&self, id: ChannelId, payload: Vec<u8>) -> TransportResult<WriteStatus> {
        if self.torn_down.load(Ordering::SeqCst) {
            return Err(TransportError::NotConnected);
        }

        if payload.len() > self.config.max_message_size {
            return Err(TransportError::MessageTooLarge {
                size: payload.len(),
                max: self.config.max_message_size,
            });
        }

        let (handle, reliability) = self.open_channel_info(id)?;

        let runtime = self.runtime(id)?;
        let mut rt = runtime.lock().expect("channel lock");

        let len = payload.len();

        if rt.suspended {
            rt.flow.enqueue(payload, len);
            return Ok(WriteStatus::Queued);
        }

        match rt.flow.admit(payload, len, Instant::now())? {
            Admission::Queued => Ok(WriteStatus::Queued),
            Admission::Admitted(payload) => {
                self.send_message(handle, reliability, &payload)?;
                Ok(WriteStatus::Sent)
            }
        }
    }

    /// Feeds an acknowledgment into the channel's ack-windowed flow
    /// controller and transmits any writes the freed window admits.
    ///
    /// How the ack is carried is the caller's concern: an explicit
    /// flow-control PDU decoded by the channel consumer, or the backend's
    /// WriteComplete under simplified designs.
    pub fn acknowledge(&self, id: ChannelId, bytes: usize) -> TransportResult<()> {
        let (handle, reliability) = self.open_channel_info(id)?;

        let runtime = self.runtime(id)?;
        let mut rt = runtime.lock().expect("channel lock");

        let released = rt.flow.acknowledge(bytes, Instant::now());
        self.send_all(handle, reliability, released)
    }

    /// External clock signal for the channel's quota policy.
    pub fn tick(&self, id: ChannelId) -> TransportResult<()> {
        let (handle, reliability) = self.open_channel_info(id)?;

        let runtime = self.runtime(id)?;
        let mut rt = runtime.lock().expect("channel lock");

        let released = rt.flow.tick(Instant::now());
        self.send_all(handle, reliability, released)
    }

    /// Releases queued writes whose delay deadline has elapsed.
    pub fn poll(&self, id: ChannelId) -> TransportResult<()> {
        let (handle, reliability) = self.open_channel_info(id)?;

        let runtime = self.runtime(id)?;
        let mut rt = runtime.lock().expect("channel lock");

        let released = rt.flow.release(Instant::now());
        self.send_all(handle, reliability, released)
    }

    /// Deadline at which the channel's next queued write becomes admissible,
    /// for schedulers that want to avoid polling.
    pub fn next_release_at(&self, id: ChannelId) -> TransportResult<Option<Instant>> {
        let runtime = self.runtime(id)?;
        let rt = runtime.lock().expect("channel lock");
        Ok(rt.flow.next_release_at())
    }

    /// Replaces the channel's flow policy. Only permitted while the channel
    /// is idle.
    pub fn set_flow_policy(&self, id: ChannelId, policy: FlowPolicy) -> TransportResult<()> {
        let runtime = self.runtime(id)?;
        let mut rt = runtime.lock().expect("channel lock");
        rt.flow.set_policy(policy)
    }

    /// Drains every per-channel queue, closes every channel exactly once and
    /// detaches from the backend. Idempotent: a second teardown signal is a
    /// no-op.
    pub fn shutdown(&self) {
        self.teardown();
    }

    fn teardown(&self) {
        if self.torn_down.swap(true, Ordering::SeqCst) {
            return;
        }

        debug!("session teardown");

        let closed = self.registry.lock().expect("registry lock").teardown();
        self.by_handle.lock().expect("handle map lock").clear();

        for (id, handle) in closed {
            if let Some(handle) = handle {
                let _ = self.backend.lock().expect("backend lock").close_channel(handle);
            }

            let runtime = self.runtimes.lock().expect("runtime map lock").get(&id).cloned();
            if let Some(runtime) = runtime {
                let mut rt = runtime.lock().expect("channel lock");
                let dropped = rt.flow.drain();
                if !dropped.is_empty() {
                    debug!(?id, count = dropped.len(), "dropped queued writes at teardown");
                }
                rt.reassembler.reset();
                rt.handler.on_closed();
            }
        }
    }

    fn open_channel_info(&self, id: ChannelId) -> TransportResult<(BackendHandle, Reliability)> {
        let registry = self.registry.lock().expect("registry lock");
        let entry = registry.get(id).ok_or(TransportError::BadChannel)?;
        let handle = entry.handle().ok_or(TransportError::NotOpen)?;
        Ok((handle, entry.reliability()))
    }

    fn runtime(&self, id: ChannelId) -> TransportResult<Arc<Mutex<ChannelRuntime>>> {
        self.runtimes
            .lock()
            .expect("runtime map lock")
            .get(&id)
            .cloned()
            .ok_or(TransportError::BadChannel)
    }

    fn send_all(
        &self,
        handle: BackendHandle,
        reliability: Reliability,
        released: Vec<Vec<u8>>,
    ) -> TransportResult<()> {
        for payload in released {
            self.send_message(handle, reliability, &payload)?;
        }
        Ok(())
    }

    fn send_message(&self, handle: BackendHandle, reliability: Reliability, payload: &[u8]) -> TransportResult<()> {
        let mut backend = self.backend.lock().expect("backend lock");

        let max_chunk_len = backend.max_chunk_len();
        let needs_ticket = reliability != Reliability::Reliable;

        for chunk in chunkify(payload, max_chunk_len)? {
            let mut buf = self.pool.acquire(chunk.data.len())?;
            buf.append(chunk.data)?;
            buf.set_reliability(reliability);
            if needs_ticket {
                buf.set_ticket(Some(backend.checkout_ticket()?));
            }

            backend.write_chunk(handle, buf, chunk.header)?;
        }

        Ok(())
    }

    fn channel_for_handle(&self, handle: Option<BackendHandle>) -> Option<(ChannelId, Arc<Mutex<ChannelRuntime>>)> {
        let handle = handle?;
        let id = *self.by_handle.lock().expect("handle map lock").get(&handle)?;
        let runtime = self.runtimes.lock().expect("runtime map lock").get(&id).cloned()?;
        Some((id, runtime))
    }

    fn dispatch_data(&self, handle: Option<BackendHandle>, header: ChunkHeader, data: &[u8]) {
        let Some((id, runtime)) = self.channel_for_handle(handle) else {
            warn!(?handle, "data for unknown channel");
            return;
        };

        // Flow-pressure signaling rides on the chunk flags.
        if header.flags.contains(ChunkFlags::SUSPEND) {
            trace!(?id, "channel suspended");
            runtime.lock().expect("channel lock").suspended = true;
            return;
        }
        if header.flags.contains(ChunkFlags::RESUME) {
            trace!(?id, "channel resumed");
            let Ok((open_handle, reliability)) = self.open_channel_info(id) else {
                return;
            };
            let mut rt = runtime.lock().expect("channel lock");
            rt.suspended = false;
            let released = rt.flow.release(Instant::now());
            if let Err(e) = self.send_all(open_handle, reliability, released) {
                warn!(?id, error = %e, "failed to flush writes on resume");
                rt.handler.on_error(&e);
            }
            return;
        }

        let mut rt = runtime.lock().expect("channel lock");
        match rt.reassembler.process(header, data) {
            Ok(Some(message)) => rt.handler.on_message(message),
            Ok(None) => {}
            Err(e) => {
                warn!(?id, error = %e, "inbound chunk rejected");
                rt.handler.on_error(&e);
            }
        }
    }

    fn dispatch_write_outcome(&self, handle: Option<BackendHandle>, ticket: Option<Ticket>, cancelled: bool) {
        let Some((id, runtime)) = self.channel_for_handle(handle) else {
            trace!(?handle, "write outcome for unknown channel");
            return;
        };

        let mut rt = runtime.lock().expect("channel lock");
        if cancelled {
            debug!(?id, ?ticket, "write cancelled");
            rt.handler.on_write_cancelled(ticket);
        } else {
            rt.handler.on_write_complete(ticket);
        }
    }
}

impl EventSink for Transport {
    fn handle_event(&self, handle: Option<BackendHandle>, event: ChannelEvent) {
        match event {
            ChannelEvent::Initialized => debug!("backend initialized"),
            ChannelEvent::Connected { server_name } => debug!(?server_name, "backend connected"),
            ChannelEvent::V1Connected => debug!("backend connected (legacy host)"),
            ChannelEvent::Disconnected | ChannelEvent::Terminated => self.teardown(),
            ChannelEvent::DataReceived { header, data } => self.dispatch_data(handle, header, &data),
            ChannelEvent::WriteComplete { ticket } => self.dispatch_write_outcome(handle, ticket, false),
            ChannelEvent::WriteCancelled { ticket } => self.dispatch_write_outcome(handle, ticket, true),
            ChannelEvent::User { code } => debug!(code, "user event"),
        }
    }
}
