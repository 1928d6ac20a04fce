use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use crate::ticket::Ticket;
use crate::{TransportError, TransportResult};

/// Smallest capacity class handed out by the pool.
const MIN_BUFFER_CAPACITY: usize = 64;

/// Delivery guarantee requested for an outbound buffer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Reliability {
    #[default]
    Reliable,
    Unreliable,
    ReliableWithFec,
}

/// Fixed-capacity outbound write buffer.
///
/// Exclusively owned by the [`BufferPool`] between uses. Ownership moves to
/// the caller on acquire, to a backend adapter at the write hand-off, and back
/// to the pool once the backend signals write-complete or write-cancelled.
#[derive(Debug)]
pub struct OutBuf {
    data: Vec<u8>,
    capacity: usize,
    reliability: Reliability,
    ticket: Option<Ticket>,
}

impl OutBuf {
    fn from_storage(data: Vec<u8>, capacity: usize) -> Self {
        Self {
            data,
            capacity,
            reliability: Reliability::Reliable,
            ticket: None,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Appends `bytes` to the used region.
    ///
    /// Fails with `BufferTooSmall` when the result would exceed the buffer
    /// capacity, reporting the total length the caller must request instead.
    pub fn append(&mut self, bytes: &[u8]) -> TransportResult<()> {
        let required = self.data.len() + bytes.len();
        if required > self.capacity {
            return Err(TransportError::BufferTooSmall { required });
        }
        self.data.extend_from_slice(bytes);
        Ok(())
    }

    pub fn clear(&mut self) {
        self.data.clear();
    }

    pub fn reliability(&self) -> Reliability {
        self.reliability
    }

    pub fn set_reliability(&mut self, reliability: Reliability) {
        self.reliability = reliability;
    }

    pub fn ticket(&self) -> Option<Ticket> {
        self.ticket
    }

    pub fn set_ticket(&mut self, ticket: Option<Ticket>) {
        self.ticket = ticket;
    }
}

#[derive(Debug, Default)]
struct PoolInner {
    /// Free storage keyed by capacity class.
    free: BTreeMap<usize, Vec<Vec<u8>>>,
}

/// Process-wide arena of reusable outbound buffers.
///
/// Cheap to clone; all clones share the same free lists and are safe to use
/// concurrently from multiple channels.
#[derive(Debug, Clone, Default)]
pub struct BufferPool {
    inner: Arc<Mutex<PoolInner>>,
}

impl BufferPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a free buffer of at least `min_capacity` bytes, allocating a
    /// new one when no recycled buffer fits.
    ///
    /// The pool imposes no ceiling of its own: the only failure mode is the
    /// underlying allocator refusing the request.
    pub fn acquire(&self, min_capacity: usize) -> TransportResult<OutBuf> {
        let class = capacity_class(min_capacity);

        let recycled = {
            let mut inner = self.inner.lock().expect("buffer pool lock");
            inner
                .free
                .range_mut(class..)
                .find(|(_, bufs)| !bufs.is_empty())
                .map(|(&cls, bufs)| (cls, bufs.pop().expect("non-empty free list")))
        };

        if let Some((cls, data)) = recycled {
            return Ok(OutBuf::from_storage(data, cls));
        }

        let mut data = Vec::new();
        data.try_reserve_exact(class)
            .map_err(|_| TransportError::OutOfMemory)?;
        Ok(OutBuf::from_storage(data, class))
    }

    /// Returns `buf` to the free list of its capacity class for reuse.
    pub fn release(&self, mut buf: OutBuf) {
        buf.data.clear();
        let mut inner = self.inner.lock().expect("buffer pool lock");
        inner.free.entry(buf.capacity).or_default().push(buf.data);
    }
}

fn capacity_class(min_capacity: usize) -> usize {
    min_capacity.next_power_of_two().max(MIN_BUFFER_CAPACITY)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_rounds_up_to_capacity_class() {
        let pool = BufferPool::new();

        let buf = pool.acquire(100).unwrap();
        assert_eq!(buf.capacity(), 128);

        let buf = pool.acquire(0).unwrap();
        assert_eq!(buf.capacity(), MIN_BUFFER_CAPACITY);
    }

    #[test]
    fn released_buffer_is_reused() {
        let pool = BufferPool::new();

        let mut buf = pool.acquire(1024).unwrap();
        buf.append(&[1, 2, 3]).unwrap();
        let storage = buf.data.as_ptr();
        pool.release(buf);

        let buf = pool.acquire(600).unwrap();
        assert_eq!(buf.data.as_ptr(), storage);
        assert!(buf.is_empty());
    }

    #[test]
    fn append_past_capacity_reports_required_length() {
        let pool = BufferPool::new();

        let mut buf = pool.acquire(64).unwrap();
        buf.append(&[0; 60]).unwrap();

        assert_eq!(
            buf.append(&[0; 10]),
            Err(TransportError::BufferTooSmall { required: 70 })
        );
    }
}
