use ironvct_pdu::{Chunk, ChunkFlags, ChunkHeader};

use crate::{TransportError, TransportResult};

/// Splits `payload` into chunks of at most `max_chunk_len` bytes.
///
/// A single-chunk message is tagged ONLY; a multi-chunk message tags the
/// first chunk FIRST, interior chunks carry no boundary flag and the final
/// chunk is tagged LAST. A zero-length message yields one empty ONLY chunk.
pub fn chunkify(payload: &[u8], max_chunk_len: usize) -> TransportResult<Vec<Chunk<'_>>> {
    debug_assert!(max_chunk_len > 0);

    let total_length = u32::try_from(payload.len()).map_err(|_| TransportError::MessageTooLarge {
        size: payload.len(),
        max: u32::MAX as usize,
    })?;

    if payload.is_empty() {
        return Ok(vec![Chunk::new(0, ChunkFlags::ONLY, payload)]);
    }

    let count = payload.len().div_ceil(max_chunk_len);
    let mut chunks = Vec::with_capacity(count);

    for (idx, data) in payload.chunks(max_chunk_len).enumerate() {
        let flags = if count == 1 {
            ChunkFlags::ONLY
        } else if idx == 0 {
            ChunkFlags::FIRST
        } else if idx == count - 1 {
            ChunkFlags::LAST
        } else {
            ChunkFlags::empty()
        };

        chunks.push(Chunk::new(total_length, flags, data));
    }

    Ok(chunks)
}

#[derive(Debug)]
struct Accumulator {
    declared_total: usize,
    data: Vec<u8>,
}

/// Collects the chunks of one channel direction until a LAST chunk completes
/// the message.
///
/// Reassembly is single-message-in-flight: a FIRST chunk arriving while an
/// accumulation is in progress is a protocol violation, not a silently
/// recoverable condition.
#[derive(Debug)]
pub struct Reassembler {
    max_message_size: usize,
    in_progress: Option<Accumulator>,
}

impl Reassembler {
    pub fn new(max_message_size: usize) -> Self {
        Self {
            max_message_size,
            in_progress: None,
        }
    }

    pub fn is_idle(&self) -> bool {
        self.in_progress.is_none()
    }

    /// Discards any half-built message.
    pub fn reset(&mut self) {
        self.in_progress = None;
    }

    /// Feeds one received chunk; returns the complete message once the LAST
    /// chunk (or an ONLY chunk) arrives.
    ///
    /// A FIRST chunk arriving midstream discards the stale accumulation and
    /// returns `CorruptStream`; the offending chunk still starts the next
    /// message, so a well-formed follow-up stream reassembles correctly. An
    /// ONLY chunk arriving midstream is dropped together with the error, as
    /// it both starts and ends the violating message.
    pub fn process(&mut self, header: ChunkHeader, data: &[u8]) -> TransportResult<Option<Vec<u8>>> {
        let flags = header.flags;
        let declared_total = header.total_length as usize;

        if flags.is_first() {
            let interrupted = self.in_progress.take().is_some();

            if declared_total > self.max_message_size {
                return Err(TransportError::MessageTooLarge {
                    size: declared_total,
                    max: self.max_message_size,
                });
            }

            if flags.is_last() {
                if interrupted {
                    return Err(TransportError::CorruptStream {
                        reason: "single-chunk message while reassembly in progress",
                    });
                }
                if data.len() != declared_total {
                    return Err(TransportError::CorruptStream {
                        reason: "single-chunk message length does not match declared length",
                    });
                }
                return Ok(Some(data.to_vec()));
            }

            self.in_progress = Some(Accumulator {
                declared_total,
                data: data.to_vec(),
            });

            if interrupted {
                return Err(TransportError::CorruptStream {
                    reason: "first chunk while reassembly in progress",
                });
            }

            return Ok(None);
        }

        let Some(acc) = self.in_progress.as_mut() else {
            return Err(TransportError::CorruptStream {
                reason: "continuation chunk without a first chunk",
            });
        };

        let accumulated = acc.data.len() + data.len();

        if accumulated > self.max_message_size {
            self.in_progress = None;
            return Err(TransportError::MessageTooLarge {
                size: accumulated,
                max: self.max_message_size,
            });
        }

        if accumulated > acc.declared_total {
            self.in_progress = None;
            return Err(TransportError::CorruptStream {
                reason: "message longer than declared length",
            });
        }

        acc.data.extend_from_slice(data);

        if flags.is_last() {
            let acc = self.in_progress.take().expect("accumulator checked above");
            if acc.data.len() != acc.declared_total {
                return Err(TransportError::CorruptStream {
                    reason: "message shorter than declared length",
                });
            }
            return Ok(Some(acc.data));
        }

        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reassemble(chunks: &[Chunk<'_>]) -> Vec<u8> {
        let mut reassembler = Reassembler::new(usize::MAX);
        let mut complete = None;
        for chunk in chunks {
            if let Some(message) = reassembler.process(chunk.header, chunk.data).unwrap() {
                complete = Some(message);
            }
        }
        complete.expect("message completes")
    }

    #[test]
    fn single_chunk_message_is_tagged_only() {
        let chunks = chunkify(&[1, 2, 3], 1600).unwrap();
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].header.flags.is_only());
    }

    #[test]
    fn zero_length_message_yields_one_empty_only_chunk() {
        let chunks = chunkify(&[], 1600).unwrap();
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].header.flags.is_only());
        assert!(chunks[0].data.is_empty());

        assert_eq!(reassemble(&chunks), Vec::<u8>::new());
    }

    #[test]
    fn multi_chunk_message_boundaries() {
        let payload = vec![0x5A; 10_000];
        let chunks = chunkify(&payload, 1600).unwrap();

        assert_eq!(chunks.len(), 7);
        assert_eq!(chunks[0].header.flags, ChunkFlags::FIRST);
        for chunk in &chunks[1..6] {
            assert!(chunk.header.flags.is_middle());
            assert_eq!(chunk.data.len(), 1600);
        }
        assert_eq!(chunks[6].header.flags, ChunkFlags::LAST);
        assert_eq!(chunks[6].data.len(), 400);

        assert_eq!(reassemble(&chunks), payload);
    }

    #[test]
    fn exact_multiple_of_chunk_size() {
        let payload = vec![7; 3200];
        let chunks = chunkify(&payload, 1600).unwrap();

        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].header.flags, ChunkFlags::FIRST);
        assert_eq!(chunks[1].header.flags, ChunkFlags::LAST);

        assert_eq!(reassemble(&chunks), payload);
    }

    #[test]
    fn first_while_midstream_errors_and_restarts() {
        let mut reassembler = Reassembler::new(usize::MAX);

        let stale = chunkify(&[1; 3000], 1600).unwrap();
        assert_eq!(reassembler.process(stale[0].header, stale[0].data).unwrap(), None);

        let fresh_payload = vec![9; 2000];
        let fresh = chunkify(&fresh_payload, 1600).unwrap();

        let err = reassembler
            .process(fresh[0].header, fresh[0].data)
            .unwrap_err();
        assert!(matches!(err, TransportError::CorruptStream { .. }));

        // The offending FIRST started the new message.
        let complete = reassembler.process(fresh[1].header, fresh[1].data).unwrap();
        assert_eq!(complete, Some(fresh_payload));
    }

    #[test]
    fn continuation_without_first_errors() {
        let mut reassembler = Reassembler::new(usize::MAX);

        let header = ChunkHeader {
            total_length: 100,
            flags: ChunkFlags::LAST,
        };

        let err = reassembler.process(header, &[0; 50]).unwrap_err();
        assert!(matches!(err, TransportError::CorruptStream { .. }));
        assert!(reassembler.is_idle());
    }

    #[test]
    fn oversized_message_is_rejected() {
        let mut reassembler = Reassembler::new(1024);

        let payload = vec![0; 4096];
        let chunks = chunkify(&payload, 1600).unwrap();

        let err = reassembler.process(chunks[0].header, chunks[0].data).unwrap_err();
        assert_eq!(
            err,
            TransportError::MessageTooLarge { size: 4096, max: 1024 }
        );
        assert!(reassembler.is_idle());
    }

    #[test]
    fn length_mismatch_on_last_chunk_errors() {
        let mut reassembler = Reassembler::new(usize::MAX);

        let first = ChunkHeader {
            total_length: 3000,
            flags: ChunkFlags::FIRST,
        };
        let last = ChunkHeader {
            total_length: 3000,
            flags: ChunkFlags::LAST,
        };

        reassembler.process(first, &[0; 1600]).unwrap();
        let err = reassembler.process(last, &[0; 100]).unwrap_err();
        assert!(matches!(err, TransportError::CorruptStream { .. }));
    }
}
