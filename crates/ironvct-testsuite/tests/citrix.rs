use std::sync::Arc;

use ironvct_citrix::{query_host_version, CitrixAdapter, DataArrivalSink as _, PollOutcome, MAX_CHUNK_BATCH_SEND};
use ironvct_pdu::{ChannelName, ChunkFlags, ChunkHeader};
use ironvct_testsuite::{EventCollector, MockWd};
use ironvct_transport::{BufferPool, ChannelBackend, ChannelEvent, TransportError};
use pretty_assertions::assert_eq;

fn adapter() -> (CitrixAdapter, MockWd, Arc<EventCollector>) {
    let wd = MockWd::new();
    let adapter = CitrixAdapter::new(Box::new(wd.clone()), BufferPool::new());
    let sink = EventCollector::new();
    adapter.set_sink(sink.clone());
    (adapter, wd, sink)
}

fn name(value: &str) -> ChannelName {
    ChannelName::from_utf8(value).unwrap()
}

fn write_one(adapter: &mut CitrixAdapter, handle: ironvct_transport::BackendHandle, payload: &[u8]) {
    let pool = BufferPool::new();
    let mut buf = pool.acquire(payload.len()).unwrap();
    buf.append(payload).unwrap();
    let header = ChunkHeader {
        total_length: payload.len() as u32,
        flags: ChunkFlags::ONLY,
    };
    adapter.write_chunk(handle, buf, header).unwrap();
}

#[test]
fn undersized_host_version_query_retries_with_reported_length() {
    let mut wd = MockWd::new();
    wd.inner.lock().unwrap().host_version_len = 16;

    let version = query_host_version(&mut wd).unwrap();
    assert_eq!(version.major, 6);
    assert_eq!(version.minor, 0);
}

#[test]
fn open_assigns_host_channel_number_and_hooks_data() {
    let (mut adapter, wd, _sink) = adapter();

    let handle = adapter.open_channel(&name("SEAMLS")).unwrap();
    assert_eq!(handle.0, 3);

    let inner = wd.inner.lock().unwrap();
    assert!(inner.hooks.contains_key(&3));
}

#[test]
fn writes_drain_on_poll_in_bounded_batches() {
    let (mut adapter, wd, _sink) = adapter();
    let handle = adapter.open_channel(&name("BULK")).unwrap();

    for i in 0..10u8 {
        write_one(&mut adapter, handle, &[i; 32]);
    }

    // First poll sends a full batch and asks for a retry.
    assert_eq!(adapter.poll().unwrap(), PollOutcome::Retry);
    assert_eq!(wd.inner.lock().unwrap().engine.len(), MAX_CHUNK_BATCH_SEND);

    // Second poll drains the remainder.
    assert_eq!(adapter.poll().unwrap(), PollOutcome::Idle);
    assert_eq!(wd.inner.lock().unwrap().engine.len(), 10);
}

#[test]
fn engine_out_of_buffers_requests_retry_and_preserves_the_chunk() {
    let (mut adapter, wd, _sink) = adapter();
    let handle = adapter.open_channel(&name("BULK")).unwrap();
    wd.inner.lock().unwrap().capacity = 1;

    write_one(&mut adapter, handle, &[1; 16]);
    write_one(&mut adapter, handle, &[2; 16]);

    assert_eq!(adapter.poll().unwrap(), PollOutcome::Retry);
    assert_eq!(wd.inner.lock().unwrap().engine.len(), 1);

    // Engine drains; the missed chunk goes out first on the next poll.
    wd.inner.lock().unwrap().capacity = usize::MAX;
    assert_eq!(adapter.poll().unwrap(), PollOutcome::Idle);

    let inner = wd.inner.lock().unwrap();
    assert_eq!(inner.engine.len(), 2);
    assert_eq!(inner.engine[1].data[ChunkHeader::SIZE], 2);
}

#[test]
fn wire_chunks_carry_the_header_in_band() {
    let (mut adapter, wd, _sink) = adapter();
    let handle = adapter.open_channel(&name("CLIP")).unwrap();

    write_one(&mut adapter, handle, &[0xAB; 100]);
    adapter.poll().unwrap();

    let inner = wd.inner.lock().unwrap();
    let write = &inner.engine[0];
    assert_eq!(u32::from(write.channel), handle.0);

    let header: ChunkHeader = ironvct_pdu::decode(&write.data).unwrap();
    assert_eq!(header.total_length, 100);
    assert!(header.flags.is_only());
    assert_eq!(&write.data[ChunkHeader::SIZE..], &[0xAB; 100]);
}

#[test]
fn inbound_sections_decode_into_data_events() {
    let (adapter, _wd, sink) = adapter();

    let mut wire = Vec::new();
    wire.extend_from_slice(&200u32.to_le_bytes());
    wire.extend_from_slice(&ChunkFlags::FIRST.bits().to_le_bytes());
    wire.extend_from_slice(&[0x11; 64]);

    adapter.data_arrival(7, &wire);

    let events = sink.events();
    assert_eq!(events.len(), 1);
    let (handle, event) = &events[0];
    assert_eq!(handle.unwrap().0, 7);

    match event {
        ChannelEvent::DataReceived { header, data } => {
            assert_eq!(header.total_length, 200);
            assert_eq!(header.flags, ChunkFlags::FIRST);
            assert_eq!(data.len(), 64);
        }
        other => panic!("unexpected event: {other:?}"),
    }
}

#[test]
fn successful_queue_reports_write_complete() {
    let (mut adapter, _wd, sink) = adapter();
    let handle = adapter.open_channel(&name("SND")).unwrap();

    write_one(&mut adapter, handle, &[0; 8]);
    adapter.poll().unwrap();

    let events = sink.events();
    assert!(events
        .iter()
        .any(|(h, event)| *h == Some(handle) && matches!(event, ChannelEvent::WriteComplete { .. })));
}

#[test]
fn driver_info_round_trips_through_retry() -> anyhow::Result<()> {
    let (mut adapter, _wd, _sink) = adapter();
    let channel_name = name("SEAMLS");
    adapter.open_channel(&channel_name)?;

    let mut short = [0; 8];
    let err = adapter
        .driver_info(&channel_name, ironvct_pdu::FlowControl::none(), &mut short)
        .unwrap_err();

    let TransportError::BufferTooSmall { required } = err else {
        panic!("unexpected error: {err}");
    };

    let mut buf = vec![0; required];
    let written = adapter.driver_info(&channel_name, ironvct_pdu::FlowControl::none(), &mut buf)?;
    assert_eq!(written, required);

    let record: ironvct_citrix::VdC2h = ironvct_pdu::decode(&buf)?;
    assert_eq!(record.channel_mask, 1 << 3);

    Ok(())
}

#[test]
fn legacy_engines_go_through_the_outbuf_procedures() {
    let (mut adapter, wd, _sink) = adapter();
    wd.inner.lock().unwrap().queued_writes = false;

    let handle = adapter.open_channel(&name("PRINTR")).unwrap();
    write_one(&mut adapter, handle, &[0x3C; 48]);

    assert_eq!(adapter.poll().unwrap(), PollOutcome::Idle);

    let inner = wd.inner.lock().unwrap();
    let write = &inner.engine[0];
    // Committed through reserve/header/append/write, so no QoS metadata.
    assert!(write.qos.is_none());
    assert_eq!(u32::from(write.channel), handle.0);

    let header: ChunkHeader = ironvct_pdu::decode(&write.data).unwrap();
    assert_eq!(header.total_length, 48);
}

#[test]
fn termination_cancels_queued_writes() {
    let (mut adapter, _wd, sink) = adapter();
    let handle = adapter.open_channel(&name("BULK")).unwrap();

    write_one(&mut adapter, handle, &[0; 8]);
    adapter.notify_terminated();

    let events = sink.events();
    assert!(events
        .iter()
        .any(|(_, event)| matches!(event, ChannelEvent::WriteCancelled { .. })));
    assert!(events.iter().any(|(_, event)| *event == ChannelEvent::Terminated));
}
