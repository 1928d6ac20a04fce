use std::sync::Arc;

use ironvct_pdu::{ChannelName, ChannelOptions, ChunkFlags, ChunkHeader};
use ironvct_testsuite::{CollectingHandler, MockBackend};
use ironvct_transport::{
    BufferPool, ChannelEvent, EventSink as _, FlowPolicy, Reliability, Transport, TransportConfig, TransportError,
    WriteStatus,
};
use pretty_assertions::assert_eq;

struct Session {
    transport: Arc<Transport>,
    written: std::sync::Arc<std::sync::Mutex<Vec<ironvct_testsuite::WrittenChunk>>>,
}

fn session() -> Session {
    let pool = BufferPool::new();
    let (backend, written) = MockBackend::new(pool.clone());
    let transport = Arc::new(Transport::new(Box::new(backend), pool, TransportConfig::default()));
    Session { transport, written }
}

fn name(value: &str) -> ChannelName {
    ChannelName::from_utf8(value).unwrap()
}

#[test]
fn clipboard_write_scenario() {
    let session = session();
    let (handler, log) = CollectingHandler::new();

    let id = session
        .transport
        .register(
            name("CLIPRDR"),
            ChannelOptions::empty(),
            Reliability::Reliable,
            FlowPolicy::None,
            handler,
        )
        .unwrap();

    session.transport.open(id).unwrap();
    assert_eq!(log.lock().unwrap().opened, 1);

    let payload = vec![0x77; 10_000];
    assert_eq!(session.transport.write(id, payload.clone()).unwrap(), WriteStatus::Sent);

    let written = session.written.lock().unwrap().clone();
    assert_eq!(written.len(), 7);
    assert_eq!(written[0].header.flags, ChunkFlags::FIRST);
    for chunk in &written[1..6] {
        assert!(chunk.header.flags.is_middle());
        assert_eq!(chunk.data.len(), 1600);
    }
    assert_eq!(written[6].header.flags, ChunkFlags::LAST);
    assert_eq!(written[6].data.len(), 400);
    assert!(written.iter().all(|chunk| chunk.header.total_length == 10_000));

    // Loop the chunks back in as inbound traffic: they reassemble to the
    // original message.
    let handle = written[0].handle;
    for chunk in &written {
        session.transport.handle_event(
            Some(handle),
            ChannelEvent::DataReceived {
                header: chunk.header,
                data: chunk.data.clone(),
            },
        );
    }

    let log = log.lock().unwrap();
    assert_eq!(log.messages.len(), 1);
    assert_eq!(log.messages[0], payload);
    assert!(log.errors.is_empty());
}

#[test]
fn write_requires_an_open_channel() {
    let session = session();
    let (handler, _log) = CollectingHandler::new();

    let id = session
        .transport
        .register(
            name("ECHO"),
            ChannelOptions::empty(),
            Reliability::Reliable,
            FlowPolicy::None,
            handler,
        )
        .unwrap();

    assert_eq!(
        session.transport.write(id, vec![1, 2, 3]).unwrap_err(),
        TransportError::NotOpen
    );
}

#[test]
fn duplicate_registration_is_rejected() {
    let session = session();

    let (first, _) = CollectingHandler::new();
    session
        .transport
        .register(
            name("SNDAUD"),
            ChannelOptions::empty(),
            Reliability::Reliable,
            FlowPolicy::None,
            first,
        )
        .unwrap();

    let (second, _) = CollectingHandler::new();
    let err = session
        .transport
        .register(
            name("sndaud"),
            ChannelOptions::empty(),
            Reliability::Reliable,
            FlowPolicy::None,
            second,
        )
        .unwrap_err();

    assert!(matches!(err, TransportError::DuplicateName(_)));
}

#[test]
fn ack_window_queues_and_releases_in_order() {
    let session = session();
    let (handler, _log) = CollectingHandler::new();

    let id = session
        .transport
        .register(
            name("BULK"),
            ChannelOptions::empty(),
            Reliability::Reliable,
            FlowPolicy::Ack { window_size: 2000 },
            handler,
        )
        .unwrap();
    session.transport.open(id).unwrap();

    assert_eq!(session.transport.write(id, vec![1; 1500]).unwrap(), WriteStatus::Sent);
    assert_eq!(session.transport.write(id, vec![2; 1000]).unwrap(), WriteStatus::Queued);
    assert_eq!(session.transport.write(id, vec![3; 400]).unwrap(), WriteStatus::Queued);

    assert_eq!(session.written.lock().unwrap().len(), 1);

    // Acknowledging the first message frees window for both queued writes,
    // in arrival order.
    session.transport.acknowledge(id, 1500).unwrap();

    let written = session.written.lock().unwrap().clone();
    assert_eq!(written.len(), 3);
    assert_eq!(written[1].data[0], 2);
    assert_eq!(written[2].data[0], 3);
}

#[test]
fn corrupt_stream_is_reported_and_recovered_from() {
    let session = session();
    let (handler, log) = CollectingHandler::new();

    let id = session
        .transport
        .register(
            name("SEAMLS"),
            ChannelOptions::empty(),
            Reliability::Reliable,
            FlowPolicy::None,
            handler,
        )
        .unwrap();
    session.transport.open(id).unwrap();

    let handle = {
        let written = &session.written;
        session.transport.write(id, vec![0; 1]).unwrap();
        let handle = written.lock().unwrap()[0].handle;
        written.lock().unwrap().clear();
        handle
    };

    let first = ChunkHeader {
        total_length: 3200,
        flags: ChunkFlags::FIRST,
    };
    session.transport.handle_event(
        Some(handle),
        ChannelEvent::DataReceived {
            header: first,
            data: vec![0xAA; 1600],
        },
    );

    // A second FIRST violates single-message-in-flight.
    session.transport.handle_event(
        Some(handle),
        ChannelEvent::DataReceived {
            header: first,
            data: vec![0xBB; 1600],
        },
    );

    {
        let log = log.lock().unwrap();
        assert_eq!(log.errors.len(), 1);
        assert!(matches!(log.errors[0], TransportError::CorruptStream { .. }));
        assert!(log.messages.is_empty());
    }

    // The violating FIRST started a new message; its LAST completes it.
    let last = ChunkHeader {
        total_length: 3200,
        flags: ChunkFlags::LAST,
    };
    session.transport.handle_event(
        Some(handle),
        ChannelEvent::DataReceived {
            header: last,
            data: vec![0xBB; 1600],
        },
    );

    let log = log.lock().unwrap();
    assert_eq!(log.messages.len(), 1);
    assert_eq!(log.messages[0].len(), 3200);
}

#[test]
fn suspend_and_resume_gate_the_write_path() {
    let session = session();
    let (handler, _log) = CollectingHandler::new();

    let id = session
        .transport
        .register(
            name("QOSTEL"),
            ChannelOptions::SHOW_PROTOCOL,
            Reliability::Reliable,
            FlowPolicy::None,
            handler,
        )
        .unwrap();
    session.transport.open(id).unwrap();

    session.transport.write(id, vec![0; 8]).unwrap();
    let handle = session.written.lock().unwrap()[0].handle;
    session.written.lock().unwrap().clear();

    let suspend = ChunkHeader {
        total_length: 0,
        flags: ChunkFlags::SUSPEND,
    };
    session.transport.handle_event(
        Some(handle),
        ChannelEvent::DataReceived {
            header: suspend,
            data: Vec::new(),
        },
    );

    assert_eq!(session.transport.write(id, vec![9; 16]).unwrap(), WriteStatus::Queued);
    assert!(session.written.lock().unwrap().is_empty());

    let resume = ChunkHeader {
        total_length: 0,
        flags: ChunkFlags::RESUME,
    };
    session.transport.handle_event(
        Some(handle),
        ChannelEvent::DataReceived {
            header: resume,
            data: Vec::new(),
        },
    );

    let written = session.written.lock().unwrap().clone();
    assert_eq!(written.len(), 1);
    assert_eq!(written[0].data, vec![9; 16]);
}

#[test]
fn double_close_fails_without_side_effects() {
    let session = session();
    let (handler, log) = CollectingHandler::new();

    let id = session
        .transport
        .register(
            name("PRINTR"),
            ChannelOptions::empty(),
            Reliability::Reliable,
            FlowPolicy::None,
            handler,
        )
        .unwrap();
    session.transport.open(id).unwrap();

    session.transport.close(id).unwrap();
    assert_eq!(log.lock().unwrap().closed, 1);

    assert_eq!(session.transport.close(id).unwrap_err(), TransportError::NotOpen);
    assert_eq!(log.lock().unwrap().closed, 1);
}

#[test]
fn oversized_message_is_rejected_up_front() {
    let pool = BufferPool::new();
    let (backend, _written) = MockBackend::new(pool.clone());
    let transport = Transport::new(
        Box::new(backend),
        pool,
        TransportConfig { max_message_size: 1024 },
    );

    let (handler, _log) = CollectingHandler::new();
    let id = transport
        .register(
            name("BLOB"),
            ChannelOptions::empty(),
            Reliability::Reliable,
            FlowPolicy::None,
            handler,
        )
        .unwrap();
    transport.open(id).unwrap();

    assert_eq!(
        transport.write(id, vec![0; 2048]).unwrap_err(),
        TransportError::MessageTooLarge { size: 2048, max: 1024 }
    );
}

#[test]
fn terminated_event_tears_down_every_channel_once() {
    let session = session();

    let (first_handler, first_log) = CollectingHandler::new();
    let first = session
        .transport
        .register(
            name("CLIPRDR"),
            ChannelOptions::empty(),
            Reliability::Reliable,
            FlowPolicy::None,
            first_handler,
        )
        .unwrap();
    session.transport.open(first).unwrap();

    let (second_handler, second_log) = CollectingHandler::new();
    let second = session
        .transport
        .register(
            name("SNDAUD"),
            ChannelOptions::empty(),
            Reliability::Reliable,
            FlowPolicy::None,
            second_handler,
        )
        .unwrap();
    session.transport.open(second).unwrap();

    session.transport.handle_event(None, ChannelEvent::Terminated);

    assert_eq!(first_log.lock().unwrap().closed, 1);
    assert_eq!(second_log.lock().unwrap().closed, 1);

    // Idempotent against a second teardown signal.
    session.transport.handle_event(None, ChannelEvent::Terminated);
    session.transport.shutdown();
    assert_eq!(first_log.lock().unwrap().closed, 1);
    assert_eq!(second_log.lock().unwrap().closed, 1);

    assert_eq!(
        session.transport.write(first, vec![0; 4]).unwrap_err(),
        TransportError::NotConnected
    );
}

#[test]
fn unreliable_channel_writes_carry_tickets() {
    let session = session();
    let (handler, _log) = CollectingHandler::new();

    let id = session
        .transport
        .register(
            name("CAMRTP"),
            ChannelOptions::empty(),
            Reliability::Unreliable,
            FlowPolicy::None,
            handler,
        )
        .unwrap();
    session.transport.open(id).unwrap();

    session.transport.write(id, vec![0; 4000]).unwrap();

    let written = session.written.lock().unwrap().clone();
    assert_eq!(written.len(), 3);
    for chunk in &written {
        assert_eq!(chunk.reliability, Reliability::Unreliable);
        assert!(chunk.ticket.is_some());
    }
}
