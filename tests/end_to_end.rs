//! End-to-end scenarios (spec.md §8).

use flowmq::{Message, Socket, SocketKind, Transport, TransportTag};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

fn addr(name: &str) -> String {
    static COUNTER: AtomicUsize = AtomicUsize::new(0);
    let n = COUNTER.fetch_add(1, Ordering::SeqCst);
    format!("inproc://end_to_end/{name}/{n}")
}

fn default_transport() -> flowmq::transport::default_transport::DefaultTransport {
    flowmq::transport::default_transport::DefaultTransport::new()
}

fn message(transport: &dyn Transport, bytes: &[u8]) -> Message {
    let mut m = transport.new_message_with_size(bytes.len()).unwrap();
    m.data_mut().copy_from_slice(bytes);
    m
}

/// Scenario 1: PUSH/PULL single-part.
#[test]
fn push_pull_single_part() {
    let t = default_transport();
    let address = addr("push_pull");

    let pull = t.new_socket(SocketKind::Pull).unwrap();
    pull.bind(&address).unwrap();
    let push = t.new_socket(SocketKind::Push).unwrap();
    push.connect(&address).unwrap();

    push.send(message(&t, &[65, 66]), 1000).unwrap();
    let (outcome, received) = pull.receive(1000).unwrap();
    assert!(matches!(outcome, flowmq::transport::socket::TransferOutcome::Transferred(2)));
    assert_eq!(received.unwrap().data(), &[65, 66]);
}

/// Scenario 2: multipart (3 parts), reassembled in order.
#[test]
fn multipart_three_parts_reassemble_in_order() {
    let t = default_transport();
    let address = addr("multipart");

    let pull = t.new_socket(SocketKind::Pull).unwrap();
    pull.bind(&address).unwrap();
    let push = t.new_socket(SocketKind::Push).unwrap();
    push.connect(&address).unwrap();

    let parts = vec![message(&t, b"1"), message(&t, b"2"), message(&t, b"3")];
    push.send_multipart(parts, 1000).unwrap();

    let (outcome, received) = pull.receive_multipart(1000).unwrap();
    assert!(matches!(outcome, flowmq::transport::socket::TransferOutcome::Transferred(3)));
    let reassembled: Vec<u8> = received.iter().flat_map(|m| m.data().to_vec()).collect();
    assert_eq!(reassembled, b"123");
}

/// Scenario 3: PUB/SUB handshake — two subscribers ready, publisher sends,
/// both subscribers ack.
#[test]
fn pub_sub_handshake_completes_for_every_subscriber() {
    let t = Arc::new(default_transport());
    let control_address = addr("control");
    let data_address = addr("data");

    // Control channel: subscribers push a ready token, publisher pulls both.
    let control_pull = t.new_socket(SocketKind::Pull).unwrap();
    control_pull.bind(&control_address).unwrap();

    // Data channel: publisher publishes, both subscribers receive.
    let publisher = t.new_socket(SocketKind::Publish).unwrap();
    publisher.bind(&data_address).unwrap();

    let mut subscribers = Vec::new();
    let mut control_pushes = Vec::new();
    for _ in 0..2 {
        let sub = t.new_socket(SocketKind::Subscribe).unwrap();
        sub.connect(&data_address).unwrap();
        subscribers.push(sub);

        let ready = t.new_socket(SocketKind::Push).unwrap();
        ready.connect(&control_address).unwrap();
        control_pushes.push(ready);
    }

    for push in &control_pushes {
        push.send(message(t.as_ref(), b"ready"), 1000).unwrap();
    }
    for _ in 0..2 {
        let (outcome, _) = control_pull.receive(1000).unwrap();
        assert!(matches!(outcome, flowmq::transport::socket::TransferOutcome::Transferred(_)));
    }

    publisher.send(message(t.as_ref(), b"data"), 1000).unwrap();

    let ack_address = addr("ack");
    let ack_pull = t.new_socket(SocketKind::Pull).unwrap();
    ack_pull.bind(&ack_address).unwrap();

    for sub in &subscribers {
        let (outcome, msg) = sub.receive(1000).unwrap();
        assert!(matches!(outcome, flowmq::transport::socket::TransferOutcome::Transferred(_)));
        assert_eq!(msg.unwrap().data(), b"data");

        let ack = t.new_socket(SocketKind::Push).unwrap();
        ack.connect(&ack_address).unwrap();
        ack.send(message(t.as_ref(), b"ack"), 1000).unwrap();
    }

    for _ in 0..2 {
        let (outcome, _) = ack_pull.receive(1000).unwrap();
        assert!(matches!(outcome, flowmq::transport::socket::TransferOutcome::Transferred(_)));
    }
}

/// Scenario 4: REQ/REP — two requesters, one replier answering each in turn.
#[test]
fn req_rep_answers_each_requester() {
    let t = default_transport();
    let address = addr("reqrep");

    let replier = t.new_socket(SocketKind::Reply).unwrap();
    replier.bind(&address).unwrap();
    let requester_a = t.new_socket(SocketKind::Request).unwrap();
    requester_a.connect(&address).unwrap();

    requester_a.send(message(&t, &[1]), 1000).unwrap();
    let (_, request) = replier.receive(1000).unwrap();
    assert_eq!(request.unwrap().data(), &[1]);
    replier.send(message(&t, &[9]), 1000).unwrap();
    let (_, reply) = requester_a.receive(1000).unwrap();
    assert_eq!(reply.unwrap().data(), &[9]);
}

/// Scenario 5: shrink + send — a shrunk message delivers exactly its logical
/// size, including the size-0 edge case.
#[test]
fn shrink_then_send_delivers_the_shrunk_size() {
    let t = default_transport();
    let address = addr("shrink");
    let pull = t.new_socket(SocketKind::Pull).unwrap();
    pull.bind(&address).unwrap();
    let push = t.new_socket(SocketKind::Push).unwrap();
    push.connect(&address).unwrap();

    let mut m = t.new_message_with_size(6).unwrap();
    m.data_mut().copy_from_slice(b"ABCDEF");
    m.used_size(2).unwrap();
    push.send(m, 1000).unwrap();
    let (_, received) = pull.receive(1000).unwrap();
    assert_eq!(received.unwrap().data(), b"AB");

    let mut zero = t.new_message_with_size(1000).unwrap();
    zero.used_size(0).unwrap();
    push.send(zero, 1000).unwrap();
    let (_, received) = pull.receive(1000).unwrap();
    assert_eq!(received.unwrap().size(), 0);
}

/// Scenario 6: shmem heartbeat & cleanup. The device stops sending
/// heartbeats (simulating an abrupt kill); the monitor, polling with a short
/// timeout, detects the silence and cleans up.
#[test]
fn shmem_heartbeat_silence_triggers_monitor_cleanup() {
    use flowmq::transport::shmem::{ControlQueue, Monitor, ShmemTransport};

    let queue = ControlQueue::new();
    let monitor = Monitor::new(queue.clone());

    let session = ShmemTransport::new(9_555_001).unwrap();
    let segment_paths = session.segment_paths();
    monitor.register_segment_paths("device-1", segment_paths.clone());

    let stop = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let stop2 = stop.clone();
    let heartbeat_queue = queue.clone();
    let device = thread::spawn(move || {
        while !stop2.load(Ordering::SeqCst) {
            heartbeat_queue.send_heartbeat("device-1");
            thread::sleep(Duration::from_millis(10));
        }
    });

    thread::sleep(Duration::from_millis(30));
    monitor.poll_once();
    assert_eq!(monitor.known_device_count(), 1);

    // Kill the device abruptly: no more heartbeats arrive.
    stop.store(true, Ordering::SeqCst);
    device.join().unwrap();

    thread::sleep(Duration::from_millis(30));
    let stale = monitor.check_timeouts(Duration::from_millis(20));
    assert_eq!(stale, vec!["device-1".to_string()]);
    assert_eq!(monitor.known_device_count(), 0);

    // The segment files cleanup removed must now genuinely be gone: a
    // subsequent open attempt fails with not-found, not a silent no-op.
    for path in &segment_paths {
        let reopened = flowmq::transport::shmem::Segment::open(
            path,
            1024,
            Box::new(flowmq::transport::shmem::SimpleSeqFit::new(1024)),
        );
        let err = reopened.unwrap_err();
        match err {
            flowmq::FlowMqError::Io { source, .. } => {
                assert_eq!(source.kind(), std::io::ErrorKind::NotFound);
            }
            other => panic!("expected Io(NotFound) reopening {path:?}, got {other:?}"),
        }
    }
}

#[test]
fn unresolved_transport_tags_are_reported_as_unavailable() {
    let err = flowmq::make_transport(TransportTag::ZeroMq, 0).unwrap_err();
    assert!(matches!(err, flowmq::FlowMqError::TransportUnavailable { .. }));
}
