
use crate::clock::MockClock;
use crate::tcp::{flags, Connection, Route, State, TransferError, HANDSHAKE_RETRIES};
use crate::transport::MockTransport;
use segments::{parse_sent, PeerFactory};
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::{Duration, Instant};

const ISS: u32 = 1000;
const PEER_ISS: u32 = 55_000;

fn rig(file: Vec<u8>) -> (MockTransport, Arc<MockClock>, Connection, Route, PeerFactory) {
    let route = Route::new(
        Ipv4Addr::new(10, 0, 0, 2),
        5001,
        Ipv4Addr::new(10, 0, 0, 1),
        6001,
    );
    let transport = MockTransport::new();
    let clock = Arc::new(MockClock::new(Instant::now()));
    let connection = Connection::connect(
        Box::new(transport.clone()),
        clock.clone(),
        route,
        ISS,
        file,
    );
    let peer = PeerFactory::new(&route);
    (transport, clock, connection, route, peer)
}

/// Run the handshake: SYN out, SYN-ACK in, ACK out.
fn establish(
    transport: &MockTransport,
    connection: &mut Connection,
    peer: &PeerFactory,
    wnd: u16,
) {
    connection.step().unwrap(); // CLOSED: sends SYN
    transport.inject_datagram(
        "peer SYN-ACK",
        peer.syn_ack(PEER_ISS, ISS.wrapping_add(1), wnd),
    );
    connection.step().unwrap(); // SYN-SENT: completes handshake
    assert_eq!(connection.peek().state, State::Established);
    transport.clear_sent();
}

#[test]
fn syn_carries_the_iss() {
    let (transport, _clock, mut connection, route, _peer) = rig(vec![0u8; 100]);

    connection.step().unwrap();

    let sent = transport.sent_datagrams();
    assert_eq!(sent.len(), 1, "expected exactly the SYN");
    let syn = parse_sent(&sent[0].1, &route);
    assert_eq!(syn.seq, ISS);
    assert_eq!(syn.flags, flags::SYN);
    assert!(syn.payload.is_empty());
    assert_eq!(connection.peek().state, State::SynSent);
    assert_eq!(connection.peek().snd_nxt, ISS + 1);
}

#[test]
fn handshake_reaches_established() {
    let (transport, _clock, mut connection, route, peer) = rig(vec![0u8; 100]);

    connection.step().unwrap();
    transport.inject_datagram("peer SYN-ACK", peer.syn_ack(PEER_ISS, ISS + 1, 4000));
    connection.step().unwrap();

    let snap = connection.peek();
    assert_eq!(snap.state, State::Established);
    assert_eq!(snap.snd_una, ISS + 1);
    assert_eq!(snap.snd_nxt, ISS + 1);
    assert_eq!(snap.snd_wnd, 4000);
    assert_eq!(snap.irs, PEER_ISS);
    assert_eq!(snap.rcv_nxt, PEER_ISS + 1);
    assert_eq!(snap.outstanding, 0, "the SYN must be retired");

    // The handshake ends with our pure ACK of the peer's SYN.
    let ack = parse_sent(&transport.last_sent().unwrap(), &route);
    assert_eq!(ack.flags, flags::ACK);
    assert_eq!(ack.ack, PEER_ISS + 1);
}

#[test]
fn handshake_mismatch_is_fatal() {
    let (transport, _clock, mut connection, _route, peer) = rig(vec![0u8; 100]);

    connection.step().unwrap();
    // Peer acknowledges a sequence number we never sent.
    transport.inject_datagram("bad SYN-ACK", peer.syn_ack(PEER_ISS, ISS + 5, 4000));

    let err = connection.step().unwrap_err();
    assert!(matches!(
        err,
        TransferError::HandshakeMismatch {
            expected,
            got,
        } if expected == ISS + 1 && got == ISS + 5
    ));
}

#[test]
fn handshake_times_out_after_bounded_retries() {
    let (transport, _clock, mut connection, route, _peer) = rig(vec![0u8; 100]);

    connection.step().unwrap(); // SYN

    // Every poll times out; each retry resends the SYN.
    for _ in 0..HANDSHAKE_RETRIES {
        connection.step().unwrap();
    }
    let err = connection.step().unwrap_err();
    assert!(matches!(err, TransferError::HandshakeTimeout(n) if n == HANDSHAKE_RETRIES));

    let sent = transport.sent_datagrams();
    assert_eq!(sent.len(), 1 + HANDSHAKE_RETRIES as usize);
    for (_, datagram) in &sent {
        assert_eq!(parse_sent(datagram, &route).seq, ISS);
    }
}

#[test]
fn transfer_slices_file_into_segments_then_fin() {
    let (transport, _clock, mut connection, route, peer) = rig(vec![7u8; 3000]);
    establish(&transport, &mut connection, &peer, 4000);

    connection.step().unwrap();

    let sent = transport.sent_datagrams();
    assert_eq!(sent.len(), 4, "expected three data segments and a FIN");

    let mut expected_seq = ISS + 1;
    for (datagram, expected_len) in sent.iter().take(3).zip([1448usize, 1448, 104]) {
        let segment = parse_sent(&datagram.1, &route);
        assert_eq!(segment.seq, expected_seq, "seq must match prior SND.NXT");
        assert_eq!(segment.payload.len(), expected_len);
        assert_eq!(segment.flags, flags::ACK);
        expected_seq = expected_seq.wrapping_add(expected_len as u32);
    }

    let fin = parse_sent(&sent[3].1, &route);
    assert_eq!(fin.flags, flags::FIN | flags::ACK);
    assert_eq!(fin.seq, ISS + 1 + 3000);
    assert_eq!(connection.peek().state, State::FinWait1);
    assert_eq!(connection.peek().snd_nxt, ISS + 1 + 3000 + 1);
}

#[test]
fn peer_window_limits_data_in_flight() {
    let (transport, _clock, mut connection, route, peer) = rig(vec![3u8; 3000]);
    establish(&transport, &mut connection, &peer, 2000);

    connection.step().unwrap();

    // Only 2000 bytes fit: one full segment plus the remainder of the window.
    let sent = transport.sent_datagrams();
    assert_eq!(sent.len(), 2);
    assert_eq!(parse_sent(&sent[0].1, &route).payload.len(), 1448);
    assert_eq!(parse_sent(&sent[1].1, &route).payload.len(), 552);
    assert_eq!(connection.peek().state, State::Established);

    // Acknowledging everything opens the window for the last 1000 bytes.
    transport.inject_datagram("peer ACK", peer.ack(PEER_ISS + 1, ISS + 1 + 2000, 2000));
    connection.step().unwrap();
    transport.clear_sent();
    connection.step().unwrap();

    let sent = transport.sent_datagrams();
    assert_eq!(sent.len(), 2, "final data segment and FIN");
    assert_eq!(parse_sent(&sent[0].1, &route).payload.len(), 1000);
    assert_eq!(connection.peek().state, State::FinWait1);
}

#[test]
fn reopened_zero_window_resumes_sending() {
    let (transport, _clock, mut connection, route, peer) = rig(vec![6u8; 3000]);
    establish(&transport, &mut connection, &peer, 1448);

    connection.step().unwrap(); // first 1448 bytes fill the window
    assert_eq!(parse_sent(&transport.last_sent().unwrap(), &route).payload.len(), 1448);

    // The peer acks everything but closes its window.
    transport.inject_datagram("peer ACK, window closed", peer.ack(PEER_ISS + 1, ISS + 1 + 1448, 0));
    connection.step().unwrap();
    assert_eq!(connection.peek().snd_wnd, 0);
    assert_eq!(connection.peek().outstanding, 0);

    // Nothing can move while the window is closed.
    transport.clear_sent();
    connection.step().unwrap();
    assert!(transport.sent_datagrams().is_empty());
    assert_eq!(connection.peek().state, State::Established);

    // The reopening update rides a duplicate of the same ack number.
    transport.inject_datagram(
        "peer window update",
        peer.ack(PEER_ISS + 1, ISS + 1 + 1448, 1448),
    );
    connection.step().unwrap();
    assert_eq!(connection.peek().snd_wnd, 1448);

    connection.step().unwrap();
    let sent = transport.sent_datagrams();
    assert!(!sent.is_empty(), "sender must resume after the window reopens");
    let segment = parse_sent(&sent[0].1, &route);
    assert_eq!(segment.seq, ISS + 1 + 1448);
    assert_eq!(segment.payload.len(), 1448);
}

#[test]
fn expired_segments_are_retransmitted() {
    let (transport, clock, mut connection, route, peer) = rig(vec![9u8; 500]);
    establish(&transport, &mut connection, &peer, 4000);

    connection.step().unwrap(); // data + FIN
    transport.clear_sent();

    // Under the 500 ms RTO nothing is resent.
    clock.advance(Duration::from_millis(400));
    connection.step().unwrap();
    assert!(transport.sent_datagrams().is_empty());

    // Past it, both outstanding segments go out again unchanged.
    clock.advance(Duration::from_millis(200));
    connection.step().unwrap();
    let resent = transport.sent_datagrams();
    assert_eq!(resent.len(), 2);
    assert_eq!(parse_sent(&resent[0].1, &route).seq, ISS + 1);
    assert_eq!(parse_sent(&resent[0].1, &route).payload.len(), 500);
    assert_eq!(parse_sent(&resent[1].1, &route).flags, flags::FIN | flags::ACK);
    assert_eq!(connection.peek().outstanding, 2);
}

#[test]
fn stale_acks_are_ignored() {
    let (transport, _clock, mut connection, _route, peer) = rig(vec![1u8; 100]);
    establish(&transport, &mut connection, &peer, 4000);

    connection.step().unwrap(); // 100 bytes + FIN, snd_nxt = 1102
    transport.inject_datagram("peer ACK data", peer.ack(PEER_ISS + 1, ISS + 1 + 100, 4000));
    connection.step().unwrap();
    assert_eq!(connection.peek().snd_una, ISS + 101);

    // A duplicate of the same ack and one below SND.UNA change nothing.
    transport.inject_datagram("dup ACK", peer.ack(PEER_ISS + 1, ISS + 1 + 100, 4000));
    connection.step().unwrap();
    transport.inject_datagram("old ACK", peer.ack(PEER_ISS + 1, ISS + 1, 4000));
    connection.step().unwrap();

    let snap = connection.peek();
    assert_eq!(snap.snd_una, ISS + 101);
    assert_eq!(snap.outstanding, 1, "only the FIN remains outstanding");
    assert_eq!(snap.state, State::FinWait1);
}

#[test]
fn corrupt_datagrams_are_dropped_not_fatal() {
    let (transport, _clock, mut connection, _route, peer) = rig(vec![5u8; 100]);
    establish(&transport, &mut connection, &peer, 4000);
    connection.step().unwrap(); // data + FIN

    let mut corrupt = peer.ack(PEER_ISS + 1, ISS + 1 + 100, 4000);
    corrupt[4] ^= 0xff;
    transport.inject_datagram("corrupt ACK", corrupt);
    connection.step().unwrap();

    // The corrupt ack was discarded; state and SND.UNA are untouched.
    assert_eq!(connection.peek().snd_una, ISS + 1);
    assert_eq!(connection.peek().state, State::FinWait1);

    // The retransmission timer recovers: a clean ack still lands.
    transport.inject_datagram("clean ACK", peer.ack(PEER_ISS + 1, ISS + 1 + 101, 4000));
    connection.step().unwrap();
    assert_eq!(connection.peek().outstanding, 0);
}

#[test]
fn teardown_closes_the_transport_exactly_once() {
    let (transport, _clock, mut connection, _route, peer) = rig(vec![2u8; 100]);
    establish(&transport, &mut connection, &peer, 4000);

    connection.step().unwrap(); // data + FIN, keys 1101 and 1102
    transport.inject_datagram("peer ACK all", peer.ack(PEER_ISS + 1, ISS + 1 + 100 + 1, 4000));
    connection.step().unwrap(); // FIN-WAIT-1 prunes everything
    assert_eq!(connection.peek().outstanding, 0);

    connection.step().unwrap(); // empty window: DONE
    assert_eq!(connection.peek().state, State::Done);
    assert_eq!(transport.close_count(), 1);

    // Further steps are no-ops.
    connection.step().unwrap();
    assert_eq!(transport.close_count(), 1);
}

#[test]
fn empty_file_sends_only_a_fin() {
    let (transport, _clock, mut connection, route, peer) = rig(Vec::new());
    establish(&transport, &mut connection, &peer, 4000);

    connection.step().unwrap();

    let sent = transport.sent_datagrams();
    assert_eq!(sent.len(), 1);
    let fin = parse_sent(&sent[0].1, &route);
    assert_eq!(fin.flags, flags::FIN | flags::ACK);
    assert_eq!(fin.seq, ISS + 1);
    assert_eq!(connection.peek().state, State::FinWait1);
}

#[test]
fn run_completes_with_prequeued_peer_traffic() {
    let (transport, _clock, mut connection, _route, peer) = rig(vec![8u8; 3000]);

    // Script the whole conversation up front: SYN-ACK, then one cumulative
    // ack covering all three data segments and the FIN.
    transport.inject_datagram("peer SYN-ACK", peer.syn_ack(PEER_ISS, ISS + 1, 4000));
    transport.inject_datagram(
        "peer ACK everything",
        peer.ack(PEER_ISS + 1, ISS + 1 + 3000 + 1, 4000),
    );

    let stats = connection.run().unwrap();

    assert_eq!(connection.peek().state, State::Done);
    assert_eq!(stats.bytes_sent, 3000);
    // SYN + handshake ACK + three data segments + FIN
    assert_eq!(stats.segments_sent, 6);
    assert_eq!(stats.retransmits, 0);
    assert_eq!(transport.close_count(), 1);
}

#[test]
fn lost_ack_recovers_via_retransmission() {
    let (transport, clock, mut connection, route, peer) = rig(vec![4u8; 200]);
    establish(&transport, &mut connection, &peer, 4000);
    connection.set_rto(Duration::from_millis(50));

    connection.step().unwrap(); // data + FIN
    transport.clear_sent();

    // No ack arrives; after the RTO both segments are resent verbatim.
    clock.advance(Duration::from_millis(60));
    connection.step().unwrap();
    let resent = transport.sent_datagrams();
    assert_eq!(resent.len(), 2);
    assert_eq!(parse_sent(&resent[0].1, &route).payload, vec![4u8; 200]);

    // The peer finally acks everything and the transfer finishes.
    transport.inject_datagram("peer ACK all", peer.ack(PEER_ISS + 1, ISS + 1 + 200 + 1, 4000));
    connection.step().unwrap();
    connection.step().unwrap();
    assert_eq!(connection.peek().state, State::Done);
}
