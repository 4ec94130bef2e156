//! The per-connection state machine driving a file transfer.

use crate::clock::Clock;
use crate::tcp::segment::{PseudoHeader, Segment, HEADER_LEN};
use crate::tcp::window::UnackedWindow;
use crate::tcp::{
    flags, seq, ACK_WAIT, DEFAULT_RTO, HANDSHAKE_RETRIES, LOCAL_WINDOW, MAX_SEGMENT_PAYLOAD,
};
use crate::transport::{is_timeout, Transport};
use std::fmt;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tracing::{debug, info, trace, warn};

// Large enough for a full header + payload datagram.
const RECV_BUF: usize = HEADER_LEN + MAX_SEGMENT_PAYLOAD;

/// Connection states, CLOSED through DONE.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Closed,
    SynSent,
    Established,
    FinWait1,
    /// Collaborator state awaiting a peer FIN; the sender path never enters
    /// it because FIN-WAIT-1 drains straight to DONE.
    FinWait2,
    Closing,
    TimeWait,
    Done,
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            State::Closed => write!(f, "CLOSED"),
            State::SynSent => write!(f, "SYN-SENT"),
            State::Established => write!(f, "ESTABLISHED"),
            State::FinWait1 => write!(f, "FIN-WAIT-1"),
            State::FinWait2 => write!(f, "FIN-WAIT-2"),
            State::Closing => write!(f, "CLOSING"),
            State::TimeWait => write!(f, "TIME-WAIT"),
            State::Done => write!(f, "DONE"),
        }
    }
}

/// Addressing for one connection; feeds ports into headers and addresses
/// into the checksum pseudo-headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Route {
    pub local_ip: Ipv4Addr,
    pub local_port: u16,
    pub remote_ip: Ipv4Addr,
    pub remote_port: u16,
}

impl Route {
    pub fn new(local_ip: Ipv4Addr, local_port: u16, remote_ip: Ipv4Addr, remote_port: u16) -> Self {
        Route {
            local_ip,
            local_port,
            remote_ip,
            remote_port,
        }
    }

    /// Pseudo-header for segments we send.
    pub fn outbound(&self) -> PseudoHeader {
        PseudoHeader::new(self.local_ip, self.remote_ip)
    }

    /// Pseudo-header for segments the peer sends us.
    pub fn inbound(&self) -> PseudoHeader {
        self.outbound().reversed()
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{} -> {}:{}",
            self.local_ip, self.local_port, self.remote_ip, self.remote_port
        )
    }
}

/// Terminal failures. Segment-level corruption never surfaces here; it is
/// absorbed by the receive path.
#[derive(Debug, Error)]
pub enum TransferError {
    #[error("handshake mismatch: peer acknowledged {got}, expected {expected}")]
    HandshakeMismatch { expected: u32, got: u32 },
    #[error("handshake abandoned after {0} attempts")]
    HandshakeTimeout(u8),
    #[error("transport error: {0}")]
    Io(#[from] std::io::Error),
}

/// Counters reported once the transfer reaches DONE.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TransferStats {
    pub bytes_sent: usize,
    pub segments_sent: usize,
    pub retransmits: usize,
}

/// Read-only view of the connection for tests and diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Snapshot {
    pub state: State,
    pub iss: u32,
    pub irs: u32,
    pub snd_una: u32,
    pub snd_nxt: u32,
    pub snd_wnd: u16,
    pub rcv_nxt: u32,
    pub outstanding: usize,
}

/// Outcome of one bounded receive attempt.
enum Poll {
    Segment(Segment),
    Timeout,
    Dropped,
}

pub struct Connection {
    state: State,
    route: Route,
    transport: Box<dyn Transport>,
    clock: Arc<dyn Clock>,
    /// File contents still owned until DONE releases them
    file: Vec<u8>,
    iss: u32,
    irs: u32,
    snd_una: u32,
    snd_nxt: u32,
    snd_wnd: u16,
    rcv_nxt: u32,
    rcv_wnd: u16,
    window: UnackedWindow,
    rto: Duration,
    syn_retries: u8,
    stats: TransferStats,
}

impl Connection {
    /// Create an active, connecting sender for `file`.
    ///
    /// The transport is injected already bound and connected; the connection
    /// never opens sockets itself.
    pub fn connect(
        transport: Box<dyn Transport>,
        clock: Arc<dyn Clock>,
        route: Route,
        iss: u32,
        file: Vec<u8>,
    ) -> Self {
        Connection {
            state: State::Closed,
            route,
            transport,
            clock,
            file,
            iss,
            irs: 0,
            snd_una: iss,
            snd_nxt: iss,
            snd_wnd: 0,
            rcv_nxt: 0,
            rcv_wnd: LOCAL_WINDOW,
            window: UnackedWindow::new(),
            rto: DEFAULT_RTO,
            syn_retries: 0,
            stats: TransferStats::default(),
        }
    }

    /// ISS from wall-clock seconds truncated to 32 bits; monotonically
    /// increasing between runs.
    pub fn wall_clock_iss() -> u32 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as u32)
            .unwrap_or(0)
    }

    /// Drive the transfer to completion.
    pub fn run(&mut self) -> Result<TransferStats, TransferError> {
        while self.state != State::Done {
            self.step()?;
        }
        Ok(self.stats)
    }

    /// Run exactly one state-handler pass.
    ///
    /// Each pass performs bounded work (at most one blocking receive) so
    /// tests can interleave injected traffic with handler invocations.
    pub fn step(&mut self) -> Result<(), TransferError> {
        match self.state {
            State::Closed => self.on_closed(),
            State::SynSent => self.on_syn_sent(),
            State::Established => self.on_established(),
            State::FinWait1 => self.on_fin_wait1(),
            State::FinWait2 => self.on_fin_wait2(),
            State::Closing | State::TimeWait => self.finish(),
            State::Done => Ok(()),
        }
    }

    pub fn peek(&self) -> Snapshot {
        Snapshot {
            state: self.state,
            iss: self.iss,
            irs: self.irs,
            snd_una: self.snd_una,
            snd_nxt: self.snd_nxt,
            snd_wnd: self.snd_wnd,
            rcv_nxt: self.rcv_nxt,
            outstanding: self.window.len(),
        }
    }

    // ---- state handlers ---------------------------------------------------

    /// CLOSED: open the conversation with a SYN consuming sequence number ISS.
    fn on_closed(&mut self) -> Result<(), TransferError> {
        info!("{} sending SYN, iss={}", self.route, self.iss);
        let bytes = self.send_segment(flags::SYN, self.iss, 0, Vec::new())?;
        self.window
            .insert(self.iss.wrapping_add(1), bytes, self.clock.now());
        self.snd_nxt = self.iss.wrapping_add(1);
        self.transition(State::SynSent);
        Ok(())
    }

    /// SYN-SENT: wait for the peer's SYN+ACK, retrying the SYN a bounded
    /// number of times.
    fn on_syn_sent(&mut self) -> Result<(), TransferError> {
        match self.poll_segment(self.rto)? {
            Poll::Segment(seg) => {
                let syn_ack = flags::SYN | flags::ACK;
                if seg.flags & syn_ack != syn_ack {
                    trace!("{} ignoring non-SYN-ACK in SYN-SENT", self.route);
                    return Ok(());
                }
                if seg.ack != self.snd_nxt {
                    return Err(TransferError::HandshakeMismatch {
                        expected: self.snd_nxt,
                        got: seg.ack,
                    });
                }
                self.irs = seg.seq;
                self.rcv_nxt = seg.seq.wrapping_add(1);
                self.snd_wnd = seg.wnd;
                self.snd_una = seg.ack;
                self.window.prune_up_to(seg.ack);
                // Pure ACK completing the handshake; never retransmitted.
                self.send_segment(flags::ACK, self.snd_nxt, self.rcv_nxt, Vec::new())?;
                info!(
                    "{} handshake complete: irs={} snd_wnd={}",
                    self.route, self.irs, self.snd_wnd
                );
                self.transition(State::Established);
            }
            Poll::Timeout => {
                if self.syn_retries >= HANDSHAKE_RETRIES {
                    return Err(TransferError::HandshakeTimeout(self.syn_retries));
                }
                self.syn_retries += 1;
                warn!(
                    "{} SYN timed out, retry {}/{}",
                    self.route, self.syn_retries, HANDSHAKE_RETRIES
                );
                self.send_segment(flags::SYN, self.iss, 0, Vec::new())?;
                self.window
                    .refresh(self.iss.wrapping_add(1), self.clock.now());
                self.stats.retransmits += 1;
            }
            Poll::Dropped => {}
        }
        Ok(())
    }

    /// ESTABLISHED: retransmit, fill the send window from the file, send the
    /// FIN once everything is queued, otherwise wait briefly for an ACK.
    fn on_established(&mut self) -> Result<(), TransferError> {
        self.retransmit_expired()?;
        self.fill_send_window()?;

        if self.all_data_queued() {
            info!(
                "{} all {} file bytes queued, sending FIN seq={}",
                self.route,
                self.file.len(),
                self.snd_nxt
            );
            let bytes =
                self.send_segment(flags::FIN | flags::ACK, self.snd_nxt, self.rcv_nxt, Vec::new())?;
            self.window
                .insert(self.snd_nxt.wrapping_add(1), bytes, self.clock.now());
            self.snd_nxt = self.snd_nxt.wrapping_add(1);
            self.transition(State::FinWait1);
            return Ok(());
        }

        match self.poll_segment(ACK_WAIT)? {
            Poll::Segment(seg) => self.handle_ack(&seg),
            Poll::Timeout | Poll::Dropped => {}
        }
        Ok(())
    }

    /// FIN-WAIT-1: everything is queued; drain acknowledgments until nothing
    /// is outstanding, then the transfer is done.
    fn on_fin_wait1(&mut self) -> Result<(), TransferError> {
        if self.window.is_empty() {
            return self.finish();
        }
        self.retransmit_expired()?;
        match self.poll_segment(ACK_WAIT)? {
            Poll::Segment(seg) => self.handle_ack(&seg),
            Poll::Timeout | Poll::Dropped => {}
        }
        Ok(())
    }

    /// FIN-WAIT-2: acknowledge the peer's FIN when it arrives.
    fn on_fin_wait2(&mut self) -> Result<(), TransferError> {
        match self.poll_segment(ACK_WAIT)? {
            Poll::Segment(seg) if seg.flags & flags::FIN != 0 => {
                self.rcv_nxt = seg.seq.wrapping_add(1);
                self.send_segment(flags::ACK, self.snd_nxt, self.rcv_nxt, Vec::new())?;
                self.transition(State::TimeWait);
            }
            _ => {}
        }
        Ok(())
    }

    /// Teardown bookkeeping; closes the transport exactly once.
    fn finish(&mut self) -> Result<(), TransferError> {
        self.window.clear();
        self.file = Vec::new();
        self.transport.close()?;
        info!(
            "{} transfer complete: {} bytes in {} segments, {} retransmits",
            self.route, self.stats.bytes_sent, self.stats.segments_sent, self.stats.retransmits
        );
        self.transition(State::Done);
        Ok(())
    }

    // ---- shared plumbing --------------------------------------------------

    /// Resend every window entry whose timer has run out.
    fn retransmit_expired(&mut self) -> Result<(), TransferError> {
        let now = self.clock.now();
        let expired: Vec<(u32, Vec<u8>)> = self
            .window
            .expired(now, self.rto)
            .map(|(key, bytes)| (key, bytes.to_vec()))
            .collect();
        for (key, bytes) in expired {
            debug!(
                "{} RTO expired, retransmitting segment retired by {}",
                self.route, key
            );
            self.transport.send(&bytes)?;
            self.window.refresh(key, now);
            self.stats.retransmits += 1;
        }
        Ok(())
    }

    /// Send unsent file bytes as data segments while the peer window allows,
    /// `[SND.NXT, SND.UNA + SND.WND)` in sequence space.
    fn fill_send_window(&mut self) -> Result<(), TransferError> {
        let now = self.clock.now();
        loop {
            // The SYN consumed ISS, so the file byte at SND.NXT lives at
            // offset SND.NXT - ISS - 1.
            let offset = self.snd_nxt.wrapping_sub(self.iss).wrapping_sub(1) as usize;
            if offset >= self.file.len() {
                break;
            }
            if !seq::in_window(self.snd_nxt, self.snd_una, u32::from(self.snd_wnd)) {
                trace!("{} send window full at seq {}", self.route, self.snd_nxt);
                break;
            }
            let room = self
                .snd_una
                .wrapping_add(u32::from(self.snd_wnd))
                .wrapping_sub(self.snd_nxt) as usize;
            let len = room.min(MAX_SEGMENT_PAYLOAD).min(self.file.len() - offset);
            if len == 0 {
                break;
            }
            let payload = self.file[offset..offset + len].to_vec();
            debug!(
                "{} TX data seq={} len={} ack={}",
                self.route, self.snd_nxt, len, self.rcv_nxt
            );
            let bytes = self.send_segment(flags::ACK, self.snd_nxt, self.rcv_nxt, payload)?;
            let key = self.snd_nxt.wrapping_add(len as u32);
            self.window.insert(key, bytes, now);
            self.snd_nxt = key;
            self.stats.bytes_sent += len;
        }
        Ok(())
    }

    fn all_data_queued(&self) -> bool {
        self.snd_nxt.wrapping_sub(self.iss).wrapping_sub(1) as usize >= self.file.len()
    }

    /// Fold a peer ACK into the sequence variables and the window.
    ///
    /// Old acks (below SND.UNA) and acks for data never sent are ignored. A
    /// duplicate ack at exactly SND.UNA retires nothing but still carries the
    /// peer's current window; a zero-window peer reopens by repeating its
    /// last ack with a larger window, so dropping the update would stall the
    /// transfer with nothing outstanding to retransmit.
    fn handle_ack(&mut self, seg: &Segment) {
        if seg.flags & flags::ACK == 0 {
            trace!("{} dropping non-ACK segment", self.route);
            return;
        }
        if seg.ack == self.snd_una {
            if seg.wnd != self.snd_wnd {
                debug!(
                    "{} duplicate ack {} updates window {} -> {}",
                    self.route, seg.ack, self.snd_wnd, seg.wnd
                );
            }
            self.snd_wnd = seg.wnd;
            return;
        }
        if !(seq::precedes(self.snd_una, seg.ack) && seq::precedes_or_eq(seg.ack, self.snd_nxt)) {
            trace!("{} ignoring stale ack {}", self.route, seg.ack);
            return;
        }
        let retired = self.window.prune_up_to(seg.ack);
        self.snd_una = seg.ack;
        self.snd_wnd = seg.wnd;
        debug_assert!(seq::precedes_or_eq(self.snd_una, self.snd_nxt));
        debug!(
            "{} ack {} retired {} segment(s), oldest outstanding {:?}",
            self.route,
            seg.ack,
            retired.len(),
            self.window.oldest_key()
        );
    }

    /// Encode and transmit one segment; returns the wire image so callers
    /// can queue it for retransmission.
    fn send_segment(
        &mut self,
        fgs: u8,
        seq_num: u32,
        ack: u32,
        payload: Vec<u8>,
    ) -> Result<Vec<u8>, TransferError> {
        let segment = Segment {
            src_port: self.route.local_port,
            dst_port: self.route.remote_port,
            seq: seq_num,
            ack,
            flags: fgs,
            wnd: self.rcv_wnd,
            urgent: 0,
            payload,
        };
        let bytes = segment.encode(&self.route.outbound());
        trace!(
            "{} TX [{}] seq={} ack={} len={}",
            self.route,
            flags::flags_to_string(fgs),
            seq_num,
            ack,
            bytes.len() - HEADER_LEN
        );
        self.transport.send(&bytes)?;
        self.stats.segments_sent += 1;
        Ok(bytes)
    }

    /// One bounded receive attempt. Undecodable datagrams and traffic for
    /// other port pairs are dropped, never fatal.
    fn poll_segment(&mut self, timeout: Duration) -> Result<Poll, TransferError> {
        let mut buf = [0u8; RECV_BUF];
        match self.transport.recv(&mut buf, timeout) {
            Ok(n) => match Segment::decode(&buf[..n], &self.route.inbound()) {
                Ok(seg) => {
                    if seg.src_port != self.route.remote_port
                        || seg.dst_port != self.route.local_port
                    {
                        trace!("{} dropping segment for other port pair", self.route);
                        return Ok(Poll::Dropped);
                    }
                    trace!(
                        "{} RX [{}] seq={} ack={} wnd={} len={}",
                        self.route,
                        flags::flags_to_string(seg.flags),
                        seg.seq,
                        seg.ack,
                        seg.wnd,
                        seg.payload.len()
                    );
                    Ok(Poll::Segment(seg))
                }
                Err(err) => {
                    debug!("{} dropping undecodable datagram: {}", self.route, err);
                    Ok(Poll::Dropped)
                }
            },
            Err(err) if is_timeout(&err) => Ok(Poll::Timeout),
            Err(err) => Err(TransferError::Io(err)),
        }
    }

    fn transition(&mut self, next: State) {
        debug!("{} STATE: {} -> {}", self.route, self.state, next);
        self.state = next;
    }
}

#[cfg(test)]
impl Connection {
    pub fn set_rto(&mut self, rto: Duration) {
        self.rto = rto;
    }
}
