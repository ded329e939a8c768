//! The TCP socket state machine: handshake, sliding-window data transfer with congestion control,
//! and graceful teardown (spec.md §4.4). This is the stateful half of the simulator's TCP
//! implementation — the pure pieces (wire format, buffers, congestion policies) live in the
//! `tcp` crate; this module drives them with the cooperative scheduler and a `Host`'s routing
//! table, the way `shadow-shadow/src/lib/tcp`'s state types drive its own buffer/congestion
//! modules, except bound to one scheduler rather than dispatched through a `Dependencies` trait
//! (see `tcp::lib`'s module doc for why that split was made).

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::rc::Rc;

use bytes::Bytes;
use scheduler::{Event, Scheduler};
use simlog::eventlog::EventLog;
use tcp::buffer::{RecvBuffer, SendBuffer};
use tcp::congestion::{CongestionController, Reno, Tahoe};
use tcp::packet::{TcpFlags, TcpSegment};

use crate::host::{Host, HostError};
use crate::packet::{Packet, Payload};

/// Retry budget for the handshake and teardown (spec.md §4.4.1/§4.4.6: "all 10 SYN retries",
/// "retry via `attempt` up to 10 times").
const HANDSHAKE_RETRIES: u32 = 10;

/// Retry budget for a single outstanding data segment (spec.md §4.4.6: "per-segment for data").
/// Consecutive RTO losses on the same in-flight range, uninterrupted by any new ACK, count
/// against this budget; a new ACK resets the counter since it's evidence the path is alive.
const DATA_RETRIES: u32 = 10;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum State {
    Closed,
    Listen,
    SynSent,
    SynRcvd,
    Established,
    FinWait1,
    FinWait2,
    Closing,
    CloseWait,
    LastAck,
    TimeWait,
}

impl State {
    fn label(&self) -> &'static str {
        match self {
            State::Closed => "CLOSED",
            State::Listen => "LISTEN",
            State::SynSent => "SYN_SENT",
            State::SynRcvd => "SYN_RCVD",
            State::Established => "ESTABLISHED",
            State::FinWait1 => "FIN_WAIT_1",
            State::FinWait2 => "FIN_WAIT_2",
            State::Closing => "CLOSING",
            State::CloseWait => "CLOSE_WAIT",
            State::LastAck => "LAST_ACK",
            State::TimeWait => "TIME_WAIT",
        }
    }
}

/// Which congestion-control policy a socket uses; selectable at construction, default Reno
/// (spec.md §9's resolved open question).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CongestionVariant {
    Tahoe,
    Reno,
}

impl Default for CongestionVariant {
    fn default() -> Self {
        CongestionVariant::Reno
    }
}

fn new_controller(variant: CongestionVariant) -> Box<dyn CongestionController> {
    match variant {
        CongestionVariant::Tahoe => Box::new(Tahoe::new()),
        CongestionVariant::Reno => Box::new(Reno::new()),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindError {
    PortInUse,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenError {
    NotBound,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcceptError {
    NotListening,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectError {
    RetriesExhausted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendError {
    NotConnected,
    PeerClosed,
    RetriesExhausted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecvError {
    NotConnected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseError {
    RetriesExhausted,
}

pub struct TcpSocket {
    host: Rc<Host>,
    scheduler: Scheduler,
    log: Rc<EventLog>,

    local: Cell<Option<SocketAddrV4>>,
    remote: Cell<Option<SocketAddrV4>>,
    state: Cell<State>,
    congestion_variant: CongestionVariant,

    send_buf: RefCell<SendBuffer>,
    recv_buf: RefCell<RecvBuffer>,
    cc: RefCell<Box<dyn CongestionController>>,
    rto: Cell<f64>,
    /// `out_ack_i` value as of the last timeout loss this socket declared; guards against two
    /// concurrently outstanding retransmission timers both reacting to the same underlying loss
    /// (spec.md §4.4.3: "no earlier loss event has been handled for it").
    last_timeout_ack_i: Cell<Option<usize>>,
    /// Bumped every time a timeout is declared, so a guard spawned by the *next* retry (which
    /// shares `out_ack_i` with every sibling guard from the attempt that just timed out) isn't
    /// mistaken for one of those now-stale siblings and silently dropped.
    retry_generation: Cell<u64>,
    /// Consecutive RTO losses on the data path with no intervening new-ack progress. Reset to 0
    /// by `on_ack`'s new-ack branch; once it reaches [`DATA_RETRIES`], `sendall` bails out with
    /// `SendError::RetriesExhausted` instead of retrying forever (spec.md §4.4.6).
    data_retry_count: Cell<u32>,
    /// Set once `data_retry_count` exhausts the budget; `sendall`'s loop checks this and returns
    /// rather than spawning another doomed retransmission guard.
    data_retries_exhausted: Cell<bool>,

    syn_event: Event<()>,
    syn_ack_event: Event<()>,
    ack_event: Event<u64>,
    data_event: Event<()>,
    fin_event: Event<()>,

    /// LISTEN-socket only: freshly-minted SYN_RCVD children awaiting `accept()`.
    accept_queue: RefCell<VecDeque<Rc<TcpSocket>>>,

    peer_fin_seen: Cell<bool>,
    our_fin_sent: Cell<bool>,
}

impl TcpSocket {
    pub(crate) fn new(host: Rc<Host>, congestion_variant: CongestionVariant) -> Rc<Self> {
        let scheduler = host.scheduler.clone();
        let log = Rc::clone(&host.log);
        Rc::new(Self {
            host,
            syn_event: scheduler.new_event(),
            syn_ack_event: scheduler.new_event(),
            ack_event: scheduler.new_event(),
            data_event: scheduler.new_event(),
            fin_event: scheduler.new_event(),
            scheduler,
            log,
            local: Cell::new(None),
            remote: Cell::new(None),
            state: Cell::new(State::Closed),
            congestion_variant,
            send_buf: RefCell::new(SendBuffer::new()),
            recv_buf: RefCell::new(RecvBuffer::new()),
            cc: RefCell::new(new_controller(congestion_variant)),
            rto: Cell::new(tcp::INITIAL_RTO),
            last_timeout_ack_i: Cell::new(None),
            retry_generation: Cell::new(0),
            data_retry_count: Cell::new(0),
            data_retries_exhausted: Cell::new(false),
            accept_queue: RefCell::new(VecDeque::new()),
            peer_fin_seen: Cell::new(false),
            our_fin_sent: Cell::new(false),
        })
    }

    pub fn state(&self) -> State {
        self.state.get()
    }

    pub fn local_addr(&self) -> Option<SocketAddrV4> {
        self.local.get()
    }

    pub fn remote_addr(&self) -> Option<SocketAddrV4> {
        self.remote.get()
    }

    /// Highest outbound byte offset acknowledged so far (spec.md §3's `out_ack_i`). Exposed
    /// read-only for the invariants in spec.md §8 and for observability tooling built on top of
    /// this crate.
    pub fn out_ack_i(&self) -> usize {
        self.send_buf.borrow().out_ack_i()
    }

    pub fn out_i(&self) -> usize {
        self.send_buf.borrow().out_i()
    }

    pub fn inc_i(&self) -> usize {
        self.recv_buf.borrow().inc_i()
    }

    pub fn inc_read_i(&self) -> usize {
        self.recv_buf.borrow().inc_read_i()
    }

    pub fn cwnd(&self) -> u32 {
        self.cc.borrow().cwnd()
    }

    pub fn ssthresh(&self) -> u32 {
        self.cc.borrow().ssthresh()
    }

    fn now(&self) -> f64 {
        let t = self.scheduler.now().as_secs_f64();
        simlog::set_current_time(t);
        t
    }

    fn set_state(&self, state: State) {
        let now = self.now();
        self.log.record(
            now,
            "tcp-state",
            format_args!("{} {}", self.local_tag(), state.label()),
        );
        self.state.set(state);
    }

    fn local_tag(&self) -> String {
        match self.local.get() {
            Some(addr) => format!("{}:{}", addr.ip(), addr.port()),
            None => "-:-".to_string(),
        }
    }

    // ---- setup ----------------------------------------------------------

    pub fn bind(&self, ip: Ipv4Addr, port: u16) -> Result<(), BindError> {
        self.host.bind_tcp_port(port).map_err(|e| match e {
            HostError::PortInUse(_) => BindError::PortInUse,
            HostError::NoAvailablePorts => unreachable!("bind doesn't allocate"),
        })?;
        self.local.set(Some(SocketAddrV4::new(ip, port)));
        Ok(())
    }

    pub fn listen(self: &Rc<Self>) -> Result<(), ListenError> {
        let Some(local) = self.local.get() else {
            return Err(ListenError::NotBound);
        };
        self.host.listen_tcp(local.port(), Rc::clone(self));
        self.set_state(State::Listen);
        Ok(())
    }

    /// Wait for an incoming SYN and return the freshly-minted child socket, already in SYN_RCVD
    /// with SYN+ACK sent (spec.md §4.4.2).
    pub async fn accept(self: &Rc<Self>) -> Result<Rc<TcpSocket>, AcceptError> {
        if self.state.get() != State::Listen {
            return Err(AcceptError::NotListening);
        }
        loop {
            if let Some(child) = self.accept_queue.borrow_mut().pop_front() {
                return Ok(child);
            }
            let _ = self.syn_event.wait(None).await;
        }
    }

    /// Client-side handshake: send SYN, retry on RTO up to 10 times, wait for SYN+ACK
    /// (spec.md §4.4.2).
    pub async fn connect(self: &Rc<Self>, ip: Ipv4Addr, port: u16) -> Result<(), ConnectError> {
        if self.local.get().is_none() {
            let local_port = self
                .host
                .alloc_ephemeral_tcp_port()
                .expect("ephemeral port allocation");
            self.local.set(Some(SocketAddrV4::new(self.host.ip, local_port)));
        }
        let remote = SocketAddrV4::new(ip, port);
        self.remote.set(Some(remote));
        self.set_state(State::SynSent);

        let this = Rc::clone(self);
        let result = scheduler::attempt(
            move || {
                let this = Rc::clone(&this);
                async move {
                    this.send_segment(TcpFlags::SYN, 0, 0, Bytes::new());
                    this.syn_ack_event.wait(Some(this.rto.get())).await
                }
            },
            HANDSHAKE_RETRIES,
        )
        .await;

        if result.is_err() {
            self.set_state(State::Closed);
            return Err(ConnectError::RetriesExhausted);
        }

        self.send_segment(TcpFlags::ACK, 0, 0, Bytes::new());
        self.set_state(State::Established);
        Ok(())
    }

    // ---- sending ----------------------------------------------------------

    fn send_segment(&self, flags: TcpFlags, seq_num: u64, ack_num: u64, payload: Bytes) {
        let Some(local) = self.local.get() else { return };
        let Some(remote) = self.remote.get() else { return };
        let now = self.now();
        let seg = TcpSegment {
            src: local,
            dst: remote,
            seq_num,
            ack_num,
            flags,
            timestamp: now,
            payload: payload.clone(),
        };
        self.log.record(
            now,
            "tcp-send",
            format_args!(
                "{} {}",
                self.local_tag(),
                segment_log_token(&flags, seq_num, ack_num, payload.len())
            ),
        );
        let packet = Packet {
            id: self.host.alloc_packet_id(),
            src_ip: *local.ip(),
            dst_ip: *remote.ip(),
            payload: Payload::Tcp(seg),
        };
        self.host.send(packet);
    }

    /// spec.md §4.4.3's `sendall` loop.
    pub async fn sendall(self: &Rc<Self>, bytes: &[u8]) -> Result<(), SendError> {
        if self.state.get() != State::Established && self.state.get() != State::CloseWait {
            return Err(SendError::NotConnected);
        }
        self.send_buf.borrow_mut().push(bytes);

        loop {
            let (out_ack_i, total_len) = {
                let b = self.send_buf.borrow();
                (b.out_ack_i(), b.len())
            };
            if out_ack_i >= total_len {
                break;
            }

            if self.peer_fin_seen.get() {
                return Err(SendError::PeerClosed);
            }
            if self.data_retries_exhausted.get() {
                return Err(SendError::RetriesExhausted);
            }

            let (out_i, cwnd) = {
                let b = self.send_buf.borrow();
                (b.out_i(), self.cc.borrow().cwnd() as usize)
            };
            let end = out_ack_i
                .saturating_add(cwnd)
                .min(out_i + tcp::MSS as usize)
                .min(total_len);

            if out_i < end {
                let payload = self.send_buf.borrow().slice(out_i, end);
                self.send_segment(TcpFlags::empty(), out_i as u64, 0, payload);
                self.send_buf.borrow_mut().advance_out_i(end);
                self.spawn_retransmission_guard(end);
            } else {
                let _ = self.ack_event.wait(None).await;
            }
        }
        Ok(())
    }

    /// Spawn a one-shot flow that, after `sleep(rto)`, declares a timeout loss for byte range
    /// `[.., end)` unless it's already been acknowledged or another guard already handled the
    /// same underlying loss (spec.md §4.4.3).
    fn spawn_retransmission_guard(self: &Rc<Self>, end: usize) {
        let generation = self.retry_generation.get();
        let this = Rc::clone(self);
        self.scheduler.spawn(async move {
            let rto = this.rto.get();
            this.scheduler.sleep(rto).await;

            let out_ack_i = this.send_buf.borrow().out_ack_i();
            if out_ack_i >= end {
                return; // acknowledged before the timer fired
            }
            if this.retry_generation.get() != generation {
                return; // a later retry already superseded this attempt
            }
            if this.last_timeout_ack_i.get() == Some(out_ack_i) {
                return; // another guard from this same attempt already declared this loss
            }
            this.last_timeout_ack_i.set(Some(out_ack_i));
            this.retry_generation.set(generation + 1);

            let now = this.now();
            this.log.record(
                now,
                "tcp-loss",
                format_args!("{} timeout ack_i={}", this.local_tag(), out_ack_i),
            );
            let new_rto = (rto * 2.0).min(tcp::RTO_MAX);
            this.rto.set(new_rto);
            this.log.record(
                now,
                "tcp-timeout-adjust",
                format_args!("{} rto={:.4}", this.local_tag(), new_rto),
            );

            let retries = this.data_retry_count.get() + 1;
            this.data_retry_count.set(retries);
            if retries >= DATA_RETRIES {
                this.data_retries_exhausted.set(true);
                this.log.record(
                    now,
                    "tcp-retries-exhausted",
                    format_args!("{} ack_i={}", this.local_tag(), out_ack_i),
                );
                this.ack_event.notify(out_ack_i as u64);
                return;
            }

            this.send_buf.borrow_mut().rewind_to_ack();
            this.cc.borrow_mut().on_timeout();
            this.log_cc_adjust();
            this.ack_event.notify(out_ack_i as u64);
        });
    }

    fn log_cc_adjust(&self) {
        let now = self.now();
        let cc = self.cc.borrow();
        self.log.record(
            now,
            "tcp-cwnd-adjust",
            format_args!("{} cwnd={}", self.local_tag(), cc.cwnd()),
        );
        self.log.record(
            now,
            "tcp-ssthresh-adjust",
            format_args!("{} ssthresh={}", self.local_tag(), cc.ssthresh()),
        );
    }

    /// Re-emit the segment starting at `ack_num` using whatever bytes remain in the send buffer
    /// from that offset (Reno's fast retransmit, spec.md §4.4.3).
    fn retransmit_from(self: &Rc<Self>, ack_num: usize) {
        let total_len = self.send_buf.borrow().len();
        if ack_num >= total_len {
            return;
        }
        let end = (ack_num + tcp::MSS as usize).min(total_len);
        let payload = self.send_buf.borrow().slice(ack_num, end);
        self.send_segment(TcpFlags::empty(), ack_num as u64, 0, payload);
        let out_i = self.send_buf.borrow().out_i();
        if end > out_i {
            self.send_buf.borrow_mut().advance_out_i(end);
            self.spawn_retransmission_guard(end);
        }
    }

    // ---- receiving ----------------------------------------------------------

    pub async fn recv(self: &Rc<Self>) -> Result<Bytes, RecvError> {
        loop {
            if self.recv_buf.borrow().has_readable() {
                return Ok(self.recv_buf.borrow_mut().take_readable());
            }
            if self.peer_fin_seen.get() {
                return Ok(Bytes::new());
            }
            match self.state.get() {
                State::Established | State::SynRcvd | State::FinWait1 | State::FinWait2 => {}
                State::CloseWait | State::TimeWait => {}
                _ => return Err(RecvError::NotConnected),
            }
            let _ = self.data_event.wait(None).await;
        }
    }

    /// Entry point called by `Host::receive` for every inbound segment addressed to this socket.
    pub fn on_segment(self: &Rc<Self>, seg: TcpSegment) {
        let has_syn = seg.flags.contains(TcpFlags::SYN);
        let has_fin = seg.flags.contains(TcpFlags::FIN);
        let has_ack = seg.flags.contains(TcpFlags::ACK);
        let has_payload = !seg.payload.is_empty();

        let now = self.now();
        self.log.record(
            now,
            "tcp-recv",
            format_args!(
                "{} {}",
                self.local_tag(),
                segment_log_token(&seg.flags, seg.seq_num, seg.ack_num, seg.payload.len())
            ),
        );

        if has_syn && has_ack {
            self.on_syn_ack(&seg);
            return;
        }

        if has_syn {
            self.on_syn(seg);
            return;
        }

        if has_fin {
            self.on_fin(&seg);
        }

        if has_payload {
            self.on_data(&seg);
        }

        if has_ack {
            self.on_ack(&seg);
        }
    }

    /// Client side of the handshake: a SYN+ACK wakes up whichever `connect()` attempt is blocked
    /// on `syn_ack_event` (spec.md §4.4.2). It carries no state transition of its own — `connect()`
    /// sends the final ACK and moves to ESTABLISHED once its wait resolves.
    fn on_syn_ack(self: &Rc<Self>, _seg: &TcpSegment) {
        self.syn_ack_event.notify(());
    }

    /// Server side of the handshake: mint a fresh child socket in SYN_RCVD, register it, and send
    /// SYN+ACK (spec.md §4.4.2). A SYN received again while already SYN_RCVD/ESTABLISHED just
    /// re-emits SYN+ACK without regressing state.
    fn on_syn(self: &Rc<Self>, seg: TcpSegment) {
        if self.state.get() != State::Listen {
            if matches!(self.state.get(), State::SynRcvd | State::Established) {
                self.send_segment(TcpFlags::SYN | TcpFlags::ACK, 0, 0, Bytes::new());
            }
            return;
        }

        let peer = (*seg.src.ip(), seg.src.port());
        if self
            .host
            .tcp_established_contains(&peer)
        {
            return;
        }

        let Some(local) = self.local.get() else { return };
        let child = TcpSocket::new(Rc::clone(&self.host), self.congestion_variant);
        child.local.set(Some(local));
        child.remote.set(Some(seg.src));
        child.set_state(State::SynRcvd);
        self.host.register_established_tcp(peer, Rc::clone(&child));

        child.send_segment(TcpFlags::SYN | TcpFlags::ACK, 0, 0, Bytes::new());

        self.accept_queue.borrow_mut().push_back(child);
        self.syn_event.notify(());
    }

    fn on_ack(self: &Rc<Self>, seg: &TcpSegment) {
        let sample = self.now() - seg.timestamp;
        if sample >= 0.0 {
            self.rto.set(tcp::update_rto(self.rto.get(), sample));
        }

        match self.state.get() {
            State::SynRcvd => {
                self.set_state(State::Established);
            }
            State::FinWait1 => {
                if self.our_fin_sent.get() {
                    self.set_state(if self.peer_fin_seen.get() {
                        State::TimeWait
                    } else {
                        State::FinWait2
                    });
                    if self.state.get() == State::TimeWait {
                        self.start_time_wait();
                    }
                }
            }
            State::Closing => {
                self.set_state(State::TimeWait);
                self.start_time_wait();
            }
            State::LastAck => {
                self.set_state(State::Closed);
                self.release();
            }
            _ => {}
        }

        let ack_num = seg.ack_num;
        let out_ack_i_before = self.send_buf.borrow().out_ack_i() as u64;
        if ack_num > out_ack_i_before {
            let new_bytes = self
                .send_buf
                .borrow_mut()
                .ack(ack_num as usize)
                .unwrap_or(0);
            if new_bytes > 0 {
                self.data_retry_count.set(0);
                self.cc.borrow_mut().on_new_ack(new_bytes);
                self.log_cc_adjust();
            }
        } else if ack_num == out_ack_i_before {
            let retransmit = self.cc.borrow_mut().on_dup_ack(ack_num);
            if retransmit {
                let now = self.now();
                self.log.record(
                    now,
                    "tcp-loss",
                    format_args!("{} triple-ack ack_num={}", self.local_tag(), ack_num),
                );
                self.log_cc_adjust();
                self.retransmit_from(ack_num as usize);
            }
        }

        self.ack_event.notify(ack_num);
    }

    fn on_data(self: &Rc<Self>, seg: &TcpSegment) {
        let added = self
            .recv_buf
            .borrow_mut()
            .insert(seg.seq_num as usize, seg.payload.clone());
        let inc_i = self.recv_buf.borrow().inc_i();
        self.send_segment(TcpFlags::ACK, 0, inc_i as u64, Bytes::new());
        if added > 0 {
            self.data_event.notify(());
        }
    }

    fn on_fin(self: &Rc<Self>, seg: &TcpSegment) {
        self.peer_fin_seen.set(true);
        self.send_segment(TcpFlags::ACK, 0, seg.seq_num + 1, Bytes::new());
        self.data_event.notify(());

        match self.state.get() {
            State::Established | State::SynRcvd => {
                self.set_state(State::CloseWait);
            }
            State::FinWait1 => {
                self.set_state(State::Closing);
            }
            State::FinWait2 => {
                self.set_state(State::TimeWait);
                self.start_time_wait();
            }
            _ => {}
        }
        self.fin_event.notify(());
    }

    // ---- teardown ----------------------------------------------------------

    /// spec.md §4.4.4: active close drains the send buffer, then FIN/ACK/TIME_WAIT; passive close
    /// (peer FIN already seen, state CLOSE_WAIT) sends our own FIN and waits for the final ACK.
    pub async fn close(self: &Rc<Self>) -> Result<(), CloseError> {
        match self.state.get() {
            State::CloseWait => return self.close_passive().await,
            State::Established | State::SynRcvd => {}
            State::Closed => return Ok(()),
            _ => return Ok(()),
        }

        while self.send_buf.borrow().out_ack_i() < self.send_buf.borrow().len() {
            if self.data_retries_exhausted.get() {
                return Err(CloseError::RetriesExhausted);
            }
            let _ = self.ack_event.wait(None).await;
        }

        self.set_state(State::FinWait1);
        let fin_seq = self.send_buf.borrow().len() as u64;

        let this = Rc::clone(self);
        let result = scheduler::attempt(
            move || {
                let this = Rc::clone(&this);
                async move {
                    this.send_segment(TcpFlags::FIN, fin_seq, 0, Bytes::new());
                    this.our_fin_sent.set(true);
                    this.fin_event.wait(Some(this.rto.get())).await
                }
            },
            HANDSHAKE_RETRIES,
        )
        .await;

        if result.is_err() {
            return Err(CloseError::RetriesExhausted);
        }

        // the FIN-ack race is resolved inside on_ack/on_fin, which move us onward to CLOSING,
        // FIN_WAIT_2, or straight to TIME_WAIT; just wait for CLOSED here.
        while self.state.get() != State::Closed {
            if self.state.get() == State::TimeWait {
                break;
            }
            let _ = self.fin_event.wait(Some(self.rto.get() * 4.0)).await;
        }
        Ok(())
    }

    async fn close_passive(self: &Rc<Self>) -> Result<(), CloseError> {
        let fin_seq = self.send_buf.borrow().len() as u64;
        self.send_segment(TcpFlags::FIN, fin_seq, 0, Bytes::new());
        self.our_fin_sent.set(true);
        self.set_state(State::LastAck);

        let this = Rc::clone(self);
        let result = scheduler::attempt(
            move || {
                let this = Rc::clone(&this);
                async move { this.ack_event.wait(Some(this.rto.get())).await.map(|_| ()) }
            },
            HANDSHAKE_RETRIES,
        )
        .await;

        if result.is_err() {
            return Err(CloseError::RetriesExhausted);
        }
        Ok(())
    }

    fn start_time_wait(self: &Rc<Self>) {
        let this = Rc::clone(self);
        let wait = 3.0 * self.rto.get();
        self.scheduler.schedule(wait, 0, move || {
            this.set_state(State::Closed);
            this.release();
        });
    }

    fn release(&self) {
        if let Some(local) = self.local.get() {
            if let Some(remote) = self.remote.get() {
                self.host
                    .unregister_established_tcp(&(*remote.ip(), remote.port()));
            } else {
                self.host.release_tcp_port(local.port());
            }
        }
    }
}

fn segment_log_token(flags: &TcpFlags, seq_num: u64, ack_num: u64, payload_len: usize) -> String {
    let kind = flags.kind_token(payload_len > 0);
    if payload_len > 0 {
        format!("{kind} {}-{}", seq_num, seq_num + payload_len as u64)
    } else if flags.contains(TcpFlags::ACK) {
        format!("{kind} ack_num={ack_num}")
    } else {
        kind
    }
}
