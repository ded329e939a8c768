//! End-to-end scenario tests matching the simulator's seed suite: handshake, a small payload
//! round trip, graceful teardown, an RTO-driven retransmit under total forward loss, and a
//! Reno triple-duplicate-ACK fast retransmit. Modeled on `shadow-shadow/src/lib/tcp/src/tests/`'s
//! split (state-transition tests, send/recv tests) but run against this workspace's *actual*
//! scheduler and link model rather than a fake-clock test harness, the way
//! `shadow-shadow/src/test/socket/*` drives real sockets end-to-end instead of unit-testing one
//! layer at a time.

use std::cell::{Cell, RefCell};
use std::io::Write;
use std::net::Ipv4Addr;
use std::rc::Rc;

use netsim::tcp_socket::{CongestionVariant, State};
use netsim::Network;
use scheduler::Scheduler;
use simlog::eventlog::EventLog;
use topology::Topology;

/// A `Write` sink over a shared buffer, so a test can capture the stable event log and inspect it
/// after `scheduler.run()` completes.
#[derive(Clone)]
struct Sink(Rc<RefCell<Vec<u8>>>);

impl Write for Sink {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.borrow_mut().write(buf)
    }
    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

fn ip(s: &str) -> Ipv4Addr {
    s.parse().unwrap()
}

fn captured_log() -> (Rc<EventLog>, Rc<RefCell<Vec<u8>>>) {
    let buf = Rc::new(RefCell::new(Vec::new()));
    let log = Rc::new(EventLog::to_writer(Sink(Rc::clone(&buf))));
    (log, buf)
}

fn log_text(buf: &Rc<RefCell<Vec<u8>>>) -> String {
    String::from_utf8(buf.borrow().clone()).unwrap()
}

/// Count lines of the stable event-log format `"<time> <event> <args...>"` whose event name is
/// exactly `event`.
fn count_events(text: &str, event: &str) -> usize {
    text.lines()
        .filter(|line| line.split_whitespace().nth(1) == Some(event))
        .count()
}

fn contains_loss_kind(text: &str, kind: &str) -> bool {
    text.lines()
        .any(|line| line.contains("tcp-loss") && line.contains(kind))
}

/// The ordered list of `tcp-state` values logged for the socket tagged `local_ip:port`.
fn states_for(text: &str, tag: &str) -> Vec<String> {
    text.lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let _time = fields.next()?;
            let event = fields.next()?;
            if event != "tcp-state" {
                return None;
            }
            let this_tag = fields.next()?;
            if this_tag != tag {
                return None;
            }
            fields.next().map(ToString::to_string)
        })
        .collect()
}

/// Whether `needle` appears, in order, as a (not-necessarily-contiguous) subsequence of
/// `haystack` — used to check a state machine passed through an expected sequence of states
/// without demanding that no other transition happened in between.
fn is_subsequence(needle: &[&str], haystack: &[String]) -> bool {
    let mut it = haystack.iter();
    needle.iter().all(|want| it.any(|got| got == want))
}

/// S1: two hosts, duplex link, loss=0. `connect`/`accept` should both reach ESTABLISHED after
/// exactly three packets (SYN, SYN+ACK, ACK) cross the wire.
#[test]
fn s1_handshake_with_no_loss() {
    let client_ip = ip("123.0.0.0");
    let server_ip = ip("101.0.0.0");
    let topo = Topology::new()
        .host(client_ip)
        .host(server_ip)
        .duplex_link(client_ip, server_ip, 0.5, 100_000.0);

    let scheduler = Scheduler::new();
    let (log, buf) = captured_log();
    let net = Network::build(&topo, scheduler.clone(), log);

    let client = net.tcp_socket(client_ip).unwrap();
    let server = net.tcp_socket(server_ip).unwrap();
    server.bind(server_ip, 80).unwrap();
    server.listen().unwrap();

    let client_state = Rc::new(Cell::new(None));
    let server_state = Rc::new(Cell::new(None));

    {
        let client = Rc::clone(&client);
        let client_state = Rc::clone(&client_state);
        scheduler.spawn(async move {
            client.connect(server_ip, 80).await.unwrap();
            client_state.set(Some(client.state()));
        });
    }
    {
        let server = Rc::clone(&server);
        let server_state = Rc::clone(&server_state);
        let scheduler = scheduler.clone();
        scheduler.spawn(async move {
            let accepted = server.accept().await.unwrap();
            // `accept()` resolves as soon as the SYN arrives, before the handshake's closing ACK
            // has had time to cross the link; give it a couple of round trips to land.
            scheduler.sleep(3.0).await;
            server_state.set(Some(accepted.state()));
        });
    }

    scheduler.run();

    assert_eq!(client_state.get(), Some(State::Established));
    assert_eq!(server_state.get(), Some(State::Established));

    let text = log_text(&buf);
    assert_eq!(count_events(&text, "tcp-send"), 3);
}

/// S2: after a handshake, a small payload sent with `sendall` arrives at the peer's `recv()`
/// concatenated back to the original bytes, and `out_ack_i` reaches the full length on the
/// sender.
#[test]
fn s2_small_payload_round_trip() {
    let client_ip = ip("123.0.0.0");
    let server_ip = ip("101.0.0.0");
    let topo = Topology::new()
        .host(client_ip)
        .host(server_ip)
        .duplex_link(client_ip, server_ip, 0.01, 1_000_000.0);

    let scheduler = Scheduler::new();
    let (log, _buf) = captured_log();
    let net = Network::build(&topo, scheduler.clone(), log);

    let client = net.tcp_socket(client_ip).unwrap();
    let server = net.tcp_socket(server_ip).unwrap();
    server.bind(server_ip, 80).unwrap();
    server.listen().unwrap();

    let out_ack = Rc::new(Cell::new(0usize));
    let received = Rc::new(RefCell::new(Vec::new()));

    {
        let client = Rc::clone(&client);
        let out_ack = Rc::clone(&out_ack);
        scheduler.spawn(async move {
            client.connect(server_ip, 80).await.unwrap();
            client.sendall(b"time\n").await.unwrap();
            out_ack.set(client.out_ack_i());
            assert!(client.out_ack_i() <= client.out_i());
        });
    }
    {
        let server = Rc::clone(&server);
        let received = Rc::clone(&received);
        scheduler.spawn(async move {
            let accepted = server.accept().await.unwrap();
            while received.borrow().len() < 5 {
                let chunk = accepted.recv().await.unwrap();
                received.borrow_mut().extend_from_slice(&chunk);
                assert!(accepted.inc_read_i() <= accepted.inc_i());
            }
        });
    }

    scheduler.run();

    assert_eq!(&received.borrow()[..], b"time\n");
    assert_eq!(out_ack.get(), 5);
}

/// S3: after S2, an active close on the client and a passive close on the server both reach
/// CLOSED, passing through the state sequences spec.md §4.4.5 names.
#[test]
fn s3_graceful_close_both_sides_reach_closed() {
    let client_ip = ip("123.0.0.0");
    let server_ip = ip("101.0.0.0");
    let topo = Topology::new()
        .host(client_ip)
        .host(server_ip)
        .duplex_link(client_ip, server_ip, 0.01, 1_000_000.0);

    let scheduler = Scheduler::new();
    let (log, buf) = captured_log();
    let net = Network::build(&topo, scheduler.clone(), log);

    let client = net.tcp_socket(client_ip).unwrap();
    let server = net.tcp_socket(server_ip).unwrap();
    server.bind(server_ip, 80).unwrap();
    server.listen().unwrap();

    let client_tag = Rc::new(RefCell::new(String::new()));
    let server_tag = Rc::new(RefCell::new(String::new()));
    let client_closed = Rc::new(Cell::new(false));
    let server_closed = Rc::new(Cell::new(false));

    {
        let client = Rc::clone(&client);
        let client_tag = Rc::clone(&client_tag);
        let client_closed = Rc::clone(&client_closed);
        scheduler.spawn(async move {
            client.connect(server_ip, 80).await.unwrap();
            client.sendall(b"time\n").await.unwrap();
            let addr = client.local_addr().unwrap();
            *client_tag.borrow_mut() = format!("{}:{}", addr.ip(), addr.port());
            client.close().await.unwrap();
            client_closed.set(true);
        });
    }
    {
        let server = Rc::clone(&server);
        let server_tag = Rc::clone(&server_tag);
        let server_closed = Rc::clone(&server_closed);
        scheduler.spawn(async move {
            let accepted = server.accept().await.unwrap();
            let addr = accepted.local_addr().unwrap();
            *server_tag.borrow_mut() = format!("{}:{}", addr.ip(), addr.port());
            loop {
                let chunk = accepted.recv().await.unwrap();
                if chunk.is_empty() {
                    break;
                }
            }
            accepted.close().await.unwrap();
            server_closed.set(true);
        });
    }

    scheduler.run();

    assert!(client_closed.get());
    assert!(server_closed.get());

    let text = log_text(&buf);
    let client_states = states_for(&text, &client_tag.borrow());
    assert!(
        is_subsequence(
            &["ESTABLISHED", "FIN_WAIT_1", "FIN_WAIT_2", "TIME_WAIT", "CLOSED"],
            &client_states
        ),
        "client states were {client_states:?}"
    );

    let server_states = states_for(&text, &server_tag.borrow());
    assert!(
        is_subsequence(
            &["ESTABLISHED", "CLOSE_WAIT", "LAST_ACK", "CLOSED"],
            &server_states
        ),
        "server states were {server_states:?}"
    );
}

/// S4: total forward loss forces a run of RTO-driven timeout losses (Tahoe collapses `cwnd` to
/// MSS and halves `ssthresh` each time); once loss is lifted, the outstanding bytes still arrive.
#[test]
fn s4_tahoe_rto_retransmit_then_recovers() {
    let client_ip = ip("123.0.0.0");
    let server_ip = ip("101.0.0.0");
    let topo = Topology::new()
        .host(client_ip)
        .host(server_ip)
        .duplex_link(client_ip, server_ip, 0.01, 1_000_000.0);

    let scheduler = Scheduler::new();
    let (log, buf) = captured_log();
    let net = Network::build_with_congestion(&topo, scheduler.clone(), log, CongestionVariant::Tahoe);

    let client = net.tcp_socket(client_ip).unwrap();
    let server = net.tcp_socket(server_ip).unwrap();
    server.bind(server_ip, 80).unwrap();
    server.listen().unwrap();

    let forward = net.link(client_ip, server_ip).unwrap();
    let payload = vec![b'x'; 3000];

    let sendall_ok = Rc::new(Cell::new(false));
    let received_len = Rc::new(Cell::new(0usize));

    {
        let client = Rc::clone(&client);
        let forward = Rc::clone(&forward);
        let sendall_ok = Rc::clone(&sendall_ok);
        let payload = payload.clone();
        scheduler.spawn(async move {
            client.connect(server_ip, 80).await.unwrap();
            forward.set_loss(1.0);
            client.sendall(&payload).await.unwrap();
            sendall_ok.set(true);
        });
    }
    {
        let server = Rc::clone(&server);
        let received_len = Rc::clone(&received_len);
        scheduler.spawn(async move {
            let accepted = server.accept().await.unwrap();
            while received_len.get() < 3000 {
                let chunk = accepted.recv().await.unwrap();
                received_len.set(received_len.get() + chunk.len());
            }
        });
    }
    {
        // Lift the forward loss well after the first few RTOs have had a chance to fire and
        // collapse the window, but well within the per-segment retry budget.
        let forward = Rc::clone(&forward);
        let scheduler_for_sleep = scheduler.clone();
        scheduler.spawn(async move {
            scheduler_for_sleep.sleep(10.0).await;
            forward.set_loss(0.0);
        });
    }

    scheduler.run();

    assert!(sendall_ok.get());
    assert_eq!(received_len.get(), 3000);
    assert!(client.cwnd() >= tcp::MSS);
    assert!(client.ssthresh() >= tcp::MSS);

    let text = log_text(&buf);
    assert!(contains_loss_kind(&text, "timeout"), "log was:\n{text}");
}

/// S5 (Reno): the forward link drops a single data segment once cwnd has grown past one segment;
/// the receiver's resulting duplicate ACKs drive a triple-dup-ACK fast retransmit, and the data
/// still arrives intact.
#[test]
fn s5_reno_triple_dup_ack_fast_retransmit() {
    let client_ip = ip("123.0.0.0");
    let server_ip = ip("101.0.0.0");
    let topo = Topology::new()
        .host(client_ip)
        .host(server_ip)
        .link_with(client_ip, server_ip, 0.02, 2_000_000.0, 0.0, 500)
        .link_with(server_ip, client_ip, 0.02, 2_000_000.0, 0.0, 500);

    let scheduler = Scheduler::new();
    let (log, buf) = captured_log();
    let net = Network::build_with_congestion(&topo, scheduler.clone(), log, CongestionVariant::Reno);

    let client = net.tcp_socket(client_ip).unwrap();
    let server = net.tcp_socket(server_ip).unwrap();
    server.bind(server_ip, 80).unwrap();
    server.listen().unwrap();

    let forward = net.link(client_ip, server_ip).unwrap();
    let payload = vec![b'y'; 300_000];

    let sendall_ok = Rc::new(Cell::new(false));
    let received_len = Rc::new(Cell::new(0usize));

    {
        let client = Rc::clone(&client);
        let sendall_ok = Rc::clone(&sendall_ok);
        let payload = payload.clone();
        scheduler.spawn(async move {
            client.connect(server_ip, 80).await.unwrap();
            client.sendall(&payload).await.unwrap();
            sendall_ok.set(true);
        });
    }
    {
        let server = Rc::clone(&server);
        let received_len = Rc::clone(&received_len);
        let total = payload.len();
        scheduler.spawn(async move {
            let accepted = server.accept().await.unwrap();
            while received_len.get() < total {
                let chunk = accepted.recv().await.unwrap();
                received_len.set(received_len.get() + chunk.len());
            }
        });
    }
    {
        // By half a second in, slow start has pushed cwnd well past one segment; force-drop the
        // very next data packet so several already-in-flight segments behind it arrive out of
        // order and generate duplicate ACKs.
        let forward = Rc::clone(&forward);
        let scheduler_for_sleep = scheduler.clone();
        scheduler.spawn(async move {
            scheduler_for_sleep.sleep(0.5).await;
            forward.force_drop_nth_enqueue(1);
        });
    }

    scheduler.run();

    assert!(sendall_ok.get());
    assert_eq!(received_len.get(), payload.len());

    let text = log_text(&buf);
    assert!(contains_loss_kind(&text, "triple-ack"), "log was:\n{text}");
}

/// S6: a link configured with `max_queue = 4`, saturated synchronously with five enqueues, drops
/// the fifth with a `queue-overflow` trace and never exceeds the configured depth.
#[test]
fn s6_queue_overflow_caps_at_max_queue() {
    let src_ip = ip("1.0.0.0");
    let dst_ip = ip("2.0.0.0");
    let topo = Topology::new()
        .host(src_ip)
        .host(dst_ip)
        .link_with(src_ip, dst_ip, 1000.0, 1.0, 0.0, 4);

    let scheduler = Scheduler::new();
    let (log, buf) = captured_log();
    let net = Network::build(&topo, scheduler.clone(), log);
    let link = net.link(src_ip, dst_ip).unwrap();

    for i in 0..5u64 {
        let packet = netsim::packet::Packet {
            id: i,
            src_ip,
            dst_ip,
            payload: netsim::packet::Payload::Udp(netsim::udp::UdpDatagram {
                src_port: 1,
                dst_port: 2,
                payload: bytes::Bytes::from_static(b"x"),
            }),
        };
        link.enqueue(packet);
    }

    assert_eq!(link.queue_len(), 4);

    let text = log_text(&buf);
    assert_eq!(count_events(&text, "queue-overflow"), 1);
}

/// Forward link never recovers: every RTO for the same in-flight range eventually exhausts the
/// per-segment retry budget, and `sendall` surfaces that as a terminal failure rather than
/// retrying forever (spec.md §4.4.6).
#[test]
fn s7_permanent_loss_exhausts_data_retries() {
    let client_ip = ip("123.0.0.1");
    let server_ip = ip("101.0.0.1");
    let topo = Topology::new()
        .host(client_ip)
        .host(server_ip)
        .duplex_link(client_ip, server_ip, 0.01, 1_000_000.0);

    let scheduler = Scheduler::new();
    let (log, buf) = captured_log();
    let net = Network::build_with_congestion(&topo, scheduler.clone(), log, CongestionVariant::Tahoe);

    let client = net.tcp_socket(client_ip).unwrap();
    let server = net.tcp_socket(server_ip).unwrap();
    server.bind(server_ip, 80).unwrap();
    server.listen().unwrap();

    let forward = net.link(client_ip, server_ip).unwrap();
    let payload = vec![b'x'; 500];

    let outcome = Rc::new(RefCell::new(None));

    {
        let client = Rc::clone(&client);
        let forward = Rc::clone(&forward);
        let outcome = Rc::clone(&outcome);
        scheduler.spawn(async move {
            client.connect(server_ip, 80).await.unwrap();
            forward.set_loss(1.0);
            let result = client.sendall(&payload).await;
            outcome.borrow_mut().replace(result);
        });
    }
    {
        let server = Rc::clone(&server);
        scheduler.spawn(async move {
            let _ = server.accept().await;
        });
    }

    scheduler.run();

    assert_eq!(
        *outcome.borrow(),
        Some(Err(netsim::tcp_socket::SendError::RetriesExhausted))
    );

    let text = log_text(&buf);
    assert_eq!(
        count_events(&text, "tcp-retries-exhausted"),
        1,
        "log was:\n{text}"
    );
}
