//! End-to-end tests driving a server and clients over localhost TCP.

use bgpwatch::error::RetCode;
use bgpwatch::msg::transport::{recv_message, send_message};
use bgpwatch::msg::{
    envelope_type, frame_str, frame_u32, frame_u8, DataMsgType, FrameReader, Message, MsgType,
    Reply, TableBegin, TableEnd, TableType,
};
use bgpwatch::server::{FullFeedConfig, Server, ServerConfig, ServerEvents, ServerHandle};
use bgpwatch::{
    Client, ClientConfig, Family, PeerState, Prefix, RecvMode, View, ViewInterests,
};
use std::net::{SocketAddr, TcpStream};
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

#[derive(Default)]
struct Counters {
    connects: AtomicUsize,
    disconnects: AtomicUsize,
}

struct TestEvents(Arc<Counters>);

impl ServerEvents for TestEvents {
    fn client_connect(&mut self, _client: &str) {
        self.0.connects.fetch_add(1, Ordering::SeqCst);
    }

    fn client_disconnect(&mut self, _client: &str) {
        self.0.disconnects.fetch_add(1, Ordering::SeqCst);
    }
}

struct TestServer {
    addr: SocketAddr,
    handle: ServerHandle,
    thread: Option<JoinHandle<()>>,
    counters: Arc<Counters>,
}

impl TestServer {
    fn start(heartbeat: Duration, liveness: u32, fullfeed: FullFeedConfig) -> TestServer {
        let counters = Arc::new(Counters::default());
        let cfg = ServerConfig {
            client_uri: "127.0.0.1:0".to_string(),
            heartbeat_interval: heartbeat,
            heartbeat_liveness: liveness,
            fullfeed,
        };
        let mut server =
            Server::bind(cfg, Box::new(TestEvents(Arc::clone(&counters)))).unwrap();
        let addr = server.local_addr().unwrap();
        let handle = server.handle();
        let thread = std::thread::spawn(move || {
            let _ = server.serve();
        });
        TestServer {
            addr,
            handle,
            thread: Some(thread),
            counters,
        }
    }

    fn client_cfg(&self, identity: &str, interests: ViewInterests) -> ClientConfig {
        ClientConfig {
            server_uri: self.addr.to_string(),
            identity: identity.to_string(),
            interests,
            heartbeat_interval: Duration::from_millis(100),
            request_timeout: Duration::from_secs(2),
            ..ClientConfig::default()
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.stop();
        if let Some(t) = self.thread.take() {
            let _ = t.join();
        }
    }
}

/// Polls for a view with a deadline so a failure cannot hang the test run.
fn recv_view_within(
    client: &mut Client,
    view: &mut View,
    deadline: Duration,
) -> Option<ViewInterests> {
    let end = Instant::now() + deadline;
    while Instant::now() < end {
        match client.recv_view(RecvMode::NonBlock, view).unwrap() {
            Some(interests) => return Some(interests),
            None => std::thread::sleep(Duration::from_millis(20)),
        }
    }
    None
}

fn send_table(client: &mut Client, time: u32, collector: &str, pfx_count: u32) {
    client.pfx_table_begin(time, collector, 1).unwrap();
    let peer = client
        .pfx_table_add_peer("10.0.0.1".parse().unwrap(), PeerState::Established, 1)
        .unwrap();
    for i in 0..pfx_count {
        let pfx = Prefix::from_str(&format!("10.{}.{}.0/24", i >> 8, i & 0xff)).unwrap();
        client.pfx_table_add(peer, &pfx, 64500 + i).unwrap();
    }
    client.pfx_table_end().unwrap();
}

#[test]
fn test_single_peer_single_prefix_view() {
    let server = TestServer::start(
        Duration::from_millis(200),
        3,
        FullFeedConfig::default(),
    );

    let mut consumer = Client::new(server.client_cfg("consumer-1", ViewInterests::all()));
    consumer.start().unwrap();
    // let the server register the consumer's interests
    std::thread::sleep(Duration::from_millis(100));

    let mut producer = Client::new(server.client_cfg("producer-1", ViewInterests::empty()));
    producer.start().unwrap();

    producer.pfx_table_begin(100, "C", 1).unwrap();
    let peer = producer
        .pfx_table_add_peer("10.0.0.1".parse().unwrap(), PeerState::Established, 1)
        .unwrap();
    producer
        .pfx_table_add(peer, &Prefix::from_str("192.0.2.0/24").unwrap(), 65001)
        .unwrap();
    producer.pfx_table_end().unwrap();

    let mut view: View = View::new();
    let interests = recv_view_within(&mut consumer, &mut view, Duration::from_secs(5))
        .expect("no view received");

    // one peer with one prefix is far below full-feed thresholds
    assert_eq!(interests, ViewInterests::PARTIAL);
    assert_eq!(view.time(), 100);
    assert_eq!(view.collector(), "C");
    assert_eq!(view.peer_count(), 1);
    assert_eq!(view.pfx_count(Family::Ipv4), 1);

    let peer_id = view.peer_ids().next().unwrap();
    let info = view.peer_info(peer_id).unwrap();
    assert_eq!(info.state, PeerState::Established);
    assert_eq!(info.v4_pfx_cnt, 1);
    let sig = view.peer_sig(peer_id).unwrap();
    assert_eq!(sig.collector, "C");
    assert_eq!(sig.peer_ip, "10.0.0.1".parse::<std::net::IpAddr>().unwrap());

    let entry = view
        .pfx_entry(&Prefix::from_str("192.0.2.0/24").unwrap())
        .unwrap();
    assert_eq!(entry.peer_count(), 1);
    assert_eq!(entry.get(peer_id).unwrap().orig_asn, 65001);

    producer.stop();
    consumer.stop();
}

#[test]
fn test_heartbeat_liveness_expiry() {
    let server = TestServer::start(
        Duration::from_millis(100),
        3,
        FullFeedConfig::default(),
    );

    // hand-rolled client that sends READY and then goes silent
    let mut stream = TcpStream::connect(server.addr).unwrap();
    let mut ready = Message::new();
    ready.push(frame_str("silent-client"));
    ready.push(frame_u8(MsgType::Ready.into()));
    ready.push(frame_u8(0));
    send_message(&mut stream, &ready).unwrap();

    let deadline = Instant::now() + Duration::from_secs(3);
    while Instant::now() < deadline {
        if server.counters.disconnects.load(Ordering::SeqCst) > 0 {
            break;
        }
        std::thread::sleep(Duration::from_millis(20));
    }

    assert_eq!(server.counters.connects.load(Ordering::SeqCst), 1);
    assert_eq!(
        server.counters.disconnects.load(Ordering::SeqCst),
        1,
        "client_disconnect must fire exactly once"
    );

    // well past another liveness window, still exactly one disconnect
    std::thread::sleep(Duration::from_millis(500));
    assert_eq!(server.counters.disconnects.load(Ordering::SeqCst), 1);
}

#[test]
fn test_interest_filtering() {
    // tiny thresholds so two prefixes from one peer make a full feed
    let fullfeed = FullFeedConfig {
        v4_fullfeed_size: 2,
        v6_fullfeed_size: 2,
        peer_count_threshold: 1,
        mask_len_threshold: 6,
    };
    let server = TestServer::start(Duration::from_millis(200), 3, fullfeed);

    let mut partial_consumer =
        Client::new(server.client_cfg("consumer-partial", ViewInterests::PARTIAL));
    partial_consumer.start().unwrap();
    let mut full_consumer = Client::new(server.client_cfg(
        "consumer-full",
        ViewInterests::FIRST_FULL | ViewInterests::FULL,
    ));
    full_consumer.start().unwrap();
    std::thread::sleep(Duration::from_millis(100));

    let mut producer = Client::new(server.client_cfg("producer-ff", ViewInterests::empty()));
    producer.start().unwrap();

    send_table(&mut producer, 100, "C", 2); // full feed, first
    send_table(&mut producer, 400, "C", 2); // full feed, subsequent
    send_table(&mut producer, 700, "C", 1); // partial

    let mut view: View = View::new();

    let first = recv_view_within(&mut full_consumer, &mut view, Duration::from_secs(5))
        .expect("full consumer missed the first full view");
    assert_eq!(first, ViewInterests::FIRST_FULL);
    assert_eq!(view.time(), 100);

    let second = recv_view_within(&mut full_consumer, &mut view, Duration::from_secs(5))
        .expect("full consumer missed the subsequent full view");
    assert_eq!(second, ViewInterests::FULL);
    assert_eq!(view.time(), 400);

    let partial = recv_view_within(&mut partial_consumer, &mut view, Duration::from_secs(5))
        .expect("partial consumer missed the partial view");
    assert_eq!(partial, ViewInterests::PARTIAL);
    assert_eq!(view.time(), 700);
    assert_eq!(view.pfx_count(Family::Ipv4), 1);

    // neither consumer may see views outside its subscription
    assert!(recv_view_within(&mut full_consumer, &mut view, Duration::from_millis(500)).is_none());
    assert!(
        recv_view_within(&mut partial_consumer, &mut view, Duration::from_millis(500)).is_none()
    );

    producer.stop();
    partial_consumer.stop();
    full_consumer.stop();
}

#[test]
fn test_term_fires_disconnect() {
    let server = TestServer::start(
        Duration::from_millis(200),
        5,
        FullFeedConfig::default(),
    );

    let mut producer = Client::new(server.client_cfg("producer-term", ViewInterests::empty()));
    producer.start().unwrap();
    send_table(&mut producer, 100, "C", 1);
    producer.stop();

    let deadline = Instant::now() + Duration::from_secs(3);
    while Instant::now() < deadline {
        if server.counters.disconnects.load(Ordering::SeqCst) > 0 {
            break;
        }
        std::thread::sleep(Duration::from_millis(20));
    }
    assert_eq!(server.counters.disconnects.load(Ordering::SeqCst), 1);
}

#[test]
fn test_table_time_mismatch_rejected() {
    let server = TestServer::start(
        Duration::from_millis(500),
        5,
        FullFeedConfig::default(),
    );

    // hand-rolled producer so we can forge a mismatched table end
    let mut stream = TcpStream::connect(server.addr).unwrap();
    let identity = frame_str("producer-bad");

    let mut ready = Message::new();
    ready.push(identity.clone());
    ready.push(frame_u8(MsgType::Ready.into()));
    ready.push(frame_u8(0));
    send_message(&mut stream, &ready).unwrap();

    let mut begin = Message::new();
    begin.push(identity.clone());
    begin.push(frame_u8(MsgType::Data.into()));
    begin.push(frame_u32(1)); // seq
    begin.push(frame_u8(DataMsgType::TableBegin.into()));
    TableBegin {
        table: TableType::Prefix,
        time: 100,
        collector: "C".to_string(),
        peer_cnt: 0,
    }
    .append(&mut begin);
    send_message(&mut stream, &begin).unwrap();
    assert_eq!(read_reply(&mut stream), (1, 0));

    let mut end = Message::new();
    end.push(identity);
    end.push(frame_u8(MsgType::Data.into()));
    end.push(frame_u32(2)); // seq
    end.push(frame_u8(DataMsgType::TableEnd.into()));
    TableEnd {
        table: TableType::Prefix,
        time: 999, // does not echo the begin time
    }
    .append(&mut end);
    send_message(&mut stream, &end).unwrap();

    let (seq, rc) = read_reply(&mut stream);
    assert_eq!(seq, 2);
    assert_eq!(rc, u8::from(RetCode::Protocol));
}

/// Reads frames off the stream until a REPLY arrives, skipping heartbeats.
fn read_reply(stream: &mut TcpStream) -> (u32, u8) {
    loop {
        let msg = recv_message(stream).unwrap();
        let mut reader = FrameReader::new(&msg);
        if envelope_type(&mut reader).unwrap() == MsgType::Reply {
            let reply = Reply::parse(&mut reader).unwrap();
            return (reply.seq, reply.rc);
        }
    }
}
