/*!
Foreground client API: a producer half that builds and ships prefix tables,
and a consumer half that blocks on view arrivals filtered by interest.

Both halves share one background broker task (an OS thread) that owns the
transport endpoint; all communication with it flows through a typed pipe,
so no mutable state is shared across that boundary.
*/
mod broker;

use crate::error::{reply_error, WatcherError};
use crate::models::{PeerId, PeerState, Prefix};
use crate::msg::{
    envelope_type, frame_u32, frame_u8, interests_from_byte, DataMsgType, FrameReader, Message,
    MsgType, PeerRecord, PfxRecord, Reply, TableBegin, TableEnd, TableType, ViewInterests,
};
use crate::server::{CLIENT_URI_DEFAULT, HEARTBEAT_INTERVAL_DEFAULT, HEARTBEAT_LIVENESS_DEFAULT};
use crate::view::{io::deserialize_view, View};
use broker::{Broker, BrokerConfig, FromBroker, ToBroker};
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender, TryRecvError};
use log::{debug, warn};
use std::collections::VecDeque;
use std::net::IpAddr;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Default floor of the reconnect backoff.
pub const RECONNECT_INTERVAL_MIN_DEFAULT: Duration = Duration::from_millis(1000);
/// Default ceiling of the reconnect backoff.
pub const RECONNECT_INTERVAL_MAX_DEFAULT: Duration = Duration::from_millis(32_000);
/// Default wait for one request's reply before resending.
pub const REQUEST_TIMEOUT_DEFAULT: Duration = Duration::from_millis(2500);
/// Default number of resends before a request surfaces `Timeout`.
pub const REQUEST_RETRIES_DEFAULT: u32 = 3;
/// Default bound on waiting for the broker to wind down on `stop`.
pub const SHUTDOWN_LINGER_DEFAULT: Duration = Duration::from_secs(600);

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub server_uri: String,
    /// Stable identity presented to the server; reconnects under the same
    /// identity resume the same server-side slot.
    pub identity: String,
    /// View classes this client wants delivered (empty for pure producers).
    pub interests: ViewInterests,
    pub heartbeat_interval: Duration,
    pub heartbeat_liveness: u32,
    pub reconnect_interval_min: Duration,
    pub reconnect_interval_max: Duration,
    pub request_timeout: Duration,
    pub request_retries: u32,
    pub shutdown_linger: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            server_uri: CLIENT_URI_DEFAULT.to_string(),
            identity: format!("client-{}", std::process::id()),
            interests: ViewInterests::empty(),
            heartbeat_interval: HEARTBEAT_INTERVAL_DEFAULT,
            heartbeat_liveness: HEARTBEAT_LIVENESS_DEFAULT,
            reconnect_interval_min: RECONNECT_INTERVAL_MIN_DEFAULT,
            reconnect_interval_max: RECONNECT_INTERVAL_MAX_DEFAULT,
            request_timeout: REQUEST_TIMEOUT_DEFAULT,
            request_retries: REQUEST_RETRIES_DEFAULT,
            shutdown_linger: SHUTDOWN_LINGER_DEFAULT,
        }
    }
}

/// Blocking behavior of [`Client::recv_view`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecvMode {
    Block,
    NonBlock,
}

struct ProducerTable {
    time: u32,
    collector: String,
    /// Announced peers; the local peer id is the 1-based index.
    peers: Vec<IpAddr>,
}

/// A watcher client; producer and consumer APIs share the broker task.
pub struct Client {
    cfg: ClientConfig,
    to_broker: Sender<ToBroker>,
    from_broker: Receiver<FromBroker>,
    broker: Option<JoinHandle<()>>,
    seq: u32,
    table: Option<ProducerTable>,
    pending_views: VecDeque<Message>,
    last_err: Option<WatcherError>,
}

impl Client {
    /// Creates the client without connecting; call [`Client::start`] next.
    pub fn new(cfg: ClientConfig) -> Client {
        let (to_broker, _unused_rx) = unbounded();
        let (_unused_tx, from_broker) = unbounded();
        Client {
            cfg,
            to_broker,
            from_broker,
            broker: None,
            seq: 0,
            table: None,
            pending_views: VecDeque::new(),
            last_err: None,
        }
    }

    /// Connects to the server, sends READY, and launches the broker task.
    pub fn start(&mut self) -> Result<(), WatcherError> {
        if self.broker.is_some() {
            return Err(WatcherError::Semantic("client already started".to_string()));
        }
        let broker_cfg = BrokerConfig {
            server_uri: self.cfg.server_uri.clone(),
            identity: self.cfg.identity.as_bytes().to_vec(),
            interests: self.cfg.interests,
            heartbeat_interval: self.cfg.heartbeat_interval,
            heartbeat_liveness: self.cfg.heartbeat_liveness,
            reconnect_interval_min: self.cfg.reconnect_interval_min,
            reconnect_interval_max: self.cfg.reconnect_interval_max,
        };
        let stream = broker::connect(&broker_cfg)?;

        let (to_broker, pipe_rx) = unbounded();
        let (pipe_tx, from_broker) = unbounded();
        let broker = Broker::new(broker_cfg, stream, pipe_rx, pipe_tx)?;
        self.to_broker = to_broker;
        self.from_broker = from_broker;
        self.broker = Some(std::thread::spawn(move || broker.run()));
        Ok(())
    }

    /// Signals the broker to shut down and waits up to `shutdown_linger`
    /// for it to wind down; afterwards outstanding replies are discarded.
    pub fn stop(&mut self) {
        let Some(handle) = self.broker.take() else {
            return;
        };
        let _ = self.to_broker.send(ToBroker::Term);
        let deadline = Instant::now() + self.cfg.shutdown_linger;
        while !handle.is_finished() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        if handle.is_finished() {
            let _ = handle.join();
        }
    }

    /// Returns and clears the last broker-side error (edge-triggered).
    pub fn take_err(&mut self) -> Option<WatcherError> {
        self.last_err.take()
    }

    /* ---------------- producer API ---------------- */

    /// Opens a prefix table for `(time, collector)` announcing `peer_cnt`
    /// upcoming peers.
    pub fn pfx_table_begin(
        &mut self,
        time: u32,
        collector: &str,
        peer_cnt: u16,
    ) -> Result<(), WatcherError> {
        if self.table.is_some() {
            return Err(WatcherError::Semantic("table already in progress".to_string()));
        }
        let begin = TableBegin {
            table: TableType::Prefix,
            time,
            collector: collector.to_string(),
            peer_cnt,
        };
        let mut payload = Message::new();
        begin.append(&mut payload);
        self.request(DataMsgType::TableBegin, payload)?;
        self.table = Some(ProducerTable {
            time,
            collector: collector.to_string(),
            peers: Vec::new(),
        });
        Ok(())
    }

    /// Announces a peer within the open table, returning its table-local id.
    pub fn pfx_table_add_peer(
        &mut self,
        peer_ip: IpAddr,
        state: PeerState,
        asn: u32,
    ) -> Result<PeerId, WatcherError> {
        if self.table.is_none() {
            return Err(WatcherError::Semantic("no table in progress".to_string()));
        }
        let rec = PeerRecord {
            peer_ip,
            state,
            asn,
        };
        let mut payload = Message::new();
        rec.append(&mut payload);
        self.request(DataMsgType::PeerRecord, payload)?;

        let table = match self.table.as_mut() {
            Some(t) => t,
            None => return Err(WatcherError::Semantic("no table in progress".to_string())),
        };
        table.peers.push(peer_ip);
        Ok(table.peers.len() as PeerId)
    }

    /// Adds one `(peer, prefix, origin)` observation to the open table.
    pub fn pfx_table_add(
        &mut self,
        peer_id: PeerId,
        prefix: &Prefix,
        orig_asn: u32,
    ) -> Result<(), WatcherError> {
        let (peer_ip, collector) = {
            let Some(table) = self.table.as_ref() else {
                return Err(WatcherError::Semantic("no table in progress".to_string()));
            };
            let Some(ip) = peer_id
                .checked_sub(1)
                .and_then(|i| table.peers.get(i as usize))
            else {
                return Err(WatcherError::Semantic(format!("unknown peer id {peer_id}")));
            };
            (*ip, table.collector.clone())
        };
        let rec = PfxRecord {
            prefix: *prefix,
            peer_ip,
            orig_asn,
            collector,
        };
        let mut payload = Message::new();
        rec.append(&mut payload);
        self.request(DataMsgType::PfxRecord, payload)
    }

    /// Closes the open table. Completion means the server acknowledged the
    /// end-of-table request.
    pub fn pfx_table_end(&mut self) -> Result<(), WatcherError> {
        let Some(table) = self.table.take() else {
            return Err(WatcherError::Semantic("no table in progress".to_string()));
        };
        let end = TableEnd {
            table: TableType::Prefix,
            time: table.time,
        };
        let mut payload = Message::new();
        end.append(&mut payload);
        self.request(DataMsgType::TableEnd, payload)
    }

    /* ---------------- consumer API ---------------- */

    /// Receives the next published view into `view`, returning the interest
    /// mask it was classified with. Non-blocking reads return `Ok(None)`
    /// when nothing is queued.
    pub fn recv_view<VU, PU, XU, CU>(
        &mut self,
        mode: RecvMode,
        view: &mut View<VU, PU, XU, CU>,
    ) -> Result<Option<ViewInterests>, WatcherError> {
        loop {
            let msg = match self.pending_views.pop_front() {
                Some(m) => m,
                None => match self.next_server_msg(mode)? {
                    Some(m) => m,
                    None => return Ok(None),
                },
            };

            let mut reader = FrameReader::new(&msg);
            match envelope_type(&mut reader)? {
                MsgType::Data => {
                    let interests = interests_from_byte(reader.pop_u8("interest mask")?)?;
                    deserialize_view(&mut reader, view)?;
                    return Ok(Some(interests));
                }
                other => {
                    // e.g. a stale reply from a timed-out request
                    debug!("consumer dropping {other:?} message");
                }
            }
        }
    }

    fn next_server_msg(&mut self, mode: RecvMode) -> Result<Option<Message>, WatcherError> {
        loop {
            let ev = match mode {
                RecvMode::NonBlock => match self.from_broker.try_recv() {
                    Ok(ev) => ev,
                    Err(TryRecvError::Empty) => return Ok(None),
                    Err(TryRecvError::Disconnected) => {
                        return Err(WatcherError::Interrupt);
                    }
                },
                RecvMode::Block => self
                    .from_broker
                    .recv()
                    .map_err(|_| WatcherError::Interrupt)?,
            };
            match ev {
                FromBroker::Server(msg) => return Ok(Some(msg)),
                FromBroker::Fault(e) => {
                    warn!("broker fault: {e}");
                    self.last_err = Some(e);
                }
            }
        }
    }

    /* ---------------- request machinery ---------------- */

    /// Sends one sequenced DATA request and waits for its acknowledgment,
    /// resending up to `request_retries` times.
    fn request(&mut self, subtype: DataMsgType, payload: Message) -> Result<(), WatcherError> {
        if self.broker.is_none() {
            return Err(WatcherError::Semantic("client not started".to_string()));
        }
        self.seq = self.seq.wrapping_add(1);
        let seq = self.seq;

        let mut msg = Message::with_capacity(payload.len() + 3);
        msg.push(frame_u8(MsgType::Data.into()));
        msg.push(frame_u32(seq));
        msg.push(frame_u8(subtype.into()));
        msg.extend(payload);

        for attempt in 0..=self.cfg.request_retries {
            if attempt > 0 {
                debug!("resending request seq {seq} (attempt {})", attempt + 1);
            }
            self.to_broker
                .send(ToBroker::Send(msg.clone()))
                .map_err(|_| WatcherError::Interrupt)?;

            if let Some(rc) = self.await_reply(seq)? {
                if rc == 0 {
                    return Ok(());
                }
                return Err(reply_error(rc));
            }
        }
        Err(WatcherError::Timeout)
    }

    /// Waits up to `request_timeout` for the reply echoing `seq`. Published
    /// views arriving meanwhile are queued for the consumer API; replies to
    /// other sequence numbers are stale and dropped.
    fn await_reply(&mut self, seq: u32) -> Result<Option<u8>, WatcherError> {
        let deadline = Instant::now() + self.cfg.request_timeout;
        loop {
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            let ev = match self.from_broker.recv_timeout(deadline - now) {
                Ok(ev) => ev,
                Err(RecvTimeoutError::Timeout) => return Ok(None),
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(WatcherError::Interrupt);
                }
            };
            match ev {
                FromBroker::Server(msg) => {
                    let mut reader = FrameReader::new(&msg);
                    match envelope_type(&mut reader) {
                        Ok(MsgType::Reply) => {
                            let reply = Reply::parse(&mut reader)?;
                            if reply.seq == seq {
                                return Ok(Some(reply.rc));
                            }
                            debug!("dropping stale reply seq {}", reply.seq);
                        }
                        Ok(MsgType::Data) => self.pending_views.push_back(msg),
                        _ => debug!("dropping unexpected server message"),
                    }
                }
                FromBroker::Fault(e) => {
                    warn!("broker fault: {e}");
                    self.last_err = Some(e);
                }
            }
        }
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.stop();
    }
}
