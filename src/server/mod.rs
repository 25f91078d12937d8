/*!
The router-side server: accepts producer and consumer clients, tracks their
liveness through heartbeats, reassembles producer table bursts into views,
and fans completed views out to consumers whose advertised interests match
the view's classification.

The event loop is single-threaded: per-connection reader threads only decode
frames and forward `(connection, message)` events over a channel, and all
client state lives on the loop thread. The loop's poll is a channel receive
bounded by the heartbeat interval.
*/
use crate::error::WatcherError;
use crate::models::{PeerId, PeerSignature, PeerState};
use crate::msg::transport::{recv_message, send_message};
use crate::msg::{
    envelope_type, frame_u8, interests_from_byte, DataMsgType, FrameReader, Message, MsgType,
    PeerRecord, PfxRecord, Reply, TableBegin, TableEnd, TableType, ViewInterests,
};
use crate::view::{io::serialize_view, View};
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use log::{debug, info, warn};
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Default client-facing listen address.
pub const CLIENT_URI_DEFAULT: &str = "127.0.0.1:6300";
/// Default interval between heartbeats, server and client side.
pub const HEARTBEAT_INTERVAL_DEFAULT: Duration = Duration::from_millis(2500);
/// Default number of missed heartbeats before a peer is declared dead.
pub const HEARTBEAT_LIVENESS_DEFAULT: u32 = 3;

/// Thresholds deciding when a view counts as full-feed.
#[derive(Debug, Clone, Copy)]
pub struct FullFeedConfig {
    /// Prefixes a peer must carry to be a full-feed IPv4 peer.
    pub v4_fullfeed_size: u32,
    /// Prefixes a peer must carry to be a full-feed IPv6 peer.
    pub v6_fullfeed_size: u32,
    /// Full-feed peers a view needs to classify as full.
    pub peer_count_threshold: u32,
    /// Minimum mask length for a prefix to count as routed; applied by
    /// visibility analysis, not by view classification.
    pub mask_len_threshold: u8,
}

impl Default for FullFeedConfig {
    fn default() -> Self {
        FullFeedConfig {
            v4_fullfeed_size: 400_000,
            v6_fullfeed_size: 10_000,
            peer_count_threshold: 10,
            mask_len_threshold: 6,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address clients connect to.
    pub client_uri: String,
    pub heartbeat_interval: Duration,
    pub heartbeat_liveness: u32,
    pub fullfeed: FullFeedConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            client_uri: CLIENT_URI_DEFAULT.to_string(),
            heartbeat_interval: HEARTBEAT_INTERVAL_DEFAULT,
            heartbeat_liveness: HEARTBEAT_LIVENESS_DEFAULT,
            fullfeed: FullFeedConfig::default(),
        }
    }
}

/// Observer hooks fired by the server loop. All methods default to no-ops.
#[allow(unused_variables)]
pub trait ServerEvents: Send {
    fn client_connect(&mut self, client: &str) {}
    fn client_disconnect(&mut self, client: &str) {}
    fn table_begin(&mut self, table_num: u64, table: TableType, time: u32, client: &str) {}
    fn table_end(&mut self, table_num: u64, table: TableType, time: u32, client: &str) {}
    fn view_published(&mut self, interests: ViewInterests, view: &View) {}
}

/// The default, silent observer.
pub struct NoEvents;

impl ServerEvents for NoEvents {}

/// Cooperative stop flag for a running server.
#[derive(Clone)]
pub struct ServerHandle {
    shutdown: Arc<AtomicBool>,
}

impl ServerHandle {
    /// Requests shutdown; the loop exits at the end of the current cycle.
    pub fn stop(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }
}

enum ServerEvent {
    Accepted { conn: u64, writer: TcpStream },
    Msg { conn: u64, msg: Message },
    Gone { conn: u64 },
}

struct PendingTable {
    view: View,
    /// Peers announced in the current burst, by wire address.
    peer_ids: HashMap<IpAddr, PeerId>,
}

struct ClientState {
    name: String,
    conn: u64,
    expiry: Instant,
    ready: bool,
    interests: ViewInterests,
    table_time: HashMap<TableType, u32>,
    table_num: HashMap<TableType, u64>,
    pending: Option<PendingTable>,
}

/// The watcher server. Bind with [`Server::bind`], then drive it with
/// [`Server::serve`].
pub struct Server {
    cfg: ServerConfig,
    listener: TcpListener,
    events: Box<dyn ServerEvents>,
    clients: HashMap<Vec<u8>, ClientState>,
    conn_writers: HashMap<u64, TcpStream>,
    table_num: u64,
    seen_full: bool,
    shutdown: Arc<AtomicBool>,
}

impl Server {
    pub fn bind(cfg: ServerConfig, events: Box<dyn ServerEvents>) -> Result<Server, WatcherError> {
        let listener = TcpListener::bind(&cfg.client_uri)?;
        listener.set_nonblocking(true)?;
        info!("server listening on {}", cfg.client_uri);
        Ok(Server {
            cfg,
            listener,
            events,
            clients: HashMap::new(),
            conn_writers: HashMap::new(),
            table_num: 0,
            seen_full: false,
            shutdown: Arc::new(AtomicBool::new(false)),
        })
    }

    /// The actually bound address, useful with an ephemeral port.
    pub fn local_addr(&self) -> Result<SocketAddr, WatcherError> {
        Ok(self.listener.local_addr()?)
    }

    pub fn handle(&self) -> ServerHandle {
        ServerHandle {
            shutdown: Arc::clone(&self.shutdown),
        }
    }

    /// Runs the event loop until [`ServerHandle::stop`] or a fatal error.
    pub fn serve(&mut self) -> Result<(), WatcherError> {
        let (event_tx, event_rx) = unbounded();
        let acceptor = {
            let listener = self.listener.try_clone()?;
            let shutdown = Arc::clone(&self.shutdown);
            thread::spawn(move || accept_loop(listener, event_tx, shutdown))
        };

        let result = self.event_loop(&event_rx);

        self.shutdown.store(true, Ordering::Relaxed);
        let _ = acceptor.join();
        result
    }

    fn event_loop(&mut self, event_rx: &Receiver<ServerEvent>) -> Result<(), WatcherError> {
        let mut heartbeat_next = Instant::now() + self.cfg.heartbeat_interval;

        while !self.shutdown.load(Ordering::Relaxed) {
            match event_rx.recv_timeout(self.cfg.heartbeat_interval) {
                Ok(ServerEvent::Accepted { conn, writer }) => {
                    self.conn_writers.insert(conn, writer);
                }
                Ok(ServerEvent::Msg { conn, msg }) => {
                    // a broken message drops; the client stays alive until
                    // its heartbeat timer expires
                    if let Err(e) = self.handle_message(conn, msg) {
                        warn!("dropping message: {e}");
                    }
                }
                Ok(ServerEvent::Gone { conn }) => {
                    self.conn_writers.remove(&conn);
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(WatcherError::Transport(std::io::Error::new(
                        std::io::ErrorKind::BrokenPipe,
                        "acceptor thread terminated",
                    )));
                }
            }

            if Instant::now() >= heartbeat_next {
                self.send_heartbeats();
                heartbeat_next = Instant::now() + self.cfg.heartbeat_interval;
            }

            self.purge_expired();
        }
        Ok(())
    }

    fn handle_message(&mut self, conn: u64, msg: Message) -> Result<(), WatcherError> {
        let mut reader = FrameReader::new(&msg);
        let identity = reader.pop_frame()?.to_vec();
        if identity.is_empty() {
            return Err(WatcherError::Protocol("empty identity frame".to_string()));
        }

        // any message from a client resets its liveness
        let expiry = Instant::now()
            + self.cfg.heartbeat_interval * self.cfg.heartbeat_liveness;
        if let Some(client) = self.clients.get_mut(&identity) {
            client.expiry = expiry;
            client.conn = conn;
        } else {
            let name = String::from_utf8_lossy(&identity).into_owned();
            info!("client connected: {name}");
            self.clients.insert(
                identity.clone(),
                ClientState {
                    name: name.clone(),
                    conn,
                    expiry,
                    ready: false,
                    interests: ViewInterests::empty(),
                    table_time: HashMap::new(),
                    table_num: HashMap::new(),
                    pending: None,
                },
            );
            self.events.client_connect(&name);
        }

        match envelope_type(&mut reader)? {
            MsgType::Ready => {
                let interests = interests_from_byte(reader.pop_u8("interest mask")?)?;
                if let Some(client) = self.clients.get_mut(&identity) {
                    client.ready = true;
                    client.interests = interests;
                    debug!("client {} ready, interests {interests:?}", client.name);
                }
                Ok(())
            }
            MsgType::Heartbeat => Ok(()),
            MsgType::Term => {
                if let Some(client) = self.clients.remove(&identity) {
                    info!("client terminated: {}", client.name);
                    self.events.client_disconnect(&client.name);
                }
                Ok(())
            }
            MsgType::Data => self.handle_data(&identity, conn, &mut reader),
            other => Err(WatcherError::Protocol(format!(
                "unexpected message type {other:?} from client"
            ))),
        }
    }

    fn handle_data(
        &mut self,
        identity: &[u8],
        conn: u64,
        reader: &mut FrameReader,
    ) -> Result<(), WatcherError> {
        let seq = reader.pop_u32("sequence number")?;
        let subtype = DataMsgType::try_from(reader.pop_u8("data message type")?)?;

        let result = match subtype {
            DataMsgType::TableBegin => {
                let begin = TableBegin::parse(reader)?;
                self.on_table_begin(identity, begin)
            }
            DataMsgType::TableEnd => {
                let end = TableEnd::parse(reader)?;
                self.on_table_end(identity, end)
            }
            DataMsgType::PfxRecord => {
                let rec = PfxRecord::parse(reader)?;
                self.on_pfx_record(identity, rec)
            }
            DataMsgType::PeerRecord => {
                let rec = PeerRecord::parse(reader)?;
                self.on_peer_record(identity, rec)
            }
        };

        let rc = match result {
            Ok(()) => 0,
            Err(e) => {
                warn!("request failed: {e}");
                u8::from(e.ret_code())
            }
        };

        let mut reply = Message::new();
        reply.push(frame_u8(MsgType::Reply.into()));
        Reply { seq, rc }.append(&mut reply);
        self.send_to_conn(conn, &reply);
        Ok(())
    }

    fn client_mut(&mut self, identity: &[u8]) -> Result<&mut ClientState, WatcherError> {
        self.clients
            .get_mut(identity)
            .ok_or_else(|| WatcherError::Semantic("client state vanished".to_string()))
    }

    fn on_table_begin(&mut self, identity: &[u8], begin: TableBegin) -> Result<(), WatcherError> {
        if self
            .client_mut(identity)?
            .table_time
            .contains_key(&begin.table)
        {
            return Err(WatcherError::Protocol(format!(
                "table already started for type {:?}",
                begin.table
            )));
        }
        let table_num = self.table_num;
        self.table_num += 1;

        let client = self.client_mut(identity)?;
        client.table_time.insert(begin.table, begin.time);
        client.table_num.insert(begin.table, table_num);

        let pending = client.pending.get_or_insert_with(|| PendingTable {
            view: View::new(),
            peer_ids: HashMap::new(),
        });
        pending.view.set_time(begin.time);
        pending.view.set_collector(begin.collector);

        let name = client.name.clone();
        self.events.table_begin(table_num, begin.table, begin.time, &name);
        Ok(())
    }

    fn on_peer_record(&mut self, identity: &[u8], rec: PeerRecord) -> Result<(), WatcherError> {
        let client = self.client_mut(identity)?;
        if client.table_time.is_empty() {
            return Err(WatcherError::Protocol(
                "received peer record before table start".to_string(),
            ));
        }
        let Some(pending) = client.pending.as_mut() else {
            return Err(WatcherError::Semantic("no table being assembled".to_string()));
        };
        let sig = PeerSignature::new(
            pending.view.collector().to_string(),
            rec.peer_ip,
            rec.asn,
        );
        let id = pending.view.add_peer(&sig, rec.state);
        pending.peer_ids.insert(rec.peer_ip, id);
        Ok(())
    }

    fn on_pfx_record(&mut self, identity: &[u8], rec: PfxRecord) -> Result<(), WatcherError> {
        let client = self.client_mut(identity)?;
        if !client.table_time.contains_key(&TableType::Prefix) {
            return Err(WatcherError::Protocol(
                "received prefix record before table start".to_string(),
            ));
        }
        let Some(pending) = client.pending.as_mut() else {
            return Err(WatcherError::Semantic("no table being assembled".to_string()));
        };
        let Some(&peer_id) = pending.peer_ids.get(&rec.peer_ip) else {
            return Err(WatcherError::Semantic(format!(
                "prefix record for unannounced peer {}",
                rec.peer_ip
            )));
        };
        // only established peers contribute prefixes
        let established = pending
            .view
            .peer_info(peer_id)
            .map(|info| info.state == PeerState::Established)
            .unwrap_or(false);
        if !established {
            debug!("skipping prefix from non-established peer {}", rec.peer_ip);
            return Ok(());
        }
        pending.view.add_pfx_peer(peer_id, &rec.prefix, rec.orig_asn)
    }

    fn on_table_end(&mut self, identity: &[u8], end: TableEnd) -> Result<(), WatcherError> {
        let client = self.client_mut(identity)?;

        match client.table_time.get(&end.table) {
            None => {
                return Err(WatcherError::Protocol(format!(
                    "table end without begin for type {:?}",
                    end.table
                )))
            }
            Some(&time) if time != end.time => {
                return Err(WatcherError::Protocol(format!(
                    "table time mismatch (expecting {time}, got {})",
                    end.time
                )))
            }
            Some(_) => {}
        }

        client.table_time.remove(&end.table);
        let table_num = client.table_num.remove(&end.table).unwrap_or(0);
        let name = client.name.clone();

        // the view completes once every open table for this client closed
        let completed = if client.table_time.is_empty() {
            client.pending.take().map(|p| p.view)
        } else {
            None
        };

        self.events.table_end(table_num, end.table, end.time, &name);

        if let Some(view) = completed {
            let interests = self.classify(&view);
            self.publish(&view, interests);
        }
        Ok(())
    }

    /// Classifies a completed view by its full-feed peers.
    fn classify(&mut self, view: &View) -> ViewInterests {
        let ff = &self.cfg.fullfeed;
        let ff_peers = view
            .peer_ids()
            .filter_map(|id| view.peer_info(id))
            .filter(|info| info.state == PeerState::Established)
            .filter(|info| {
                info.v4_pfx_cnt >= ff.v4_fullfeed_size || info.v6_pfx_cnt >= ff.v6_fullfeed_size
            })
            .count() as u32;

        if ff_peers >= ff.peer_count_threshold {
            if self.seen_full {
                ViewInterests::FULL
            } else {
                self.seen_full = true;
                ViewInterests::FIRST_FULL
            }
        } else {
            ViewInterests::PARTIAL
        }
    }

    fn publish(&mut self, view: &View, interests: ViewInterests) {
        let mut msg = Message::new();
        msg.push(frame_u8(MsgType::Data.into()));
        msg.push(frame_u8(interests.bits()));
        serialize_view(view, &mut msg);

        let subscribers: Vec<u64> = self
            .clients
            .values()
            .filter(|c| c.ready && c.interests.intersects(interests))
            .map(|c| c.conn)
            .collect();

        info!(
            "publishing view time={} collector={} as {interests:?} to {} subscriber(s)",
            view.time(),
            view.collector(),
            subscribers.len()
        );
        for conn in subscribers {
            self.send_to_conn(conn, &msg);
        }
        self.events.view_published(interests, view);
    }

    fn send_heartbeats(&mut self) {
        let mut msg = Message::new();
        msg.push(frame_u8(MsgType::Heartbeat.into()));
        let conns: Vec<u64> = self.clients.values().map(|c| c.conn).collect();
        for conn in conns {
            self.send_to_conn(conn, &msg);
        }
    }

    /// Removes every client whose heartbeat expiry passed, in one sweep.
    fn purge_expired(&mut self) {
        let now = Instant::now();
        let expired: Vec<Vec<u8>> = self
            .clients
            .iter()
            .filter(|(_, c)| c.expiry < now)
            .map(|(k, _)| k.clone())
            .collect();
        for key in expired {
            if let Some(client) = self.clients.remove(&key) {
                info!("removing dead client {}", client.name);
                self.events.client_disconnect(&client.name);
            }
        }
    }

    fn send_to_conn(&mut self, conn: u64, msg: &Message) {
        let Some(writer) = self.conn_writers.get_mut(&conn) else {
            debug!("no live connection {conn}, dropping outbound message");
            return;
        };
        if let Err(e) = send_message(writer, msg) {
            warn!("send to connection {conn} failed: {e}");
            self.conn_writers.remove(&conn);
        }
    }
}

fn accept_loop(listener: TcpListener, event_tx: Sender<ServerEvent>, shutdown: Arc<AtomicBool>) {
    let mut next_conn: u64 = 0;
    while !shutdown.load(Ordering::Relaxed) {
        match listener.accept() {
            Ok((stream, addr)) => {
                let conn = next_conn;
                next_conn += 1;
                debug!("accepted connection {conn} from {addr}");
                if stream.set_nonblocking(false).is_err() {
                    continue;
                }
                let writer = match stream.try_clone() {
                    Ok(w) => w,
                    Err(e) => {
                        warn!("could not clone client stream: {e}");
                        continue;
                    }
                };
                if event_tx.send(ServerEvent::Accepted { conn, writer }).is_err() {
                    return;
                }
                let tx = event_tx.clone();
                thread::spawn(move || read_loop(stream, conn, tx));
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                thread::sleep(Duration::from_millis(25));
            }
            Err(e) => {
                warn!("accept failed: {e}");
                thread::sleep(Duration::from_millis(25));
            }
        }
    }
}

fn read_loop(mut stream: TcpStream, conn: u64, event_tx: Sender<ServerEvent>) {
    loop {
        match recv_message(&mut stream) {
            Ok(msg) => {
                if event_tx.send(ServerEvent::Msg { conn, msg }).is_err() {
                    return;
                }
            }
            Err(e) => {
                debug!("connection {conn} closed: {e}");
                let _ = event_tx.send(ServerEvent::Gone { conn });
                return;
            }
        }
    }
}
