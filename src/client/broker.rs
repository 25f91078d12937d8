/*!
The broker task owned by every client.

The broker is the sole owner of the transport endpoint: the foreground talks
to it through a typed in-process pipe, and the broker forwards requests to
the server, accounts for heartbeats, and reconnects with exponential backoff
when the server flat-lines.
*/
use crate::error::WatcherError;
use crate::msg::transport::{recv_message, send_message};
use crate::msg::{frame_u8, Frame, FrameReader, Message, MsgType, ViewInterests};
use crossbeam_channel::{select, unbounded, Receiver, Sender};
use log::{debug, info, warn};
use std::net::TcpStream;
use std::thread;
use std::time::{Duration, Instant};

/// Commands from the foreground to the broker.
pub(crate) enum ToBroker {
    /// Forward a fully built message to the server.
    Send(Message),
    /// Shut down on the next cycle.
    Term,
}

/// Traffic from the broker back to the foreground.
pub(crate) enum FromBroker {
    /// A REPLY or DATA message from the server, forwarded unparsed.
    Server(Message),
    /// The broker hit an unrecoverable problem.
    Fault(WatcherError),
}

#[derive(Clone)]
pub(crate) struct BrokerConfig {
    pub server_uri: String,
    pub identity: Vec<u8>,
    pub interests: ViewInterests,
    pub heartbeat_interval: Duration,
    pub heartbeat_liveness: u32,
    pub reconnect_interval_min: Duration,
    pub reconnect_interval_max: Duration,
}

enum SockEvent {
    Msg(Message),
    Closed,
}

/// Connects to the server and sends the READY envelope announcing the
/// client identity and its interests.
pub(crate) fn connect(cfg: &BrokerConfig) -> Result<TcpStream, WatcherError> {
    let mut stream = TcpStream::connect(&cfg.server_uri)?;
    let _ = stream.set_nodelay(true);

    let mut msg = Message::new();
    msg.push(Frame::copy_from_slice(&cfg.identity));
    msg.push(frame_u8(MsgType::Ready.into()));
    msg.push(frame_u8(cfg.interests.bits()));
    send_message(&mut stream, &msg)?;
    debug!("broker ready, identity {:?}", String::from_utf8_lossy(&cfg.identity));
    Ok(stream)
}

fn spawn_reader(stream: &TcpStream) -> Result<Receiver<SockEvent>, WatcherError> {
    let mut reader = stream.try_clone()?;
    let (tx, rx) = unbounded();
    thread::spawn(move || loop {
        match recv_message(&mut reader) {
            Ok(msg) => {
                if tx.send(SockEvent::Msg(msg)).is_err() {
                    return;
                }
            }
            Err(_) => {
                let _ = tx.send(SockEvent::Closed);
                return;
            }
        }
    });
    Ok(rx)
}

pub(crate) struct Broker {
    cfg: BrokerConfig,
    pipe_rx: Receiver<ToBroker>,
    pipe_tx: Sender<FromBroker>,
    stream: TcpStream,
    sock_rx: Receiver<SockEvent>,
    liveness: u32,
    reconnect_next: Duration,
    heartbeat_next: Instant,
    shutdown: bool,
}

impl Broker {
    /// Takes over an already connected stream (the foreground performs the
    /// first connect so connection errors surface synchronously).
    pub(crate) fn new(
        cfg: BrokerConfig,
        stream: TcpStream,
        pipe_rx: Receiver<ToBroker>,
        pipe_tx: Sender<FromBroker>,
    ) -> Result<Broker, WatcherError> {
        let sock_rx = spawn_reader(&stream)?;
        let liveness = cfg.heartbeat_liveness;
        let reconnect_next = cfg.reconnect_interval_min;
        let heartbeat_next = Instant::now() + cfg.heartbeat_interval;
        Ok(Broker {
            cfg,
            pipe_rx,
            pipe_tx,
            stream,
            sock_rx,
            liveness,
            reconnect_next,
            heartbeat_next,
            shutdown: false,
        })
    }

    pub(crate) fn run(mut self) {
        while !self.shutdown {
            self.cycle();
        }
        self.send_term();
    }

    fn cycle(&mut self) {
        select! {
            recv(self.sock_rx) -> ev => match ev {
                Ok(SockEvent::Msg(msg)) => {
                    // any traffic from the server counts as life
                    self.liveness = self.cfg.heartbeat_liveness;
                    self.reconnect_next = self.cfg.reconnect_interval_min;
                    self.handle_server(msg);
                }
                Ok(SockEvent::Closed) | Err(_) => {
                    warn!("server connection closed");
                    self.backoff_reconnect();
                }
            },
            recv(self.pipe_rx) -> cmd => match cmd {
                Ok(ToBroker::Send(msg)) => self.forward(msg),
                Ok(ToBroker::Term) | Err(_) => {
                    info!("shutting down client broker on next cycle");
                    self.shutdown = true;
                }
            },
            default(self.cfg.heartbeat_interval) => {
                self.liveness = self.liveness.saturating_sub(1);
                if self.liveness == 0 {
                    warn!("heartbeat failure, can't reach server");
                    self.backoff_reconnect();
                }
            }
        }

        if Instant::now() >= self.heartbeat_next {
            self.heartbeat_next = Instant::now() + self.cfg.heartbeat_interval;
            self.send_heartbeat();
        }
    }

    fn handle_server(&mut self, msg: Message) {
        let mut reader = FrameReader::new(&msg);
        let msg_type = match reader.pop_u8("envelope type").map(MsgType::try_from) {
            Ok(Ok(t)) => t,
            _ => {
                warn!("invalid message received from server");
                return;
            }
        };
        match msg_type {
            MsgType::Heartbeat => {
                // accounted for by the liveness reset above, then dropped
            }
            MsgType::Reply | MsgType::Data => {
                if self.pipe_tx.send(FromBroker::Server(msg)).is_err() {
                    self.shutdown = true;
                }
            }
            other => warn!("unexpected message type {other:?} from server"),
        }
    }

    fn forward(&mut self, msg: Message) {
        let mut full = Message::with_capacity(msg.len() + 1);
        full.push(Frame::copy_from_slice(&self.cfg.identity));
        full.extend(msg);
        if let Err(e) = send_message(&mut self.stream, &full) {
            warn!("could not pass message to server: {e}");
            self.backoff_reconnect();
        }
    }

    fn send_heartbeat(&mut self) {
        let mut msg = Message::new();
        msg.push(Frame::copy_from_slice(&self.cfg.identity));
        msg.push(frame_u8(MsgType::Heartbeat.into()));
        if let Err(e) = send_message(&mut self.stream, &msg) {
            debug!("heartbeat send failed: {e}");
        }
    }

    fn send_term(&mut self) {
        let mut msg = Message::new();
        msg.push(Frame::copy_from_slice(&self.cfg.identity));
        msg.push(frame_u8(MsgType::Term.into()));
        let _ = send_message(&mut self.stream, &msg);
    }

    /// Sleeps out the reconnect backoff, doubles it up to the maximum, then
    /// re-establishes the socket and re-sends READY.
    fn backoff_reconnect(&mut self) {
        warn!("reconnecting in {} msec", self.reconnect_next.as_millis());
        thread::sleep(self.reconnect_next);
        if self.reconnect_next < self.cfg.reconnect_interval_max {
            self.reconnect_next =
                (self.reconnect_next * 2).min(self.cfg.reconnect_interval_max);
        }

        let _ = self.stream.shutdown(std::net::Shutdown::Both);
        self.liveness = self.cfg.heartbeat_liveness;

        match connect(&self.cfg) {
            Ok(stream) => match spawn_reader(&stream) {
                Ok(rx) => {
                    info!("reconnected to {}", self.cfg.server_uri);
                    self.stream = stream;
                    self.sock_rx = rx;
                }
                Err(e) => {
                    let _ = self.pipe_tx.send(FromBroker::Fault(e));
                    self.shutdown = true;
                }
            },
            Err(e) => {
                warn!("reconnect failed: {e}");
            }
        }
    }
}
