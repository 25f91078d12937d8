use bgpwatch::{Client, ClientConfig, PeerState, Prefix};
use clap::Parser;
use rand::Rng;
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

/// bgpwatch-producer generates synthetic prefix tables and ships them to a
/// watcher server; useful for exercising a deployment end to end.
#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Opts {
    /// Server to connect to
    #[clap(short = 's', long, default_value = "127.0.0.1:6300")]
    server_uri: String,

    /// Client identity (defaults to a pid-derived name)
    #[clap(short = 'n', long)]
    identity: Option<String>,

    /// Heartbeat interval in milliseconds
    #[clap(short = 'i', long, default_value_t = 2500)]
    heartbeat_interval: u64,

    /// Missed heartbeats before reconnecting
    #[clap(short = 'l', long, default_value_t = 3)]
    heartbeat_liveness: u32,

    /// Minimum reconnect backoff in milliseconds
    #[clap(short = 'r', long, default_value_t = 1000)]
    reconnect_min: u64,

    /// Maximum reconnect backoff in milliseconds
    #[clap(short = 'R', long, default_value_t = 32_000)]
    reconnect_max: u64,

    /// Number of tables to send
    #[clap(short = 'N', long, default_value_t = 1)]
    tables: u32,

    /// Peers per table
    #[clap(short = 'P', long, default_value_t = 3)]
    peers: u16,

    /// Prefixes per table
    #[clap(short = 'T', long, default_value_t = 100)]
    prefixes: u32,

    /// Randomize peer states instead of announcing all as established
    #[clap(short = 'c', long)]
    random_state: bool,

    /// Randomly drop some prefixes
    #[clap(short = 'p', long)]
    random_drop: bool,

    /// Collector name announced in table begins
    #[clap(short = 'C', long, default_value = "test-collector")]
    collector: String,
}

const PEER_STATES: [PeerState; 7] = [
    PeerState::Idle,
    PeerState::Connect,
    PeerState::Active,
    PeerState::OpenSent,
    PeerState::OpenConfirm,
    PeerState::Established,
    PeerState::Null,
];

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let opts: Opts = Opts::parse();
    let mut rng = rand::thread_rng();

    let mut cfg = ClientConfig {
        server_uri: opts.server_uri.clone(),
        heartbeat_interval: Duration::from_millis(opts.heartbeat_interval),
        heartbeat_liveness: opts.heartbeat_liveness,
        reconnect_interval_min: Duration::from_millis(opts.reconnect_min),
        reconnect_interval_max: Duration::from_millis(opts.reconnect_max),
        ..ClientConfig::default()
    };
    if let Some(identity) = opts.identity.clone() {
        cfg.identity = identity;
    }

    let mut client = Client::new(cfg);
    if let Err(e) = client.start() {
        log::error!("could not connect to {}: {e}", opts.server_uri);
        std::process::exit(1);
    }

    let base_time = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as u32)
        .unwrap_or(0);

    for table in 0..opts.tables {
        let time = base_time + table * 300;
        if let Err(e) = send_table(&mut client, &opts, &mut rng, time) {
            log::error!("table {table} failed: {e}");
            client.stop();
            std::process::exit(1);
        }
        log::info!("table {table} (time {time}) acknowledged");
    }

    client.stop();
}

fn send_table(
    client: &mut Client,
    opts: &Opts,
    rng: &mut impl Rng,
    time: u32,
) -> Result<(), bgpwatch::WatcherError> {
    client.pfx_table_begin(time, &opts.collector, opts.peers)?;

    let mut peer_ids = Vec::with_capacity(opts.peers as usize);
    for p in 0..opts.peers {
        let ip = IpAddr::V4(Ipv4Addr::new(10, 0, (p >> 8) as u8, p as u8));
        let state = if opts.random_state {
            PEER_STATES[rng.gen_range(0..PEER_STATES.len())]
        } else {
            PeerState::Established
        };
        peer_ids.push((client.pfx_table_add_peer(ip, state, 65000 + p as u32)?, state));
    }

    for i in 0..opts.prefixes {
        if peer_ids.is_empty() {
            break;
        }
        if opts.random_drop && rng.gen_bool(0.1) {
            continue;
        }
        // spread prefixes over 10.0.0.0/8 as /24s
        let addr = Ipv4Addr::new(10, (i >> 8) as u8, i as u8, 0);
        let Some(prefix) = Prefix::new(IpAddr::V4(addr), 24) else {
            continue;
        };
        let (peer, state) = peer_ids[i as usize % peer_ids.len()];
        if state != PeerState::Established {
            continue;
        }
        client.pfx_table_add(peer, &prefix, 64500 + (i % 100))?;
    }

    client.pfx_table_end()
}
