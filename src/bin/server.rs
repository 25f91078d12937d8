use bgpwatch::server::{
    FullFeedConfig, NoEvents, Server, ServerConfig, CLIENT_URI_DEFAULT,
    HEARTBEAT_INTERVAL_DEFAULT, HEARTBEAT_LIVENESS_DEFAULT,
};
use clap::Parser;
use std::time::Duration;

/// bgpwatch-server collects routing table bursts from producer clients,
/// folds them into views, and publishes the views to interested consumers.
#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Opts {
    /// Address to listen on for client connections
    #[clap(short = 'c', long, default_value = CLIENT_URI_DEFAULT)]
    client_uri: String,

    /// Heartbeat interval in milliseconds
    #[clap(short = 'i', long, default_value_t = HEARTBEAT_INTERVAL_DEFAULT.as_millis() as u64)]
    heartbeat_interval: u64,

    /// Missed heartbeats before a client is declared dead
    #[clap(short = 'l', long, default_value_t = HEARTBEAT_LIVENESS_DEFAULT)]
    heartbeat_liveness: u32,

    /// Prefixes in a full-feed IPv4 table
    #[clap(short = '4', long, default_value_t = 400_000)]
    v4_fullfeed_size: u32,

    /// Prefixes in a full-feed IPv6 table
    #[clap(short = '6', long, default_value_t = 10_000)]
    v6_fullfeed_size: u32,

    /// Full-feed peers required for a view to classify as full
    #[clap(short = 'p', long, default_value_t = 10)]
    peer_count_threshold: u32,

    /// Minimum mask length for a prefix to count as routed
    #[clap(short = 'm', long, default_value_t = 6)]
    mask_len_threshold: u8,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let opts: Opts = Opts::parse();

    let cfg = ServerConfig {
        client_uri: opts.client_uri,
        heartbeat_interval: Duration::from_millis(opts.heartbeat_interval),
        heartbeat_liveness: opts.heartbeat_liveness,
        fullfeed: FullFeedConfig {
            v4_fullfeed_size: opts.v4_fullfeed_size,
            v6_fullfeed_size: opts.v6_fullfeed_size,
            peer_count_threshold: opts.peer_count_threshold,
            mask_len_threshold: opts.mask_len_threshold,
        },
    };

    let mut server = match Server::bind(cfg, Box::new(NoEvents)) {
        Ok(s) => s,
        Err(e) => {
            log::error!("could not start server: {e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = server.serve() {
        log::error!("server exited with error: {e}");
        std::process::exit(1);
    }
}
