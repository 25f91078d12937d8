use bgpwatch::consumers::{ConsumerManager, PerfMonitor, Visibility};
use bgpwatch::server::FullFeedConfig;
use bgpwatch::{Client, ClientConfig, RecvMode, View, ViewInterests};
use clap::Parser;
use itertools::Itertools;
use std::time::Duration;

/// bgpwatch-consumer subscribes to published views and runs a chain of
/// analyses over each one.
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

    /// Interests to subscribe to (repeatable): first-full, full, partial
    #[clap(short = 'I', long = "interest")]
    interests: Vec<String>,

    /// Consumers to run (repeatable): visibility, perfmonitor
    #[clap(short = 'k', long = "consumer")]
    consumers: Vec<String>,

    /// Number of views to process before exiting (0 = run forever)
    #[clap(short = 'N', long, default_value_t = 0)]
    views: u64,
}

fn parse_interests(names: &[String]) -> Result<ViewInterests, String> {
    if names.is_empty() {
        return Ok(ViewInterests::all());
    }
    let mut mask = ViewInterests::empty();
    for name in names {
        mask |= match name.as_str() {
            "first-full" => ViewInterests::FIRST_FULL,
            "full" => ViewInterests::FULL,
            "partial" => ViewInterests::PARTIAL,
            other => return Err(format!("unknown interest {other:?}")),
        };
    }
    Ok(mask)
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let opts: Opts = Opts::parse();

    let interests = match parse_interests(&opts.interests) {
        Ok(mask) => mask,
        Err(e) => {
            log::error!("{e}");
            std::process::exit(1);
        }
    };

    let consumer_names = if opts.consumers.is_empty() {
        vec!["visibility".to_string()]
    } else {
        opts.consumers.clone()
    };
    let mut manager = ConsumerManager::new();
    for name in consumer_names.iter().unique() {
        match name.as_str() {
            "visibility" => manager.register(Box::new(Visibility::new(FullFeedConfig::default()))),
            "perfmonitor" => manager.register(Box::new(PerfMonitor::new())),
            other => {
                log::error!("unknown consumer {other:?}");
                std::process::exit(1);
            }
        }
    }

    let mut cfg = ClientConfig {
        server_uri: opts.server_uri.clone(),
        interests,
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

    let mut view: View = View::new();
    let mut processed = 0u64;
    loop {
        match client.recv_view(RecvMode::Block, &mut view) {
            Ok(Some(class)) => {
                manager.process_view(class, &view);
                processed += 1;
                if opts.views > 0 && processed >= opts.views {
                    break;
                }
            }
            Ok(None) => {}
            Err(e) => {
                log::error!("receive failed: {e}");
                break;
            }
        }
    }
    client.stop();
}
