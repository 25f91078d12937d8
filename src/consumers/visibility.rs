use crate::consumers::Consumer;
use crate::error::WatcherError;
use crate::ipcounter::IpCounter;
use crate::models::{Family, PeerState};
use crate::msg::ViewInterests;
use crate::server::FullFeedConfig;
use crate::view::View;
use log::info;

/// Aggregates computed by the visibility consumer for one view.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct VisibilityStats {
    pub v4_peers: u32,
    pub v6_peers: u32,
    pub v4_ff_peers: u32,
    pub v6_ff_peers: u32,
    /// IPv4 prefixes at or above the mask-length threshold seen by enough
    /// peers.
    pub routed_v4_pfxs: u32,
    /// Unique IPv4 addresses covered by the routed prefixes.
    pub v4_ip_space: u64,
}

/// Per-view visibility statistics: peer counts, full-feed peer counts,
/// routed prefix counts, and unique IPv4 address space.
pub struct Visibility {
    cfg: FullFeedConfig,
    counter: IpCounter,
    last: VisibilityStats,
    view_cnt: u64,
}

impl Visibility {
    pub fn new(cfg: FullFeedConfig) -> Self {
        Visibility {
            cfg,
            counter: IpCounter::new(),
            last: VisibilityStats::default(),
            view_cnt: 0,
        }
    }

    /// The statistics of the most recently processed view.
    pub fn last_stats(&self) -> VisibilityStats {
        self.last
    }

    pub fn view_count(&self) -> u64 {
        self.view_cnt
    }
}

impl Consumer for Visibility {
    fn name(&self) -> &'static str {
        "visibility"
    }

    fn process_view(&mut self, _interests: ViewInterests, view: &View) -> Result<(), WatcherError> {
        let mut stats = VisibilityStats::default();

        for id in view.peer_ids() {
            let Some(info) = view.peer_info(id) else { continue };
            if info.state != PeerState::Established {
                continue;
            }
            if info.v4_pfx_cnt > 0 {
                stats.v4_peers += 1;
                if info.v4_pfx_cnt >= self.cfg.v4_fullfeed_size {
                    stats.v4_ff_peers += 1;
                }
            }
            if info.v6_pfx_cnt > 0 {
                stats.v6_peers += 1;
                if info.v6_pfx_cnt >= self.cfg.v6_fullfeed_size {
                    stats.v6_ff_peers += 1;
                }
            }
        }

        self.counter.clear();
        let mut it = view.iter();
        let mut pfx = it.first_pfx(Family::Ipv4);
        while let Some(p) = pfx {
            let visible_enough = view
                .pfx_entry(&p)
                .map(|e| e.peer_count() as u32 >= self.cfg.peer_count_threshold)
                .unwrap_or(false);
            if p.mask_len() >= self.cfg.mask_len_threshold && visible_enough {
                stats.routed_v4_pfxs += 1;
                self.counter.add(&p);
            }
            pfx = it.next_pfx(Family::Ipv4);
        }
        stats.v4_ip_space = self.counter.ip_count();

        info!(
            "visibility time={} peers v4={} v6={} ff v4={} v6={} routed_v4={} v4_space={}",
            view.time(),
            stats.v4_peers,
            stats.v6_peers,
            stats.v4_ff_peers,
            stats.v6_ff_peers,
            stats.routed_v4_pfxs,
            stats.v4_ip_space,
        );
        self.last = stats;
        self.view_cnt += 1;
        Ok(())
    }
}
