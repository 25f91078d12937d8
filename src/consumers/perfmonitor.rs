use crate::consumers::Consumer;
use crate::error::WatcherError;
use crate::msg::ViewInterests;
use crate::view::View;
use log::{debug, info};
use std::time::{SystemTime, UNIX_EPOCH};

/// Operational telemetry: view arrival delay and per-peer table sizes.
#[derive(Default)]
pub struct PerfMonitor {
    view_cnt: u64,
}

impl PerfMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn view_count(&self) -> u64 {
        self.view_cnt
    }
}

impl Consumer for PerfMonitor {
    fn name(&self) -> &'static str {
        "perfmonitor"
    }

    fn process_view(&mut self, interests: ViewInterests, view: &View) -> Result<(), WatcherError> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        let arrival_delay = now as i64 - view.time() as i64;

        info!(
            "perfmonitor time={} collector={} interests={interests:?} arrival_delay={arrival_delay}s",
            view.time(),
            view.collector(),
        );

        let mut it = view.iter();
        let mut peer = it.first_peer();
        while peer.is_some() {
            if let (Some(sig), Some(info)) = (it.peer_sig(), it.peer_info()) {
                debug!(
                    "peer {sig} v4_pfx_cnt={} v6_pfx_cnt={}",
                    info.v4_pfx_cnt, info.v6_pfx_cnt
                );
            }
            peer = it.next_peer();
        }

        self.view_cnt += 1;
        Ok(())
    }
}
