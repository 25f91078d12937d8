/*!
The view data plane: a time-stamped snapshot of peer→prefix→origin-AS
mappings for one collector.

A view is populated incrementally by a producer burst (or by decoding a
published view), then read through the seekable [`ViewIter`]. Every level of
the structure carries an optional user-data slot; the slots are generic, so
dropping a view (or overwriting a slot) releases user data without any
registered destructor.
*/
mod iter;
pub mod io;

pub use iter::ViewIter;

use crate::error::WatcherError;
use crate::models::{Family, PeerId, PeerSigMap, PeerSignature, PeerState, Prefix};
use std::collections::HashMap;

/// Per-peer metadata within a view.
#[derive(Debug)]
pub struct PeerInfo<PU = ()> {
    pub state: PeerState,
    /// Number of IPv4 prefixes this peer observes in the view.
    pub v4_pfx_cnt: u32,
    /// Number of IPv6 prefixes this peer observes in the view.
    pub v6_pfx_cnt: u32,
    pub user: Option<PU>,
}

impl<PU> PeerInfo<PU> {
    fn new(state: PeerState) -> Self {
        PeerInfo {
            state,
            v4_pfx_cnt: 0,
            v6_pfx_cnt: 0,
            user: None,
        }
    }
}

/// What one peer observes for one prefix.
#[derive(Debug)]
pub struct PeerPfxInfo<CU = ()> {
    pub orig_asn: u32,
    pub user: Option<CU>,
}

/// Per-prefix slice of a view: the set of peers observing the prefix.
///
/// An entry exists only while it has at least one peer.
#[derive(Debug)]
pub struct PfxEntry<XU = (), CU = ()> {
    peers: HashMap<PeerId, PeerPfxInfo<CU>>,
    pub user: Option<XU>,
}

impl<XU, CU> PfxEntry<XU, CU> {
    fn new() -> Self {
        PfxEntry {
            peers: HashMap::new(),
            user: None,
        }
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    pub fn get(&self, peer_id: PeerId) -> Option<&PeerPfxInfo<CU>> {
        self.peers.get(&peer_id)
    }

    pub fn peers(&self) -> impl Iterator<Item = (PeerId, &PeerPfxInfo<CU>)> {
        self.peers.iter().map(|(id, info)| (*id, info))
    }
}

/// A consistent snapshot of `(peer, prefix → origin-asn)` at an instant in
/// time for one collector.
#[derive(Debug, Default)]
pub struct View<VU = (), PU = (), XU = (), CU = ()> {
    time: u32,
    collector: String,
    sigs: PeerSigMap,
    peers: HashMap<PeerId, PeerInfo<PU>>,
    v4pfxs: HashMap<Prefix, PfxEntry<XU, CU>>,
    v6pfxs: HashMap<Prefix, PfxEntry<XU, CU>>,
    user: Option<VU>,
}

impl<VU, PU, XU, CU> View<VU, PU, XU, CU> {
    pub fn new() -> Self {
        View {
            time: 0,
            collector: String::new(),
            sigs: PeerSigMap::new(),
            peers: HashMap::new(),
            v4pfxs: HashMap::new(),
            v6pfxs: HashMap::new(),
            user: None,
        }
    }

    /// Empties the view for reuse, dropping all user data.
    pub fn clear(&mut self) {
        self.time = 0;
        self.collector.clear();
        self.sigs.clear();
        self.peers.clear();
        self.v4pfxs.clear();
        self.v6pfxs.clear();
        self.user = None;
    }

    pub fn time(&self) -> u32 {
        self.time
    }

    pub fn set_time(&mut self, time: u32) {
        self.time = time;
    }

    pub fn collector(&self) -> &str {
        &self.collector
    }

    pub fn set_collector(&mut self, name: impl Into<String>) {
        self.collector = name.into();
    }

    /// Interns the peer and records its state; the latest state wins when a
    /// peer is added twice.
    pub fn add_peer(&mut self, sig: &PeerSignature, state: PeerState) -> PeerId {
        let id = self.sigs.get_id(sig);
        self.peers
            .entry(id)
            .and_modify(|info| info.state = state)
            .or_insert_with(|| PeerInfo::new(state));
        id
    }

    /// Restores a peer under an explicit id, e.g. while decoding a
    /// published view.
    pub fn insert_peer(
        &mut self,
        id: PeerId,
        sig: PeerSignature,
        state: PeerState,
    ) -> Result<(), WatcherError> {
        self.sigs.set(id, sig)?;
        self.peers
            .entry(id)
            .and_modify(|info| info.state = state)
            .or_insert_with(|| PeerInfo::new(state));
        Ok(())
    }

    /// Records that `peer_id` observes `pfx` with the given origin ASN.
    ///
    /// The per-peer family counter moves on the first occurrence of the
    /// `(peer, prefix)` pair only; a repeat observation overwrites the
    /// origin ASN in place.
    pub fn add_pfx_peer(
        &mut self,
        peer_id: PeerId,
        pfx: &Prefix,
        orig_asn: u32,
    ) -> Result<(), WatcherError> {
        let Some(peer) = self.peers.get_mut(&peer_id) else {
            return Err(WatcherError::Semantic(format!("unknown peer id {peer_id}")));
        };
        let table = match pfx.family() {
            Family::Ipv4 => &mut self.v4pfxs,
            Family::Ipv6 => &mut self.v6pfxs,
        };
        let entry = table.entry(*pfx).or_insert_with(PfxEntry::new);
        match entry.peers.entry(peer_id) {
            std::collections::hash_map::Entry::Occupied(mut cell) => {
                cell.get_mut().orig_asn = orig_asn;
            }
            std::collections::hash_map::Entry::Vacant(cell) => {
                cell.insert(PeerPfxInfo {
                    orig_asn,
                    user: None,
                });
                match pfx.family() {
                    Family::Ipv4 => peer.v4_pfx_cnt += 1,
                    Family::Ipv6 => peer.v6_pfx_cnt += 1,
                }
            }
        }
        Ok(())
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    pub fn peer_info(&self, id: PeerId) -> Option<&PeerInfo<PU>> {
        self.peers.get(&id)
    }

    pub fn peer_sig(&self, id: PeerId) -> Option<&PeerSignature> {
        self.sigs.get_sig(id)
    }

    pub fn peer_ids(&self) -> impl Iterator<Item = PeerId> + '_ {
        self.peers.keys().copied()
    }

    /// Number of distinct prefixes of a family in the view.
    pub fn pfx_count(&self, family: Family) -> usize {
        match family {
            Family::Ipv4 => self.v4pfxs.len(),
            Family::Ipv6 => self.v6pfxs.len(),
        }
    }

    pub fn pfx_entry(&self, pfx: &Prefix) -> Option<&PfxEntry<XU, CU>> {
        match pfx.family() {
            Family::Ipv4 => self.v4pfxs.get(pfx),
            Family::Ipv6 => self.v6pfxs.get(pfx),
        }
    }

    pub(crate) fn pfx_table(&self, family: Family) -> &HashMap<Prefix, PfxEntry<XU, CU>> {
        match family {
            Family::Ipv4 => &self.v4pfxs,
            Family::Ipv6 => &self.v6pfxs,
        }
    }

    /// Seekable iterator over peers, prefixes, and `(prefix, peer)` cells.
    pub fn iter(&self) -> ViewIter<'_, VU, PU, XU, CU> {
        ViewIter::new(self)
    }

    /* ---------------- user-data slots ---------------- */

    pub fn user(&self) -> Option<&VU> {
        self.user.as_ref()
    }

    /// Stores view-level user data, returning the previous value.
    pub fn set_user(&mut self, user: VU) -> Option<VU> {
        self.user.replace(user)
    }

    pub fn take_user(&mut self) -> Option<VU> {
        self.user.take()
    }

    pub fn peer_user(&self, id: PeerId) -> Option<&PU> {
        self.peers.get(&id).and_then(|p| p.user.as_ref())
    }

    /// Stores user data on a peer. Unknown ids drop the value and return
    /// `None`.
    pub fn set_peer_user(&mut self, id: PeerId, user: PU) -> Option<PU> {
        self.peers.get_mut(&id).and_then(|p| p.user.replace(user))
    }

    pub fn pfx_user(&self, pfx: &Prefix) -> Option<&XU> {
        self.pfx_entry(pfx).and_then(|e| e.user.as_ref())
    }

    /// Stores user data on a prefix entry. Prefixes not in the view drop
    /// the value and return `None`.
    pub fn set_pfx_user(&mut self, pfx: &Prefix, user: XU) -> Option<XU> {
        let table = match pfx.family() {
            Family::Ipv4 => &mut self.v4pfxs,
            Family::Ipv6 => &mut self.v6pfxs,
        };
        table.get_mut(pfx).and_then(|e| e.user.replace(user))
    }

    pub fn pfx_peer_user(&self, pfx: &Prefix, id: PeerId) -> Option<&CU> {
        self.pfx_entry(pfx)
            .and_then(|e| e.peers.get(&id))
            .and_then(|c| c.user.as_ref())
    }

    /// Stores user data on a `(prefix, peer)` cell.
    pub fn set_pfx_peer_user(&mut self, pfx: &Prefix, id: PeerId, user: CU) -> Option<CU> {
        let table = match pfx.family() {
            Family::Ipv4 => &mut self.v4pfxs,
            Family::Ipv6 => &mut self.v6pfxs,
        };
        table
            .get_mut(pfx)
            .and_then(|e| e.peers.get_mut(&id))
            .and_then(|c| c.user.replace(user))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::IpAddr;
    use std::str::FromStr;

    fn sig(n: u8) -> PeerSignature {
        PeerSignature::new("rrc00", format!("10.0.0.{n}").parse::<IpAddr>().unwrap(), 65000)
    }

    fn pfx(s: &str) -> Prefix {
        Prefix::from_str(s).unwrap()
    }

    #[test]
    fn test_add_peer_and_state_update() {
        let mut view: View = View::new();
        let a = view.add_peer(&sig(1), PeerState::Idle);
        let b = view.add_peer(&sig(1), PeerState::Established);
        assert_eq!(a, b);
        assert_eq!(view.peer_count(), 1);
        assert_eq!(view.peer_info(a).unwrap().state, PeerState::Established);
        assert_eq!(view.peer_sig(a), Some(&sig(1)));
    }

    #[test]
    fn test_pfx_counters_move_on_first_occurrence() {
        let mut view: View = View::new();
        let id = view.add_peer(&sig(1), PeerState::Established);

        view.add_pfx_peer(id, &pfx("192.0.2.0/24"), 65001).unwrap();
        view.add_pfx_peer(id, &pfx("192.0.2.0/24"), 65002).unwrap();
        view.add_pfx_peer(id, &pfx("2001:db8::/32"), 65001).unwrap();

        let info = view.peer_info(id).unwrap();
        assert_eq!(info.v4_pfx_cnt, 1);
        assert_eq!(info.v6_pfx_cnt, 1);
        assert_eq!(view.pfx_count(Family::Ipv4), 1);
        assert_eq!(view.pfx_count(Family::Ipv6), 1);

        // repeat add overwrote the origin
        let entry = view.pfx_entry(&pfx("192.0.2.0/24")).unwrap();
        assert_eq!(entry.get(id).unwrap().orig_asn, 65002);
    }

    #[test]
    fn test_unknown_peer_rejected() {
        let mut view: View = View::new();
        assert!(view.add_pfx_peer(7, &pfx("192.0.2.0/24"), 65001).is_err());
        assert_eq!(view.pfx_count(Family::Ipv4), 0);
    }

    #[test]
    fn test_prefixes_shared_between_peers() {
        let mut view: View = View::new();
        let a = view.add_peer(&sig(1), PeerState::Established);
        let b = view.add_peer(&sig(2), PeerState::Established);
        view.add_pfx_peer(a, &pfx("192.0.2.0/24"), 65001).unwrap();
        view.add_pfx_peer(b, &pfx("192.0.2.0/24"), 65009).unwrap();

        assert_eq!(view.pfx_count(Family::Ipv4), 1);
        let entry = view.pfx_entry(&pfx("192.0.2.0/24")).unwrap();
        assert_eq!(entry.peer_count(), 2);
        assert_eq!(entry.get(a).unwrap().orig_asn, 65001);
        assert_eq!(entry.get(b).unwrap().orig_asn, 65009);
    }

    #[test]
    fn test_user_slots() {
        let mut view: View<String, u32, &'static str, bool> = View::new();
        let id = view.add_peer(&sig(1), PeerState::Established);
        let p = pfx("192.0.2.0/24");
        view.add_pfx_peer(id, &p, 65001).unwrap();

        assert!(view.set_user("state".to_string()).is_none());
        assert_eq!(view.set_user("new".to_string()).as_deref(), Some("state"));
        assert_eq!(view.user().map(String::as_str), Some("new"));

        assert!(view.set_peer_user(id, 7).is_none());
        assert_eq!(view.peer_user(id), Some(&7));

        assert!(view.set_pfx_user(&p, "pfx").is_none());
        assert_eq!(view.pfx_user(&p), Some(&"pfx"));

        assert!(view.set_pfx_peer_user(&p, id, true).is_none());
        assert_eq!(view.pfx_peer_user(&p, id), Some(&true));

        view.clear();
        assert!(view.user().is_none());
        assert_eq!(view.peer_count(), 0);
    }

    #[test]
    fn test_insert_peer_round_trip() {
        let mut view: View = View::new();
        view.insert_peer(3, sig(1), PeerState::Established).unwrap();
        assert_eq!(view.peer_sig(3), Some(&sig(1)));
        // conflicting binding rejected
        assert!(view.insert_peer(3, sig(2), PeerState::Idle).is_err());
    }

    #[test]
    fn test_clear_resets_everything() {
        let mut view: View = View::new();
        view.set_time(100);
        view.set_collector("rrc00");
        let id = view.add_peer(&sig(1), PeerState::Established);
        view.add_pfx_peer(id, &pfx("192.0.2.0/24"), 65001).unwrap();

        view.clear();
        assert_eq!(view.time(), 0);
        assert_eq!(view.collector(), "");
        assert_eq!(view.peer_count(), 0);
        assert_eq!(view.pfx_count(Family::Ipv4), 0);
        // ids restart after clear
        assert_eq!(view.add_peer(&sig(2), PeerState::Idle), 1);
    }
}
