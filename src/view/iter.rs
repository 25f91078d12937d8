use crate::models::{Family, PeerId, PeerSignature, Prefix};
use crate::view::{PeerInfo, PeerPfxInfo, View};
use itertools::Itertools;

/// Fluent, seekable iterator over the fields of a [`View`].
///
/// Three cursor levels exist: peers, per-family prefixes, and the peers of
/// the currently seeked prefix. Seeking a prefix cursor implicitly resets
/// the prefix-peer cursor to that prefix. Iteration order is sorted (peer
/// ids ascending, prefixes in address order) so a view replays
/// deterministically.
pub struct ViewIter<'a, VU = (), PU = (), XU = (), CU = ()> {
    view: &'a View<VU, PU, XU, CU>,
    peer_ids: Vec<PeerId>,
    peer_pos: usize,
    v4: Vec<Prefix>,
    v4_pos: usize,
    v6: Vec<Prefix>,
    v6_pos: usize,
    cell_pfx: Option<Prefix>,
    cell_ids: Vec<PeerId>,
    cell_pos: usize,
}

impl<'a, VU, PU, XU, CU> ViewIter<'a, VU, PU, XU, CU> {
    pub(crate) fn new(view: &'a View<VU, PU, XU, CU>) -> Self {
        let peer_ids = view.peer_ids().sorted().collect_vec();
        let v4 = view
            .pfx_table(Family::Ipv4)
            .keys()
            .copied()
            .sorted_by_key(|p| p.net())
            .collect_vec();
        let v6 = view
            .pfx_table(Family::Ipv6)
            .keys()
            .copied()
            .sorted_by_key(|p| p.net())
            .collect_vec();
        ViewIter {
            view,
            peer_ids,
            peer_pos: 0,
            v4,
            v4_pos: 0,
            v6,
            v6_pos: 0,
            cell_pfx: None,
            cell_ids: Vec::new(),
            cell_pos: 0,
        }
    }

    /* ---------------- peer field ---------------- */

    pub fn peer_size(&self) -> usize {
        self.peer_ids.len()
    }

    pub fn first_peer(&mut self) -> Option<PeerId> {
        self.peer_pos = 0;
        self.peer()
    }

    pub fn next_peer(&mut self) -> Option<PeerId> {
        if self.peer_pos < self.peer_ids.len() {
            self.peer_pos += 1;
        }
        self.peer()
    }

    pub fn peer_is_end(&self) -> bool {
        self.peer_pos >= self.peer_ids.len()
    }

    /// The peer id under the cursor.
    pub fn peer(&self) -> Option<PeerId> {
        self.peer_ids.get(self.peer_pos).copied()
    }

    pub fn peer_info(&self) -> Option<&'a PeerInfo<PU>> {
        self.view.peer_info(self.peer()?)
    }

    pub fn peer_sig(&self) -> Option<&'a PeerSignature> {
        self.view.peer_sig(self.peer()?)
    }

    /* ---------------- prefix fields ---------------- */

    pub fn pfx_size(&self, family: Family) -> usize {
        match family {
            Family::Ipv4 => self.v4.len(),
            Family::Ipv6 => self.v6.len(),
        }
    }

    pub fn first_pfx(&mut self, family: Family) -> Option<Prefix> {
        match family {
            Family::Ipv4 => self.v4_pos = 0,
            Family::Ipv6 => self.v6_pos = 0,
        }
        self.seek_cells(family);
        self.pfx(family)
    }

    pub fn next_pfx(&mut self, family: Family) -> Option<Prefix> {
        match family {
            Family::Ipv4 => {
                if self.v4_pos < self.v4.len() {
                    self.v4_pos += 1;
                }
            }
            Family::Ipv6 => {
                if self.v6_pos < self.v6.len() {
                    self.v6_pos += 1;
                }
            }
        }
        self.seek_cells(family);
        self.pfx(family)
    }

    pub fn pfx_is_end(&self, family: Family) -> bool {
        match family {
            Family::Ipv4 => self.v4_pos >= self.v4.len(),
            Family::Ipv6 => self.v6_pos >= self.v6.len(),
        }
    }

    /// The prefix under the cursor of the given family.
    pub fn pfx(&self, family: Family) -> Option<Prefix> {
        match family {
            Family::Ipv4 => self.v4.get(self.v4_pos).copied(),
            Family::Ipv6 => self.v6.get(self.v6_pos).copied(),
        }
    }

    pub fn first_v4pfx(&mut self) -> Option<Prefix> {
        self.first_pfx(Family::Ipv4)
    }

    pub fn next_v4pfx(&mut self) -> Option<Prefix> {
        self.next_pfx(Family::Ipv4)
    }

    pub fn first_v6pfx(&mut self) -> Option<Prefix> {
        self.first_pfx(Family::Ipv6)
    }

    pub fn next_v6pfx(&mut self) -> Option<Prefix> {
        self.next_pfx(Family::Ipv6)
    }

    /* ---------------- (prefix, peer) field ---------------- */

    /// Re-anchors the cell cursor on the prefix currently seeked in
    /// `family`.
    fn seek_cells(&mut self, family: Family) {
        self.cell_pfx = self.pfx(family);
        self.cell_ids.clear();
        self.cell_pos = 0;
        if let Some(pfx) = self.cell_pfx {
            if let Some(entry) = self.view.pfx_entry(&pfx) {
                self.cell_ids = entry.peers().map(|(id, _)| id).sorted().collect_vec();
            }
        }
    }

    pub fn pfx_peer_size(&self) -> usize {
        self.cell_ids.len()
    }

    pub fn first_pfx_peer(&mut self) -> Option<(PeerId, &'a PeerPfxInfo<CU>)> {
        self.cell_pos = 0;
        self.pfx_peer()
    }

    pub fn next_pfx_peer(&mut self) -> Option<(PeerId, &'a PeerPfxInfo<CU>)> {
        if self.cell_pos < self.cell_ids.len() {
            self.cell_pos += 1;
        }
        self.pfx_peer()
    }

    pub fn pfx_peer_is_end(&self) -> bool {
        self.cell_pos >= self.cell_ids.len()
    }

    /// The `(peer, observation)` cell under the cursor.
    pub fn pfx_peer(&self) -> Option<(PeerId, &'a PeerPfxInfo<CU>)> {
        let id = *self.cell_ids.get(self.cell_pos)?;
        let pfx = self.cell_pfx.as_ref()?;
        let info = self.view.pfx_entry(pfx)?.get(id)?;
        Some((id, info))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{PeerSignature, PeerState};
    use std::net::IpAddr;
    use std::str::FromStr;

    fn build_view() -> View {
        let mut view: View = View::new();
        view.set_time(100);
        view.set_collector("rrc00");
        let a = view.add_peer(
            &PeerSignature::new("rrc00", "10.0.0.1".parse::<IpAddr>().unwrap(), 65001),
            PeerState::Established,
        );
        let b = view.add_peer(
            &PeerSignature::new("rrc00", "10.0.0.2".parse::<IpAddr>().unwrap(), 65002),
            PeerState::Established,
        );
        for (peer, pfx, asn) in [
            (a, "192.0.2.0/24", 64500),
            (a, "198.51.100.0/24", 64501),
            (b, "192.0.2.0/24", 64502),
            (a, "2001:db8::/32", 64503),
        ] {
            view.add_pfx_peer(peer, &Prefix::from_str(pfx).unwrap(), asn)
                .unwrap();
        }
        view
    }

    #[test]
    fn test_peer_field() {
        let view = build_view();
        let mut it = view.iter();
        assert_eq!(it.peer_size(), 2);

        let mut seen = Vec::new();
        let mut cur = it.first_peer();
        while let Some(id) = cur {
            seen.push(id);
            cur = it.next_peer();
        }
        assert!(it.peer_is_end());
        assert_eq!(seen, vec![1, 2]);
    }

    #[test]
    fn test_pfx_fields() {
        let view = build_view();
        let mut it = view.iter();
        assert_eq!(it.pfx_size(Family::Ipv4), 2);
        assert_eq!(it.pfx_size(Family::Ipv6), 1);

        let mut v4 = Vec::new();
        let mut cur = it.first_v4pfx();
        while let Some(p) = cur {
            v4.push(p.to_string());
            cur = it.next_v4pfx();
        }
        assert_eq!(v4, vec!["192.0.2.0/24".to_string(), "198.51.100.0/24".to_string()]);

        assert_eq!(it.first_v6pfx().unwrap().to_string(), "2001:db8::/32");
        assert!(it.next_v6pfx().is_none());
        assert!(it.pfx_is_end(Family::Ipv6));
    }

    #[test]
    fn test_pfx_seek_resets_cells() {
        let view = build_view();
        let mut it = view.iter();

        // 192.0.2.0/24 is observed by both peers
        it.first_v4pfx();
        assert_eq!(it.pfx_peer_size(), 2);
        let (id, info) = it.first_pfx_peer().unwrap();
        assert_eq!(id, 1);
        assert_eq!(info.orig_asn, 64500);
        let (id, info) = it.next_pfx_peer().unwrap();
        assert_eq!(id, 2);
        assert_eq!(info.orig_asn, 64502);
        assert!(it.next_pfx_peer().is_none());
        assert!(it.pfx_peer_is_end());

        // seeking the outer cursor re-anchors the cell cursor
        it.next_v4pfx();
        assert_eq!(it.pfx_peer_size(), 1);
        let (id, info) = it.first_pfx_peer().unwrap();
        assert_eq!(id, 1);
        assert_eq!(info.orig_asn, 64501);
    }

    #[test]
    fn test_cells_match_producer_records() {
        let view = build_view();
        let mut it = view.iter();

        // distinct peers per v4 prefix must reproduce the insert sequence
        let mut cells = 0;
        let mut cur = it.first_v4pfx();
        while cur.is_some() {
            let mut cell = it.first_pfx_peer();
            while cell.is_some() {
                cells += 1;
                cell = it.next_pfx_peer();
            }
            cur = it.next_v4pfx();
        }
        assert_eq!(cells, 3);
    }

    #[test]
    fn test_empty_view() {
        let view: View = View::new();
        let mut it = view.iter();
        assert!(it.first_peer().is_none());
        assert!(it.first_v4pfx().is_none());
        assert!(it.first_pfx_peer().is_none());
        assert_eq!(it.peer_size(), 0);
        assert!(it.peer_is_end());
    }
}
