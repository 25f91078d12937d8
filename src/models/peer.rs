use crate::error::WatcherError;
use num_enum::{IntoPrimitive, TryFromPrimitive};
use std::collections::HashMap;
use std::fmt::{Display, Formatter};
use std::net::IpAddr;

/// Dense 16-bit peer identifier allocated by a [`PeerSigMap`].
///
/// Id zero is reserved as "invalid" and never allocated.
pub type PeerId = u16;

/// Maximum accepted length of a collector name.
pub const COLLECTOR_NAME_MAX: usize = 128;

/// BGP finite-state-machine state of a peer.
///
/// Only `Established` peers contribute prefixes to a view; the other states
/// are retained as peer metadata.
#[derive(Debug, TryFromPrimitive, IntoPrimitive, Copy, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum PeerState {
    Unknown = 0,
    Idle = 1,
    Connect = 2,
    Active = 3,
    OpenSent = 4,
    OpenConfirm = 5,
    Established = 6,
    Null = 7,
}

/// Globally unique name of a peer: the collector it attaches to, its IP
/// address, and its AS number.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PeerSignature {
    pub collector: String,
    pub peer_ip: IpAddr,
    pub peer_asn: u32,
}

impl PeerSignature {
    pub fn new(collector: impl Into<String>, peer_ip: IpAddr, peer_asn: u32) -> Self {
        PeerSignature {
            collector: collector.into(),
            peer_ip,
            peer_asn,
        }
    }
}

impl Display for PeerSignature {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}|{}|{}", self.collector, self.peer_ip, self.peer_asn)
    }
}

/// Two-way interning map between peer signatures and dense peer ids.
///
/// Ids are allocated as `current_size + 1` on first sight and are stable for
/// the lifetime of the map. Each view or server owns its own map; the type
/// is deliberately not synchronized.
#[derive(Debug, Default, Clone)]
pub struct PeerSigMap {
    sig_id: HashMap<PeerSignature, PeerId>,
    id_sig: HashMap<PeerId, PeerSignature>,
}

impl PeerSigMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Interns `sig`, returning its id. A signature already in the map gets
    /// its existing id back.
    pub fn get_id(&mut self, sig: &PeerSignature) -> PeerId {
        if let Some(id) = self.sig_id.get(sig) {
            return *id;
        }
        let next_id = self.sig_id.len() as PeerId + 1;
        self.sig_id.insert(sig.clone(), next_id);
        self.id_sig.insert(next_id, sig.clone());
        next_id
    }

    pub fn get_sig(&self, id: PeerId) -> Option<&PeerSignature> {
        self.id_sig.get(&id)
    }

    /// Restores an explicit `id -> sig` binding, e.g. when rebuilding a map
    /// from a serialized view. Conflicting bindings are rejected.
    pub fn set(&mut self, id: PeerId, sig: PeerSignature) -> Result<(), WatcherError> {
        if id == 0 {
            return Err(WatcherError::Semantic("peer id zero is reserved".to_string()));
        }
        match (self.id_sig.get(&id), self.sig_id.get(&sig)) {
            (Some(existing), _) if *existing != sig => Err(WatcherError::Semantic(format!(
                "peer id {id} already bound to {existing}"
            ))),
            (_, Some(existing_id)) if *existing_id != id => Err(WatcherError::Semantic(format!(
                "peer {sig} already has id {existing_id}"
            ))),
            (Some(_), Some(_)) => Ok(()),
            _ => {
                self.sig_id.insert(sig.clone(), id);
                self.id_sig.insert(id, sig);
                Ok(())
            }
        }
    }

    pub fn len(&self) -> usize {
        debug_assert_eq!(self.sig_id.len(), self.id_sig.len());
        self.id_sig.len()
    }

    pub fn is_empty(&self) -> bool {
        self.id_sig.is_empty()
    }

    pub fn clear(&mut self) {
        self.sig_id.clear();
        self.id_sig.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = (PeerId, &PeerSignature)> {
        self.id_sig.iter().map(|(id, sig)| (*id, sig))
    }
}
