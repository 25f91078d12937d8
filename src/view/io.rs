/*!
Serialization of whole views into wire frames.

A published view travels as a flat frame sequence: header, peer table, then
one `(prefix, peer, origin)` cell per observation, per family. User-data
slots never cross the wire.
*/
use crate::error::WatcherError;
use crate::models::{Family, PeerSignature, PeerState, Prefix};
use crate::msg::{frame_addr, frame_str, frame_u16, frame_u32, frame_u8, FrameReader, Message};
use crate::view::View;

/// Appends the full contents of `view` to `msg`.
pub fn serialize_view<VU, PU, XU, CU>(view: &View<VU, PU, XU, CU>, msg: &mut Message) {
    msg.push(frame_u32(view.time()));
    msg.push(frame_str(view.collector()));

    let mut it = view.iter();
    msg.push(frame_u16(it.peer_size() as u16));
    let mut peer = it.first_peer();
    while let Some(id) = peer {
        // peers are interned before serialization, so both lookups hit
        if let (Some(sig), Some(info)) = (it.peer_sig(), it.peer_info()) {
            msg.push(frame_u16(id));
            msg.push(frame_addr(&sig.peer_ip));
            msg.push(frame_u32(sig.peer_asn));
            msg.push(frame_u8(info.state.into()));
        }
        peer = it.next_peer();
    }

    for family in [Family::Ipv4, Family::Ipv6] {
        let cells: u32 = view
            .pfx_table(family)
            .values()
            .map(|e| e.peer_count() as u32)
            .sum();
        msg.push(frame_u32(cells));

        let mut pfx = it.first_pfx(family);
        while let Some(p) = pfx {
            let mut cell = it.first_pfx_peer();
            while let Some((peer_id, info)) = cell {
                msg.push(frame_addr(&p.addr()));
                msg.push(frame_u8(p.mask_len()));
                msg.push(frame_u16(peer_id));
                msg.push(frame_u32(info.orig_asn));
                cell = it.next_pfx_peer();
            }
            pfx = it.next_pfx(family);
        }
    }
}

/// Decodes a serialized view into `view`, replacing its previous contents.
pub fn deserialize_view<VU, PU, XU, CU>(
    reader: &mut FrameReader,
    view: &mut View<VU, PU, XU, CU>,
) -> Result<(), WatcherError> {
    view.clear();
    view.set_time(reader.pop_u32("view time")?);
    let collector = reader.pop_str("collector name")?;
    view.set_collector(collector.clone());

    let peer_cnt = reader.pop_u16("peer count")?;
    for _ in 0..peer_cnt {
        let id = reader.pop_u16("peer id")?;
        let peer_ip = reader.pop_addr()?;
        let peer_asn = reader.pop_u32("peer asn")?;
        let state = PeerState::try_from(reader.pop_u8("peer state")?)?;
        view.insert_peer(id, PeerSignature::new(collector.clone(), peer_ip, peer_asn), state)?;
    }

    for _family in [Family::Ipv4, Family::Ipv6] {
        let cells = reader.pop_u32("cell count")?;
        for _ in 0..cells {
            let addr = reader.pop_addr()?;
            let mask_len = reader.pop_u8("prefix mask")?;
            let pfx = Prefix::new(addr, mask_len).ok_or_else(|| {
                WatcherError::Protocol(format!("invalid mask length {mask_len}"))
            })?;
            let peer_id = reader.pop_u16("peer id")?;
            let orig_asn = reader.pop_u32("origin asn")?;
            view.add_pfx_peer(peer_id, &pfx, orig_asn)?;
        }
    }
    Ok(())
}
