/*!
Wire envelope and record codecs for the watcher protocol.

A message is a sequence of length-prefixed frames. The first application
frame carries the envelope type byte; `DATA` envelopes follow with a
sequence number and a data sub-type byte. All integers are network byte
order; IP addresses travel as raw 4- or 16-byte frames with the family
inferred from the length.
*/
pub mod transport;

use crate::error::WatcherError;
use crate::models::{PeerState, Prefix, COLLECTOR_NAME_MAX};
use bitflags::bitflags;
use bytes::{BufMut, Bytes, BytesMut};
use num_enum::{IntoPrimitive, TryFromPrimitive};
use smallvec::SmallVec;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// One transport frame.
pub type Frame = Bytes;

/// A multipart message. Most messages are a handful of frames; serialized
/// views run much longer.
pub type Message = SmallVec<[Frame; 8]>;

/// Envelope type carried in the first application frame.
#[derive(Debug, TryFromPrimitive, IntoPrimitive, Copy, Clone, PartialEq, Eq)]
#[repr(u8)]
pub enum MsgType {
    Unknown = 0,
    Ready = 1,
    Term = 2,
    Heartbeat = 3,
    Data = 4,
    Reply = 5,
}

/// Sub-type of a `DATA` envelope.
#[derive(Debug, TryFromPrimitive, IntoPrimitive, Copy, Clone, PartialEq, Eq)]
#[repr(u8)]
pub enum DataMsgType {
    TableBegin = 1,
    TableEnd = 2,
    PfxRecord = 3,
    PeerRecord = 4,
}

/// Kind of table a begin/end envelope refers to.
#[derive(Debug, TryFromPrimitive, IntoPrimitive, Copy, Clone, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TableType {
    Prefix = 1,
    Peer = 2,
}

bitflags! {
    /// Classification of a published view; consumers advertise the union of
    /// classes they want to receive.
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
    #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
    pub struct ViewInterests: u8 {
        /// The first view observed at full-feed size.
        const FIRST_FULL = 0b001;
        /// Every subsequent full-feed view.
        const FULL = 0b010;
        /// A view below the full-feed thresholds.
        const PARTIAL = 0b100;
    }
}

/* ---------------- frame builders ---------------- */

pub fn frame_u8(v: u8) -> Frame {
    Bytes::copy_from_slice(&[v])
}

pub fn frame_u16(v: u16) -> Frame {
    let mut buf = BytesMut::with_capacity(2);
    buf.put_u16(v);
    buf.freeze()
}

pub fn frame_u32(v: u32) -> Frame {
    let mut buf = BytesMut::with_capacity(4);
    buf.put_u32(v);
    buf.freeze()
}

pub fn frame_str(s: &str) -> Frame {
    Bytes::copy_from_slice(s.as_bytes())
}

/// Encodes an IP address as a 4- or 16-byte frame.
pub fn frame_addr(addr: &IpAddr) -> Frame {
    match addr {
        IpAddr::V4(a) => Bytes::copy_from_slice(&a.octets()),
        IpAddr::V6(a) => Bytes::copy_from_slice(&a.octets()),
    }
}

/* ---------------- frame reader ---------------- */

/// Cursor over the frames of a received message. Every accessor verifies
/// the frame length and rejects mismatches with a `Protocol` error.
pub struct FrameReader<'a> {
    frames: &'a [Frame],
    pos: usize,
}

impl<'a> FrameReader<'a> {
    pub fn new(frames: &'a [Frame]) -> Self {
        FrameReader { frames, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.frames.len() - self.pos
    }

    pub fn pop_frame(&mut self) -> Result<&'a Frame, WatcherError> {
        let frame = self
            .frames
            .get(self.pos)
            .ok_or_else(|| WatcherError::Protocol("message truncated".to_string()))?;
        self.pos += 1;
        Ok(frame)
    }

    fn pop_sized(&mut self, len: usize, what: &str) -> Result<&'a Frame, WatcherError> {
        let frame = self.pop_frame()?;
        if frame.len() != len {
            return Err(WatcherError::Protocol(format!(
                "bad {what} frame length {} (expected {len})",
                frame.len()
            )));
        }
        Ok(frame)
    }

    pub fn pop_u8(&mut self, what: &str) -> Result<u8, WatcherError> {
        Ok(self.pop_sized(1, what)?[0])
    }

    pub fn pop_u16(&mut self, what: &str) -> Result<u16, WatcherError> {
        let frame = self.pop_sized(2, what)?;
        Ok(u16::from_be_bytes([frame[0], frame[1]]))
    }

    pub fn pop_u32(&mut self, what: &str) -> Result<u32, WatcherError> {
        let frame = self.pop_sized(4, what)?;
        Ok(u32::from_be_bytes([frame[0], frame[1], frame[2], frame[3]]))
    }

    /// Pops an address frame; 4 bytes means IPv4, 16 means IPv6.
    pub fn pop_addr(&mut self) -> Result<IpAddr, WatcherError> {
        let frame = self.pop_frame()?;
        match frame.len() {
            4 => {
                let mut buf = [0u8; 4];
                buf.copy_from_slice(frame);
                Ok(IpAddr::V4(Ipv4Addr::from(buf)))
            }
            16 => {
                let mut buf = [0u8; 16];
                buf.copy_from_slice(frame);
                Ok(IpAddr::V6(Ipv6Addr::from(buf)))
            }
            n => Err(WatcherError::Protocol(format!("invalid address frame length {n}"))),
        }
    }

    pub fn pop_str(&mut self, what: &str) -> Result<String, WatcherError> {
        let frame = self.pop_frame()?;
        if frame.len() > COLLECTOR_NAME_MAX {
            return Err(WatcherError::Protocol(format!(
                "{what} string too long ({} bytes)",
                frame.len()
            )));
        }
        String::from_utf8(frame.to_vec())
            .map_err(|_| WatcherError::Protocol(format!("{what} string is not utf-8")))
    }
}

/// Reads the envelope type of a message's first frame.
pub fn envelope_type(reader: &mut FrameReader) -> Result<MsgType, WatcherError> {
    Ok(MsgType::try_from(reader.pop_u8("envelope type")?)?)
}

pub fn interests_from_byte(byte: u8) -> Result<ViewInterests, WatcherError> {
    ViewInterests::from_bits(byte)
        .ok_or_else(|| WatcherError::Protocol(format!("invalid interest mask {byte:#04x}")))
}

/* ---------------- records ---------------- */

/// One prefix observation inside a producer's table burst.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PfxRecord {
    pub prefix: Prefix,
    pub peer_ip: IpAddr,
    pub orig_asn: u32,
    pub collector: String,
}

impl PfxRecord {
    pub fn append(&self, msg: &mut Message) {
        msg.push(frame_addr(&self.prefix.addr()));
        msg.push(frame_u8(self.prefix.mask_len()));
        msg.push(frame_addr(&self.peer_ip));
        msg.push(frame_u32(self.orig_asn));
        msg.push(frame_str(&self.collector));
    }

    pub fn parse(reader: &mut FrameReader) -> Result<Self, WatcherError> {
        let addr = reader.pop_addr()?;
        let mask_len = reader.pop_u8("prefix mask")?;
        let prefix = Prefix::new(addr, mask_len)
            .ok_or_else(|| WatcherError::Protocol(format!("invalid mask length {mask_len}")))?;
        let peer_ip = reader.pop_addr()?;
        let orig_asn = reader.pop_u32("origin asn")?;
        let collector = reader.pop_str("collector name")?;
        Ok(PfxRecord {
            prefix,
            peer_ip,
            orig_asn,
            collector,
        })
    }
}

/// One peer observation inside a producer's table burst.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerRecord {
    pub peer_ip: IpAddr,
    pub state: PeerState,
    pub asn: u32,
}

impl PeerRecord {
    pub fn append(&self, msg: &mut Message) {
        msg.push(frame_addr(&self.peer_ip));
        msg.push(frame_u8(self.state.into()));
        msg.push(frame_u32(self.asn));
    }

    pub fn parse(reader: &mut FrameReader) -> Result<Self, WatcherError> {
        let peer_ip = reader.pop_addr()?;
        let state = PeerState::try_from(reader.pop_u8("peer state")?)?;
        let asn = reader.pop_u32("peer asn")?;
        Ok(PeerRecord {
            peer_ip,
            state,
            asn,
        })
    }
}

/// Opens a table burst for one `(collector, time)` pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableBegin {
    pub table: TableType,
    pub time: u32,
    pub collector: String,
    pub peer_cnt: u16,
}

impl TableBegin {
    pub fn append(&self, msg: &mut Message) {
        msg.push(frame_u8(self.table.into()));
        msg.push(frame_u32(self.time));
        msg.push(frame_str(&self.collector));
        msg.push(frame_u16(self.peer_cnt));
    }

    pub fn parse(reader: &mut FrameReader) -> Result<Self, WatcherError> {
        let table = TableType::try_from(reader.pop_u8("table type")?)?;
        let time = reader.pop_u32("table time")?;
        let collector = reader.pop_str("collector name")?;
        let peer_cnt = reader.pop_u16("peer count")?;
        Ok(TableBegin {
            table,
            time,
            collector,
            peer_cnt,
        })
    }
}

/// Closes a table burst; the time must echo the matching begin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableEnd {
    pub table: TableType,
    pub time: u32,
}

impl TableEnd {
    pub fn append(&self, msg: &mut Message) {
        msg.push(frame_u8(self.table.into()));
        msg.push(frame_u32(self.time));
    }

    pub fn parse(reader: &mut FrameReader) -> Result<Self, WatcherError> {
        let table = TableType::try_from(reader.pop_u8("table type")?)?;
        let time = reader.pop_u32("table time")?;
        Ok(TableEnd { table, time })
    }
}

/// Server acknowledgment of one sequenced request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reply {
    pub seq: u32,
    pub rc: u8,
}

impl Reply {
    pub fn append(&self, msg: &mut Message) {
        msg.push(frame_u32(self.seq));
        msg.push(frame_u8(self.rc));
    }

    pub fn parse(reader: &mut FrameReader) -> Result<Self, WatcherError> {
        let seq = reader.pop_u32("sequence number")?;
        let rc = reader.pop_u8("return code")?;
        Ok(Reply { seq, rc })
    }
}
