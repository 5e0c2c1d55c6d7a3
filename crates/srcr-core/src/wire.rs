//! Protocol packets and their on-air encoding
//!
//! Four message kinds share one header. Version 1 layout, integers
//! big-endian:
//!
//! ```text
//! off  size  field
//! 0    1     version (1)
//! 1    1     type: 1 query, 2 reply, 3 data, 4 link error
//! 2    1     flags (reserved, 0)
//! 3    1     cursor: index of the hop the frame is addressed to (0 for queries)
//! 4    4     sequence (0 for data and link errors)
//! 8    4     origin address
//! 12   4     destination address
//! 16   1     hop count n (1..=255)
//! 17   2     body length b
//! 19   12*n  hops: address | forward metric u32 | reverse metric u32
//! ..   b     body: data payload, or the failed neighbor of a link error
//! ```
//!
//! Replies and link errors travel from the end of the hop list back towards
//! its start, so their cursor decreases; data travels forward.

use std::fmt::{self, Display};

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::addr::NodeAddr;
use crate::error::WireError;
use crate::path::{Hop, Metric};

/// Current wire format version
pub const WIRE_VERSION: u8 = 1;

/// Fixed header size in bytes
pub const HEADER_LEN: usize = 19;

/// Encoded size of one hop entry
pub const HOP_LEN: usize = 12;

/// Largest hop list the format can carry
pub const MAX_WIRE_HOPS: usize = u8::MAX as usize;

/// Largest body the format can carry
pub const MAX_BODY_LEN: usize = u16::MAX as usize;

/// Discriminant of a protocol packet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PacketType {
    Query,
    Reply,
    Data,
    LinkError,
}

impl PacketType {
    /// Wire code of this type
    pub fn code(self) -> u8 {
        match self {
            PacketType::Query => 1,
            PacketType::Reply => 2,
            PacketType::Data => 3,
            PacketType::LinkError => 4,
        }
    }
}

impl TryFrom<u8> for PacketType {
    type Error = WireError;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            1 => Ok(PacketType::Query),
            2 => Ok(PacketType::Reply),
            3 => Ok(PacketType::Data),
            4 => Ok(PacketType::LinkError),
            other => Err(WireError::UnknownType(other)),
        }
    }
}

impl Display for PacketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PacketType::Query => write!(f, "query"),
            PacketType::Reply => write!(f, "reply"),
            PacketType::Data => write!(f, "data"),
            PacketType::LinkError => write!(f, "link-error"),
        }
    }
}

/// Flooded route request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryPacket {
    /// Per-origin sequence number
    pub seq: u32,
    /// Node that started the discovery
    pub origin: NodeAddr,
    /// Node being searched for
    pub target: NodeAddr,
    /// Nodes the query has crossed so far, origin first
    pub hops: Vec<Hop>,
}

impl QueryPacket {
    /// The neighbor this copy was received from
    pub fn last_hop(&self) -> Option<NodeAddr> {
        self.hops.last().map(|h| h.addr)
    }
}

/// Source-routed answer to a query
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyPacket {
    /// Sequence of the query being answered
    pub seq: u32,
    /// Originator of the query (where the reply is going)
    pub origin: NodeAddr,
    /// The destination that answered
    pub target: NodeAddr,
    /// Discovered route, query origin first
    pub hops: Vec<Hop>,
    /// Index of the hop this frame is addressed to
    pub cursor: u8,
}

/// Application payload riding a source route
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataPacket {
    pub source: NodeAddr,
    pub destination: NodeAddr,
    /// Route chosen by the source, source first
    pub hops: Vec<Hop>,
    /// Index of the hop this frame is addressed to
    pub cursor: u8,
    pub payload: Bytes,
}

/// Notification that a data packet hit a broken link
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkErrorPacket {
    /// Source of the failed data packet, which receives this notification
    pub source: NodeAddr,
    /// Destination the data packet could not reach
    pub destination: NodeAddr,
    /// Neighbor the reporting node could not forward to
    pub failed: NodeAddr,
    /// Route of the failed data packet, source first
    pub hops: Vec<Hop>,
    /// Index of the hop this frame is addressed to
    pub cursor: u8,
}

impl LinkErrorPacket {
    /// The node that detected the failure: the last hop before `failed`
    pub fn reporter(&self) -> Option<NodeAddr> {
        let idx = self.hops.iter().position(|h| h.addr == self.failed)?;
        idx.checked_sub(1).map(|i| self.hops[i].addr)
    }
}

/// A decoded protocol message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    Query(QueryPacket),
    Reply(ReplyPacket),
    Data(DataPacket),
    LinkError(LinkErrorPacket),
}

impl Packet {
    /// Kind of this packet
    pub fn packet_type(&self) -> PacketType {
        match self {
            Packet::Query(_) => PacketType::Query,
            Packet::Reply(_) => PacketType::Reply,
            Packet::Data(_) => PacketType::Data,
            Packet::LinkError(_) => PacketType::LinkError,
        }
    }

    /// Hop list carried by this packet
    pub fn hops(&self) -> &[Hop] {
        match self {
            Packet::Query(p) => &p.hops,
            Packet::Reply(p) => &p.hops,
            Packet::Data(p) => &p.hops,
            Packet::LinkError(p) => &p.hops,
        }
    }

    /// Size of the encoded frame
    pub fn encoded_len(&self) -> usize {
        HEADER_LEN + self.hops().len() * HOP_LEN + self.body_len()
    }

    fn body_len(&self) -> usize {
        match self {
            Packet::Data(p) => p.payload.len(),
            Packet::LinkError(_) => NodeAddr::LEN,
            Packet::Query(_) | Packet::Reply(_) => 0,
        }
    }

    /// Encode into a wire frame
    pub fn encode(&self) -> Result<Bytes, WireError> {
        let (cursor, seq, origin, destination) = match self {
            Packet::Query(p) => (0, p.seq, p.origin, p.target),
            Packet::Reply(p) => (p.cursor, p.seq, p.origin, p.target),
            Packet::Data(p) => (p.cursor, 0, p.source, p.destination),
            Packet::LinkError(p) => (p.cursor, 0, p.source, p.destination),
        };
        let hops = self.hops();
        if hops.is_empty() {
            return Err(WireError::EmptyHopList);
        }
        if hops.len() > MAX_WIRE_HOPS {
            return Err(WireError::TooManyHops(hops.len()));
        }
        if cursor as usize >= hops.len() {
            return Err(WireError::CursorOutOfRange {
                cursor,
                hops: hops.len(),
            });
        }
        let body_len = self.body_len();
        if body_len > MAX_BODY_LEN {
            return Err(WireError::BodyTooLarge {
                size: body_len,
                max: MAX_BODY_LEN,
            });
        }

        let mut buf = BytesMut::with_capacity(self.encoded_len());
        buf.put_u8(WIRE_VERSION);
        buf.put_u8(self.packet_type().code());
        buf.put_u8(0);
        buf.put_u8(cursor);
        buf.put_u32(seq);
        buf.put_slice(&origin.octets());
        buf.put_slice(&destination.octets());
        buf.put_u8(hops.len() as u8);
        buf.put_u16(body_len as u16);
        for hop in hops {
            buf.put_slice(&hop.addr.octets());
            buf.put_u32(hop.fwd_metric);
            buf.put_u32(hop.rev_metric);
        }
        match self {
            Packet::Data(p) => buf.put_slice(&p.payload),
            Packet::LinkError(p) => buf.put_slice(&p.failed.octets()),
            Packet::Query(_) | Packet::Reply(_) => {}
        }
        Ok(buf.freeze())
    }

    /// Decode a wire frame
    pub fn decode(frame: &[u8]) -> Result<Self, WireError> {
        if frame.len() < HEADER_LEN {
            return Err(WireError::Truncated {
                needed: HEADER_LEN,
                available: frame.len(),
            });
        }
        let mut buf = frame;
        let version = buf.get_u8();
        if version != WIRE_VERSION {
            return Err(WireError::UnsupportedVersion(version));
        }
        let kind = PacketType::try_from(buf.get_u8())?;
        let _flags = buf.get_u8();
        let cursor = buf.get_u8();
        let seq = buf.get_u32();
        let origin = read_addr(&mut buf);
        let destination = read_addr(&mut buf);
        let hop_count = buf.get_u8() as usize;
        let body_len = buf.get_u16() as usize;

        if hop_count == 0 {
            return Err(WireError::EmptyHopList);
        }
        let needed = hop_count * HOP_LEN + body_len;
        if buf.remaining() < needed {
            return Err(WireError::Truncated {
                needed: HEADER_LEN + needed,
                available: frame.len(),
            });
        }
        if buf.remaining() > needed {
            return Err(WireError::TrailingBytes(buf.remaining() - needed));
        }
        if cursor as usize >= hop_count {
            return Err(WireError::CursorOutOfRange {
                cursor,
                hops: hop_count,
            });
        }

        let mut hops = Vec::with_capacity(hop_count);
        for _ in 0..hop_count {
            let addr = read_addr(&mut buf);
            let fwd_metric: Metric = buf.get_u32();
            let rev_metric: Metric = buf.get_u32();
            hops.push(Hop::new(addr, fwd_metric, rev_metric));
        }
        let body = Bytes::copy_from_slice(&buf[..body_len]);

        let packet = match kind {
            PacketType::Query => Packet::Query(QueryPacket {
                seq,
                origin,
                target: destination,
                hops,
            }),
            PacketType::Reply => Packet::Reply(ReplyPacket {
                seq,
                origin,
                target: destination,
                hops,
                cursor,
            }),
            PacketType::Data => Packet::Data(DataPacket {
                source: origin,
                destination,
                hops,
                cursor,
                payload: body,
            }),
            PacketType::LinkError => {
                if body.len() != NodeAddr::LEN {
                    return Err(WireError::InvalidBody {
                        kind: "link error",
                        len: body.len(),
                    });
                }
                let failed = NodeAddr::from([body[0], body[1], body[2], body[3]]);
                Packet::LinkError(LinkErrorPacket {
                    source: origin,
                    destination,
                    failed,
                    hops,
                    cursor,
                })
            }
        };
        Ok(packet)
    }
}

fn read_addr(buf: &mut &[u8]) -> NodeAddr {
    let mut octets = [0u8; 4];
    buf.copy_to_slice(&mut octets);
    NodeAddr::from(octets)
}
