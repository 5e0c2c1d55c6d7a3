//! Node and link-layer addresses
//!
//! Every node is named by an IPv4 [`NodeAddr`]. Frames on the air are
//! addressed by a 6-byte [`LinkAddr`], which the engine learns lazily from
//! inbound traffic or resolves through an [`AddressResolver`].
//!
//! [`AddressResolver`]: crate::transport::AddressResolver

use std::fmt::{self, Display};
use std::net::Ipv4Addr;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::AddressError;

/// Network address of a mesh node
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeAddr(pub Ipv4Addr);

impl NodeAddr {
    /// Wire size of an encoded address
    pub const LEN: usize = 4;

    /// Create an address from its four octets
    pub const fn new(a: u8, b: u8, c: u8, d: u8) -> Self {
        Self(Ipv4Addr::new(a, b, c, d))
    }

    /// Address for a lettered simulation node: 'A' is 10.0.0.1, 'B' is 10.0.0.2, ...
    pub fn from_letter(c: char) -> Option<Self> {
        if c.is_ascii_uppercase() {
            Some(Self::new(10, 0, 0, c as u8 - b'A' + 1))
        } else {
            None
        }
    }

    /// Letter of a simulation address, if it is one
    pub fn letter(&self) -> Option<char> {
        let [a, b, c, d] = self.0.octets();
        if a == 10 && b == 0 && c == 0 && (1..=26).contains(&d) {
            Some((b'A' + d - 1) as char)
        } else {
            None
        }
    }

    /// The four address octets
    pub fn octets(&self) -> [u8; 4] {
        self.0.octets()
    }

    /// Short display form for logs (the letter for simulation nodes)
    pub fn short_id(&self) -> String {
        match self.letter() {
            Some(c) => c.to_string(),
            None => self.0.to_string(),
        }
    }
}

impl Display for NodeAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Ipv4Addr> for NodeAddr {
    fn from(ip: Ipv4Addr) -> Self {
        Self(ip)
    }
}

impl From<[u8; 4]> for NodeAddr {
    fn from(octets: [u8; 4]) -> Self {
        Self(Ipv4Addr::from(octets))
    }
}

impl FromStr for NodeAddr {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<Ipv4Addr>()
            .map(Self)
            .map_err(|_| AddressError::InvalidFormat(s.to_string()))
    }
}

/// Link-layer (Ethernet-style) address
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LinkAddr(pub [u8; 6]);

impl LinkAddr {
    /// The link-layer broadcast address
    pub const BROADCAST: LinkAddr = LinkAddr([0xff; 6]);

    /// Deterministic locally-administered address derived from a node address
    ///
    /// Used by the simulator and mocks, where nodes have no real hardware.
    pub fn for_node(node: NodeAddr) -> Self {
        let [a, b, c, d] = node.octets();
        Self([0x02, 0x00, a, b, c, d])
    }

    /// Create from a byte slice
    pub fn from_slice(bytes: &[u8]) -> Result<Self, AddressError> {
        let octets: [u8; 6] = bytes.try_into().map_err(|_| AddressError::InvalidLength {
            expected: 6,
            actual: bytes.len(),
        })?;
        Ok(Self(octets))
    }

    /// Whether this is the broadcast address
    pub fn is_broadcast(&self) -> bool {
        *self == Self::BROADCAST
    }
}

impl Display for LinkAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02x}:{b:02x}:{c:02x}:{d:02x}:{e:02x}:{g:02x}")
    }
}

impl FromStr for LinkAddr {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(':').collect();
        if parts.len() != 6 {
            return Err(AddressError::InvalidFormat(s.to_string()));
        }
        let mut octets = [0u8; 6];
        for (slot, part) in octets.iter_mut().zip(parts) {
            *slot = u8::from_str_radix(part, 16)
                .map_err(|_| AddressError::InvalidFormat(s.to_string()))?;
        }
        Ok(Self(octets))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_letter_addresses() {
        let a = NodeAddr::from_letter('A').unwrap();
        assert_eq!(a, NodeAddr::new(10, 0, 0, 1));
        assert_eq!(a.letter(), Some('A'));
        assert_eq!(a.short_id(), "A");

        assert!(NodeAddr::from_letter('a').is_none());
        assert!(NodeAddr::from_letter('1').is_none());

        let z = NodeAddr::from_letter('Z').unwrap();
        assert_eq!(z.letter(), Some('Z'));
    }

    #[test]
    fn test_non_letter_short_id() {
        let addr = NodeAddr::new(192, 168, 1, 7);
        assert_eq!(addr.letter(), None);
        assert_eq!(addr.short_id(), "192.168.1.7");
    }

    #[test]
    fn test_node_addr_parse() {
        let addr: NodeAddr = "10.0.0.3".parse().unwrap();
        assert_eq!(addr.letter(), Some('C'));
        assert!("10.0.0".parse::<NodeAddr>().is_err());
    }

    #[test]
    fn test_link_addr_display_and_parse() {
        let node = NodeAddr::new(10, 0, 0, 2);
        let link = LinkAddr::for_node(node);
        let text = link.to_string();
        assert_eq!(text, "02:00:0a:00:00:02");
        assert_eq!(text.parse::<LinkAddr>().unwrap(), link);
        assert!("02:00".parse::<LinkAddr>().is_err());
        assert!("02:00:0a:00:00:zz".parse::<LinkAddr>().is_err());
    }

    #[test]
    fn test_link_addr_from_slice() {
        assert!(LinkAddr::from_slice(&[1, 2, 3, 4, 5, 6]).is_ok());
        assert_eq!(
            LinkAddr::from_slice(&[1, 2, 3]),
            Err(AddressError::InvalidLength {
                expected: 6,
                actual: 3
            })
        );
        assert!(LinkAddr::BROADCAST.is_broadcast());
        assert!(!LinkAddr::for_node(NodeAddr::new(10, 0, 0, 1)).is_broadcast());
    }
}
