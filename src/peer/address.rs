// https://github.com/jonhoo/codecrafters-bittorrent-rust/blob/master/src/tracker.rs
use serde::de::{self, Deserialize, Deserializer, Visitor};
use serde::ser::{Serialize, Serializer};
use std::fmt;
use std::net::{Ipv4Addr, SocketAddrV4};

/// Compact peer list: 6 bytes per peer, 4-byte IPv4 address followed by a
/// 2-byte big-endian port (SPEC_FULL.md §6.3).
#[derive(Debug, Clone, PartialEq)]
pub struct PeerAddresses(pub Vec<SocketAddrV4>);

impl PeerAddresses {
    pub fn iter(&self) -> std::slice::Iter<'_, SocketAddrV4> {
        self.0.iter()
    }
}

struct PeerAddressesVisitor;

impl<'de> Visitor<'de> for PeerAddressesVisitor {
    type Value = PeerAddresses;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("6 bytes, the first 4 bytes are a peer's IP address and the last 2 are a peer's port number")
    }

    fn visit_bytes<E>(self, v: &[u8]) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        if !v.len().is_multiple_of(6) {
            return Err(E::custom(format!("length is {}", v.len())));
        }
        Ok(PeerAddresses(
            v.chunks_exact(6)
                .map(|slice_6| {
                    SocketAddrV4::new(
                        Ipv4Addr::new(slice_6[0], slice_6[1], slice_6[2], slice_6[3]),
                        u16::from_be_bytes([slice_6[4], slice_6[5]]),
                    )
                })
                .collect(),
        ))
    }
}

impl<'de> Deserialize<'de> for PeerAddresses {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_bytes(PeerAddressesVisitor)
    }
}

impl Serialize for PeerAddresses {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut single_slice = Vec::with_capacity(6 * self.0.len());
        for peer in &self.0 {
            single_slice.extend(peer.ip().octets());
            single_slice.extend(peer.port().to_be_bytes());
        }
        serializer.serialize_bytes(&single_slice)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_compact_peer_list() {
        let bytes: Vec<u8> = vec![192, 0, 2, 123, 0x1A, 0xE1, 127, 0, 0, 1, 0x1A, 0xE9];
        let visitor = PeerAddressesVisitor;
        let addrs = visitor.visit_bytes::<de::value::Error>(&bytes).unwrap();
        assert_eq!(addrs.0.len(), 2);
        assert_eq!(addrs.0[1].port(), 6889);
    }

    #[test]
    fn rejects_misaligned_length() {
        let visitor = PeerAddressesVisitor;
        assert!(visitor.visit_bytes::<de::value::Error>(&[1, 2, 3]).is_err());
    }
}
