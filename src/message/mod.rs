mod bitfield;
mod codec;

pub use bitfield::Bitfield;
pub use codec::{decode_message, encode_message, read_handshake, write_handshake, Handshake};

pub type PieceIndex = u32;

/// Block size, the atomic unit of transfer (SPEC_FULL.md §4.3).
pub const BLOCK: u32 = 16384;

/// Request pipeline depth per peer (SPEC_FULL.md §4.3).
pub const PIPELINE: u32 = 100;

#[derive(Debug, Clone, PartialEq)]
pub enum PeerMessage {
    KeepAlive,
    Choke,
    Unchoke,
    Interested,
    NotInterested,
    Have(PieceIndex),
    Bitfield(Vec<u8>),
    Request {
        index: u32,
        begin: u32,
        length: u32,
    },
    Piece {
        index: u32,
        begin: u32,
        block: Vec<u8>,
    },
    Cancel {
        index: u32,
        begin: u32,
        length: u32,
    },
    Port(u16),
}

impl PeerMessage {
    pub fn message_id(&self) -> Option<u8> {
        match self {
            PeerMessage::KeepAlive => None,
            PeerMessage::Choke => Some(0),
            PeerMessage::Unchoke => Some(1),
            PeerMessage::Interested => Some(2),
            PeerMessage::NotInterested => Some(3),
            PeerMessage::Have(_) => Some(4),
            PeerMessage::Bitfield(_) => Some(5),
            PeerMessage::Request { .. } => Some(6),
            PeerMessage::Piece { .. } => Some(7),
            PeerMessage::Cancel { .. } => Some(8),
            PeerMessage::Port(_) => Some(9),
        }
    }
}
