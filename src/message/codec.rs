use std::io::{self, Read, Write};

use super::{PeerMessage, BLOCK};

/// Payload bytes beyond which a length prefix is treated as a protocol error
/// and the session closes (SPEC_FULL.md §4.5): id byte + index + begin + the
/// largest legitimate block.
const MAX_PAYLOAD: usize = (BLOCK + 9) as usize;

const PROTOCOL_IDENTIFIER: [u8; 19] = *b"BitTorrent protocol";
pub const HANDSHAKE_LEN: usize = 68;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Handshake {
    pub info_hash: [u8; 20],
    pub peer_id: [u8; 20],
}

/// Writes the fixed 68-byte handshake: `0x13`, the protocol literal, 8 reserved
/// zero bytes, the info-hash, and our peer-id (SPEC_FULL.md §4.5).
pub fn write_handshake(
    writer: &mut impl Write,
    info_hash: &[u8; 20],
    peer_id: &[u8; 20],
) -> io::Result<()> {
    let mut frame = Vec::with_capacity(HANDSHAKE_LEN);
    frame.push(PROTOCOL_IDENTIFIER.len() as u8);
    frame.extend_from_slice(&PROTOCOL_IDENTIFIER);
    frame.extend_from_slice(&[0u8; 8]);
    frame.extend_from_slice(info_hash);
    frame.extend_from_slice(peer_id);
    writer.write_all(&frame)
}

/// Reads exactly 68 bytes and parses them as a handshake. Does not itself
/// validate the protocol literal or info-hash; callers compare those against
/// what they expect (SPEC_FULL.md §4.3: mismatch is session-fatal, not a codec
/// error).
pub fn read_handshake(reader: &mut impl Read) -> io::Result<Handshake> {
    let mut buf = [0u8; HANDSHAKE_LEN];
    reader.read_exact(&mut buf)?;

    if buf[0] as usize != PROTOCOL_IDENTIFIER.len() || buf[1..20] != PROTOCOL_IDENTIFIER {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "unexpected protocol identifier in handshake",
        ));
    }

    let mut info_hash = [0u8; 20];
    info_hash.copy_from_slice(&buf[28..48]);
    let mut peer_id = [0u8; 20];
    peer_id.copy_from_slice(&buf[48..68]);

    Ok(Handshake { info_hash, peer_id })
}

/// Frames a message as `[4-byte BE length][id][payload]`, `KeepAlive` being the
/// zero-length special case (SPEC_FULL.md §4.5).
pub fn encode_message(msg: &PeerMessage) -> Vec<u8> {
    if matches!(msg, PeerMessage::KeepAlive) {
        return 0u32.to_be_bytes().to_vec();
    }

    let mut payload = vec![msg
        .message_id()
        .expect("non-KeepAlive messages always carry an id")];

    match msg {
        PeerMessage::Have(index) => payload.extend_from_slice(&index.to_be_bytes()),
        PeerMessage::Bitfield(bits) => payload.extend_from_slice(bits),
        PeerMessage::Request { index, begin, length }
        | PeerMessage::Cancel { index, begin, length } => {
            payload.extend_from_slice(&index.to_be_bytes());
            payload.extend_from_slice(&begin.to_be_bytes());
            payload.extend_from_slice(&length.to_be_bytes());
        }
        PeerMessage::Piece { index, begin, block } => {
            payload.extend_from_slice(&index.to_be_bytes());
            payload.extend_from_slice(&begin.to_be_bytes());
            payload.extend_from_slice(block);
        }
        PeerMessage::Port(port) => payload.extend_from_slice(&port.to_be_bytes()),
        PeerMessage::Choke
        | PeerMessage::Unchoke
        | PeerMessage::Interested
        | PeerMessage::NotInterested => {}
        PeerMessage::KeepAlive => unreachable!(),
    }

    let mut frame = (payload.len() as u32).to_be_bytes().to_vec();
    frame.extend(payload);
    frame
}

fn parse_payload(id: u8, rest: &[u8]) -> io::Result<PeerMessage> {
    let invalid = |what: &str| {
        Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("malformed message id {id}: {what}"),
        ))
    };

    Ok(match id {
        0 => PeerMessage::Choke,
        1 => PeerMessage::Unchoke,
        2 => PeerMessage::Interested,
        3 => PeerMessage::NotInterested,
        4 => {
            if rest.len() != 4 {
                return invalid("Have payload must be 4 bytes");
            }
            PeerMessage::Have(u32::from_be_bytes(rest.try_into().unwrap()))
        }
        5 => PeerMessage::Bitfield(rest.to_vec()),
        6 | 8 => {
            if rest.len() != 12 {
                return invalid("Request/Cancel payload must be 12 bytes");
            }
            let index = u32::from_be_bytes(rest[0..4].try_into().unwrap());
            let begin = u32::from_be_bytes(rest[4..8].try_into().unwrap());
            let length = u32::from_be_bytes(rest[8..12].try_into().unwrap());
            if id == 6 {
                PeerMessage::Request { index, begin, length }
            } else {
                PeerMessage::Cancel { index, begin, length }
            }
        }
        7 => {
            if rest.len() < 8 {
                return invalid("Piece payload must be at least 8 bytes");
            }
            let index = u32::from_be_bytes(rest[0..4].try_into().unwrap());
            let begin = u32::from_be_bytes(rest[4..8].try_into().unwrap());
            PeerMessage::Piece {
                index,
                begin,
                block: rest[8..].to_vec(),
            }
        }
        9 => {
            if rest.len() != 2 {
                return invalid("Port payload must be 2 bytes");
            }
            PeerMessage::Port(u16::from_be_bytes(rest.try_into().unwrap()))
        }
        other => return invalid(&format!("unknown id {other}")),
    })
}

/// Reads one framed message off `reader`, enforcing the maximum payload size
/// from SPEC_FULL.md §4.5 before allocating a buffer for it.
pub fn decode_message(reader: &mut impl Read) -> io::Result<PeerMessage> {
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf)?;
    let length = u32::from_be_bytes(len_buf) as usize;

    if length == 0 {
        return Ok(PeerMessage::KeepAlive);
    }
    if length > MAX_PAYLOAD {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("message length {length} exceeds maximum allowed size"),
        ));
    }

    let mut payload = vec![0u8; length];
    reader.read_exact(&mut payload)?;
    parse_payload(payload[0], &payload[1..])
}
