use std::collections::VecDeque;
use std::io::{self, BufReader, BufWriter, Write};
use std::net::{SocketAddr, SocketAddrV4, TcpStream};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, instrument};

use crate::error::SessionError;
use crate::message::{
    decode_message, encode_message, read_handshake, write_handshake, Bitfield, PeerMessage,
    PieceIndex, BLOCK,
};
use crate::piece::{BlockOutcome, PieceRegistry};

use super::state::{ChokeState, SessionState};

/// Classifies a socket/codec failure per SPEC_FULL.md §7: malformed or
/// oversized frames are a protocol error, everything else (connect, timeout,
/// reset, EOF) is a network error.
fn classify_io_error(e: io::Error) -> SessionError {
    if e.kind() == io::ErrorKind::InvalidData {
        SessionError::Protocol(e.to_string())
    } else {
        SessionError::Network(e)
    }
}

/// Owns one TCP connection to a peer and drives it through the handshake and
/// message loop (SPEC_FULL.md §4.3). Spawned and reaped by the Swarm
/// Supervisor; runs to completion on its own OS thread.
pub struct PeerSession {
    addr: SocketAddrV4,
    info_hash: [u8; 20],
    peer_id: [u8; 20],
    registry: Arc<PieceRegistry>,
    connect_timeout: Duration,
    receive_timeout: Duration,
    pipeline_depth: u32,
    state: SessionState,
    choke: ChokeState,
    peer_bitfield: Bitfield,
    pending_requests: VecDeque<(PieceIndex, u32)>,
    assigned_piece: Option<PieceIndex>,
}

impl PeerSession {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        addr: SocketAddrV4,
        info_hash: [u8; 20],
        peer_id: [u8; 20],
        registry: Arc<PieceRegistry>,
        connect_timeout: Duration,
        receive_timeout: Duration,
        pipeline_depth: u32,
    ) -> Self {
        let peer_bitfield = Bitfield::new(registry.num_pieces());
        Self {
            addr,
            info_hash,
            peer_id,
            registry,
            connect_timeout,
            receive_timeout,
            pipeline_depth,
            state: SessionState::Connecting,
            choke: ChokeState::new(),
            peer_bitfield,
            pending_requests: VecDeque::new(),
            assigned_piece: None,
        }
    }

    pub fn addr(&self) -> SocketAddrV4 {
        self.addr
    }

    /// Drives the full session lifecycle to completion on the calling thread.
    /// Never returns early on error; every failure path closes the session so
    /// the Supervisor can reap it (SPEC_FULL.md §4.3 Closed state).
    #[instrument(skip(self), fields(addr = %self.addr))]
    pub fn run(mut self) {
        if let Err(e) = self.drive() {
            debug!(kind = e.kind(), error = %e, "peer session closed");
        }
        self.state = SessionState::Closed;
        if let Some(piece) = self.assigned_piece.take() {
            debug!(piece, "session closed with an assigned piece, releasing for re-pick");
        }
    }

    fn drive(&mut self) -> Result<(), SessionError> {
        self.state = SessionState::Connecting;
        let stream = TcpStream::connect_timeout(&SocketAddr::V4(self.addr), self.connect_timeout)
            .map_err(SessionError::Network)?;
        stream
            .set_read_timeout(Some(self.receive_timeout))
            .map_err(SessionError::Network)?;
        stream
            .set_write_timeout(Some(self.receive_timeout))
            .map_err(SessionError::Network)?;

        self.state = SessionState::Handshaking;
        let mut writer =
            BufWriter::new(stream.try_clone().map_err(SessionError::Network)?);
        let mut reader = BufReader::new(stream);

        write_handshake(&mut writer, &self.info_hash, &self.peer_id).map_err(classify_io_error)?;
        writer.flush().map_err(classify_io_error)?;
        let handshake = read_handshake(&mut reader).map_err(classify_io_error)?;
        if handshake.info_hash != self.info_hash {
            return Err(SessionError::Protocol(
                "info-hash mismatch in handshake response".to_string(),
            ));
        }

        self.state = SessionState::Streaming;
        let snapshot = self.registry.bitfield_snapshot();
        self.send(&mut writer, PeerMessage::Bitfield(snapshot.as_bytes().to_vec()))
            .map_err(classify_io_error)?;

        loop {
            let msg = decode_message(&mut reader).map_err(classify_io_error)?;
            self.handle_message(&mut writer, msg).map_err(classify_io_error)?;
        }
    }

    fn send(&self, writer: &mut impl Write, msg: PeerMessage) -> io::Result<()> {
        writer.write_all(&encode_message(&msg))?;
        writer.flush()
    }

    fn handle_message(&mut self, writer: &mut impl Write, msg: PeerMessage) -> io::Result<()> {
        match msg {
            PeerMessage::KeepAlive => {}
            PeerMessage::Choke => {
                self.choke.peer_choking = true;
            }
            PeerMessage::Unchoke => {
                self.choke.peer_choking = false;
                if self.assigned_piece.is_none() {
                    self.assigned_piece = self.registry.pick_piece(&self.peer_bitfield);
                }
                if let Some(piece) = self.assigned_piece {
                    self.start_pipeline(writer, piece)?;
                }
            }
            PeerMessage::Interested => {
                self.choke.peer_interested = true;
            }
            PeerMessage::NotInterested => {
                self.choke.peer_interested = false;
            }
            PeerMessage::Have(index) => {
                self.peer_bitfield.set_piece(index as usize);
                if !self.choke.am_interested {
                    self.maybe_declare_interest(writer)?;
                }
            }
            PeerMessage::Bitfield(bits) => {
                self.peer_bitfield = Bitfield::from_bytes(bits);
                self.maybe_declare_interest(writer)?;
            }
            PeerMessage::Piece { index, begin, block } => {
                self.handle_piece(writer, index, begin, &block)?;
            }
            PeerMessage::Request { .. } | PeerMessage::Cancel { .. } | PeerMessage::Port(_) => {
                // Leech-only: we never serve uploads or act as a DHT node
                // (SPEC_FULL.md §1 Non-goals).
            }
        }
        Ok(())
    }

    /// Implements §4.3's interest computation: send Interested once, the
    /// first time the peer is found to hold a piece we lack.
    fn maybe_declare_interest(&mut self, writer: &mut impl Write) -> io::Result<()> {
        if self.choke.am_interested {
            return Ok(());
        }
        let canonical = self.registry.bitfield_snapshot();
        if canonical.has_piece_we_lack(&self.peer_bitfield) {
            self.choke.am_interested = true;
            self.send(writer, PeerMessage::Interested)?;
        }
        Ok(())
    }

    fn handle_piece(
        &mut self,
        writer: &mut impl Write,
        index: PieceIndex,
        begin: u32,
        block: &[u8],
    ) -> io::Result<()> {
        self.pending_requests.retain(|&(i, b)| !(i == index && b == begin));

        match self.registry.add_block(index, begin, block) {
            BlockOutcome::PieceVerified => {
                self.assigned_piece = None;
                if !self.choke.peer_choking {
                    self.assigned_piece = self.registry.pick_piece(&self.peer_bitfield);
                    if let Some(piece) = self.assigned_piece {
                        self.start_pipeline(writer, piece)?;
                    }
                }
            }
            BlockOutcome::Progress => {
                if !self.choke.peer_choking && self.assigned_piece == Some(index) {
                    let piece_len = self.registry.piece_len(index);
                    let next_begin = begin + self.pipeline_depth * BLOCK;
                    if next_begin < piece_len {
                        let length = std::cmp::min(BLOCK, piece_len - next_begin);
                        self.send(
                            writer,
                            PeerMessage::Request { index, begin: next_begin, length },
                        )?;
                        self.pending_requests.push_back((index, next_begin));
                    }
                }
            }
            BlockOutcome::PieceCorrupt => {
                self.assigned_piece = None;
                self.pending_requests.retain(|&(i, _)| i != index);
            }
            BlockOutcome::Duplicate => {}
        }
        Ok(())
    }

    /// Fills the initial request window for a freshly assigned piece, up to
    /// `pipeline_depth` outstanding requests (SPEC_FULL.md §4.3).
    fn start_pipeline(&mut self, writer: &mut impl Write, piece: PieceIndex) -> io::Result<()> {
        let piece_len = self.registry.piece_len(piece);
        let mut begin = 0u32;
        let mut issued = 0u32;
        while begin < piece_len && issued < self.pipeline_depth {
            let length = std::cmp::min(BLOCK, piece_len - begin);
            self.send(writer, PeerMessage::Request { index: piece, begin, length })?;
            self.pending_requests.push_back((piece, begin));
            begin += BLOCK;
            issued += 1;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file::FileMapper;
    use crate::torrent::ContentDescriptor;
    use std::net::{Ipv4Addr, SocketAddrV4};
    use std::path::PathBuf;

    fn scratch_dir(name: &str) -> PathBuf {
        let mut path = std::env::temp_dir();
        path.push(format!("torrent_rs_session_unit_{}_{}", std::process::id(), name));
        let _ = std::fs::remove_dir_all(&path);
        std::fs::create_dir_all(&path).unwrap();
        path
    }

    fn session_over(num_pieces: usize, dir: &std::path::Path) -> PeerSession {
        let piece_digests = vec![[0u8; 20]; num_pieces];
        let content = ContentDescriptor {
            piece_length: 8,
            total_size: 8 * num_pieces as u64,
            piece_digests,
            files: vec![(PathBuf::from("out.bin"), 8 * num_pieces as u64)],
            info_hash: [0u8; 20],
            announce: "http://tracker.example/announce".to_string(),
        };
        let mapper = FileMapper::new(dir, &content.files, 8).unwrap();
        let registry = Arc::new(PieceRegistry::new(&content, mapper));
        PeerSession::new(
            SocketAddrV4::new(Ipv4Addr::LOCALHOST, 6881),
            [0u8; 20],
            [1u8; 20],
            registry,
            Duration::from_secs(1),
            Duration::from_secs(1),
            10,
        )
    }

    /// A peer that never sends a Bitfield (it holds zero pieces at connect)
    /// and later announces one via Have must still have it reflected and
    /// trigger interest (SPEC_FULL.md §4.3/§9).
    #[test]
    fn have_without_a_prior_bitfield_sets_the_bit_and_declares_interest() {
        let dir = scratch_dir("have_only");
        let mut session = session_over(4, &dir);
        let mut out = Vec::new();

        session.handle_message(&mut out, PeerMessage::Have(2)).unwrap();

        assert!(session.peer_bitfield.has_piece(2));
        assert!(session.choke.am_interested);
        assert_eq!(decode_message(&mut &out[..]).unwrap(), PeerMessage::Interested);
    }
}
