use core::fmt;
use serde_derive::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use std::path::{Path, PathBuf};

use crate::error::ConfigError;

mod hashes;

pub use hashes::Hashes;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Torrent {
    /// The URL of the tracker.
    pub announce: String,
    pub info: Info,
    pub info_hash: Option<[u8; 20]>,
}

impl Torrent {
    pub fn get_info_hash(&mut self) -> anyhow::Result<()> {
        if self.info_hash.is_some() {
            return Ok(());
        }

        let info_encoded = serde_bencode::to_bytes(&self.info)?;

        let mut hasher = Sha1::new();
        hasher.update(&info_encoded);
        let hash: [u8; 20] = hasher.finalize().into();

        self.info_hash = Some(hash);

        Ok(())
    }

    pub fn urlencode_infohash(&self) -> Option<String> {
        self.info_hash.map(|info_hash| {
            let mut encoded = String::with_capacity(info_hash.len() * 3);
            info_hash.into_iter().for_each(|byte| {
                encoded.push('%');
                encoded.push_str(&format!("{:02X}", byte));
            });
            encoded
        })
    }

    #[tracing::instrument]
    pub fn open(path: impl AsRef<Path> + fmt::Debug) -> Result<Self, ConfigError> {
        let bytes = std::fs::read(path.as_ref())
            .map_err(|e| ConfigError::ReadTorrent(path.as_ref().to_path_buf(), e))?;
        let mut t: Torrent = serde_bencode::from_bytes(&bytes)?;
        t.get_info_hash()
            .expect("re-encoding a just-decoded Info value cannot fail");

        tracing::info!(name = %t.info.name, "opened torrent");
        Ok(t)
    }

    pub fn length(&self) -> usize {
        match &self.info.keys {
            Keys::SingleFile { length } => *length,
            Keys::MultiFile { files } => files.iter().map(|file| file.length).sum(),
        }
    }

    /// Ordered (relative path, length) list, single-file torrents expressed as a
    /// one-element list rooted at `info.name` as required by §3/§6.1.
    pub fn file_layout(&self) -> Vec<(PathBuf, u64)> {
        match &self.info.keys {
            Keys::SingleFile { length } => vec![(PathBuf::from(&self.info.name), *length as u64)],
            Keys::MultiFile { files } => files
                .iter()
                .map(|f| {
                    let mut path = PathBuf::from(&self.info.name);
                    path.extend(&f.path);
                    (path, f.length as u64)
                })
                .collect(),
        }
    }

    /// Validates the parsed metainfo and builds the content descriptor the
    /// download engine operates on (SPEC_FULL.md §3).
    pub fn content_descriptor(&self) -> Result<ContentDescriptor, ConfigError> {
        if self.announce.is_empty() {
            return Err(ConfigError::MissingAnnounce);
        }
        let transport = self
            .announce
            .split_once("://")
            .map(|(scheme, _)| scheme)
            .unwrap_or("");
        if !matches!(transport, "http" | "https") {
            return Err(ConfigError::UnsupportedTransport(transport.to_string()));
        }

        if self.info.pieces.is_empty() {
            return Err(ConfigError::EmptyPieceList);
        }

        let files = self.file_layout();
        let total_size = self.length() as u64;
        let sum: u64 = files.iter().map(|(_, len)| *len).sum();
        if sum != total_size {
            return Err(ConfigError::FileLengthMismatch { sum, total: total_size });
        }

        Ok(ContentDescriptor {
            piece_length: self.info.piece_length as u32,
            total_size,
            piece_digests: self.info.pieces.0.clone(),
            files,
            info_hash: self
                .info_hash
                .expect("get_info_hash is always called by Torrent::open"),
            announce: self.announce.clone(),
        })
    }
}

/// The immutable, fully-validated inputs the download engine (core) consumes.
/// Produced from a parsed `Torrent`; the engine never looks at bencode again.
#[derive(Debug, Clone)]
pub struct ContentDescriptor {
    pub piece_length: u32,
    pub total_size: u64,
    pub piece_digests: Vec<[u8; 20]>,
    pub files: Vec<(PathBuf, u64)>,
    pub info_hash: [u8; 20],
    pub announce: String,
}

impl ContentDescriptor {
    pub fn num_pieces(&self) -> usize {
        self.piece_digests.len()
    }

    /// Actual length of piece `index`; every piece is `piece_length` bytes except
    /// possibly the last, per SPEC_FULL.md §3.
    pub fn piece_len(&self, index: u32) -> u32 {
        let index = index as u64;
        let last = self.num_pieces() as u64 - 1;
        if index == last {
            let consumed = last * self.piece_length as u64;
            (self.total_size - consumed) as u32
        } else {
            self.piece_length
        }
    }
}

// Structure mainly from https://github.com/jonhoo/codecrafters-bittorrent-rust/blob/master/src/torrent.rs
// to ensure info hash is correct

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Info {
    /// The suggested name to save the file (or directory) as. It is purely advisory.
    ///
    /// In the single file case, the name key is the name of a file, in the muliple file case, it's
    /// the name of a directory.
    pub name: String,

    /// The number of bytes in each piece the file is split into.
    ///
    /// For the purposes of transfer, files are split into fixed-size pieces which are all the same
    /// length except for possibly the last one which may be truncated. piece length is almost
    /// always a power of two, most commonly 2^18 = 256K (BitTorrent prior to version 3.2 uses 2
    /// 20 = 1 M as default).
    #[serde(rename = "piece length")]
    pub piece_length: usize,

    /// Each entry of `pieces` is the SHA1 hash of the piece at the corresponding index.
    pub pieces: Hashes,

    #[serde(flatten)]
    pub keys: Keys,
}

/// There is a key `length` or a key `files`, but not both or neither.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum Keys {
    /// If `length` is present then the download represents a single file.
    SingleFile {
        /// The length of the file in bytes.
        length: usize,
    },
    /// Otherwise it represents a set of files which go in a directory structure.
    ///
    /// For the purposes of the other keys in `Info`, the multi-file case is treated as only having
    /// a single file by concatenating the files in the order they appear in the files list.
    MultiFile { files: Vec<File> },
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct File {
    /// The length of the file, in bytes.
    pub length: usize,

    /// Subdirectory names for this file, the last of which is the actual file name
    /// (a zero length list is an error case).
    pub path: Vec<String>,
}
