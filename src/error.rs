use std::path::PathBuf;

/// Fatal, top-level failures: invalid CLI arguments or an unusable metainfo file.
/// These are the only errors that propagate out of the core to the CLI (see §6.4/§7
/// of SPEC_FULL.md); everything below session scope is swallowed and logged.
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("failed to read torrent file {0:?}")]
    ReadTorrent(PathBuf, #[source] std::io::Error),

    #[error("failed to decode bencoded metainfo")]
    Bencode(#[from] serde_bencode::Error),

    #[error("torrent has no announce URL")]
    MissingAnnounce,

    #[error("unsupported announce transport {0:?} (only http/https are implemented)")]
    UnsupportedTransport(String),

    #[error("torrent declares zero pieces")]
    EmptyPieceList,

    #[error("file list length does not sum to the declared total size ({sum} != {total})")]
    FileLengthMismatch { sum: u64, total: u64 },
}

/// Session-scoped failure categories. These never escape the owning thread; the
/// Swarm Supervisor only observes that the thread finished. Kept as a typed enum
/// so `tracing` spans can log a consistent `kind` field across peers.
#[derive(thiserror::Error, Debug)]
pub enum SessionError {
    #[error("network error: {0}")]
    Network(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(String),
}

impl SessionError {
    /// Stable tag for `tracing` spans, matching the kind taxonomy of SPEC_FULL.md §7.
    pub fn kind(&self) -> &'static str {
        match self {
            SessionError::Network(_) => "network",
            SessionError::Protocol(_) => "protocol",
        }
    }
}
