use std::path::PathBuf;
use std::time::Duration;

/// Tunables threaded from the CLI into the download engine (SPEC_FULL.md §4.7),
/// grounded in the teacher's `client::config::ClientConfig`.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Directory where downloaded files will be written.
    pub download_dir: PathBuf,
    /// Advisory; inbound connections are out of scope (SPEC_FULL.md §1).
    pub listen_port: u16,
    /// MAX_ACTIVE: the bounded fleet size the Supervisor maintains.
    pub max_active: usize,
    /// PIPELINE: outstanding block requests per peer session.
    pub pipeline_depth: u32,
    /// Connect timeout per SPEC_FULL.md §4.3/§5.
    pub connect_timeout: Duration,
    /// Socket receive timeout per SPEC_FULL.md §4.3/§5.
    pub receive_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            download_dir: PathBuf::from("."),
            listen_port: 6881,
            max_active: 100,
            pipeline_depth: crate::message::PIPELINE,
            connect_timeout: Duration::from_secs(1),
            receive_timeout: Duration::from_secs(1),
        }
    }
}

impl ClientConfig {
    pub fn with_download_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.download_dir = path.into();
        self
    }

    pub fn with_max_active(mut self, max: usize) -> Self {
        self.max_active = max;
        self
    }
}
