use std::sync::Arc;
use std::time::Instant;

use crate::piece::PieceRegistry;

/// Samples the Piece Registry's counters to derive an instantaneous transfer
/// rate, in the manner of the teacher's `client::state::DownloadStats`
/// (SPEC_FULL.md §4.6). The download/left totals and `total_transferred` are
/// the Registry's own atomics; this type only tracks the previous sample.
pub struct ProgressTracker {
    registry: Arc<PieceRegistry>,
    last_sample: Instant,
    last_transferred: u64,
}

impl ProgressTracker {
    pub fn new(registry: Arc<PieceRegistry>) -> Self {
        let last_transferred = registry.total_transferred();
        Self {
            registry,
            last_sample: Instant::now(),
            last_transferred,
        }
    }

    pub fn downloaded_bytes(&self) -> u64 {
        self.registry.downloaded_bytes()
    }

    pub fn left_bytes(&self) -> u64 {
        self.registry.left_bytes()
    }

    /// Bytes/second transferred since the previous call to this method.
    pub fn sample_rate(&mut self) -> f64 {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_sample).as_secs_f64();
        let transferred = self.registry.total_transferred();
        let delta = transferred.saturating_sub(self.last_transferred);

        self.last_sample = now;
        self.last_transferred = transferred;

        if elapsed < 0.001 {
            0.0
        } else {
            delta as f64 / elapsed
        }
    }
}
