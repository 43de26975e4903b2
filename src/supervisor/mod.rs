use std::collections::{HashSet, VecDeque};
use std::net::SocketAddrV4;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use rand::seq::SliceRandom;
use rand::thread_rng;
use tracing::{info, warn};

use crate::config::ClientConfig;
use crate::peer::PeerSession;
use crate::piece::PieceRegistry;
use crate::stats::ProgressTracker;
use crate::tracker::TrackerClient;

const REAP_PERIOD: Duration = Duration::from_secs(1);
const MIN_POOL: usize = 10;
const MIN_ACTIVE_FOR_REFILL: usize = 5;

struct ActiveSession {
    addr: SocketAddrV4,
    handle: JoinHandle<()>,
}

/// Maintains a bounded fleet of Peer Sessions drawn from a FIFO candidate
/// pool, re-querying the tracker as the pool or fleet runs low
/// (SPEC_FULL.md §4.4). Grounded in the teacher's `client::session`
/// orchestration shape (announce, spawn workers, poll/progress loop),
/// reworked from `tokio::JoinSet`/`Semaphore` to `std::thread::JoinHandle`s.
pub struct Supervisor {
    config: ClientConfig,
    registry: Arc<PieceRegistry>,
    tracker: TrackerClient,
    info_hash: [u8; 20],
    peer_id: [u8; 20],
    pool: VecDeque<SocketAddrV4>,
    pool_set: HashSet<SocketAddrV4>,
    active: Vec<ActiveSession>,
}

impl Supervisor {
    pub fn new(
        config: ClientConfig,
        registry: Arc<PieceRegistry>,
        tracker: TrackerClient,
        info_hash: [u8; 20],
        peer_id: [u8; 20],
    ) -> Self {
        Self {
            config,
            registry,
            tracker,
            info_hash,
            peer_id,
            pool: VecDeque::new(),
            pool_set: HashSet::new(),
            active: Vec::new(),
        }
    }

    /// Drives the reap/fill/refill/observe loop to completion (SPEC_FULL.md
    /// §4.4), then joins every surviving worker.
    pub fn run(&mut self) {
        let mut progress = ProgressTracker::new(Arc::clone(&self.registry));
        self.announce();

        while self.registry.left_bytes() > 0 {
            self.reap();
            self.fill();

            if self.pool.len() < MIN_POOL || self.active.len() < MIN_ACTIVE_FOR_REFILL {
                self.announce();
            }

            let rate = progress.sample_rate();
            info!(
                downloaded = progress.downloaded_bytes(),
                left = progress.left_bytes(),
                active = self.active.len(),
                pool = self.pool.len(),
                rate_bps = rate as u64,
                "progress",
            );

            thread::sleep(REAP_PERIOD);
        }

        self.reap();
        self.join_all();
    }

    fn announce(&mut self) {
        let result = self.tracker.announce(
            &self.info_hash,
            &self.peer_id,
            self.registry.downloaded_bytes(),
            self.registry.left_bytes(),
            0,
            self.config.listen_port,
        );

        match result {
            Ok(mut endpoints) => {
                endpoints.shuffle(&mut thread_rng());
                let active: HashSet<SocketAddrV4> = self.active.iter().map(|s| s.addr).collect();
                for addr in endpoints {
                    if !active.contains(&addr) && self.pool_set.insert(addr) {
                        self.pool.push_back(addr);
                    }
                }
            }
            Err(e) => warn!(error = %e, "tracker announce failed"),
        }
    }

    /// Removes finished sessions from the active set and joins their threads.
    fn reap(&mut self) {
        let mut remaining = Vec::with_capacity(self.active.len());
        for session in self.active.drain(..) {
            if session.handle.is_finished() {
                if let Err(e) = session.handle.join() {
                    warn!(addr = %session.addr, ?e, "peer session thread panicked");
                }
            } else {
                remaining.push(session);
            }
        }
        self.active = remaining;
    }

    /// Spawns new sessions from the pool until the fleet reaches `max_active`,
    /// deduplicating by (ip, port).
    fn fill(&mut self) {
        let mut active_addrs: HashSet<SocketAddrV4> = self.active.iter().map(|s| s.addr).collect();
        while self.active.len() < self.config.max_active {
            let Some(addr) = self.pool.pop_front() else {
                break;
            };
            self.pool_set.remove(&addr);
            if active_addrs.contains(&addr) {
                continue;
            }
            active_addrs.insert(addr);
            self.spawn_session(addr);
        }
    }

    fn spawn_session(&mut self, addr: SocketAddrV4) {
        let session = PeerSession::new(
            addr,
            self.info_hash,
            self.peer_id,
            Arc::clone(&self.registry),
            self.config.connect_timeout,
            self.config.receive_timeout,
            self.config.pipeline_depth,
        );
        let handle = thread::spawn(move || session.run());
        self.active.push(ActiveSession { addr, handle });
    }

    fn join_all(&mut self) {
        for session in self.active.drain(..) {
            let _ = session.handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file::FileMapper;
    use crate::torrent::ContentDescriptor;
    use std::path::PathBuf;

    fn scratch_dir(name: &str) -> PathBuf {
        let mut path = std::env::temp_dir();
        path.push(format!("torrent_rs_supervisor_test_{}_{}", std::process::id(), name));
        let _ = std::fs::remove_dir_all(&path);
        std::fs::create_dir_all(&path).unwrap();
        path
    }

    fn empty_registry(dir: &std::path::Path) -> Arc<PieceRegistry> {
        let content = ContentDescriptor {
            piece_length: 8,
            total_size: 0,
            piece_digests: vec![],
            files: vec![],
            info_hash: [0u8; 20],
            announce: "http://tracker.example/announce".to_string(),
        };
        let mapper = FileMapper::new(dir, &content.files, 8).unwrap();
        Arc::new(PieceRegistry::new(&content, mapper))
    }

    #[test]
    fn exits_immediately_when_nothing_left_to_download() {
        let dir = scratch_dir("noop");
        let registry = empty_registry(&dir);
        let mut server = mockito::Server::new();
        let mock = server
            .mock("GET", "/announce")
            .match_query(mockito::Matcher::Any)
            .with_status(200)
            .with_body("d8:intervali900e5:peers0:e")
            .create();

        let tracker = TrackerClient::new(format!("{}/announce", server.url()));
        let mut supervisor = Supervisor::new(
            ClientConfig::default(),
            registry,
            tracker,
            [0u8; 20],
            [1u8; 20],
        );

        supervisor.run();
        mock.assert();
    }

    #[test]
    fn fill_deduplicates_by_endpoint() {
        let dir = scratch_dir("dedup");
        let registry = empty_registry(&dir);
        let tracker = TrackerClient::new("http://tracker.invalid/announce".to_string());
        let mut supervisor = Supervisor::new(
            ClientConfig::default().with_max_active(2),
            registry,
            tracker,
            [0u8; 20],
            [1u8; 20],
        );

        let addr: SocketAddrV4 = "127.0.0.1:6881".parse().unwrap();
        supervisor.pool_set.insert(addr);
        supervisor.pool.push_back(addr);
        supervisor.pool_set.insert(addr);
        supervisor.pool.push_back(addr);

        assert_eq!(supervisor.pool.len(), 2);
        supervisor.fill();
        assert_eq!(supervisor.active.len(), 1);
        supervisor.join_all();
    }
}
