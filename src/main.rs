use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

use torrent_rs::config::ClientConfig;
use torrent_rs::file::FileMapper;
use torrent_rs::piece::PieceRegistry;
use torrent_rs::stats::ProgressTracker;
use torrent_rs::supervisor::Supervisor;
use torrent_rs::torrent::Torrent;
use torrent_rs::tracker::{generate_peer_id, TrackerClient};

/// A leech-only BitTorrent v1 client: downloads a torrent's content and exits
/// once every piece has been verified (SPEC_FULL.md §6.4).
#[derive(Parser, Debug)]
#[command(name = "torrent_rs", about = "Download a .torrent file's content")]
struct Cli {
    /// Path to the .torrent metainfo file
    torrent_path: PathBuf,

    /// Directory to write downloaded files into
    #[arg(long, default_value = ".")]
    download_dir: PathBuf,

    /// Maximum number of concurrent peer sessions
    #[arg(long, default_value_t = ClientConfig::default().max_active)]
    max_peers: usize,
}

fn main() {
    tracing_subscriber::fmt::init();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(1);
        }
    };
    if let Err(e) = run(cli) {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let torrent = Torrent::open(&cli.torrent_path).context("failed to open torrent file")?;
    let content = torrent
        .content_descriptor()
        .context("invalid torrent metainfo")?;

    info!(name = %torrent.info.name, pieces = content.num_pieces(), "starting download");

    let config = ClientConfig::default()
        .with_download_dir(cli.download_dir)
        .with_max_active(cli.max_peers);

    let mapper = FileMapper::new(&config.download_dir, &content.files, content.piece_length)
        .context("failed to prepare download directory")?;
    let registry = Arc::new(PieceRegistry::new(&content, mapper));
    let tracker = TrackerClient::new(content.announce.clone());
    let peer_id = generate_peer_id();

    let pb = ProgressBar::new(content.total_size);
    pb.set_style(
        ProgressStyle::with_template("{bar:40.cyan/blue} {bytes}/{total_bytes}  {msg}")
            .unwrap()
            .progress_chars("##-"),
    );

    let supervisor_registry = Arc::clone(&registry);
    let info_hash = content.info_hash;
    let supervisor_handle = std::thread::spawn(move || {
        let mut supervisor = Supervisor::new(config, supervisor_registry, tracker, info_hash, peer_id);
        supervisor.run();
    });

    let mut progress = ProgressTracker::new(Arc::clone(&registry));
    while !supervisor_handle.is_finished() {
        let rate = progress.sample_rate();
        pb.set_position(progress.downloaded_bytes());
        pb.set_message(format!("{:.0} KB/s", rate / 1024.0));
        std::thread::sleep(Duration::from_millis(500));
    }
    supervisor_handle
        .join()
        .map_err(|_| anyhow::anyhow!("supervisor thread panicked"))?;

    pb.set_position(registry.downloaded_bytes());
    pb.finish_with_message("done");

    println!(
        "Download complete: {} bytes written across {} file(s)",
        registry.downloaded_bytes(),
        content.files.len(),
    );

    Ok(())
}
