use anyhow::{Context, Result};
use rand::Rng;
use serde_derive::{Deserialize, Serialize};
use std::net::SocketAddrV4;
use tracing::{info, instrument};

use crate::peer::PeerAddresses;

#[derive(Debug, Clone, Deserialize)]
struct TrackerResponse {
    /// How often the client is expected to re-announce, in seconds. The
    /// Supervisor re-announces on its own pool/fleet-driven schedule
    /// (SPEC_FULL.md §4.4) rather than strictly honoring this value.
    #[allow(dead_code)]
    interval: usize,
    #[serde(rename = "peers")]
    peer_addresses: PeerAddresses,
}

#[derive(Debug, Clone, Serialize)]
struct TrackerRequestParams {
    peer_id: String,
    port: u16,
    uploaded: u64,
    downloaded: u64,
    left: u64,
    compact: u8,
}

/// Blocking HTTP(S) tracker client (SPEC_FULL.md §6.3). Kept from the
/// teacher's `reqwest` + `serde_bencode` announce implementation, switched
/// from async `reqwest::get` to `reqwest::blocking::get` to match the
/// OS-thread concurrency model of SPEC_FULL.md §5.
#[derive(Debug, Clone)]
pub struct TrackerClient {
    announce_url: String,
}

impl TrackerClient {
    pub fn new(announce_url: impl Into<String>) -> Self {
        Self {
            announce_url: announce_url.into(),
        }
    }

    #[instrument(skip(self, info_hash, peer_id))]
    pub fn announce(
        &self,
        info_hash: &[u8; 20],
        peer_id: &[u8; 20],
        downloaded: u64,
        left: u64,
        uploaded: u64,
        port: u16,
    ) -> Result<Vec<SocketAddrV4>> {
        let params = TrackerRequestParams {
            peer_id: String::from_utf8_lossy(peer_id).into_owned(),
            port,
            uploaded,
            downloaded,
            left,
            compact: 1,
        };
        let query = serde_urlencoded::to_string(&params)
            .context("failed to encode tracker url params")?;
        let url = format!(
            "{}?{}&info_hash={}",
            self.announce_url,
            query,
            urlencode_bytes(info_hash),
        );

        let response = reqwest::blocking::get(&url).context("failed to GET tracker announce URL")?;
        let body = response.bytes().context("failed to read tracker response body")?;
        let response: TrackerResponse =
            serde_bencode::from_bytes(&body).context("failed to decode tracker response")?;

        info!(peers = response.peer_addresses.0.len(), "tracker announce succeeded");
        Ok(response.peer_addresses.0)
    }
}

fn urlencode_bytes(bytes: &[u8]) -> String {
    let mut encoded = String::with_capacity(bytes.len() * 3);
    for byte in bytes {
        encoded.push('%');
        encoded.push_str(&format!("{:02X}", byte));
    }
    encoded
}

/// Generates a 20-byte Azureus-style peer id (SPEC_FULL.md §1), grounded in
/// the teacher's `TrackerRequest::generate_peer_id`.
pub fn generate_peer_id() -> [u8; 20] {
    let mut rng = rand::thread_rng();
    let prefix = b"-TR0001-";
    let mut id = [0u8; 20];
    id[..prefix.len()].copy_from_slice(prefix);
    for slot in id[prefix.len()..].iter_mut() {
        *slot = match rng.gen_range(0..3) {
            0 => rng.gen_range(b'A'..=b'Z'),
            1 => rng.gen_range(b'a'..=b'z'),
            _ => rng.gen_range(b'0'..=b'9'),
        };
    }
    id
}
