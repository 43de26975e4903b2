/// Explicit lifecycle states for a peer connection (SPEC_FULL.md §4.3/§9).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Handshaking,
    Streaming,
    Closed,
}

/// Local/remote choke and interest substate, meaningful once in `Streaming`.
/// `am_choking` is not tracked: this is a leech-only client (SPEC_FULL.md §1
/// Non-goals), so we never serve Requests and the peer's choke state of us
/// never factors into any decision.
#[derive(Debug, Clone, Copy)]
pub struct ChokeState {
    pub am_interested: bool,
    pub peer_choking: bool,
    pub peer_interested: bool,
}

impl ChokeState {
    pub fn new() -> Self {
        Self {
            am_interested: false,
            peer_choking: true,
            peer_interested: false,
        }
    }
}

impl Default for ChokeState {
    fn default() -> Self {
        Self::new()
    }
}
