mod address;
mod session;
mod state;

pub use address::PeerAddresses;
pub use session::PeerSession;
pub use state::{ChokeState, SessionState};
