//! Live peer tracking and fan-out.

pub mod registry;

pub use registry::{BroadcastReport, Peer, PeerId, PeerRegistry};
