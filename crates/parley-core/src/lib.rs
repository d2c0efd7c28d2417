//! parley-core: shared protocol library for the parley chat service.
//!
//! Provides the packet model, CBOR codec, transport-agnostic frame traits,
//! length-prefixed stream framing, password hashing and bearer tokens.

pub mod codec;
pub mod error;
pub mod packet;
pub mod password;
pub mod token;
pub mod transport;

// Re-export commonly used items at crate root.
pub use codec::{decode, encode, read_packet, write_packet, FrameDecoder, DEFAULT_MAX_FRAME_SIZE};
pub use error::{is_connection_closed, ParleyError, ParleyResult};
pub use packet::{DirectMessage, Packet, PacketKind};
pub use password::PasswordHash;
pub use token::{create_token, generate_secret, verify_token};
pub use transport::{FrameSink, FrameSource};
