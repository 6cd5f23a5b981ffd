//! SOCKS5 Protocol Implementation
//!
//! Wire codec and per-hop client handshake.

pub mod codec;
pub mod constants;
pub mod session;
pub mod types;

pub use codec::Decoded;
pub use constants::*;
pub use session::{HandshakeSession, SessionState};
pub use types::*;
