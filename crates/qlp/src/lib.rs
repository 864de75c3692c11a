//! Discover and control QLP LED strip controllers over UDP.
//!
//! QLP is the broadcast protocol spoken by a family of Wi-Fi LED strip
//! controllers. A client broadcasts a discovery request, devices announce
//! themselves, and every subsequent command is broadcast with the target's
//! chip id in the payload.
//!
//! # Crate Structure
//!
//! - [`transport`]: Datagram transport (UDP broadcast socket, in-memory pair)
//! - [`frame`]: Frame codec, command table, control and discovery payloads
//! - [`engine`]: Receive loop, device registry, command correlation and
//!   device handles (behind the default `engine` feature)

/// Re-export transport types.
pub mod transport {
    pub use qlp_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use qlp_frame::*;
}

/// Re-export engine types (requires `engine` feature).
#[cfg(feature = "engine")]
pub mod engine {
    pub use qlp_engine::*;
}
