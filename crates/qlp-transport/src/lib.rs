//! Datagram transport abstraction for the QLP protocol.
//!
//! QLP has no unicast addressing at the transport layer: every frame is
//! broadcast on a fixed UDP port and devices filter by their own chip id.
//! This crate provides:
//! - [`UdpBroadcast`], a broadcast-enabled UDP socket bound to the protocol port
//! - [`memory::pair`], an in-process transport for tests and simulations
//!
//! This is the lowest layer of qlp. Everything else builds on top of the
//! [`DatagramTransport`] trait provided here.

pub mod error;
pub mod memory;
pub mod traits;
pub mod udp;

pub use error::{Result, TransportError};
pub use memory::{Injector, MemoryNetwork, MemoryTransport};
pub use traits::DatagramTransport;
pub use udp::{UdpBroadcast, UdpConfig, BROADCAST_ADDR, QLP_PORT};
