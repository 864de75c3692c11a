//! In-process broadcast medium.
//!
//! [`pair`] returns the engine-facing [`MemoryTransport`] and the
//! [`MemoryNetwork`] that plays the role of every other participant: it sees
//! each broadcast datagram and can inject datagrams from arbitrary sources.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

use bytes::Bytes;
use tokio::sync::{mpsc, Mutex};

use crate::error::{Result, TransportError};
use crate::traits::DatagramTransport;
use crate::udp::QLP_PORT;

type Inbound = (Bytes, SocketAddr);

/// Engine side of an in-memory broadcast medium.
#[derive(Debug)]
pub struct MemoryTransport {
    local_addr: SocketAddr,
    loopback: bool,
    outbound: mpsc::UnboundedSender<Bytes>,
    echo: mpsc::UnboundedSender<Inbound>,
    inbound: Mutex<mpsc::UnboundedReceiver<Inbound>>,
}

/// Network side of an in-memory broadcast medium.
#[derive(Debug)]
pub struct MemoryNetwork {
    sent: mpsc::UnboundedReceiver<Bytes>,
    injector: Injector,
}

/// Cloneable handle that delivers datagrams to a [`MemoryTransport`].
#[derive(Debug, Clone)]
pub struct Injector {
    tx: mpsc::UnboundedSender<Inbound>,
}

/// Create a connected transport/network pair without local echo.
pub fn pair() -> (MemoryTransport, MemoryNetwork) {
    build(false)
}

/// Create a pair whose transport receives a copy of everything it broadcasts,
/// like a UDP socket bound to the port it broadcasts on.
pub fn pair_with_loopback() -> (MemoryTransport, MemoryNetwork) {
    build(true)
}

fn build(loopback: bool) -> (MemoryTransport, MemoryNetwork) {
    let (out_tx, out_rx) = mpsc::unbounded_channel();
    let (in_tx, in_rx) = mpsc::unbounded_channel();
    let transport = MemoryTransport {
        local_addr: SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::LOCALHOST, QLP_PORT)),
        loopback,
        outbound: out_tx,
        echo: in_tx.clone(),
        inbound: Mutex::new(in_rx),
    };
    let network = MemoryNetwork {
        sent: out_rx,
        injector: Injector { tx: in_tx },
    };
    (transport, network)
}

impl MemoryTransport {
    /// Source address used for looped-back datagrams.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

impl DatagramTransport for MemoryTransport {
    async fn broadcast(&self, datagram: &[u8]) -> Result<usize> {
        let bytes = Bytes::copy_from_slice(datagram);
        // Nobody listening is not an error on a broadcast medium.
        let _ = self.outbound.send(bytes.clone());
        if self.loopback {
            let _ = self.echo.send((bytes, self.local_addr));
        }
        Ok(datagram.len())
    }

    async fn recv_from(&self, buf: &mut [u8]) -> Result<(usize, SocketAddr)> {
        let mut inbound = self.inbound.lock().await;
        let (datagram, from) = inbound.recv().await.ok_or(TransportError::Closed)?;
        let len = datagram.len().min(buf.len());
        buf[..len].copy_from_slice(&datagram[..len]);
        Ok((len, from))
    }
}

impl MemoryNetwork {
    /// Wait for the next datagram broadcast by the transport.
    pub async fn next_broadcast(&mut self) -> Option<Bytes> {
        self.sent.recv().await
    }

    /// Take the next broadcast datagram if one is already queued.
    pub fn try_next_broadcast(&mut self) -> Option<Bytes> {
        self.sent.try_recv().ok()
    }

    /// Deliver a datagram to the transport as if sent from `from`.
    pub fn inject(&self, datagram: impl Into<Bytes>, from: SocketAddr) -> Result<()> {
        self.injector.inject(datagram, from)
    }

    /// A cloneable injector for use from other tasks.
    pub fn injector(&self) -> Injector {
        self.injector.clone()
    }
}

impl Injector {
    /// Deliver a datagram to the transport as if sent from `from`.
    pub fn inject(&self, datagram: impl Into<Bytes>, from: SocketAddr) -> Result<()> {
        self.tx
            .send((datagram.into(), from))
            .map_err(|_| TransportError::Closed)
    }
}
