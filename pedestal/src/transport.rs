//! Channel transport
//!
//! A [`Channel`] moves whole datagrams between the server and firmware.
//! Sending and receiving never block: [`Channel::try_receive`] returns
//! `Ok(None)` when nothing is pending. [`UdpChannel`] is the production
//! implementation over a non-blocking UDP socket with a fixed firmware
//! peer; datagrams from any other sender are dropped.

use std::io::ErrorKind;
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, info};

use crate::error::TransportError;

/// Bidirectional datagram channel to the firmware.
pub trait Channel: Send + Sync {
    /// Send one datagram to the firmware.
    fn send(&self, bytes: &[u8]) -> Result<(), TransportError>;

    /// Take one pending datagram, if any.
    fn try_receive(&self) -> Result<Option<Vec<u8>>, TransportError>;

    /// Close the channel. Closing twice is a no-op.
    fn close(&self);

    fn is_open(&self) -> bool;

    /// Datagrams dropped because they came from an unexpected sender.
    fn rejected_datagrams(&self) -> u64 {
        0
    }
}

/// Opens channels for the link's initialization loop.
pub trait ChannelFactory: Send + Sync {
    fn open(&self) -> Result<Arc<dyn Channel>, TransportError>;

    /// Configured local address, for diagnostics.
    fn local_address(&self) -> String;

    /// Configured firmware address, for diagnostics.
    fn firmware_address(&self) -> String;
}

/// Resolve an address string to its first socket address.
pub fn resolve(address: &str) -> Result<SocketAddr, TransportError> {
    address
        .to_socket_addrs()
        .map_err(|source| TransportError::Resolve {
            address: address.to_string(),
            source,
        })?
        .next()
        .ok_or_else(|| TransportError::NoAddress(address.to_string()))
}

/// Non-blocking UDP socket bound locally with a fixed firmware peer.
pub struct UdpChannel {
    socket: Mutex<Option<UdpSocket>>,
    local: SocketAddr,
    peer: SocketAddr,
    max_datagram: usize,
    rejected: AtomicU64,
}

impl UdpChannel {
    /// Resolve both addresses, bind and switch to non-blocking mode.
    pub fn open(local: &str, peer: &str, max_datagram: usize) -> Result<Self, TransportError> {
        let local_addr = resolve(local)?;
        let peer = resolve(peer)?;
        let socket = UdpSocket::bind(local_addr).map_err(|source| TransportError::Bind {
            address: local_addr,
            source,
        })?;
        socket.set_nonblocking(true)?;
        let local = socket.local_addr()?;
        info!("UDP channel bound to {} (firmware at {})", local, peer);
        Ok(Self {
            socket: Mutex::new(Some(socket)),
            local,
            peer,
            max_datagram,
            rejected: AtomicU64::new(0),
        })
    }

    /// Bound local address (with the OS-assigned port, if any).
    pub fn local_addr(&self) -> SocketAddr {
        self.local
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    fn socket(&self) -> MutexGuard<'_, Option<UdpSocket>> {
        self.socket.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Channel for UdpChannel {
    fn send(&self, bytes: &[u8]) -> Result<(), TransportError> {
        let guard = self.socket();
        let socket = guard.as_ref().ok_or(TransportError::Closed)?;
        let sent = socket.send_to(bytes, self.peer)?;
        if sent != bytes.len() {
            return Err(TransportError::ShortSend {
                sent,
                len: bytes.len(),
            });
        }
        Ok(())
    }

    fn try_receive(&self) -> Result<Option<Vec<u8>>, TransportError> {
        let guard = self.socket();
        let socket = guard.as_ref().ok_or(TransportError::Closed)?;
        loop {
            let mut buf = vec![0u8; self.max_datagram];
            match socket.recv_from(&mut buf) {
                Ok((len, from)) if from == self.peer => {
                    buf.truncate(len);
                    return Ok(Some(buf));
                }
                Ok((len, from)) => {
                    self.rejected.fetch_add(1, Ordering::Relaxed);
                    debug!("Dropping {} byte datagram from unexpected sender {}", len, from);
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(None),
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn close(&self) {
        if self.socket().take().is_some() {
            info!("UDP channel {} closed", self.local);
        }
    }

    fn is_open(&self) -> bool {
        self.socket().is_some()
    }

    fn rejected_datagrams(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }
}

/// Opens a fresh [`UdpChannel`] for every initialization attempt, so
/// address resolution is retried along with the bind.
#[derive(Debug, Clone)]
pub struct UdpChannelFactory {
    local: String,
    peer: String,
    max_datagram: usize,
}

impl UdpChannelFactory {
    pub fn new(local: impl Into<String>, peer: impl Into<String>, max_datagram: usize) -> Self {
        Self {
            local: local.into(),
            peer: peer.into(),
            max_datagram,
        }
    }
}

impl ChannelFactory for UdpChannelFactory {
    fn open(&self) -> Result<Arc<dyn Channel>, TransportError> {
        let channel = UdpChannel::open(&self.local, &self.peer, self.max_datagram)?;
        Ok(Arc::new(channel))
    }

    fn local_address(&self) -> String {
        self.local.clone()
    }

    fn firmware_address(&self) -> String {
        self.peer.clone()
    }
}
