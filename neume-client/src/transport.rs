//! Transport boundary: where `WirePacket`s become OSC bytes.
//!
//! The scheduler and registry only ever see the `TransportSink` trait; the
//! UDP implementations live here, and `RecordingSink` lets tests assert on
//! exactly what would have hit the wire.

use std::fmt;
use std::io;
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use neume_osc::WirePacket;

/// Error from handing a packet to a transport sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// OSC encoding failed (oversized blob, malformed address, ...).
    Encode(String),
    /// The underlying socket send failed.
    Io(String),
    /// The sink's backing channel or socket is gone.
    Disconnected,
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::Encode(detail) => write!(f, "OSC encode failed: {}", detail),
            TransportError::Io(detail) => write!(f, "transport send failed: {}", detail),
            TransportError::Disconnected => write!(f, "transport disconnected"),
        }
    }
}

impl std::error::Error for TransportError {}

impl From<io::Error> for TransportError {
    fn from(error: io::Error) -> Self {
        TransportError::Io(error.to_string())
    }
}

impl From<rosc::OscError> for TransportError {
    fn from(error: rosc::OscError) -> Self {
        TransportError::Encode(error.to_string())
    }
}

/// Where fully-formed packets go. The core never opens sockets on its own;
/// callers inject whichever sink fits (UDP, queued UDP, a recorder).
pub trait TransportSink {
    fn send(&self, packet: WirePacket) -> Result<(), TransportError>;
}

impl<T: TransportSink + ?Sized> TransportSink for &T {
    fn send(&self, packet: WirePacket) -> Result<(), TransportError> {
        (**self).send(packet)
    }
}

impl<T: TransportSink + ?Sized> TransportSink for Box<T> {
    fn send(&self, packet: WirePacket) -> Result<(), TransportError> {
        (**self).send(packet)
    }
}

impl<T: TransportSink + ?Sized> TransportSink for std::sync::Arc<T> {
    fn send(&self, packet: WirePacket) -> Result<(), TransportError> {
        (**self).send(packet)
    }
}

/// Direct UDP sink: encode and `send_to` on the calling thread.
pub struct UdpSink {
    socket: UdpSocket,
    server_addr: SocketAddr,
}

impl UdpSink {
    /// Bind an ephemeral local socket aimed at the engine.
    pub fn connect(server_addr: impl ToSocketAddrs) -> io::Result<Self> {
        let server_addr = server_addr
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "no address resolved"))?;
        let socket = UdpSocket::bind("0.0.0.0:0")?;
        Ok(Self {
            socket,
            server_addr,
        })
    }

    pub fn new(socket: UdpSocket, server_addr: SocketAddr) -> Self {
        Self {
            socket,
            server_addr,
        }
    }

    pub fn server_addr(&self) -> SocketAddr {
        self.server_addr
    }

    pub fn try_clone_socket(&self) -> io::Result<UdpSocket> {
        self.socket.try_clone()
    }
}

impl TransportSink for UdpSink {
    fn send(&self, packet: WirePacket) -> Result<(), TransportError> {
        let encoded = rosc::encoder::encode(&packet.into_osc())?;
        self.socket.send_to(&encoded, self.server_addr)?;
        Ok(())
    }
}

/// A sink that records every packet for assertions. All sends succeed unless
/// a failure is armed, which lets tests exercise flush error paths.
pub struct RecordingSink {
    packets: Mutex<Vec<WirePacket>>,
    failing: AtomicBool,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self {
            packets: Mutex::new(Vec::new()),
            failing: AtomicBool::new(false),
        }
    }

    /// All packets sent so far.
    pub fn packets(&self) -> Vec<WirePacket> {
        self.packets.lock().map(|p| p.clone()).unwrap_or_default()
    }

    pub fn count(&self) -> usize {
        self.packets.lock().map(|p| p.len()).unwrap_or(0)
    }

    pub fn clear(&self) {
        if let Ok(mut packets) = self.packets.lock() {
            packets.clear();
        }
    }

    /// When `true`, every send fails with a transport error (and records
    /// nothing) until switched back off.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

impl Default for RecordingSink {
    fn default() -> Self {
        Self::new()
    }
}

impl TransportSink for RecordingSink {
    fn send(&self, packet: WirePacket) -> Result<(), TransportError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(TransportError::Io("injected send failure".to_string()));
        }
        match self.packets.lock() {
            Ok(mut packets) => {
                packets.push(packet);
                Ok(())
            }
            Err(_) => Err(TransportError::Disconnected),
        }
    }
}
