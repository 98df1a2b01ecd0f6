//! Dedicated UDP send thread.
//!
//! Packets are pre-encoded on the calling thread and pushed to a bounded
//! channel; a named sender thread drains the channel and performs the actual
//! `send_to`, keeping socket I/O off latency-sensitive callers. A full queue
//! falls back to a direct send rather than dropping the packet.

use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender, TrySendError};

use neume_osc::WirePacket;

use crate::transport::{TransportError, TransportSink};

/// Channel capacity for the send queue; the sender thread drains faster than
/// any realistic control-plane burst.
const SEND_QUEUE_CAPACITY: usize = 512;

struct SendEntry {
    encoded: Vec<u8>,
}

/// A `TransportSink` backed by the dedicated sender thread.
pub struct QueuedUdpSink {
    tx: Sender<SendEntry>,
    queue_depth: Arc<AtomicUsize>,
    fallback_socket: UdpSocket,
    server_addr: SocketAddr,
}

/// Spawn the sender thread and return the sink plus its join handle. The
/// thread exits once the sink (and with it the channel) is dropped.
pub fn spawn_sender(
    socket: UdpSocket,
    server_addr: SocketAddr,
) -> io::Result<(QueuedUdpSink, JoinHandle<()>)> {
    let thread_socket = socket.try_clone()?;
    let (tx, rx) = crossbeam_channel::bounded::<SendEntry>(SEND_QUEUE_CAPACITY);
    let queue_depth = Arc::new(AtomicUsize::new(0));
    let depth = queue_depth.clone();
    let handle = thread::Builder::new()
        .name("neume-sender".into())
        .spawn(move || sender_loop(thread_socket, server_addr, rx, depth))?;
    Ok((
        QueuedUdpSink {
            tx,
            queue_depth,
            fallback_socket: socket,
            server_addr,
        },
        handle,
    ))
}

fn sender_loop(
    socket: UdpSocket,
    server_addr: SocketAddr,
    rx: Receiver<SendEntry>,
    queue_depth: Arc<AtomicUsize>,
) {
    while let Ok(entry) = rx.recv() {
        queue_depth.fetch_sub(1, Ordering::Relaxed);
        if let Err(error) = socket.send_to(&entry.encoded, server_addr) {
            log::warn!(
                target: "neume::sender",
                "background send to {} failed: {}",
                server_addr, error
            );
        }
    }
}

impl QueuedUdpSink {
    /// Current queue depth, for telemetry.
    pub fn queue_depth(&self) -> usize {
        self.queue_depth.load(Ordering::Relaxed)
    }

    pub fn server_addr(&self) -> SocketAddr {
        self.server_addr
    }
}

impl TransportSink for QueuedUdpSink {
    fn send(&self, packet: WirePacket) -> Result<(), TransportError> {
        let encoded = rosc::encoder::encode(&packet.into_osc())?;
        match self.tx.try_send(SendEntry { encoded }) {
            Ok(()) => {
                self.queue_depth.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(TrySendError::Full(entry)) => {
                log::warn!(
                    target: "neume::sender",
                    "send queue full, falling back to direct send"
                );
                self.fallback_socket.send_to(&entry.encoded, self.server_addr)?;
                Ok(())
            }
            Err(TrySendError::Disconnected(_)) => Err(TransportError::Disconnected),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use neume_osc::{WireArg, WireMessage};

    #[test]
    fn queued_sink_delivers_packets() {
        let receiver = UdpSocket::bind("127.0.0.1:0").unwrap();
        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        let (sink, handle) = spawn_sender(socket, receiver.local_addr().unwrap()).unwrap();

        sink.send(WireMessage::new("/g_new", vec![WireArg::Int(1)]).into())
            .unwrap();

        let mut buffer = [0u8; 1536];
        let (len, _) = receiver.recv_from(&mut buffer).unwrap();
        let (_, packet) = rosc::decoder::decode_udp(&buffer[..len]).unwrap();
        match packet {
            rosc::OscPacket::Message(message) => assert_eq!(message.addr, "/g_new"),
            other => panic!("expected message, got {:?}", other),
        }

        drop(sink);
        handle.join().unwrap();
    }
}
