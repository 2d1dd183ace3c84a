//! UDP transport to the fleet broker.
//!
//! Frames larger than one datagram are split into chunks. Every datagram is
//! `<u16 little-endian chunk number><chunk bytes>`, numbered from 0, with the
//! final chunk of a frame numbered [`LAST_CHUNK`]. A single-chunk frame is
//! therefore just one `0xFFFF` datagram.
//!
//! [`UdpTransport::start`] spawns three tasks:
//! 1. A listener that reassembles chunks and hands complete frames to the
//!    receive callback.
//! 2. A sender that drains the outbound queue and transmits each frame's
//!    chunks back to back, so chunks of different frames never interleave.
//! 3. A broadcaster that re-queues the standing identity payload at the
//!    configured interval.
//!
//! All three exit when [`UdpTransport::stop`] is called or the transport is
//! dropped.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::net::UdpSocket;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, trace, warn};

use crate::config::ModuleConfig;
use crate::error::TransportError;
use crate::transport::{ReceiveCallback, Transport};

/// Chunk number marking the final chunk of a frame.
pub const LAST_CHUNK: u16 = 0xFFFF;

const HEADER_LEN: usize = 2;

/// Number of chunks `len` bytes are split into.
fn chunk_count(len: usize, max_chunk: usize) -> usize {
    len.div_ceil(max_chunk.max(1))
}

/// Split `frame` into numbered datagrams of at most `max_chunk` payload bytes.
///
/// An empty frame produces no datagrams.
pub fn chunk_frame(frame: &[u8], max_chunk: usize) -> Result<Vec<Vec<u8>>, TransportError> {
    let count = chunk_count(frame.len(), max_chunk);
    if count > LAST_CHUNK as usize {
        return Err(TransportError::FrameTooLarge(frame.len()));
    }

    Ok(frame
        .chunks(max_chunk.max(1))
        .enumerate()
        .map(|(index, bytes)| {
            let number = if index + 1 == count {
                LAST_CHUNK
            } else {
                index as u16
            };
            let mut datagram = Vec::with_capacity(HEADER_LEN + bytes.len());
            datagram.extend_from_slice(&number.to_le_bytes());
            datagram.extend_from_slice(bytes);
            datagram
        })
        .collect())
}

/// Rebuilds frames from a stream of chunk datagrams.
#[derive(Debug, Default)]
pub struct Reassembler {
    buffer: Vec<u8>,
    next: u16,
    discarding: bool,
}

impl Reassembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one datagram. Returns the completed frame when `datagram` is the
    /// final chunk.
    pub fn push(&mut self, datagram: &[u8]) -> Option<Vec<u8>> {
        if datagram.len() < HEADER_LEN {
            trace!("Dropping runt datagram ({} bytes)", datagram.len());
            return None;
        }
        let number = u16::from_le_bytes([datagram[0], datagram[1]]);
        let bytes = &datagram[HEADER_LEN..];

        match number {
            0 => {
                self.buffer.clear();
                self.discarding = false;
            }
            LAST_CHUNK => {}
            n if n != self.next => {
                if !self.discarding {
                    warn!("Chunk {n} arrived, expected {}; dropping frame", self.next);
                }
                self.buffer.clear();
                self.discarding = true;
                return None;
            }
            _ => {}
        }

        if number == LAST_CHUNK {
            let discarding = std::mem::take(&mut self.discarding);
            self.next = 0;
            if discarding {
                self.buffer.clear();
                return None;
            }
            self.buffer.extend_from_slice(bytes);
            return Some(std::mem::take(&mut self.buffer));
        }

        if !self.discarding {
            self.buffer.extend_from_slice(bytes);
            self.next = number.wrapping_add(1);
        }
        None
    }
}

/// [`Transport`] over a UDP socket talking to one broker address.
pub struct UdpTransport {
    config: ModuleConfig,
    socket: Arc<UdpSocket>,
    on_receive: ReceiveCallback,
    outbound_tx: mpsc::Sender<Vec<u8>>,
    outbound_rx: Mutex<Option<mpsc::Receiver<Vec<u8>>>>,
    identity: Arc<RwLock<Option<String>>>,
    shutdown_tx: broadcast::Sender<()>,
    started: AtomicBool,
    stopped: AtomicBool,
}

impl UdpTransport {
    /// Bind the listen address. Nothing is sent or received until
    /// [`start`](Self::start).
    pub async fn bind(
        config: ModuleConfig,
        on_receive: ReceiveCallback,
    ) -> Result<Self, TransportError> {
        let addr = config.listen_addr;
        let socket = UdpSocket::bind(addr)
            .await
            .map_err(|source| TransportError::Bind { addr, source })?;

        info!("UDP listener at {}", socket.local_addr()?);
        info!("Expected broker at {}", config.broker_addr);
        debug!("UDP max chunk size {}", config.max_datagram_size);

        let (outbound_tx, outbound_rx) = mpsc::channel(config.send_queue_capacity.max(1));
        let (shutdown_tx, _) = broadcast::channel(1);

        Ok(Self {
            config,
            socket: Arc::new(socket),
            on_receive,
            outbound_tx,
            outbound_rx: Mutex::new(Some(outbound_rx)),
            identity: Arc::new(RwLock::new(None)),
            shutdown_tx,
            started: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
        })
    }

    /// The address actually bound, useful when binding port 0.
    pub fn local_addr(&self) -> Result<SocketAddr, TransportError> {
        Ok(self.socket.local_addr()?)
    }

    /// Spawn the listener, sender and identity broadcaster tasks.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self) -> Result<(), TransportError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(TransportError::AlreadyStarted);
        }
        let outbound_rx = self
            .outbound_rx
            .lock()
            .take()
            .ok_or(TransportError::AlreadyStarted)?;

        self.spawn_listener();
        self.spawn_sender(outbound_rx);
        self.spawn_broadcaster();
        Ok(())
    }

    /// Signal every task to exit. Further sends fail with
    /// [`TransportError::Closed`].
    pub fn stop(&self) {
        if !self.stopped.swap(true, Ordering::SeqCst) {
            info!("Stopping UDP transport");
            let _ = self.shutdown_tx.send(());
        }
    }

    fn spawn_listener(&self) {
        let socket = Arc::clone(&self.socket);
        let on_receive = Arc::clone(&self.on_receive);
        let mut shutdown = self.shutdown_tx.subscribe();
        let buffer_size = self
            .config
            .recv_buffer_size
            .max(self.config.max_datagram_size + HEADER_LEN);

        tokio::spawn(async move {
            let mut buf = vec![0u8; buffer_size];
            let mut reassembler = Reassembler::new();
            loop {
                tokio::select! {
                    result = socket.recv_from(&mut buf) => {
                        match result {
                            Ok((len, src_addr)) => {
                                trace!("Received {len} byte datagram from {src_addr}");
                                if let Some(frame) = reassembler.push(&buf[..len]) {
                                    debug!("Reassembled frame ({} bytes)", frame.len());
                                    on_receive(&frame);
                                }
                            }
                            Err(e) => {
                                warn!("UDP recv error: {e}");
                            }
                        }
                    }
                    _ = shutdown.recv() => {
                        debug!("UDP listener shutting down");
                        break;
                    }
                }
            }
        });
    }

    fn spawn_sender(&self, mut outbound_rx: mpsc::Receiver<Vec<u8>>) {
        let socket = Arc::clone(&self.socket);
        let broker_addr = self.config.broker_addr;
        let max_chunk = self.config.max_datagram_size;
        let chunk_delay = self.config.chunk_delay;
        let mut shutdown = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    frame = outbound_rx.recv() => {
                        let Some(frame) = frame else {
                            break;
                        };
                        send_chunked(&socket, broker_addr, &frame, max_chunk, chunk_delay).await;
                    }
                    _ = shutdown.recv() => {
                        debug!("UDP sender shutting down");
                        break;
                    }
                }
            }
        });
    }

    fn spawn_broadcaster(&self) {
        let identity = Arc::clone(&self.identity);
        let outbound_tx = self.outbound_tx.clone();
        let interval = self.config.announce_interval;
        let mut shutdown = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            loop {
                let payload = identity.read().clone();
                if let Some(payload) = payload.filter(|p| !p.is_empty()) {
                    match outbound_tx.try_send(payload.into_bytes()) {
                        Ok(()) => trace!("Identity payload queued"),
                        Err(TrySendError::Full(_)) => {
                            debug!("Outbound queue full, skipping identity broadcast");
                        }
                        Err(TrySendError::Closed(_)) => break,
                    }
                }
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {}
                    _ = shutdown.recv() => {
                        debug!("Identity broadcaster shutting down");
                        break;
                    }
                }
            }
        });
    }
}

async fn send_chunked(
    socket: &UdpSocket,
    broker_addr: SocketAddr,
    frame: &[u8],
    max_chunk: usize,
    chunk_delay: Duration,
) {
    let datagrams = match chunk_frame(frame, max_chunk) {
        Ok(datagrams) => datagrams,
        Err(e) => {
            warn!("Dropping outbound frame: {e}");
            return;
        }
    };

    for (index, datagram) in datagrams.iter().enumerate() {
        if index > 0 {
            tokio::time::sleep(chunk_delay).await;
        }
        if let Err(e) = socket.send_to(datagram, broker_addr).await {
            warn!("UDP send to {broker_addr} failed: {e}");
            return;
        }
        trace!("Sent chunk {index} ({} bytes)", datagram.len());
    }
}

impl Transport for UdpTransport {
    fn send(&self, frame: &[u8]) -> Result<(), TransportError> {
        if self.stopped.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        if chunk_count(frame.len(), self.config.max_datagram_size) > LAST_CHUNK as usize {
            return Err(TransportError::FrameTooLarge(frame.len()));
        }
        self.outbound_tx
            .try_send(frame.to_vec())
            .map_err(|e| match e {
                TrySendError::Full(_) => TransportError::QueueFull,
                TrySendError::Closed(_) => TransportError::Closed,
            })
    }

    fn set_identity_payload(&self, payload: String) {
        *self.identity.write() = Some(payload);
    }
}

impl Drop for UdpTransport {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(());
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk_number(datagram: &[u8]) -> u16 {
        u16::from_le_bytes([datagram[0], datagram[1]])
    }

    #[test]
    fn test_single_chunk_frame() {
        let datagrams = chunk_frame(b"hello", 8192).unwrap();
        assert_eq!(datagrams.len(), 1);
        assert_eq!(datagrams[0], b"\xff\xffhello".to_vec());
    }

    #[test]
    fn test_multi_chunk_numbering() {
        let frame: Vec<u8> = (0..10).collect();
        let datagrams = chunk_frame(&frame, 4).unwrap();
        let numbers: Vec<u16> = datagrams.iter().map(|d| chunk_number(d)).collect();
        assert_eq!(numbers, vec![0, 1, LAST_CHUNK]);
        assert_eq!(&datagrams[2][2..], &[8, 9]);
    }

    #[test]
    fn test_empty_frame_sends_nothing() {
        assert!(chunk_frame(b"", 16).unwrap().is_empty());
    }

    #[test]
    fn test_frame_too_large() {
        let frame = vec![0u8; LAST_CHUNK as usize + 1];
        assert!(matches!(
            chunk_frame(&frame, 1),
            Err(TransportError::FrameTooLarge(_))
        ));
    }

    #[test]
    fn test_reassemble_in_order() {
        let frame: Vec<u8> = (0..=200).collect();
        let mut reassembler = Reassembler::new();
        let mut delivered = Vec::new();
        for datagram in chunk_frame(&frame, 64).unwrap() {
            if let Some(frame) = reassembler.push(&datagram) {
                delivered.push(frame);
            }
        }
        assert_eq!(delivered, vec![frame]);
    }

    #[test]
    fn test_reassembler_drops_runts() {
        let mut reassembler = Reassembler::new();
        assert_eq!(reassembler.push(b""), None);
        assert_eq!(reassembler.push(b"\xff"), None);
        assert_eq!(reassembler.push(b"\xff\xffok"), Some(b"ok".to_vec()));
    }

    #[test]
    fn test_chunk_zero_resets_partial_frame() {
        let mut reassembler = Reassembler::new();
        assert_eq!(reassembler.push(b"\x00\x00stale"), None);
        assert_eq!(reassembler.push(b"\x00\x00new-"), None);
        assert_eq!(reassembler.push(b"\xff\xffframe"), Some(b"new-frame".to_vec()));
    }

    #[test]
    fn test_gap_drops_frame_until_next_start() {
        let mut reassembler = Reassembler::new();
        assert_eq!(reassembler.push(b"\x00\x00aa"), None);
        assert_eq!(reassembler.push(b"\x02\x00cc"), None);
        assert_eq!(reassembler.push(b"\xff\xffdd"), None);
        assert_eq!(reassembler.push(b"\xff\xffnext"), Some(b"next".to_vec()));
    }

    fn loopback_config(broker: SocketAddr) -> ModuleConfig {
        ModuleConfig {
            broker_addr: broker,
            listen_addr: "127.0.0.1:0".parse().unwrap(),
            max_datagram_size: 16,
            chunk_delay: Duration::from_millis(1),
            ..ModuleConfig::default()
        }
    }

    async fn recv_frame(broker: &UdpSocket) -> Vec<u8> {
        let mut reassembler = Reassembler::new();
        let mut buf = vec![0u8; 1024];
        loop {
            let (len, _) = tokio::time::timeout(Duration::from_secs(5), broker.recv_from(&mut buf))
                .await
                .unwrap()
                .unwrap();
            if let Some(frame) = reassembler.push(&buf[..len]) {
                return frame;
            }
        }
    }

    #[tokio::test]
    async fn test_udp_send_is_chunked() {
        let broker = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let config = loopback_config(broker.local_addr().unwrap());
        let transport = UdpTransport::bind(config, Arc::new(|_: &[u8]| {}))
            .await
            .unwrap();
        transport.start().unwrap();

        let frame = br#"{"ty":"g","mt":1008,"ms":{"DS":"chunked across datagrams"}}"#.to_vec();
        transport.send(&frame).unwrap();
        assert_eq!(recv_frame(&broker).await, frame);

        transport.stop();
        assert!(matches!(transport.send(b"x"), Err(TransportError::Closed)));
    }

    #[tokio::test]
    async fn test_udp_receive_reassembles() {
        let broker = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let config = loopback_config(broker.local_addr().unwrap());
        let (tx, mut rx) = mpsc::unbounded_channel::<Vec<u8>>();
        let transport = UdpTransport::bind(
            config,
            Arc::new(move |frame: &[u8]| {
                let _ = tx.send(frame.to_vec());
            }),
        )
        .await
        .unwrap();
        transport.start().unwrap();

        let target = transport.local_addr().unwrap();
        let frame = b"0123456789abcdefghijklmnopqrstuvwxyz".to_vec();
        for datagram in chunk_frame(&frame, 10).unwrap() {
            broker.send_to(&datagram, target).await.unwrap();
        }

        let received = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received, frame);
        transport.stop();
    }

    #[tokio::test]
    async fn test_identity_payload_is_broadcast() {
        let broker = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let config = loopback_config(broker.local_addr().unwrap());
        let transport = UdpTransport::bind(config, Arc::new(|_: &[u8]| {}))
            .await
            .unwrap();
        transport.set_identity_payload(r#"{"ty":"uv","mt":9100}"#.to_string());
        transport.start().unwrap();

        assert_eq!(recv_frame(&broker).await, br#"{"ty":"uv","mt":9100}"#.to_vec());
        transport.stop();
    }

    #[tokio::test]
    async fn test_full_queue_refuses_sends() {
        let broker = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let config = ModuleConfig {
            send_queue_capacity: 2,
            ..loopback_config(broker.local_addr().unwrap())
        };
        let transport = UdpTransport::bind(config, Arc::new(|_: &[u8]| {}))
            .await
            .unwrap();

        // Not started yet, so nothing drains the queue.
        transport.send(b"one").unwrap();
        transport.send(b"two").unwrap();
        assert!(matches!(transport.send(b"three"), Err(TransportError::QueueFull)));

        transport.start().unwrap();
        assert_eq!(recv_frame(&broker).await, b"one".to_vec());
        assert_eq!(recv_frame(&broker).await, b"two".to_vec());
        transport.stop();
    }

    #[tokio::test]
    async fn test_start_twice_fails() {
        let broker = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let transport = UdpTransport::bind(
            loopback_config(broker.local_addr().unwrap()),
            Arc::new(|_: &[u8]| {}),
        )
        .await
        .unwrap();
        transport.start().unwrap();
        assert!(matches!(transport.start(), Err(TransportError::AlreadyStarted)));
    }
}
