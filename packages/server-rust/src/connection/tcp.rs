//! TCP stream connection.
//!
//! The wire carries unframed, concatenated JSON documents; a
//! [`FrameScanner`] buffers partial reads and recovers message boundaries.
//! Reads are non-blocking (`WouldBlock` means "nothing yet"); writes retry
//! briefly on a full socket buffer. The read and write halves are guarded
//! separately so a router draining the connection never contends with
//! another router forwarding a response into it.

use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, warn};

use switchboard_core::FrameScanner;

use super::Connection;

const READ_CHUNK: usize = 8192;
const WRITE_RETRY: Duration = Duration::from_millis(1);

#[derive(Debug)]
struct ReadHalf {
    stream: TcpStream,
    scanner: FrameScanner,
    /// Bytes read but not yet decodable as UTF-8 (a code point split across
    /// reads).
    undecoded: Vec<u8>,
}

/// A connection over a TCP stream.
///
/// Disconnection is observed lazily: the connected flag flips once a read
/// sees end-of-stream or either half hits a hard I/O error.
#[derive(Debug)]
pub struct TcpConnection {
    reader: Mutex<ReadHalf>,
    writer: Mutex<TcpStream>,
    peer: SocketAddr,
    connected: AtomicBool,
}

impl TcpConnection {
    /// Wraps an accepted stream.
    ///
    /// # Errors
    ///
    /// Fails when the stream cannot be switched to non-blocking mode or
    /// cloned into separate halves.
    pub fn from_stream(stream: TcpStream) -> io::Result<Self> {
        let peer = stream.peer_addr()?;
        stream.set_nonblocking(true)?;
        let writer = stream.try_clone()?;
        Ok(Self {
            reader: Mutex::new(ReadHalf {
                stream,
                scanner: FrameScanner::new(),
                undecoded: Vec::new(),
            }),
            writer: Mutex::new(writer),
            peer,
            connected: AtomicBool::new(true),
        })
    }

    /// Connects to a listening peer (client side).
    ///
    /// # Errors
    ///
    /// Fails when the connection cannot be established.
    pub fn connect(addr: impl ToSocketAddrs) -> io::Result<Self> {
        Self::from_stream(TcpStream::connect(addr)?)
    }

    /// Address of the remote peer.
    #[must_use]
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Pulls everything currently readable off the socket into the frame
    /// scanner.
    fn fill(&self, half: &mut ReadHalf) {
        let mut chunk = [0_u8; READ_CHUNK];
        loop {
            match half.stream.read(&mut chunk) {
                Ok(0) => {
                    self.connected.store(false, Ordering::Release);
                    break;
                }
                Ok(read) => {
                    half.undecoded.extend_from_slice(&chunk[..read]);
                    Self::drain_utf8(half);
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => break,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
                Err(err) => {
                    debug!(peer = %self.peer, error = %err, "tcp read failed");
                    self.connected.store(false, Ordering::Release);
                    break;
                }
            }
        }
    }

    /// Feeds the longest valid UTF-8 prefix of the undecoded bytes to the
    /// scanner, keeping a split code point for the next read and skipping
    /// bytes that can never become valid.
    fn drain_utf8(half: &mut ReadHalf) {
        let mut offset = 0;
        loop {
            match std::str::from_utf8(&half.undecoded[offset..]) {
                Ok(text) => {
                    half.scanner.feed(text);
                    offset = half.undecoded.len();
                    break;
                }
                Err(err) => {
                    let valid = err.valid_up_to();
                    if let Ok(text) = std::str::from_utf8(&half.undecoded[offset..offset + valid])
                    {
                        half.scanner.feed(text);
                    }
                    offset += valid;
                    match err.error_len() {
                        Some(invalid) => offset += invalid,
                        None => break,
                    }
                }
            }
        }
        half.undecoded.drain(..offset);
    }
}

impl Connection for TcpConnection {
    fn send(&self, message: &str) -> bool {
        if !self.is_connected() {
            return false;
        }
        let mut stream = self.writer.lock();
        let bytes = message.as_bytes();
        let mut written = 0;
        while written < bytes.len() {
            match stream.write(&bytes[written..]) {
                Ok(0) => {
                    self.connected.store(false, Ordering::Release);
                    return false;
                }
                Ok(sent) => written += sent,
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                    std::thread::sleep(WRITE_RETRY);
                }
                Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
                Err(err) => {
                    warn!(peer = %self.peer, error = %err, "tcp write failed");
                    self.connected.store(false, Ordering::Release);
                    return false;
                }
            }
        }
        true
    }

    fn receive(&self) -> Option<String> {
        let mut half = self.reader.lock();
        if let Some(document) = half.scanner.take_document() {
            return Some(document);
        }
        self.fill(&mut half);
        half.scanner.take_document()
    }

    fn is_message_available(&self) -> bool {
        let mut half = self.reader.lock();
        if half.scanner.has_document() {
            return true;
        }
        self.fill(&mut half);
        half.scanner.has_document()
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    fn disconnect(&self) {
        self.connected.store(false, Ordering::Release);
        let _ = self.writer.lock().shutdown(Shutdown::Both);
    }
}
