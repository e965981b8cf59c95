use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::os::unix::io::{AsRawFd, RawFd};
use std::sync::Arc;

use log::trace;

use crate::core_tls::{TlsError, TlsSession};
use crate::core_transfer::producer::Producer;

/// Buffered non-blocking socket shared by the control and data channels.
///
/// Reads hand raw chunks to the owner (the control handler assembles
/// CRLF lines, the data handler streams them to disk). Writes consume a
/// FIFO of producers; the owner re-arms write interest only while
/// `has_pending_output()` holds, which keeps the poller mask economical.
///
/// The channel may be upgraded to TLS at any point; from then on reads
/// and writes are routed through the rustls session.
pub struct StreamChannel {
    sock: Option<TcpStream>,
    tls: Option<TlsSession>,
    producers: VecDeque<Box<dyn Producer>>,
    out_chunk: Vec<u8>,
    out_pos: usize,
    close_when_done: bool,
}

impl StreamChannel {
    pub fn new(sock: TcpStream) -> io::Result<Self> {
        sock.set_nonblocking(true)?;
        Ok(Self {
            sock: Some(sock),
            tls: None,
            producers: VecDeque::new(),
            out_chunk: Vec::new(),
            out_pos: 0,
            close_when_done: false,
        })
    }

    pub fn fd(&self) -> RawFd {
        self.sock.as_ref().map(|s| s.as_raw_fd()).unwrap_or(-1)
    }

    pub fn is_open(&self) -> bool {
        self.sock.is_some()
    }

    pub fn is_secured(&self) -> bool {
        self.tls.is_some()
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        match self.sock.as_ref() {
            Some(sock) => sock.local_addr(),
            None => Err(io::Error::from(io::ErrorKind::NotConnected)),
        }
    }

    pub fn peer_addr(&self) -> io::Result<SocketAddr> {
        match self.sock.as_ref() {
            Some(sock) => sock.peer_addr(),
            None => Err(io::Error::from(io::ErrorKind::NotConnected)),
        }
    }

    /// Read a chunk of (decrypted) bytes. `Ok(0)` signals EOF.
    pub fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let sock = match self.sock.as_mut() {
            Some(sock) => sock,
            None => return Ok(0),
        };
        match self.tls.as_mut() {
            Some(tls) => tls.read(sock, buf),
            None => loop {
                match sock.read(buf) {
                    Ok(n) => return Ok(n),
                    Err(ref err) if err.kind() == io::ErrorKind::Interrupted => continue,
                    Err(err) => return Err(err),
                }
            },
        }
    }

    /// Queue a fixed chunk of bytes behind any existing producers.
    pub fn push(&mut self, data: Vec<u8>) {
        self.producers
            .push_back(Box::new(crate::core_transfer::BytesProducer::new(data)));
    }

    pub fn push_producer(&mut self, producer: Box<dyn Producer>) {
        self.producers.push_back(producer);
    }

    /// Ask for the channel to be closed once every producer has drained.
    pub fn set_close_when_done(&mut self) {
        self.close_when_done = true;
    }

    pub fn close_when_done(&self) -> bool {
        self.close_when_done
    }

    pub fn has_pending_output(&self) -> bool {
        self.out_pos < self.out_chunk.len()
            || !self.producers.is_empty()
            || self.tls.as_ref().map(|t| t.wants_write()).unwrap_or(false)
    }

    pub fn is_handshaking(&self) -> bool {
        self.tls.as_ref().map(|t| t.is_handshaking()).unwrap_or(false)
    }

    /// Pump the producer FIFO into the socket until it refuses more data
    /// or everything is drained. Returns the number of bytes accepted by
    /// the socket and whether the queue is now fully drained.
    pub fn send_pending(&mut self) -> io::Result<(usize, bool)> {
        let mut total = 0usize;
        loop {
            if self.out_pos >= self.out_chunk.len() {
                self.out_chunk.clear();
                self.out_pos = 0;
                match self.producers.front_mut() {
                    None => break,
                    Some(producer) => {
                        let chunk = producer.more()?;
                        if chunk.is_empty() {
                            self.producers.pop_front();
                            continue;
                        }
                        self.out_chunk = chunk;
                    }
                }
            }

            let sock = match self.sock.as_mut() {
                Some(sock) => sock,
                None => return Ok((total, true)),
            };
            let data = &self.out_chunk[self.out_pos..];
            let written = match self.tls.as_mut() {
                Some(tls) => tls.write(sock, data),
                None => sock.write(data),
            };
            match written {
                Ok(0) => return Err(io::Error::from(io::ErrorKind::WriteZero)),
                Ok(n) => {
                    self.out_pos += n;
                    total += n;
                }
                Err(ref err) if err.kind() == io::ErrorKind::WouldBlock => {
                    return Ok((total, false))
                }
                Err(ref err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(err),
            }
        }

        // producers drained; flush any buffered TLS records
        if let (Some(tls), Some(sock)) = (self.tls.as_mut(), self.sock.as_mut()) {
            let drained = tls.flush(sock)?;
            return Ok((total, drained));
        }
        Ok((total, true))
    }

    /// Upgrade the channel to TLS. Any pending cleartext output is pushed
    /// out first so the reply that negotiated the upgrade is not wrapped.
    pub fn start_tls(&mut self, config: Arc<rustls::ServerConfig>) -> Result<(), TlsError> {
        self.flush_cleartext();
        self.tls = Some(TlsSession::new(config)?);
        Ok(())
    }

    /// Revert to cleartext (CCC): send close-notify, drop the TLS state
    /// and keep the raw socket.
    pub fn stop_tls(&mut self) {
        if let (Some(mut tls), Some(sock)) = (self.tls.take(), self.sock.as_mut()) {
            tls.shutdown(sock);
        }
    }

    fn flush_cleartext(&mut self) {
        // bounded: the upgrade reply is small and the socket buffer of a
        // fresh control connection will take it in one write
        for _ in 0..8 {
            match self.send_pending() {
                Ok((_, true)) => return,
                Ok((_, false)) => std::thread::sleep(std::time::Duration::from_millis(5)),
                Err(err) => {
                    trace!("flush before TLS upgrade failed: {}", err);
                    return;
                }
            }
        }
    }

    /// Close the socket, performing the TLS shutdown dance first when the
    /// channel was secured. The caller must already have unregistered the
    /// fd from the poller.
    pub fn close(&mut self) {
        if let (Some(tls), Some(sock)) = (self.tls.as_mut(), self.sock.as_mut()) {
            tls.shutdown(sock);
        }
        self.tls = None;
        self.sock = None;
        self.producers.clear();
        self.out_chunk.clear();
        self.out_pos = 0;
    }
}
