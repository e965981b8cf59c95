use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::sync::Arc;

use log::trace;

use crate::constants::TLS_SHUTDOWN_RETRIES;
use crate::core_tls::error::TlsError;

/// Server-side TLS state machine wrapped around a non-blocking socket.
///
/// The rustls connection drives the handshake implicitly: as long as the
/// owner keeps pumping `read`/`flush` on readiness events and re-arms
/// write interest whenever `wants_write()` reports pending records, the
/// handshake and renegotiations complete without explicit states. This
/// mirrors the WANT_READ/WANT_WRITE re-arming contract of the reactor.
pub struct TlsSession {
    conn: rustls::ServerConnection,
}

impl TlsSession {
    pub fn new(config: Arc<rustls::ServerConfig>) -> Result<Self, TlsError> {
        let conn = rustls::ServerConnection::new(config)
            .map_err(|err| TlsError::Config(err.to_string()))?;
        Ok(Self { conn })
    }

    pub fn is_handshaking(&self) -> bool {
        self.conn.is_handshaking()
    }

    /// Whether encrypted records are waiting to be written to the socket.
    pub fn wants_write(&self) -> bool {
        self.conn.wants_write()
    }

    /// Read decrypted plaintext. `Ok(0)` means the peer cleanly closed;
    /// `WouldBlock` means no plaintext is available yet (possibly because
    /// the handshake is still in flight).
    pub fn read(&mut self, sock: &mut TcpStream, buf: &mut [u8]) -> io::Result<usize> {
        let mut saw_eof = false;
        let mut socket_drained = false;
        loop {
            // pull ciphertext off the wire first
            match self.conn.read_tls(sock) {
                Ok(0) => saw_eof = true,
                Ok(_) => {
                    self.conn
                        .process_new_packets()
                        .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;
                }
                Err(ref err) if err.kind() == io::ErrorKind::WouldBlock => socket_drained = true,
                Err(ref err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(err),
            }

            // the handshake may have produced records to send back
            if self.conn.wants_write() {
                self.flush(sock)?;
            }

            match self.conn.reader().read(buf) {
                Ok(n) => return Ok(n),
                Err(ref err) if err.kind() == io::ErrorKind::WouldBlock => {
                    if saw_eof {
                        return Ok(0);
                    }
                    // keep pulling ciphertext until the kernel buffer is
                    // empty, otherwise edge-triggered pollers would stall
                    if socket_drained {
                        return Err(io::Error::from(io::ErrorKind::WouldBlock));
                    }
                }
                Err(ref err) if err.kind() == io::ErrorKind::UnexpectedEof => return Ok(0),
                Err(err) => return Err(err),
            }
        }
    }

    /// Queue plaintext for encryption and push as much ciphertext as the
    /// socket accepts. Returns the number of plaintext bytes consumed.
    pub fn write(&mut self, sock: &mut TcpStream, data: &[u8]) -> io::Result<usize> {
        let n = self.conn.writer().write(data)?;
        self.flush(sock)?;
        Ok(n)
    }

    /// Write pending ciphertext until the socket refuses more. Returns
    /// true when the TLS buffers are fully drained.
    pub fn flush(&mut self, sock: &mut TcpStream) -> io::Result<bool> {
        while self.conn.wants_write() {
            match self.conn.write_tls(sock) {
                Ok(_) => {}
                Err(ref err) if err.kind() == io::ErrorKind::WouldBlock => return Ok(false),
                Err(ref err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(err),
            }
        }
        Ok(true)
    }

    /// Best-effort bidirectional close-notify with a bounded retry count,
    /// so a peer that stops reading cannot pin the reactor in a CPU loop.
    pub fn shutdown(&mut self, sock: &mut TcpStream) {
        self.conn.send_close_notify();
        for _ in 0..TLS_SHUTDOWN_RETRIES {
            match self.conn.write_tls(sock) {
                Ok(_) if !self.conn.wants_write() => break,
                Ok(_) => {}
                Err(ref err) if err.kind() == io::ErrorKind::WouldBlock => {
                    std::thread::sleep(std::time::Duration::from_millis(10));
                }
                Err(err) => {
                    trace!("TLS shutdown aborted: {}", err);
                    break;
                }
            }
        }
    }
}
