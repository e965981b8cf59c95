use std::cell::RefCell;
use std::fs::File;
use std::io::{self, Seek, SeekFrom, Write};
use std::net::TcpStream;
use std::os::unix::io::{AsRawFd, RawFd};
use std::path::PathBuf;
use std::rc::{Rc, Weak};
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, trace, warn};

use crate::constants::DATA_BUFFER_SIZE;
use crate::core_network::stream::StreamChannel;
use crate::core_reactor::{EventHandler, Interest, Reactor, TimerHandle};
use crate::core_tls::TlsError;
use crate::core_transfer::producer::{ascii_inbound, FileProducer, Producer};
use crate::core_transfer::sendfile::{sendfile, SendfileResult};
use crate::core_transfer::throttle::Throttler;
use crate::core_vfs::filesystem::strerror;
use crate::session::FtpSession;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TransferDirection {
    Sending,
    Receiving,
}

/// Summary handed to the control handler when a data channel ends.
#[derive(Debug)]
pub struct TransferOutcome {
    pub completed: bool,
    pub direction: TransferDirection,
    pub bytes: u64,
    pub elapsed: f64,
    pub path: Option<PathBuf>,
    pub error: Option<String>,
}

struct SendfileTransfer {
    file: File,
    offset: u64,
}

/// Server-DTP: streams file and listing bytes over the data connection.
///
/// One instance exists per transfer. It reports back to its control
/// handler exactly once, when the transfer finishes, fails or is torn
/// down; an `abort` initiated by the control handler is silent.
pub struct DataChannel {
    chan: StreamChannel,
    fd: RawFd,
    session: Weak<RefCell<FtpSession>>,
    weak_self: Weak<RefCell<DataChannel>>,

    receiving: bool,
    started: bool,
    ascii: bool,
    had_cr: bool,

    file: Option<File>,
    file_path: Option<PathBuf>,
    sendfile_state: Option<SendfileTransfer>,

    tot_sent: u64,
    tot_recv: u64,
    last_progress: u64,

    read_throttle: Throttler,
    write_throttle: Throttler,
    sleeping: bool,

    stall_timer: Option<TimerHandle>,
    unsleep_timer: Option<TimerHandle>,

    start_time: Instant,
    current_interest: Interest,
    closed: bool,
}

impl DataChannel {
    #[allow(clippy::too_many_arguments)]
    pub fn create(
        sock: TcpStream,
        session: Weak<RefCell<FtpSession>>,
        tls: Option<Arc<rustls::ServerConfig>>,
        read_limit: u64,
        write_limit: u64,
        stall_timeout: u64,
        reactor: &mut Reactor,
    ) -> Result<Rc<RefCell<DataChannel>>, TlsError> {
        let mut chan = StreamChannel::new(sock).map_err(|err| TlsError::Config(err.to_string()))?;
        let secured = tls.is_some();
        if let Some(config) = tls {
            chan.start_tls(config)?;
        }
        let fd = chan.fd();

        let channel = Rc::new_cyclic(|weak_self| {
            RefCell::new(DataChannel {
                chan,
                fd,
                session,
                weak_self: weak_self.clone(),
                receiving: false,
                started: false,
                ascii: false,
                had_cr: false,
                file: None,
                file_path: None,
                sendfile_state: None,
                tot_sent: 0,
                tot_recv: 0,
                last_progress: 0,
                read_throttle: Throttler::new(read_limit),
                write_throttle: Throttler::new(write_limit),
                sleeping: false,
                stall_timer: None,
                unsleep_timer: None,
                start_time: Instant::now(),
                current_interest: Interest::NONE,
                closed: false,
            })
        });

        let initial = if secured { Interest::READ } else { Interest::NONE };
        channel.borrow_mut().current_interest = initial;
        if let Err(err) = reactor.add_channel(
            Rc::clone(&channel) as Rc<RefCell<dyn EventHandler>>,
            initial,
        ) {
            warn!("failed to register data channel: {}", err);
        }

        if stall_timeout > 0 {
            let weak = Rc::downgrade(&channel);
            let handle = reactor.call_every(Duration::from_secs(stall_timeout), move |reactor| {
                let stalled_session = match weak.upgrade() {
                    Some(channel) => {
                        let mut chan = channel.borrow_mut();
                        if chan.made_progress() {
                            None
                        } else {
                            chan.session.clone().upgrade()
                        }
                    }
                    None => None,
                };
                if let Some(session) = stalled_session {
                    session.borrow_mut().handle_data_stall(reactor);
                }
            });
            channel.borrow_mut().stall_timer = Some(handle);
        }

        Ok(channel)
    }

    pub fn fd_raw(&self) -> RawFd {
        self.fd
    }

    /// Whether any application byte has crossed the channel yet; ABOR
    /// uses this to pick between 225 and 426+226.
    pub fn transfer_in_progress(&self) -> bool {
        self.tot_sent + self.tot_recv != 0
    }

    pub fn total_bytes(&self) -> u64 {
        self.tot_sent + self.tot_recv
    }

    pub fn bytes_sent(&self) -> u64 {
        self.tot_sent
    }

    pub fn bytes_received(&self) -> u64 {
        self.tot_recv
    }

    pub fn elapsed(&self) -> f64 {
        self.start_time.elapsed().as_secs_f64()
    }

    fn made_progress(&mut self) -> bool {
        let total = self.tot_sent + self.tot_recv;
        if total > self.last_progress {
            self.last_progress = total;
            true
        } else {
            false
        }
    }

    /// Begin a download driven by a producer chain.
    pub fn start_sending(
        &mut self,
        reactor: &mut Reactor,
        producer: Box<dyn Producer>,
        path: Option<PathBuf>,
    ) {
        self.receiving = false;
        self.started = true;
        self.file_path = path;
        self.chan.push_producer(producer);
        self.chan.set_close_when_done();
        self.update_interest(reactor);
    }

    /// Begin a download through the sendfile(2) fast path. Falls back to
    /// a plain producer automatically if the very first kernel call says
    /// the pairing is unsupported.
    pub fn start_sendfile(
        &mut self,
        reactor: &mut Reactor,
        file: File,
        path: PathBuf,
        offset: u64,
    ) {
        debug!("starting transfer using sendfile()");
        self.receiving = false;
        self.started = true;
        self.file_path = Some(path);
        self.sendfile_state = Some(SendfileTransfer { file, offset });
        self.update_interest(reactor);
    }

    /// Begin an upload into an already-opened (and REST-positioned) file.
    pub fn start_receiving(&mut self, reactor: &mut Reactor, file: File, path: PathBuf, ascii: bool) {
        self.receiving = true;
        self.started = true;
        self.ascii = ascii;
        self.file = Some(file);
        self.file_path = Some(path);
        self.update_interest(reactor);
    }

    /// Tear the channel down without notifying the control handler; used
    /// by ABOR and by the session's own close path. The socket is
    /// RST-closed so the peer sees the abort immediately.
    pub fn abort(&mut self, reactor: &mut Reactor) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.cancel_timers();
        reactor.remove_channel(self.fd);
        rst_close(self.fd);
        self.chan.close();
        self.file = None;
    }

    fn cancel_timers(&mut self) {
        if let Some(timer) = self.stall_timer.take() {
            timer.cancel();
        }
        if let Some(timer) = self.unsleep_timer.take() {
            timer.cancel();
        }
    }

    fn finalize(&mut self, reactor: &mut Reactor, completed: bool, error: Option<String>) {
        if self.closed {
            return;
        }
        self.closed = true;

        // a CR carried across the last chunk boundary belongs to the file
        if self.receiving && self.had_cr {
            if let Some(file) = self.file.as_mut() {
                let _ = file.write_all(b"\r");
            }
        }

        self.cancel_timers();
        reactor.remove_channel(self.fd);
        self.chan.close();
        self.file = None;

        let outcome = TransferOutcome {
            completed,
            direction: if self.receiving {
                TransferDirection::Receiving
            } else {
                TransferDirection::Sending
            },
            bytes: self.tot_sent + self.tot_recv,
            elapsed: self.elapsed(),
            path: self.file_path.clone(),
            error,
        };
        if let Some(session) = self.session.upgrade() {
            session.borrow_mut().on_data_close(reactor, outcome);
        }
    }

    fn throttle(&mut self, reactor: &mut Reactor, nbytes: u64) {
        let sleep_for = if self.receiving {
            self.read_throttle.record(nbytes)
        } else {
            self.write_throttle.record(nbytes)
        };
        if let Some(delay) = sleep_for {
            self.sleeping = true;
            let weak = self.weak_self.clone();
            self.unsleep_timer = Some(reactor.call_later(delay, move |reactor| {
                if let Some(channel) = weak.upgrade() {
                    let mut chan = channel.borrow_mut();
                    chan.sleeping = false;
                    chan.unsleep_timer = None;
                    chan.update_interest(reactor);
                }
            }));
        }
    }

    fn update_interest(&mut self, reactor: &mut Reactor) {
        let interest = if self.closed || self.sleeping {
            Interest::NONE
        } else {
            Interest {
                read: self.receiving
                    || self.chan.is_handshaking()
                    || (self.started && !self.receiving),
                write: self.started
                    && !self.receiving
                    && (self.chan.has_pending_output() || self.sendfile_state.is_some()),
            }
        };
        if interest != self.current_interest {
            self.current_interest = interest;
            reactor.modify_channel(self.fd, interest);
        }
    }

    fn pump_receive(&mut self, reactor: &mut Reactor) {
        let mut buf = vec![0u8; DATA_BUFFER_SIZE];
        loop {
            if self.sleeping {
                break;
            }
            match self.chan.read(&mut buf) {
                Ok(0) => {
                    // client closing the connection marks a completed
                    // upload
                    self.finalize(reactor, true, None);
                    return;
                }
                Ok(n) => {
                    self.tot_recv += n as u64;
                    let chunk = if self.ascii {
                        ascii_inbound(&buf[..n], &mut self.had_cr)
                    } else {
                        buf[..n].to_vec()
                    };
                    if let Some(file) = self.file.as_mut() {
                        if let Err(err) = file.write_all(&chunk) {
                            let msg = strerror(&err);
                            self.finalize(reactor, false, Some(msg));
                            return;
                        }
                    }
                    self.throttle(reactor, n as u64);
                }
                Err(ref err) if err.kind() == io::ErrorKind::WouldBlock => break,
                Err(err) => {
                    self.finalize(reactor, false, Some(strerror(&err)));
                    return;
                }
            }
        }
        self.update_interest(reactor);
    }

    fn pump_sendfile(&mut self, reactor: &mut Reactor) {
        loop {
            if self.sleeping {
                break;
            }
            let (file_fd, mut offset) = match self.sendfile_state.as_ref() {
                Some(state) => (state.file.as_raw_fd(), state.offset),
                None => return,
            };
            match sendfile(self.fd, file_fd, &mut offset, DATA_BUFFER_SIZE) {
                SendfileResult::Sent(0) => {
                    self.sendfile_state = None;
                    self.finalize(reactor, true, None);
                    return;
                }
                SendfileResult::Sent(n) => {
                    if let Some(state) = self.sendfile_state.as_mut() {
                        state.offset = offset;
                    }
                    self.tot_sent += n as u64;
                    self.throttle(reactor, n as u64);
                }
                SendfileResult::Retry => break,
                SendfileResult::Unsupported(err) => {
                    if self.tot_sent == 0 {
                        warn!("sendfile() failed; falling back on using plain send");
                        let state = match self.sendfile_state.take() {
                            Some(state) => state,
                            None => return,
                        };
                        let mut file = state.file;
                        if file.seek(SeekFrom::Start(state.offset)).is_err() {
                            self.finalize(reactor, false, Some(strerror(&err)));
                            return;
                        }
                        self.chan
                            .push_producer(Box::new(FileProducer::new(file, false)));
                        self.chan.set_close_when_done();
                        // fall through to the plain send path next tick
                        break;
                    }
                    self.finalize(reactor, false, Some(strerror(&err)));
                    return;
                }
                SendfileResult::Failed(err) => {
                    self.finalize(reactor, false, Some(strerror(&err)));
                    return;
                }
            }
        }
        self.update_interest(reactor);
    }

    fn pump_send(&mut self, reactor: &mut Reactor) {
        match self.chan.send_pending() {
            Ok((written, drained)) => {
                self.tot_sent += written as u64;
                if written > 0 {
                    self.throttle(reactor, written as u64);
                }
                if drained && self.chan.close_when_done() {
                    self.finalize(reactor, true, None);
                    return;
                }
            }
            Err(err) => {
                self.finalize(reactor, false, Some(strerror(&err)));
                return;
            }
        }
        self.update_interest(reactor);
    }
}

impl EventHandler for DataChannel {
    fn fd(&self) -> RawFd {
        self.fd
    }

    fn handle_readable(&mut self, reactor: &mut Reactor) {
        if self.closed {
            return;
        }
        if self.receiving {
            self.pump_receive(reactor);
            return;
        }
        // on a download (or a not-yet-configured channel) reads only
        // serve the TLS handshake and EOF detection
        if self.started || self.chan.is_handshaking() {
            let mut probe = [0u8; 512];
            match self.chan.read(&mut probe) {
                Ok(0) => {
                    let finished = !self.chan.has_pending_output() && self.sendfile_state.is_none();
                    if self.started {
                        self.finalize(
                            reactor,
                            finished,
                            (!finished).then(|| String::from("Connection closed by peer")),
                        );
                    } else {
                        self.finalize(reactor, false, Some(String::from("Connection closed by peer")));
                    }
                }
                Ok(n) => trace!("discarding {} unexpected bytes on data channel", n),
                Err(ref err) if err.kind() == io::ErrorKind::WouldBlock => {}
                Err(err) => {
                    let msg = strerror(&err);
                    self.finalize(reactor, false, Some(msg));
                }
            }
            self.update_interest(reactor);
        }
    }

    fn handle_writable(&mut self, reactor: &mut Reactor) {
        if self.closed || self.sleeping {
            return;
        }
        if self.sendfile_state.is_some() {
            self.pump_sendfile(reactor);
        } else if self.started && !self.receiving {
            self.pump_send(reactor);
        } else if self.chan.is_handshaking() || self.chan.has_pending_output() {
            // flush handshake records
            match self.chan.send_pending() {
                Ok(_) => self.update_interest(reactor),
                Err(err) => {
                    let msg = strerror(&err);
                    self.finalize(reactor, false, Some(msg));
                }
            }
        }
    }

    fn handle_error_event(&mut self, reactor: &mut Reactor) {
        self.finalize(
            reactor,
            false,
            Some(String::from("Connection error; transfer aborted")),
        );
    }

    fn handle_close(&mut self, reactor: &mut Reactor) {
        let finished = if self.receiving {
            true
        } else {
            self.started && !self.chan.has_pending_output() && self.sendfile_state.is_none()
        };
        self.finalize(
            reactor,
            finished,
            (!finished).then(|| String::from("Connection closed")),
        );
    }
}

/// Force an RST on close so an aborted peer does not linger in TIME_WAIT
/// draining bytes we will never send.
fn rst_close(fd: RawFd) {
    let linger = libc::linger {
        l_onoff: 1,
        l_linger: 0,
    };
    unsafe {
        libc::setsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_LINGER,
            &linger as *const libc::linger as *const libc::c_void,
            std::mem::size_of::<libc::linger>() as libc::socklen_t,
        );
    }
}
