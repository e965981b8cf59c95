use std::cell::RefCell;
use std::fs::File;
use std::io;
use std::net::{IpAddr, SocketAddr, TcpStream};
use std::os::unix::io::RawFd;
use std::path::PathBuf;
use std::rc::{Rc, Weak};
use std::time::Duration;

use log::{debug, error, info, warn};

use crate::constants::{MAX_COMMAND_LINE, MAX_SINGLE_LINE_REPLY};
use crate::core_auth::Authorizer;
use crate::core_ftpcommand::dispatch_command;
use crate::core_ftpcommand::handlers::ArgPolicy;
use crate::core_network::pasv::PassiveListener;
use crate::core_network::port::ActiveConnector;
use crate::core_network::stream::StreamChannel;
use crate::core_reactor::{EventHandler, Interest, Reactor, TimerHandle};
use crate::core_transfer::handler::{DataChannel, TransferDirection, TransferOutcome};
use crate::core_transfer::producer::Producer;
use crate::core_vfs::listing;
use crate::core_vfs::VirtualFs;
use crate::server::ServerCtx;

/// Transfer TYPE negotiated with the client. The RFC default is ASCII.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TransferType {
    Ascii,
    Binary,
}

/// What a transfer command queued while the data connection is still
/// being established.
pub(crate) enum QueuedTransfer {
    Send {
        source: SendSource,
        path: Option<PathBuf>,
    },
    Receive {
        file: File,
        path: PathBuf,
        ascii: bool,
    },
}

pub(crate) enum SendSource {
    Producer(Box<dyn Producer>),
    Sendfile { file: File, offset: u64 },
}

/// RAII impersonation wrapper around filesystem access; a no-op for the
/// virtual authorizer.
pub(crate) struct ImpersonationGuard {
    authorizer: std::sync::Arc<dyn Authorizer>,
    username: String,
}

impl Drop for ImpersonationGuard {
    fn drop(&mut self) {
        self.authorizer.terminate_impersonation(&self.username);
    }
}

/// The FTP protocol interpreter: one per control connection.
///
/// Parses command lines, walks the session state graph
/// (unauthenticated → logged-in → transferring), owns the data-channel
/// lifecycle and applies per-user permission checks before dispatching
/// to the command handlers in `core_ftpcommand`.
pub struct FtpSession {
    pub(crate) chan: StreamChannel,
    pub(crate) fd: RawFd,
    pub(crate) server: Rc<ServerCtx>,
    pub(crate) weak_self: Weak<RefCell<FtpSession>>,

    pub(crate) remote_addr: SocketAddr,
    pub(crate) local_addr: SocketAddr,

    // authentication state
    pub(crate) authenticated: bool,
    pub(crate) username: String,
    pub(crate) password: String,
    pub(crate) attempted_logins: u32,

    // transfer parameters
    pub(crate) transfer_type: TransferType,
    pub(crate) restart_position: u64,
    pub(crate) rnfr: Option<PathBuf>,
    pub(crate) epsv_all: bool,

    pub(crate) fs: Option<VirtualFs>,

    // data-connection state
    pub(crate) data_channel: Option<Rc<RefCell<DataChannel>>>,
    pub(crate) dtp_acceptor: Option<Rc<RefCell<PassiveListener>>>,
    pub(crate) dtp_connector: Option<Rc<RefCell<ActiveConnector>>>,
    pub(crate) queued_transfer: Option<QueuedTransfer>,

    // TLS state
    pub(crate) secured: bool,
    pub(crate) pbsz_done: bool,
    pub(crate) prot_private: bool,

    // MLSx facts
    pub(crate) current_facts: Vec<String>,
    pub(crate) available_facts: Vec<String>,

    pub(crate) idle_timer: Option<TimerHandle>,
    pub(crate) sleeping: bool,
    pub(crate) quit_pending: bool,

    in_buffer: Vec<u8>,
    overlong_discard: bool,
    current_interest: Interest,
    pub(crate) closed: bool,
}

impl FtpSession {
    pub fn create(
        sock: TcpStream,
        server: Rc<ServerCtx>,
        reactor: &mut Reactor,
    ) -> io::Result<Rc<RefCell<FtpSession>>> {
        let remote_addr = sock.peer_addr()?;
        let local_addr = sock.local_addr()?;
        if server.config.tcp_no_delay {
            let _ = sock.set_nodelay(true);
        }
        let chan = StreamChannel::new(sock)?;
        let fd = chan.fd();

        let session = Rc::new_cyclic(|weak_self| {
            RefCell::new(FtpSession {
                chan,
                fd,
                server: Rc::clone(&server),
                weak_self: weak_self.clone(),
                remote_addr,
                local_addr,
                authenticated: false,
                username: String::new(),
                password: String::new(),
                attempted_logins: 0,
                transfer_type: TransferType::Ascii,
                restart_position: 0,
                rnfr: None,
                epsv_all: false,
                fs: None,
                data_channel: None,
                dtp_acceptor: None,
                dtp_connector: None,
                queued_transfer: None,
                secured: false,
                pbsz_done: false,
                prot_private: false,
                current_facts: listing::default_facts(),
                available_facts: listing::available_facts(),
                idle_timer: None,
                sleeping: false,
                quit_pending: false,
                in_buffer: Vec::new(),
                overlong_discard: false,
                current_interest: Interest::READ,
                closed: false,
            })
        });

        reactor.add_channel(
            Rc::clone(&session) as Rc<RefCell<dyn EventHandler>>,
            Interest::READ,
        )?;

        server.callbacks.on_connect();
        {
            let mut sess = session.borrow_mut();
            sess.reset_idle_timer(reactor);
            let banner = server.config.banner.clone();
            if banner.len() <= MAX_SINGLE_LINE_REPLY {
                sess.respond(reactor, &format!("220 {}", banner));
            } else {
                sess.respond_multiline(reactor, 220, &banner);
            }
            sess.log("FTP session opened.");
        }
        Ok(session)
    }

    // --- logging

    /// The per-session log prefix every line carries.
    pub fn prefix(&self) -> String {
        format!(
            "{}:{}-[{}]",
            self.remote_addr.ip(),
            self.remote_addr.port(),
            self.username
        )
    }

    pub(crate) fn log(&self, msg: &str) {
        info!("{} {}", self.prefix(), msg);
    }

    pub(crate) fn logline(&self, msg: &str) {
        debug!("{} {}", self.prefix(), msg);
    }

    /// `OK|FAIL CMD path msg` for every command touching the filesystem.
    pub(crate) fn log_fs_cmd(&self, cmd: &str, path: &std::path::Path, code: u16, msg: &str) {
        let outcome = if (400..600).contains(&code) { "FAIL" } else { "OK" };
        self.log(&format!("{} {} {:?} {}", outcome, cmd, path, msg));
    }

    pub(crate) fn log_transfer(&self, outcome: &TransferOutcome) {
        let action = match outcome.direction {
            TransferDirection::Receiving => "receiving",
            TransferDirection::Sending => "sending",
        };
        let status = if outcome.completed { "completed" } else { "aborted" };
        self.log(&format!(
            "Transfer {} ({}) file={:?} bytes={} seconds={:.3}",
            status,
            action,
            outcome.path.as_deref().unwrap_or_else(|| std::path::Path::new("")),
            outcome.bytes,
            outcome.elapsed,
        ));
    }

    // --- replies

    /// Send a single-line reply, e.g. `respond("200 Ok.")`.
    pub(crate) fn respond(&mut self, reactor: &mut Reactor, line: &str) {
        self.push_text(&format!("{}\r\n", line));
        self.logline(&format!("==> {}", line));
        self.flush_and_rearm(reactor);
    }

    /// Send a `xyz-` multi-line reply whose intermediate lines carry the
    /// given body text.
    pub(crate) fn respond_multiline(&mut self, reactor: &mut Reactor, code: u16, body: &str) {
        let mut text = String::new();
        let mut lines = body.lines();
        if let Some(first) = lines.next() {
            text.push_str(&format!("{}-{}\r\n", code, first));
        }
        for line in lines {
            text.push_str(&format!(" {}\r\n", line));
        }
        text.push_str(&format!("{} \r\n", code));
        self.push_text(&text);
        self.logline(&format!("==> {}-...", code));
        self.flush_and_rearm(reactor);
    }

    /// Push raw text onto the control channel without terminating the
    /// reply; used to build 211/213/250 multi-line sections.
    pub(crate) fn push_text(&mut self, text: &str) {
        self.chan.push(text.as_bytes().to_vec());
    }

    pub(crate) fn flush_and_rearm(&mut self, reactor: &mut Reactor) {
        if self.closed {
            return;
        }
        match self.chan.send_pending() {
            Ok((_, drained)) => {
                if drained && self.chan.close_when_done() {
                    self.close(reactor);
                    return;
                }
            }
            Err(err) => {
                self.log(&format!("control channel write error: {}", err));
                self.close(reactor);
                return;
            }
        }
        self.update_interest(reactor);
    }

    pub(crate) fn update_interest(&mut self, reactor: &mut Reactor) {
        let interest = if self.closed {
            Interest::NONE
        } else {
            Interest {
                read: !self.sleeping,
                write: self.chan.has_pending_output(),
            }
        };
        if interest != self.current_interest {
            self.current_interest = interest;
            reactor.modify_channel(self.fd, interest);
        }
    }

    // --- timers

    pub(crate) fn reset_idle_timer(&mut self, reactor: &mut Reactor) {
        if let Some(timer) = self.idle_timer.take() {
            timer.cancel();
        }
        let timeout = self.server.config.timeout;
        if timeout == 0 {
            return;
        }
        let weak = self.weak_self.clone();
        self.idle_timer = Some(reactor.call_later(Duration::from_secs(timeout), move |reactor| {
            if let Some(session) = weak.upgrade() {
                session.borrow_mut().handle_timeout(reactor);
            }
        }));
    }

    fn handle_timeout(&mut self, reactor: &mut Reactor) {
        if self.closed {
            return;
        }
        self.log("Control connection timed out.");
        self.respond(reactor, "421 Control connection timed out.");
        self.close_when_done(reactor);
    }

    pub(crate) fn handle_data_stall(&mut self, reactor: &mut Reactor) {
        if self.closed {
            return;
        }
        self.log("Data connection timed out.");
        if let Some(data) = self.data_channel.take() {
            data.borrow_mut().abort(reactor);
        }
        self.respond(reactor, "421 Data connection timed out.");
        self.close_when_done(reactor);
    }

    // --- authentication plumbing

    /// Schedule the delayed 530 that discourages password guessing. The
    /// session stops reading commands until the reply fires.
    pub(crate) fn delay_auth_failure(&mut self, reactor: &mut Reactor, message: String) {
        self.sleeping = true;
        self.update_interest(reactor);
        let weak = self.weak_self.clone();
        let delay = Duration::from_secs_f64(self.server.config.auth_failed_timeout);
        reactor.call_later(delay, move |reactor| {
            if let Some(session) = weak.upgrade() {
                session.borrow_mut().auth_failed(reactor, &message);
            }
        });
    }

    fn auth_failed(&mut self, reactor: &mut Reactor, message: &str) {
        if self.closed {
            return;
        }
        self.sleeping = false;
        self.attempted_logins += 1;
        if self.attempted_logins >= self.server.config.max_login_attempts {
            let line = format!("530 {} Disconnecting.", message);
            self.log(&line);
            self.respond(reactor, &line);
            self.close_when_done(reactor);
        } else {
            self.log(message);
            self.respond(reactor, &format!("530 {}", message));
        }
        self.update_interest(reactor);
    }

    pub(crate) fn impersonation_guard(&self) -> ImpersonationGuard {
        self.server
            .authorizer
            .impersonate_user(&self.username, &self.password);
        ImpersonationGuard {
            authorizer: std::sync::Arc::clone(&self.server.authorizer),
            username: self.username.clone(),
        }
    }

    /// Reset everything a REIN or a second USER must flush.
    pub(crate) fn flush_account(&mut self, reactor: &mut Reactor) {
        self.shutdown_connecting_dtp(reactor);
        // a transfer in progress is allowed to finish per RFC-959
        let transferring = self
            .data_channel
            .as_ref()
            .map(|data| data.borrow().transfer_in_progress())
            .unwrap_or(false);
        if !transferring {
            if let Some(data) = self.data_channel.take() {
                data.borrow_mut().abort(reactor);
            }
        }
        let username = std::mem::take(&mut self.username);
        self.authenticated = false;
        self.password.clear();
        self.attempted_logins = 0;
        self.transfer_type = TransferType::Ascii;
        self.restart_position = 0;
        self.rnfr = None;
        self.quit_pending = false;
        self.sleeping = false;
        self.queued_transfer = None;
        self.fs = None;
        self.pbsz_done = false;
        self.prot_private = false;
        if !username.is_empty() {
            self.server.callbacks.on_logout(&username);
        }
    }

    // --- data connection lifecycle

    /// Close any passive or active endpoint still waiting for a peer.
    pub(crate) fn shutdown_connecting_dtp(&mut self, reactor: &mut Reactor) {
        if let Some(acceptor) = self.dtp_acceptor.take() {
            acceptor.borrow_mut().close(reactor);
        }
        if let Some(connector) = self.dtp_connector.take() {
            connector.borrow_mut().close(reactor);
        }
    }

    /// A peer connected to the data endpoint (either direction). The
    /// endpoint channel has already unregistered itself; only the
    /// references are dropped here.
    pub(crate) fn on_data_connected(&mut self, reactor: &mut Reactor, sock: TcpStream) {
        self.dtp_acceptor = None;
        self.dtp_connector = None;

        // the idle timer stays quiet while a transfer runs
        if let Some(timer) = self.idle_timer.take() {
            timer.cancel();
        }

        let tls = if self.prot_private {
            self.server.tls.clone()
        } else {
            None
        };
        let data = match DataChannel::create(
            sock,
            self.weak_self.clone(),
            tls,
            self.server.config.read_limit,
            self.server.config.write_limit,
            self.server.config.data_timeout,
            reactor,
        ) {
            Ok(data) => data,
            Err(err) => {
                error!("{} failed to set up data channel: {}", self.prefix(), err);
                self.respond(reactor, "425 Can't open data connection.");
                return;
            }
        };
        self.data_channel = Some(Rc::clone(&data));

        match self.queued_transfer.take() {
            Some(QueuedTransfer::Send { source, path }) => {
                let mut data = data.borrow_mut();
                match source {
                    SendSource::Producer(producer) => data.start_sending(reactor, producer, path),
                    SendSource::Sendfile { file, offset } => {
                        let path = path.unwrap_or_default();
                        data.start_sendfile(reactor, file, path, offset)
                    }
                }
            }
            Some(QueuedTransfer::Receive { file, path, ascii }) => {
                data.borrow_mut().start_receiving(reactor, file, path, ascii);
            }
            None => {}
        }
    }

    /// Queue outbound data (RETR, LIST, MLSD, NLST) and emit the proper
    /// 125/150 preliminary reply.
    pub(crate) fn push_dtp_send(
        &mut self,
        reactor: &mut Reactor,
        source: SendSource,
        path: Option<PathBuf>,
        resp_open: &str,
        resp_wait: &str,
    ) {
        if let Some(data) = self.data_channel.clone() {
            self.respond(reactor, resp_open);
            let mut data = data.borrow_mut();
            match source {
                SendSource::Producer(producer) => data.start_sending(reactor, producer, path),
                SendSource::Sendfile { file, offset } => {
                    let path = path.unwrap_or_default();
                    data.start_sendfile(reactor, file, path, offset)
                }
            }
        } else {
            self.respond(reactor, resp_wait);
            self.queued_transfer = Some(QueuedTransfer::Send { source, path });
        }
    }

    /// Queue an upload target (STOR, STOU, APPE).
    pub(crate) fn push_dtp_receive(
        &mut self,
        reactor: &mut Reactor,
        file: File,
        path: PathBuf,
        resp_open: &str,
        resp_wait: &str,
    ) {
        let ascii = self.transfer_type == TransferType::Ascii;
        if let Some(data) = self.data_channel.clone() {
            self.respond(reactor, resp_open);
            data.borrow_mut().start_receiving(reactor, file, path, ascii);
        } else {
            self.respond(reactor, resp_wait);
            self.queued_transfer = Some(QueuedTransfer::Receive { file, path, ascii });
        }
    }

    /// The data channel finished (or failed); reply 226/426 and fire the
    /// completion callbacks.
    pub(crate) fn on_data_close(&mut self, reactor: &mut Reactor, outcome: TransferOutcome) {
        self.data_channel = None;
        self.log_transfer(&outcome);

        if let Some(path) = outcome.path.as_ref() {
            let path_str = path.to_string_lossy().into_owned();
            match (outcome.completed, outcome.direction) {
                (true, TransferDirection::Receiving) => {
                    self.server.callbacks.on_file_received(&path_str)
                }
                (true, TransferDirection::Sending) => self.server.callbacks.on_file_sent(&path_str),
                (false, TransferDirection::Receiving) => {
                    self.server.callbacks.on_incomplete_file_received(&path_str)
                }
                (false, TransferDirection::Sending) => {
                    self.server.callbacks.on_incomplete_file_sent(&path_str)
                }
            }
        }

        if !self.closed {
            if outcome.completed {
                self.respond(reactor, "226 Transfer complete.");
            } else {
                let why = outcome
                    .error
                    .unwrap_or_else(|| String::from("Transfer aborted"));
                self.respond(reactor, &format!("426 {}; transfer aborted.", why));
            }
        }

        if self.quit_pending {
            self.close_when_done(reactor);
        } else {
            self.reset_idle_timer(reactor);
        }
    }

    // --- teardown

    /// Close once every queued reply has drained.
    pub(crate) fn close_when_done(&mut self, reactor: &mut Reactor) {
        self.chan.set_close_when_done();
        self.flush_and_rearm(reactor);
    }

    /// Destroy the session: cancels its scheduled calls, closes any data
    /// channel and removes the control channel from the reactor.
    pub(crate) fn close(&mut self, reactor: &mut Reactor) {
        if self.closed {
            return;
        }
        self.closed = true;

        if let Some(timer) = self.idle_timer.take() {
            timer.cancel();
        }
        self.shutdown_connecting_dtp(reactor);
        if let Some(data) = self.data_channel.take() {
            data.borrow_mut().abort(reactor);
        }
        self.queued_transfer = None;

        reactor.remove_channel(self.fd);
        self.chan.close();

        self.server.unregister_session(self.remote_addr.ip());
        self.server.callbacks.on_disconnect();
        self.log("FTP session closed.");
    }

    // --- command parsing and dispatch

    fn handle_line(&mut self, reactor: &mut Reactor, line: String) {
        self.reset_idle_timer(reactor);

        let (mut cmd, mut arg) = split_command(&line);

        if cmd == "SITE" && !arg.is_empty() {
            let (sub, rest) = split_command(&arg);
            cmd = format!("SITE {}", sub);
            arg = rest;
        }

        if cmd == "PASS" {
            self.logline(&format!("<== PASS {}", "*".repeat(6)));
        } else {
            self.logline(&format!("<== {}", line));
        }

        // a pending rename-from only survives until the next command
        if self.rnfr.is_some() && cmd != "RNTO" && cmd != "RNFR" {
            self.rnfr = None;
        }

        if !self.server.command_table.contains_key(cmd.as_str()) {
            // Telnet IP/Synch sequences may prefix ABOR, STAT and QUIT
            let tail: String = cmd.chars().rev().take(4).collect::<Vec<_>>().into_iter().rev().collect();
            if matches!(tail.as_str(), "ABOR" | "STAT" | "QUIT") {
                cmd = tail;
            } else {
                self.respond(reactor, &format!("500 Command \"{}\" not understood.", cmd));
                return;
            }
        }

        let spec = match self.server.command_table.get(cmd.as_str()) {
            Some(spec) => spec.clone(),
            None => return,
        };

        if arg.is_empty() && spec.arg == ArgPolicy::Required {
            self.respond(reactor, "501 Syntax error: command needs an argument.");
            return;
        }
        if !arg.is_empty() && spec.arg == ArgPolicy::Forbidden {
            self.respond(reactor, "501 Syntax error: command does not accept arguments.");
            return;
        }

        let tls_control_required = self.server.config.tls.control_required;
        let tls_data_required = self.server.config.tls.data_required;
        if tls_control_required && !self.secured && matches!(cmd.as_str(), "USER" | "PASS") {
            self.respond(reactor, "550 SSL/TLS required on the control channel.");
            return;
        }
        if tls_data_required
            && !self.prot_private
            && matches!(cmd.as_str(), "PASV" | "EPSV" | "PORT" | "EPRT")
        {
            self.respond(reactor, "550 SSL/TLS required on the data channel.");
            return;
        }

        if !self.authenticated {
            if spec.auth_needed || (cmd == "STAT" && !arg.is_empty()) {
                self.respond(reactor, "530 Log in with USER and PASS first.");
                return;
            }
            dispatch_command(self, reactor, &cmd, &arg, None);
            return;
        }

        if cmd == "STAT" && arg.is_empty() {
            dispatch_command(self, reactor, "STAT", "", None);
            return;
        }

        // transfer commands need a data endpoint prepared first
        if matches!(
            cmd.as_str(),
            "LIST" | "NLST" | "MLSD" | "RETR" | "STOR" | "STOU" | "APPE"
        ) && self.data_channel.is_none()
            && self.dtp_acceptor.is_none()
            && self.dtp_connector.is_none()
        {
            self.respond(reactor, "425 Use PORT or PASV first.");
            return;
        }

        // resolve and validate the real path for filesystem commands
        let mut path: Option<PathBuf> = None;
        if spec.check_path && cmd != "STOU" {
            let resolved = {
                let fs = match self.fs.as_ref() {
                    Some(fs) => fs,
                    None => {
                        self.respond(reactor, "503 Login with USER and PASS first.");
                        return;
                    }
                };
                match cmd.as_str() {
                    "CWD" | "XCWD" => {
                        if arg.is_empty() {
                            fs.ftp2fs("/")
                        } else {
                            fs.ftp2fs(&arg)
                        }
                    }
                    "CDUP" | "XCUP" => fs.ftp2fs(".."),
                    "LIST" => {
                        let lowered = arg.to_lowercase();
                        if matches!(lowered.as_str(), "-a" | "-l" | "-al" | "-la") || arg.is_empty()
                        {
                            fs.ftp2fs(fs.cwd())
                        } else {
                            fs.ftp2fs(&arg)
                        }
                    }
                    "NLST" | "MLSD" | "MLST" | "STAT" => {
                        if arg.is_empty() {
                            fs.ftp2fs(fs.cwd())
                        } else {
                            fs.ftp2fs(&arg)
                        }
                    }
                    _ => fs.ftp2fs(&arg),
                }
            };

            let valid = self
                .fs
                .as_ref()
                .map(|fs| fs.validpath(&resolved))
                .unwrap_or(false);
            if !valid {
                let line = self
                    .fs
                    .as_ref()
                    .map(|fs| fs.fs2ftp(&resolved))
                    .unwrap_or_default();
                self.log_fs_cmd(&cmd, &resolved, 550, "path escapes home dir");
                self.respond(
                    reactor,
                    &format!(
                        "550 \"{}\" points to a path which is outside the user's root directory.",
                        line
                    ),
                );
                return;
            }

            if let Some(perm) = spec.perm {
                if !self
                    .server
                    .authorizer
                    .has_perm(&self.username, perm, Some(&resolved))
                {
                    self.log_fs_cmd(&cmd, &resolved, 550, "insufficient privileges");
                    self.respond(reactor, &format!("550 Can't {}. Not enough privileges.", cmd));
                    return;
                }
            }
            path = Some(resolved);
        }

        dispatch_command(self, reactor, &cmd, &arg, path);
    }
}

fn split_command(line: &str) -> (String, String) {
    match line.find(' ') {
        Some(pos) => (
            line[..pos].to_ascii_uppercase(),
            line[pos + 1..].to_string(),
        ),
        None => (line.to_ascii_uppercase(), String::new()),
    }
}

impl EventHandler for FtpSession {
    fn fd(&self) -> RawFd {
        self.fd
    }

    fn handle_readable(&mut self, reactor: &mut Reactor) {
        if self.closed || self.sleeping {
            return;
        }
        let mut buf = [0u8; 4096];
        loop {
            match self.chan.read(&mut buf) {
                Ok(0) => {
                    self.close(reactor);
                    return;
                }
                Ok(n) => {
                    self.in_buffer.extend_from_slice(&buf[..n]);
                    if self.in_buffer.len() > MAX_COMMAND_LINE {
                        // protect against memory exhaustion: drop the
                        // line without a reply
                        warn!(
                            "{} command line exceeded {} bytes; discarding",
                            self.prefix(),
                            MAX_COMMAND_LINE
                        );
                        self.in_buffer.clear();
                        self.overlong_discard = true;
                    }
                }
                Err(ref err) if err.kind() == io::ErrorKind::WouldBlock => break,
                Err(err) => {
                    self.log(&format!("control channel read error: {}", err));
                    self.close(reactor);
                    return;
                }
            }
        }

        // extract complete CRLF-terminated lines
        while let Some(pos) = find_terminator(&self.in_buffer) {
            let mut raw: Vec<u8> = self.in_buffer.drain(..pos + 1).collect();
            raw.pop(); // the \n
            if raw.last() == Some(&b'\r') {
                raw.pop();
            }
            if self.overlong_discard {
                // remainder of a discarded overlong line
                self.overlong_discard = false;
                continue;
            }
            let line = String::from_utf8_lossy(&raw).into_owned();
            self.handle_line(reactor, line);
            if self.closed || self.sleeping {
                return;
            }
        }
        self.update_interest(reactor);
    }

    fn handle_writable(&mut self, reactor: &mut Reactor) {
        if self.closed {
            return;
        }
        self.flush_and_rearm(reactor);
    }

    fn handle_error_event(&mut self, reactor: &mut Reactor) {
        self.close(reactor);
    }

    fn handle_close(&mut self, reactor: &mut Reactor) {
        self.close(reactor);
    }
}

fn find_terminator(buf: &[u8]) -> Option<usize> {
    buf.iter().position(|&b| b == b'\n')
}

/// Host IP advertised in a PASV reply, honoring the NAT masquerade map.
pub(crate) fn masqueraded_ip(ctx: &ServerCtx, local_ip: IpAddr) -> IpAddr {
    if let Some(public) = ctx.config.masquerade_address_map.get(&local_ip) {
        return *public;
    }
    if let Some(public) = ctx.config.masquerade_address {
        return public;
    }
    local_ip
}
