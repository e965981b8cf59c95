use std::cell::RefCell;
use std::io;
use std::net::{IpAddr, SocketAddr, TcpStream};
use std::os::unix::io::{AsRawFd, RawFd};
use std::rc::{Rc, Weak};
use std::time::Duration;

use log::debug;

use crate::constants::DATA_CONNECTION_TIMEOUT;
use crate::core_network::connector::{nonblocking_connect, take_socket_error};
use crate::core_reactor::{EventHandler, Interest, Reactor, TimerHandle};
use crate::core_vfs::filesystem::strerror;
use crate::session::FtpSession;

/// Handle PORT: `h1,h2,h3,h4,p1,p2`.
pub fn handle_port_command(session: &mut FtpSession, reactor: &mut Reactor, arg: &str) {
    let (ip, port) = match parse_port_argument(arg) {
        Some(pair) => pair,
        None => {
            session.respond(reactor, "501 Invalid PORT format.");
            return;
        }
    };
    make_active(session, reactor, IpAddr::V4(ip), port);
}

/// Handle EPRT: `|proto|ip|port|` with an arbitrary delimiter.
pub fn handle_eprt_command(session: &mut FtpSession, reactor: &mut Reactor, arg: &str) {
    let delim = match arg.chars().next() {
        Some(d) => d,
        None => {
            session.respond(reactor, "501 Invalid EPRT format.");
            return;
        }
    };
    let fields: Vec<&str> = arg.split(delim).collect();
    // "|2|::1|52000|" splits into ["", "2", "::1", "52000", ""]
    if fields.len() != 5 {
        session.respond(reactor, "501 Invalid EPRT format.");
        return;
    }
    let proto = fields[1];
    let port: u16 = match fields[3].parse() {
        Ok(port) => port,
        Err(_) => {
            session.respond(reactor, "501 Invalid EPRT format.");
            return;
        }
    };

    let control_v4 = session.remote_addr.is_ipv4();
    match proto {
        "1" => {
            if !control_v4 {
                session.respond(reactor, "522 Network protocol not supported (use 2).");
                return;
            }
            match fields[2].parse::<std::net::Ipv4Addr>() {
                Ok(ip) => make_active(session, reactor, IpAddr::V4(ip), port),
                Err(_) => session.respond(reactor, "501 Invalid EPRT format."),
            }
        }
        "2" => {
            if control_v4 {
                session.respond(reactor, "522 Network protocol not supported (use 1).");
                return;
            }
            match fields[2].parse::<std::net::Ipv6Addr>() {
                Ok(ip) => make_active(session, reactor, IpAddr::V6(ip), port),
                Err(_) => session.respond(reactor, "501 Invalid EPRT format."),
            }
        }
        _ => {
            if control_v4 {
                session.respond(reactor, "501 Unknown network protocol (use 1).");
            } else {
                session.respond(reactor, "501 Unknown network protocol (use 2).");
            }
        }
    }
}

pub fn parse_port_argument(arg: &str) -> Option<(std::net::Ipv4Addr, u16)> {
    let numbers: Vec<u16> = arg
        .split(',')
        .map(|piece| piece.trim().parse::<u16>())
        .collect::<Result<_, _>>()
        .ok()?;
    if numbers.len() != 6 || numbers.iter().take(4).any(|&n| n > 255) {
        return None;
    }
    if numbers[4] > 255 || numbers[5] > 255 {
        return None;
    }
    let ip = std::net::Ipv4Addr::new(
        numbers[0] as u8,
        numbers[1] as u8,
        numbers[2] as u8,
        numbers[3] as u8,
    );
    let port = numbers[4] * 256 + numbers[5];
    Some((ip, port))
}

/// Establish the active data connection after RFC-2577 sanity checks.
fn make_active(session: &mut FtpSession, reactor: &mut Reactor, ip: IpAddr, port: u16) {
    // reject FTP bounce attempts unless explicitly permitted
    if !session.server.config.permit_foreign_addresses && ip != session.remote_addr.ip() {
        session.log(&format!(
            "Rejected data connection to foreign address {}:{}.",
            ip, port
        ));
        session.respond(reactor, "501 Can't connect to a foreign address.");
        return;
    }
    if !session.server.config.permit_privileged_ports && port < 1024 {
        session.log(&format!("PORT against the privileged port {} refused.", port));
        session.respond(reactor, "501 Can't connect over a privileged port.");
        return;
    }

    session.shutdown_connecting_dtp(reactor);
    if let Some(data) = session.data_channel.take() {
        data.borrow_mut().abort(reactor);
    }

    if session.server.too_many_cons() {
        let msg = "Too many connections. Can't open data channel.";
        session.log(msg);
        session.respond(reactor, &format!("425 {}", msg));
        return;
    }

    // originate from the control connection's own address
    let source = session
        .chan
        .local_addr()
        .ok()
        .map(|addr| SocketAddr::new(addr.ip(), 0));

    let stream = match nonblocking_connect(SocketAddr::new(ip, port), source) {
        Ok(stream) => stream,
        Err(err) => {
            session.respond(
                reactor,
                &format!("425 Can't connect to specified address. {}.", strerror(&err)),
            );
            return;
        }
    };

    match ActiveConnector::create(stream, session.weak_self.clone(), reactor) {
        Ok(connector) => session.dtp_connector = Some(connector),
        Err(err) => {
            session.log(&format!("can't watch active connector: {}", err));
            session.respond(reactor, "425 Can't connect to specified address.");
        }
    }
}

/// In-flight non-blocking connect to the client's data port; reports
/// success on the writable event and failure on SO_ERROR.
pub struct ActiveConnector {
    sock: Option<TcpStream>,
    fd: RawFd,
    session: Weak<RefCell<FtpSession>>,
    timer: Option<TimerHandle>,
    closed: bool,
}

impl ActiveConnector {
    pub fn create(
        sock: TcpStream,
        session: Weak<RefCell<FtpSession>>,
        reactor: &mut Reactor,
    ) -> io::Result<Rc<RefCell<ActiveConnector>>> {
        let fd = sock.as_raw_fd();
        let connector = Rc::new(RefCell::new(ActiveConnector {
            sock: Some(sock),
            fd,
            session,
            timer: None,
            closed: false,
        }));
        reactor.add_channel(
            Rc::clone(&connector) as Rc<RefCell<dyn EventHandler>>,
            Interest::WRITE,
        )?;

        let weak = Rc::downgrade(&connector);
        let timer = reactor.call_later(
            Duration::from_secs(DATA_CONNECTION_TIMEOUT),
            move |reactor| {
                if let Some(connector) = weak.upgrade() {
                    connector.borrow_mut().close(reactor);
                    let session = connector.borrow().session.upgrade();
                    if let Some(session) = session {
                        let mut session = session.borrow_mut();
                        session.dtp_connector = None;
                        session.respond(reactor, "421 Active data channel timed out.");
                    }
                }
            },
        );
        connector.borrow_mut().timer = Some(timer);
        Ok(connector)
    }

    pub fn close(&mut self, reactor: &mut Reactor) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Some(timer) = self.timer.take() {
            timer.cancel();
        }
        reactor.remove_channel(self.fd);
        self.sock = None;
    }

    /// Detach the socket for hand-over to the data channel, leaving the
    /// poller registration already removed.
    fn take_connected(&mut self, reactor: &mut Reactor) -> Option<TcpStream> {
        if self.closed {
            return None;
        }
        self.closed = true;
        if let Some(timer) = self.timer.take() {
            timer.cancel();
        }
        reactor.remove_channel(self.fd);
        self.sock.take()
    }
}

impl EventHandler for ActiveConnector {
    fn fd(&self) -> RawFd {
        self.fd
    }

    fn handle_readable(&mut self, _reactor: &mut Reactor) {}

    fn handle_writable(&mut self, reactor: &mut Reactor) {
        if self.closed {
            return;
        }
        match take_socket_error(self.fd) {
            Ok(()) => {
                let sock = match self.take_connected(reactor) {
                    Some(sock) => sock,
                    None => return,
                };
                if let Some(session) = self.session.upgrade() {
                    let mut session = session.borrow_mut();
                    session.dtp_connector = None;
                    session.respond(reactor, "200 Active data connection established.");
                    session.on_data_connected(reactor, sock);
                }
            }
            Err(err) => {
                debug!("active connect failed: {}", err);
                self.close(reactor);
                if let Some(session) = self.session.upgrade() {
                    let mut session = session.borrow_mut();
                    session.dtp_connector = None;
                    session.respond(
                        reactor,
                        &format!("425 Can't connect to specified address. {}.", strerror(&err)),
                    );
                }
            }
        }
    }

    fn handle_error_event(&mut self, reactor: &mut Reactor) {
        if self.closed {
            return;
        }
        self.close(reactor);
        if let Some(session) = self.session.upgrade() {
            let mut session = session.borrow_mut();
            session.dtp_connector = None;
            session.respond(reactor, "425 Can't connect to specified address.");
        }
    }

    fn handle_close(&mut self, reactor: &mut Reactor) {
        self.close(reactor);
    }
}
