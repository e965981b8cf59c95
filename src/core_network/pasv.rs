use std::cell::RefCell;
use std::io;
use std::net::{IpAddr, SocketAddr, TcpListener};
use std::os::unix::io::{AsRawFd, RawFd};
use std::rc::{Rc, Weak};
use std::time::Duration;

use log::{debug, info, warn};
use rand::Rng;

use crate::constants::DATA_CONNECTION_TIMEOUT;
use crate::core_reactor::{EventHandler, Interest, Reactor, TimerHandle};
use crate::session::{masqueraded_ip, FtpSession};

/// Handle PASV / EPSV: bind a listener, advertise it and wait for the
/// client to connect.
pub fn handle_pasv_command(session: &mut FtpSession, reactor: &mut Reactor, extended: bool) {
    // tear down any endpoint or data connection from a previous command
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

    let local_ip = match session.chan.local_addr() {
        Ok(addr) => addr.ip(),
        Err(err) => {
            session.log(&format!("can't determine local address: {}", err));
            session.respond(reactor, "425 Can't open data connection.");
            return;
        }
    };

    let listener =
        match bind_passive_listener(local_ip, session.server.config.passive_ports, |msg| {
            session.log(msg)
        }) {
            Ok(listener) => listener,
            Err(err) => {
                session.log(&format!("passive bind failed: {}", err));
                session.respond(reactor, "425 Can't open data connection.");
                return;
            }
        };

    let port = match listener.local_addr() {
        Ok(addr) => addr.port(),
        Err(err) => {
            session.log(&format!("passive bind failed: {}", err));
            session.respond(reactor, "425 Can't open data connection.");
            return;
        }
    };

    if extended {
        session.respond(
            reactor,
            &format!("229 Entering extended passive mode (|||{}|).", port),
        );
    } else {
        let ip = masqueraded_ip(&session.server, local_ip);
        let reply = match ip {
            IpAddr::V4(v4) => {
                let octets = v4.octets();
                format!(
                    "227 Entering passive mode ({},{},{},{},{},{}).",
                    octets[0],
                    octets[1],
                    octets[2],
                    octets[3],
                    port / 256,
                    port % 256
                )
            }
            IpAddr::V6(_) => {
                // PASV cannot express an IPv6 address; RFC-2428 clients
                // use EPSV instead
                session.respond(reactor, "501 PASV not allowed on IPv6; use EPSV.");
                return;
            }
        };
        session.respond(reactor, &reply);
    }

    match PassiveListener::create(listener, session.weak_self.clone(), reactor) {
        Ok(acceptor) => session.dtp_acceptor = Some(acceptor),
        Err(err) => {
            session.log(&format!("can't watch passive listener: {}", err));
            session.respond(reactor, "425 Can't open data connection.");
        }
    }
}

/// Bind the passive listener, drawing random candidates from the
/// configured port range and falling back to a kernel-assigned port when
/// the whole range is busy.
pub fn bind_passive_listener(
    local_ip: IpAddr,
    passive_ports: Option<(u16, u16)>,
    mut log: impl FnMut(&str),
) -> io::Result<TcpListener> {
    let range = match passive_ports {
        None => return TcpListener::bind(SocketAddr::new(local_ip, 0)),
        Some(range) => range,
    };

    let (low, high) = range;
    let mut ports: Vec<u16> = (low..=high).collect();
    let mut rng = rand::thread_rng();
    while !ports.is_empty() {
        let port = ports.swap_remove(rng.gen_range(0..ports.len()));
        match TcpListener::bind(SocketAddr::new(local_ip, port)) {
            Ok(listener) => return Ok(listener),
            Err(ref err) if err.kind() == io::ErrorKind::AddrInUse => continue,
            Err(err) => return Err(err),
        }
    }
    log(
        "Can't find a valid passive port in the configured range. \
         A random kernel-assigned port will be used.",
    );
    TcpListener::bind(SocketAddr::new(local_ip, 0))
}

/// Pre-bound listening socket owned by the session until a peer connects
/// or the wait times out. Accepts exactly one connection.
pub struct PassiveListener {
    listener: Option<TcpListener>,
    fd: RawFd,
    session: Weak<RefCell<FtpSession>>,
    timer: Option<TimerHandle>,
    closed: bool,
}

impl PassiveListener {
    pub fn create(
        listener: TcpListener,
        session: Weak<RefCell<FtpSession>>,
        reactor: &mut Reactor,
    ) -> io::Result<Rc<RefCell<PassiveListener>>> {
        listener.set_nonblocking(true)?;
        let fd = listener.as_raw_fd();
        let acceptor = Rc::new(RefCell::new(PassiveListener {
            listener: Some(listener),
            fd,
            session: session.clone(),
            timer: None,
            closed: false,
        }));
        reactor.add_channel(
            Rc::clone(&acceptor) as Rc<RefCell<dyn EventHandler>>,
            Interest::READ,
        )?;

        let weak = Rc::downgrade(&acceptor);
        let timer = reactor.call_later(
            Duration::from_secs(DATA_CONNECTION_TIMEOUT),
            move |reactor| {
                if let Some(acceptor) = weak.upgrade() {
                    acceptor.borrow_mut().close(reactor);
                    let session = acceptor.borrow().session.upgrade();
                    if let Some(session) = session {
                        let mut session = session.borrow_mut();
                        session.dtp_acceptor = None;
                        session.respond(reactor, "421 Passive data channel timed out.");
                    }
                }
            },
        );
        acceptor.borrow_mut().timer = Some(timer);
        Ok(acceptor)
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
        self.listener = None;
    }
}

impl EventHandler for PassiveListener {
    fn fd(&self) -> RawFd {
        self.fd
    }

    fn handle_readable(&mut self, reactor: &mut Reactor) {
        if self.closed {
            return;
        }
        let (sock, addr) = match self.listener.as_ref().map(|l| l.accept()) {
            Some(Ok(pair)) => pair,
            Some(Err(ref err)) if err.kind() == io::ErrorKind::WouldBlock => return,
            Some(Err(err)) => {
                debug!("passive accept failed: {}", err);
                return;
            }
            None => return,
        };

        let session = match self.session.upgrade() {
            Some(session) => session,
            None => {
                self.close(reactor);
                return;
            }
        };

        // RFC-2577: drop connections whose source does not match the
        // control connection, unless FXP is explicitly permitted
        let mut sess = session.borrow_mut();
        if addr.ip() != sess.remote_addr.ip() {
            if !sess.server.config.permit_foreign_addresses {
                drop(sock);
                let msg = format!(
                    "Rejected data connection from foreign address {}:{}.",
                    addr.ip(),
                    addr.port()
                );
                warn!("{} {}", sess.prefix(), msg);
                sess.respond(reactor, &format!("425 {}", msg));
                // keep listening: it couldn't be the client's fault
                return;
            }
            info!(
                "{} Established data connection with foreign address {}:{}.",
                sess.prefix(),
                addr.ip(),
                addr.port()
            );
        }

        // single-shot: release the listening socket before the data
        // channel takes over
        self.close(reactor);
        sess.on_data_connected(reactor, sock);
    }

    fn handle_close(&mut self, reactor: &mut Reactor) {
        self.close(reactor);
    }
}
