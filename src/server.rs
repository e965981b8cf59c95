use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::io::{self, Write};
use std::net::{IpAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::os::unix::io::{AsRawFd, RawFd};
use std::rc::Rc;
use std::sync::atomic::{AtomicI32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::{debug, error, info, warn};
use thiserror::Error;

use crate::config::FtpdConfig;
use crate::core_auth::Authorizer;
use crate::core_ftpcommand::handlers::{default_command_table, CommandSpec};
use crate::core_reactor::{EventHandler, Interest, Reactor};
use crate::core_tls::{build_server_config, TlsError};
use crate::session::FtpSession;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Tls(#[from] TlsError),

    #[error("can't bind to {0}: {1}")]
    Bind(String, io::Error),

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Notification points the session invokes on the embedder. All methods
/// default to no-ops; paths are the real filesystem paths.
#[allow(unused_variables)]
pub trait FtpCallbacks: Send + Sync {
    fn on_connect(&self) {}
    fn on_disconnect(&self) {}
    fn on_login(&self, username: &str) {}
    fn on_login_failed(&self, username: &str, password: &str) {}
    fn on_logout(&self, username: &str) {}
    fn on_file_sent(&self, path: &str) {}
    fn on_file_received(&self, path: &str) {}
    fn on_incomplete_file_sent(&self, path: &str) {}
    fn on_incomplete_file_received(&self, path: &str) {}
}

/// The default embedder: every event is a no-op.
pub struct DefaultCallbacks;

impl FtpCallbacks for DefaultCallbacks {}

/// Concurrency model selected at `serve` time.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ConcurrencyModel {
    /// One reactor, all sessions share it (the default).
    Async,
    /// Each accepted connection runs its own reactor on a new thread.
    ThreadPerConnection,
    /// Each accepted connection runs in a forked child process.
    ProcessPerConnection,
    /// N workers forked before listen, sharing the listening socket.
    /// 0 selects the number of online CPUs.
    PreFork(usize),
}

/// Per-reactor shared state every session holds a handle to.
pub struct ServerCtx {
    pub config: FtpdConfig,
    pub authorizer: Arc<dyn Authorizer>,
    pub callbacks: Arc<dyn FtpCallbacks>,
    pub tls: Option<Arc<rustls::ServerConfig>>,
    pub command_table: HashMap<String, CommandSpec>,
    ip_map: RefCell<HashMap<IpAddr, usize>>,
    session_count: Cell<usize>,
}

impl ServerCtx {
    pub fn session_count(&self) -> usize {
        self.session_count.get()
    }

    /// Whether a new connection (control or data) would exceed max_cons.
    pub fn too_many_cons(&self) -> bool {
        let max = self.config.max_cons;
        max != 0 && self.session_count.get() >= max
    }

    pub fn cons_from_ip(&self, ip: IpAddr) -> usize {
        self.ip_map.borrow().get(&ip).copied().unwrap_or(0)
    }

    pub(crate) fn register_session(&self, ip: IpAddr) {
        self.session_count.set(self.session_count.get() + 1);
        *self.ip_map.borrow_mut().entry(ip).or_insert(0) += 1;
    }

    pub(crate) fn unregister_session(&self, ip: IpAddr) {
        self.session_count
            .set(self.session_count.get().saturating_sub(1));
        let mut map = self.ip_map.borrow_mut();
        if let Some(count) = map.get_mut(&ip) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                map.remove(&ip);
            }
        }
    }
}

/// The FTP server: binds the control port and runs one of the
/// concurrency models.
pub struct FtpServer {
    config: FtpdConfig,
    authorizer: Arc<dyn Authorizer>,
    callbacks: Arc<dyn FtpCallbacks>,
    tls: Option<Arc<rustls::ServerConfig>>,
    command_table: HashMap<String, CommandSpec>,
}

impl FtpServer {
    /// Validate the configuration (TLS material included, so mistakes
    /// surface at startup rather than at AUTH time) and build a server.
    pub fn new(config: FtpdConfig, authorizer: Arc<dyn Authorizer>) -> Result<Self, ServerError> {
        let tls = match config.tls.certfile.as_ref() {
            Some(certfile) => Some(build_server_config(
                certfile,
                config.tls.keyfile.as_deref(),
            )?),
            None => {
                if config.tls.control_required || config.tls.data_required {
                    return Err(ServerError::Config(String::from(
                        "tls_control_required/tls_data_required need a certfile",
                    )));
                }
                None
            }
        };
        if let Some((low, high)) = config.passive_ports {
            if low > high {
                return Err(ServerError::Config(format!(
                    "invalid passive port range {}-{}",
                    low, high
                )));
            }
        }
        Ok(Self {
            config,
            authorizer,
            callbacks: Arc::new(DefaultCallbacks),
            tls,
            command_table: default_command_table(),
        })
    }

    pub fn with_callbacks(mut self, callbacks: Arc<dyn FtpCallbacks>) -> Self {
        self.callbacks = callbacks;
        self
    }

    /// The command table used by new sessions; embedders may add or
    /// remove commands before `serve`.
    pub fn command_table_mut(&mut self) -> &mut HashMap<String, CommandSpec> {
        &mut self.command_table
    }

    fn bind(&self) -> Result<TcpListener, ServerError> {
        let addr = format!("{}:{}", self.config.listen_address, self.config.listen_port);
        let sockaddrs: Vec<_> = addr
            .to_socket_addrs()
            .map_err(|err| ServerError::Bind(addr.clone(), err))?
            .collect();
        let mut last_err = io::Error::from(io::ErrorKind::AddrNotAvailable);
        for sockaddr in sockaddrs {
            match TcpListener::bind(sockaddr) {
                Ok(listener) => {
                    info!(
                        "Serving FTP on {}:{}",
                        sockaddr.ip(),
                        sockaddr.port()
                    );
                    return Ok(listener);
                }
                Err(err) => last_err = err,
            }
        }
        Err(ServerError::Bind(addr, last_err))
    }

    fn make_ctx(&self) -> Rc<ServerCtx> {
        Rc::new(ServerCtx {
            config: self.config.clone(),
            authorizer: Arc::clone(&self.authorizer),
            callbacks: Arc::clone(&self.callbacks),
            tls: self.tls.clone(),
            command_table: self.command_table.clone(),
            ip_map: RefCell::new(HashMap::new()),
            session_count: Cell::new(0),
        })
    }

    /// Bind and serve until a termination signal arrives.
    pub fn serve(&self, model: ConcurrencyModel) -> Result<(), ServerError> {
        let listener = self.bind()?;
        self.serve_on(listener, model)
    }

    /// Serve on an already-bound listener (embedders that pick their own
    /// socket options or an ephemeral port).
    pub fn serve_on(
        &self,
        listener: TcpListener,
        model: ConcurrencyModel,
    ) -> Result<(), ServerError> {
        match model {
            ConcurrencyModel::Async => self.serve_async(listener),
            ConcurrencyModel::ThreadPerConnection => self.serve_threaded(listener),
            ConcurrencyModel::ProcessPerConnection => self.serve_multiprocess(listener),
            ConcurrencyModel::PreFork(workers) => self.serve_prefork(listener, workers),
        }
    }

    // --- async (default)

    fn serve_async(&self, listener: TcpListener) -> Result<(), ServerError> {
        let mut reactor = Reactor::new()?;
        install_signal_channel(&mut reactor)?;

        let ctx = self.make_ctx();
        let _acceptor = ServerAcceptor::create(listener, ctx, &mut reactor)?;

        reactor.run();
        info!("Shutting down FTP server.");
        reactor.close_all();
        Ok(())
    }

    // --- thread per connection

    fn serve_threaded(&self, listener: TcpListener) -> Result<(), ServerError> {
        if !self.authorizer.thread_safe() {
            return Err(ServerError::Config(String::from(
                "authorizer mutates process-global identity; \
                 it cannot be used with the multi-thread model",
            )));
        }
        listener.set_nonblocking(true)?;
        install_signals_flag_only();

        let live_cons = Arc::new(AtomicUsize::new(0));
        let ip_map: Arc<Mutex<HashMap<IpAddr, usize>>> = Arc::new(Mutex::new(HashMap::new()));

        loop {
            if signal_received() {
                break;
            }
            let (sock, addr) = match listener.accept() {
                Ok(pair) => pair,
                Err(ref err) if err.kind() == io::ErrorKind::WouldBlock => {
                    std::thread::sleep(Duration::from_millis(50));
                    continue;
                }
                Err(ref err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    error!("accept failed: {}", err);
                    continue;
                }
            };

            if self.config.max_cons != 0 && live_cons.load(Ordering::SeqCst) >= self.config.max_cons
            {
                reject_connection(sock, "421 Too many connections. Service temporary unavailable.");
                continue;
            }
            if self.config.max_cons_per_ip != 0 {
                let count = ip_map
                    .lock()
                    .map(|map| map.get(&addr.ip()).copied().unwrap_or(0))
                    .unwrap_or(0);
                if count >= self.config.max_cons_per_ip {
                    reject_connection(sock, "421 Too many connections from the same IP address.");
                    continue;
                }
            }

            live_cons.fetch_add(1, Ordering::SeqCst);
            if let Ok(mut map) = ip_map.lock() {
                *map.entry(addr.ip()).or_insert(0) += 1;
            }

            let config = self.config.clone();
            let authorizer = Arc::clone(&self.authorizer);
            let callbacks = Arc::clone(&self.callbacks);
            let tls = self.tls.clone();
            let command_table = self.command_table.clone();
            let live_cons = Arc::clone(&live_cons);
            let ip_map = Arc::clone(&ip_map);
            let ip = addr.ip();

            std::thread::spawn(move || {
                let result = run_single_session(
                    sock,
                    config,
                    authorizer,
                    callbacks,
                    tls,
                    command_table,
                );
                if let Err(err) = result {
                    warn!("session thread failed: {}", err);
                }
                live_cons.fetch_sub(1, Ordering::SeqCst);
                if let Ok(mut map) = ip_map.lock() {
                    if let Some(count) = map.get_mut(&ip) {
                        *count = count.saturating_sub(1);
                        if *count == 0 {
                            map.remove(&ip);
                        }
                    }
                }
            });
        }
        info!("Shutting down FTP server.");
        Ok(())
    }

    // --- process per connection

    fn serve_multiprocess(&self, listener: TcpListener) -> Result<(), ServerError> {
        listener.set_nonblocking(true)?;
        install_signals_flag_only();

        loop {
            reap_children();
            if signal_received() {
                break;
            }
            let (sock, addr) = match listener.accept() {
                Ok(pair) => pair,
                Err(ref err) if err.kind() == io::ErrorKind::WouldBlock => {
                    std::thread::sleep(Duration::from_millis(50));
                    continue;
                }
                Err(ref err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    error!("accept failed: {}", err);
                    continue;
                }
            };
            debug!("forking worker for {}", addr);

            match unsafe { libc::fork() } {
                -1 => {
                    error!("fork failed: {}", io::Error::last_os_error());
                    reject_connection(sock, "421 Service temporary unavailable.");
                }
                0 => {
                    // child: serve exactly this connection; the
                    // inherited listener fd dies with the process
                    let code = match run_single_session(
                        sock,
                        self.config.clone(),
                        Arc::clone(&self.authorizer),
                        Arc::clone(&self.callbacks),
                        self.tls.clone(),
                        self.command_table.clone(),
                    ) {
                        Ok(()) => 0,
                        Err(err) => {
                            error!("worker failed: {}", err);
                            1
                        }
                    };
                    std::process::exit(code);
                }
                _child_pid => {
                    // parent: the child owns the socket now
                    drop(sock);
                }
            }
        }
        info!("Shutting down FTP server.");
        Ok(())
    }

    // --- pre-fork pool

    fn serve_prefork(&self, listener: TcpListener, workers: usize) -> Result<(), ServerError> {
        let workers = if workers == 0 {
            online_cpus()
        } else {
            workers
        };
        install_signals_flag_only();
        info!("starting {} pre-forked workers", workers);

        let mut children: Vec<libc::pid_t> = Vec::with_capacity(workers);
        for _ in 0..workers {
            children.push(self.spawn_worker(&listener)?);
        }

        // the parent only supervises: restart workers that die
        // abnormally, propagate termination signals
        loop {
            if signal_received() {
                break;
            }
            let mut status: libc::c_int = 0;
            let pid = unsafe { libc::waitpid(-1, &mut status, 0) };
            if pid < 0 {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                break;
            }
            children.retain(|&child| child != pid);
            if signal_received() {
                break;
            }
            warn!("worker {} exited abnormally; restarting", pid);
            children.push(self.spawn_worker(&listener)?);
        }

        info!("Shutting down FTP server.");
        for &pid in &children {
            unsafe {
                libc::kill(pid, libc::SIGTERM);
            }
        }
        // bounded wait, then force-kill stragglers
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while !children.is_empty() && std::time::Instant::now() < deadline {
            let mut status: libc::c_int = 0;
            let pid = unsafe { libc::waitpid(-1, &mut status, libc::WNOHANG) };
            if pid > 0 {
                children.retain(|&child| child != pid);
            } else {
                std::thread::sleep(Duration::from_millis(50));
            }
        }
        for &pid in &children {
            unsafe {
                libc::kill(pid, libc::SIGKILL);
                libc::waitpid(pid, std::ptr::null_mut(), 0);
            }
        }
        Ok(())
    }

    fn spawn_worker(&self, listener: &TcpListener) -> Result<libc::pid_t, ServerError> {
        match unsafe { libc::fork() } {
            -1 => Err(ServerError::Io(io::Error::last_os_error())),
            0 => {
                // worker: run the async model on the shared listener;
                // accepts are arbitrated by the kernel
                let listener = match listener.try_clone() {
                    Ok(listener) => listener,
                    Err(err) => {
                        error!("worker can't clone listener: {}", err);
                        std::process::exit(1);
                    }
                };
                let code = match self.serve_async(listener) {
                    Ok(()) => 0,
                    Err(err) => {
                        error!("worker failed: {}", err);
                        1
                    }
                };
                std::process::exit(code);
            }
            pid => Ok(pid),
        }
    }
}

/// Drive one session on a private reactor (thread and process models).
fn run_single_session(
    sock: TcpStream,
    config: FtpdConfig,
    authorizer: Arc<dyn Authorizer>,
    callbacks: Arc<dyn FtpCallbacks>,
    tls: Option<Arc<rustls::ServerConfig>>,
    command_table: HashMap<String, CommandSpec>,
) -> Result<(), ServerError> {
    let mut reactor = Reactor::new()?;
    let ctx = Rc::new(ServerCtx {
        config,
        authorizer,
        callbacks,
        tls,
        command_table,
        ip_map: RefCell::new(HashMap::new()),
        session_count: Cell::new(0),
    });
    let ip = sock.peer_addr()?.ip();
    ctx.register_session(ip);
    FtpSession::create(sock, ctx, &mut reactor)?;
    reactor.run();
    reactor.close_all();
    Ok(())
}

/// Listening channel: accepts connections, enforces the connection
/// caps and hands new sockets to the session factory.
pub struct ServerAcceptor {
    listener: TcpListener,
    fd: RawFd,
    ctx: Rc<ServerCtx>,
}

impl ServerAcceptor {
    pub fn create(
        listener: TcpListener,
        ctx: Rc<ServerCtx>,
        reactor: &mut Reactor,
    ) -> io::Result<Rc<RefCell<ServerAcceptor>>> {
        listener.set_nonblocking(true)?;
        let fd = listener.as_raw_fd();
        let acceptor = Rc::new(RefCell::new(ServerAcceptor { listener, fd, ctx }));
        reactor.add_channel(
            Rc::clone(&acceptor) as Rc<RefCell<dyn EventHandler>>,
            Interest::READ,
        )?;
        Ok(acceptor)
    }
}

impl EventHandler for ServerAcceptor {
    fn fd(&self) -> RawFd {
        self.fd
    }

    fn handle_readable(&mut self, reactor: &mut Reactor) {
        loop {
            let (sock, addr) = match self.listener.accept() {
                Ok(pair) => pair,
                Err(ref err) if err.kind() == io::ErrorKind::WouldBlock => break,
                // ECONNABORTED can surface on some BSDs when the peer
                // vanishes between accept and here
                Err(ref err) if err.kind() == io::ErrorKind::ConnectionAborted => continue,
                Err(err) => {
                    error!("accept failed: {}", err);
                    break;
                }
            };

            if self.ctx.too_many_cons() {
                let msg = "421 Too many connections. Service temporary unavailable.";
                info!("{}:{} {}", addr.ip(), addr.port(), msg);
                reject_connection(sock, msg);
                continue;
            }
            let per_ip = self.ctx.config.max_cons_per_ip;
            if per_ip != 0 && self.ctx.cons_from_ip(addr.ip()) >= per_ip {
                let msg = "421 Too many connections from the same IP address.";
                info!("{}:{} {}", addr.ip(), addr.port(), msg);
                reject_connection(sock, msg);
                continue;
            }

            info!("{}:{} Connected.", addr.ip(), addr.port());
            self.ctx.register_session(addr.ip());
            if let Err(err) = FtpSession::create(sock, Rc::clone(&self.ctx), reactor) {
                warn!("failed to set up session for {}: {}", addr, err);
                self.ctx.unregister_session(addr.ip());
            }
        }
    }

    fn handle_close(&mut self, reactor: &mut Reactor) {
        reactor.remove_channel(self.fd);
    }
}

/// Best-effort 421 on a socket we are about to drop.
fn reject_connection(mut sock: TcpStream, msg: &str) {
    let _ = sock.set_nonblocking(true);
    let _ = sock.write_all(format!("{}\r\n", msg).as_bytes());
}

// --- signal plumbing

static SIGNAL_PIPE_WRITE: AtomicI32 = AtomicI32::new(-1);
static LAST_SIGNAL: AtomicI32 = AtomicI32::new(0);

extern "C" fn handle_termination_signal(signum: libc::c_int) {
    LAST_SIGNAL.store(signum, Ordering::SeqCst);
    let fd = SIGNAL_PIPE_WRITE.load(Ordering::SeqCst);
    if fd >= 0 {
        unsafe {
            libc::write(fd, b"s".as_ptr() as *const libc::c_void, 1);
        }
    }
}

/// The signal that terminated the server, if any; used for the 130 exit
/// status.
pub fn termination_signal() -> Option<i32> {
    match LAST_SIGNAL.load(Ordering::SeqCst) {
        0 => None,
        signum => Some(signum),
    }
}

fn signal_received() -> bool {
    LAST_SIGNAL.load(Ordering::SeqCst) != 0
}

fn install_handlers() {
    unsafe {
        libc::signal(
            libc::SIGINT,
            handle_termination_signal as usize as libc::sighandler_t,
        );
        libc::signal(
            libc::SIGTERM,
            handle_termination_signal as usize as libc::sighandler_t,
        );
        libc::signal(libc::SIGPIPE, libc::SIG_IGN);
    }
}

fn install_signals_flag_only() {
    install_handlers();
}

/// SIGINT/SIGTERM flip the reactor stop flag through a self-pipe so a
/// blocking poll wakes up immediately.
fn install_signal_channel(reactor: &mut Reactor) -> io::Result<()> {
    let mut fds = [0 as libc::c_int; 2];
    if unsafe { libc::pipe(fds.as_mut_ptr()) } != 0 {
        return Err(io::Error::last_os_error());
    }
    for fd in fds {
        unsafe {
            let flags = libc::fcntl(fd, libc::F_GETFL);
            libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK);
        }
    }
    SIGNAL_PIPE_WRITE.store(fds[1], Ordering::SeqCst);
    install_handlers();

    let stop = reactor.stop_flag();
    let channel = Rc::new(RefCell::new(SignalChannel {
        read_fd: fds[0],
        stop,
    }));
    reactor.add_channel(channel as Rc<RefCell<dyn EventHandler>>, Interest::READ)?;
    Ok(())
}

struct SignalChannel {
    read_fd: RawFd,
    stop: Rc<Cell<bool>>,
}

impl EventHandler for SignalChannel {
    fn fd(&self) -> RawFd {
        self.read_fd
    }

    fn handle_readable(&mut self, _reactor: &mut Reactor) {
        let mut buf = [0u8; 64];
        loop {
            let n = unsafe {
                libc::read(
                    self.read_fd,
                    buf.as_mut_ptr() as *mut libc::c_void,
                    buf.len(),
                )
            };
            if n <= 0 {
                break;
            }
        }
        self.stop.set(true);
    }

    fn handle_close(&mut self, reactor: &mut Reactor) {
        reactor.remove_channel(self.read_fd);
    }
}

fn reap_children() {
    loop {
        let pid = unsafe { libc::waitpid(-1, std::ptr::null_mut(), libc::WNOHANG) };
        if pid <= 0 {
            break;
        }
        debug!("reaped worker {}", pid);
    }
}

fn online_cpus() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}
