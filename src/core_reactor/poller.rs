use std::collections::HashSet;
use std::io;
use std::os::unix::io::RawFd;
use std::time::Duration;

use mio::unix::SourceFd;
use mio::{Events, Token};

/// Readiness interest requested for a file descriptor.
///
/// At most one read and one write registration exist per fd at any time;
/// the reactor re-computes the mask after every dispatch so that write
/// interest is only armed while a channel actually has pending output.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct Interest {
    pub read: bool,
    pub write: bool,
}

impl Interest {
    pub const NONE: Interest = Interest {
        read: false,
        write: false,
    };
    pub const READ: Interest = Interest {
        read: true,
        write: false,
    };
    pub const WRITE: Interest = Interest {
        read: false,
        write: true,
    };
    pub const READ_WRITE: Interest = Interest {
        read: true,
        write: true,
    };

    pub fn is_none(self) -> bool {
        !self.read && !self.write
    }
}

/// A single readiness notification as reported by the poller.
///
/// `error` covers ERR/HUP conditions, which are always delivered whether
/// requested or not.
#[derive(Copy, Clone, Debug)]
pub struct IoEvent {
    pub fd: RawFd,
    pub readable: bool,
    pub writable: bool,
    pub error: bool,
}

/// Uniform readiness-notification contract.
///
/// Backends must present level-triggered semantics to the reactor; on
/// edge-triggered kernels the channels compensate by draining sockets
/// until `WouldBlock`, which they do in any case.
pub trait Poller {
    fn register(&mut self, fd: RawFd, interest: Interest) -> io::Result<()>;
    fn modify(&mut self, fd: RawFd, interest: Interest) -> io::Result<()>;
    fn unregister(&mut self, fd: RawFd) -> io::Result<()>;

    /// Wait for events. `None` blocks indefinitely, `Some(0)` returns
    /// immediately. Collected events are appended to `out`.
    fn poll(&mut self, timeout: Option<Duration>, out: &mut Vec<IoEvent>) -> io::Result<usize>;
}

/// The production poller, backed by the platform's best facility
/// (epoll on Linux, kqueue on the BSDs and macOS) selected at startup
/// by mio.
pub struct OsPoller {
    poll: mio::Poll,
    events: Events,
    // fds currently known to the kernel; an empty interest parks the fd
    // outside the poll set instead of registering a zero mask.
    registered: HashSet<RawFd>,
}

impl OsPoller {
    pub fn new() -> io::Result<Self> {
        Ok(Self {
            poll: mio::Poll::new()?,
            events: Events::with_capacity(1024),
            registered: HashSet::new(),
        })
    }

    fn mio_interest(interest: Interest) -> mio::Interest {
        match (interest.read, interest.write) {
            (true, true) => mio::Interest::READABLE | mio::Interest::WRITABLE,
            (false, true) => mio::Interest::WRITABLE,
            // A bare read registration is also used for fds we only watch
            // for HUP/ERR.
            _ => mio::Interest::READABLE,
        }
    }
}

impl Poller for OsPoller {
    fn register(&mut self, fd: RawFd, interest: Interest) -> io::Result<()> {
        if interest.is_none() {
            self.registered.remove(&fd);
            return Ok(());
        }
        self.poll.registry().register(
            &mut SourceFd(&fd),
            Token(fd as usize),
            Self::mio_interest(interest),
        )?;
        self.registered.insert(fd);
        Ok(())
    }

    fn modify(&mut self, fd: RawFd, interest: Interest) -> io::Result<()> {
        if interest.is_none() {
            return self.unregister(fd);
        }
        if !self.registered.contains(&fd) {
            return self.register(fd, interest);
        }
        self.poll.registry().reregister(
            &mut SourceFd(&fd),
            Token(fd as usize),
            Self::mio_interest(interest),
        )
    }

    fn unregister(&mut self, fd: RawFd) -> io::Result<()> {
        if self.registered.remove(&fd) {
            self.poll.registry().deregister(&mut SourceFd(&fd))?;
        }
        Ok(())
    }

    fn poll(&mut self, timeout: Option<Duration>, out: &mut Vec<IoEvent>) -> io::Result<usize> {
        match self.poll.poll(&mut self.events, timeout) {
            Ok(()) => {}
            Err(ref err) if err.kind() == io::ErrorKind::Interrupted => return Ok(0),
            Err(err) => return Err(err),
        }
        let before = out.len();
        for event in self.events.iter() {
            out.push(IoEvent {
                fd: event.token().0 as RawFd,
                readable: event.is_readable() || event.is_read_closed(),
                writable: event.is_writable() || event.is_write_closed(),
                error: event.is_error(),
            });
        }
        Ok(out.len() - before)
    }
}
