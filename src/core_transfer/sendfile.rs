use std::io;
use std::os::unix::io::RawFd;

/// Outcome of one sendfile attempt.
pub enum SendfileResult {
    /// `n` bytes were queued onto the socket.
    Sent(usize),
    /// The socket (or the kernel) asked us to retry later; re-arm write
    /// interest, do not fail the transfer.
    Retry,
    /// The kernel cannot service this (fd, offset) pair at all. Only a
    /// transfer with zero bytes sent so far may fall back to plain send.
    Unsupported(io::Error),
    /// Hard I/O error; the transfer must abort with 426.
    Failed(io::Error),
}

/// Zero-copy file-to-socket transfer, Linux only. On other platforms the
/// data handler never selects the sendfile path.
#[cfg(target_os = "linux")]
pub fn sendfile(sock_fd: RawFd, file_fd: RawFd, offset: &mut u64, count: usize) -> SendfileResult {
    let mut off = *offset as libc::off_t;
    let sent = unsafe { libc::sendfile(sock_fd, file_fd, &mut off, count) };
    if sent >= 0 {
        *offset = off as u64;
        return SendfileResult::Sent(sent as usize);
    }
    let err = io::Error::last_os_error();
    match err.raw_os_error() {
        Some(libc::EAGAIN) | Some(libc::EINTR) | Some(libc::EBUSY) => SendfileResult::Retry,
        Some(libc::EINVAL) | Some(libc::ENOSYS) | Some(libc::EOVERFLOW) => {
            SendfileResult::Unsupported(err)
        }
        _ => SendfileResult::Failed(err),
    }
}

#[cfg(not(target_os = "linux"))]
pub fn sendfile(
    _sock_fd: RawFd,
    _file_fd: RawFd,
    _offset: &mut u64,
    _count: usize,
) -> SendfileResult {
    SendfileResult::Unsupported(io::Error::from(io::ErrorKind::Unsupported))
}

/// Whether the platform offers the fast path at all.
pub fn supported() -> bool {
    cfg!(target_os = "linux")
}
