use std::path::PathBuf;

use crate::core_reactor::Reactor;
use crate::core_vfs::strerror;
use crate::session::{FtpSession, TransferType};

/// Handles the SIZE FTP command (RFC-3659).
///
/// SIZE is rejected under TYPE ASCII: honoring it would require scanning
/// the whole file to account for line-ending translation, which is both
/// expensive and a DoS vector. Clients resume in binary mode anyway.
pub fn handle_size_command(session: &mut FtpSession, reactor: &mut Reactor, path: Option<PathBuf>) {
    let path = match path {
        Some(path) => path,
        None => return session.respond(reactor, "550 Invalid path."),
    };

    if session.transfer_type == TransferType::Ascii {
        let why = "SIZE not allowed in ASCII mode";
        session.log_fs_cmd("SIZE", &path, 550, why);
        session.respond(reactor, &format!("550 {}.", why));
        return;
    }

    let (is_file, line) = match session.fs.as_ref() {
        Some(fs) => (fs.isfile(&fs.realpath(&path)), fs.fs2ftp(&path)),
        None => return session.respond(reactor, "503 Login with USER and PASS first."),
    };
    if !is_file {
        let why = format!("{} is not retrievable", line);
        session.log_fs_cmd("SIZE", &path, 550, &why);
        session.respond(reactor, &format!("550 {}.", why));
        return;
    }

    let guard = session.impersonation_guard();
    let result = session.fs.as_ref().map(|fs| fs.getsize(&path));
    drop(guard);

    match result {
        Some(Ok(size)) => {
            session.log_fs_cmd("SIZE", &path, 213, "Size retrieved");
            session.respond(reactor, &format!("213 {}", size));
        }
        Some(Err(err)) => {
            let why = strerror(&err);
            session.log_fs_cmd("SIZE", &path, 550, &why);
            session.respond(reactor, &format!("550 {}.", why));
        }
        None => session.respond(reactor, "503 Login with USER and PASS first."),
    }
}
