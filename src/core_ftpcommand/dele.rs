use std::path::PathBuf;

use crate::core_reactor::Reactor;
use crate::core_vfs::strerror;
use crate::session::FtpSession;

/// Handles the DELE FTP command.
pub fn handle_dele_command(session: &mut FtpSession, reactor: &mut Reactor, path: Option<PathBuf>) {
    let path = match path {
        Some(path) => path,
        None => return session.respond(reactor, "550 Invalid path."),
    };

    let guard = session.impersonation_guard();
    let result = session.fs.as_ref().map(|fs| fs.remove(&path));
    drop(guard);

    match result {
        Some(Ok(())) => {
            session.log_fs_cmd("DELE", &path, 250, "File removed");
            session.respond(reactor, "250 File removed.");
        }
        Some(Err(err)) => {
            let why = strerror(&err);
            session.log_fs_cmd("DELE", &path, 550, &why);
            session.respond(reactor, &format!("550 {}.", why));
        }
        None => session.respond(reactor, "503 Login with USER and PASS first."),
    }
}
