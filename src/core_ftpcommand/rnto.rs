use std::path::PathBuf;

use crate::core_reactor::Reactor;
use crate::core_vfs::strerror;
use crate::session::FtpSession;

/// Handles the RNTO FTP command: complete a rename started by RNFR.
pub fn handle_rnto_command(session: &mut FtpSession, reactor: &mut Reactor, path: Option<PathBuf>) {
    let src = match session.rnfr.take() {
        Some(src) => src,
        None => {
            session.respond(reactor, "503 Bad sequence of commands: use RNFR first.");
            return;
        }
    };
    let dst = match path {
        Some(path) => path,
        None => return session.respond(reactor, "550 Invalid path."),
    };

    let guard = session.impersonation_guard();
    let result = session.fs.as_ref().map(|fs| fs.rename(&src, &dst));
    drop(guard);

    match result {
        Some(Ok(())) => {
            session.log_fs_cmd("RNTO", &dst, 250, "Path renamed");
            session.respond(reactor, "250 Renaming ok.");
        }
        Some(Err(err)) => {
            let why = strerror(&err);
            session.log_fs_cmd("RNTO", &dst, 550, &why);
            session.respond(reactor, &format!("550 {}.", why));
        }
        None => session.respond(reactor, "503 Login with USER and PASS first."),
    }
}
