use std::path::PathBuf;

use crate::core_reactor::Reactor;
use crate::core_vfs::strerror;
use crate::session::FtpSession;

/// Handles the RMD FTP command. Removing the user's root is refused.
pub fn handle_rmd_command(session: &mut FtpSession, reactor: &mut Reactor, path: Option<PathBuf>) {
    let path = match path {
        Some(path) => path,
        None => return session.respond(reactor, "550 Invalid path."),
    };
    let is_root = session
        .fs
        .as_ref()
        .map(|fs| fs.realpath(&path) == fs.realpath(fs.root()))
        .unwrap_or(true);
    if is_root {
        let msg = "Can't remove root directory.";
        session.log_fs_cmd("RMD", &path, 550, msg);
        session.respond(reactor, &format!("550 {}", msg));
        return;
    }

    let guard = session.impersonation_guard();
    let result = session.fs.as_ref().map(|fs| fs.rmdir(&path));
    drop(guard);

    match result {
        Some(Ok(())) => {
            session.log_fs_cmd("RMD", &path, 250, "Directory removed");
            session.respond(reactor, "250 Directory removed.");
        }
        Some(Err(err)) => {
            let why = strerror(&err);
            session.log_fs_cmd("RMD", &path, 550, &why);
            session.respond(reactor, &format!("550 {}.", why));
        }
        None => session.respond(reactor, "503 Login with USER and PASS first."),
    }
}
