use std::path::PathBuf;

use crate::core_reactor::Reactor;
use crate::core_vfs::strerror;
use crate::session::FtpSession;

/// Handles the CWD FTP command.
pub fn handle_cwd_command(session: &mut FtpSession, reactor: &mut Reactor, path: Option<PathBuf>) {
    let path = match path {
        Some(path) => path,
        None => return session.respond(reactor, "550 Invalid path."),
    };

    let guard = session.impersonation_guard();
    let result = match session.fs.as_mut() {
        Some(fs) => fs.chdir(&path),
        None => return session.respond(reactor, "503 Login with USER and PASS first."),
    };
    drop(guard);

    match result {
        Ok(()) => {
            let cwd = session
                .fs
                .as_ref()
                .map(|fs| fs.cwd().to_string())
                .unwrap_or_default();
            session.log_fs_cmd("CWD", &path, 250, "Directory changed");
            session.respond(reactor, &format!("250 \"{}\" is the current directory.", cwd));
        }
        Err(err) => {
            let why = strerror(&err);
            session.log_fs_cmd("CWD", &path, 550, &why);
            session.respond(reactor, &format!("550 {}.", why));
        }
    }
}
