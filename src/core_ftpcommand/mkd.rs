use std::path::PathBuf;

use crate::core_ftpcommand::pwd::quote_path;
use crate::core_reactor::Reactor;
use crate::core_vfs::strerror;
use crate::session::FtpSession;

/// Handles the MKD FTP command.
pub fn handle_mkd_command(session: &mut FtpSession, reactor: &mut Reactor, path: Option<PathBuf>) {
    let path = match path {
        Some(path) => path,
        None => return session.respond(reactor, "550 Invalid path."),
    };
    let line = match session.fs.as_ref() {
        Some(fs) => fs.fs2ftp(&path),
        None => return session.respond(reactor, "503 Login with USER and PASS first."),
    };

    let guard = session.impersonation_guard();
    let result = session.fs.as_ref().map(|fs| fs.mkdir(&path));
    drop(guard);

    match result {
        Some(Ok(())) => {
            session.log_fs_cmd("MKD", &path, 257, "Directory created");
            session.respond(
                reactor,
                &format!("257 \"{}\" directory created.", quote_path(&line)),
            );
        }
        Some(Err(err)) => {
            let why = strerror(&err);
            session.log_fs_cmd("MKD", &path, 550, &why);
            session.respond(reactor, &format!("550 {}.", why));
        }
        None => session.respond(reactor, "503 Login with USER and PASS first."),
    }
}
