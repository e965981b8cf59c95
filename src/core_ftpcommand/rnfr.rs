use std::path::PathBuf;

use crate::core_reactor::Reactor;
use crate::session::FtpSession;

/// Handles the RNFR FTP command: stash the rename source. The pending
/// source survives only until the next command, which must be RNTO.
pub fn handle_rnfr_command(session: &mut FtpSession, reactor: &mut Reactor, path: Option<PathBuf>) {
    let path = match path {
        Some(path) => path,
        None => return session.respond(reactor, "550 Invalid path."),
    };
    let fs = match session.fs.as_ref() {
        Some(fs) => fs,
        None => return session.respond(reactor, "503 Login with USER and PASS first."),
    };

    if !fs.lexists(&path) {
        session.log_fs_cmd("RNFR", &path, 550, "No such file");
        session.respond(reactor, "550 No such file or directory.");
    } else if fs.realpath(&path) == fs.realpath(fs.root()) {
        session.log_fs_cmd("RNFR", &path, 550, "Can't rename home dir");
        session.respond(reactor, "550 Can't rename the home directory.");
    } else {
        session.rnfr = Some(path.clone());
        session.log_fs_cmd("RNFR", &path, 350, "Ready for destination name");
        session.respond(reactor, "350 Ready for destination name.");
    }
}
