use std::path::PathBuf;

use crate::core_reactor::Reactor;
use crate::core_vfs::{listing, strerror};
use crate::session::FtpSession;

/// Handles the MLST FTP command (RFC-3659): facts for a single path,
/// returned over the control channel. TVFS is supported, so the reply
/// carries the fully-qualified virtual pathname.
pub fn handle_mlst_command(session: &mut FtpSession, reactor: &mut Reactor, path: Option<PathBuf>) {
    let path = match path {
        Some(path) => path,
        None => return session.respond(reactor, "550 Invalid path."),
    };
    let line = match session.fs.as_ref() {
        Some(fs) => fs.fs2ftp(&path),
        None => return session.respond(reactor, "503 Login with USER and PASS first."),
    };
    let perms = session.server.authorizer.get_perms(&session.username);

    let guard = session.impersonation_guard();
    let entry = listing::format_mlsx_entry(
        &path,
        &line,
        &perms,
        &session.current_facts,
        session.server.config.use_gmt_times,
    );
    drop(guard);

    match entry {
        Ok(facts) => {
            session.push_text(&format!("250-Listing \"{}\":\r\n", line));
            session.push_text(&format!(" {}", facts));
            session.respond(reactor, "250 End MLST.");
            session.log_fs_cmd("MLST", &path, 250, "File listed");
        }
        Err(err) => {
            let why = strerror(&err);
            session.log_fs_cmd("MLST", &path, 550, &why);
            session.respond(reactor, &format!("550 {}.", why));
        }
    }
}
