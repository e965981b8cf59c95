use std::path::PathBuf;

use crate::core_reactor::Reactor;
use crate::core_transfer::IteratorProducer;
use crate::core_vfs::{listing, strerror};
use crate::session::{FtpSession, SendSource};

/// Handles the MLSD FTP command (RFC-3659): machine-processable
/// directory listing over the data connection.
pub fn handle_mlsd_command(session: &mut FtpSession, reactor: &mut Reactor, path: Option<PathBuf>) {
    let path = match path {
        Some(path) => path,
        None => return session.respond(reactor, "550 Invalid path."),
    };

    // RFC-3659 requires 501 when the target is not a directory
    let is_dir = session
        .fs
        .as_ref()
        .map(|fs| fs.isdir(&path))
        .unwrap_or(false);
    if !is_dir {
        session.log_fs_cmd("MLSD", &path, 501, "No such directory");
        session.respond(reactor, "501 No such directory.");
        return;
    }

    let guard = session.impersonation_guard();
    let names = match session.fs.as_ref() {
        Some(fs) => fs.listdir(&path),
        None => return session.respond(reactor, "503 Login with USER and PASS first."),
    };
    drop(guard);

    match names {
        Ok(names) => {
            let perms = session.server.authorizer.get_perms(&session.username);
            let iter = listing::format_mlsx(
                &path,
                names,
                &perms,
                &session.current_facts,
                session.server.config.use_gmt_times,
            );
            session.log_fs_cmd("MLSD", &path, 150, "Transfer starting");
            session.push_dtp_send(
                reactor,
                SendSource::Producer(Box::new(IteratorProducer::new(iter))),
                None,
                "125 Data connection already open. Transfer starting.",
                "150 File status okay. About to open data connection.",
            );
        }
        Err(err) => {
            let why = strerror(&err);
            session.log_fs_cmd("MLSD", &path, 550, &why);
            session.respond(reactor, &format!("550 {}.", why));
        }
    }
}
