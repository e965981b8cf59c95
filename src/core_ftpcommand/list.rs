use std::path::PathBuf;

use crate::core_reactor::Reactor;
use crate::core_transfer::IteratorProducer;
use crate::core_vfs::{listing, strerror};
use crate::session::{FtpSession, SendSource};

/// Handles the LIST FTP command: send a `ls -l`-style listing of the
/// target directory (or single file) over the data connection.
pub fn handle_list_command(session: &mut FtpSession, reactor: &mut Reactor, path: Option<PathBuf>) {
    let path = match path {
        Some(path) => path,
        None => return session.respond(reactor, "550 Invalid path."),
    };

    let guard = session.impersonation_guard();
    let listing_input = {
        let fs = match session.fs.as_ref() {
            Some(fs) => fs,
            None => return session.respond(reactor, "503 Login with USER and PASS first."),
        };
        if fs.isdir(&path) {
            fs.listdir(&path).map(|names| (path.clone(), names))
        } else {
            // a file or symlink: list the entry itself
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let parent = path.parent().map(|p| p.to_path_buf()).unwrap_or_default();
            fs.lstat(&path).map(|_| (parent, vec![name]))
        }
    };
    drop(guard);

    match listing_input {
        Ok((basedir, names)) => {
            session.log_fs_cmd("LIST", &path, 150, "Transfer starting");
            let iter = listing::format_list(&basedir, names, session.server.config.use_gmt_times);
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
            session.log_fs_cmd("LIST", &path, 550, &why);
            session.respond(reactor, &format!("550 {}.", why));
        }
    }
}
