use std::path::PathBuf;

use crate::core_reactor::Reactor;
use crate::core_transfer::BytesProducer;
use crate::core_vfs::strerror;
use crate::session::{FtpSession, SendSource};

/// Handles the NLST FTP command: bare names, one per line.
pub fn handle_nlst_command(session: &mut FtpSession, reactor: &mut Reactor, path: Option<PathBuf>) {
    let path = match path {
        Some(path) => path,
        None => return session.respond(reactor, "550 Invalid path."),
    };

    let guard = session.impersonation_guard();
    let names = {
        let fs = match session.fs.as_ref() {
            Some(fs) => fs,
            None => return session.respond(reactor, "503 Login with USER and PASS first."),
        };
        if fs.isdir(&path) {
            fs.listdir(&path)
        } else {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            fs.lstat(&path).map(|_| vec![name])
        }
    };
    drop(guard);

    match names {
        Ok(names) => {
            let mut data = String::new();
            for name in names {
                data.push_str(&name);
                data.push_str("\r\n");
            }
            session.log_fs_cmd("NLST", &path, 150, "Transfer starting");
            session.push_dtp_send(
                reactor,
                SendSource::Producer(Box::new(BytesProducer::new(data.into_bytes()))),
                None,
                "125 Data connection already open. Transfer starting.",
                "150 File status okay. About to open data connection.",
            );
        }
        Err(err) => {
            let why = strerror(&err);
            session.log_fs_cmd("NLST", &path, 550, &why);
            session.respond(reactor, &format!("550 {}.", why));
        }
    }
}
