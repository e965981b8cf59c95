use std::io::{Seek, SeekFrom};
use std::path::PathBuf;

use crate::core_reactor::Reactor;
use crate::core_transfer::{sendfile, FileProducer};
use crate::core_vfs::filesystem::OpenMode;
use crate::core_vfs::strerror;
use crate::session::{FtpSession, SendSource, TransferType};

/// Handles the RETR FTP command.
///
/// A pending REST offset is applied once and cleared. The sendfile(2)
/// fast path is taken when the transfer is binary, the data channel is
/// cleartext and the platform supports it; everything else streams
/// through a file producer.
pub fn handle_retr_command(session: &mut FtpSession, reactor: &mut Reactor, path: Option<PathBuf>) {
    let path = match path {
        Some(path) => path,
        None => return session.respond(reactor, "550 Invalid path."),
    };
    let rest_pos = session.restart_position;
    session.restart_position = 0;

    let is_dir = session
        .fs
        .as_ref()
        .map(|fs| fs.isdir(&path))
        .unwrap_or(false);
    if is_dir {
        let why = "Is a directory";
        session.log_fs_cmd("RETR", &path, 550, why);
        session.respond(reactor, &format!("550 {}.", why));
        return;
    }

    let guard = session.impersonation_guard();
    let opened = {
        let fs = match session.fs.as_ref() {
            Some(fs) => fs,
            None => return session.respond(reactor, "503 Login with USER and PASS first."),
        };
        fs.open(&path, OpenMode::Read)
            .and_then(|file| fs.getsize(&path).map(|size| (file, size)))
    };
    drop(guard);

    let (mut file, size) = match opened {
        Ok(pair) => pair,
        Err(err) => {
            let why = strerror(&err);
            session.log_fs_cmd("RETR", &path, 550, &why);
            session.respond(reactor, &format!("550 {}.", why));
            return;
        }
    };

    if rest_pos > 0 {
        // RFC-1123 allows 554 when the file cannot be repositioned as
        // requested
        if rest_pos > size {
            let why = "Invalid REST parameter";
            session.log_fs_cmd("RETR", &path, 554, why);
            session.respond(reactor, &format!("554 {}", why));
            return;
        }
        if let Err(err) = file.seek(SeekFrom::Start(rest_pos)) {
            let why = strerror(&err);
            session.log_fs_cmd("RETR", &path, 554, &why);
            session.respond(reactor, &format!("554 {}", why));
            return;
        }
    }

    let binary = session.transfer_type == TransferType::Binary;
    let use_sendfile = binary
        && session.server.config.use_sendfile
        && sendfile::supported()
        && !session.prot_private;

    let source = if use_sendfile {
        SendSource::Sendfile {
            file,
            offset: rest_pos,
        }
    } else {
        SendSource::Producer(Box::new(FileProducer::new(file, !binary)))
    };

    session.log_fs_cmd("RETR", &path, 150, "Transfer starting");
    session.push_dtp_send(
        reactor,
        source,
        Some(path),
        "125 Data connection already open. Transfer starting.",
        "150 File status okay. About to open data connection.",
    );
}
