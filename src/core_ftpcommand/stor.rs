use std::io::{Seek, SeekFrom};
use std::path::PathBuf;

use crate::core_reactor::Reactor;
use crate::core_vfs::filesystem::OpenMode;
use crate::core_vfs::strerror;
use crate::session::FtpSession;

/// Handles the STOR FTP command, and APPE through `handle_appe_command`.
///
/// A pending REST offset switches the open mode to read/write so the
/// file can be repositioned without truncation.
pub fn handle_stor_command(
    session: &mut FtpSession,
    reactor: &mut Reactor,
    path: Option<PathBuf>,
    append: bool,
) {
    let cmd = if append { "APPE" } else { "STOR" };
    let path = match path {
        Some(path) => path,
        None => return session.respond(reactor, "550 Invalid path."),
    };
    let rest_pos = session.restart_position;
    session.restart_position = 0;

    let mode = if append {
        OpenMode::Append
    } else if rest_pos > 0 {
        OpenMode::ReadWrite
    } else {
        OpenMode::Write
    };

    let guard = session.impersonation_guard();
    let opened = {
        let fs = match session.fs.as_ref() {
            Some(fs) => fs,
            None => return session.respond(reactor, "503 Login with USER and PASS first."),
        };
        fs.open(&path, mode).and_then(|file| {
            let size = fs.getsize(&path).unwrap_or(0);
            Ok((file, size))
        })
    };
    drop(guard);

    let (mut file, size) = match opened {
        Ok(pair) => pair,
        Err(err) => {
            let why = strerror(&err);
            session.log_fs_cmd(cmd, &path, 550, &why);
            session.respond(reactor, &format!("550 {}.", why));
            return;
        }
    };

    if rest_pos > 0 {
        if rest_pos > size {
            let why = "Invalid REST parameter";
            session.log_fs_cmd(cmd, &path, 554, why);
            session.respond(reactor, &format!("554 {}", why));
            return;
        }
        if let Err(err) = file.seek(SeekFrom::Start(rest_pos)) {
            let why = strerror(&err);
            session.log_fs_cmd(cmd, &path, 554, &why);
            session.respond(reactor, &format!("554 {}", why));
            return;
        }
    }

    session.log_fs_cmd(cmd, &path, 150, "Transfer starting");
    session.push_dtp_receive(
        reactor,
        file,
        path,
        "125 Data connection already open. Transfer starting.",
        "150 File status okay. About to open data connection.",
    );
}

/// Handles the APPE FTP command. APPE after REST makes no sense and is
/// refused.
pub fn handle_appe_command(session: &mut FtpSession, reactor: &mut Reactor, path: Option<PathBuf>) {
    if session.restart_position > 0 {
        session.respond(reactor, "450 Can't APPE while REST request is pending.");
        return;
    }
    handle_stor_command(session, reactor, path, true);
}
