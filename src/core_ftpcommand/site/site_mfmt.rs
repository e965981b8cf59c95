use crate::core_ftpcommand::mdtm::set_mtime;
use crate::core_reactor::Reactor;
use crate::session::FtpSession;

/// Handles the SITE MFMT command: `SITE MFMT YYYYMMDDHHMMSS <path>`
/// (RFC draft "MFMT", widely deployed).
pub fn handle_site_mfmt_command(session: &mut FtpSession, reactor: &mut Reactor, arg: &str) {
    let (timeval, path_str) = match arg.split_once(' ') {
        Some(pair) => pair,
        None => {
            session.respond(reactor, "501 Usage: SITE MFMT <timeval> <path>.");
            return;
        }
    };
    if timeval.len() != 14 || !timeval.bytes().all(|b| b.is_ascii_digit()) {
        session.respond(reactor, "501 Invalid time format (expected YYYYMMDDHHMMSS).");
        return;
    }

    let (path, valid, is_file) = match session.fs.as_ref() {
        Some(fs) => {
            let path = fs.ftp2fs(path_str);
            let valid = fs.validpath(&path);
            let is_file = fs.isfile(&path);
            (path, valid, is_file)
        }
        None => return session.respond(reactor, "503 Login with USER and PASS first."),
    };
    if !valid {
        session.respond(reactor, "550 Path points outside the user's root directory.");
        return;
    }
    if !is_file {
        session.respond(reactor, &format!("550 {} is not retrievable.", path_str));
        return;
    }

    set_mtime(session, reactor, "SITE MFMT", timeval, &path);
}
