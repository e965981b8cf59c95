use crate::core_reactor::Reactor;
use crate::core_vfs::strerror;
use crate::session::FtpSession;

/// Handles the SITE CHMOD command: `SITE CHMOD <octal-mode> <path>`.
pub fn handle_site_chmod_command(session: &mut FtpSession, reactor: &mut Reactor, arg: &str) {
    let (mode_str, path_str) = match arg.split_once(' ') {
        Some(pair) => pair,
        None => {
            session.respond(reactor, "501 Usage: SITE CHMOD <mode> <path>.");
            return;
        }
    };
    let mode = match u32::from_str_radix(mode_str, 8) {
        Ok(mode) if mode <= 0o7777 => mode,
        _ => {
            session.respond(reactor, "501 Invalid SITE CHMOD format.");
            return;
        }
    };

    let (path, valid) = match session.fs.as_ref() {
        Some(fs) => {
            let path = fs.ftp2fs(path_str);
            let valid = fs.validpath(&path);
            (path, valid)
        }
        None => return session.respond(reactor, "503 Login with USER and PASS first."),
    };
    if !valid {
        session.respond(
            reactor,
            "550 Path points outside the user's root directory.",
        );
        return;
    }

    let guard = session.impersonation_guard();
    let result = session.fs.as_ref().map(|fs| fs.chmod(&path, mode));
    drop(guard);

    match result {
        Some(Ok(())) => {
            session.log_fs_cmd("SITE CHMOD", &path, 200, "Mode changed");
            session.respond(reactor, "200 SITE CHMOD successful.");
        }
        Some(Err(err)) => {
            let why = strerror(&err);
            session.log_fs_cmd("SITE CHMOD", &path, 550, &why);
            session.respond(reactor, &format!("550 {}.", why));
        }
        None => session.respond(reactor, "503 Login with USER and PASS first."),
    }
}
