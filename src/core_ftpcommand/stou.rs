use std::path::PathBuf;

use crate::constants::STOU_MAX_ATTEMPTS;
use crate::core_reactor::Reactor;
use crate::core_vfs::strerror;
use crate::session::FtpSession;

/// Handles the STOU FTP command: store under a unique name.
///
/// Candidates are `<prefix>.N` for the smallest N that does not exist
/// yet, bounded by `STOU_MAX_ATTEMPTS`. The 125/150 reply format
/// (`FILE: name`) comes from RFC-1123, which obsoleted the 250 reply
/// RFC-959 asked for.
pub fn handle_stou_command(session: &mut FtpSession, reactor: &mut Reactor, arg: &str) {
    // STOU preceded by REST makes no sense
    if session.restart_position > 0 {
        session.respond(reactor, "450 Can't STOU while REST request is pending.");
        return;
    }

    let (basedir, prefix) = {
        let fs = match session.fs.as_ref() {
            Some(fs) => fs,
            None => return session.respond(reactor, "503 Login with USER and PASS first."),
        };
        if arg.is_empty() {
            (fs.ftp2fs(fs.cwd()), String::from("ftpd"))
        } else {
            let target = fs.ftp2fs(arg);
            let name = target
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| String::from("ftpd"));
            let parent = target
                .parent()
                .map(|p| p.to_path_buf())
                .unwrap_or_else(|| fs.ftp2fs(fs.cwd()));
            (parent, name)
        }
    };

    // jail check: STOU skips the generic path validation since the final
    // name is chosen here
    let valid = session
        .fs
        .as_ref()
        .map(|fs| fs.validpath(&basedir))
        .unwrap_or(false);
    if !valid {
        session.respond(
            reactor,
            "550 Can't STOU: path escapes the user's root directory.",
        );
        return;
    }

    let mut chosen: Option<(std::fs::File, PathBuf)> = None;
    let guard = session.impersonation_guard();
    {
        let fs = match session.fs.as_ref() {
            Some(fs) => fs,
            None => return session.respond(reactor, "503 Login with USER and PASS first."),
        };
        for n in 0..STOU_MAX_ATTEMPTS {
            let candidate = basedir.join(format!("{}.{}", prefix, n));
            match fs.create_new(&candidate) {
                Ok(file) => {
                    chosen = Some((file, candidate));
                    break;
                }
                Err(ref err) if err.kind() == std::io::ErrorKind::AlreadyExists => continue,
                Err(err) => {
                    drop(guard);
                    let why = strerror(&err);
                    session.log_fs_cmd("STOU", &candidate, 450, &why);
                    session.respond(reactor, &format!("450 {}.", why));
                    return;
                }
            }
        }
    }
    drop(guard);

    let (file, path) = match chosen {
        Some(pair) => pair,
        None => {
            let why = "No usable unique file name found";
            session.log(&format!("FAIL STOU {:?} {}", basedir, why));
            session.respond(reactor, &format!("450 {}.", why));
            return;
        }
    };

    // the generic permission check was skipped; enforce 'w' on the
    // chosen name now
    if !session
        .server
        .authorizer
        .has_perm(&session.username, 'w', Some(&path))
    {
        let _ = session.fs.as_ref().map(|fs| fs.remove(&path));
        session.log_fs_cmd("STOU", &path, 550, "not enough privileges");
        session.respond(reactor, "550 Can't STOU: not enough privileges.");
        return;
    }

    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    session.log_fs_cmd("STOU", &path, 150, "Transfer starting");
    session.push_dtp_receive(
        reactor,
        file,
        path,
        &format!("125 FILE: {}", filename),
        &format!("150 FILE: {}", filename),
    );
}
