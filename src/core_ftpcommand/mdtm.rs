use std::path::PathBuf;
use std::time::SystemTime;

use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};
use filetime::FileTime;

use crate::core_reactor::Reactor;
use crate::core_vfs::strerror;
use crate::session::FtpSession;

/// Handles the MDTM FTP command (RFC-3659): report a file's last
/// modification time as YYYYMMDDHHMMSS, in GMT by default.
///
/// The legacy two-argument setter form (`MDTM <timeval> <path>`) is
/// disabled unless `allow_mdtm_set` is configured; SITE MFMT is the
/// supported way to touch timestamps.
pub fn handle_mdtm_command(
    session: &mut FtpSession,
    reactor: &mut Reactor,
    arg: &str,
    path: Option<PathBuf>,
) {
    // detect the legacy setter: a 14-digit timeval followed by a path
    if let Some((timeval, rest)) = arg.split_once(' ') {
        if timeval.len() == 14 && timeval.bytes().all(|b| b.is_ascii_digit()) {
            if !session.server.config.allow_mdtm_set {
                session.respond(reactor, "550 MDTM with timestamp not supported.");
                return;
            }
            let target = match session.fs.as_ref() {
                Some(fs) => fs.ftp2fs(rest),
                None => return session.respond(reactor, "503 Login with USER and PASS first."),
            };
            set_mtime(session, reactor, "MDTM", timeval, &target);
            return;
        }
    }

    let path = match path {
        Some(path) => path,
        None => return session.respond(reactor, "550 Invalid path."),
    };
    let (is_file, line) = match session.fs.as_ref() {
        Some(fs) => (fs.isfile(&fs.realpath(&path)), fs.fs2ftp(&path)),
        None => return session.respond(reactor, "503 Login with USER and PASS first."),
    };
    if !is_file {
        session.log_fs_cmd("MDTM", &path, 550, "Not a file");
        session.respond(reactor, &format!("550 {} is not retrievable.", line));
        return;
    }

    let guard = session.impersonation_guard();
    let result = session.fs.as_ref().map(|fs| fs.getmtime(&path));
    drop(guard);

    match result {
        Some(Ok(mtime)) => {
            let stamp = format_timeval(mtime, session.server.config.use_gmt_times);
            session.log_fs_cmd("MDTM", &path, 213, "Modification time retrieved");
            session.respond(reactor, &format!("213 {}", stamp));
        }
        Some(Err(err)) => {
            let why = strerror(&err);
            session.log_fs_cmd("MDTM", &path, 550, &why);
            session.respond(reactor, &format!("550 {}.", why));
        }
        None => session.respond(reactor, "503 Login with USER and PASS first."),
    }
}

pub(crate) fn format_timeval(mtime: SystemTime, use_gmt: bool) -> String {
    if use_gmt {
        DateTime::<Utc>::from(mtime).format("%Y%m%d%H%M%S").to_string()
    } else {
        DateTime::<Local>::from(mtime).format("%Y%m%d%H%M%S").to_string()
    }
}

/// Parse a YYYYMMDDHHMMSS timeval in the configured timezone.
pub(crate) fn parse_timeval(timeval: &str, use_gmt: bool) -> Option<SystemTime> {
    let naive = NaiveDateTime::parse_from_str(timeval, "%Y%m%d%H%M%S").ok()?;
    let timestamp = if use_gmt {
        Utc.from_utc_datetime(&naive).timestamp()
    } else {
        Local
            .from_local_datetime(&naive)
            .single()?
            .timestamp()
    };
    Some(SystemTime::UNIX_EPOCH + std::time::Duration::from_secs(timestamp.max(0) as u64))
}

pub(crate) fn set_mtime(
    session: &mut FtpSession,
    reactor: &mut Reactor,
    cmd: &str,
    timeval: &str,
    path: &std::path::Path,
) {
    let mtime = match parse_timeval(timeval, session.server.config.use_gmt_times) {
        Some(mtime) => mtime,
        None => {
            session.respond(reactor, "501 Invalid time format (expected YYYYMMDDHHMMSS).");
            return;
        }
    };

    let guard = session.impersonation_guard();
    let result = filetime::set_file_mtime(path, FileTime::from_system_time(mtime));
    drop(guard);

    match result {
        Ok(()) => {
            session.log_fs_cmd(cmd, path, 213, "Modification time set");
            session.respond(
                reactor,
                &format!(
                    "213 Modify={}; {}",
                    timeval,
                    session
                        .fs
                        .as_ref()
                        .map(|fs| fs.fs2ftp(path))
                        .unwrap_or_default()
                ),
            );
        }
        Err(err) => {
            let why = strerror(&err);
            session.log_fs_cmd(cmd, path, 550, &why);
            session.respond(reactor, &format!("550 {}.", why));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeval_round_trip_in_gmt() {
        let t = parse_timeval("20240229120000", true).unwrap();
        assert_eq!(format_timeval(t, true), "20240229120000");
    }

    #[test]
    fn malformed_timevals_are_rejected() {
        assert!(parse_timeval("2024", true).is_none());
        assert!(parse_timeval("20241301000000", true).is_none());
        assert!(parse_timeval("not-a-time1234", true).is_none());
    }
}
