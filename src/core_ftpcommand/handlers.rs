use std::collections::HashMap;

/// Whether a command requires, forbids or merely accepts an argument.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ArgPolicy {
    Required,
    Forbidden,
    Optional,
}

/// Static per-command properties driving the pre-dispatch checks.
#[derive(Clone, Debug)]
pub struct CommandSpec {
    /// Permission letter required on the target path, if any.
    pub perm: Option<char>,
    /// Commands with `auth_needed` reply 530 before login.
    pub auth_needed: bool,
    pub arg: ArgPolicy,
    /// Whether the argument names a filesystem path that must be
    /// resolved and jailed before dispatch.
    pub check_path: bool,
    pub help: &'static str,
}

macro_rules! cmd {
    ($table:ident, $name:expr, $perm:expr, $auth:expr, $arg:expr, $path:expr, $help:expr) => {
        $table.insert(
            $name.to_string(),
            CommandSpec {
                perm: $perm,
                auth_needed: $auth,
                arg: $arg,
                check_path: $path,
                help: $help,
            },
        );
    };
}

/// The authoritative command table. Computed once per server; embedders
/// may add or remove entries before `serve`.
pub fn default_command_table() -> HashMap<String, CommandSpec> {
    use ArgPolicy::{Forbidden, Optional, Required};
    let mut t = HashMap::new();

    cmd!(t, "ABOR", None, true, Forbidden, false, "Syntax: ABOR (abort transfer).");
    cmd!(t, "ALLO", None, true, Required, false, "Syntax: ALLO <SP> bytes (noop; allocate storage).");
    cmd!(t, "APPE", Some('a'), true, Required, true, "Syntax: APPE <SP> file-name (append data to file).");
    cmd!(t, "AUTH", None, false, Required, false, "Syntax: AUTH <SP> TLS|SSL (set up secure control channel).");
    cmd!(t, "CCC", None, false, Forbidden, false, "Syntax: CCC (revert control channel to cleartext).");
    cmd!(t, "CDUP", Some('e'), true, Forbidden, true, "Syntax: CDUP (go to parent directory).");
    cmd!(t, "CWD", Some('e'), true, Optional, true, "Syntax: CWD [<SP> dir-name] (change working directory).");
    cmd!(t, "DELE", Some('d'), true, Required, true, "Syntax: DELE <SP> file-name (delete file).");
    cmd!(t, "EPRT", None, true, Required, false, "Syntax: EPRT <SP> |proto|ip|port| (extended active mode).");
    cmd!(t, "EPSV", None, true, Optional, false, "Syntax: EPSV [<SP> proto|ALL] (extended passive mode).");
    cmd!(t, "FEAT", None, false, Forbidden, false, "Syntax: FEAT (list all new features supported).");
    cmd!(t, "HELP", None, false, Optional, false, "Syntax: HELP [<SP> cmd] (show help).");
    cmd!(t, "LIST", Some('l'), true, Optional, true, "Syntax: LIST [<SP> path-name] (list files).");
    cmd!(t, "MDTM", Some('l'), true, Required, true, "Syntax: MDTM <SP> file-name (get last modification time).");
    cmd!(t, "MLSD", Some('l'), true, Optional, true, "Syntax: MLSD [<SP> dir-name] (machine-processable listing).");
    cmd!(t, "MLST", Some('l'), true, Optional, true, "Syntax: MLST [<SP> path-name] (machine-processable path facts).");
    cmd!(t, "MKD", Some('m'), true, Required, true, "Syntax: MKD <SP> dir-name (create directory).");
    cmd!(t, "MODE", None, true, Required, false, "Syntax: MODE <SP> mode (noop; set data transfer mode).");
    cmd!(t, "NLST", Some('l'), true, Optional, true, "Syntax: NLST [<SP> path-name] (list files in a compact form).");
    cmd!(t, "NOOP", None, false, Forbidden, false, "Syntax: NOOP (just do nothing).");
    cmd!(t, "OPTS", None, true, Required, false, "Syntax: OPTS <SP> cmd [<SP> option] (set options for commands).");
    cmd!(t, "PASS", None, false, Optional, false, "Syntax: PASS [<SP> password] (set user password).");
    cmd!(t, "PASV", None, true, Forbidden, false, "Syntax: PASV (set server in passive mode).");
    cmd!(t, "PBSZ", None, false, Required, false, "Syntax: PBSZ <SP> 0 (negotiate TLS protection buffer size).");
    cmd!(t, "PORT", None, true, Required, false, "Syntax: PORT <SP> h,h,h,h,p,p (set server in active mode).");
    cmd!(t, "PROT", None, false, Required, false, "Syntax: PROT <SP> C|P (set data channel protection level).");
    cmd!(t, "PWD", None, true, Forbidden, false, "Syntax: PWD (get current working directory).");
    cmd!(t, "QUIT", None, false, Forbidden, false, "Syntax: QUIT (quit current session).");
    cmd!(t, "REIN", None, true, Forbidden, false, "Syntax: REIN (reinitialize / flush account).");
    cmd!(t, "REST", None, true, Required, false, "Syntax: REST <SP> marker (restart file position).");
    cmd!(t, "RETR", Some('r'), true, Required, true, "Syntax: RETR <SP> file-name (retrieve a file).");
    cmd!(t, "RMD", Some('d'), true, Required, true, "Syntax: RMD <SP> dir-name (remove directory).");
    cmd!(t, "RNFR", Some('f'), true, Required, true, "Syntax: RNFR <SP> file-name (rename source).");
    cmd!(t, "RNTO", None, true, Required, true, "Syntax: RNTO <SP> file-name (rename destination).");
    cmd!(t, "SITE", None, false, Required, false, "Syntax: SITE <SP> site-command (execute SITE command).");
    cmd!(t, "SITE CHMOD", Some('M'), true, Required, true, "Syntax: SITE CHMOD <SP> mode path (change file mode).");
    cmd!(t, "SITE MFMT", Some('T'), true, Required, true, "Syntax: SITE MFMT <SP> timeval path (set file modification time).");
    cmd!(t, "SITE HELP", None, false, Optional, false, "Syntax: SITE HELP [<SP> site-command] (show SITE command help).");
    cmd!(t, "SIZE", Some('l'), true, Required, true, "Syntax: SIZE <SP> file-name (get file size).");
    cmd!(t, "STAT", Some('l'), false, Optional, true, "Syntax: STAT [<SP> path name] (status information or list).");
    cmd!(t, "STOR", Some('w'), true, Required, true, "Syntax: STOR <SP> file-name (store a file).");
    cmd!(t, "STOU", Some('w'), true, Optional, true, "Syntax: STOU [<SP> file-name] (store a file with a unique name).");
    cmd!(t, "STRU", None, true, Required, false, "Syntax: STRU <SP> type (noop; set file structure).");
    cmd!(t, "SYST", None, false, Forbidden, false, "Syntax: SYST (get operating system type).");
    cmd!(t, "TYPE", None, true, Required, false, "Syntax: TYPE <SP> A|I (set transfer type).");
    cmd!(t, "USER", None, false, Required, false, "Syntax: USER <SP> user-name (set username).");
    cmd!(t, "XCUP", Some('e'), true, Forbidden, true, "Syntax: XCUP (obsolete; go to parent directory).");
    cmd!(t, "XCWD", Some('e'), true, Optional, true, "Syntax: XCWD [<SP> dir-name] (obsolete; change directory).");
    cmd!(t, "XMKD", Some('m'), true, Required, true, "Syntax: XMKD <SP> dir-name (obsolete; create directory).");
    cmd!(t, "XPWD", None, true, Forbidden, false, "Syntax: XPWD (obsolete; get current dir).");
    cmd!(t, "XRMD", Some('d'), true, Required, true, "Syntax: XRMD <SP> dir-name (obsolete; remove directory).");

    t
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_covers_the_full_command_set() {
        let table = default_command_table();
        for cmd in [
            "USER", "PASS", "REIN", "QUIT", "NOOP", "HELP", "SYST", "FEAT", "OPTS", "STAT",
            "TYPE", "STRU", "MODE", "PORT", "EPRT", "PASV", "EPSV", "LIST", "NLST", "MLSD",
            "MLST", "SIZE", "MDTM", "CWD", "CDUP", "PWD", "XPWD", "XCWD", "XMKD", "XRMD",
            "MKD", "RMD", "DELE", "RNFR", "RNTO", "RETR", "STOR", "STOU", "APPE", "ABOR",
            "REST", "ALLO", "SITE HELP", "SITE CHMOD", "SITE MFMT", "AUTH", "PBSZ", "PROT",
            "CCC",
        ] {
            assert!(table.contains_key(cmd), "missing {cmd}");
        }
    }

    #[test]
    fn permission_letters_match_the_authorizer_alphabet() {
        let table = default_command_table();
        for (cmd, spec) in table.iter() {
            if let Some(perm) = spec.perm {
                assert!(
                    "elradfmwMT".contains(perm),
                    "{cmd} uses unknown permission {perm}"
                );
            }
        }
    }

    #[test]
    fn pre_login_commands_do_not_require_auth() {
        let table = default_command_table();
        for cmd in ["USER", "PASS", "QUIT", "NOOP", "HELP", "SYST", "FEAT", "AUTH", "PBSZ", "PROT"] {
            assert!(!table[cmd].auth_needed, "{cmd} must work before login");
        }
        for cmd in ["LIST", "RETR", "STOR", "PASV", "PORT", "CWD", "MKD"] {
            assert!(table[cmd].auth_needed, "{cmd} must require login");
        }
    }
}
