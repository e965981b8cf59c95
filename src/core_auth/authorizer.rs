use std::collections::HashMap;
use std::path::{Path, PathBuf};

use log::warn;
use thiserror::Error;

use crate::core_auth::helper::verify_password;
use crate::core_vfs::filesystem::realpath;

/// Permission letters and the commands they gate:
///
/// - `e` change directory (CWD, CDUP)
/// - `l` list (LIST, NLST, STAT, MLSD, MLST, SIZE, MDTM)
/// - `r` retrieve (RETR)
/// - `a` append (APPE)
/// - `d` delete (DELE, RMD)
/// - `f` rename (RNFR, RNTO)
/// - `m` make directory (MKD)
/// - `w` store (STOR, STOU)
/// - `M` change mode (SITE CHMOD)
/// - `T` change modification time (SITE MFMT)
pub const READ_PERMS: &str = "elr";
pub const WRITE_PERMS: &str = "adfmwMT";

#[derive(Debug, Error)]
pub enum AuthorizerError {
    #[error("user {0:?} already exists")]
    DuplicateUser(String),

    #[error("no such user {0:?}")]
    NoSuchUser(String),

    #[error("no such permission {0:?}")]
    InvalidPermission(char),

    #[error("no such directory: {0:?}")]
    NoSuchDirectory(PathBuf),

    #[error("can't override home directory permissions")]
    HomeOverride,

    #[error("path escapes user home directory: {0:?}")]
    EscapesHome(PathBuf),
}

/// Returned by `validate_authentication` on failure; the message ends up
/// in the delayed 530 reply.
#[derive(Debug, Clone)]
pub struct AuthFailure {
    pub message: String,
}

impl AuthFailure {
    fn new(message: &str) -> Self {
        Self {
            message: message.to_string(),
        }
    }
}

/// Contract the control handler consumes for user lookup, password
/// validation and per-path permission checks.
///
/// `impersonate_user` / `terminate_impersonation` are no-ops for virtual
/// users; real-user authorizers switch the effective uid/gid around every
/// filesystem access and are therefore unusable from the threaded
/// concurrency model.
pub trait Authorizer: Send + Sync {
    fn validate_authentication(&self, username: &str, password: &str) -> Result<(), AuthFailure>;

    fn has_user(&self, username: &str) -> bool;

    /// Effective permission for `perm` on `path`, the most specific
    /// directory override winning over the base permission string.
    fn has_perm(&self, username: &str, perm: char, path: Option<&Path>) -> bool;

    fn get_perms(&self, username: &str) -> String;

    fn get_home_dir(&self, username: &str) -> Option<PathBuf>;

    fn get_msg_login(&self, username: &str) -> String;

    fn get_msg_quit(&self, username: &str) -> String;

    /// Whether sessions served from worker threads may use this
    /// authorizer. Implementations mutating process-global identity must
    /// return false.
    fn thread_safe(&self) -> bool {
        true
    }

    fn impersonate_user(&self, _username: &str, _password: &str) {}

    fn terminate_impersonation(&self, _username: &str) {}
}

#[derive(Clone)]
enum StoredPassword {
    Plain(String),
    Bcrypt(String),
    /// Anonymous logins accept anything (conventionally an email address).
    Any,
}

#[derive(Clone)]
struct UserEntry {
    password: StoredPassword,
    home: PathBuf,
    perm: String,
    operms: Vec<PermOverride>,
    msg_login: String,
    msg_quit: String,
}

#[derive(Clone)]
struct PermOverride {
    dir: PathBuf,
    perm: String,
    recursive: bool,
}

/// Platform-independent authorizer managing virtual users in memory.
///
/// Users must be added before `serve`; afterwards the table is
/// read-only, which is what makes it shareable across worker threads.
#[derive(Default)]
pub struct VirtualAuthorizer {
    users: HashMap<String, UserEntry>,
}

impl VirtualAuthorizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a user with a cleartext password.
    ///
    /// Rejects duplicates, unknown permission letters and missing home
    /// directories. Granting write permissions to the anonymous user is
    /// allowed but logged as a warning.
    pub fn add_user(
        &mut self,
        username: &str,
        password: &str,
        homedir: &Path,
        perm: &str,
    ) -> Result<(), AuthorizerError> {
        let password = if username == "anonymous" {
            StoredPassword::Any
        } else {
            StoredPassword::Plain(password.to_string())
        };
        self.insert_user(username, password, homedir, perm)
    }

    /// Add a user whose password is stored as a bcrypt hash.
    pub fn add_user_hashed(
        &mut self,
        username: &str,
        password_hash: &str,
        homedir: &Path,
        perm: &str,
    ) -> Result<(), AuthorizerError> {
        self.insert_user(
            username,
            StoredPassword::Bcrypt(password_hash.to_string()),
            homedir,
            perm,
        )
    }

    /// Add the `anonymous` user with an empty password.
    pub fn add_anonymous(&mut self, homedir: &Path, perm: &str) -> Result<(), AuthorizerError> {
        self.add_user("anonymous", "", homedir, perm)
    }

    pub fn remove_user(&mut self, username: &str) {
        self.users.remove(username);
    }

    pub fn set_msg_login(&mut self, username: &str, msg: &str) -> Result<(), AuthorizerError> {
        let entry = self
            .users
            .get_mut(username)
            .ok_or_else(|| AuthorizerError::NoSuchUser(username.to_string()))?;
        entry.msg_login = msg.to_string();
        Ok(())
    }

    pub fn set_msg_quit(&mut self, username: &str, msg: &str) -> Result<(), AuthorizerError> {
        let entry = self
            .users
            .get_mut(username)
            .ok_or_else(|| AuthorizerError::NoSuchUser(username.to_string()))?;
        entry.msg_quit = msg.to_string();
        Ok(())
    }

    /// Attach a per-subtree permission override, recursive or limited to
    /// the directory's direct entries.
    pub fn override_perm(
        &mut self,
        username: &str,
        directory: &Path,
        perm: &str,
        recursive: bool,
    ) -> Result<(), AuthorizerError> {
        check_permission_letters(username, perm)?;
        if !directory.is_dir() {
            return Err(AuthorizerError::NoSuchDirectory(directory.to_path_buf()));
        }
        let directory = realpath(directory);
        let entry = self
            .users
            .get_mut(username)
            .ok_or_else(|| AuthorizerError::NoSuchUser(username.to_string()))?;
        let home = realpath(&entry.home);
        if directory == home {
            return Err(AuthorizerError::HomeOverride);
        }
        if !directory.starts_with(&home) {
            return Err(AuthorizerError::EscapesHome(directory));
        }
        entry.operms.push(PermOverride {
            dir: directory,
            perm: perm.to_string(),
            recursive,
        });
        Ok(())
    }

    fn insert_user(
        &mut self,
        username: &str,
        password: StoredPassword,
        homedir: &Path,
        perm: &str,
    ) -> Result<(), AuthorizerError> {
        if self.users.contains_key(username) {
            return Err(AuthorizerError::DuplicateUser(username.to_string()));
        }
        if !homedir.is_dir() {
            return Err(AuthorizerError::NoSuchDirectory(homedir.to_path_buf()));
        }
        check_permission_letters(username, perm)?;
        self.users.insert(
            username.to_string(),
            UserEntry {
                password,
                home: realpath(homedir),
                perm: perm.to_string(),
                operms: Vec::new(),
                msg_login: String::from("Login successful."),
                msg_quit: String::from("Goodbye."),
            },
        );
        Ok(())
    }
}

impl Authorizer for VirtualAuthorizer {
    fn validate_authentication(&self, username: &str, password: &str) -> Result<(), AuthFailure> {
        let entry = match self.users.get(username) {
            Some(entry) => entry,
            None => {
                if username == "anonymous" {
                    return Err(AuthFailure::new("Anonymous access not allowed."));
                }
                return Err(AuthFailure::new("Authentication failed."));
            }
        };
        let ok = match &entry.password {
            StoredPassword::Any => true,
            StoredPassword::Plain(expected) => expected == password,
            StoredPassword::Bcrypt(hash) => verify_password(password, hash),
        };
        if ok {
            Ok(())
        } else {
            Err(AuthFailure::new("Authentication failed."))
        }
    }

    fn has_user(&self, username: &str) -> bool {
        self.users.contains_key(username)
    }

    fn has_perm(&self, username: &str, perm: char, path: Option<&Path>) -> bool {
        let entry = match self.users.get(username) {
            Some(entry) => entry,
            None => return false,
        };
        let path = match path {
            Some(path) => realpath(path),
            None => return entry.perm.contains(perm),
        };

        // the most specific matching override wins: longest directory
        // prefix first
        let mut best: Option<&PermOverride> = None;
        for op in &entry.operms {
            let applies = if op.recursive {
                path.starts_with(&op.dir)
            } else {
                path == op.dir
                    || (path.parent() == Some(op.dir.as_path()) && !path.is_dir())
            };
            if applies {
                match best {
                    Some(current) if current.dir.as_os_str().len() >= op.dir.as_os_str().len() => {}
                    _ => best = Some(op),
                }
            }
        }
        match best {
            Some(op) => op.perm.contains(perm),
            None => entry.perm.contains(perm),
        }
    }

    fn get_perms(&self, username: &str) -> String {
        self.users
            .get(username)
            .map(|entry| entry.perm.clone())
            .unwrap_or_default()
    }

    fn get_home_dir(&self, username: &str) -> Option<PathBuf> {
        self.users.get(username).map(|entry| entry.home.clone())
    }

    fn get_msg_login(&self, username: &str) -> String {
        self.users
            .get(username)
            .map(|entry| entry.msg_login.clone())
            .unwrap_or_else(|| String::from("Login successful."))
    }

    fn get_msg_quit(&self, username: &str) -> String {
        self.users
            .get(username)
            .map(|entry| entry.msg_quit.clone())
            .unwrap_or_else(|| String::from("Goodbye."))
    }
}

fn check_permission_letters(username: &str, perm: &str) -> Result<(), AuthorizerError> {
    let mut warned = false;
    for p in perm.chars() {
        if !READ_PERMS.contains(p) && !WRITE_PERMS.contains(p) {
            return Err(AuthorizerError::InvalidPermission(p));
        }
        if username == "anonymous" && WRITE_PERMS.contains(p) && !warned {
            warn!("write permissions assigned to anonymous user.");
            warned = true;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn authorizer() -> (tempfile::TempDir, VirtualAuthorizer) {
        let dir = tempfile::tempdir().unwrap();
        let mut auth = VirtualAuthorizer::new();
        auth.add_user("joe", "secret", dir.path(), "elradfmw").unwrap();
        (dir, auth)
    }

    #[test]
    fn duplicate_users_are_rejected() {
        let (dir, mut auth) = authorizer();
        let err = auth.add_user("joe", "x", dir.path(), "elr").unwrap_err();
        assert!(matches!(err, AuthorizerError::DuplicateUser(_)));
    }

    #[test]
    fn unknown_permission_letters_are_rejected() {
        let (dir, mut auth) = authorizer();
        let err = auth.add_user("ann", "x", dir.path(), "elrz").unwrap_err();
        assert!(matches!(err, AuthorizerError::InvalidPermission('z')));
    }

    #[test]
    fn missing_homedir_is_rejected() {
        let (_dir, mut auth) = authorizer();
        let err = auth
            .add_user("ann", "x", Path::new("/no/such/dir"), "elr")
            .unwrap_err();
        assert!(matches!(err, AuthorizerError::NoSuchDirectory(_)));
    }

    #[test]
    fn password_validation() {
        let (_dir, auth) = authorizer();
        assert!(auth.validate_authentication("joe", "secret").is_ok());
        assert!(auth.validate_authentication("joe", "wrong").is_err());
        assert!(auth.validate_authentication("nobody", "x").is_err());
    }

    #[test]
    fn anonymous_accepts_any_password() {
        let dir = tempfile::tempdir().unwrap();
        let mut auth = VirtualAuthorizer::new();
        auth.add_anonymous(dir.path(), "elr").unwrap();
        assert!(auth.validate_authentication("anonymous", "guest@example.com").is_ok());
        assert!(auth.validate_authentication("anonymous", "").is_ok());
    }

    #[test]
    fn bcrypt_users_verify_against_the_hash() {
        let dir = tempfile::tempdir().unwrap();
        let mut auth = VirtualAuthorizer::new();
        let hash = crate::core_auth::helper::hash_password("s3cret").unwrap();
        auth.add_user_hashed("vault", &hash, dir.path(), "elr").unwrap();
        assert!(auth.validate_authentication("vault", "s3cret").is_ok());
        assert!(auth.validate_authentication("vault", "nope").is_err());
    }

    #[test]
    fn base_permissions_apply_without_overrides() {
        let (dir, auth) = authorizer();
        assert!(auth.has_perm("joe", 'r', Some(&dir.path().join("f"))));
        assert!(!auth.has_perm("joe", 'M', Some(&dir.path().join("f"))));
        assert!(!auth.has_perm("ghost", 'r', None));
    }

    #[test]
    fn recursive_override_wins_in_subtree() {
        let (dir, mut auth) = authorizer();
        let sub = dir.path().join("upload");
        fs::create_dir(&sub).unwrap();
        auth.override_perm("joe", &sub, "elr", true).unwrap();

        // inside the override: write revoked
        assert!(!auth.has_perm("joe", 'w', Some(&sub.join("deep/file"))));
        // outside: base permission still grants it
        assert!(auth.has_perm("joe", 'w', Some(&dir.path().join("other"))));
    }

    #[test]
    fn most_specific_override_wins() {
        let (dir, mut auth) = authorizer();
        let outer = dir.path().join("a");
        let inner = outer.join("b");
        fs::create_dir_all(&inner).unwrap();
        auth.override_perm("joe", &outer, "elr", true).unwrap();
        auth.override_perm("joe", &inner, "elradfmw", true).unwrap();

        assert!(!auth.has_perm("joe", 'w', Some(&outer.join("x"))));
        assert!(auth.has_perm("joe", 'w', Some(&inner.join("x"))));
    }

    #[test]
    fn override_outside_home_is_rejected() {
        let (_dir, mut auth) = authorizer();
        let err = auth
            .override_perm("joe", Path::new("/"), "elr", true)
            .unwrap_err();
        assert!(matches!(err, AuthorizerError::EscapesHome(_)));
    }
}
