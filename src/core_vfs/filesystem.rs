use std::ffi::CStr;
use std::fs::{self, File, Metadata, OpenOptions};
use std::io;
use std::path::{Component, Path, PathBuf};

/// File open disposition requested by a transfer command.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum OpenMode {
    Read,
    Write,
    Append,
    /// Read/write without truncation, used to honor a REST offset.
    ReadWrite,
}

/// Maps virtual FTP paths onto real paths under a per-user root and
/// wraps the filesystem calls the command handlers need.
///
/// Virtual paths always use `/`, are absolute, and can never escape the
/// root: `ftp2fs` composes against the root and `validpath` asserts the
/// resolved real path still lives under it, symlinks included.
pub struct VirtualFs {
    root: PathBuf,
    cwd: String,
}

impl VirtualFs {
    pub fn new(root: PathBuf) -> Self {
        Self {
            root,
            cwd: String::from("/"),
        }
    }

    /// The user's real home directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The current working directory as a virtual path.
    pub fn cwd(&self) -> &str {
        &self.cwd
    }

    // --- pathname conversion

    /// Normalize a raw client pathname into a canonical absolute virtual
    /// path, resolving `.` and `..` against the session cwd without ever
    /// escaping `/`.
    pub fn ftpnorm(&self, ftppath: &str) -> String {
        let joined = if ftppath.starts_with('/') {
            ftppath.to_string()
        } else {
            format!("{}/{}", self.cwd, ftppath)
        };

        let mut parts: Vec<&str> = Vec::new();
        for piece in joined.split('/') {
            match piece {
                "" | "." => {}
                ".." => {
                    parts.pop();
                }
                other => parts.push(other),
            }
        }
        if parts.is_empty() {
            String::from("/")
        } else {
            format!("/{}", parts.join("/"))
        }
    }

    /// Translate a virtual pathname into the real filesystem path.
    pub fn ftp2fs(&self, ftppath: &str) -> PathBuf {
        let virtual_path = self.ftpnorm(ftppath);
        let relative = virtual_path.trim_start_matches('/');
        if relative.is_empty() {
            self.root.clone()
        } else {
            self.root.join(relative)
        }
    }

    /// Translate a real path back into a virtual one. Paths escaping the
    /// root collapse to `/`.
    pub fn fs2ftp(&self, fspath: &Path) -> String {
        if !self.validpath(fspath) {
            return String::from("/");
        }
        let real = realpath(fspath);
        let root = realpath(&self.root);
        match real.strip_prefix(&root) {
            Ok(rest) if rest.as_os_str().is_empty() => String::from("/"),
            Ok(rest) => format!("/{}", rest.to_string_lossy().replace('\\', "/")),
            Err(_) => String::from("/"),
        }
    }

    /// True iff the resolved real path still lives under the user root.
    /// Symlink targets outside the root make this fail.
    pub fn validpath(&self, path: &Path) -> bool {
        let root = realpath(&self.root);
        let path = realpath(path);
        path == root || path.starts_with(&root)
    }

    // --- operations

    pub fn chdir(&mut self, path: &Path) -> io::Result<()> {
        let meta = fs::metadata(path)?;
        if !meta.is_dir() {
            return Err(io::Error::new(io::ErrorKind::Other, "Not a directory"));
        }
        // probe for search permission the way a real chdir would
        fs::read_dir(path)?;
        self.cwd = self.fs2ftp(path);
        Ok(())
    }

    pub fn open(&self, path: &Path, mode: OpenMode) -> io::Result<File> {
        match mode {
            OpenMode::Read => OpenOptions::new().read(true).open(path),
            OpenMode::Write => OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(path),
            OpenMode::Append => OpenOptions::new().append(true).create(true).open(path),
            OpenMode::ReadWrite => OpenOptions::new().read(true).write(true).open(path),
        }
    }

    /// Create a brand-new file, failing with `AlreadyExists` if the name
    /// is taken (STOU candidates).
    pub fn create_new(&self, path: &Path) -> io::Result<File> {
        OpenOptions::new().write(true).create_new(true).open(path)
    }

    pub fn mkdir(&self, path: &Path) -> io::Result<()> {
        fs::create_dir(path)
    }

    pub fn rmdir(&self, path: &Path) -> io::Result<()> {
        fs::remove_dir(path)
    }

    pub fn remove(&self, path: &Path) -> io::Result<()> {
        fs::remove_file(path)
    }

    pub fn rename(&self, src: &Path, dst: &Path) -> io::Result<()> {
        fs::rename(src, dst)
    }

    pub fn chmod(&self, path: &Path, mode: u32) -> io::Result<()> {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(mode))
    }

    pub fn stat(&self, path: &Path) -> io::Result<Metadata> {
        fs::metadata(path)
    }

    pub fn lstat(&self, path: &Path) -> io::Result<Metadata> {
        fs::symlink_metadata(path)
    }

    pub fn readlink(&self, path: &Path) -> io::Result<PathBuf> {
        fs::read_link(path)
    }

    /// Sorted names of the entries in a directory.
    pub fn listdir(&self, path: &Path) -> io::Result<Vec<String>> {
        let mut names: Vec<String> = fs::read_dir(path)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        Ok(names)
    }

    pub fn getsize(&self, path: &Path) -> io::Result<u64> {
        Ok(fs::metadata(path)?.len())
    }

    pub fn getmtime(&self, path: &Path) -> io::Result<std::time::SystemTime> {
        fs::metadata(path)?.modified()
    }

    pub fn isfile(&self, path: &Path) -> bool {
        fs::metadata(path).map(|m| m.is_file()).unwrap_or(false)
    }

    pub fn isdir(&self, path: &Path) -> bool {
        fs::metadata(path).map(|m| m.is_dir()).unwrap_or(false)
    }

    pub fn islink(&self, path: &Path) -> bool {
        fs::symlink_metadata(path)
            .map(|m| m.file_type().is_symlink())
            .unwrap_or(false)
    }

    /// True for anything with a directory entry, broken symlinks included.
    pub fn lexists(&self, path: &Path) -> bool {
        fs::symlink_metadata(path).is_ok()
    }

    pub fn realpath(&self, path: &Path) -> PathBuf {
        realpath(path)
    }
}

/// Canonicalize a path, resolving symlinks in as much of it as exists
/// and appending the non-existing remainder lexically. Mirrors what
/// `realpath(3)`-style resolution does for paths about to be created.
pub fn realpath(path: &Path) -> PathBuf {
    let mut current = path.to_path_buf();
    let mut tail: Vec<std::ffi::OsString> = Vec::new();
    loop {
        match current.canonicalize() {
            Ok(resolved) => {
                let mut result = resolved;
                for piece in tail.iter().rev() {
                    result.push(piece);
                }
                return result;
            }
            Err(_) => match current.file_name() {
                Some(name) => {
                    tail.push(name.to_os_string());
                    current.pop();
                }
                None => {
                    // nothing in the path exists; normalize lexically
                    let mut result = PathBuf::new();
                    for comp in path.components() {
                        match comp {
                            Component::CurDir => {}
                            Component::ParentDir => {
                                result.pop();
                            }
                            other => result.push(other.as_os_str()),
                        }
                    }
                    return result;
                }
            },
        }
    }
}

/// Human-readable message for an OS error, in the shape clients expect
/// inside a 550 reply ("No such file or directory").
pub fn strerror(err: &io::Error) -> String {
    if let Some(code) = err.raw_os_error() {
        unsafe {
            let msg = libc::strerror(code);
            if !msg.is_null() {
                return CStr::from_ptr(msg).to_string_lossy().into_owned();
            }
        }
    }
    err.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture() -> (tempfile::TempDir, VirtualFs) {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("sub/file.txt"), b"data").unwrap();
        let root = dir.path().canonicalize().unwrap();
        (dir, VirtualFs::new(root))
    }

    #[test]
    fn ftpnorm_resolves_against_cwd() {
        let (_dir, mut fs) = fixture();
        assert_eq!(fs.ftpnorm("bar"), "/bar");
        fs.cwd = String::from("/foo");
        assert_eq!(fs.ftpnorm("bar"), "/foo/bar");
        assert_eq!(fs.ftpnorm("../bar"), "/bar");
        assert_eq!(fs.ftpnorm("//x//y"), "/x/y");
        assert_eq!(fs.ftpnorm("/./x/."), "/x");
    }

    #[test]
    fn ftpnorm_cannot_escape_the_virtual_root() {
        let (_dir, fs) = fixture();
        assert_eq!(fs.ftpnorm("../../.."), "/");
        assert_eq!(fs.ftpnorm("/../x"), "/x");
    }

    #[test]
    fn ftp2fs_joins_under_root() {
        let (_dir, fs) = fixture();
        assert_eq!(fs.ftp2fs("/"), fs.root().to_path_buf());
        assert_eq!(fs.ftp2fs("sub/file.txt"), fs.root().join("sub/file.txt"));
    }

    #[test]
    fn fs2ftp_round_trips() {
        let (_dir, fs) = fixture();
        let real = fs.ftp2fs("/sub/file.txt");
        assert_eq!(fs.fs2ftp(&real), "/sub/file.txt");
        assert_eq!(fs.fs2ftp(fs.root()), "/");
        assert_eq!(fs.fs2ftp(Path::new("/etc/passwd")), "/");
    }

    #[test]
    fn validpath_rejects_escapes() {
        let (_dir, fs) = fixture();
        assert!(fs.validpath(&fs.ftp2fs("/sub")));
        assert!(fs.validpath(&fs.ftp2fs("/does-not-exist-yet")));
        assert!(!fs.validpath(Path::new("/etc")));
        assert!(!fs.validpath(&fs.root().join("../outside")));
    }

    #[cfg(unix)]
    #[test]
    fn symlink_escaping_the_root_is_invalid() {
        let (dir, fs) = fixture();
        let link = dir.path().join("escape");
        std::os::unix::fs::symlink("/etc", &link).unwrap();
        assert!(!fs.validpath(&link));
        // the link itself is still visible to listings
        assert!(fs.lexists(&link));
    }

    #[test]
    fn chdir_updates_virtual_cwd() {
        let (_dir, mut fs) = fixture();
        let sub = fs.ftp2fs("/sub");
        fs.chdir(&sub).unwrap();
        assert_eq!(fs.cwd(), "/sub");
        assert!(fs.chdir(&fs.ftp2fs("/missing")).is_err());
    }

    #[test]
    fn listdir_is_sorted() {
        let (dir, fs) = fixture();
        fs::write(dir.path().join("alpha"), b"").unwrap();
        fs::write(dir.path().join("zeta"), b"").unwrap();
        let names = fs.listdir(fs.root()).unwrap();
        let mut sorted = names.clone();
        sorted.sort();
        assert_eq!(names, sorted);
    }
}
