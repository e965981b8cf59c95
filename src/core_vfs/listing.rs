use std::fs::Metadata;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Local, Utc};

/// Listings older than this show the year instead of HH:MM, matching
/// proftpd's `ls -l` output.
const SIX_MONTHS: Duration = Duration::from_secs(180 * 24 * 3600);

/// The MLSX facts this server can compute.
pub fn available_facts() -> Vec<String> {
    vec![
        "type".into(),
        "size".into(),
        "perm".into(),
        "modify".into(),
        "unique".into(),
        "unix.mode".into(),
        "unix.uid".into(),
        "unix.gid".into(),
    ]
}

/// Facts enabled by default for MLSD/MLST until OPTS MLST changes them.
pub fn default_facts() -> Vec<String> {
    vec![
        "type".into(),
        "size".into(),
        "perm".into(),
        "modify".into(),
        "unique".into(),
    ]
}

/// Symbolic mode string ("drwxr-xr-x") from a raw st_mode.
pub fn filemode(mode: u32) -> String {
    let kind = match mode & (libc::S_IFMT as u32) {
        m if m == libc::S_IFDIR as u32 => 'd',
        m if m == libc::S_IFLNK as u32 => 'l',
        m if m == libc::S_IFSOCK as u32 => 's',
        m if m == libc::S_IFIFO as u32 => 'p',
        m if m == libc::S_IFBLK as u32 => 'b',
        m if m == libc::S_IFCHR as u32 => 'c',
        _ => '-',
    };
    let mut out = String::with_capacity(10);
    out.push(kind);
    let triplets = [(mode >> 6) & 7, (mode >> 3) & 7, mode & 7];
    for bits in triplets {
        out.push(if bits & 4 != 0 { 'r' } else { '-' });
        out.push(if bits & 2 != 0 { 'w' } else { '-' });
        out.push(if bits & 1 != 0 { 'x' } else { '-' });
    }
    out
}

fn list_timestamp(mtime: SystemTime, use_gmt: bool) -> String {
    let age = SystemTime::now()
        .duration_since(mtime)
        .unwrap_or(Duration::ZERO);
    // month names stay English regardless of locale; chrono guarantees it
    let fmt = if age > SIX_MONTHS {
        "%b %d  %Y"
    } else {
        "%b %d %H:%M"
    };
    if use_gmt {
        DateTime::<Utc>::from(mtime).format(fmt).to_string()
    } else {
        DateTime::<Local>::from(mtime).format(fmt).to_string()
    }
}

fn mlsx_timestamp(mtime: SystemTime, use_gmt: bool) -> String {
    if use_gmt {
        DateTime::<Utc>::from(mtime).format("%Y%m%d%H%M%S").to_string()
    } else {
        DateTime::<Local>::from(mtime).format("%Y%m%d%H%M%S").to_string()
    }
}

/// Produce `/bin/ls -lA`-style lines for `names` inside `basedir`, as a
/// lazy iterator of byte chunks. Entries whose lstat fails are skipped.
///
/// Example line:
///
/// ```text
/// -rw-rw-rw-   1 1000     1000      7045120 Sep 02 03:47 music.mp3
/// ```
pub fn format_list(
    basedir: &Path,
    names: Vec<String>,
    use_gmt: bool,
) -> Box<dyn Iterator<Item = Vec<u8>>> {
    let basedir = basedir.to_path_buf();
    let entries: Vec<(PathBuf, String)> = names
        .into_iter()
        .map(|name| (basedir.join(&name), name))
        .collect();

    Box::new(entries.into_iter().filter_map(move |(path, mut name)| {
        let st = std::fs::symlink_metadata(&path).ok()?;
        let mtime = st.modified().unwrap_or(UNIX_EPOCH);
        if st.file_type().is_symlink() {
            if let Ok(target) = std::fs::read_link(&path) {
                name = format!("{} -> {}", name, target.to_string_lossy());
            }
        }
        let nlinks = match st.nlink() {
            0 => 1,
            n => n,
        };
        let line = format!(
            "{} {:>3} {:<8} {:<8} {:>8} {} {}\r\n",
            filemode(st.mode()),
            nlinks,
            st.uid(),
            st.gid(),
            st.len(),
            list_timestamp(mtime, use_gmt),
            name,
        );
        Some(line.into_bytes())
    }))
}

/// MLSD/MLST fact lines (RFC-3659 chapter 7) for `names` inside
/// `basedir`. Facts are filtered by the session's current fact set and
/// the `perm` fact is derived from the user's permission string plus the
/// entry type. `unique` mixes device and inode numbers so distinct files
/// never collide.
pub fn format_mlsx(
    basedir: &Path,
    names: Vec<String>,
    perms: &str,
    facts: &[String],
    use_gmt: bool,
) -> Box<dyn Iterator<Item = Vec<u8>>> {
    let basedir = basedir.to_path_buf();
    let perms = perms.to_string();
    let facts: Vec<String> = facts.to_vec();

    Box::new(names.into_iter().filter_map(move |name| {
        let path = basedir.join(&name);
        // follow symlinks so the unique fact reflects the target
        let st = std::fs::metadata(&path).ok()?;
        Some(mlsx_line(&name, &st, &perms, &facts, use_gmt).into_bytes())
    }))
}

/// A single MLSX entry; errors propagate so MLST can reply 550.
pub fn format_mlsx_entry(
    path: &Path,
    name: &str,
    perms: &str,
    facts: &[String],
    use_gmt: bool,
) -> std::io::Result<String> {
    let st = std::fs::metadata(path)?;
    Ok(mlsx_line(name, &st, perms, facts, use_gmt))
}

fn mlsx_line(name: &str, st: &Metadata, perms: &str, facts: &[String], use_gmt: bool) -> String {
    let has = |fact: &str| facts.iter().any(|f| f == fact);
    let mut line = String::new();

    let is_dir = st.is_dir();
    if has("type") {
        let kind = if is_dir {
            match name {
                "." => "cdir",
                ".." => "pdir",
                _ => "dir",
            }
        } else {
            "file"
        };
        line.push_str(&format!("type={};", kind));
    }
    if has("size") {
        line.push_str(&format!("size={};", st.len()));
    }
    if has("perm") {
        let perm = if is_dir {
            mlsx_dir_perm(perms)
        } else {
            mlsx_file_perm(perms)
        };
        line.push_str(&format!("perm={};", perm));
    }
    if has("modify") {
        if let Ok(mtime) = st.modified() {
            line.push_str(&format!("modify={};", mlsx_timestamp(mtime, use_gmt)));
        }
    }
    if has("unix.mode") {
        line.push_str(&format!("unix.mode={:o};", st.mode() & 0o777));
    }
    if has("unix.uid") {
        line.push_str(&format!("unix.uid={};", st.uid()));
    }
    if has("unix.gid") {
        line.push_str(&format!("unix.gid={};", st.gid()));
    }
    if has("unique") {
        line.push_str(&format!("unique={:x}{:x};", st.dev(), st.ino()));
    }

    line.push(' ');
    line.push_str(name);
    line.push_str("\r\n");
    line
}

// Directory perm letters: keep e/l/d/f/m from the user's permission
// string, add 'c' when files can be created inside and 'p' when entries
// can be purged.
fn mlsx_dir_perm(perms: &str) -> String {
    let mut out: String = perms.chars().filter(|c| "eldfm".contains(*c)).collect();
    if perms.contains('w') || perms.contains('a') || perms.contains('f') {
        out.push('c');
    }
    if perms.contains('d') {
        out.push('p');
    }
    out
}

// File perm letters: r(etrieve), a(ppend), d(elete), f(rename), w(rite).
fn mlsx_file_perm(perms: &str) -> String {
    perms.chars().filter(|c| "radfw".contains(*c)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn filemode_renders_type_and_triplets() {
        assert_eq!(filemode(libc::S_IFDIR | 0o755), "drwxr-xr-x");
        assert_eq!(filemode(libc::S_IFREG | 0o644), "-rw-r--r--");
        assert_eq!(filemode(libc::S_IFLNK | 0o777), "lrwxrwxrwx");
    }

    #[test]
    fn list_lines_have_ls_shape() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("music.mp3"), vec![0u8; 1234]).unwrap();
        let root = dir.path().canonicalize().unwrap();

        let lines: Vec<String> = format_list(&root, vec!["music.mp3".into()], true)
            .map(|chunk| String::from_utf8(chunk).unwrap())
            .collect();
        assert_eq!(lines.len(), 1);
        let line = &lines[0];
        assert!(line.ends_with("music.mp3\r\n"), "{line:?}");
        assert!(line.starts_with('-'));
        assert!(line.contains(" 1234 "));
    }

    #[test]
    fn old_files_show_the_year() {
        let mtime = SystemTime::now() - Duration::from_secs(200 * 24 * 3600);
        let stamp = list_timestamp(mtime, true);
        assert!(!stamp.contains(':'), "{stamp:?}");

        let recent = list_timestamp(SystemTime::now(), true);
        assert!(recent.contains(':'), "{recent:?}");
    }

    #[test]
    fn mlsx_line_contains_requested_facts_only() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("module.py"), b"print").unwrap();
        let facts = vec!["type".to_string(), "size".to_string(), "unique".to_string()];

        let lines: Vec<String> = format_mlsx(dir.path(), vec!["module.py".into()], "elr", &facts, true)
            .map(|chunk| String::from_utf8(chunk).unwrap())
            .collect();
        assert_eq!(lines.len(), 1);
        let line = &lines[0];
        assert!(line.starts_with("type=file;size=5;unique="), "{line:?}");
        assert!(!line.contains("modify="), "{line:?}");
        assert!(line.ends_with(" module.py\r\n"), "{line:?}");
    }

    #[test]
    fn mlsx_perm_letters_follow_the_permission_string() {
        assert_eq!(mlsx_file_perm("elradfmwMT"), "radfw");
        let dirperm = mlsx_dir_perm("elradfmwMT");
        assert!(dirperm.contains('e') && dirperm.contains('l'));
        assert!(dirperm.contains('c') && dirperm.contains('p'));

        assert_eq!(mlsx_file_perm("elr"), "r");
        let readonly = mlsx_dir_perm("elr");
        assert!(!readonly.contains('c') && !readonly.contains('p'));
    }

    #[test]
    fn unique_fact_differs_for_distinct_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a"), b"1").unwrap();
        fs::write(dir.path().join("b"), b"2").unwrap();
        let facts = vec!["unique".to_string()];
        let lines: Vec<String> =
            format_mlsx(dir.path(), vec!["a".into(), "b".into()], "elr", &facts, true)
                .map(|chunk| String::from_utf8(chunk).unwrap())
                .collect();
        assert_ne!(lines[0].split(' ').next(), lines[1].split(' ').next());
    }
}
