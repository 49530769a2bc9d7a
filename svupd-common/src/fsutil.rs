//! File helpers shared by the lock, hook and approval modules.
//!
//! Our own files use `flock(2)` style advisory locks through `fs2`. The trait
//! methods are called with fully qualified syntax because `std::fs::File` grew
//! inherent methods with the same names. The package manager locks with
//! `lockf(3)` instead, which only [`check_record_lock`] can see.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::os::fd::AsFd;
use std::os::unix::fs::MetadataExt;
use std::path::Path;

use fs2::FileExt;
use nix::fcntl::{FcntlArg, fcntl};
use nix::libc;

/// Result of reading a file that is allowed to be missing.
#[derive(Debug)]
pub enum ReadOutcome<T> {
    Found(T),
    Absent,
    IoFailure(io::Error),
}

impl<T> ReadOutcome<T> {
    /// Value if found, `None` otherwise (failures included).
    pub fn found(self) -> Option<T> {
        match self {
            Self::Found(value) => Some(value),
            Self::Absent | Self::IoFailure(_) => None,
        }
    }

    /// Convert into a `Result` where absence is `Ok(None)`.
    pub fn into_result(self) -> io::Result<Option<T>> {
        match self {
            Self::Found(value) => Ok(Some(value)),
            Self::Absent => Ok(None),
            Self::IoFailure(err) => Err(err),
        }
    }
}

/// Read a whole file as text; a missing file is [`ReadOutcome::Absent`].
pub fn read_text(path: &Path) -> ReadOutcome<String> {
    match fs::read(path) {
        Ok(bytes) => ReadOutcome::Found(String::from_utf8_lossy(&bytes).into_owned()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => ReadOutcome::Absent,
        Err(err) => ReadOutcome::IoFailure(err),
    }
}

/// Remove a file, treating "already gone" as success. Returns whether a file
/// was actually removed.
pub fn remove_if_exists(path: &Path) -> io::Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(err),
    }
}

/// Whether `file` is still the file currently linked at `path`.
///
/// Used after locking to detect that the path was unlinked (and maybe
/// recreated) between our `open` and our `flock`.
pub fn is_current_file(file: &File, path: &Path) -> io::Result<bool> {
    let opened = file.metadata()?;
    match fs::metadata(path) {
        Ok(on_disk) => Ok(opened.dev() == on_disk.dev() && opened.ino() == on_disk.ino()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(err),
    }
}

/// Whether an error from a non-blocking lock attempt means "held elsewhere".
pub fn is_contended(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::WouldBlock
        || err.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}

/// Whether somebody holds any lock on `path` right now.
///
/// Takes and immediately drops a non-blocking exclusive lock. A missing file
/// is "not locked".
pub fn check_exclusive_lock(path: &Path) -> io::Result<bool> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(err) => return Err(err),
    };
    match FileExt::try_lock_exclusive(&file) {
        Ok(()) => Ok(false),
        Err(err) if is_contended(&err) => Ok(true),
        Err(err) => Err(err),
    }
}

/// Whether another process holds a POSIX record lock (`lockf`, `fcntl`) on
/// any part of `path`. A missing file is "not locked".
pub fn check_record_lock(path: &Path) -> io::Result<bool> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(err) => return Err(err),
    };
    let mut region = libc::flock {
        l_type: libc::F_WRLCK as _,
        l_whence: libc::SEEK_SET as _,
        l_start: 0,
        l_len: 0,
        l_pid: 0,
    };
    fcntl(file.as_fd(), FcntlArg::F_GETLK(&mut region)).map_err(io::Error::from)?;
    Ok(region.l_type as i32 != libc::F_UNLCK as i32)
}

/// Blocking exclusive lock on a sidecar lock file, created on demand.
///
/// The lock is released when the returned file is dropped.
pub fn lock_sidecar(path: &Path) -> io::Result<File> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)?;
    }
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)?;
    FileExt::lock_exclusive(&file)?;
    Ok(file)
}

/// Writes content to a file atomically using a temporary file in the same
/// directory.
pub fn atomic_write(path: &Path, content: &[u8]) -> io::Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("file");
    let temp_path = parent.join(format!(".{name}.{}.tmp", std::process::id()));

    let mut file = File::create(&temp_path)?;
    file.write_all(content)?;
    file.sync_all()?;
    drop(file);

    if let Err(err) = fs::rename(&temp_path, path) {
        let _ = fs::remove_file(&temp_path);
        return Err(err);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_read_text_absent() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            read_text(&dir.path().join("missing")),
            ReadOutcome::Absent
        ));
    }

    #[test]
    fn test_read_text_found() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("file");
        fs::write(&path, "hello\n").unwrap();
        assert_eq!(read_text(&path).found().as_deref(), Some("hello\n"));
    }

    #[test]
    fn test_read_text_directory_is_failure() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(read_text(dir.path()), ReadOutcome::IoFailure(_)));
    }

    #[test]
    fn test_is_current_file_detects_replacement() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("lock");
        fs::write(&path, "1").unwrap();
        let file = File::open(&path).unwrap();
        assert!(is_current_file(&file, &path).unwrap());

        fs::remove_file(&path).unwrap();
        assert!(!is_current_file(&file, &path).unwrap());

        fs::write(&path, "2").unwrap();
        assert!(!is_current_file(&file, &path).unwrap());
    }

    #[test]
    fn test_check_exclusive_lock() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("opkg.lock");
        assert!(!check_exclusive_lock(&path).unwrap());

        fs::write(&path, "").unwrap();
        assert!(!check_exclusive_lock(&path).unwrap());

        let holder = File::open(&path).unwrap();
        FileExt::lock_shared(&holder).unwrap();
        assert!(check_exclusive_lock(&path).unwrap());

        FileExt::unlock(&holder).unwrap();
        assert!(!check_exclusive_lock(&path).unwrap());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_check_record_lock() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("opkg.lock");
        assert!(!check_record_lock(&path).unwrap());

        fs::write(&path, "").unwrap();
        assert!(!check_record_lock(&path).unwrap());

        // flock and record locks do not see each other.
        let flocked = File::open(&path).unwrap();
        FileExt::lock_exclusive(&flocked).unwrap();
        assert!(!check_record_lock(&path).unwrap());
        FileExt::unlock(&flocked).unwrap();

        // Open file description locks conflict with record locks even within
        // one process, so this stands in for opkg holding the file.
        let holder = OpenOptions::new().read(true).write(true).open(&path).unwrap();
        let mut region = libc::flock {
            l_type: libc::F_WRLCK as _,
            l_whence: libc::SEEK_SET as _,
            l_start: 0,
            l_len: 0,
            l_pid: 0,
        };
        fcntl(holder.as_fd(), FcntlArg::F_OFD_SETLK(&region)).unwrap();
        assert!(check_record_lock(&path).unwrap());

        region.l_type = libc::F_UNLCK as _;
        fcntl(holder.as_fd(), FcntlArg::F_OFD_SETLK(&region)).unwrap();
        assert!(!check_record_lock(&path).unwrap());
    }

    #[test]
    fn test_atomic_write_replaces_content() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("stat");
        atomic_write(&path, b"one").unwrap();
        atomic_write(&path, b"two").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "two");
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_remove_if_exists() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("x");
        assert!(!remove_if_exists(&path).unwrap());
        fs::write(&path, "").unwrap();
        assert!(remove_if_exists(&path).unwrap());
    }
}
