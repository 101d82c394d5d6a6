use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::Error;

/// An advisory lock on a collection root.
///
/// Taken at open so two processes never append to the same segment files.
/// The holder stamps its process ID into the lock file; when acquisition
/// fails, the error names the process the stamp points at. The OS releases
/// the lock when the collection drops its handle, and the file itself is
/// left in place to avoid unlink races.
pub struct FileLock {
    file: File,
    path: PathBuf,
}

impl FileLock {
    /// Creates the lock file and acquires an exclusive lock on it.
    pub fn lock<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        // No truncation here: a losing contender must still be able to
        // read the holder's stamp.
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(&path)?;

        if let Err(err) = Self::try_lock(&file) {
            return Err(match Self::read_stamp(&path) {
                Some(pid) => Error::IO(format!("{} is held by process {pid}", path.display())),
                None => err.into(),
            });
        }

        let lock = Self { file, path };
        lock.stamp()?;
        Ok(lock)
    }

    /// Overwrites the lock file with this process's ID.
    fn stamp(&self) -> Result<()> {
        self.file.set_len(0)?;
        let mut file = &self.file;
        file.write_all(format!("{}\n", std::process::id()).as_bytes())?;
        file.flush()?;
        Ok(())
    }

    /// Best-effort read of the ID stamped by the current holder.
    fn read_stamp(path: &Path) -> Option<u32> {
        fs::read_to_string(path).ok()?.trim().parse().ok()
    }

    #[cfg(unix)]
    fn try_lock(file: &File) -> io::Result<()> {
        use std::os::unix::io::AsRawFd;

        match unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) } {
            0 => Ok(()),
            _ => Err(io::Error::last_os_error()),
        }
    }

    #[cfg(windows)]
    fn try_lock(file: &File) -> io::Result<()> {
        use std::os::windows::io::AsRawHandle;
        use winapi::um::fileapi::LockFileEx;
        use winapi::um::minwinbase::{LOCKFILE_EXCLUSIVE_LOCK, LOCKFILE_FAIL_IMMEDIATELY};

        let locked = unsafe {
            LockFileEx(
                file.as_raw_handle() as *mut _,
                LOCKFILE_EXCLUSIVE_LOCK | LOCKFILE_FAIL_IMMEDIATELY,
                0,
                !0,
                !0,
                std::ptr::null_mut(),
            )
        };
        if locked == 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    #[cfg(not(any(unix, windows)))]
    fn try_lock(_file: &File) -> io::Result<()> {
        // No lock support on this platform; open succeeds unguarded.
        Ok(())
    }

    /// Path of the lock file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}
