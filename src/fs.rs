use std::{
    fmt::Display,
    io::{self, Read},
    os::fd::AsRawFd,
    path::{Path, PathBuf},
};

use crate::error::SendError;

/// An open regular file. The descriptor is closed when this is dropped.
#[derive(Debug)]
pub struct File {
    file: std::fs::File,
    path: PathBuf,
    pub size: u64,
}

impl File {
    /// Opens `path` for reading if it names a regular file.
    ///
    /// Anything that does not resolve to a regular file is `NotFound`: nothing
    /// there, a directory, a dangling or looping symlink, a path that runs
    /// through a regular file, a name that is too long. Other metadata or
    /// open failures, such as missing permissions, are `Io`.
    pub fn open(path: &Path) -> Result<Self, SendError> {
        let not_found = || SendError::NotFound {
            path: path.to_path_buf(),
        };

        let metadata = match std::fs::metadata(path) {
            Ok(metadata) => metadata,
            Err(err) if does_not_resolve(&err) => return Err(not_found()),
            Err(err) => return Err(SendError::io(0, err)),
        };
        if !metadata.is_file() {
            return Err(not_found());
        }

        // The file can vanish between the stat and the open.
        let file = match std::fs::File::open(path) {
            Ok(file) => file,
            Err(err) if does_not_resolve(&err) => return Err(not_found()),
            Err(err) => return Err(SendError::io(0, err)),
        };
        let file = File {
            file,
            path: path.to_path_buf(),
            size: metadata.len(),
        };
        tracing::debug!(file = %file, path = %path.display(), size = file.size, "Opened file");
        Ok(file)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Lookup failures that mean "no file at this path" rather than "the file
/// could not be read".
fn does_not_resolve(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::NotFound
        || matches!(
            err.raw_os_error(),
            Some(libc::ENOTDIR | libc::ENAMETOOLONG | libc::ELOOP)
        )
}

impl Read for File {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.file.read(buf)
    }
}

impl Display for File {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.file.as_raw_fd().fmt(f)
    }
}

impl Drop for File {
    fn drop(&mut self) {
        tracing::debug!(file = %self, "Dropping file");
    }
}
