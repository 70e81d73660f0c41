// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Scoped images directory handle.

use std::fs::File;
use std::io;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};

/// An open handle on a checkpoint images directory.
///
/// Opened once per attempt and closed on drop, so repeated fallback
/// attempts never accumulate descriptors. The engine is pointed at the
/// handle through `/proc/<pid>/fd/<n>` rather than the path, so a directory
/// renamed mid-attempt cannot redirect it.
#[derive(Debug)]
pub struct ImagesDir {
    path: PathBuf,
    handle: File,
}

impl ImagesDir {
    /// Open an existing directory.
    pub fn open(path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();
        let handle = File::open(&path)?;

        if !handle.metadata()?.is_dir() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{} is not a directory", path.display()),
            ));
        }

        tracing::trace!(path = %path.display(), fd = handle.as_raw_fd(), "Opened images directory");

        Ok(Self { path, handle })
    }

    /// Real path of the directory.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path that resolves through the held descriptor.
    pub fn engine_path(&self) -> PathBuf {
        PathBuf::from(format!(
            "/proc/{}/fd/{}",
            std::process::id(),
            self.handle.as_raw_fd()
        ))
    }

    /// Names of the image files the engine left in the directory.
    pub fn image_files(&self) -> io::Result<Vec<String>> {
        let mut names: Vec<String> = std::fs::read_dir(&self.path)?
            .flatten()
            .filter_map(|entry| entry.file_name().into_string().ok())
            .filter(|name| name.ends_with(".img"))
            .collect();
        names.sort();
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_open_directory() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("pstree.img"), b"x").unwrap();
        std::fs::write(dir.path().join("dump.log"), b"x").unwrap();

        let images = ImagesDir::open(dir.path()).unwrap();
        assert_eq!(images.path(), dir.path());
        assert!(images
            .engine_path()
            .starts_with(format!("/proc/{}/fd", std::process::id())));
        assert_eq!(images.image_files().unwrap(), vec!["pstree.img".to_string()]);
    }

    #[test]
    fn test_open_rejects_files_and_missing() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("container.info");
        std::fs::write(&file, b"PID=1\n").unwrap();

        assert!(ImagesDir::open(&file).is_err());
        assert!(ImagesDir::open(dir.path().join("missing")).is_err());
    }
}
