//! Core error type.

use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// A file could not be read.
    #[error("Failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

/// Read a whole file, keeping the path in the error.
pub fn read_file(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).map_err(|source| Error::Io {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_reports_path() {
        let err = read_file(Path::new("/nonexistent/crimson/file.bin")).unwrap_err();
        assert!(matches!(&err, Error::Io { path, .. } if path.ends_with("file.bin")));
        assert!(err.to_string().contains("/nonexistent/crimson/file.bin"));
    }
}
