//! Candidate module discovery

use std::io;
use std::path::{Path, PathBuf};

/// Lists module files to preload
pub trait CandidateSource {
    /// Candidate paths, in preload order
    fn candidates(&self) -> io::Result<Vec<PathBuf>>;
}

/// Files with a given extension directly inside one directory
#[derive(Debug, Clone)]
pub struct DirectoryScan {
    dir: PathBuf,
    extension: String,
}

impl DirectoryScan {
    /// Scan `dir` for `*.{extension}` files
    pub fn new(dir: impl Into<PathBuf>, extension: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            extension: extension.into(),
        }
    }

    /// Scanned directory
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl CandidateSource for DirectoryScan {
    /// Non-recursive; sorted by file name so preload order is stable
    fn candidates(&self) -> io::Result<Vec<PathBuf>> {
        let mut found = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let entry = match entry {
                Ok(e) => e,
                Err(err) => {
                    log::warn!("Failed to read directory entry: {}", err);
                    continue;
                }
            };

            let path = entry.path();
            if !path.is_file() {
                continue;
            }

            let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
            if ext == self.extension {
                found.push(path);
            }
        }
        found.sort();
        Ok(found)
    }
}

/// A fixed list of candidates
impl CandidateSource for Vec<PathBuf> {
    fn candidates(&self) -> io::Result<Vec<PathBuf>> {
        Ok(self.clone())
    }
}
