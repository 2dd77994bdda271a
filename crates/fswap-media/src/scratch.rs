//! Scoped scratch storage for in-flight jobs.

use std::path::{Path, PathBuf};
use tempfile::TempDir;

use crate::error::MediaResult;

/// A per-job scratch directory.
///
/// All intermediate files for a job (downloads, engine output, derived
/// previews) live under one directory that is removed when the value drops,
/// on every exit path.
#[derive(Debug)]
pub struct ScratchDir {
    dir: TempDir,
}

impl ScratchDir {
    /// Create a scratch directory under the given base, creating the base
    /// if needed.
    pub fn new(base: impl AsRef<Path>, prefix: &str) -> MediaResult<Self> {
        let base = base.as_ref();
        std::fs::create_dir_all(base)?;
        let dir = tempfile::Builder::new()
            .prefix(prefix)
            .tempdir_in(base)?;
        Ok(Self { dir })
    }

    /// Root path of the scratch directory.
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Path for a named file inside the scratch directory.
    pub fn file(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cleans_up_on_drop() {
        let base = tempfile::tempdir().unwrap();
        let scratch_path;
        {
            let scratch = ScratchDir::new(base.path(), "job_").unwrap();
            scratch_path = scratch.path().to_path_buf();
            std::fs::write(scratch.file("target.mp4"), b"data").unwrap();
            assert!(scratch_path.exists());
        }
        assert!(!scratch_path.exists(), "scratch dir should be removed on drop");
    }

    #[test]
    fn creates_missing_base() {
        let base = tempfile::tempdir().unwrap();
        let nested = base.path().join("work").join("fswap");
        let scratch = ScratchDir::new(&nested, "job_").unwrap();
        assert!(scratch.path().starts_with(&nested));
    }
}
