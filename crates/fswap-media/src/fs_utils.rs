//! Filesystem helpers for persisting artifacts out of scratch space.
//!
//! Scratch directories typically live on tmpfs while the output directory
//! sits on a mounted volume, so a plain rename can fail with EXDEV.

use std::path::{Path, PathBuf};
use tokio::fs;

use crate::error::{MediaError, MediaResult};

/// Move a file from `src` to `dst`, tolerating cross-device boundaries.
///
/// Tries a rename first. On EXDEV it copies to a temp file next to `dst`
/// and renames that into place, so the destination never exposes a
/// half-written file.
pub async fn move_file(src: impl AsRef<Path>, dst: impl AsRef<Path>) -> MediaResult<()> {
    let src = src.as_ref();
    let dst = dst.as_ref();

    if let Some(parent) = dst.parent() {
        if !parent.exists() {
            fs::create_dir_all(parent).await?;
        }
    }

    match fs::rename(src, dst).await {
        Ok(()) => Ok(()),
        Err(e) if is_cross_device(&e) => {
            tracing::debug!(
                "Cross-device move, copying instead: {} -> {}",
                src.display(),
                dst.display()
            );
            let staging = dst.with_extension("partial");
            fs::copy(src, &staging).await?;
            if let Err(e) = fs::rename(&staging, dst).await {
                let _ = std::fs::remove_file(&staging);
                return Err(MediaError::from(e));
            }
            // Source removal is best effort; scratch cleanup catches leftovers.
            if let Err(e) = fs::remove_file(src).await {
                tracing::warn!("Failed to remove {} after move: {}", src.display(), e);
            }
            Ok(())
        }
        Err(e) => Err(MediaError::from(e)),
    }
}

/// Move a finished artifact into `output_dir` under `file_name` and return
/// its final path.
pub async fn persist_output(
    src: impl AsRef<Path>,
    output_dir: impl AsRef<Path>,
    file_name: &str,
) -> MediaResult<PathBuf> {
    let src = src.as_ref();
    if !src.exists() {
        return Err(MediaError::FileNotFound(src.display().to_string()));
    }
    let final_path = output_dir.as_ref().join(file_name);
    move_file(src, &final_path).await?;
    Ok(final_path)
}

/// EXDEV is 18 on Linux and macOS.
fn is_cross_device(e: &std::io::Error) -> bool {
    e.raw_os_error() == Some(18)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn moves_within_one_filesystem() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("a.gif");
        let dst = dir.path().join("nested").join("b.gif");
        fs::write(&src, b"frames").await.unwrap();

        move_file(&src, &dst).await.unwrap();

        assert!(!src.exists());
        assert_eq!(fs::read(&dst).await.unwrap(), b"frames");
    }

    #[tokio::test]
    async fn persist_output_rejects_missing_source() {
        let dir = TempDir::new().unwrap();
        let err = persist_output(dir.path().join("ghost.mp4"), dir.path(), "out.mp4")
            .await
            .unwrap_err();
        assert!(matches!(err, MediaError::FileNotFound(_)));
    }

    #[tokio::test]
    async fn persist_output_returns_final_path() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("result.mp4");
        fs::write(&src, b"video").await.unwrap();

        let out = persist_output(&src, dir.path().join("outputs"), "job1.mp4")
            .await
            .unwrap();

        assert!(out.ends_with("outputs/job1.mp4"));
        assert!(out.exists());
    }

    #[test]
    fn detects_exdev() {
        assert!(is_cross_device(&std::io::Error::from_raw_os_error(18)));
        assert!(!is_cross_device(&std::io::Error::from_raw_os_error(2)));
    }
}
