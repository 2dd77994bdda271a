//! Engine process invocation.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Instant;

use tokio::process::Command;
use tracing::{debug, info, warn};

use fswap_models::{Processor, Resolution, SelectorMode};

use crate::error::{EngineError, EngineResult};

/// Parameters for a single engine run.
///
/// The argument order the engine expects is fixed: selector mode, sources,
/// mapping (reference mode only), target, output, processors, resolution.
#[derive(Debug, Clone)]
pub struct EngineInvocation {
    pub selector_mode: SelectorMode,
    pub source_paths: Vec<PathBuf>,
    pub mapping_path: Option<PathBuf>,
    pub target_path: PathBuf,
    pub output_path: PathBuf,
    pub processors: Vec<Processor>,
    pub resolution: Resolution,
}

impl EngineInvocation {
    fn build_args(&self) -> Vec<String> {
        let mut args = vec![
            "run".to_string(),
            "--face-selector-mode".to_string(),
            self.selector_mode.as_str().to_string(),
        ];

        for source in &self.source_paths {
            args.push("--source".to_string());
            args.push(source.to_string_lossy().to_string());
        }

        if let Some(mapping) = &self.mapping_path {
            args.push("--face-mapping".to_string());
            args.push(mapping.to_string_lossy().to_string());
        }

        args.push("--target".to_string());
        args.push(self.target_path.to_string_lossy().to_string());

        args.push("--output".to_string());
        args.push(self.output_path.to_string_lossy().to_string());

        args.push("--processors".to_string());
        for processor in &self.processors {
            args.push(processor.as_str().to_string());
        }

        args.push("--output-resolution".to_string());
        args.push(self.resolution.to_string());

        args
    }
}

/// Supervises one external engine process per job.
#[derive(Debug, Clone)]
pub struct EngineInvoker {
    bin: PathBuf,
    timeout_secs: u64,
}

impl EngineInvoker {
    /// Create an invoker, resolving the binary through PATH when needed.
    pub fn new(bin: impl AsRef<Path>, timeout_secs: u64) -> EngineResult<Self> {
        let bin = bin.as_ref();
        let resolved = if bin.is_absolute() && bin.exists() {
            bin.to_path_buf()
        } else {
            which::which(bin).map_err(|_| EngineError::NotFound(bin.display().to_string()))?
        };
        Ok(Self {
            bin: resolved,
            timeout_secs,
        })
    }

    /// Run the engine to completion and return elapsed seconds.
    ///
    /// On timeout the process is killed before the error is returned. The
    /// caller owns any partial output cleanup via its scratch directory.
    pub async fn invoke(&self, invocation: &EngineInvocation) -> EngineResult<f64> {
        let args = invocation.build_args();
        debug!("Invoking engine: {} {}", self.bin.display(), args.join(" "));

        let started = Instant::now();
        // kill_on_drop covers the caller cancelling this future mid-wait;
        // an orphaned engine would keep holding the accelerator.
        let mut child = Command::new(&self.bin)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let stderr = child.stderr.take();
        let wait = async {
            let mut captured = String::new();
            if let Some(mut pipe) = stderr {
                use tokio::io::AsyncReadExt;
                let _ = pipe.read_to_string(&mut captured).await;
            }
            let status = child.wait().await?;
            Ok::<_, EngineError>((status, captured))
        };

        let (status, stderr_text) =
            match tokio::time::timeout(std::time::Duration::from_secs(self.timeout_secs), wait)
                .await
            {
                Ok(result) => result?,
                Err(_) => {
                    warn!(
                        "Engine exceeded {}s deadline, killing process",
                        self.timeout_secs
                    );
                    let _ = child.kill().await;
                    return Err(EngineError::Timeout(self.timeout_secs));
                }
            };

        if !status.success() {
            let tail = diagnostic_tail(&stderr_text);
            return Err(EngineError::failed(
                "engine exited with non-zero status",
                if tail.is_empty() { None } else { Some(tail) },
                status.code(),
            ));
        }

        if !invocation.output_path.exists() {
            return Err(EngineError::MissingOutput(
                invocation.output_path.display().to_string(),
            ));
        }

        let elapsed = started.elapsed().as_secs_f64();
        info!(
            elapsed_secs = format!("{elapsed:.2}"),
            "Engine run complete: {}",
            invocation.output_path.display()
        );
        Ok(elapsed)
    }
}

/// Last 4 KiB of stderr, enough for the engine's final traceback.
fn diagnostic_tail(text: &str) -> String {
    const MAX: usize = 4096;
    let trimmed = text.trim();
    if trimmed.len() <= MAX {
        return trimmed.to_string();
    }
    let cut = trimmed.len() - MAX;
    let cut = trimmed
        .char_indices()
        .map(|(i, _)| i)
        .find(|&i| i >= cut)
        .unwrap_or(cut);
    trimmed[cut..].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    fn write_script(dir: &TempDir, name: &str, body: &str) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        let mut perms = std::fs::metadata(&path).unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&path, perms).unwrap();
        path
    }

    fn invocation(dir: &TempDir) -> EngineInvocation {
        EngineInvocation {
            selector_mode: SelectorMode::Many,
            source_paths: vec![dir.path().join("face.jpg")],
            mapping_path: None,
            target_path: dir.path().join("target.mp4"),
            output_path: dir.path().join("out.mp4"),
            processors: vec![Processor::FaceSwapper],
            resolution: Resolution::default(),
        }
    }

    #[test]
    fn args_follow_fixed_order() {
        let dir = TempDir::new().unwrap();
        let mut inv = invocation(&dir);
        inv.selector_mode = SelectorMode::Reference;
        inv.mapping_path = Some(dir.path().join("mapping.json"));
        inv.processors = vec![Processor::FaceSwapper, Processor::FaceEnhancer];

        let args = inv.build_args();
        assert_eq!(args[0], "run");
        assert_eq!(args[1], "--face-selector-mode");
        assert_eq!(args[2], "reference");

        let pos = |flag: &str| args.iter().position(|a| a == flag).unwrap();
        assert!(pos("--source") < pos("--face-mapping"));
        assert!(pos("--face-mapping") < pos("--target"));
        assert!(pos("--target") < pos("--output"));
        assert!(pos("--output") < pos("--processors"));
        assert!(pos("--processors") < pos("--output-resolution"));
        assert_eq!(args.last().unwrap(), "1024x1024");
    }

    #[test]
    fn many_mode_omits_mapping_flag() {
        let dir = TempDir::new().unwrap();
        let args = invocation(&dir).build_args();
        assert!(!args.iter().any(|a| a == "--face-mapping"));
    }

    #[tokio::test]
    async fn successful_run_reports_elapsed() {
        let dir = TempDir::new().unwrap();
        let inv = invocation(&dir);
        let out = inv.output_path.to_string_lossy().to_string();
        let bin = write_script(&dir, "engine-ok", &format!("touch {out}\nexit 0"));

        let invoker = EngineInvoker::new(&bin, 30).unwrap();
        let elapsed = invoker.invoke(&inv).await.unwrap();
        assert!(elapsed >= 0.0);
        assert!(inv.output_path.exists());
    }

    #[tokio::test]
    async fn nonzero_exit_captures_stderr() {
        let dir = TempDir::new().unwrap();
        let inv = invocation(&dir);
        let bin = write_script(&dir, "engine-fail", "echo 'no faces detected' >&2\nexit 3");

        let invoker = EngineInvoker::new(&bin, 30).unwrap();
        let err = invoker.invoke(&inv).await.unwrap_err();
        match err {
            EngineError::Failed {
                stderr, exit_code, ..
            } => {
                assert_eq!(exit_code, Some(3));
                assert!(stderr.unwrap().contains("no faces detected"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn deadline_kills_the_process() {
        let dir = TempDir::new().unwrap();
        let inv = invocation(&dir);
        let bin = write_script(&dir, "engine-slow", "sleep 30");

        let invoker = EngineInvoker::new(&bin, 1).unwrap();
        let err = invoker.invoke(&inv).await.unwrap_err();
        assert!(err.is_timeout());
    }

    #[tokio::test]
    async fn success_without_output_is_an_error() {
        let dir = TempDir::new().unwrap();
        let inv = invocation(&dir);
        let bin = write_script(&dir, "engine-noop", "exit 0");

        let invoker = EngineInvoker::new(&bin, 30).unwrap();
        let err = invoker.invoke(&inv).await.unwrap_err();
        assert!(matches!(err, EngineError::MissingOutput(_)));
    }

    #[test]
    fn missing_binary_detected_at_construction() {
        let err = EngineInvoker::new("definitely-not-a-real-engine-bin", 30).unwrap_err();
        assert!(matches!(err, EngineError::NotFound(_)));
    }
}
