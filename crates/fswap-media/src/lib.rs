//! Media plumbing for the face-swap backend.
//!
//! This crate provides:
//! - Validated HTTP fetching of source/target media into scratch storage
//! - Scoped scratch directories with guaranteed cleanup
//! - FFmpeg command building and supervised execution
//! - Derived preview formats (gif / webp / poster frame)

pub mod command;
pub mod error;
pub mod fetch;
pub mod fs_utils;
pub mod preview;
pub mod scratch;

pub use command::{check_ffmpeg, FfmpegCommand, FfmpegRunner};
pub use error::{MediaError, MediaResult};
pub use fetch::{Fetcher, FetcherConfig};
pub use fs_utils::{move_file, persist_output};
pub use preview::{derive_previews, extract_poster, gif_to_mp4, mp4_to_gif, mp4_to_webp, DerivedArtifact};
pub use scratch::ScratchDir;
