use std::path::PathBuf;

use thiserror::Error;

/// Failures surfaced by [`crate::video::stream::SeekableFrameStream`].
///
/// None of these are retried internally. Every failure is local to the stream
/// that raised it.
#[derive(Debug, Error)]
pub enum StreamError {
    /// The media path did not exist when `open` was called.
    #[error("media file does not exist: {}", .0.display())]
    NotFound(PathBuf),

    /// The native decoder returned no handle for the path.
    #[error("native decoder could not open {}", .0.display())]
    Open(PathBuf),

    /// The target was invalid, or the native decoder rejected the position.
    #[error("seek to frame {target} failed: {reason}")]
    Seek { target: i64, reason: String },

    /// End-relative seek on a stream whose length is unknown.
    #[error("end-relative seek requires a known stream length")]
    UnsupportedSeek,

    #[error("stream is not open")]
    NotOpen,

    #[error("failed to read frame: {0:#}")]
    Read(anyhow::Error),
}

pub type Result<T> = std::result::Result<T, StreamError>;
