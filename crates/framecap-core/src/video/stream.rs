use std::cell::Cell;
use std::path::{Path, PathBuf};

use tracing::{debug, error, info, warn};

use super::frame::Frame;
use super::native::{CaptureProperty, NativeDecoder};
use super::seek::{resolve_seek_target, SeekOrigin};
use crate::error::{Result, StreamError};

/// A frame-indexed, seekable view over one native decoding session.
///
/// Seeking is **not frame-exact**: the native decoder lands on the nearest
/// key-frame at or before the requested frame, so the position returned by
/// [`seek`](Self::seek) may be lower than the target. Treat that returned
/// value (or a fresh [`position`](Self::position)) as authoritative.
///
/// Not thread-safe; callers sharing a stream must serialize access themselves.
/// The native handle is released on [`close`](Self::close) or on drop.
pub struct SeekableFrameStream<D: NativeDecoder> {
    decoder: D,
    handle: Option<D::Handle>,
    path: Option<PathBuf>,
    /// Last position the native side reported while open.
    last_position: Cell<u64>,
}

impl<D: NativeDecoder> SeekableFrameStream<D> {
    pub fn new(decoder: D) -> Self {
        Self {
            decoder,
            handle: None,
            path: None,
            last_position: Cell::new(0),
        }
    }

    /// Bind a native session for `path`.
    ///
    /// Opening an already-open stream does nothing, even for a different
    /// path; the existing session is kept.
    pub fn open(&mut self, path: &Path) -> Result<()> {
        if self.handle.is_some() {
            // TODO: decide whether re-open should be an error once callers stop relying on it.
            warn!(?path, current = ?self.path, "stream already open, ignoring open request");
            return Ok(());
        }

        if !path.exists() {
            error!(?path, "media file does not exist");
            return Err(StreamError::NotFound(path.to_path_buf()));
        }

        info!(?path, "opening frame stream");

        let Some(handle) = self.decoder.create_capture(path) else {
            error!(?path, "native decoder returned no handle");
            return Err(StreamError::Open(path.to_path_buf()));
        };

        self.handle = Some(handle);
        self.path = Some(path.to_path_buf());
        self.last_position.set(0);

        info!(
            ?path,
            position = self.position(),
            frame_count = ?self.frame_count(),
            fps = self.fps(),
            "frame stream opened"
        );
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        self.handle.is_some()
    }

    /// Path of the open media file.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Index of the frame the next read returns, as the native decoder reports it.
    ///
    /// Returns 0 before the stream is open. If the decoder answers with an
    /// invalid value, the last valid position it reported is returned instead.
    pub fn position(&self) -> u64 {
        let Some(handle) = &self.handle else {
            return 0;
        };

        let reported = self.decoder.get_property(handle, CaptureProperty::PosFrames);
        match u64::try_from(reported) {
            Ok(position) => {
                self.last_position.set(position);
                position
            }
            Err(_) => {
                let last = self.last_position.get();
                warn!(reported, last, "native decoder reported an invalid position");
                last
            }
        }
    }

    /// Total number of frames, when the container declares it.
    pub fn frame_count(&self) -> Option<u64> {
        let handle = self.handle.as_ref()?;
        let count = self.decoder.get_property(handle, CaptureProperty::FrameCount);
        u64::try_from(count).ok().filter(|n| *n > 0)
    }

    /// Frames per second, 0.0 when closed or unknown.
    pub fn fps(&self) -> f64 {
        self.handle
            .as_ref()
            .map_or(0.0, |handle| self.decoder.fps(handle))
    }

    /// Frame width and height in pixels.
    pub fn dimensions(&self) -> Option<(u32, u32)> {
        let handle = self.handle.as_ref()?;
        let width = self.decoder.get_property(handle, CaptureProperty::FrameWidth);
        let height = self.decoder.get_property(handle, CaptureProperty::FrameHeight);
        Some((u32::try_from(width).ok()?, u32::try_from(height).ok()?))
    }

    /// Move to `offset` frames from `origin` and return where the decoder landed.
    ///
    /// The landed position is at or before the computed target (nearest
    /// preceding key-frame). On failure the stream stays open at its previous
    /// position.
    pub fn seek(&mut self, offset: i64, origin: SeekOrigin) -> Result<u64> {
        if self.handle.is_none() {
            return Err(StreamError::NotOpen);
        }

        let current = self.position() as i64;
        let length = self.frame_count().map(|n| n as i64);
        let target = resolve_seek_target(current, offset, origin, length)?;

        let Some(handle) = self.handle.as_mut() else {
            return Err(StreamError::NotOpen);
        };

        debug!(offset, ?origin, current, target, "seeking");

        if !self
            .decoder
            .set_property(handle, CaptureProperty::PosFrames, target)
        {
            error!(target, current, "native decoder rejected seek");
            return Err(StreamError::Seek {
                target,
                reason: "native decoder rejected the position".to_string(),
            });
        }

        let reported = self.decoder.get_property(handle, CaptureProperty::PosFrames);
        let Ok(landed) = u64::try_from(reported) else {
            error!(target, reported, "native decoder reported an invalid position after seek");
            return Err(StreamError::Seek {
                target,
                reason: format!("native decoder reported invalid position {reported}"),
            });
        };

        self.last_position.set(landed);
        if landed as i64 != target {
            debug!(target, landed, "seek landed on a key-frame before the target");
        }
        Ok(landed)
    }

    /// Decode the frame at the current position, or `None` at end of stream.
    pub fn read_frame(&mut self) -> Result<Option<Frame>> {
        let Some(handle) = self.handle.as_mut() else {
            return Err(StreamError::NotOpen);
        };

        let frame = self.decoder.read_frame(handle).map_err(StreamError::Read)?;
        if let Some(frame) = &frame {
            self.last_position.set(frame.frame_number + 1);
            debug!(frame_number = frame.frame_number, "read frame");
        }
        Ok(frame)
    }

    /// Release the native session. Safe to call any number of times.
    pub fn close(&mut self) {
        if let Some(handle) = self.handle.take() {
            info!(path = ?self.path, position = self.last_position.get(), "closing frame stream");
            self.decoder.release(handle);
        }
        self.path = None;
        self.last_position.set(0);
    }
}

impl<D: NativeDecoder> Drop for SeekableFrameStream<D> {
    fn drop(&mut self) {
        self.close();
    }
}
