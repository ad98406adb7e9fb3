//! Boundary to the native decoder that does the actual media work.
//!
//! Implementations own whatever process-wide state they need (see
//! [`super::runtime`]); a [`super::stream::SeekableFrameStream`] only ever sees
//! this trait.

use std::path::Path;

use anyhow::Result;

use super::frame::Frame;

/// Value a native decoder reports for a property it cannot answer.
pub const INVALID_PROPERTY: i64 = -1;

/// Integer properties of an open capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureProperty {
    /// Index of the frame the next read returns.
    PosFrames,
    /// Total frame count; `<= 0` when the container does not say.
    FrameCount,
    FrameWidth,
    FrameHeight,
}

/// Primitives exposed by a native decoding library.
///
/// Setting [`CaptureProperty::PosFrames`] moves to the nearest key-frame at or
/// before the requested index, not necessarily to the index itself.
pub trait NativeDecoder {
    /// Opaque reference to one open decoding session.
    type Handle;

    /// Open `path`, or `None` if the decoder cannot handle it.
    fn create_capture(&self, path: &Path) -> Option<Self::Handle>;

    /// Read an integer property, [`INVALID_PROPERTY`] (or any negative value) on failure.
    fn get_property(&self, handle: &Self::Handle, prop: CaptureProperty) -> i64;

    /// Frames per second, `0.0` when unknown.
    fn fps(&self, handle: &Self::Handle) -> f64;

    /// Write an integer property. Returns `false` when the decoder refuses.
    fn set_property(&self, handle: &mut Self::Handle, prop: CaptureProperty, value: i64) -> bool;

    /// Decode the frame at the current position and advance by one, or `None` at end of stream.
    fn read_frame(&self, handle: &mut Self::Handle) -> Result<Option<Frame>>;

    /// Release the session. Must not fail.
    fn release(&self, handle: Self::Handle);
}
