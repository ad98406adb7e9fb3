use image::RgbImage;

/// A single decoded video frame with metadata.
#[derive(Debug)]
pub struct Frame {
    /// The frame's image data.
    pub image: RgbImage,
    /// Position the frame was read at (0-based).
    pub frame_number: u64,
    /// Elapsed seconds from the start of the source, 0.0 when the frame rate is unknown.
    pub timestamp_seconds: f64,
}

impl Frame {
    pub fn new(image: RgbImage, frame_number: u64, fps: f64) -> Self {
        let timestamp_seconds = if fps > 0.0 {
            frame_number as f64 / fps
        } else {
            0.0
        };
        Self {
            image,
            frame_number,
            timestamp_seconds,
        }
    }
}
