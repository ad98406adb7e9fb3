use std::path::{Path, PathBuf};

use ab_glyph::{FontVec, PxScale};
use anyhow::{Context, Result};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_text_mut};
use imageproc::rect::Rect;
use tracing::{debug, info, warn};

use crate::video::frame::Frame;

const TEXT_SCALE: f32 = 28.0;
const TEXT_COLOR: Rgb<u8> = Rgb([255, 255, 255]);
const TEXT_BACKGROUND: Rgb<u8> = Rgb([0, 0, 0]);
const TEXT_LINE_HEIGHT: i32 = 30;
const TEXT_MARGIN: i32 = 10;

/// Writes grabbed frames as PNG, optionally labelled with the landed and
/// requested frame index so key-frame rounding is visible.
pub struct SnapshotRenderer {
    font: Option<FontVec>,
}

impl SnapshotRenderer {
    /// Labels are drawn only if `font` points at a loadable TTF/OTF file.
    pub fn new(font: Option<&Path>) -> Self {
        let font = font.and_then(Self::load_font);
        Self { font }
    }

    pub fn has_font(&self) -> bool {
        self.font.is_some()
    }

    /// Save `frame` to `path`, creating parent directories as needed.
    pub fn save(&self, frame: &Frame, requested: Option<u64>, path: &Path) -> Result<PathBuf> {
        let mut img = frame.image.clone();
        self.draw_label(&mut img, frame, requested);

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }

        img.save(path)
            .with_context(|| format!("failed to save snapshot to {}", path.display()))?;

        debug!(?path, frame_number = frame.frame_number, "saved snapshot");
        Ok(path.to_path_buf())
    }

    fn draw_label(&self, img: &mut RgbImage, frame: &Frame, requested: Option<u64>) {
        let Some(font) = &self.font else { return };
        let scale = PxScale::from(TEXT_SCALE);

        let mut lines = vec![format!("F:{}", frame.frame_number)];
        if let Some(requested) = requested {
            lines.push(format!("REQ:{requested}"));
        }

        let height = TEXT_LINE_HEIGHT * lines.len() as i32 + TEXT_MARGIN;
        let width = (img.width() as i32).min(220);
        if width > 0 && height > 0 {
            let backdrop = Rect::at(0, 0).of_size(width as u32, height as u32);
            draw_filled_rect_mut(img, backdrop, TEXT_BACKGROUND);
        }

        let mut y = TEXT_MARGIN;
        for line in &lines {
            draw_text_mut(img, TEXT_COLOR, TEXT_MARGIN, y, scale, font, line);
            y += TEXT_LINE_HEIGHT;
        }
    }

    fn load_font(path: &Path) -> Option<FontVec> {
        let data = match std::fs::read(path) {
            Ok(data) => data,
            Err(e) => {
                warn!(?path, error = %e, "failed to read font file");
                return None;
            }
        };
        match FontVec::try_from_vec(data) {
            Ok(font) => {
                info!(?path, "loaded snapshot font");
                Some(font)
            }
            Err(e) => {
                warn!(?path, error = %e, "failed to parse font file");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;
    use tracing_test::traced_test;

    use super::*;

    fn frame() -> Frame {
        Frame::new(RgbImage::from_pixel(8, 6, Rgb([10, 20, 30])), 50, 25.0)
    }

    #[test]
    fn saves_png_without_font() {
        let dir = TempDir::new().unwrap();
        let renderer = SnapshotRenderer::new(None);
        assert!(!renderer.has_font());

        let path = dir.path().join("out/frame.png");
        renderer.save(&frame(), Some(60), &path).unwrap();

        let saved = image::open(&path).unwrap().into_rgb8();
        assert_eq!(saved.dimensions(), (8, 6));
        assert_eq!(*saved.get_pixel(0, 0), Rgb([10, 20, 30]));
    }

    /// Fonts commonly installed on Linux, macOS and Windows.
    const SYSTEM_FONTS: [&str; 4] = [
        "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
        "/usr/share/fonts/TTF/DejaVuSans.ttf",
        "/System/Library/Fonts/Supplemental/Arial.ttf",
        "C:\\Windows\\Fonts\\consola.ttf",
    ];

    #[test]
    fn label_is_drawn_with_loaded_font() {
        let Some(font) = SYSTEM_FONTS.iter().map(|p| Path::new(*p)).find(|p| p.exists()) else {
            println!("skipping: no system font found");
            return;
        };
        let renderer = SnapshotRenderer::new(Some(font));
        assert!(renderer.has_font());

        let background = Rgb([10, 20, 30]);
        let frame = Frame::new(RgbImage::from_pixel(320, 120, background), 50, 25.0);
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("labelled.png");
        renderer.save(&frame, Some(60), &path).unwrap();

        let saved = image::open(&path).unwrap().into_rgb8();
        assert_eq!(*saved.get_pixel(0, 0), TEXT_BACKGROUND);
        assert_eq!(*saved.get_pixel(319, 119), background);

        let backdrop_height = (TEXT_LINE_HEIGHT * 2 + TEXT_MARGIN) as u32;
        let lit = (0..220)
            .flat_map(|x| (0..backdrop_height).map(move |y| (x, y)))
            .filter(|&(x, y)| saved.get_pixel(x, y).0[0] > 128)
            .count();
        assert!(lit > 0, "no label text drawn");
    }

    #[test]
    #[traced_test]
    fn unparsable_font_is_skipped() {
        let dir = TempDir::new().unwrap();
        let font = dir.path().join("broken.ttf");
        std::fs::write(&font, b"not a font").unwrap();

        let renderer = SnapshotRenderer::new(Some(&font));
        assert!(!renderer.has_font());
        assert!(logs_contain("failed to parse font file"));
    }

    #[test]
    #[traced_test]
    fn missing_font_is_skipped() {
        let dir = TempDir::new().unwrap();
        let renderer = SnapshotRenderer::new(Some(&dir.path().join("absent.ttf")));
        assert!(!renderer.has_font());
        assert!(logs_contain("failed to read font file"));
    }
}
