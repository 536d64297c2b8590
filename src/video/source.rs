//! Camera frame sources

use image::RgbImage;
use std::path::PathBuf;
use tracing::trace;

/// Source of still frames; `None` means no valid frame yet
pub trait FrameSource: Send + 'static {
    fn grab(&mut self) -> Option<RgbImage>;
}

impl<F> FrameSource for F
where
    F: FnMut() -> Option<RgbImage> + Send + 'static,
{
    fn grab(&mut self) -> Option<RgbImage> {
        self()
    }
}

/// Reads a still image from disk on every grab.
///
/// Stands in for a camera driver: an external process keeps overwriting
/// the file with the latest frame. A missing or half-written file counts
/// as "not warmed up".
pub struct SnapshotFileSource {
    path: PathBuf,
}

impl SnapshotFileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }
}

impl FrameSource for SnapshotFileSource {
    fn grab(&mut self) -> Option<RgbImage> {
        match image::open(&self.path) {
            Ok(img) if img.width() > 0 && img.height() > 0 => Some(img.to_rgb8()),
            Ok(_) => None,
            Err(e) => {
                trace!("No snapshot at {}: {}", self.path.display(), e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_is_not_ready() {
        let dir = tempfile::tempdir().unwrap();
        let mut source = SnapshotFileSource::new(dir.path().join("camera.png"));
        assert!(source.grab().is_none());
    }

    #[test]
    fn test_reads_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("camera.png");
        RgbImage::from_pixel(8, 6, image::Rgb([1, 2, 3]))
            .save(&path)
            .unwrap();

        let frame = SnapshotFileSource::new(&path).grab().unwrap();
        assert_eq!(frame.dimensions(), (8, 6));
        assert_eq!(frame.get_pixel(0, 0), &image::Rgb([1, 2, 3]));
    }

    #[test]
    fn test_garbage_file_is_not_ready() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("camera.png");
        std::fs::write(&path, b"not an image").unwrap();
        assert!(SnapshotFileSource::new(&path).grab().is_none());
    }
}
