//! Grayscale image type and the frame-supplier / image-decoder external
//! interfaces (§6).
//!
//! The core never owns the camera driver or a GUI surface — only the
//! contract for how a frame or a still image reaches it. [`Frame`] is the
//! push-model delivery type (`onFrame(width, height, luma_plane, stride)`);
//! [`ImageDecoder`] is the file-to-matrix boundary for still captures.

use crate::error::{PipelineError, Result};
use std::path::{Path, PathBuf};

/// A 2-D matrix of 8-bit grayscale pixel intensities. Immutable once
/// acquired; every transform either consumes and releases one or returns a
/// freshly allocated one — never both aliasing the same buffer.
pub type GrayImage = image::GrayImage;

/// One grayscale frame delivered by the camera driver.
///
/// The core never copies the luma plane when `stride == width`; otherwise it
/// row-copies into a tight buffer so downstream code can assume
/// `stride == width` everywhere past this boundary.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Tightly packed luma plane, length `width * height`.
    pub luma: Vec<u8>,
}

impl Frame {
    /// Builds a [`Frame`] from a possibly strided luma plane, copying rows
    /// only when `stride != width`.
    #[must_use]
    pub fn from_luma_plane(width: u32, height: u32, luma_plane: &[u8], stride: u32) -> Self {
        let width_usize = width as usize;
        let height_usize = height as usize;
        let luma = if stride == width {
            luma_plane[..width_usize * height_usize].to_vec()
        } else {
            let stride_usize = stride as usize;
            let mut tight = Vec::with_capacity(width_usize * height_usize);
            for row in 0..height_usize {
                let start = row * stride_usize;
                tight.extend_from_slice(&luma_plane[start..start + width_usize]);
            }
            tight
        };
        Self { width, height, luma }
    }

    /// Converts this frame into a [`GrayImage`].
    ///
    /// # Panics
    ///
    /// If `width * height` does not match the luma plane length, which
    /// cannot happen for a [`Frame`] built via [`Frame::from_luma_plane`].
    #[must_use]
    pub fn into_gray_image(self) -> GrayImage {
        GrayImage::from_raw(self.width, self.height, self.luma)
            .expect("frame dimensions must match luma plane length")
    }
}

/// Still-capture external collaborator: returns a path to a file decodable
/// by an [`ImageDecoder`].
pub trait StillCapture {
    /// Triggers a still capture and returns the path of the written file.
    fn capture_still(&self) -> Result<PathBuf>;
}

/// Image-decoder external collaborator: `decode(path) -> grayscale matrix`.
/// BGR and grayscale sources are both accepted; conversion to grayscale
/// happens here, ahead of the C1 preprocessor.
pub trait ImageDecoder {
    /// Decodes the image at `path` into a [`GrayImage`].
    fn decode(&self, path: &Path) -> Result<GrayImage>;
}

/// Default [`ImageDecoder`] backed by the `image` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultImageDecoder;

impl ImageDecoder for DefaultImageDecoder {
    fn decode(&self, path: &Path) -> Result<GrayImage> {
        let image = image::open(path).map_err(|source| PipelineError::Codec {
            path: Some(path.to_path_buf()),
            source,
        })?;
        Ok(image.into_luma8())
    }
}

/// Encodes a [`GrayImage`] to a PNG file at `path`, creating parent
/// directories as needed. Used by the enrollment flow to persist the still
/// image referenced by `SubjectRecord::image_path`.
pub fn encode_png(image: &GrayImage, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    image
        .save_with_format(path, image::ImageFormat::Png)
        .map_err(|source| PipelineError::Codec { path: Some(path.to_path_buf()), source })
}

/// Directory layout for captured images: `<app-docs>/iris_images/<uuid>.png`.
#[must_use]
pub fn image_path(app_docs: &Path, id: uuid::Uuid) -> PathBuf {
    app_docs.join("iris_images").join(format!("{id}.png"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tight_plane_is_not_copied_unnecessarily() {
        let plane = vec![1u8, 2, 3, 4, 5, 6];
        let frame = Frame::from_luma_plane(3, 2, &plane, 3);
        assert_eq!(frame.luma, plane);
    }

    #[test]
    fn strided_plane_is_row_copied() {
        // width=2, stride=4: two padding bytes per row are dropped.
        let plane = vec![1u8, 2, 0, 0, 3, 4, 0, 0];
        let frame = Frame::from_luma_plane(2, 2, &plane, 4);
        assert_eq!(frame.luma, vec![1, 2, 3, 4]);
    }

    #[test]
    fn image_path_matches_layout() {
        let id = uuid::Uuid::nil();
        let path = image_path(Path::new("/docs"), id);
        assert_eq!(path, Path::new("/docs/iris_images/00000000-0000-0000-0000-000000000000.png"));
    }
}
