//! Orientation correction and pixel-format conversion for rendered pages.

use std::{fs, io::Cursor};

use image::DynamicImage;

use crate::{prelude::*, raster::RasterPage};

/// A raster page corrected for orientation and converted to the pixel format
/// the recognition engine expects: 8-bit grayscale.
pub struct NormalizedImage {
    pub page_idx: usize,
    pub image: image::GrayImage,
}

/// Re-load a rendered page from its temporary file, rotate it as its embedded
/// orientation tag dictates, and convert it to the recognizer's pixel format.
pub fn normalize(raster: &RasterPage) -> Result<NormalizedImage> {
    let bytes = fs::read(&raster.path)
        .with_context(|| format!("failed to read {:?}", raster.path.display()))?;
    let image = image::load_from_memory(&bytes)
        .with_context(|| format!("failed to decode {:?}", raster.path.display()))?;
    let image = apply_orientation(image, read_orientation(&bytes));
    Ok(NormalizedImage {
        page_idx: raster.page_idx,
        image: image.into_luma8(),
    })
}

/// Read the embedded EXIF orientation tag, if any. Pages we rendered
/// ourselves normally carry none; scanned input fed back through the pipeline
/// may. A missing or unreadable tag means "upright".
fn read_orientation(bytes: &[u8]) -> u32 {
    let mut cursor = Cursor::new(bytes);
    let reader = match exif::Reader::new().read_from_container(&mut cursor) {
        Ok(reader) => reader,
        Err(_) => return 1,
    };
    reader
        .get_field(exif::Tag::Orientation, exif::In::PRIMARY)
        .and_then(|field| field.value.get_uint(0))
        .unwrap_or(1)
}

/// Rotate by the amount the orientation tag calls for.
///
/// Only the pure rotations (tags 3, 6 and 8) are corrected; mirrored
/// orientations do not occur in scanner or renderer output.
fn apply_orientation(image: DynamicImage, orientation: u32) -> DynamicImage {
    match orientation {
        3 => image.rotate180(),
        6 => image.rotate90(),
        8 => image.rotate270(),
        _ => image,
    }
}

#[cfg(test)]
mod tests {
    use image::GrayImage;

    use super::*;

    fn test_image(width: u32, height: u32) -> DynamicImage {
        DynamicImage::ImageLuma8(GrayImage::new(width, height))
    }

    #[test]
    fn rotation_tags_swap_dimensions() {
        let rotated = apply_orientation(test_image(4, 2), 6);
        assert_eq!((rotated.width(), rotated.height()), (2, 4));

        let rotated = apply_orientation(test_image(4, 2), 8);
        assert_eq!((rotated.width(), rotated.height()), (2, 4));

        let rotated = apply_orientation(test_image(4, 2), 3);
        assert_eq!((rotated.width(), rotated.height()), (4, 2));
    }

    #[test]
    fn unknown_orientation_is_a_no_op() {
        let image = apply_orientation(test_image(4, 2), 0);
        assert_eq!((image.width(), image.height()), (4, 2));
    }

    #[test]
    fn png_without_metadata_reads_as_upright() -> Result<()> {
        let mut bytes = Vec::new();
        test_image(2, 2).write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)?;
        assert_eq!(read_orientation(&bytes), 1);
        Ok(())
    }

    #[test]
    fn normalize_round_trips_a_rendered_page() -> Result<()> {
        let tmpdir = tempfile::TempDir::with_prefix("normalize")?;
        let path = tmpdir.path().join("render-00000.png");
        test_image(3, 5).save(&path)?;

        let normalized = normalize(&RasterPage { page_idx: 0, path })?;
        assert_eq!(normalized.page_idx, 0);
        assert_eq!(
            (normalized.image.width(), normalized.image.height()),
            (3, 5)
        );
        Ok(())
    }
}
