use crate::age_gender_lite::types::BBox;
use anyhow::Error;
use ndarray::{Array3, Array4};
use opencv::core::{Mat, Rect, Size, Vec3b};
use opencv::imgproc::{resize, INTER_LINEAR};
use opencv::prelude::*;

/// Edge length of the square crop fed to the age/gender network.
pub const CROP_SIZE: usize = 64;

/// Fraction of the detection width/height added on each side before cropping.
pub const CROP_MARGIN: f64 = 0.4;

/// Integer pixel rectangle with inclusive corners, used as crop indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropRegion {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
}

impl CropRegion {
    pub fn new(x1: i32, y1: i32, x2: i32, y2: i32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn width(&self) -> i32 {
        self.x2 - self.x1 + 1
    }

    pub fn height(&self) -> i32 {
        self.y2 - self.y1 + 1
    }
}

/// Enlarge a pixel-space detection box by [`CROP_MARGIN`] of its width and
/// height on each side and clamp the result to the image bounds.
///
/// Coordinates are truncated to integers before clamping, so a detection
/// touching an image boundary has its expansion on that side fully absorbed.
/// * Args:
///     - bbox (`BBox`): Detection box in source-image pixel coordinates,
///       with `xmax`/`ymax` exclusive.
///     - image_size (`(i32, i32)`): Tuple of `(width, height)` of the source image.
///
/// * Returns:
///     - (`CropRegion`): Clamped, inclusive crop rectangle.
pub fn expand_box(bbox: &BBox, image_size: (i32, i32)) -> CropRegion {
    let (img_w, img_h) = image_size;
    let w = bbox.width();
    let h = bbox.height();

    let xw1 = ((bbox.xmin - CROP_MARGIN * w) as i32).max(0);
    let yw1 = ((bbox.ymin - CROP_MARGIN * h) as i32).max(0);
    let xw2 = ((bbox.xmax + CROP_MARGIN * w) as i32).min(img_w - 1);
    let yw2 = ((bbox.ymax + CROP_MARGIN * h) as i32).min(img_h - 1);

    CropRegion::new(xw1, yw1, xw2, yw2)
}

/// Crop a region from an image and resize it (bilinear) to a
/// [`CROP_SIZE`]×[`CROP_SIZE`] float tensor with values in [0, 255].
pub fn crop_to_tensor(image: &Mat, region: &CropRegion) -> Result<Array3<f32>, Error> {
    if region.width() <= 0 || region.height() <= 0 {
        return Err(Error::msg("crop region is empty"));
    }

    let roi = Mat::roi(image, Rect::new(region.x1, region.y1, region.width(), region.height()))?;

    let mut resized = Mat::default();
    resize(
        &roi,
        &mut resized,
        Size::new(CROP_SIZE as i32, CROP_SIZE as i32),
        0.0,
        0.0,
        INTER_LINEAR,
    )?;

    let mut tensor = Array3::<f32>::zeros((CROP_SIZE, CROP_SIZE, 3));
    for y in 0..CROP_SIZE {
        for x in 0..CROP_SIZE {
            let pixel = resized.at_2d::<Vec3b>(y as i32, x as i32)?;
            for c in 0..3 {
                tensor[[y, x, c]] = pixel[c] as f32;
            }
        }
    }

    Ok(tensor)
}

/// Prepare a batch of face crops for the estimator.
///
/// One crop is produced per region, in order, regardless of how many
/// regions there are; the caller decides whether the batch is consumed.
pub fn prepare_batch(image: &Mat, regions: &[CropRegion]) -> Result<Array4<f32>, Error> {
    let mut batch = Array4::<f32>::zeros((regions.len(), CROP_SIZE, CROP_SIZE, 3));

    for (i, region) in regions.iter().enumerate() {
        let crop = crop_to_tensor(image, region)?;
        batch.index_axis_mut(ndarray::Axis(0), i).assign(&crop);
    }

    Ok(batch)
}

#[cfg(test)]
mod tests {
    use super::*;
    use opencv::core::{Scalar, CV_8UC3};

    #[test]
    fn test_expansion_without_clamping() {
        // box fully inside the image with margin to spare
        let region = expand_box(&BBox::new(100.0, 100.0, 120.0, 120.0), (400, 400));
        assert_eq!(region, CropRegion::new(92, 92, 128, 128));
    }

    #[test]
    fn test_expansion_clamped_at_origin() {
        let region = expand_box(&BBox::new(10.0, 10.0, 50.0, 50.0), (200, 200));
        assert_eq!(region, CropRegion::new(0, 0, 66, 66));
    }

    #[test]
    fn test_expansion_clamped_at_far_edge() {
        let region = expand_box(&BBox::new(160.0, 160.0, 199.0, 199.0), (200, 200));
        assert_eq!(region.x2, 199);
        assert_eq!(region.y2, 199);
    }

    #[test]
    fn test_boundary_touching_box_absorbs_expansion() {
        let region = expand_box(&BBox::new(0.0, 0.0, 40.0, 40.0), (200, 200));
        assert_eq!(region.x1, 0);
        assert_eq!(region.y1, 0);
        assert_eq!(region.x2, 56);
    }

    #[test]
    fn test_fractional_coordinates_are_truncated() {
        // 0.4 * 11 = 4.4; 12.5 - 4.4 = 8.1 truncates to 8
        let region = expand_box(&BBox::new(12.5, 12.5, 23.5, 23.5), (100, 100));
        assert_eq!(region.x1, 8);
        assert_eq!(region.x2, 27);
    }

    #[test]
    fn test_prepare_batch_shape() {
        let image = Mat::new_rows_cols_with_default(200, 200, CV_8UC3, Scalar::all(128.0)).unwrap();
        let regions = vec![CropRegion::new(0, 0, 66, 66), CropRegion::new(50, 50, 120, 120)];

        let batch = prepare_batch(&image, &regions).unwrap();
        assert_eq!(batch.shape(), &[2, CROP_SIZE, CROP_SIZE, 3]);
        assert!((batch[[0, 10, 10, 0]] - 128.0).abs() < 1.0);
    }

    #[test]
    fn test_empty_batch() {
        let image = Mat::new_rows_cols_with_default(50, 50, CV_8UC3, Scalar::all(0.0)).unwrap();
        let batch = prepare_batch(&image, &[]).unwrap();
        assert_eq!(batch.shape(), &[0, CROP_SIZE, CROP_SIZE, 3]);
    }
}
