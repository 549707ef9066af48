use anyhow::Error;
use opencv::core::Mat;
use opencv::imgcodecs::{imdecode, IMREAD_COLOR};
use opencv::imgproc::{cvt_color, COLOR_BGR2RGB};

/// Decode raw image bytes into an RGB `Mat`.
///
/// OpenCV decodes to BGR channel order; detection and estimation both
/// expect RGB, so the conversion happens once here.
pub fn convert_image_to_mat(im_bytes: &[u8]) -> Result<Mat, Error> {
    let img_as_mat = Mat::from_slice(im_bytes)?;

    let bgr_img = imdecode(&img_as_mat, IMREAD_COLOR)?;

    let mut rgb_img = Mat::default();
    cvt_color(&bgr_img, &mut rgb_img, COLOR_BGR2RGB, 0)?;

    Ok(rgb_img)
}
