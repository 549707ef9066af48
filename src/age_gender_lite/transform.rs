use crate::age_gender_lite::types::{Detection, ImageTensor};
use anyhow::Error;
use ndarray::Array3;
use opencv::core::{copy_make_border, Mat, Scalar, Size, Vec3b, BORDER_CONSTANT};
use opencv::imgproc::{resize, INTER_LINEAR};
use opencv::prelude::*;
use std::f64::EPSILON;

pub fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

/// Load an image into an array and return data, image size, and padding.
///
/// The whole image is scaled to `output_size`; with `keep_aspect_ratio`
/// the image keeps its aspect ratio and letterbox padding is added,
/// which must later be removed from any detection results.
/// * Args:
///     - image (`Mat`): Input image; preferably RGB.
///     - output_size (`(i32, i32)`): Tuple of `(width, height)` describing the
///             output tensor size.
///     - keep_aspect_ratio (`bool`): `false` will stretch the image to
///             the output size; `true` will keep the aspect ratio and apply
///             letterboxing.
///     - output_range (`(f64, f64)`): Tuple of `(min_val, max_val)` containing the
///             minimum and maximum value of the output tensor.
///
/// * Returns:
///         (`ImageTensor`): Tensor data, padding for reversing letterboxing and
///         original image dimensions.
pub fn image_to_tensor(
    image: &Mat, output_size: (i32, i32), keep_aspect_ratio: bool, output_range: (f64, f64),
) -> Result<ImageTensor, Error> {
    let original_size = image.size()?;
    let (out_width, out_height) = output_size;

    let mut pad_left = 0_i32;
    let mut pad_top = 0_i32;
    let mut pad_right = 0_i32;
    let mut pad_bottom = 0_i32;

    let mut roi_image = Mat::default();
    if keep_aspect_ratio {
        let scale = (out_width as f64 / original_size.width as f64)
            .min(out_height as f64 / original_size.height as f64);
        let new_width = ((original_size.width as f64 * scale) as i32).max(1);
        let new_height = ((original_size.height as f64 * scale) as i32).max(1);

        let mut scaled_image = Mat::default();
        resize(image, &mut scaled_image, Size::new(new_width, new_height), 0.0, 0.0, INTER_LINEAR)?;

        pad_left = (out_width - new_width) / 2;
        pad_right = out_width - new_width - pad_left;
        pad_top = (out_height - new_height) / 2;
        pad_bottom = out_height - new_height - pad_top;

        copy_make_border(
            &scaled_image,
            &mut roi_image,
            pad_top,
            pad_bottom,
            pad_left,
            pad_right,
            BORDER_CONSTANT,
            Scalar::all(0.0),
        )?;
    } else {
        resize(image, &mut roi_image, Size::new(out_width, out_height), 0.0, 0.0, INTER_LINEAR)?;
    }

    let (min_val, max_val) = output_range;
    let mut tensors = Array3::<f32>::zeros((out_height as usize, out_width as usize, 3usize));

    for y in 0..out_height as usize {
        for x in 0..out_width as usize {
            let pixel = roi_image.at_2d::<Vec3b>(y as i32, x as i32)?;
            for c in 0..3 {
                tensors[[y, x, c]] = (pixel[c] as f64 * (max_val - min_val) / 255.0 + min_val) as f32;
            }
        }
    }
    let tensor_data = tensors.into_dyn();

    Ok(ImageTensor {
        tensor_data,
        padding: (
            pad_left as f64 / out_width as f64,
            pad_top as f64 / out_height as f64,
            pad_right as f64 / out_width as f64,
            pad_bottom as f64 / out_height as f64,
        ),
        original_size: (original_size.width, original_size.height),
    })
}

/// Remove letterbox padding from detection coordinates so they are
/// normalized with respect to the original image again.
pub fn detection_letterbox_removal(detections: Vec<Detection>, padding: (f64, f64, f64, f64)) -> Vec<Detection> {
    let (left, top, right, bottom) = padding;
    let h_scale = 1.0 - (left + right);
    let v_scale = 1.0 - (top + bottom);

    // Ensure we are not dividing by very small values
    assert!(h_scale > EPSILON, "Horizontal scale is too small");
    assert!(v_scale > EPSILON, "Vertical scale is too small");

    fn adjust_data(det: &Detection, left: f32, top: f32, h_scale: f32, v_scale: f32) -> Detection {
        let mut adjusted_data = det.data.clone();
        for mut row in adjusted_data.rows_mut() {
            row[0] = (row[0] - left) / h_scale;
            row[1] = (row[1] - top) / v_scale;
        }

        let (adjusted, _) = adjusted_data.into_raw_vec_and_offset();

        Detection::new(adjusted, det.score)
    }

    detections
        .into_iter()
        .map(|detection| adjust_data(&detection, left as f32, top as f32, h_scale as f32, v_scale as f32))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use opencv::core::CV_8UC3;

    #[test]
    fn test_sigmoid() {
        assert!((sigmoid(0.0) - 0.5).abs() < 1e-6);
        assert!(sigmoid(80.0) > 0.999);
        assert!(sigmoid(-80.0) < 0.001);
    }

    #[test]
    fn test_letterbox_removal_identity() {
        let det = Detection::new(vec![0.1, 0.2, 0.3, 0.4], 0.9);
        let out = detection_letterbox_removal(vec![det], (0.0, 0.0, 0.0, 0.0));
        let bbox = out[0].bbox();
        assert!((bbox.xmin - 0.1).abs() < 1e-6);
        assert!((bbox.ymax - 0.4).abs() < 1e-6);
    }

    #[test]
    fn test_letterbox_removal_vertical_padding() {
        // 25% padding top and bottom: y coordinates stretch by 2x around the band
        let det = Detection::new(vec![0.25, 0.35, 0.5, 0.55], 0.9);
        let out = detection_letterbox_removal(vec![det], (0.0, 0.25, 0.0, 0.25));
        let bbox = out[0].bbox();
        assert!((bbox.xmin - 0.25).abs() < 1e-6);
        assert!((bbox.ymin - 0.2).abs() < 1e-6);
        assert!((bbox.ymax - 0.6).abs() < 1e-6);
    }

    #[test]
    fn test_image_to_tensor_letterbox() {
        let image =
            Mat::new_rows_cols_with_default(100, 200, CV_8UC3, Scalar::all(255.0)).unwrap();
        let tensor = image_to_tensor(&image, (128, 128), true, (-1.0, 1.0)).unwrap();

        assert_eq!(tensor.tensor_data.shape(), &[128, 128, 3]);
        assert_eq!(tensor.original_size, (200, 100));

        // landscape input: padding on top and bottom only
        let (left, top, right, bottom) = tensor.padding;
        assert_eq!(left, 0.0);
        assert_eq!(right, 0.0);
        assert!(top > 0.0 && bottom > 0.0);

        // white pixels map to 1.0, letterbox border to -1.0
        assert!((tensor.tensor_data[[64, 64, 0]] - 1.0).abs() < 1e-4);
        assert!((tensor.tensor_data[[0, 64, 0]] + 1.0).abs() < 1e-4);
    }
}
