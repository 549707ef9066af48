use crate::age_gender_lite::nms::non_maximum_suppression;
use crate::age_gender_lite::transform::{detection_letterbox_removal, image_to_tensor, sigmoid};
use crate::age_gender_lite::types::Detection;
use anyhow::Error;
use log::debug;
use ndarray::{Array1, Array2, Array3, Axis};
use opencv::core::Mat;
use std::path::PathBuf;
use tflite::ops::builtin::BuiltinOpResolver;
use tflite::{FlatBufferModel, InterpreterBuilder};

/// Face detection model as used by Google MediaPipe (BlazeFace).
///
/// Model cards:
///
/// ```text
/// https://mediapipe.page.link/blazeface-mc
/// https://mediapipe.page.link/blazeface-back-mc
/// ```
///
/// Reference:
///
/// ```text
/// BlazeFace: Sub-millisecond Neural Face Detection
/// on Mobile GPUs, CVPR Workshop on Computer Vision
/// for Augmented and Virtual Reality, Long Beach,
/// CA, USA, 2019
/// ```

const MODEL_NAME_BACK: &str = "face_detection_back.tflite";
const MODEL_NAME_FRONT: &str = "face_detection_front.tflite";
const MODEL_NAME_SHORT: &str = "face_detection_short_range.tflite";
const MODEL_NAME_FULL: &str = "face_detection_full_range.tflite";
const MODEL_NAME_FULL_SPARSE: &str = "face_detection_full_range_sparse.tflite";

const DEFAULT_MODEL_DIR: &str = "models";

/// score limit is 100 in mediapipe and leads to overflows with IEEE 754 floats
/// this lower limit is safe for use with the sigmoid functions and float32
const RAW_SCORE_LIMIT: f32 = 80.0;

/// threshold for confidence scores
const MIN_SCORE: f32 = 0.5;

/// NMS similarity threshold
const MIN_SUPPRESSION_THRESHOLD: f32 = 0.3;

pub struct SSDOptions {
    pub num_layers: i32,
    pub input_size_height: i32,
    pub input_size_width: i32,
    pub anchor_offset_x: f32,
    pub anchor_offset_y: f32,
    pub strides: Vec<i32>,
    pub interpolated_scale_aspect_ratio: f32,
}

impl SSDOptions {
    pub fn new_front() -> Self {
        Self {
            num_layers: 4,
            input_size_height: 128,
            input_size_width: 128,
            anchor_offset_x: 0.5,
            anchor_offset_y: 0.5,
            strides: vec![8, 16, 16, 16],
            interpolated_scale_aspect_ratio: 1.0,
        }
    }

    pub fn new_back() -> Self {
        Self {
            num_layers: 4,
            input_size_height: 256,
            input_size_width: 256,
            anchor_offset_x: 0.5,
            anchor_offset_y: 0.5,
            strides: vec![16, 32, 32, 32],
            interpolated_scale_aspect_ratio: 1.0,
        }
    }

    pub fn new_short() -> Self {
        Self {
            num_layers: 4,
            input_size_height: 128,
            input_size_width: 128,
            anchor_offset_x: 0.5,
            anchor_offset_y: 0.5,
            strides: vec![8, 16, 16, 16],
            interpolated_scale_aspect_ratio: 1.0,
        }
    }

    pub fn new_full() -> Self {
        Self {
            num_layers: 1,
            input_size_height: 192,
            input_size_width: 192,
            anchor_offset_x: 0.5,
            anchor_offset_y: 0.5,
            strides: vec![4, 0, 0, 0],
            interpolated_scale_aspect_ratio: 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FaceDetectionModel {
    FrontCamera = 0,
    BackCamera = 1,
    Short = 2,
    Full = 3,
    FullSparse = 4,
}

/// Capability interface for a face detector.
///
/// Implement this to substitute an alternative detector (or a test double)
/// without touching the processing pipeline.
pub trait FaceDetector {
    /// Detect faces in an RGB image and return detections in coordinates
    /// normalized to the image, i.e. values ranging from [0, 1].
    fn detect(&self, image: &Mat) -> Result<Vec<Detection>, Error>;
}

pub struct FaceDetection {
    model_path: PathBuf,
    model: FlatBufferModel,
    anchors: Array2<f32>,
}

impl FaceDetection {
    /// Load a face detection model from `model_dir` (defaults to `models/`).
    pub fn new(model_type: FaceDetectionModel, model_dir: Option<String>) -> Result<FaceDetection, Error> {
        let mut model_path_buf = PathBuf::from(model_dir.unwrap_or_else(|| DEFAULT_MODEL_DIR.to_string()));

        let ssd_opts = match model_type {
            FaceDetectionModel::FrontCamera => {
                model_path_buf.push(MODEL_NAME_FRONT);
                SSDOptions::new_front()
            }
            FaceDetectionModel::BackCamera => {
                model_path_buf.push(MODEL_NAME_BACK);
                SSDOptions::new_back()
            }
            FaceDetectionModel::Short => {
                model_path_buf.push(MODEL_NAME_SHORT);
                SSDOptions::new_short()
            }
            FaceDetectionModel::Full => {
                model_path_buf.push(MODEL_NAME_FULL);
                SSDOptions::new_full()
            }
            FaceDetectionModel::FullSparse => {
                model_path_buf.push(MODEL_NAME_FULL_SPARSE);
                SSDOptions::new_full()
            }
        };

        debug!("loading face detection model from {:?}", model_path_buf.as_path());

        let model = FlatBufferModel::build_from_file(model_path_buf.clone())?;
        let anchors = ssd_generate_anchors(&ssd_opts);

        Ok(FaceDetection {
            model_path: model_path_buf,
            model,
            anchors,
        })
    }

    pub fn model_path(&self) -> &PathBuf {
        &self.model_path
    }

    /// Run inference and return detections from a given image
    /// * Args:
    ///     - image (`Mat`): RGB image.
    ///
    /// * Returns:
    ///     - (`Vec<Detection>`) List of face detections in normalised coordinates
    ///       relative to the input image, i.e. values ranging from [0, 1].
    pub fn infer(&self, image: &Mat) -> Result<Vec<Detection>, Error> {
        let resolver = BuiltinOpResolver::default();
        let builder = InterpreterBuilder::new(&self.model, &resolver)?;
        let mut interpreter = builder.build()?;
        interpreter.allocate_tensors()?;

        let input_details = interpreter.get_input_details()?;
        let input_shape = input_details[0].dims.clone();
        let (height, width) = (input_shape[1], input_shape[2]);

        let image_data = image_to_tensor(image, (width as i32, height as i32), true, (-1.0, 1.0))?;

        let input_data = image_data
            .tensor_data
            .clone()
            .into_dimensionality::<ndarray::IxDyn>()?
            .insert_axis(Axis(0));

        // Infer model with input data
        let inputs = interpreter.inputs().to_vec();
        let input_index = inputs[0];
        let sub_tensor: Vec<f32> = input_data.into_iter().collect();
        interpreter
            .tensor_data_mut(input_index)?
            .copy_from_slice(&sub_tensor);
        interpreter.invoke()?;

        // retrieve outputs
        let outputs = interpreter.outputs().to_vec();
        let (bbox_index, score_index) = (outputs[0], outputs[1]);

        let bbox_info = interpreter
            .tensor_info(bbox_index)
            .ok_or(Error::msg("missing raw box outputs info"))?;
        let score_info = interpreter
            .tensor_info(score_index)
            .ok_or(Error::msg("missing raw score outputs info"))?;

        let raw_boxes_s: &[f32] = interpreter.tensor_data(bbox_index)?;
        let raw_boxes: Array3<f32> = Array3::from_shape_vec(
            (bbox_info.dims[0], bbox_info.dims[1], bbox_info.dims[2]),
            raw_boxes_s.to_vec(),
        )?;

        let raw_scores_s: &[f32] = interpreter.tensor_data(score_index)?;
        let raw_scores: Array1<f32> = Array1::from_vec(raw_scores_s.to_vec());

        let scale = height as f32;
        let boxes = decode_boxes(&raw_boxes, &self.anchors, scale)?;
        let scores = raw_scores_to_probabilities(raw_scores);
        let detections = convert_to_detections(&boxes, &scores);

        let pruned = non_maximum_suppression(detections, MIN_SUPPRESSION_THRESHOLD, Some(MIN_SCORE), true);
        Ok(detection_letterbox_removal(pruned, image_data.padding))
    }
}

impl FaceDetector for FaceDetection {
    fn detect(&self, image: &Mat) -> Result<Vec<Detection>, Error> {
        self.infer(image)
    }
}

/// Convert raw SSD box regressions into normalized boxes and keypoints.
///
/// Row 0 of each decoded box holds `(xmin, ymin)`, row 1 `(xmax, ymax)`;
/// any remaining rows are keypoints anchored like the box center.
fn decode_boxes(raw_boxes: &Array3<f32>, anchors: &Array2<f32>, scale: f32) -> Result<Array3<f32>, Error> {
    let shape = raw_boxes.shape();
    let num_boxes = shape[1];
    let num_points = shape[2] / 2;

    if anchors.nrows() != num_boxes {
        return Err(Error::msg(format!(
            "incompatible model: {} boxes but {} anchors",
            num_boxes,
            anchors.nrows()
        )));
    }

    let mut boxes = raw_boxes.to_shape((num_boxes, num_points, 2))?.to_owned();
    boxes /= scale;

    for (i, mut points) in boxes.outer_iter_mut().enumerate() {
        let (ax, ay) = (anchors[[i, 0]], anchors[[i, 1]]);

        // center and keypoints are relative to the anchor; size is not
        points[[0, 0]] += ax;
        points[[0, 1]] += ay;
        for p in 2..num_points {
            points[[p, 0]] += ax;
            points[[p, 1]] += ay;
        }

        // convert x_center, y_center, w, h to xmin, ymin, xmax, ymax
        let (cx, cy) = (points[[0, 0]], points[[0, 1]]);
        let (half_w, half_h) = (points[[1, 0]] / 2.0, points[[1, 1]] / 2.0);
        points[[0, 0]] = cx - half_w;
        points[[0, 1]] = cy - half_h;
        points[[1, 0]] = cx + half_w;
        points[[1, 1]] = cy + half_h;
    }

    Ok(boxes)
}

/// Clamp raw scores and apply the sigmoid to obtain confidence values.
fn raw_scores_to_probabilities(mut raw_scores: Array1<f32>) -> Array1<f32> {
    raw_scores.mapv_inplace(|v| sigmoid(v.clamp(-RAW_SCORE_LIMIT, RAW_SCORE_LIMIT)));
    raw_scores
}

fn convert_to_detections(boxes: &Array3<f32>, scores: &Array1<f32>) -> Vec<Detection> {
    boxes
        .outer_iter()
        .zip(scores.iter())
        .filter(|(_, &score)| score > MIN_SCORE)
        .map(|(points, &score)| {
            let (data, _) = points.to_owned().into_raw_vec_and_offset();
            Detection::new(data, score)
        })
        .collect()
}

fn ssd_generate_anchors(opts: &SSDOptions) -> Array2<f32> {
    let mut layer_id = 0;
    let num_layers = opts.num_layers;
    let strides = &opts.strides;
    let input_height = opts.input_size_height;
    let input_width = opts.input_size_width;
    let anchor_offset_x = opts.anchor_offset_x;
    let anchor_offset_y = opts.anchor_offset_y;
    let interpolated_scale_aspect_ratio = opts.interpolated_scale_aspect_ratio;

    let mut anchors = Vec::new();

    while layer_id < num_layers {
        let mut last_same_stride_layer = layer_id;
        let mut repeats = 0;

        while last_same_stride_layer < num_layers
            && strides[last_same_stride_layer as usize] == strides[layer_id as usize]
        {
            last_same_stride_layer += 1;
            // aspect_ratios are added twice per iteration
            repeats += if interpolated_scale_aspect_ratio == 1.0 { 2 } else { 1 };
        }

        let stride = strides[layer_id as usize];
        let feature_map_height = input_height / stride;
        let feature_map_width = input_width / stride;

        for y in 0..feature_map_height {
            let y_center = (y as f32 + anchor_offset_y) / feature_map_height as f32;
            for x in 0..feature_map_width {
                let x_center = (x as f32 + anchor_offset_x) / feature_map_width as f32;
                for _ in 0..repeats {
                    anchors.push((x_center, y_center));
                }
            }
        }

        layer_id = last_same_stride_layer;
    }

    let num_anchors = anchors.len();
    let mut anchors_array = Array2::<f32>::zeros((num_anchors, 2));

    for (i, (x, y)) in anchors.into_iter().enumerate() {
        anchors_array[[i, 0]] = x;
        anchors_array[[i, 1]] = y;
    }

    anchors_array
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_anchor_counts() {
        // values from the corresponding mediapipe graph configs
        assert_eq!(ssd_generate_anchors(&SSDOptions::new_front()).nrows(), 896);
        assert_eq!(ssd_generate_anchors(&SSDOptions::new_back()).nrows(), 896);
        assert_eq!(ssd_generate_anchors(&SSDOptions::new_full()).nrows(), 2304);
    }

    #[test]
    fn test_decode_boxes_applies_anchor_and_scale() {
        // single box: center (16, 32), size (64, 64), one keypoint at (48, 48)
        let raw = Array3::from_shape_vec((1, 1, 6), vec![16.0, 32.0, 64.0, 64.0, 48.0, 48.0]).unwrap();
        let anchors = Array2::from_shape_vec((1, 2), vec![0.5, 0.5]).unwrap();

        let boxes = decode_boxes(&raw, &anchors, 128.0).unwrap();

        // center = 0.5 + 16/128 = 0.625, 0.5 + 32/128 = 0.75; half size = 0.25
        assert!((boxes[[0, 0, 0]] - 0.375).abs() < 1e-6);
        assert!((boxes[[0, 0, 1]] - 0.5).abs() < 1e-6);
        assert!((boxes[[0, 1, 0]] - 0.875).abs() < 1e-6);
        assert!((boxes[[0, 1, 1]] - 1.0).abs() < 1e-6);

        // keypoint = anchor + raw / scale
        assert!((boxes[[0, 2, 0]] - 0.875).abs() < 1e-6);
        assert!((boxes[[0, 2, 1]] - 0.875).abs() < 1e-6);
    }

    #[test]
    fn test_anchor_mismatch_is_rejected() {
        let raw = Array3::from_shape_vec((1, 2, 4), vec![0.0; 8]).unwrap();
        let anchors = Array2::from_shape_vec((1, 2), vec![0.5, 0.5]).unwrap();
        assert!(decode_boxes(&raw, &anchors, 128.0).is_err());
    }

    #[test]
    fn test_raw_score_clamping() {
        let raw = Array1::from_vec(vec![1000.0, -1000.0, 0.0]);
        let probs = raw_scores_to_probabilities(raw);
        assert!(probs[0] > 0.999 && probs[0] <= 1.0);
        assert!(probs[1] < 0.001 && probs[1] >= 0.0);
        assert!((probs[2] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_convert_to_detections_filters_by_score() {
        let boxes = Array3::from_shape_vec(
            (2, 2, 2),
            vec![0.1, 0.1, 0.3, 0.3, 0.5, 0.5, 0.7, 0.7],
        )
        .unwrap();
        let scores = Array1::from_vec(vec![0.9, 0.1]);

        let detections = convert_to_detections(&boxes, &scores);
        assert_eq!(detections.len(), 1);
        assert!((detections[0].score - 0.9).abs() < 1e-6);
        assert!((detections[0].bbox().xmax - 0.3).abs() < 1e-6);
    }
}
