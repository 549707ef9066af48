use crate::age_gender_lite::crop::{expand_box, prepare_batch, CropRegion};
use crate::age_gender_lite::estimator::{decode_predictions, AgeGenderEstimator, Prediction};
use crate::age_gender_lite::face_detection::FaceDetector;
use crate::age_gender_lite::types::BBox;
use anyhow::Error;
use log::debug;
use opencv::core::Mat;
use opencv::prelude::*;

/// Terminal state of a single image's processing.
#[derive(Debug, Clone)]
pub enum Outcome {
    NoFace,
    Single(Prediction),
    Multiple(usize),
}

/// Result of processing one image: the unexpanded detection boxes in pixel
/// coordinates (for visualization) and the decision outcome.
#[derive(Debug, Clone)]
pub struct ImageReport {
    pub boxes: Vec<BBox>,
    pub regions: Vec<CropRegion>,
    pub outcome: Outcome,
}

/// Run the full detect -> expand -> estimate pipeline on one RGB image.
///
/// Face crops are prepared for every detection, but the estimator is only
/// consulted when exactly one face was found; multi-face batches are
/// discarded. This mirrors the tool's stated single-face scope and is a
/// documented policy limitation, not a failure path.
pub fn process_image(
    detector: &dyn FaceDetector, estimator: &dyn AgeGenderEstimator, image: &Mat,
) -> Result<ImageReport, Error> {
    let img_shape = image.size()?;
    let image_size = (img_shape.width, img_shape.height);

    let detected = detector.detect(image)?;
    debug!("{} face(s) detected", detected.len());

    let boxes: Vec<BBox> = detected
        .iter()
        .map(|detection| detection.bbox().absolute(image_size))
        .collect();

    let regions: Vec<CropRegion> = boxes
        .iter()
        .map(|bbox| expand_box(bbox, image_size))
        .collect();

    let faces = prepare_batch(image, &regions)?;

    let outcome = match detected.len() {
        0 => Outcome::NoFace,
        1 => {
            let output = estimator.estimate(&faces)?;
            let predictions = decode_predictions(&output);
            Outcome::Single(predictions[0])
        }
        n => Outcome::Multiple(n),
    };

    Ok(ImageReport { boxes, regions, outcome })
}

/// Format the one-line console output for a processed image.
pub fn format_report(path: &str, report: &ImageReport) -> String {
    match &report.outcome {
        Outcome::NoFace => "no faces detected... skipping".to_string(),
        Outcome::Multiple(_) => "multiple faces detected... not supported yet".to_string(),
        Outcome::Single(prediction) => format!(
            "{} est:{} {} debug:{} {}",
            path,
            prediction.age_years(),
            prediction.gender_label(),
            prediction.p_female,
            prediction.p_male,
        ),
    }
}
