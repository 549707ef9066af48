use crate::age_gender_lite::types::{BBox, Detection};
use ndarray::{Array2, Zip};

/// Intersection-over-union of two boxes.
fn overlap_similarity(box1: &BBox, box2: &BBox) -> f64 {
    if let Some(intersection) = box1.intersect(box2) {
        let intersect_area = intersection.area();
        let denominator = box1.area() + box2.area() - intersect_area;
        if denominator > 0.0 {
            intersect_area / denominator
        } else {
            0.0
        }
    } else {
        0.0
    }
}

fn plain_non_maximum_suppression(
    indexed_scores: Vec<(usize, f32)>,
    detections: Vec<Detection>,
    min_suppression_threshold: f32,
    min_score: Option<f32>,
) -> Vec<Detection> {
    let mut kept_boxes: Vec<BBox> = Vec::new();
    let mut outputs: Vec<Detection> = Vec::new();

    for &(index, score) in &indexed_scores {
        // Exit loop if remaining scores are below threshold
        if let Some(min_score) = min_score {
            if score < min_score {
                break;
            }
        }

        let detection = &detections[index];
        let bbox = detection.bbox();
        let mut suppressed = false;

        for kept in &kept_boxes {
            let similarity = overlap_similarity(kept, &bbox);
            if similarity > min_suppression_threshold as f64 {
                suppressed = true;
                break;
            }
        }

        if !suppressed {
            outputs.push(detection.clone());
            kept_boxes.push(bbox);
        }
    }

    outputs
}

fn weighted_non_maximum_suppression(
    indexed_scores: Vec<(usize, f32)>,
    detections: Vec<Detection>,
    min_suppression_threshold: f32,
    min_score: Option<f32>,
) -> Vec<Detection> {
    let mut remaining_indexed_scores = indexed_scores;
    let mut remaining: Vec<(usize, f32)> = Vec::new();
    let mut candidates: Vec<(usize, f32)> = Vec::new();
    let mut outputs: Vec<Detection> = Vec::new();

    while !remaining_indexed_scores.is_empty() {
        let detection = &detections[remaining_indexed_scores[0].0];

        // Exit loop if remaining scores are below threshold
        if let Some(min_score) = min_score {
            if detection.score < min_score {
                break;
            }
        }

        let num_prev_indexed_scores = remaining_indexed_scores.len();
        let detection_bbox = detection.bbox();
        remaining.clear();
        candidates.clear();
        let mut weighted_detection = detection.clone();

        for &(index, score) in &remaining_indexed_scores {
            let remaining_bbox = detections[index].bbox();
            let similarity = overlap_similarity(&remaining_bbox, &detection_bbox);

            if similarity > min_suppression_threshold as f64 {
                candidates.push((index, score));
            } else {
                remaining.push((index, score));
            }
        }

        // Weighted merging of similar (close) boxes
        if !candidates.is_empty() {
            let num_features = detection.data.nrows();
            let mut weighted = Array2::<f32>::zeros((num_features, 2));
            let mut total_score = 0.0;

            for &(index, score) in &candidates {
                total_score += score;

                Zip::from(&mut weighted)
                    .and(&detections[index].data)
                    .for_each(|w, &d| {
                        *w += d * score;
                    });
            }

            weighted /= total_score;
            let (w_det, _) = weighted.into_raw_vec_and_offset();

            weighted_detection = Detection::new(w_det, detection.score);
        }

        outputs.push(weighted_detection);

        // Exit the loop if the number of indexed scores didn't change
        if num_prev_indexed_scores == remaining.len() {
            break;
        }

        remaining_indexed_scores = remaining.clone();
    }

    outputs
}

/// Suppress overlapping detections, keeping the highest-scoring boxes.
/// With `weighted` set, overlapping boxes are merged into a score-weighted
/// average instead of being dropped.
pub fn non_maximum_suppression(
    detections: Vec<Detection>,
    min_suppression_threshold: f32,
    min_score: Option<f32>,
    weighted: bool,
) -> Vec<Detection> {
    let mut scores: Vec<(usize, f32)> = detections
        .iter()
        .enumerate()
        .map(|(n, detection)| (n, detection.score))
        .collect();

    // Sort scores in descending order
    scores.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap());

    if weighted {
        weighted_non_maximum_suppression(scores, detections, min_suppression_threshold, min_score)
    } else {
        plain_non_maximum_suppression(scores, detections, min_suppression_threshold, min_score)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn boxed(xmin: f32, ymin: f32, xmax: f32, ymax: f32, score: f32) -> Detection {
        Detection::new(vec![xmin, ymin, xmax, ymax], score)
    }

    #[test]
    fn test_overlapping_boxes_are_suppressed() {
        let detections = vec![
            boxed(0.1, 0.1, 0.5, 0.5, 0.9),
            boxed(0.12, 0.12, 0.52, 0.52, 0.6),
            boxed(0.7, 0.7, 0.9, 0.9, 0.8),
        ];

        let out = non_maximum_suppression(detections, 0.3, Some(0.5), false);
        assert_eq!(out.len(), 2);
        assert!((out[0].score - 0.9).abs() < 1e-6);
        assert!((out[1].score - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_min_score_filters_detections() {
        let detections = vec![boxed(0.1, 0.1, 0.5, 0.5, 0.2)];
        let out = non_maximum_suppression(detections, 0.3, Some(0.5), false);
        assert!(out.is_empty());
    }

    #[test]
    fn test_weighted_merge_averages_boxes() {
        let detections = vec![
            boxed(0.0, 0.0, 0.4, 0.4, 0.5),
            boxed(0.1, 0.1, 0.5, 0.5, 0.5),
        ];

        let out = non_maximum_suppression(detections, 0.3, None, true);
        assert_eq!(out.len(), 1);

        let bbox = out[0].bbox();
        assert!((bbox.xmin - 0.05).abs() < 1e-6);
        assert!((bbox.xmax - 0.45).abs() < 1e-6);
    }
}
