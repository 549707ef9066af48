use anyhow::Error;
use log::debug;
use ndarray::{Array2, Array4, ArrayView1, Axis};
use std::path::PathBuf;
use tflite::ops::builtin::BuiltinOpResolver;
use tflite::{FlatBufferModel, InterpreterBuilder};

/// Age and gender estimation model (WideResNet).
///
/// Reference:
///
/// ```text
/// Wide Residual Networks, BMVC 2016
/// ```
///
/// The network consumes 64x64x3 face crops with raw [0, 255] pixel values
/// and produces a two-class gender distribution together with a
/// distribution over 101 discrete age bins.

/// Number of discrete age bins (ages 0 through 100).
pub const AGE_BINS: usize = 101;

/// Number of gender classes (female, male).
pub const GENDER_CLASSES: usize = 2;

/// Raw model outputs for a batch of face crops.
#[derive(Debug, Clone)]
pub struct EstimatorOutput {
    /// Per-face gender probabilities, shape (N, 2): `[P(female), P(male)]`.
    pub gender_probs: Array2<f32>,
    /// Per-face age-bin probabilities, shape (N, 101).
    pub age_probs: Array2<f32>,
}

/// Capability interface for an age/gender estimator.
///
/// Implement this to substitute an alternative model (or a test double)
/// without touching the processing pipeline.
pub trait AgeGenderEstimator {
    /// Run the model on a batch of (N, 64, 64, 3) face crops.
    fn estimate(&self, faces: &Array4<f32>) -> Result<EstimatorOutput, Error>;
}

pub struct WideResNet {
    weight_path: PathBuf,
    model: FlatBufferModel,
    depth: i32,
    width: i32,
}

impl WideResNet {
    /// Load the estimation network from a weight file.
    ///
    /// `depth` and `width` are the WideResNet hyperparameters the weights
    /// were trained with; the architecture itself is baked into the weight
    /// file and the values are kept for diagnostics only.
    pub fn new(weight_file: PathBuf, depth: i32, width: i32) -> Result<WideResNet, Error> {
        debug!("loading WideResNet-{}-{} weights from {:?}", depth, width, weight_file.as_path());

        let model = FlatBufferModel::build_from_file(weight_file.clone())?;

        Ok(WideResNet {
            weight_path: weight_file,
            model,
            depth,
            width,
        })
    }

    pub fn weight_path(&self) -> &PathBuf {
        &self.weight_path
    }

    pub fn hyperparameters(&self) -> (i32, i32) {
        (self.depth, self.width)
    }

    /// Run a single 64x64x3 crop through the interpreter.
    fn infer_one(&self, face: ArrayView1<f32>) -> Result<(Vec<f32>, Vec<f32>), Error> {
        let resolver = BuiltinOpResolver::default();
        let builder = InterpreterBuilder::new(&self.model, &resolver)?;
        let mut interpreter = builder.build()?;
        interpreter.allocate_tensors()?;

        let inputs = interpreter.inputs().to_vec();
        let input_index = inputs[0];
        let face_data: Vec<f32> = face.iter().copied().collect();
        interpreter
            .tensor_data_mut(input_index)?
            .copy_from_slice(&face_data);
        interpreter.invoke()?;

        let outputs = interpreter.outputs().to_vec();
        let (gender_index, age_index) = (outputs[0], outputs[1]);

        let gender_info = interpreter
            .tensor_info(gender_index)
            .ok_or(Error::msg("missing gender outputs info"))?;
        let age_info = interpreter
            .tensor_info(age_index)
            .ok_or(Error::msg("missing age outputs info"))?;

        if gender_info.dims[gender_info.dims.len() - 1] != GENDER_CLASSES {
            return Err(Error::msg(format!("incompatible model: {:?} != {:?}", gender_info.dims, GENDER_CLASSES)));
        }
        if age_info.dims[age_info.dims.len() - 1] != AGE_BINS {
            return Err(Error::msg(format!("incompatible model: {:?} != {:?}", age_info.dims, AGE_BINS)));
        }

        let gender: &[f32] = interpreter.tensor_data(gender_index)?;
        let age: &[f32] = interpreter.tensor_data(age_index)?;

        Ok((gender.to_vec(), age.to_vec()))
    }
}

impl AgeGenderEstimator for WideResNet {
    /// The interpreter runs with a fixed batch of one, so the input batch
    /// is fed through face by face and the outputs are reassembled.
    fn estimate(&self, faces: &Array4<f32>) -> Result<EstimatorOutput, Error> {
        let num_faces = faces.shape()[0];
        let mut gender_probs = Array2::<f32>::zeros((num_faces, GENDER_CLASSES));
        let mut age_probs = Array2::<f32>::zeros((num_faces, AGE_BINS));

        for (i, face) in faces.axis_iter(Axis(0)).enumerate() {
            let flat = face.to_owned().into_shape_with_order(face.len())?;
            let (gender, age) = self.infer_one(flat.view())?;

            gender_probs.row_mut(i).assign(&ndarray::arr1(&gender));
            age_probs.row_mut(i).assign(&ndarray::arr1(&age));
        }

        Ok(EstimatorOutput { gender_probs, age_probs })
    }
}

/// A single face's decoded prediction.
#[derive(Debug, Clone, Copy)]
pub struct Prediction {
    pub p_female: f32,
    pub p_male: f32,
    pub age: f64,
}

impl Prediction {
    /// "F" if P(female) > 0.5, "M" otherwise. The 0.5 boundary is male.
    pub fn gender_label(&self) -> &'static str {
        gender_label(self.p_female)
    }

    /// Age estimate truncated to whole years.
    pub fn age_years(&self) -> i32 {
        self.age as i32
    }
}

/// Expectation of the age distribution: sum of bin index times bin probability.
pub fn expected_age(age_probs: ArrayView1<f32>) -> f64 {
    age_probs
        .iter()
        .enumerate()
        .map(|(age, &p)| age as f64 * p as f64)
        .sum()
}

pub fn gender_label(p_female: f32) -> &'static str {
    if p_female > 0.5 {
        "F"
    } else {
        "M"
    }
}

/// Decode raw model outputs into one [`Prediction`] per face.
pub fn decode_predictions(output: &EstimatorOutput) -> Vec<Prediction> {
    output
        .gender_probs
        .axis_iter(Axis(0))
        .zip(output.age_probs.axis_iter(Axis(0)))
        .map(|(gender, age)| Prediction {
            p_female: gender[0],
            p_male: gender[1],
            age: expected_age(age),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array1;

    #[test]
    fn test_expected_age_uniform() {
        let probs = Array1::from_elem(AGE_BINS, 1.0 / AGE_BINS as f32);
        let age = expected_age(probs.view());
        assert!((age - 50.0).abs() < 1e-3);
    }

    #[test]
    fn test_expected_age_delta() {
        let mut probs = Array1::zeros(AGE_BINS);
        probs[30] = 1.0;
        assert!((expected_age(probs.view()) - 30.0).abs() < 1e-6);
    }

    #[test]
    fn test_expected_age_in_range() {
        let mut probs = Array1::zeros(AGE_BINS);
        probs[0] = 0.5;
        probs[100] = 0.5;
        let age = expected_age(probs.view());
        assert!((0.0..=100.0).contains(&age));
    }

    #[test]
    fn test_gender_boundary_is_male() {
        assert_eq!(gender_label(0.5), "M");
        assert_eq!(gender_label(0.5000001), "F");
        assert_eq!(gender_label(0.2), "M");
    }

    #[test]
    fn test_decode_predictions() {
        let gender_probs = Array2::from_shape_vec((1, 2), vec![0.8, 0.2]).unwrap();
        let mut age_probs = Array2::zeros((1, AGE_BINS));
        age_probs[[0, 42]] = 1.0;

        let predictions = decode_predictions(&EstimatorOutput { gender_probs, age_probs });
        assert_eq!(predictions.len(), 1);
        assert_eq!(predictions[0].gender_label(), "F");
        assert_eq!(predictions[0].age_years(), 42);
        assert!((predictions[0].p_male - 0.2).abs() < 1e-6);
    }
}
