pub mod types;
pub mod transform;
pub mod nms;
pub mod face_detection;
pub mod crop;
pub mod estimator;
pub mod pipeline;
pub mod render;
pub mod utils;
