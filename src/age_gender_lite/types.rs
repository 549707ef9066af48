use ndarray::{Array2, ArrayD};

#[derive(Debug, Clone)]
pub struct ImageTensor {
    /// Tensor data obtained from an image with optional letterboxing.
    pub tensor_data: ArrayD<f32>,
    /// Normalized letterbox padding (left, top, right, bottom).
    pub padding: (f64, f64, f64, f64),
    /// Original image size (width, height).
    pub original_size: (i32, i32),
}

impl ImageTensor {
    pub fn new(tensor_data: ArrayD<f32>, padding: (f64, f64, f64, f64), original_size: (i32, i32)) -> Self {
        Self {
            tensor_data,
            padding,
            original_size,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BBox {
    pub xmin: f64,
    pub ymin: f64,
    pub xmax: f64,
    pub ymax: f64,
}

impl BBox {
    /// Create a new BBox
    pub fn new(xmin: f64, ymin: f64, xmax: f64, ymax: f64) -> Self {
        Self { xmin, ymin, xmax, ymax }
    }

    /// Return the box as a tuple (xmin, ymin, xmax, ymax)
    pub fn as_tuple(&self) -> (f64, f64, f64, f64) {
        (self.xmin, self.ymin, self.xmax, self.ymax)
    }

    /// Calculate the width of the bounding box
    pub fn width(&self) -> f64 {
        self.xmax - self.xmin
    }

    /// Calculate the height of the bounding box
    pub fn height(&self) -> f64 {
        self.ymax - self.ymin
    }

    /// Check if the bounding box is empty (width or height is less than or equal to 0)
    pub fn empty(&self) -> bool {
        self.width() <= 0.0 || self.height() <= 0.0
    }

    /// Check if the bounding box coordinates are normalized (in range [0, 1])
    pub fn normalized(&self) -> bool {
        self.xmin >= -1.0 && self.xmax < 2.0 && self.ymin >= -1.0
    }

    /// Calculate the area of the bounding box
    pub fn area(&self) -> f64 {
        if self.empty() {
            0.0
        } else {
            self.width() * self.height()
        }
    }

    /// Calculate the intersection of this bounding box with another one
    pub fn intersect(&self, other: &BBox) -> Option<BBox> {
        let xmin = self.xmin.max(other.xmin);
        let ymin = self.ymin.max(other.ymin);
        let xmax = self.xmax.min(other.xmax);
        let ymax = self.ymax.min(other.ymax);

        if xmin < xmax && ymin < ymax {
            Some(BBox::new(xmin, ymin, xmax, ymax))
        } else {
            None
        }
    }

    /// Scale the bounding box by the given size
    pub fn scale(&self, size: (f64, f64)) -> BBox {
        let (sx, sy) = size;
        BBox::new(self.xmin * sx, self.ymin * sy, self.xmax * sx, self.ymax * sy)
    }

    /// Return the bounding box in absolute coordinates (if normalized)
    pub fn absolute(&self, size: (i32, i32)) -> BBox {
        if !self.normalized() {
            return *self;
        }
        self.scale((size.0 as f64, size.1 as f64))
    }
}

/// A single face detection result.
///
/// The first two rows of `data` are the bounding box corners
/// `(xmin, ymin)` and `(xmax, ymax)`; any further rows are keypoints.
/// Coordinates are normalized to the source image unless scaled.
#[derive(Debug, Clone)]
pub struct Detection {
    pub data: Array2<f32>,
    pub score: f32,
}

impl Detection {
    /// Create a new Detection
    pub fn new(data: Vec<f32>, score: f32) -> Self {
        assert!(data.len() >= 4, "Data must contain at least four elements for the bounding box");
        let shape = (data.len() / 2, 2);
        let reshaped_data: Array2<f32> = Array2::from_shape_vec(shape, data).unwrap();

        Self {
            data: reshaped_data,
            score,
        }
    }

    pub fn keypoint_count(&self) -> usize {
        self.data.nrows() - 2
    }

    /// Get keypoint by index
    pub fn keypoint(&self, key: usize) -> (f32, f32) {
        let row = self.data.row(key + 2);
        (row[0], row[1])
    }

    /// Get bounding box
    pub fn bbox(&self) -> BBox {
        let xmin = self.data[[0, 0]] as f64;
        let ymin = self.data[[0, 1]] as f64;
        let xmax = self.data[[1, 0]] as f64;
        let ymax = self.data[[1, 1]] as f64;
        BBox { xmin, ymin, xmax, ymax }
    }

    /// Return a scaled version of the bounding box and keypoints
    pub fn scaled(&self, factor: f32) -> Detection {
        let scaled_data: Array2<f32> = self.data.mapv(|val| val * factor);

        Detection {
            data: scaled_data,
            score: self.score,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detection_accessors() {
        let data = vec![0.1, 0.2, 0.3, 0.4, 0.15, 0.25, 0.35, 0.45];
        let detection = Detection::new(data, 0.85);

        assert_eq!(detection.keypoint_count(), 2);
        assert_eq!(detection.keypoint(0), (0.15, 0.25));

        let bbox = detection.bbox();
        assert!((bbox.xmin - 0.1).abs() < 1e-6);
        assert!((bbox.ymax - 0.4).abs() < 1e-6);

        let scaled = detection.scaled(2.0);
        assert!((scaled.bbox().xmax - 0.6).abs() < 1e-6);
    }

    #[test]
    fn test_bbox_intersect() {
        let a = BBox::new(0.0, 0.0, 1.0, 1.0);
        let b = BBox::new(0.5, 0.5, 1.5, 1.5);
        let inter = a.intersect(&b).unwrap();
        assert!((inter.area() - 0.25).abs() < 1e-9);

        let c = BBox::new(2.0, 2.0, 3.0, 3.0);
        assert!(a.intersect(&c).is_none());
    }

    #[test]
    fn test_bbox_absolute() {
        let b = BBox::new(0.1, 0.2, 0.5, 0.6);
        let abs = b.absolute((200, 100));
        assert!((abs.xmin - 20.0).abs() < 1e-9);
        assert!((abs.ymax - 60.0).abs() < 1e-9);
    }
}
