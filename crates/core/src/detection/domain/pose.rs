use serde::{Deserialize, Serialize};

/// A body landmark: normalized position, relative depth, and visibility.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Keypoint {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub visibility: f64,
}

impl Keypoint {
    pub fn new(x: f64, y: f64, z: f64, visibility: f64) -> Self {
        Self {
            x,
            y,
            z,
            visibility,
        }
    }

    pub fn distance_to(&self, x: f64, y: f64) -> f64 {
        ((self.x - x).powi(2) + (self.y - y).powi(2)).sqrt()
    }
}

/// One detection as returned by the pose model, before any derivation.
#[derive(Clone, Debug, PartialEq)]
pub struct RawPose {
    pub keypoints: Vec<Keypoint>,
}

impl RawPose {
    pub fn new(keypoints: Vec<Keypoint>) -> Self {
        Self { keypoints }
    }
}

/// Axis-aligned box around all keypoints, in normalized frame coordinates.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x_min: f64,
    pub y_min: f64,
    pub x_max: f64,
    pub y_max: f64,
    pub width: f64,
    pub height: f64,
    pub center_x: f64,
    pub center_y: f64,
}

impl BoundingBox {
    pub fn from_corners(x_min: f64, y_min: f64, x_max: f64, y_max: f64) -> Self {
        Self {
            x_min,
            y_min,
            x_max,
            y_max,
            width: x_max - x_min,
            height: y_max - y_min,
            center_x: (x_min + x_max) / 2.0,
            center_y: (y_min + y_max) / 2.0,
        }
    }

    fn enclosing(keypoints: &[Keypoint]) -> Option<Self> {
        let first = keypoints.first()?;
        let (mut x_min, mut y_min, mut x_max, mut y_max) = (first.x, first.y, first.x, first.y);
        for kp in &keypoints[1..] {
            x_min = x_min.min(kp.x);
            y_min = y_min.min(kp.y);
            x_max = x_max.max(kp.x);
            y_max = y_max.max(kp.y);
        }
        Some(Self::from_corners(x_min, y_min, x_max, y_max))
    }

    /// Inclusive containment test.
    pub fn contains(&self, x: f64, y: f64) -> bool {
        self.x_min <= x && x <= self.x_max && self.y_min <= y && y <= self.y_max
    }

    pub fn diagonal(&self) -> f64 {
        (self.width.powi(2) + self.height.powi(2)).sqrt()
    }

    /// The same box in pixel space of a `width` x `height` frame.
    pub fn to_pixels(&self, width: u32, height: u32) -> PixelBox {
        let (w, h) = (width as f64, height as f64);
        PixelBox {
            x_min: self.x_min * w,
            y_min: self.y_min * h,
            x_max: self.x_max * w,
            y_max: self.y_max * h,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PixelBox {
    pub x_min: f64,
    pub y_min: f64,
    pub x_max: f64,
    pub y_max: f64,
}

/// One detected person with its derived geometry.
///
/// Immutable once built: everything derived is computed at construction.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PoseCandidate {
    #[serde(rename = "landmarks")]
    keypoints: Vec<Keypoint>,
    bbox: BoundingBox,
    visibility_score: f64,
}

impl PoseCandidate {
    /// Returns `None` for a pose without keypoints, which carries no geometry.
    pub fn from_raw(raw: RawPose) -> Option<Self> {
        let bbox = BoundingBox::enclosing(&raw.keypoints)?;
        let visibility_score =
            raw.keypoints.iter().map(|k| k.visibility).sum::<f64>() / raw.keypoints.len() as f64;
        Some(Self {
            keypoints: raw.keypoints,
            bbox,
            visibility_score,
        })
    }

    pub fn keypoints(&self) -> &[Keypoint] {
        &self.keypoints
    }

    pub fn bbox(&self) -> &BoundingBox {
        &self.bbox
    }

    pub fn center(&self) -> (f64, f64) {
        (self.bbox.center_x, self.bbox.center_y)
    }

    pub fn visibility_score(&self) -> f64 {
        self.visibility_score
    }

    /// Mean position of keypoints whose visibility exceeds `threshold`,
    /// falling back to the bbox center when none do.
    pub fn center_of_mass(&self, threshold: f64) -> (f64, f64) {
        let (sum_x, sum_y, n) = self
            .keypoints
            .iter()
            .filter(|k| k.visibility > threshold)
            .fold((0.0, 0.0, 0usize), |(sx, sy, n), k| (sx + k.x, sy + k.y, n + 1));
        if n == 0 {
            self.center()
        } else {
            (sum_x / n as f64, sum_y / n as f64)
        }
    }
}
