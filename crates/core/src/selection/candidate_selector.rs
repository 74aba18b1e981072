use serde::Serialize;

use crate::detection::domain::pose::PoseCandidate;
use crate::shared::request::ClickPoint;

/// Keypoints at or below this visibility are ignored when measuring the
/// distance from the click to the nearest keypoint.
const KEYPOINT_VISIBILITY: f64 = 0.5;

/// Weight of visibility alone in the pose score; the rest scales with size.
const VISIBILITY_BASE_WEIGHT: f64 = 0.7;
const SIZE_WEIGHT: f64 = 0.3;

/// The chosen candidate and the measurements that chose it.
///
/// Distances are in normalized frame units.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SelectionResult {
    pub index: usize,
    pub center_distance: f64,
    pub keypoint_distance: Option<f64>,
    pub inside_bbox: bool,
    /// Visibility/size score for a bbox hit, distance-weighted score otherwise.
    pub score: f64,
}

struct Measurement {
    center_distance: f64,
    keypoint_distance: Option<f64>,
    inside_bbox: bool,
    pose_score: f64,
}

impl Measurement {
    fn of(candidate: &PoseCandidate, x: f64, y: f64) -> Self {
        let (cx, cy) = candidate.center();
        let center_distance = ((cx - x).powi(2) + (cy - y).powi(2)).sqrt();
        let keypoint_distance = candidate
            .keypoints()
            .iter()
            .filter(|k| k.visibility > KEYPOINT_VISIBILITY)
            .map(|k| k.distance_to(x, y))
            .min_by(f64::total_cmp);
        let bbox = candidate.bbox();
        let pose_score = candidate.visibility_score()
            * (VISIBILITY_BASE_WEIGHT + bbox.diagonal() * SIZE_WEIGHT);
        Self {
            center_distance,
            keypoint_distance,
            inside_bbox: bbox.contains(x, y),
            pose_score,
        }
    }

    fn distance_score(&self) -> f64 {
        let nearest = self
            .keypoint_distance
            .map_or(self.center_distance, |d| d.min(self.center_distance));
        nearest * (1.0 - self.pose_score)
    }

    fn into_result(self, index: usize, score: f64) -> SelectionResult {
        SelectionResult {
            index,
            center_distance: self.center_distance,
            keypoint_distance: self.keypoint_distance,
            inside_bbox: self.inside_bbox,
            score,
        }
    }
}

/// Picks the candidate a click refers to.
///
/// Candidates whose bounding box contains the click win outright, the
/// highest pose score among them first. Otherwise the lowest
/// distance-weighted score wins. Ties keep the earlier candidate.
pub fn select(
    candidates: &[PoseCandidate],
    click: Option<ClickPoint>,
    frame_width: u32,
    frame_height: u32,
) -> Option<SelectionResult> {
    let (x, y) = click?.normalized(frame_width, frame_height);

    let mut best_inside: Option<(usize, Measurement)> = None;
    let mut best_outside: Option<(usize, Measurement, f64)> = None;

    for (i, candidate) in candidates.iter().enumerate() {
        let m = Measurement::of(candidate, x, y);
        if m.inside_bbox {
            if best_inside
                .as_ref()
                .map_or(true, |(_, best)| m.pose_score > best.pose_score)
            {
                best_inside = Some((i, m));
            }
        } else {
            let score = m.distance_score();
            if best_outside
                .as_ref()
                .map_or(true, |(_, _, best)| score < *best)
            {
                best_outside = Some((i, m, score));
            }
        }
    }

    match (best_inside, best_outside) {
        (Some((i, m)), _) => {
            let score = m.pose_score;
            Some(m.into_result(i, score))
        }
        (None, Some((i, m, score))) => Some(m.into_result(i, score)),
        (None, None) => None,
    }
}
