use crate::detection::domain::pose::PoseCandidate;
use crate::detection::domain::skeleton::STABLE_KEYPOINTS;
use crate::shared::config::DedupConfig;

/// Removes near-identical detections of the same person.
///
/// Detections from different scales land in the same normalized space, so
/// two candidates describe the same person when their stable keypoints and
/// their centers of mass are both close. The first candidate seen wins.
pub struct PoseDeduplicator {
    config: DedupConfig,
}

impl PoseDeduplicator {
    pub fn new(config: DedupConfig) -> Self {
        Self { config }
    }

    pub fn dedup(&self, candidates: Vec<PoseCandidate>) -> Vec<PoseCandidate> {
        let mut unique: Vec<PoseCandidate> = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            if !unique.iter().any(|kept| self.is_duplicate(kept, &candidate)) {
                unique.push(candidate);
            }
        }
        unique
    }

    pub fn is_duplicate(&self, a: &PoseCandidate, b: &PoseCandidate) -> bool {
        let Some(keypoint_distance) = self.stable_keypoint_distance(a, b) else {
            return false;
        };
        if keypoint_distance >= self.config.keypoint_distance {
            return false;
        }
        let threshold = self.config.visibility_threshold;
        let (ax, ay) = a.center_of_mass(threshold);
        let (bx, by) = b.center_of_mass(threshold);
        let center_distance = ((ax - bx).powi(2) + (ay - by).powi(2)).sqrt();
        center_distance < self.config.center_distance
    }

    /// Mean distance over stable keypoints visible in both poses, or `None`
    /// when too few pairs are comparable to judge.
    fn stable_keypoint_distance(&self, a: &PoseCandidate, b: &PoseCandidate) -> Option<f64> {
        let threshold = self.config.visibility_threshold;
        let (a_kps, b_kps) = (a.keypoints(), b.keypoints());

        let mut total = 0.0;
        let mut count = 0usize;
        for &idx in &STABLE_KEYPOINTS {
            let (Some(ka), Some(kb)) = (a_kps.get(idx), b_kps.get(idx)) else {
                continue;
            };
            if ka.visibility > threshold && kb.visibility > threshold {
                total += ka.distance_to(kb.x, kb.y);
                count += 1;
            }
        }

        if count < self.config.min_comparable {
            None
        } else {
            Some(total / count as f64)
        }
    }
}
