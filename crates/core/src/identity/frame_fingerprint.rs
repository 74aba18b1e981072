use std::sync::Arc;

use image::imageops::FilterType;
use image::{DynamicImage, RgbImage};
use sha2::{Digest, Sha256};

use crate::shared::constants::PERCEPTUAL_SIDE;
use crate::shared::frame::Frame;

/// Two views of one upload's identity.
///
/// The exact hash covers the raw bytes and is the cache key. The perceptual
/// hash digests a 32x32 grayscale thumbnail; the thumbnail itself is kept so
/// near-identical frames can be compared against a difference threshold.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FrameFingerprint {
    exact: [u8; 32],
    perceptual: [u8; 16],
    thumbnail: Arc<[u8]>,
}

impl FrameFingerprint {
    pub fn exact(&self) -> &[u8; 32] {
        &self.exact
    }

    pub fn perceptual(&self) -> &[u8; 16] {
        &self.perceptual
    }

    pub fn exact_hex(&self) -> String {
        self.exact.iter().map(|b| format!("{b:02x}")).collect()
    }

    /// Equal perceptual hashes, or a mean absolute thumbnail difference
    /// (scaled to 0-1) below `threshold`.
    pub fn is_similar(&self, other: &Self, threshold: f64) -> bool {
        if self.perceptual == other.perceptual {
            return true;
        }
        if self.thumbnail.is_empty() || self.thumbnail.len() != other.thumbnail.len() {
            return false;
        }
        let total: u64 = self
            .thumbnail
            .iter()
            .zip(other.thumbnail.iter())
            .map(|(&a, &b)| a.abs_diff(b) as u64)
            .sum();
        let mean = total as f64 / self.thumbnail.len() as f64 / 255.0;
        mean < threshold
    }
}

/// Fingerprint an upload from its raw bytes and decoded RGB frame.
pub fn fingerprint(raw: &[u8], frame: &Frame) -> FrameFingerprint {
    let mut exact = [0u8; 32];
    exact.copy_from_slice(&Sha256::digest(raw));
    let thumbnail = thumbnail(frame);
    let perceptual = md5::compute(&thumbnail).0;
    FrameFingerprint {
        exact,
        perceptual,
        thumbnail: thumbnail.into(),
    }
}

fn thumbnail(frame: &Frame) -> Vec<u8> {
    let Some(rgb) = RgbImage::from_raw(frame.width(), frame.height(), frame.data().to_vec()) else {
        return Vec::new();
    };
    DynamicImage::ImageRgb8(rgb)
        .resize_exact(PERCEPTUAL_SIDE, PERCEPTUAL_SIDE, FilterType::Triangle)
        .to_luma8()
        .into_raw()
}
