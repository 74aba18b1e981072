use crate::detection::domain::pose::RawPose;
use crate::shared::frame::Frame;

/// Domain interface for the external pose model.
///
/// Returns zero or more poses with keypoints normalized to the frame it was
/// given. Implementations are not assumed to be reentrant, hence `&mut self`:
/// each worker owns its own instance.
pub trait PoseDetector: Send {
    fn detect(&mut self, frame: &Frame) -> Result<Vec<RawPose>, Box<dyn std::error::Error>>;
}

/// Builds fresh detector instances for workers and request-handling threads.
pub trait DetectorFactory: Send + Sync {
    fn create(&self) -> Result<Box<dyn PoseDetector>, Box<dyn std::error::Error + Send + Sync>>;
}

impl<F> DetectorFactory for F
where
    F: Fn() -> Result<Box<dyn PoseDetector>, Box<dyn std::error::Error + Send + Sync>>
        + Send
        + Sync,
{
    fn create(&self) -> Result<Box<dyn PoseDetector>, Box<dyn std::error::Error + Send + Sync>> {
        self()
    }
}
