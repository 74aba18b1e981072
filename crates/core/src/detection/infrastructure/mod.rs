pub mod execution_provider;
pub mod math;
pub mod multi_scale_detector;
pub mod onnx_yolo_pose_detector;
