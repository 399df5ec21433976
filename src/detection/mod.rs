// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
/// 检测系统 (Detection System)
///
/// 独立工作线程, 负责区域内人员分析
/// - Detector:   人体检测 + 区域过滤
/// - Kinematics: 距离/速度估算
/// - Matcher:    帧间对应匹配
pub mod detector;
pub mod kinematics;
pub mod matcher;
pub mod types;

pub use detector::{DetectionWorker, PersonDetector};
pub use kinematics::KinematicsEstimator;
pub use matcher::{find_correspondence, TrackingFrames, MAX_DISPLACEMENT_PX};
pub use types::{BBox, Detection, DetectionSet, RawDetection, Roi};
