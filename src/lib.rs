// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
pub mod config; // 运行配置
pub mod detection; // 人体检测 + 距离/速度
pub mod error; // 错误类型
pub mod input; // 视频输入系统
pub mod link; // PLC 遥测
pub mod models; // 检测模型实现
pub mod pipeline; // 采集/检测流水线与主循环

pub use crate::config::SentinelConfig;
pub use crate::detection::{Detection, DetectionSet, PersonDetector, Roi};
pub use crate::error::{Result, SentinelError};
pub use crate::input::FrameSource;
pub use crate::link::{BlockClient, LinkError, LinkSession, S7Client, TelemetryLink};
pub use crate::pipeline::{Supervisor, SupervisorControl, SupervisorReport};
