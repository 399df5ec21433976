// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
/// 区域监控流水线 (Sentinel Pipeline)
///
/// 两线程架构, 通过单槽缓冲通信:
/// - Supervisor: 采集 + 结果上报 (主线程)
/// - Detector:   人体检测 + 距离/速度 (独立线程)
/// - Heartbeat:  PLC 心跳与重连 (独立线程)
pub mod coordinator;
pub mod slot;
pub mod stats;
pub mod supervisor;

use image::RgbImage;

pub use coordinator::{downsample, FrameJob, FramePipeline, SubmitOutcome};
pub use slot::SingleSlot;
pub use stats::RateMeter;
pub use supervisor::{Supervisor, SupervisorControl, SupervisorReport};

/// 采集帧 (主循环编号 + 单调时间戳)
#[derive(Clone, Debug)]
pub struct Frame {
    pub frame_id: u64,
    pub image: RgbImage,
    /// 单调时钟秒数
    pub captured_at: f64,
}

impl Frame {
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}
