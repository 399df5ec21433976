// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//! 错误类型 (Error types)
//!
//! 按故障域划分: 瞬时错误只影响本阶段并自愈, 致命错误阻止进入主循环。

use thiserror::Error;

use crate::link::LinkError;

#[derive(Error, Debug)]
pub enum SentinelError {
    /// 配置文件不合法
    #[error("配置错误: {0}")]
    Config(String),

    /// 启动时摄像头不可达
    #[error("摄像头不可用: {0}")]
    CameraUnavailable(String),

    /// 启动时检测模型无法加载
    #[error("检测模型不可用: {0}")]
    ModelUnavailable(String),

    /// 视频流已终止 (解码线程退出)
    #[error("视频流已关闭")]
    StreamClosed,

    /// 单帧采集失败
    #[error("采集失败: {0}")]
    Acquisition(String),

    /// 单帧检测失败
    #[error("检测失败: {0}")]
    Detection(String),

    /// PLC 通信失败
    #[error("PLC通信失败: {0}")]
    Link(#[from] LinkError),

    #[error("IO错误: {0}")]
    Io(#[from] std::io::Error),
}

impl SentinelError {
    /// 致命错误: 进程不能继续运行主循环
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SentinelError::Config(_)
                | SentinelError::CameraUnavailable(_)
                | SentinelError::ModelUnavailable(_)
                | SentinelError::StreamClosed
        )
    }
}

pub type Result<T> = std::result::Result<T, SentinelError>;
