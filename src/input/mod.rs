// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
/// 视频输入系统 (Video Input System)
///
/// 独立解码线程, 主循环按需取最新帧
/// - Decoder: RTSP主动拉流解码器 (feature `rtsp`)
/// - Filter:  YUV420P → RGB 与单槽投递
#[cfg(feature = "rtsp")]
pub mod decode_filter;
#[cfg(feature = "rtsp")]
pub mod decoder;
pub mod yuv;

use std::time::Duration;

use image::RgbImage;

use crate::error::Result;

#[cfg(feature = "rtsp")]
pub use decoder::RtspSource;

/// 视频帧来源
///
/// - `Ok(Some)`: 新帧
/// - `Ok(None)`: 超时内没有新帧 (瞬时, 下个循环重试)
/// - `Err`: 按 `is_fatal()` 区分是否终止
pub trait FrameSource {
    fn read_frame(&mut self, timeout: Duration) -> Result<Option<RgbImage>>;
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn read_frame(&mut self, timeout: Duration) -> Result<Option<RgbImage>> {
        (**self).read_frame(timeout)
    }
}
