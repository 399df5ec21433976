// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
/// RTSP主动拉流 (CPU软件解码, TCP传输, 低延迟)
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use ez_ffmpeg::core::context::null_output::create_null_output;
use ez_ffmpeg::filter::frame_pipeline_builder::FramePipelineBuilder;
use ez_ffmpeg::{AVMediaType, FfmpegContext, Input};
use image::RgbImage;
use tracing::{error, info};

use super::decode_filter::DecodeFilter;
use super::FrameSource;
use crate::config::CameraConfig;
use crate::error::{Result, SentinelError};
use crate::pipeline::SingleSlot;

/// 解码线程 → 采集循环, 只保留最新一帧
pub struct RtspSource {
    url: String,
    slot: Arc<SingleSlot<RgbImage>>,
    active: Arc<AtomicBool>,
    finished: Arc<AtomicBool>,
    first: Option<RgbImage>,
    handle: Option<JoinHandle<()>>,
}

impl RtspSource {
    /// 启动解码线程并等待首帧, 超时视为摄像头不可用
    pub fn open(config: &CameraConfig) -> Result<Self> {
        if config.rtsp_url.is_empty() {
            return Err(SentinelError::Config("未配置 RTSP 地址".to_string()));
        }
        info!("📹 流地址: {}", config.rtsp_url);

        let slot = Arc::new(SingleSlot::new());
        let active = Arc::new(AtomicBool::new(true));
        let finished = Arc::new(AtomicBool::new(false));

        let handle = {
            let url = config.rtsp_url.clone();
            let filter = DecodeFilter::new(Arc::clone(&slot), Arc::clone(&active));
            let slot = Arc::clone(&slot);
            let finished = Arc::clone(&finished);
            thread::Builder::new()
                .name("rtsp-decoder".to_string())
                .spawn(move || {
                    if let Err(e) = software_decode(&url, filter) {
                        error!("❌ CPU软件解码失败: {}", e);
                    }
                    finished.store(true, Ordering::Release);
                    slot.wake();
                })?
        };

        let mut source = Self {
            url: config.rtsp_url.clone(),
            slot,
            active,
            finished,
            first: None,
            handle: Some(handle),
        };

        let deadline = Instant::now() + Duration::from_millis(config.startup_timeout_ms);
        while Instant::now() < deadline && !source.finished.load(Ordering::Acquire) {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if let Some(image) = source.slot.take_timeout(remaining) {
                info!("✅ 首帧到达: {}x{}", image.width(), image.height());
                source.first = Some(image);
                return Ok(source);
            }
        }

        source.stop();
        Err(SentinelError::CameraUnavailable(format!(
            "{} 在 {}ms 内没有视频帧",
            config.rtsp_url, config.startup_timeout_ms
        )))
    }

    /// 通知解码线程在下一帧退出
    pub fn stop(&mut self) {
        if self.active.swap(false, Ordering::Relaxed) {
            info!("🛑 停止拉流: {}", self.url);
        }
        // 流已结束时才等待线程, 否则解码可能阻塞在网络读取上
        if self.finished.load(Ordering::Acquire) {
            if let Some(handle) = self.handle.take() {
                let _ = handle.join();
            }
        }
    }
}

impl FrameSource for RtspSource {
    fn read_frame(&mut self, timeout: Duration) -> Result<Option<RgbImage>> {
        if let Some(image) = self.first.take() {
            return Ok(Some(image));
        }
        match self.slot.take_timeout(timeout) {
            Some(image) => Ok(Some(image)),
            None if self.finished.load(Ordering::Acquire) => Err(SentinelError::StreamClosed),
            None => Ok(None),
        }
    }
}

impl Drop for RtspSource {
    fn drop(&mut self) {
        self.stop();
    }
}

/// CPU软件解码, 阻塞到流结束
fn software_decode(rtsp_url: &str, filter: DecodeFilter) -> std::result::Result<(), String> {
    let pipe: FramePipelineBuilder = AVMediaType::AVMEDIA_TYPE_VIDEO.into();
    let pipe = pipe.filter("decode", Box::new(filter));
    let out = create_null_output().add_frame_pipeline(pipe);

    // 低延迟: TCP 传输, 不缓冲
    let input = Input::new(rtsp_url).set_input_opts(
        [
            ("rtsp_transport", "tcp"),
            ("rtsp_flags", "prefer_tcp"),
            ("fflags", "nobuffer"),
            ("flags", "low_delay"),
        ]
        .into(),
    );

    let ctx = FfmpegContext::builder()
        .input(input)
        .filter_descs(["format=yuv420p"].into())
        .output(out)
        .build()
        .map_err(|e| format!("构建失败: {}", e))?;

    let sch = ctx.start().map_err(|e| format!("启动失败: {}", e))?;
    info!("✅ CPU软件解码启动成功");

    let _ = sch.wait();
    info!("🛑 视频流结束");
    Ok(())
}
