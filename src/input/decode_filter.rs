// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
/// FFmpeg解码过滤器: RTSP流 → RGB帧 → 单槽缓冲 (只保留最新帧)
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use ez_ffmpeg::filter::frame_filter::FrameFilter;
use ez_ffmpeg::filter::frame_filter_context::FrameFilterContext;
use ez_ffmpeg::{AVMediaType, Frame};
use image::RgbImage;
use tracing::{debug, info, warn};

use super::yuv::{yuv420p_to_rgb, Yuv420Planes};
use crate::pipeline::{RateMeter, SingleSlot};

/// 最大支持分辨率
const MAX_DIMENSION: u32 = 4096;
/// 仅打印前 N 帧的丢弃原因
const VERBOSE_FRAMES: usize = 10;

pub struct DecodeFilter {
    slot: Arc<SingleSlot<RgbImage>>,
    active: Arc<AtomicBool>,
    meter: RateMeter,
    pub total_frames: usize,
    pub dropped_frames: usize,
    pub overwritten_frames: usize,
}

impl DecodeFilter {
    pub fn new(slot: Arc<SingleSlot<RgbImage>>, active: Arc<AtomicBool>) -> Self {
        Self {
            slot,
            active,
            meter: RateMeter::new(),
            total_frames: 0,
            dropped_frames: 0,
            overwritten_frames: 0,
        }
    }

    fn drop_frame(&mut self, reason: std::fmt::Arguments) {
        self.dropped_frames += 1;
        if self.total_frames <= VERBOSE_FRAMES {
            warn!("⚠️ 丢弃帧 #{}: {}", self.total_frames, reason);
        }
    }
}

impl FrameFilter for DecodeFilter {
    fn media_type(&self) -> AVMediaType {
        AVMediaType::AVMEDIA_TYPE_VIDEO
    }

    fn init(&mut self, _ctx: &FrameFilterContext) -> Result<(), String> {
        info!("✅ 解码线程启动");
        Ok(())
    }

    fn filter_frame(
        &mut self,
        frame: Frame,
        _ctx: &FrameFilterContext,
    ) -> Result<Option<Frame>, String> {
        // 采集端已关闭, 终止解码
        if !self.active.load(Ordering::Relaxed) {
            return Err("解码已停止".to_string());
        }

        self.total_frames += 1;

        unsafe {
            if frame.as_ptr().is_null() || frame.is_empty() || frame.is_corrupt() {
                self.drop_frame(format_args!("空帧/损坏帧"));
                return Ok(None);
            }

            let av = &*frame.as_ptr();
            let (w, h) = (av.width as u32, av.height as u32);
            if w == 0 || h == 0 || w > MAX_DIMENSION || h > MAX_DIMENSION {
                self.drop_frame(format_args!("非法分辨率 {}x{}", w, h));
                return Ok(None);
            }

            // 缺少参考帧、无效比特流
            if av.decode_error_flags & 0x03 != 0 {
                self.drop_frame(format_args!("解码错误标志=0x{:02x}", av.decode_error_flags));
                return Ok(None);
            }

            let (y_plane, u_plane, v_plane) = (av.data[0], av.data[1], av.data[2]);
            if y_plane.is_null() || u_plane.is_null() || v_plane.is_null() {
                self.drop_frame(format_args!("YUV指针为空"));
                return Ok(None);
            }
            if av.linesize[0] <= 0 || av.linesize[1] <= 0 || av.linesize[2] <= 0 {
                self.drop_frame(format_args!("步长异常"));
                return Ok(None);
            }

            let (width, height) = (w as usize, h as usize);
            let y_stride = av.linesize[0] as usize;
            let uv_stride = av.linesize[1] as usize;
            let chroma_rows = height.div_ceil(2);

            let planes = Yuv420Planes {
                y: std::slice::from_raw_parts(y_plane, y_stride * height),
                u: std::slice::from_raw_parts(u_plane, uv_stride * chroma_rows),
                v: std::slice::from_raw_parts(v_plane, uv_stride * chroma_rows),
                y_stride,
                uv_stride,
                width,
                height,
            };
            if !planes.is_valid() {
                self.drop_frame(format_args!(
                    "步长异常 y_stride={} uv_stride={}",
                    y_stride, uv_stride
                ));
                return Ok(None);
            }

            let mut rgb = vec![0u8; width * height * 3];
            yuv420p_to_rgb(&planes, &mut rgb);

            if let Some(image) = RgbImage::from_raw(w, h, rgb) {
                if self.slot.put(image).is_some() {
                    self.overwritten_frames += 1;
                }
            }
        }

        if let Some(fps) = self.meter.tick() {
            let drop_rate = self.dropped_frames as f64 / self.total_frames as f64 * 100.0;
            debug!(
                "📺 解码统计: {:.1}fps | 总帧{} | 丢弃{} ({:.1}%) | 覆盖{}",
                fps, self.total_frames, self.dropped_frames, drop_rate, self.overwritten_frames
            );
        }

        Ok(Some(frame))
    }

    fn uninit(&mut self, _ctx: &FrameFilterContext) {
        info!(
            "✅ 解码线程退出 (总帧{}, 丢弃{})",
            self.total_frames, self.dropped_frames
        );
    }
}
