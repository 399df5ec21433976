// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//! 帧流水线协调器 (Frame Pipeline Coordinator)
//!
//! 采集速率 → 检测吞吐的桥接:
//! - 每 N 帧提交一次, 且仅在检测线程空闲时提交
//! - 提交前降采样, 检测结果坐标由检测线程按 `scale` 还原
//! - 输入/输出均为单槽, 两端都不阻塞

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use fast_image_resize as fr;
use image::RgbImage;
use parking_lot::{Condvar, Mutex};
use tracing::debug;

use super::slot::SingleSlot;
use super::Frame;
use crate::config::PipelineConfig;
use crate::detection::types::DetectionSet;
use crate::error::{Result, SentinelError};

/// 送入检测线程的任务 (已降采样)
#[derive(Clone, Debug)]
pub struct FrameJob {
    pub frame_id: u64,
    pub image: RgbImage,
    pub captured_at: f64,
    /// 检测坐标 × scale = 原始分辨率坐标
    pub scale: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// 输入槽为空, 已放入
    Submitted,
    /// 覆盖了未消费的旧帧
    Replaced,
    /// 跳帧策略跳过
    Skipped,
    /// 检测线程忙
    WorkerBusy,
}

#[derive(Default)]
struct Inbound {
    pending: Option<FrameJob>,
    /// 有待处理帧或检测线程正在处理
    busy: bool,
}

pub struct FramePipeline {
    inbound: Mutex<Inbound>,
    inbound_ready: Condvar,
    outbound: SingleSlot<DetectionSet>,
    frame_skip: u64,
    downscale: u32,
    acquired: AtomicU64,
    dropped_results: AtomicU64,
}

impl FramePipeline {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            inbound: Mutex::new(Inbound::default()),
            inbound_ready: Condvar::new(),
            outbound: SingleSlot::new(),
            frame_skip: config.frame_skip.max(1),
            downscale: config.downscale.max(1),
            acquired: AtomicU64::new(0),
            dropped_results: AtomicU64::new(0),
        }
    }

    // ========== 采集侧 ==========

    /// 按跳帧/忙碌策略处理一帧采集结果
    pub fn offer(&self, frame: &Frame) -> Result<SubmitOutcome> {
        let n = self.acquired.fetch_add(1, Ordering::Relaxed) + 1;
        if n % self.frame_skip != 0 {
            return Ok(SubmitOutcome::Skipped);
        }
        // 只有本线程会置位 busy, 检查后到提交前它只可能变为空闲
        if self.is_busy() {
            return Ok(SubmitOutcome::WorkerBusy);
        }

        let image = downsample(&frame.image, self.downscale)?;
        Ok(self.submit(FrameJob {
            frame_id: frame.frame_id,
            image,
            captured_at: frame.captured_at,
            scale: self.downscale as f32,
        }))
    }

    /// 写入输入槽, 最新帧优先, 从不阻塞
    pub fn submit(&self, job: FrameJob) -> SubmitOutcome {
        let mut inbound = self.inbound.lock();
        let replaced = inbound.pending.replace(job).is_some();
        inbound.busy = true;
        drop(inbound);
        self.inbound_ready.notify_one();

        if replaced {
            debug!("♻️ 输入槽旧帧被覆盖");
            SubmitOutcome::Replaced
        } else {
            SubmitOutcome::Submitted
        }
    }

    /// 非阻塞取最新结果, 旧结果已在发布时被覆盖
    pub fn try_take_result(&self) -> Option<DetectionSet> {
        self.outbound.take()
    }

    pub fn is_busy(&self) -> bool {
        self.inbound.lock().busy
    }

    pub fn dropped_results(&self) -> u64 {
        self.dropped_results.load(Ordering::Relaxed)
    }

    // ========== 检测侧 ==========

    /// 等待最多 timeout 取出待处理帧, busy 保持到 `publish`/`abandon`
    pub fn next_job(&self, timeout: Duration) -> Option<FrameJob> {
        let mut inbound = self.inbound.lock();
        if inbound.pending.is_none() {
            self.inbound_ready.wait_for(&mut inbound, timeout);
        }
        inbound.pending.take()
    }

    /// 发布一帧的完整结果并标记空闲
    pub fn publish(&self, set: DetectionSet) {
        if self.outbound.put(set).is_some() {
            self.dropped_results.fetch_add(1, Ordering::Relaxed);
        }
        self.release();
    }

    /// 本帧无结果 (检测失败)
    pub fn abandon(&self) {
        self.release();
    }

    /// 唤醒等待中的检测线程 (退出时)
    pub fn wake(&self) {
        self.inbound_ready.notify_all();
    }

    fn release(&self) {
        let mut inbound = self.inbound.lock();
        inbound.busy = inbound.pending.is_some();
    }
}

/// 线性降采样 (factor=2 即宽高各减半)
pub fn downsample(image: &RgbImage, factor: u32) -> Result<RgbImage> {
    if factor <= 1 {
        return Ok(image.clone());
    }
    let (width, height) = image.dimensions();
    let dst_width = (width / factor).max(1);
    let dst_height = (height / factor).max(1);

    let src_image = fr::images::ImageRef::new(width, height, image.as_raw(), fr::PixelType::U8x3)
        .map_err(|e| SentinelError::Acquisition(format!("源图像无效: {e}")))?;
    let mut dst_image = fr::images::Image::new(dst_width, dst_height, fr::PixelType::U8x3);

    // Nearest 插值: 最快, 检测对画质不敏感
    let mut resizer = fr::Resizer::new();
    resizer
        .resize(
            &src_image,
            &mut dst_image,
            &fr::ResizeOptions::new().resize_alg(fr::ResizeAlg::Nearest),
        )
        .map_err(|e| SentinelError::Acquisition(format!("降采样失败: {e}")))?;

    RgbImage::from_raw(dst_width, dst_height, dst_image.into_vec())
        .ok_or_else(|| SentinelError::Acquisition("降采样缓冲尺寸不符".to_string()))
}
