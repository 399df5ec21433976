// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//! 检测线程 (Detection Worker)
//! 职责: 取输入槽的帧 → 人体检测 → 区域过滤 → 距离/速度 → 整帧结果写入输出槽

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use image::RgbImage;
use tracing::{debug, info, warn};

use super::kinematics::KinematicsEstimator;
use super::matcher::{find_correspondence, TrackingFrames};
use super::types::{Detection, DetectionSet, RawDetection, Roi};
use crate::config::SentinelConfig;
use crate::error::{Result, SentinelError};
use crate::pipeline::{FrameJob, FramePipeline, RateMeter};

/// 目标检测能力 (黑盒): 图像 → (框, 类别, 置信度) 列表
pub trait PersonDetector: Send {
    fn detect(&mut self, image: &RgbImage) -> anyhow::Result<Vec<RawDetection>>;

    fn name(&self) -> &str {
        "detector"
    }
}

impl<D: PersonDetector + ?Sized> PersonDetector for Box<D> {
    fn detect(&mut self, image: &RgbImage) -> anyhow::Result<Vec<RawDetection>> {
        (**self).detect(image)
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

pub struct DetectionWorker<D: PersonDetector> {
    detector: D,
    roi: Roi,
    kinematics: KinematicsEstimator,
    tracking: TrackingFrames,
    min_confidence: f32,
    person_class_id: u32,
    max_displacement: f32,
    poll_interval: Duration,

    // 统计
    meter: RateMeter,
    processed: u64,
    failures: u64,
}

impl<D: PersonDetector> DetectionWorker<D> {
    pub fn new(detector: D, roi: Roi, config: &SentinelConfig) -> Self {
        Self {
            detector,
            roi,
            kinematics: KinematicsEstimator::new(&config.kinematics),
            tracking: TrackingFrames::new(),
            min_confidence: config.detection.min_confidence,
            person_class_id: config.detection.person_class_id,
            max_displacement: config.kinematics.max_match_displacement_px,
            poll_interval: Duration::from_millis(config.pipeline.worker_poll_ms.max(1)),
            meter: RateMeter::new(),
            processed: 0,
            failures: 0,
        }
    }

    pub fn roi(&self) -> Roi {
        self.roi
    }

    pub fn tracking(&self) -> &TrackingFrames {
        &self.tracking
    }

    pub fn failures(&self) -> u64 {
        self.failures
    }

    /// 工作线程主循环, active 清零后在下一个轮询周期退出
    pub fn run(mut self, pipeline: Arc<FramePipeline>, active: Arc<AtomicBool>) {
        info!("🔍 检测线程启动 ({})", self.detector.name());

        while active.load(Ordering::Relaxed) {
            let Some(job) = pipeline.next_job(self.poll_interval) else {
                continue;
            };

            match self.process(&job) {
                Ok(set) => pipeline.publish(set),
                Err(e) => {
                    // 单帧失败不终止线程
                    warn!("❌ 帧{} 检测失败: {}", job.frame_id, e);
                    pipeline.abandon();
                }
            }
        }

        info!(
            "✅ 检测线程退出 (处理{}帧, 失败{}帧)",
            self.processed, self.failures
        );
    }

    /// 处理一帧: 失败时本帧无结果, 跟踪缓冲不变
    pub fn process(&mut self, job: &FrameJob) -> Result<DetectionSet> {
        let start = Instant::now();

        let raw = match self.detector.detect(&job.image) {
            Ok(raw) => raw,
            Err(e) => {
                self.failures += 1;
                return Err(SentinelError::Detection(format!("{e:#}")));
            }
        };

        let detections = self.build_detections(&raw, job.scale, job.captured_at);
        let set = DetectionSet::new(job.frame_id, job.captured_at, detections);
        self.tracking.advance(&set);
        self.processed += 1;

        let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;
        if let Some(fps) = self.meter.tick() {
            debug!(
                "🎯 检测: {}人 | {:.1}ms/帧 | {:.1}fps",
                set.count(),
                elapsed_ms,
                fps
            );
        }

        Ok(set)
    }

    /// 原始检测 → 区域内的人员 (带距离与速度)
    fn build_detections(&self, raw: &[RawDetection], scale: f32, timestamp: f64) -> Vec<Detection> {
        let previous = self.tracking.reference();
        let mut detections = Vec::new();

        for r in raw {
            if r.class_id != self.person_class_id || r.confidence < self.min_confidence {
                continue;
            }

            // 还原到原始分辨率
            let bbox = r.bbox.scaled(scale);
            let (cx, cy) = bbox.center();
            if !self.roi.contains(cx, cy) {
                continue;
            }

            let distance = self.kinematics.distance(bbox.height());
            let mut person = Detection::new(bbox, r.confidence, distance, timestamp);

            if let Some(prev) = find_correspondence(&person, previous, self.max_displacement) {
                let delta_t = timestamp - prev.timestamp;
                person.speed_kmh = self.kinematics.speed(&person, prev, delta_t);
            }

            detections.push(person);
        }

        detections
    }
}
