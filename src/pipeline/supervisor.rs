// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//! 主循环 (Supervisor)
//!
//! 启动: 首帧 → 监控区域 → PLC 连接 → 检测线程 + 心跳线程
//! 循环: 控制命令 → 取帧 → 提交 → 取结果 → 上报
//! 退出: 清除 active → 等待线程 → 清零在线标志 → 关闭会话

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, TryRecvError};
use image::RgbImage;
use tracing::{error, info, warn};

use super::{Frame, FramePipeline, RateMeter, SubmitOutcome};
use crate::config::SentinelConfig;
use crate::detection::{DetectionSet, DetectionWorker, PersonDetector, Roi};
use crate::error::{Result, SentinelError};
use crate::input::FrameSource;
use crate::link::{run_heartbeat, BlockClient, ReportOutcome, TelemetryLink};

/// 交互控制命令
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorControl {
    Pause,
    Resume,
    TogglePause,
    Shutdown,
}

/// 运行统计
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SupervisorReport {
    pub frames_acquired: u64,
    pub frames_submitted: u64,
    pub acquisition_errors: u64,
    pub results_consumed: u64,
    pub reports_sent: u64,
    pub reports_skipped: u64,
    pub reports_failed: u64,
}

pub struct Supervisor<S, D, C>
where
    S: FrameSource,
    D: PersonDetector + 'static,
    C: BlockClient + 'static,
{
    config: SentinelConfig,
    source: S,
    detector: D,
    link: Arc<TelemetryLink<C>>,
    control: Receiver<SupervisorControl>,
    active: Arc<AtomicBool>,
}

impl<S, D, C> Supervisor<S, D, C>
where
    S: FrameSource,
    D: PersonDetector + 'static,
    C: BlockClient + 'static,
{
    pub fn new(
        config: SentinelConfig,
        source: S,
        detector: D,
        link: Arc<TelemetryLink<C>>,
        control: Receiver<SupervisorControl>,
    ) -> Self {
        Self {
            config,
            source,
            detector,
            link,
            control,
            active: Arc::new(AtomicBool::new(true)),
        }
    }

    /// 进程级运行标志, 清零后所有线程在下一个轮询周期退出
    pub fn active_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.active)
    }

    pub fn run(self) -> Result<SupervisorReport> {
        let Self {
            config,
            mut source,
            detector,
            link,
            control,
            active,
        } = self;

        let clock = Instant::now();
        let read_timeout = Duration::from_millis(config.camera.read_timeout_ms.max(1));

        // ========== 启动 ==========
        let first = wait_first_frame(&mut source, &config)?;
        let roi = Roi::centered(
            first.width(),
            first.height(),
            config.pipeline.roi_width_frac,
            config.pipeline.roi_height_frac,
        );
        info!(
            "🎯 监控区域: ({}, {}) - ({}, {}) [{}x{}]",
            roi.x1,
            roi.y1,
            roi.x2,
            roi.y2,
            roi.width(),
            roi.height()
        );

        if let Err(e) = link.connect() {
            warn!("⚠️ PLC 连接失败, 由心跳线程重试: {}", e);
        }

        let pipeline = Arc::new(FramePipeline::new(&config.pipeline));
        let worker = {
            let worker = DetectionWorker::new(detector, roi, &config);
            let pipeline = Arc::clone(&pipeline);
            let active = Arc::clone(&active);
            thread::Builder::new()
                .name("detector".to_string())
                .spawn(move || worker.run(pipeline, active))?
        };
        let heartbeat = {
            let link = Arc::clone(&link);
            let active = Arc::clone(&active);
            thread::Builder::new()
                .name("heartbeat".to_string())
                .spawn(move || run_heartbeat(link, active))?
        };

        // ========== 主循环 ==========
        let mut state = LoopState::new(&config);
        let mut fatal = None;
        state.acquire(first, &clock, &pipeline);
        state.log_status_if_due(&link);

        while active.load(Ordering::Relaxed) {
            // 1. 控制命令
            loop {
                match control.try_recv() {
                    Ok(SupervisorControl::Pause) => state.set_paused(true),
                    Ok(SupervisorControl::Resume) => state.set_paused(false),
                    Ok(SupervisorControl::TogglePause) => state.set_paused(!state.paused),
                    Ok(SupervisorControl::Shutdown) => {
                        info!("🛑 收到退出命令");
                        active.store(false, Ordering::Relaxed);
                    }
                    Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
                }
            }
            if !active.load(Ordering::Relaxed) {
                break;
            }
            if state.paused {
                thread::sleep(read_timeout);
                continue;
            }

            // 2. 取帧
            match source.read_frame(read_timeout) {
                Ok(Some(image)) => {
                    state.acquire(image, &clock, &pipeline);
                    state.log_status_if_due(&link);
                }
                Ok(None) => {}
                Err(e) if e.is_fatal() => {
                    error!("❌ 采集终止: {}", e);
                    fatal = Some(e);
                    break;
                }
                Err(e) => {
                    state.report.acquisition_errors += 1;
                    warn!("⚠️ 采集失败: {}", e);
                }
            }

            // 3. 结果上报
            if let Some(set) = pipeline.try_take_result() {
                state.consume(&set, &link);
            }
        }

        // ========== 退出 ==========
        info!("🔄 正在退出...");
        active.store(false, Ordering::Relaxed);
        pipeline.wake();
        join_quietly(worker, "检测线程");
        join_quietly(heartbeat, "心跳线程");
        link.shutdown();

        let report = state.report;
        info!(
            "📊 采集{}帧 | 提交{}帧 | 上报{}次 (跳过{}, 失败{})",
            report.frames_acquired,
            report.frames_submitted,
            report.reports_sent,
            report.reports_skipped,
            report.reports_failed
        );

        match fatal {
            Some(e) => Err(e),
            None => Ok(report),
        }
    }
}

fn join_quietly(handle: JoinHandle<()>, name: &str) {
    if handle.join().is_err() {
        error!("❌ {}异常退出", name);
    }
}

/// 启动超时内等待第一帧
fn wait_first_frame<S: FrameSource>(source: &mut S, config: &SentinelConfig) -> Result<RgbImage> {
    let deadline = Instant::now() + Duration::from_millis(config.camera.startup_timeout_ms);
    let read_timeout = Duration::from_millis(config.camera.read_timeout_ms.max(1));

    loop {
        match source.read_frame(read_timeout) {
            Ok(Some(image)) => return Ok(image),
            Ok(None) => {}
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => warn!("⚠️ 等待首帧: {}", e),
        }
        if Instant::now() >= deadline {
            return Err(SentinelError::CameraUnavailable(format!(
                "{}ms 内没有视频帧",
                config.camera.startup_timeout_ms
            )));
        }
    }
}

struct LoopState {
    report: SupervisorReport,
    meter: RateMeter,
    paused: bool,
    status_every: u64,
    last_count: usize,
    last_set: Option<DetectionSet>,
}

impl LoopState {
    fn new(config: &SentinelConfig) -> Self {
        Self {
            report: SupervisorReport::default(),
            meter: RateMeter::new(),
            paused: false,
            status_every: config.pipeline.status_every.max(1),
            last_count: 0,
            last_set: None,
        }
    }

    fn set_paused(&mut self, paused: bool) {
        if self.paused != paused {
            info!("{}", if paused { "⏸️ 已暂停" } else { "▶️ 继续运行" });
        }
        self.paused = paused;
    }

    /// 编号 + 打时间戳 → 提交
    fn acquire(&mut self, image: RgbImage, clock: &Instant, pipeline: &FramePipeline) {
        self.report.frames_acquired += 1;
        let frame = Frame {
            frame_id: self.report.frames_acquired,
            image,
            captured_at: clock.elapsed().as_secs_f64(),
        };
        self.meter.tick();

        match pipeline.offer(&frame) {
            Ok(SubmitOutcome::Submitted) | Ok(SubmitOutcome::Replaced) => {
                self.report.frames_submitted += 1
            }
            Ok(_) => {}
            Err(e) => {
                self.report.acquisition_errors += 1;
                warn!("⚠️ 帧{} 提交失败: {}", frame.frame_id, e);
            }
        }
    }

    fn consume<C: BlockClient>(&mut self, set: &DetectionSet, link: &TelemetryLink<C>) {
        self.report.results_consumed += 1;
        self.last_count = set.count();

        match link.report(set) {
            ReportOutcome::Sent { .. } => self.report.reports_sent += 1,
            ReportOutcome::Skipped => self.report.reports_skipped += 1,
            ReportOutcome::Failed(_) => self.report.reports_failed += 1,
        }
        self.last_set = Some(set.clone());
    }

    fn log_status_if_due<C: BlockClient>(&self, link: &TelemetryLink<C>) {
        if self.report.frames_acquired % self.status_every != 0 {
            return;
        }
        info!(
            "📊 帧{} | 采集 {:.1}fps | 区域内 {}人 | PLC {}",
            self.report.frames_acquired,
            self.meter.current(),
            self.last_count,
            link.session()
        );
        if let Some(set) = &self.last_set {
            for (i, person) in set.detections.iter().enumerate() {
                info!(
                    "   👤 #{}: 距离 {:.0}cm | 速度 {:.2}km/h | 置信度 {:.2}",
                    i + 1,
                    person.distance_cm,
                    person.speed_kmh,
                    person.confidence
                );
            }
        }
    }
}
