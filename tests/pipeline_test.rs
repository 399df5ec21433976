// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//! 检测线程 + 遥测 + 主循环的端到端测试 (假检测器、假视频源、假 PLC)

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Sender};
use image::RgbImage;
use parking_lot::Mutex;

use area_sentinel::config::SentinelConfig;
use area_sentinel::detection::types::{BBox, RawDetection};
use area_sentinel::detection::{DetectionWorker, PersonDetector, Roi};
use area_sentinel::link::telemetry::{OFFSET_ALIVE, OFFSET_PRESENCE, OFFSET_TIMESTAMP};
use area_sentinel::link::{BlockClient, LinkError, LinkSession, TelemetryLink};
use area_sentinel::pipeline::FrameJob;
use area_sentinel::{FrameSource, SentinelError, Supervisor, SupervisorControl};

// ========== 假 PLC ==========

#[derive(Default)]
struct Plc {
    memory: [u8; 18],
    writes: Vec<(u32, Vec<u8>)>,
}

#[derive(Clone, Default)]
struct FakeClient {
    plc: Arc<Mutex<Plc>>,
    connected: bool,
}

impl BlockClient for FakeClient {
    fn connect(&mut self) -> Result<(), LinkError> {
        self.connected = true;
        Ok(())
    }

    fn disconnect(&mut self) {
        self.connected = false;
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn db_read(&mut self, _db: u16, start: u32, len: usize) -> Result<Vec<u8>, LinkError> {
        let plc = self.plc.lock();
        Ok(plc.memory[start as usize..start as usize + len].to_vec())
    }

    fn db_write(&mut self, _db: u16, start: u32, data: &[u8]) -> Result<(), LinkError> {
        if !self.connected {
            return Err(LinkError::NotConnected);
        }
        let mut plc = self.plc.lock();
        plc.memory[start as usize..start as usize + data.len()].copy_from_slice(data);
        plc.writes.push((start, data.to_vec()));
        Ok(())
    }
}

// ========== 假检测器 ==========

struct Scripted {
    frames: VecDeque<Vec<RawDetection>>,
    fallback: Vec<RawDetection>,
}

impl Scripted {
    fn new(frames: Vec<Vec<RawDetection>>) -> Self {
        Self {
            frames: frames.into(),
            fallback: Vec::new(),
        }
    }

    fn always(detections: Vec<RawDetection>) -> Self {
        Self {
            frames: VecDeque::new(),
            fallback: detections,
        }
    }
}

impl PersonDetector for Scripted {
    fn detect(&mut self, _image: &RgbImage) -> anyhow::Result<Vec<RawDetection>> {
        Ok(self
            .frames
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone()))
    }
}

/// 半分辨率坐标的人体框
fn person(cx: f32, cy: f32, height: f32) -> RawDetection {
    RawDetection {
        bbox: BBox::new(cx - 20.0, cy - height / 2.0, cx + 20.0, cy + height / 2.0),
        class_id: 0,
        confidence: 0.9,
    }
}

fn job(frame_id: u64, captured_at: f64) -> FrameJob {
    FrameJob {
        frame_id,
        image: RgbImage::new(640, 360),
        captured_at,
        scale: 2.0,
    }
}

fn connected_link() -> (TelemetryLink<FakeClient>, Arc<Mutex<Plc>>) {
    let client = FakeClient::default();
    let plc = Arc::clone(&client.plc);
    let link = TelemetryLink::new(client, &SentinelConfig::default().link);
    link.connect().unwrap();
    plc.lock().writes.clear();
    (link, plc)
}

#[test]
fn test_first_person_after_empty_frames() {
    let config = SentinelConfig::default();
    let roi = Roi::centered(1280, 720, 0.6, 0.7);

    let mut script = vec![Vec::new(); 5];
    // 全分辨率高 100px, 质心 (640, 360)
    script.push(vec![person(320.0, 180.0, 50.0)]);
    let mut worker = DetectionWorker::new(Scripted::new(script), roi, &config);
    let (link, plc) = connected_link();

    for i in 0..5 {
        let set = worker.process(&job(i + 1, i as f64 * 0.066)).unwrap();
        assert_eq!(set.count(), 0);
        link.report(&set);
        assert!(!link.snapshot().presence);
    }
    assert!(plc
        .lock()
        .writes
        .iter()
        .all(|(offset, _)| *offset == OFFSET_TIMESTAMP));

    let set = worker.process(&job(6, 0.4)).unwrap();
    assert_eq!(set.count(), 1);
    let p = &set.detections[0];
    assert!((p.bbox.height() - 100.0).abs() < 1e-3);
    // 1360 被截断到 1000
    assert_eq!(p.distance_cm, 1000.0);
    assert_eq!(p.speed_kmh, 0.0);

    plc.lock().writes.clear();
    link.report(&set);
    let plc = plc.lock();
    assert_eq!(plc.writes[0], (OFFSET_PRESENCE, vec![0x01]));
    assert_eq!(&plc.memory[4..8], &1000.0f32.to_be_bytes());
    assert!(link.snapshot().presence);
}

#[test]
fn test_walking_person_speed() {
    let config = SentinelConfig::default();
    let roi = Roi::centered(1280, 720, 0.6, 0.7);

    // 全分辨率高 272px → 500cm; 质心水平移动 50px
    let script = vec![
        vec![person(320.0, 180.0, 136.0)],
        vec![person(345.0, 180.0, 136.0)],
    ];
    let mut worker = DetectionWorker::new(Scripted::new(script), roi, &config);

    let first = worker.process(&job(1, 100.0)).unwrap();
    assert!((first.detections[0].distance_cm - 500.0).abs() < 1e-3);

    let second = worker.process(&job(2, 100.5)).unwrap();
    let speed = second.detections[0].speed_kmh;
    assert!((speed - 6.0).abs() < 1e-3, "speed = {speed}");
}

#[test]
fn test_repeated_report_is_stable() {
    let config = SentinelConfig::default();
    let roi = Roi::centered(1280, 720, 0.6, 0.7);
    let mut worker = DetectionWorker::new(
        Scripted::always(vec![person(320.0, 180.0, 136.0)]),
        roi,
        &config,
    );
    let (link, plc) = connected_link();

    let set = worker.process(&job(1, 0.0)).unwrap();
    link.report(&set);
    let first = link.snapshot();
    let writes_after_first = plc.lock().writes.len();

    link.report(&set);
    let second = link.snapshot();
    assert_eq!(first.min_distance, second.min_distance);
    assert_eq!(first.max_speed, second.max_speed);
    // 第二次只有距离、速度、时间戳
    assert_eq!(plc.lock().writes.len() - writes_after_first, 3);
}

// ========== 主循环 ==========

/// 产出固定数量的帧, 之后等待 PLC 收到有人标志再请求退出
struct ScriptedSource {
    remaining: usize,
    plc: Arc<Mutex<Plc>>,
    control: Sender<SupervisorControl>,
    deadline: Option<Instant>,
}

impl FrameSource for ScriptedSource {
    fn read_frame(&mut self, _timeout: Duration) -> area_sentinel::Result<Option<RgbImage>> {
        if self.remaining > 0 {
            self.remaining -= 1;
            thread::sleep(Duration::from_millis(5));
            return Ok(Some(RgbImage::new(1280, 720)));
        }

        let deadline = *self
            .deadline
            .get_or_insert_with(|| Instant::now() + Duration::from_secs(3));
        if self.plc.lock().memory[OFFSET_PRESENCE as usize] == 0x01 || Instant::now() > deadline {
            let _ = self.control.send(SupervisorControl::Shutdown);
        }
        thread::sleep(Duration::from_millis(10));
        Ok(None)
    }
}

struct ClosingSource {
    frames: usize,
}

impl FrameSource for ClosingSource {
    fn read_frame(&mut self, _timeout: Duration) -> area_sentinel::Result<Option<RgbImage>> {
        if self.frames == 0 {
            return Err(SentinelError::StreamClosed);
        }
        self.frames -= 1;
        Ok(Some(RgbImage::new(320, 240)))
    }
}

/// 持续出帧, 记录被读取的帧数
struct CountingSource {
    reads: Arc<AtomicU64>,
}

impl FrameSource for CountingSource {
    fn read_frame(&mut self, _timeout: Duration) -> area_sentinel::Result<Option<RgbImage>> {
        thread::sleep(Duration::from_millis(5));
        self.reads.fetch_add(1, Ordering::SeqCst);
        Ok(Some(RgbImage::new(320, 240)))
    }
}

struct SilentSource;

impl FrameSource for SilentSource {
    fn read_frame(&mut self, timeout: Duration) -> area_sentinel::Result<Option<RgbImage>> {
        thread::sleep(timeout);
        Ok(None)
    }
}

fn test_config() -> SentinelConfig {
    let mut config = SentinelConfig::default();
    config.pipeline.worker_poll_ms = 5;
    config.camera.read_timeout_ms = 5;
    config.camera.startup_timeout_ms = 200;
    config
}

#[test]
fn test_supervisor_reports_and_tears_down() {
    let client = FakeClient::default();
    let plc = Arc::clone(&client.plc);
    let config = test_config();
    let link = Arc::new(TelemetryLink::new(client, &config.link));

    let (tx, rx) = unbounded();
    let source = ScriptedSource {
        remaining: 20,
        plc: Arc::clone(&plc),
        control: tx,
        deadline: None,
    };
    let detector = Scripted::always(vec![person(320.0, 180.0, 136.0)]);

    let supervisor = Supervisor::new(config, source, detector, Arc::clone(&link), rx);
    let report = supervisor.run().unwrap();

    assert_eq!(report.frames_acquired, 20);
    assert!(report.frames_submitted >= 1);
    assert!(report.results_consumed >= 1);
    assert!(report.reports_sent >= 1);

    let plc = plc.lock();
    assert_eq!(plc.memory[OFFSET_PRESENCE as usize], 0x01);
    // 退出时清零在线标志并断开
    assert_eq!(plc.memory[OFFSET_ALIVE as usize] & 0x01, 0);
    assert_eq!(link.session(), LinkSession::Disconnected);
}

#[test]
fn test_supervisor_stops_on_closed_stream() {
    let client = FakeClient::default();
    let plc = Arc::clone(&client.plc);
    let config = test_config();
    let link = Arc::new(TelemetryLink::new(client, &config.link));
    let (_tx, rx) = unbounded();

    let supervisor = Supervisor::new(
        config,
        ClosingSource { frames: 3 },
        Scripted::always(Vec::new()),
        Arc::clone(&link),
        rx,
    );
    let result = supervisor.run();

    assert!(matches!(result, Err(SentinelError::StreamClosed)));
    assert_eq!(link.session(), LinkSession::Disconnected);
    assert_eq!(plc.lock().memory[OFFSET_ALIVE as usize] & 0x01, 0);
}

#[test]
fn test_supervisor_requires_first_frame() {
    let config = test_config();
    let link = Arc::new(TelemetryLink::new(FakeClient::default(), &config.link));
    let (_tx, rx) = unbounded();

    let supervisor = Supervisor::new(config, SilentSource, Scripted::always(Vec::new()), link, rx);
    let err = supervisor.run().unwrap_err();
    assert!(matches!(err, SentinelError::CameraUnavailable(_)));
    assert!(err.is_fatal());
}

#[test]
fn test_supervisor_pause_and_resume() {
    let config = test_config();
    let link = Arc::new(TelemetryLink::new(FakeClient::default(), &config.link));
    let reads = Arc::new(AtomicU64::new(0));
    let (tx, rx) = unbounded();
    // 启动后第一轮循环即进入暂停
    tx.send(SupervisorControl::Pause).unwrap();

    let controller = {
        let reads = Arc::clone(&reads);
        thread::spawn(move || {
            let sample = |wait_ms: u64| {
                thread::sleep(Duration::from_millis(wait_ms));
                reads.load(Ordering::SeqCst)
            };
            let paused_a = sample(100);
            let paused_b = sample(100);
            tx.send(SupervisorControl::Resume).unwrap();
            let resumed = sample(100);
            tx.send(SupervisorControl::TogglePause).unwrap();
            let toggled_a = sample(50);
            let toggled_b = sample(100);
            tx.send(SupervisorControl::TogglePause).unwrap();
            let toggled_back = sample(100);
            tx.send(SupervisorControl::Shutdown).unwrap();
            [paused_a, paused_b, resumed, toggled_a, toggled_b, toggled_back]
        })
    };

    let supervisor = Supervisor::new(
        config,
        CountingSource {
            reads: Arc::clone(&reads),
        },
        Scripted::always(Vec::new()),
        link,
        rx,
    );
    let report = supervisor.run().unwrap();
    let [paused_a, paused_b, resumed, toggled_a, toggled_b, toggled_back] =
        controller.join().unwrap();

    // 暂停期间只读过首帧
    assert_eq!(paused_a, 1);
    assert_eq!(paused_b, 1);
    assert!(resumed > paused_b);
    assert_eq!(toggled_a, toggled_b);
    assert!(toggled_back > toggled_b);
    assert_eq!(report.frames_acquired, reads.load(Ordering::SeqCst));
}
