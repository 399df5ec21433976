// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//! 哨兵配置 - 通过JSON文件调整参数

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

use tracing::{info, warn};

use crate::error::{Result, SentinelError};

/// 摄像头参数
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    pub rtsp_url: String,
    pub startup_timeout_ms: u64, // 等待首帧的超时
    pub nominal_fps: f64,        // 标称帧率
    pub read_timeout_ms: u64,    // 单次取帧超时
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            rtsp_url: "rtsp://127.0.0.1:554/stream2".to_string(),
            startup_timeout_ms: 10_000,
            nominal_fps: 30.0,
            read_timeout_ms: 200,
        }
    }
}

/// 检测参数
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    pub model_path: String,
    pub inference_size: u32,
    pub min_confidence: f32, // 最低置信度
    pub person_class_id: u32,
    pub iou_threshold: f32,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            model_path: "models/yolov8n.onnx".to_string(),
            inference_size: 640,
            min_confidence: 0.7,
            person_class_id: 0,
            iou_threshold: 0.45,
        }
    }
}

/// 流水线参数
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub frame_skip: u64,      // 每N帧提交一次
    pub downscale: u32,       // 线性降采样倍数
    pub worker_poll_ms: u64,  // 检测线程轮询间隔
    pub roi_width_frac: f32,  // 区域宽度占比
    pub roi_height_frac: f32, // 区域高度占比
    pub status_every: u64,    // 状态日志间隔(帧)
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            frame_skip: 2,
            downscale: 2,
            worker_poll_ms: 100,
            roi_width_frac: 0.6,
            roi_height_frac: 0.7,
            status_every: 90,
        }
    }
}

/// 距离/速度估算参数 (针孔相机模型)
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct KinematicsConfig {
    pub person_height_cm: f32,
    pub focal_length: f32, // 需按相机标定
    pub min_pixel_height: f32,
    pub min_distance_cm: f32,
    pub max_distance_cm: f32,
    pub max_speed_kmh: f32,
    pub reference_scale_px: f32,
    pub max_match_displacement_px: f32,
}

impl Default for KinematicsConfig {
    fn default() -> Self {
        Self {
            person_height_cm: 170.0,
            focal_length: 800.0,
            min_pixel_height: 30.0,
            min_distance_cm: 50.0,
            max_distance_cm: 1000.0,
            max_speed_kmh: 50.0,
            reference_scale_px: 300.0,
            max_match_displacement_px: 100.0,
        }
    }
}

/// PLC 连接参数 (S7-1500, DB17)
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    pub address: String,
    pub port: u16,
    pub rack: u16,
    pub slot: u16,
    pub db_number: u16,
    pub heartbeat_secs: u64,
    pub reconnect_pause_ms: u64,
    pub io_timeout_ms: u64,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            address: "192.168.0.33".to_string(),
            port: 102,
            rack: 0,
            slot: 1,
            db_number: 17,
            heartbeat_secs: 10,
            reconnect_pause_ms: 1000,
            io_timeout_ms: 2000,
        }
    }
}

impl LinkConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_secs)
    }

    pub fn reconnect_pause(&self) -> Duration {
        Duration::from_millis(self.reconnect_pause_ms)
    }

    pub fn io_timeout(&self) -> Duration {
        Duration::from_millis(self.io_timeout_ms)
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SentinelConfig {
    pub camera: CameraConfig,
    pub detection: DetectionConfig,
    pub pipeline: PipelineConfig,
    pub kinematics: KinematicsConfig,
    pub link: LinkConfig,
}

impl SentinelConfig {
    /// 从JSON文件加载配置, 文件不存在时写出默认配置
    pub fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        match fs::read_to_string(path) {
            Ok(json) => match serde_json::from_str(&json) {
                Ok(config) => {
                    info!("✅ 配置已从 {} 加载", path.display());
                    config
                }
                Err(e) => {
                    warn!("⚠️ 配置文件解析失败: {}, 使用默认值", e);
                    Self::default()
                }
            },
            Err(_) => {
                info!("📝 配置文件不存在,创建默认配置...");
                let config = Self::default();
                if let Err(e) = config.save(path) {
                    warn!("❌ 保存配置失败: {}", e);
                }
                config
            }
        }
    }

    /// 保存配置到JSON文件
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| SentinelError::Config(format!("序列化配置失败: {e}")))?;
        fs::write(path.as_ref(), json)?;
        info!("💾 配置已保存到 {}", path.as_ref().display());
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let fail = |msg: &str| Err(SentinelError::Config(msg.to_string()));

        if self.pipeline.frame_skip == 0 {
            return fail("frame_skip 必须大于 0");
        }
        if self.pipeline.downscale == 0 {
            return fail("downscale 必须大于 0");
        }
        let fracs = [self.pipeline.roi_width_frac, self.pipeline.roi_height_frac];
        if fracs.iter().any(|f| !(*f > 0.0 && *f <= 1.0)) {
            return fail("区域占比必须在 (0, 1] 之间");
        }
        if !(0.0..=1.0).contains(&self.detection.min_confidence) {
            return fail("min_confidence 必须在 [0, 1] 之间");
        }
        if self.detection.inference_size == 0 {
            return fail("inference_size 必须大于 0");
        }

        let k = &self.kinematics;
        if k.person_height_cm <= 0.0 || k.focal_length <= 0.0 || k.reference_scale_px <= 0.0 {
            return fail("标定常数必须为正数");
        }
        if k.min_distance_cm > k.max_distance_cm {
            return fail("距离上下限颠倒");
        }
        if k.max_speed_kmh <= 0.0 || k.max_match_displacement_px <= 0.0 {
            return fail("速度上限与匹配门限必须为正数");
        }

        if self.link.heartbeat_secs == 0 {
            return fail("heartbeat_secs 必须大于 0");
        }
        Ok(())
    }

    /// 打印当前配置
    pub fn print_summary(&self) {
        info!("🎛️ 当前配置:");
        info!("  📹 视频流: {}", self.camera.rtsp_url);
        info!(
            "  🤖 模型: {} ({}x{}), 置信度 ≥ {:.2}",
            self.detection.model_path,
            self.detection.inference_size,
            self.detection.inference_size,
            self.detection.min_confidence
        );
        info!(
            "  ⚙️ 跳帧: 每{}帧 | 降采样: 1/{}",
            self.pipeline.frame_skip, self.pipeline.downscale
        );
        info!(
            "  📏 人高 {:.0}cm | 焦距 {:.0}",
            self.kinematics.person_height_cm, self.kinematics.focal_length
        );
        info!(
            "  🔌 PLC {}:{} rack={} slot={} DB{}",
            self.link.address,
            self.link.port,
            self.link.rack,
            self.link.slot,
            self.link.db_number
        );
    }
}
