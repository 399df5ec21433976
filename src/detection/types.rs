// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
/// 区域哨兵数据结构定义
/// Data structures for the area sentinel

// ========== 检测框 ==========

/// 检测框 (Detection bounding box), 像素坐标
#[derive(Clone, Copy, Debug, PartialEq, Default)]
pub struct BBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BBox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn from_xywh(x: f32, y: f32, w: f32, h: f32) -> Self {
        Self::new(x, y, x + w, y + h)
    }

    pub fn width(&self) -> f32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f32 {
        self.y2 - self.y1
    }

    /// 获取中心点
    pub fn center(&self) -> (f32, f32) {
        ((self.x1 + self.x2) / 2.0, (self.y1 + self.y2) / 2.0)
    }

    /// 线性缩放 (降采样坐标 → 原始分辨率)
    pub fn scaled(&self, factor: f32) -> Self {
        Self::new(
            self.x1 * factor,
            self.y1 * factor,
            self.x2 * factor,
            self.y2 * factor,
        )
    }

    pub fn area(&self) -> f32 {
        self.width().max(0.0) * self.height().max(0.0)
    }

    pub fn iou(&self, other: &BBox) -> f32 {
        let l = self.x1.max(other.x1);
        let t = self.y1.max(other.y1);
        let r = self.x2.min(other.x2);
        let b = self.y2.min(other.y2);
        if r <= l || b <= t {
            return 0.0;
        }
        let inter = (r - l) * (b - t);
        let union = self.area() + other.area() - inter;
        if union <= 0.0 {
            0.0
        } else {
            inter / union
        }
    }
}

/// 检测能力的原始输出 (黑盒模型 → 检测线程)
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RawDetection {
    pub bbox: BBox,
    pub class_id: u32,
    pub confidence: f32,
}

// ========== 人员检测 ==========

/// 单帧中的一个人 (带距离与速度)
#[derive(Clone, Debug, PartialEq)]
pub struct Detection {
    pub bbox: BBox,
    pub centroid: (f32, f32),
    pub confidence: f32,
    /// 估算距离 (cm), 0 = 未知
    pub distance_cm: f32,
    /// 估算速度 (km/h), 0 = 未知/无对应
    pub speed_kmh: f32,
    /// 单调时钟时间戳 (秒)
    pub timestamp: f64,
}

impl Detection {
    pub fn new(bbox: BBox, confidence: f32, distance_cm: f32, timestamp: f64) -> Self {
        Self {
            centroid: bbox.center(),
            bbox,
            confidence,
            distance_cm,
            speed_kmh: 0.0,
            timestamp,
        }
    }

    /// 质心欧氏距离 (像素)
    pub fn centroid_distance(&self, other: &Detection) -> f32 {
        let dx = self.centroid.0 - other.centroid.0;
        let dy = self.centroid.1 - other.centroid.1;
        (dx * dx + dy * dy).sqrt()
    }
}

/// 一帧的完整检测结果 (检测线程 → 主循环, 原子交付)
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DetectionSet {
    pub frame_id: u64,
    pub captured_at: f64,
    pub detections: Vec<Detection>,
}

impl DetectionSet {
    pub fn new(frame_id: u64, captured_at: f64, detections: Vec<Detection>) -> Self {
        Self {
            frame_id,
            captured_at,
            detections,
        }
    }

    pub fn count(&self) -> usize {
        self.detections.len()
    }

    pub fn has_people(&self) -> bool {
        !self.detections.is_empty()
    }

    /// 最近距离 (仅统计已知距离)
    pub fn min_distance(&self) -> Option<f32> {
        self.detections
            .iter()
            .map(|d| d.distance_cm)
            .filter(|d| *d > 0.0)
            .fold(None, |acc, d| Some(acc.map_or(d, |m: f32| m.min(d))))
    }

    /// 最大速度
    pub fn max_speed(&self) -> Option<f32> {
        self.detections
            .iter()
            .map(|d| d.speed_kmh)
            .fold(None, |acc, v| Some(acc.map_or(v, |m: f32| m.max(v))))
    }
}

// ========== 监控区域 ==========

/// 监控区域 (ROI): 首帧居中生成, 进程内不可变
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Roi {
    pub x1: u32,
    pub y1: u32,
    pub x2: u32,
    pub y2: u32,
}

impl Roi {
    /// 画面中心的区域 (默认 60% x 70%)
    pub fn centered(
        frame_width: u32,
        frame_height: u32,
        width_frac: f32,
        height_frac: f32,
    ) -> Self {
        let width = (frame_width as f32 * width_frac) as u32;
        let height = (frame_height as f32 * height_frac) as u32;
        let x1 = (frame_width - width.min(frame_width)) / 2;
        let y1 = (frame_height - height.min(frame_height)) / 2;
        Self {
            x1,
            y1,
            x2: x1 + width,
            y2: y1 + height,
        }
    }

    /// 点是否在区域内 (含边界)
    pub fn contains(&self, x: f32, y: f32) -> bool {
        self.x1 as f32 <= x && x <= self.x2 as f32 && self.y1 as f32 <= y && y <= self.y2 as f32
    }

    pub fn width(&self) -> u32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> u32 {
        self.y2 - self.y1
    }
}
