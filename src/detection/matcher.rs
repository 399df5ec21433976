// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//! 帧间对应匹配 (Correspondence Matcher)
//!
//! 最近质心贪心匹配, 位移门限 100px。
//! 不做互斥: 两个当前检测可能匹配到同一个上一帧检测, 低密度场景下可接受。

use super::types::{Detection, DetectionSet};

/// 默认最大位移门限 (像素)
pub const MAX_DISPLACEMENT_PX: f32 = 100.0;

/// 在上一帧中寻找对应的检测
///
/// 距离 ≥ 门限的候选被拒绝; 多个候选时取最近的, 距离相同时保留先遇到的。
pub fn find_correspondence<'a>(
    current: &Detection,
    previous: &'a [Detection],
    max_displacement: f32,
) -> Option<&'a Detection> {
    let mut best: Option<(&Detection, f32)> = None;

    for candidate in previous {
        let dist = current.centroid_distance(candidate);
        if !(dist < max_displacement) {
            continue;
        }
        match best {
            Some((_, best_dist)) if dist >= best_dist => {}
            _ => best = Some((candidate, dist)),
        }
    }

    best.map(|(candidate, _)| candidate)
}

/// 跟踪帧缓冲: (上一帧, 当前帧)
///
/// 只有新的当前帧产生时才轮换, 不保留超过一帧的身份。
#[derive(Debug, Default, Clone)]
pub struct TrackingFrames {
    previous: Vec<Detection>,
    current: Vec<Detection>,
}

impl TrackingFrames {
    pub fn new() -> Self {
        Self::default()
    }

    /// 用于匹配的参考帧
    ///
    /// 新结果算出之前, 参考帧就是最近一次产出的当前帧。
    pub fn reference(&self) -> &[Detection] {
        &self.current
    }

    pub fn previous(&self) -> &[Detection] {
        &self.previous
    }

    /// 新结果产生: previous ← current, current ← set
    pub fn advance(&mut self, set: &DetectionSet) {
        self.previous = std::mem::replace(&mut self.current, set.detections.clone());
    }
}
