// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//
// YOLOv8 人体检测 (ONNX Runtime)
// 包含: 模型加载、预处理、推理、后处理

use std::path::Path;
use std::time::Instant;

use anyhow::{anyhow, Context, Result};
use image::{imageops::FilterType, RgbImage};
use ndarray::{Array, ArrayView2, Axis, Ix4};
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use tracing::{debug, info};

use super::{letterbox_ratio, non_max_suppression};
use crate::config::DetectionConfig;
use crate::detection::detector::PersonDetector;
use crate::detection::types::{BBox, RawDetection};
use crate::error::SentinelError;

const CXYWH_OFFSET: usize = 4;
/// 填充色 (与训练时一致)
const PAD_VALUE: f32 = 144.0 / 255.0;

pub struct YoloPersonDetector {
    session: Session,
    input_name: String,
    input_size: u32,
    conf: f32,
    iou: f32,
    person_class_id: u32,
    profile: bool,
}

impl YoloPersonDetector {
    /// 加载模型, 失败即致命错误
    pub fn new(config: &DetectionConfig) -> std::result::Result<Self, SentinelError> {
        Self::build(config).map_err(|e| {
            SentinelError::ModelUnavailable(format!("{}: {e:#}", config.model_path))
        })
    }

    fn build(config: &DetectionConfig) -> Result<Self> {
        let path = Path::new(&config.model_path);
        if !path.exists() {
            return Err(anyhow!("模型文件不存在"));
        }

        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .commit_from_file(path)
            .context("ONNX Runtime 加载失败")?;

        let input_name = session
            .inputs
            .first()
            .map(|i| i.name.clone())
            .unwrap_or_else(|| "images".to_string());

        info!(
            "🧠 模型已加载: {} (输入 {}x{})",
            config.model_path, config.inference_size, config.inference_size
        );

        Ok(Self {
            session,
            input_name,
            input_size: config.inference_size,
            conf: config.min_confidence,
            iou: config.iou_threshold,
            person_class_id: config.person_class_id,
            profile: false,
        })
    }

    pub fn with_profile(mut self, profile: bool) -> Self {
        self.profile = profile;
        self
    }

    /// 等比缩放到方形输入 (左上对齐), NCHW, 0..1
    pub fn preprocess(&self, image: &RgbImage) -> Array<f32, Ix4> {
        let size = self.input_size as usize;
        let mut ys = Array::from_elem((1, 3, size, size), PAD_VALUE);

        let ratio = letterbox_ratio(image.width(), image.height(), self.input_size);
        let w_new = ((image.width() as f32 * ratio).round() as u32).clamp(1, self.input_size);
        let h_new = ((image.height() as f32 * ratio).round() as u32).clamp(1, self.input_size);
        let resized = image::imageops::resize(image, w_new, h_new, FilterType::Triangle);

        for (x, y, rgb) in resized.enumerate_pixels() {
            let (x, y) = (x as usize, y as usize);
            let [r, g, b] = rgb.0;
            ys[[0, 0, y, x]] = r as f32 / 255.0;
            ys[[0, 1, y, x]] = g as f32 / 255.0;
            ys[[0, 2, y, x]] = b as f32 / 255.0;
        }
        ys
    }
}

impl PersonDetector for YoloPersonDetector {
    fn detect(&mut self, image: &RgbImage) -> Result<Vec<RawDetection>> {
        let t_pre = Instant::now();
        let xs = self.preprocess(image);
        if self.profile {
            debug!("[Model Preprocess]: {:?}", t_pre.elapsed());
        }

        let t_run = Instant::now();
        let outputs = self
            .session
            .run(ort::inputs![self.input_name.as_str() => xs.view()]?)?;
        let output = outputs
            .values()
            .next()
            .ok_or_else(|| anyhow!("模型没有输出"))?;
        let preds = output.try_extract_tensor::<f32>()?;
        if self.profile {
            debug!("[Model Inference]: {:?}", t_run.elapsed());
        }

        // [1, 4 + nc, anchors]
        if preds.ndim() != 3 || preds.shape()[1] <= CXYWH_OFFSET {
            return Err(anyhow!("不支持的输出形状: {:?}", preds.shape()));
        }
        let preds = preds
            .index_axis(Axis(0), 0)
            .into_dimensionality::<ndarray::Ix2>()?;

        let ratio = letterbox_ratio(image.width(), image.height(), self.input_size);
        let mut detections = decode_predictions(
            preds,
            ratio,
            (image.width() as f32, image.height() as f32),
            self.conf,
            Some(self.person_class_id),
        );
        non_max_suppression(&mut detections, self.iou);
        Ok(detections)
    }

    fn name(&self) -> &str {
        "YOLOv8"
    }
}

/// 解码 `[4 + nc, anchors]`: (cx, cy, w, h) 以输入尺寸为单位, 除以 ratio 还原到原图
pub fn decode_predictions(
    preds: ArrayView2<f32>,
    ratio: f32,
    (width_original, height_original): (f32, f32),
    conf: f32,
    class_filter: Option<u32>,
) -> Vec<RawDetection> {
    let mut data = Vec::new();

    for pred in preds.axis_iter(Axis(1)) {
        let Some((id, confidence)) = pred
            .iter()
            .skip(CXYWH_OFFSET)
            .copied()
            .enumerate()
            .reduce(|max, x| if x.1 > max.1 { x } else { max })
        else {
            continue;
        };

        if confidence < conf {
            continue;
        }
        if class_filter.is_some_and(|c| c as usize != id) {
            continue;
        }

        let cx = pred[0] / ratio;
        let cy = pred[1] / ratio;
        let w = pred[2] / ratio;
        let h = pred[3] / ratio;
        let x1 = (cx - w / 2.0).clamp(0.0, width_original);
        let y1 = (cy - h / 2.0).clamp(0.0, height_original);
        let x2 = (cx + w / 2.0).clamp(0.0, width_original);
        let y2 = (cy + h / 2.0).clamp(0.0, height_original);

        data.push(RawDetection {
            bbox: BBox::new(x1, y1, x2, y2),
            class_id: id as u32,
            confidence,
        });
    }

    data
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    /// 2 个类别, 3 个 anchor
    fn preds() -> Array2<f32> {
        let mut a = Array2::<f32>::zeros((6, 3));
        // anchor 0: 人, 0.9
        a.column_mut(0)
            .assign(&ndarray::arr1(&[100.0, 100.0, 40.0, 120.0, 0.9, 0.1]));
        // anchor 1: 其它类别
        a.column_mut(1)
            .assign(&ndarray::arr1(&[300.0, 100.0, 40.0, 120.0, 0.2, 0.8]));
        // anchor 2: 置信度不足
        a.column_mut(2)
            .assign(&ndarray::arr1(&[500.0, 100.0, 40.0, 120.0, 0.3, 0.1]));
        a
    }

    #[test]
    fn test_decode_person_only() {
        let p = preds();
        let dets = decode_predictions(p.view(), 0.5, (1280.0, 720.0), 0.5, Some(0));
        assert_eq!(dets.len(), 1);
        assert_eq!(dets[0].class_id, 0);
        // 输入坐标 / 0.5
        assert_eq!(dets[0].bbox, BBox::new(160.0, 80.0, 240.0, 320.0));
    }

    #[test]
    fn test_decode_all_classes() {
        let p = preds();
        let dets = decode_predictions(p.view(), 1.0, (640.0, 640.0), 0.5, None);
        assert_eq!(dets.len(), 2);
        assert_eq!(dets[1].class_id, 1);
    }

    #[test]
    fn test_decode_clamps_to_image() {
        let mut a = Array2::<f32>::zeros((5, 1));
        a.column_mut(0)
            .assign(&ndarray::arr1(&[5.0, 5.0, 40.0, 40.0, 0.9]));
        let dets = decode_predictions(a.view(), 1.0, (640.0, 640.0), 0.5, None);
        assert_eq!(dets[0].bbox.x1, 0.0);
        assert_eq!(dets[0].bbox.y1, 0.0);
    }
}
