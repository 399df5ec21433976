// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
/// 检测模型实现
///
/// - **YOLOv8** (feature `onnx`): ONNX Runtime 推理, 实现 `PersonDetector`
///   - 预处理: 等比缩放到方形输入 (左上对齐, 灰色填充)
///   - 后处理: `[1, 4 + nc, anchors]` 解码 → 类别过滤 → NMS
#[cfg(feature = "onnx")]
pub mod yolov8;

#[cfg(feature = "onnx")]
pub use yolov8::YoloPersonDetector;

use crate::detection::types::RawDetection;

/// 非极大值抑制: 按置信度降序, 与已保留框 IoU 超过阈值的被丢弃
pub fn non_max_suppression(xs: &mut Vec<RawDetection>, iou_threshold: f32) {
    xs.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut current_index = 0;
    for index in 0..xs.len() {
        let mut drop = false;
        for prev_index in 0..current_index {
            if xs[prev_index].class_id == xs[index].class_id
                && xs[prev_index].bbox.iou(&xs[index].bbox) > iou_threshold
            {
                drop = true;
                break;
            }
        }
        if !drop {
            xs.swap(current_index, index);
            current_index += 1;
        }
    }
    xs.truncate(current_index);
}

/// 等比缩放比例 (原图 → 模型输入)
pub fn letterbox_ratio(width: u32, height: u32, input_size: u32) -> f32 {
    (input_size as f32 / width as f32).min(input_size as f32 / height as f32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::types::BBox;

    fn det(x: f32, confidence: f32, class_id: u32) -> RawDetection {
        RawDetection {
            bbox: BBox::new(x, 0.0, x + 100.0, 200.0),
            class_id,
            confidence,
        }
    }

    #[test]
    fn test_nms_keeps_best_of_overlap() {
        let mut xs = vec![det(0.0, 0.8, 0), det(5.0, 0.9, 0), det(400.0, 0.75, 0)];
        non_max_suppression(&mut xs, 0.45);
        assert_eq!(xs.len(), 2);
        assert_eq!(xs[0].confidence, 0.9);
        assert_eq!(xs[1].confidence, 0.75);
    }

    #[test]
    fn test_nms_per_class() {
        let mut xs = vec![det(0.0, 0.8, 0), det(0.0, 0.9, 2)];
        non_max_suppression(&mut xs, 0.45);
        assert_eq!(xs.len(), 2);
    }

    #[test]
    fn test_letterbox_ratio() {
        assert_eq!(letterbox_ratio(1280, 720, 640), 0.5);
        assert_eq!(letterbox_ratio(640, 360, 640), 1.0);
    }
}
