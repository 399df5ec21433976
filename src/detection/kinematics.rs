// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//! 距离/速度估算 (Kinematics)
//!
//! 针孔相机模型: 距离与人体像素高度成反比。
//! 速度按两帧质心位移换算, 像素→厘米的比例随估算距离增大。

use crate::config::KinematicsConfig;

use super::types::Detection;

/// cm/s → km/h
const CM_PER_S_TO_KM_PER_H: f32 = 3.6 / 100.0;

#[derive(Clone, Debug)]
pub struct KinematicsEstimator {
    person_height_cm: f32,
    focal_length: f32,
    min_pixel_height: f32,
    min_distance_cm: f32,
    max_distance_cm: f32,
    max_speed_kmh: f32,
    reference_scale_px: f32,
}

impl Default for KinematicsEstimator {
    fn default() -> Self {
        Self::new(&KinematicsConfig::default())
    }
}

impl KinematicsEstimator {
    pub fn new(config: &KinematicsConfig) -> Self {
        Self {
            person_height_cm: config.person_height_cm,
            focal_length: config.focal_length,
            min_pixel_height: config.min_pixel_height,
            min_distance_cm: config.min_distance_cm,
            max_distance_cm: config.max_distance_cm,
            max_speed_kmh: config.max_speed_kmh,
            reference_scale_px: config.reference_scale_px,
        }
    }

    /// 像素高度 → 距离 (cm)
    ///
    /// 高度不超过 30px 时精度不足, 返回 0 (未知)。
    pub fn distance(&self, pixel_height: f32) -> f32 {
        if !(pixel_height > self.min_pixel_height) {
            return 0.0;
        }
        let distance_cm = (self.person_height_cm * self.focal_length) / pixel_height;
        distance_cm.clamp(self.min_distance_cm, self.max_distance_cm)
    }

    /// 两帧对应检测之间的速度 (km/h)
    pub fn speed(&self, current: &Detection, previous: &Detection, delta_t: f64) -> f32 {
        if !(delta_t > 0.0) {
            return 0.0;
        }

        let dist_px = current.centroid_distance(previous);

        // 用平均距离决定像素→厘米比例
        let avg_distance = (current.distance_cm + previous.distance_cm) / 2.0;
        if !(avg_distance > 0.0) {
            return 0.0;
        }
        let cm_per_px = avg_distance / self.reference_scale_px;
        let dist_cm = dist_px * cm_per_px;

        let vel_cm_s = dist_cm / delta_t as f32;
        let vel_km_h = vel_cm_s * CM_PER_S_TO_KM_PER_H;
        if vel_km_h.is_nan() {
            return 0.0;
        }
        vel_km_h.clamp(0.0, self.max_speed_kmh)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::types::BBox;
    use proptest::prelude::*;

    fn at(cx: f32, cy: f32, distance: f32, t: f64) -> Detection {
        Detection::new(BBox::new(cx - 20.0, cy - 50.0, cx + 20.0, cy + 50.0), 0.9, distance, t)
    }

    #[test]
    fn test_distance_small_box_unknown() {
        let k = KinematicsEstimator::default();
        assert_eq!(k.distance(30.0), 0.0);
        assert_eq!(k.distance(0.0), 0.0);
        assert_eq!(k.distance(-5.0), 0.0);
    }

    #[test]
    fn test_distance_clamped_far() {
        // 170 * 800 / 100 = 1360 → 1000
        let k = KinematicsEstimator::default();
        assert_eq!(k.distance(100.0), 1000.0);
    }

    #[test]
    fn test_distance_in_range() {
        // 170 * 800 / 340 = 400
        let k = KinematicsEstimator::default();
        assert!((k.distance(340.0) - 400.0).abs() < 1e-3);
    }

    #[test]
    fn test_distance_clamped_near() {
        let k = KinematicsEstimator::default();
        assert_eq!(k.distance(5000.0), 50.0);
    }

    #[test]
    fn test_speed_walking_pace() {
        // 50px, 500cm → 83.3cm / 0.5s → 6.0 km/h
        let k = KinematicsEstimator::default();
        let prev = at(400.0, 300.0, 500.0, 10.0);
        let curr = at(430.0, 340.0, 500.0, 10.5);
        let v = k.speed(&curr, &prev, 0.5);
        assert!((v - 6.0).abs() < 1e-3, "v = {v}");
    }

    #[test]
    fn test_speed_non_positive_dt() {
        let k = KinematicsEstimator::default();
        let prev = at(0.0, 0.0, 500.0, 0.0);
        let curr = at(50.0, 0.0, 500.0, 0.0);
        assert_eq!(k.speed(&curr, &prev, 0.0), 0.0);
        assert_eq!(k.speed(&curr, &prev, -1.0), 0.0);
    }

    #[test]
    fn test_speed_unknown_distance() {
        let k = KinematicsEstimator::default();
        let prev = at(0.0, 0.0, 0.0, 0.0);
        let curr = at(50.0, 0.0, 0.0, 0.5);
        assert_eq!(k.speed(&curr, &prev, 0.5), 0.0);
    }

    #[test]
    fn test_speed_clamped() {
        let k = KinematicsEstimator::default();
        let prev = at(0.0, 0.0, 1000.0, 0.0);
        let curr = at(99.0, 0.0, 1000.0, 0.01);
        assert_eq!(k.speed(&curr, &prev, 0.01), 50.0);
    }

    proptest! {
        #[test]
        fn prop_distance_bounds(h in -100.0f32..5000.0) {
            let k = KinematicsEstimator::default();
            let d = k.distance(h);
            if h <= 30.0 {
                prop_assert_eq!(d, 0.0);
            } else {
                prop_assert!((50.0..=1000.0).contains(&d));
            }
        }

        #[test]
        fn prop_speed_bounds(
            dx in -500.0f32..500.0,
            dy in -500.0f32..500.0,
            d1 in 0.0f32..1000.0,
            d2 in 0.0f32..1000.0,
            dt in -1.0f64..5.0,
        ) {
            let k = KinematicsEstimator::default();
            let prev = at(640.0, 360.0, d1, 0.0);
            let curr = at(640.0 + dx, 360.0 + dy, d2, dt);
            let v = k.speed(&curr, &prev, dt);
            if dt <= 0.0 {
                prop_assert_eq!(v, 0.0);
            }
            prop_assert!((0.0..=50.0).contains(&v));
        }
    }
}
