// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//! YUV420P → RGB24 (BT.601, 定点系数 ×128)

/// 一帧 YUV420P 的三个平面
pub struct Yuv420Planes<'a> {
    pub y: &'a [u8],
    pub u: &'a [u8],
    pub v: &'a [u8],
    pub y_stride: usize,
    pub uv_stride: usize,
    pub width: usize,
    pub height: usize,
}

impl Yuv420Planes<'_> {
    /// 平面长度是否足够 (步长可大于宽度)
    pub fn is_valid(&self) -> bool {
        let chroma_rows = self.height.div_ceil(2);
        self.y_stride >= self.width
            && self.uv_stride >= self.width.div_ceil(2)
            && self.y.len() >= self.y_stride * (self.height.max(1) - 1) + self.width
            && self.u.len() >= self.uv_stride * (chroma_rows.max(1) - 1) + self.width.div_ceil(2)
            && self.v.len() >= self.uv_stride * (chroma_rows.max(1) - 1) + self.width.div_ceil(2)
    }
}

/// 输出紧密排列的 RGB, `out.len()` 必须为 width * height * 3
pub fn yuv420p_to_rgb(planes: &Yuv420Planes, out: &mut [u8]) {
    debug_assert_eq!(out.len(), planes.width * planes.height * 3);
    if planes.width == 0 {
        return;
    }

    for (row, out_row) in out.chunks_exact_mut(planes.width * 3).enumerate() {
        let y_row = &planes.y[row * planes.y_stride..];
        let uv_off = (row >> 1) * planes.uv_stride;
        let u_row = &planes.u[uv_off..];
        let v_row = &planes.v[uv_off..];

        for (x, px) in out_row.chunks_exact_mut(3).enumerate() {
            let y_val = y_row[x] as i32;
            let u_val = u_row[x >> 1] as i32 - 128;
            let v_val = v_row[x >> 1] as i32 - 128;

            px[0] = (y_val + ((v_val * 179) >> 7)).clamp(0, 255) as u8;
            px[1] = (y_val - ((u_val * 44) >> 7) - ((v_val * 91) >> 7)).clamp(0, 255) as u8;
            px[2] = (y_val + ((u_val * 227) >> 7)).clamp(0, 255) as u8;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gray() {
        let y = vec![128u8; 4 * 2];
        let uv = vec![128u8; 2];
        let planes = Yuv420Planes {
            y: &y,
            u: &uv,
            v: &uv,
            y_stride: 4,
            uv_stride: 2,
            width: 4,
            height: 2,
        };
        assert!(planes.is_valid());
        let mut out = vec![0u8; 4 * 2 * 3];
        yuv420p_to_rgb(&planes, &mut out);
        assert!(out.iter().all(|&c| c == 128));
    }

    #[test]
    fn test_red_with_padding() {
        // 行步长 8 > 宽度 2
        let mut y = vec![0u8; 8 * 2];
        y[0] = 76;
        y[1] = 76;
        y[8] = 76;
        y[9] = 76;
        let u = vec![84u8; 4];
        let v = vec![255u8; 4];
        let planes = Yuv420Planes {
            y: &y,
            u: &u,
            v: &v,
            y_stride: 8,
            uv_stride: 4,
            width: 2,
            height: 2,
        };
        assert!(planes.is_valid());
        let mut out = vec![0u8; 2 * 2 * 3];
        yuv420p_to_rgb(&planes, &mut out);
        for px in out.chunks_exact(3) {
            assert!(px[0] > 240, "r={}", px[0]);
            assert!(px[1] < 10, "g={}", px[1]);
            assert_eq!(px[2], 0);
        }
    }

    #[test]
    fn test_short_plane_invalid() {
        let y = vec![0u8; 3];
        let uv = vec![0u8; 1];
        let planes = Yuv420Planes {
            y: &y,
            u: &uv,
            v: &uv,
            y_stride: 2,
            uv_stride: 1,
            width: 2,
            height: 2,
        };
        assert!(!planes.is_valid());
    }
}
