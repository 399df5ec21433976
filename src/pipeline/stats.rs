// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
use std::time::Instant;

/// 每秒统计一次的速率计 (FPS)
#[derive(Debug, Clone)]
pub struct RateMeter {
    count: u64,
    last: Instant,
    current: f64,
}

impl Default for RateMeter {
    fn default() -> Self {
        Self::new()
    }
}

impl RateMeter {
    pub fn new() -> Self {
        Self {
            count: 0,
            last: Instant::now(),
            current: 0.0,
        }
    }

    /// 计一次; 满一秒时返回新的速率
    pub fn tick(&mut self) -> Option<f64> {
        self.count += 1;
        let elapsed = self.last.elapsed().as_secs_f64();
        if elapsed >= 1.0 {
            self.current = self.count as f64 / elapsed;
            self.count = 0;
            self.last = Instant::now();
            Some(self.current)
        } else {
            None
        }
    }

    pub fn current(&self) -> f64 {
        self.current
    }
}
