// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//! 单槽缓冲 (Single-slot buffer)
//!
//! 最多保存一个待处理项: 写入时覆盖未消费的旧项 (最新优先), 读取为空时立即返回 None。

use parking_lot::{Condvar, Mutex};
use std::time::Duration;

pub struct SingleSlot<T> {
    item: Mutex<Option<T>>,
    ready: Condvar,
}

impl<T> Default for SingleSlot<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> SingleSlot<T> {
    pub fn new() -> Self {
        Self {
            item: Mutex::new(None),
            ready: Condvar::new(),
        }
    }

    /// 写入, 返回被覆盖的旧项
    pub fn put(&self, item: T) -> Option<T> {
        let displaced = self.item.lock().replace(item);
        self.ready.notify_one();
        displaced
    }

    /// 非阻塞读取
    pub fn take(&self) -> Option<T> {
        self.item.lock().take()
    }

    /// 最多等待 timeout, 期间有新项则取出
    pub fn take_timeout(&self, timeout: Duration) -> Option<T> {
        let mut guard = self.item.lock();
        if guard.is_none() {
            self.ready.wait_for(&mut guard, timeout);
        }
        guard.take()
    }

    pub fn is_empty(&self) -> bool {
        self.item.lock().is_none()
    }

    /// 唤醒等待者 (用于退出)
    pub fn wake(&self) {
        self.ready.notify_all();
    }
}
