//! 自旋锁实现
//!
//! 一个原子标志加一个 [`IntrGuard`]：持锁期间本地中断保持关闭。

use crate::intr_guard::IntrGuard;
use core::{
    hint,
    sync::atomic::{AtomicBool, Ordering},
};

/// 不携带数据的自旋锁，不可重入。
///
/// # 示例
/// ```ignore
/// let lock = RawSpinLock::new();
/// {
///   let guard = lock.lock(); // 获取锁，禁用中断
///   // 临界区代码
/// } // 离开作用域，自动释放锁并恢复中断状态
/// ```
#[derive(Debug)]
pub struct RawSpinLock {
    locked: AtomicBool,
}

impl RawSpinLock {
    /// 创建一个新的 RawSpinLock 实例。
    pub const fn new() -> Self {
        RawSpinLock {
            locked: AtomicBool::new(false),
        }
    }

    /// 获取自旋锁，返回 RAII 保护器。
    pub fn lock(&self) -> RawSpinLockGuard<'_> {
        let intr_guard = IntrGuard::new();

        while self
            .locked
            .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            // 先只读等待，避免在争用时反复写缓存行
            while self.locked.load(Ordering::Relaxed) {
                hint::spin_loop();
            }
        }

        RawSpinLockGuard {
            lock: self,
            _intr_guard: intr_guard,
        }
    }

    /// 尝试获取自旋锁，失败时立即恢复中断状态并返回 None。
    pub fn try_lock(&self) -> Option<RawSpinLockGuard<'_>> {
        let intr_guard = IntrGuard::new();

        self.locked
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .ok()
            .map(|_| RawSpinLockGuard {
                lock: self,
                _intr_guard: intr_guard,
            })
    }

    /// 锁是否被占用（仅用于调试）
    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Relaxed)
    }

    fn unlock(&self) {
        self.locked.store(false, Ordering::Release);
    }
}

impl Default for RawSpinLock {
    fn default() -> Self {
        Self::new()
    }
}

/// 自动释放自旋锁和恢复中断状态的 RAII 结构体
///
/// 字段按声明顺序析构：先释放锁标志，再恢复中断。
pub struct RawSpinLockGuard<'a> {
    lock: &'a RawSpinLock,
    _intr_guard: IntrGuard,
}

impl Drop for RawSpinLockGuard<'_> {
    fn drop(&mut self) {
        self.lock.unlock();
    }
}
