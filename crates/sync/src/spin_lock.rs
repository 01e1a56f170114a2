//! 自旋锁封装
//!
//! 用 [`RawSpinLock`] 保护一份数据。

use core::cell::UnsafeCell;

use crate::raw_spin_lock::{RawSpinLock, RawSpinLockGuard};

/// 提供对数据的互斥访问的自旋锁。
///
/// 持锁期间中断关闭，临界区内不能做磁盘 I/O，也不能再去获取 [`SleepLock`](crate::SleepLock)。
///
/// # 示例
/// ```ignore
/// let lock = SpinLock::new(0);
/// *lock.lock() += 1;
/// ```
#[derive(Debug)]
pub struct SpinLock<T> {
    raw_lock: RawSpinLock,
    data: UnsafeCell<T>,
}

impl<T> SpinLock<T> {
    /// 创建一个新的 SpinLock 实例，初始化内部数据。
    pub const fn new(data: T) -> Self {
        SpinLock {
            raw_lock: RawSpinLock::new(),
            data: UnsafeCell::new(data),
        }
    }

    /// 获取自旋锁，返回可以访问内部数据的保护器。
    pub fn lock(&self) -> SpinLockGuard<'_, T> {
        let raw_guard = self.raw_lock.lock();
        SpinLockGuard {
            _raw_guard: raw_guard,
            // SAFETY: 持有 raw_guard 期间只有本保护器能访问 data
            data: unsafe { &mut *self.data.get() },
        }
    }

    /// 尝试获取自旋锁，如果成功则返回保护器，否则返回 None。
    pub fn try_lock(&self) -> Option<SpinLockGuard<'_, T>> {
        self.raw_lock.try_lock().map(|raw_guard| SpinLockGuard {
            _raw_guard: raw_guard,
            // SAFETY: 同 lock
            data: unsafe { &mut *self.data.get() },
        })
    }

    /// 独占访问时直接取得内部数据的可变引用，无需加锁
    pub fn get_mut(&mut self) -> &mut T {
        self.data.get_mut()
    }

    /// 消耗锁，取出内部数据
    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }

    /// 锁是否被占用（仅用于调试）
    pub fn is_locked(&self) -> bool {
        self.raw_lock.is_locked()
    }
}

impl<T: Default> Default for SpinLock<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

/// SpinLock 的 RAII 保护器，离开作用域时释放锁。
pub struct SpinLockGuard<'a, T> {
    _raw_guard: RawSpinLockGuard<'a>,
    data: &'a mut T,
}

impl<T> core::ops::Deref for SpinLockGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        self.data
    }
}

impl<T> core::ops::DerefMut for SpinLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.data
    }
}

// SAFETY: RawSpinLock 保证了对 data 的互斥访问
unsafe impl<T: Send> Send for SpinLock<T> {}
unsafe impl<T: Send> Sync for SpinLock<T> {}
