//! 睡眠锁
//!
//! 争用时通过 [`ArchOps::yield_now`](crate::ArchOps::yield_now) 让出处理器而不是关中断自旋，
//! 因此临界区内可以执行阻塞式磁盘 I/O。数据封装交给 `lock_api`。

use core::sync::atomic::{AtomicBool, Ordering};

use crate::arch_ops;

/// 睡眠锁的原始实现
pub struct RawSleepLock {
    locked: AtomicBool,
}

// SAFETY: locked 的获取/释放使用 Acquire/Release，满足 RawMutex 的互斥约定
unsafe impl lock_api::RawMutex for RawSleepLock {
    #[allow(clippy::declare_interior_mutable_const)]
    const INIT: Self = RawSleepLock {
        locked: AtomicBool::new(false),
    };

    type GuardMarker = lock_api::GuardSend;

    fn lock(&self) {
        while !self.try_lock() {
            arch_ops().yield_now();
        }
    }

    fn try_lock(&self) -> bool {
        self.locked
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    unsafe fn unlock(&self) {
        self.locked.store(false, Ordering::Release);
    }

    fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Relaxed)
    }
}

/// 可在持有期间阻塞的互斥锁
pub type SleepLock<T> = lock_api::Mutex<RawSleepLock, T>;

/// [`SleepLock`] 的 RAII 保护器
pub type SleepLockGuard<'a, T> = lock_api::MutexGuard<'a, RawSleepLock, T>;
