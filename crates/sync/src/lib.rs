//! 同步原语
//!
//! 向文件系统与虚拟内存子系统提供锁原语：
//!
//! - [`SpinLock`] / [`RawSpinLock`]：关中断 + 自旋，用于极短的临界区
//! - [`SleepLock`]：基于 `lock_api` 的互斥锁，等待时让出处理器，
//!   用于可能阻塞在磁盘 I/O 上的临界区（FAT、缓冲区缓存、帧表）
//! - [`IntrGuard`]：RAII 中断保护
//!
//! # 架构依赖
//!
//! 此 crate 通过 `ArchOps` trait 抽象架构相关操作。
//! 使用前必须调用 `register_arch_ops` 注册实现。

#![no_std]

mod intr_guard;
mod raw_spin_lock;
mod sleep_lock;
mod spin_lock;

pub use intr_guard::*;
pub use raw_spin_lock::*;
pub use sleep_lock::*;
pub use spin_lock::*;

use core::sync::atomic::{AtomicUsize, Ordering};

/// 架构相关操作的 trait
///
/// 由 kernel crate 实现并注册，提供中断控制与让出处理器的能力
pub trait ArchOps: Send + Sync {
    /// 读取并禁用中断，返回之前的状态
    ///
    /// # Safety
    /// 调用者必须确保在适当的上下文中调用
    unsafe fn read_and_disable_interrupts(&self) -> usize;

    /// 恢复中断状态
    ///
    /// # Safety
    /// flags 必须是之前 read_and_disable_interrupts 返回的值
    unsafe fn restore_interrupts(&self, flags: usize);

    /// 中断使能位在 flags 中的掩码
    fn interrupt_enable_bit(&self) -> usize;

    /// 让出处理器，供睡眠锁在争用时调用
    fn yield_now(&self);
}

/// 全局架构操作实例（存储 fat pointer 的两个部分）
static ARCH_OPS_DATA: AtomicUsize = AtomicUsize::new(0);
static ARCH_OPS_VTABLE: AtomicUsize = AtomicUsize::new(0);

/// 注册架构操作实现
///
/// # Safety
/// 必须在单线程环境下调用；重复注册时必须传入同一个实例
pub unsafe fn register_arch_ops(ops: &'static dyn ArchOps) {
    let ptr = ops as *const dyn ArchOps;
    // SAFETY: fat pointer 的布局是 (data, vtable)
    let (data, vtable) = unsafe { core::mem::transmute::<*const dyn ArchOps, (usize, usize)>(ptr) };
    ARCH_OPS_VTABLE.store(vtable, Ordering::Release);
    ARCH_OPS_DATA.store(data, Ordering::Release);
}

/// 是否已经注册了架构操作实现
pub fn arch_ops_registered() -> bool {
    ARCH_OPS_DATA.load(Ordering::Acquire) != 0
}

/// 获取架构操作实例
#[inline]
pub(crate) fn arch_ops() -> &'static dyn ArchOps {
    let data = ARCH_OPS_DATA.load(Ordering::Acquire);
    let vtable = ARCH_OPS_VTABLE.load(Ordering::Acquire);
    if data == 0 {
        panic!("sync: ArchOps not registered, call register_arch_ops first");
    }
    // SAFETY: data 和 vtable 是通过 register_arch_ops 设置的有效指针
    unsafe { &*core::mem::transmute::<(usize, usize), *const dyn ArchOps>((data, vtable)) }
}

#[cfg(test)]
pub(crate) mod test_util {
    use super::ArchOps;
    use core::sync::atomic::{AtomicUsize, Ordering};
    use test_support::mock::arch::MOCK_ARCH_OPS;

    /// 把 test-support 的 mock 接到 `ArchOps` 上
    pub struct TestArchOps;

    impl ArchOps for TestArchOps {
        unsafe fn read_and_disable_interrupts(&self) -> usize {
            unsafe { MOCK_ARCH_OPS.read_and_disable_interrupts() }
        }

        unsafe fn restore_interrupts(&self, flags: usize) {
            unsafe { MOCK_ARCH_OPS.restore_interrupts(flags) }
        }

        fn interrupt_enable_bit(&self) -> usize {
            MOCK_ARCH_OPS.interrupt_enable_bit()
        }

        fn yield_now(&self) {
            MOCK_ARCH_OPS.yield_now()
        }
    }

    static TEST_ARCH_OPS: TestArchOps = TestArchOps;
    // 0 = uninit, 1 = initializing, 2 = ready
    static INIT: AtomicUsize = AtomicUsize::new(0);

    pub fn init() {
        match INIT.compare_exchange(0, 1, Ordering::AcqRel, Ordering::Acquire) {
            Ok(_) => {
                // SAFETY: 测试共享同一个全局 TestArchOps
                unsafe { super::register_arch_ops(&TEST_ARCH_OPS) };
                INIT.store(2, Ordering::Release);
            }
            Err(_) => {
                while INIT.load(Ordering::Acquire) != 2 {
                    core::hint::spin_loop();
                }
            }
        }
    }
}
