//! 架构相关操作的 Mock 实现
//!
//! 注意：这里不直接依赖 `sync` crate（避免循环依赖）。
//! 使用方在测试代码中定义一个实现 `sync::ArchOps` 的包装类型，转发到这里。

use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// 中断使能位
const SIE: usize = 0x2;

/// Mock 架构操作
pub struct MockArchOps {
    pub interrupt_state: AtomicBool,
    pub yields: AtomicUsize,
}

impl MockArchOps {
    pub const fn new() -> Self {
        Self {
            interrupt_state: AtomicBool::new(true),
            yields: AtomicUsize::new(0),
        }
    }

    pub unsafe fn read_and_disable_interrupts(&self) -> usize {
        if self.interrupt_state.swap(false, Ordering::SeqCst) {
            SIE
        } else {
            0
        }
    }

    pub unsafe fn restore_interrupts(&self, flags: usize) {
        self.interrupt_state.store(flags & SIE != 0, Ordering::SeqCst);
    }

    pub fn interrupt_enable_bit(&self) -> usize {
        SIE
    }

    /// 宿主机上没有调度器，记一次数后自旋
    pub fn yield_now(&self) {
        self.yields.fetch_add(1, Ordering::Relaxed);
        core::hint::spin_loop();
    }
}

/// 全局 Mock 实例
pub static MOCK_ARCH_OPS: MockArchOps = MockArchOps::new();
