//! 单处理器的架构操作
//!
//! 内核在单个处理器上运行，没有真实的中断控制器：中断状态只是一个标志位，
//! 睡眠锁争用时让出处理器退化为自旋等待。

use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use sync::ArchOps;

/// 标志位中表示中断使能的位
const IRQ_ENABLE: usize = 1 << 1;

/// 单处理器架构操作
pub struct UniprocessorArchOps {
    irq_enabled: AtomicBool,
}

impl UniprocessorArchOps {
    const fn new() -> Self {
        Self {
            irq_enabled: AtomicBool::new(true),
        }
    }

    /// 当前中断是否打开
    pub fn interrupts_enabled(&self) -> bool {
        self.irq_enabled.load(Ordering::Acquire)
    }
}

impl ArchOps for UniprocessorArchOps {
    unsafe fn read_and_disable_interrupts(&self) -> usize {
        if self.irq_enabled.swap(false, Ordering::AcqRel) {
            IRQ_ENABLE
        } else {
            0
        }
    }

    unsafe fn restore_interrupts(&self, flags: usize) {
        self.irq_enabled
            .store(flags & IRQ_ENABLE != 0, Ordering::Release);
    }

    fn interrupt_enable_bit(&self) -> usize {
        IRQ_ENABLE
    }

    fn yield_now(&self) {
        core::hint::spin_loop();
    }
}

/// 全局实例
pub static ARCH_OPS: UniprocessorArchOps = UniprocessorArchOps::new();

// 0 = 未注册, 1 = 正在注册, 2 = 已注册
static STATE: AtomicUsize = AtomicUsize::new(0);

/// 向 sync 注册架构操作，可重复调用
pub fn init() {
    match STATE.compare_exchange(0, 1, Ordering::AcqRel, Ordering::Acquire) {
        Ok(_) => {
            // Safety: 只有第一个调用者会走到这里，注册的总是同一个静态实例
            unsafe { sync::register_arch_ops(&ARCH_OPS) };
            STATE.store(2, Ordering::Release);
        }
        Err(_) => {
            while STATE.load(Ordering::Acquire) != 2 {
                core::hint::spin_loop();
            }
        }
    }
}
