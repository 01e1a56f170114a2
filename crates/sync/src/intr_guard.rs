//! 中断保护器
//!
//! 创建时关闭本地中断，销毁时恢复进入前的状态。
//! 只能挡住本地 CPU 上“任务 vs 中断”的并发，跨 CPU 的共享数据仍需配合锁使用。

use crate::arch_ops;

/// 中断保护器，基于 RAII 实现中断保护。
///
/// # 示例
/// ```ignore
/// {
///     let guard = IntrGuard::new(); // 禁用中断
///     // 临界区代码
/// } // 离开作用域，自动恢复中断状态
/// ```
pub struct IntrGuard {
    flags: usize,
}

impl IntrGuard {
    /// 原子地禁用中断并返回一个 IntrGuard 实例。
    pub fn new() -> Self {
        // SAFETY: flags 会原样交还给 restore_interrupts
        let flags = unsafe { arch_ops().read_and_disable_interrupts() };
        IntrGuard { flags }
    }

    /// 进入临界区前中断是否处于启用状态
    pub fn was_enabled(&self) -> bool {
        self.flags & arch_ops().interrupt_enable_bit() != 0
    }
}

impl Default for IntrGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for IntrGuard {
    fn drop(&mut self) {
        // SAFETY: flags 是在创建 IntrGuard 时保存的
        unsafe { arch_ops().restore_interrupts(self.flags) };
    }
}
