//! 虚拟内存配置

/// 一个 [`Vm`](crate::Vm) 实例的运行参数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VmConfig {
    /// 用户栈顶地址（不含）
    pub user_stack_top: usize,
    /// 栈可以向下自动增长的最大字节数
    pub max_stack_size: usize,
    /// 可用物理帧数，用完后开始换出
    pub frame_limit: usize,
}

impl VmConfig {
    /// 栈增长允许到达的最低地址
    pub fn stack_floor(&self) -> usize {
        self.user_stack_top.saturating_sub(self.max_stack_size)
    }
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            user_stack_top: 0x4748_0000,
            max_stack_size: 256 * crate::PAGE_SIZE,
            frame_limit: 1024,
        }
    }
}
