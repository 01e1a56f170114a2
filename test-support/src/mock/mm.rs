//! 虚拟内存配置的 Mock 实现
//!
//! 注意：这里不直接依赖 `mm` crate（避免循环依赖）。
//! `mm` crate 在 `cfg(test)` 下用这些数值构造 `VmConfig`。

/// Mock 的虚拟内存配置
///
/// 帧数量故意取得很小，测试里几次分配就能触发换出。
pub struct MockVmConfig;

impl MockVmConfig {
    pub const fn new() -> Self {
        Self
    }

    pub fn page_size(&self) -> usize {
        4096
    }

    pub fn user_stack_top(&self) -> usize {
        0x8000_0000
    }

    pub fn max_stack_size(&self) -> usize {
        16 * 4096
    }

    pub fn frame_limit(&self) -> usize {
        4
    }

    /// 交换盘扇区数：够放 64 页
    pub fn swap_sectors(&self) -> usize {
        64 * 8
    }
}

/// 全局 Mock 实例
pub static MOCK_VM_CONFIG: MockVmConfig = MockVmConfig::new();
