//! 文件系统配置的 Mock 实现
//!
//! 注意：这里不直接依赖 `fs` crate（避免循环依赖）。
//! `fs` crate 在 `cfg(test)` 下用这些数值构造卷与 `FsConfig`。

/// Mock 的文件系统配置
pub struct MockFsConfig;

impl MockFsConfig {
    pub const fn new() -> Self {
        Self
    }

    pub fn sector_size(&self) -> usize {
        512
    }

    /// 卷大小（扇区数）
    pub fn total_sectors(&self) -> usize {
        1024
    }

    /// 缓冲区缓存容量，取小值让替换路径也被覆盖到
    pub fn cache_entries(&self) -> usize {
        8
    }
}

/// 全局 Mock 实例
pub static MOCK_FS_CONFIG: MockFsConfig = MockFsConfig::new();
