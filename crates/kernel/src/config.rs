//! 内核启动参数

use fs::FsConfig;
use mm::VmConfig;

/// 启动参数：文件系统与虚拟内存各自的配置，以及是否格式化文件系统盘
#[derive(Debug, Clone, Copy, Default)]
pub struct KernelConfig {
    /// 文件系统参数
    pub fs: FsConfig,
    /// 虚拟内存参数
    pub vm: VmConfig,
    /// 挂载前格式化文件系统盘
    pub format: bool,
}

/// 进程可同时打开的文件数
pub const MAX_OPEN_FILES: usize = 128;

/// 第一个文件描述符，0/1/2 留给控制台
pub const FIRST_FD: usize = 3;
