//! 文件系统运行参数

/// 挂载时使用的文件系统参数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FsConfig {
    /// 缓冲区缓存的扇区数
    pub cache_entries: usize,
    /// 格式化时根目录预留的目录项数
    pub root_dir_entries: usize,
    /// mkdir 新建目录预留的目录项数
    pub dir_entries: usize,
    /// 路径解析时允许跟随的符号链接层数
    pub max_symlink_depth: usize,
}

impl Default for FsConfig {
    fn default() -> Self {
        Self {
            cache_entries: 64,
            root_dir_entries: 16,
            dir_entries: 16,
            max_symlink_depth: 8,
        }
    }
}
