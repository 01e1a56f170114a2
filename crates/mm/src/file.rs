//! 文件映射接口 trait 定义

use alloc::sync::Arc;

/// 可映射到内存的文件
///
/// 此 trait 抽象了文件映射所需的最小接口，由内核把文件系统的文件适配进来。
/// 错误以负的 errno 表示。
pub trait MmFile: Send + Sync {
    /// 从指定偏移读取数据到缓冲区
    fn read_at(&self, offset: usize, buf: &mut [u8]) -> Result<usize, isize>;

    /// 将缓冲区数据写入指定偏移
    fn write_at(&self, offset: usize, buf: &[u8]) -> Result<usize, isize>;

    /// 文件当前长度
    fn len(&self) -> usize;

    /// 文件是否为空
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 重新打开同一文件，得到独立的句柄
    fn reopen(&self) -> Result<Arc<dyn MmFile>, isize>;
}
