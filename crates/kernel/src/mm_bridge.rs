//! 文件系统与 mm crate 的桥接模块
//!
//! 为 fs crate 的 [`File`] 实现 mm crate 的 [`MmFile`] trait，
//! 使得文件可以用于内存映射。

use alloc::sync::Arc;
use fs::File;
use mm::MmFile;

/// File 的包装类型，实现 MmFile trait
pub struct FileWrapper(pub File);

impl MmFile for FileWrapper {
    fn read_at(&self, offset: usize, buf: &mut [u8]) -> Result<usize, isize> {
        self.0.read_at(offset, buf).map_err(|e| e.to_errno())
    }

    fn write_at(&self, offset: usize, buf: &[u8]) -> Result<usize, isize> {
        self.0.write_at(offset, buf).map_err(|e| e.to_errno())
    }

    fn len(&self) -> usize {
        self.0.len()
    }

    fn reopen(&self) -> Result<Arc<dyn MmFile>, isize> {
        Ok(Arc::new(FileWrapper(self.0.reopen())))
    }
}
