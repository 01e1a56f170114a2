//! 块设备模块
//!
//! 包含块设备驱动接口和内存盘实现

mod ram_disk;

pub use ram_disk::RamDisk;

/// 磁盘扇区大小（字节）
pub const SECTOR_SIZE: usize = 512;

/// 块设备驱动程序接口
///
/// 读写都以整块为单位，`buf` 长度必须等于 [`block_size`](Self::block_size)。
pub trait BlockDriver: Send + Sync {
    /// 读取块设备数据
    /// # 参数：
    /// * `block_id` - 块设备的块号
    /// * `buf` - 用于存储读取数据的缓冲区
    /// # 返回值：
    /// 如果读取成功则返回 true，否则返回 false
    fn read_block(&self, block_id: usize, buf: &mut [u8]) -> bool;

    /// 写入块设备数据
    /// # 参数：
    /// * `block_id` - 块设备的块号
    /// * `buf` - 包含要写入数据的缓冲区
    /// # 返回值：
    /// 如果写入成功则返回 true，否则返回 false
    fn write_block(&self, block_id: usize, buf: &[u8]) -> bool;

    /// 刷新到磁盘
    fn flush(&self) -> bool;

    /// 块大小（字节）
    fn block_size(&self) -> usize;

    /// 总块数
    fn total_blocks(&self) -> usize;
}
