//! 内存模拟块设备

use super::BlockDriver;
use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicUsize, Ordering};
use sync::SpinLock;

/// 内存模拟的块设备
///
/// 记录读写次数，测试可以据此确认缓存是否命中。
pub struct RamDisk {
    data: SpinLock<Vec<u8>>,
    block_size: usize,
    device_id: usize,
    reads: AtomicUsize,
    writes: AtomicUsize,
}

impl RamDisk {
    /// 创建 `blocks` 个块、块大小为 `block_size` 的内存磁盘
    pub fn new(blocks: usize, block_size: usize, device_id: usize) -> Arc<Self> {
        Self::from_bytes(vec![0u8; blocks * block_size], block_size, device_id)
    }

    /// 从已有镜像创建，镜像长度会向下截断到块大小的整数倍
    pub fn from_bytes(mut data: Vec<u8>, block_size: usize, device_id: usize) -> Arc<Self> {
        data.truncate(data.len() / block_size * block_size);
        Arc::new(Self {
            data: SpinLock::new(data),
            block_size,
            device_id,
            reads: AtomicUsize::new(0),
            writes: AtomicUsize::new(0),
        })
    }

    /// 导出整个镜像（用于调试和重新挂载）
    pub fn raw_data(&self) -> Vec<u8> {
        self.data.lock().clone()
    }

    /// 获取设备 ID
    pub fn device_id(&self) -> usize {
        self.device_id
    }

    /// 成功完成的 (读, 写) 块数
    pub fn io_stats(&self) -> (usize, usize) {
        (
            self.reads.load(Ordering::Relaxed),
            self.writes.load(Ordering::Relaxed),
        )
    }

    fn block_range(&self, block_id: usize, len: usize, total: usize) -> Option<(usize, usize)> {
        if len != self.block_size {
            log::warn!(
                "ramdisk{}: buffer of {} bytes, expected {}",
                self.device_id,
                len,
                self.block_size
            );
            return None;
        }
        let start = block_id.checked_mul(self.block_size)?;
        let end = start.checked_add(self.block_size)?;
        if end > total {
            log::warn!("ramdisk{}: block {} out of range", self.device_id, block_id);
            return None;
        }
        Some((start, end))
    }
}

impl BlockDriver for RamDisk {
    fn read_block(&self, block_id: usize, buf: &mut [u8]) -> bool {
        let data = self.data.lock();
        let Some((start, end)) = self.block_range(block_id, buf.len(), data.len()) else {
            return false;
        };
        buf.copy_from_slice(&data[start..end]);
        self.reads.fetch_add(1, Ordering::Relaxed);
        true
    }

    fn write_block(&self, block_id: usize, buf: &[u8]) -> bool {
        let mut data = self.data.lock();
        let Some((start, end)) = self.block_range(block_id, buf.len(), data.len()) else {
            return false;
        };
        data[start..end].copy_from_slice(buf);
        self.writes.fetch_add(1, Ordering::Relaxed);
        true
    }

    fn flush(&self) -> bool {
        true // 内存设备无需 flush
    }

    fn block_size(&self) -> usize {
        self.block_size
    }

    fn total_blocks(&self) -> usize {
        self.data.lock().len() / self.block_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SECTOR_SIZE;
    use core::sync::atomic::{AtomicUsize, Ordering};
    use sync::ArchOps;
    use test_support::mock::arch::MOCK_ARCH_OPS;

    struct DummyArchOps;

    impl ArchOps for DummyArchOps {
        unsafe fn read_and_disable_interrupts(&self) -> usize {
            unsafe { MOCK_ARCH_OPS.read_and_disable_interrupts() }
        }

        unsafe fn restore_interrupts(&self, flags: usize) {
            unsafe { MOCK_ARCH_OPS.restore_interrupts(flags) }
        }

        fn interrupt_enable_bit(&self) -> usize {
            MOCK_ARCH_OPS.interrupt_enable_bit()
        }

        fn yield_now(&self) {
            MOCK_ARCH_OPS.yield_now()
        }
    }

    static DUMMY_ARCH_OPS: DummyArchOps = DummyArchOps;
    // 0 = uninit, 1 = initializing, 2 = ready
    static SYNC_INIT: AtomicUsize = AtomicUsize::new(0);

    fn init_sync_arch_ops() {
        match SYNC_INIT.compare_exchange(0, 1, Ordering::AcqRel, Ordering::Acquire) {
            Ok(_) => {
                // Safety: tests use a single global dummy ArchOps.
                unsafe { sync::register_arch_ops(&DUMMY_ARCH_OPS) };
                SYNC_INIT.store(2, Ordering::Release);
            }
            Err(_) => {
                while SYNC_INIT.load(Ordering::Acquire) != 2 {
                    core::hint::spin_loop();
                }
            }
        }
    }

    #[test]
    fn test_ramdisk_read_write_roundtrip() {
        init_sync_arch_ops();
        let rd = RamDisk::new(8, SECTOR_SIZE, 1);
        assert_eq!(rd.block_size(), SECTOR_SIZE);
        assert_eq!(rd.total_blocks(), 8);

        let mut wbuf = [0u8; SECTOR_SIZE];
        wbuf[0] = 0xAA;
        wbuf[511] = 0x55;
        assert!(rd.write_block(3, &wbuf));

        let mut rbuf = [0u8; SECTOR_SIZE];
        assert!(rd.read_block(3, &mut rbuf));
        assert_eq!(rbuf, wbuf);

        // Other blocks remain zero.
        assert!(rd.read_block(2, &mut rbuf));
        assert_eq!(rbuf, [0u8; SECTOR_SIZE]);
        assert_eq!(rd.io_stats(), (2, 1));
    }

    #[test]
    fn test_ramdisk_bounds_and_wrong_buf_size() {
        init_sync_arch_ops();
        let rd = RamDisk::new(2, SECTOR_SIZE, 1);

        let mut bad_read = [0u8; 16];
        assert!(!rd.read_block(0, &mut bad_read));
        assert!(!rd.write_block(0, &[0u8; 16]));

        let mut ok_read = [0u8; SECTOR_SIZE];
        assert!(!rd.read_block(2, &mut ok_read)); // out of range
        assert!(!rd.write_block(usize::MAX, &ok_read));
        assert_eq!(rd.io_stats(), (0, 0));
    }

    #[test]
    fn test_ramdisk_from_bytes_truncates() {
        init_sync_arch_ops();
        let rd = RamDisk::from_bytes(vec![7u8; SECTOR_SIZE * 3 + 100], SECTOR_SIZE, 2);
        assert_eq!(rd.total_blocks(), 3);
        assert_eq!(rd.raw_data().len(), SECTOR_SIZE * 3);
        assert_eq!(rd.device_id(), 2);
    }
}
