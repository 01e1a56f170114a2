//! 缓冲区缓存
//!
//! 卷上所有扇区读写都经过这里。缓存以整扇区为单位，写回式：
//! 脏扇区只在被替换或 [`BufferCache::flush`] 时写回磁盘。
//! 替换采用 clock 算法。
//!
//! 每次操作持有一把全局睡眠锁，调用者不要在持锁期间做与本缓存无关的 I/O。

use alloc::boxed::Box;
use alloc::sync::Arc;
use alloc::vec::Vec;
use device::BlockDriver;
use sync::SleepLock;

use crate::error::{FsError, FsResult};
use crate::layout::SECTOR_SIZE;

struct CacheSlot {
    sector: u32,
    data: Box<[u8; SECTOR_SIZE]>,
    dirty: bool,
    referenced: bool,
}

struct CacheInner {
    slots: Vec<CacheSlot>,
    capacity: usize,
    hand: usize,
}

/// 扇区缓存
pub struct BufferCache {
    disk: Arc<dyn BlockDriver>,
    total_sectors: u32,
    inner: SleepLock<CacheInner>,
}

impl BufferCache {
    /// 在 `disk` 之上创建最多缓存 `capacity` 个扇区的缓存
    pub fn new(disk: Arc<dyn BlockDriver>, capacity: usize) -> Self {
        let total_sectors = disk.total_blocks().min(u32::MAX as usize) as u32;
        Self {
            disk,
            total_sectors,
            inner: SleepLock::new(CacheInner {
                slots: Vec::new(),
                capacity: capacity.max(1),
                hand: 0,
            }),
        }
    }

    /// 底层设备的扇区数
    pub fn total_sectors(&self) -> u32 {
        self.total_sectors
    }

    /// 读取整个扇区到 `buf`
    pub fn read(&self, sector: u32, buf: &mut [u8]) -> FsResult<()> {
        if buf.len() != SECTOR_SIZE {
            return Err(FsError::InvalidArgument);
        }
        let mut inner = self.inner.lock();
        let idx = self.slot_for(&mut inner, sector, true)?;
        let slot = &mut inner.slots[idx];
        buf.copy_from_slice(&slot.data[..]);
        slot.referenced = true;
        Ok(())
    }

    /// 用 `buf` 覆盖整个扇区
    pub fn write(&self, sector: u32, buf: &[u8]) -> FsResult<()> {
        if buf.len() != SECTOR_SIZE {
            return Err(FsError::InvalidArgument);
        }
        let mut inner = self.inner.lock();
        // 整扇区覆盖，未命中时无需先从磁盘读入
        let idx = self.slot_for(&mut inner, sector, false)?;
        let slot = &mut inner.slots[idx];
        slot.data.copy_from_slice(buf);
        slot.dirty = true;
        slot.referenced = true;
        Ok(())
    }

    /// 把扇区清零
    pub fn zero(&self, sector: u32) -> FsResult<()> {
        self.write(sector, &[0u8; SECTOR_SIZE])
    }

    /// 写回所有脏扇区并刷新设备
    pub fn flush(&self) -> FsResult<()> {
        let mut inner = self.inner.lock();
        for slot in inner.slots.iter_mut().filter(|s| s.dirty) {
            self.write_back(slot)?;
        }
        if !self.disk.flush() {
            return Err(FsError::IoError);
        }
        Ok(())
    }

    /// 当前缓存中的脏扇区数
    pub fn dirty_count(&self) -> usize {
        self.inner.lock().slots.iter().filter(|s| s.dirty).count()
    }

    fn write_back(&self, slot: &mut CacheSlot) -> FsResult<()> {
        if !self.disk.write_block(slot.sector as usize, &slot.data[..]) {
            log::error!("cache: write back of sector {} failed", slot.sector);
            return Err(FsError::IoError);
        }
        slot.dirty = false;
        Ok(())
    }

    /// 找到（或腾出）存放 `sector` 的槽位，`load` 为 true 时未命中会从磁盘读入
    fn slot_for(&self, inner: &mut CacheInner, sector: u32, load: bool) -> FsResult<usize> {
        if sector >= self.total_sectors {
            return Err(FsError::OutOfRange);
        }
        if let Some(idx) = inner.slots.iter().position(|s| s.sector == sector) {
            return Ok(idx);
        }

        let idx = if inner.slots.len() < inner.capacity {
            inner.slots.push(CacheSlot {
                sector,
                data: Box::new([0u8; SECTOR_SIZE]),
                dirty: false,
                referenced: false,
            });
            inner.slots.len() - 1
        } else {
            let victim = Self::clock_victim(inner);
            let slot = &mut inner.slots[victim];
            if slot.dirty {
                self.write_back(slot)?;
            }
            slot.sector = sector;
            slot.referenced = false;
            victim
        };

        let slot = &mut inner.slots[idx];
        if load {
            if !self.disk.read_block(sector as usize, &mut slot.data[..]) {
                // 槽位内容已不可信，让它不再命中任何扇区
                slot.sector = u32::MAX;
                return Err(FsError::IoError);
            }
        } else {
            slot.data.fill(0);
        }
        Ok(idx)
    }

    fn clock_victim(inner: &mut CacheInner) -> usize {
        loop {
            let idx = inner.hand;
            inner.hand = (inner.hand + 1) % inner.slots.len();
            let slot = &mut inner.slots[idx];
            if slot.referenced {
                slot.referenced = false;
            } else {
                return idx;
            }
        }
    }
}
