//! 交换区
//!
//! 交换盘按页大小划分为槽位，每个槽位占 `PAGE_SIZE / block_size` 个连续块。
//! 槽位占用情况用位图跟踪（0=空闲，1=占用），位为 1 当且仅当某个匿名页的
//! 内容正存放在该槽位里。
//!
//! 读写都逐块进行。

use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;
use device::BlockDriver;

use crate::address::PAGE_SIZE;
use crate::error::{VmError, VmResult};

const EIO: isize = -5;

/// 交换槽位编号
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct SwapSlot(pub usize);

/// 交换区
pub struct SwapTable {
    disk: Arc<dyn BlockDriver>,
    blocks_per_slot: usize,
    /// 位图数据，每个 bit 表示一个槽位
    bitmap: Vec<u64>,
    total_slots: usize,
    used: usize,
    /// 上次分配的位置提示（按 u64 计）
    last_alloc_hint: usize,
}

impl SwapTable {
    /// 在 `disk` 上建立交换区
    pub fn new(disk: Arc<dyn BlockDriver>) -> Self {
        let block_size = disk.block_size().max(1);
        let blocks_per_slot = (PAGE_SIZE / block_size).max(1);
        let total_slots = disk.total_blocks() / blocks_per_slot;
        log::debug!(
            "swap: {} slots of {} blocks each",
            total_slots,
            blocks_per_slot
        );
        Self {
            disk,
            blocks_per_slot,
            bitmap: vec![0u64; total_slots.div_ceil(64)],
            total_slots,
            used: 0,
            last_alloc_hint: 0,
        }
    }

    /// 槽位总数
    pub fn total_slots(&self) -> usize {
        self.total_slots
    }

    /// 已占用的槽位数
    pub fn used_slots(&self) -> usize {
        self.used
    }

    /// 槽位是否被占用
    pub fn is_used(&self, slot: SwapSlot) -> bool {
        slot.0 < self.total_slots && self.bitmap[slot.0 / 64] & (1u64 << (slot.0 % 64)) != 0
    }

    fn alloc_slot(&mut self) -> Option<SwapSlot> {
        let words = self.bitmap.len();
        for offset in 0..words {
            let idx = (self.last_alloc_hint + offset) % words;
            let word = self.bitmap[idx];
            if word == u64::MAX {
                continue;
            }
            let slot = idx * 64 + (!word).trailing_zeros() as usize;
            if slot >= self.total_slots {
                continue;
            }
            self.bitmap[idx] |= 1u64 << (slot % 64);
            self.used += 1;
            self.last_alloc_hint = idx;
            return Some(SwapSlot(slot));
        }
        None
    }

    /// 释放槽位
    pub fn free(&mut self, slot: SwapSlot) {
        if !self.is_used(slot) {
            log::warn!("swap: freeing unused slot {}", slot.0);
            return;
        }
        self.bitmap[slot.0 / 64] &= !(1u64 << (slot.0 % 64));
        self.used -= 1;
    }

    /// 把一页内容写入新槽位
    pub fn swap_out(&mut self, page: &[u8]) -> VmResult<SwapSlot> {
        let slot = self.alloc_slot().ok_or(VmError::NoSwapSpace)?;
        if let Err(e) = self.write(slot, page) {
            self.free(slot);
            return Err(e);
        }
        Ok(slot)
    }

    /// 读回槽位内容并释放槽位
    pub fn swap_in(&mut self, slot: SwapSlot, page: &mut [u8]) -> VmResult<()> {
        self.read(slot, page)?;
        self.free(slot);
        Ok(())
    }

    /// 复制槽位内容到一个新槽位
    pub fn duplicate(&mut self, slot: SwapSlot) -> VmResult<SwapSlot> {
        let mut page = vec![0u8; PAGE_SIZE];
        self.read(slot, &mut page)?;
        self.swap_out(&page)
    }

    /// 读出槽位内容，不释放
    pub fn read(&self, slot: SwapSlot, page: &mut [u8]) -> VmResult<()> {
        if !self.is_used(slot) || page.len() != PAGE_SIZE {
            return Err(VmError::InvalidArgument);
        }
        let block_size = PAGE_SIZE / self.blocks_per_slot;
        for (i, chunk) in page.chunks_mut(block_size).enumerate() {
            if !self.disk.read_block(slot.0 * self.blocks_per_slot + i, chunk) {
                log::error!("swap: read of slot {} failed", slot.0);
                return Err(VmError::Io(EIO));
            }
        }
        Ok(())
    }

    fn write(&self, slot: SwapSlot, page: &[u8]) -> VmResult<()> {
        if page.len() != PAGE_SIZE {
            return Err(VmError::InvalidArgument);
        }
        let block_size = PAGE_SIZE / self.blocks_per_slot;
        for (i, chunk) in page.chunks(block_size).enumerate() {
            if !self.disk.write_block(slot.0 * self.blocks_per_slot + i, chunk) {
                log::error!("swap: write of slot {} failed", slot.0);
                return Err(VmError::Io(EIO));
            }
        }
        Ok(())
    }
}
