//! MMU 接口
//!
//! 虚拟内存层只通过 [`Mmu`] 操作页表：建立/清除映射、查询与修改
//! 访问位和脏位。[`SoftMmu`] 是纯软件实现，用映射表模拟页表项，
//! 用户态访存由 [`AddressSpace`](crate::AddressSpace) 在软件中模拟陷入。

use alloc::collections::BTreeMap;
use bitflags::bitflags;

use crate::address::Vpn;
use crate::frame::FrameId;

bitflags! {
    /// 页表项标志
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PteFlags: u8 {
        /// 有效
        const VALID = 1 << 0;
        /// 可写
        const WRITABLE = 1 << 1;
        /// 已访问
        const ACCESSED = 1 << 2;
        /// 已写入
        const DIRTY = 1 << 3;
    }
}

/// 一个地址空间的页表操作
pub trait Mmu: Send {
    /// 把 `vpn` 映射到 `frame`，已有映射时覆盖。失败返回 false。
    fn set_page(&mut self, vpn: Vpn, frame: FrameId, writable: bool) -> bool;

    /// 清除 `vpn` 的映射
    fn clear_page(&mut self, vpn: Vpn);

    /// `vpn` 当前映射到的帧
    fn translate(&self, vpn: Vpn) -> Option<FrameId>;

    /// 映射是否可写
    fn is_writable(&self, vpn: Vpn) -> bool;

    /// 映射的脏位
    fn is_dirty(&self, vpn: Vpn) -> bool;

    /// 设置映射的脏位
    fn set_dirty(&mut self, vpn: Vpn, dirty: bool);

    /// 映射的访问位
    fn is_accessed(&self, vpn: Vpn) -> bool;

    /// 设置映射的访问位
    fn set_accessed(&mut self, vpn: Vpn, accessed: bool);
}

#[derive(Debug, Clone, Copy)]
struct SoftPte {
    frame: FrameId,
    flags: PteFlags,
}

/// 软件页表
///
/// 只接受用户地址 `[0, limit)` 内的映射，超出范围的 `set_page` 返回 false。
#[derive(Debug)]
pub struct SoftMmu {
    entries: BTreeMap<Vpn, SoftPte>,
    limit: usize,
}

impl SoftMmu {
    /// 创建只接受 `limit` 以下地址的页表
    pub fn new(limit: usize) -> Self {
        Self {
            entries: BTreeMap::new(),
            limit,
        }
    }

    /// 当前有效映射数
    pub fn mapped_count(&self) -> usize {
        self.entries.len()
    }

    /// `vpn` 的页表项标志
    pub fn flags(&self, vpn: Vpn) -> Option<PteFlags> {
        self.entries.get(&vpn).map(|pte| pte.flags)
    }

    fn update(&mut self, vpn: Vpn, flag: PteFlags, on: bool) {
        if let Some(pte) = self.entries.get_mut(&vpn) {
            pte.flags.set(flag, on);
        }
    }
}

impl Mmu for SoftMmu {
    fn set_page(&mut self, vpn: Vpn, frame: FrameId, writable: bool) -> bool {
        if vpn.start_addr() >= self.limit {
            return false;
        }
        let mut flags = PteFlags::VALID;
        flags.set(PteFlags::WRITABLE, writable);
        self.entries.insert(vpn, SoftPte { frame, flags });
        true
    }

    fn clear_page(&mut self, vpn: Vpn) {
        self.entries.remove(&vpn);
    }

    fn translate(&self, vpn: Vpn) -> Option<FrameId> {
        self.entries.get(&vpn).map(|pte| pte.frame)
    }

    fn is_writable(&self, vpn: Vpn) -> bool {
        self.flags(vpn)
            .is_some_and(|f| f.contains(PteFlags::WRITABLE))
    }

    fn is_dirty(&self, vpn: Vpn) -> bool {
        self.flags(vpn).is_some_and(|f| f.contains(PteFlags::DIRTY))
    }

    fn set_dirty(&mut self, vpn: Vpn, dirty: bool) {
        self.update(vpn, PteFlags::DIRTY, dirty);
    }

    fn is_accessed(&self, vpn: Vpn) -> bool {
        self.flags(vpn)
            .is_some_and(|f| f.contains(PteFlags::ACCESSED))
    }

    fn set_accessed(&mut self, vpn: Vpn, accessed: bool) {
        self.update(vpn, PteFlags::ACCESSED, accessed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_soft_mmu_flags() {
        let mut mmu = SoftMmu::new(0x1_0000);
        assert!(mmu.set_page(Vpn(1), FrameId(7), false));
        assert_eq!(mmu.translate(Vpn(1)), Some(FrameId(7)));
        assert!(!mmu.is_writable(Vpn(1)));

        mmu.set_dirty(Vpn(1), true);
        assert!(mmu.is_dirty(Vpn(1)));
        // 重新映射会重置标志
        assert!(mmu.set_page(Vpn(1), FrameId(8), true));
        assert!(mmu.is_writable(Vpn(1)));
        assert!(!mmu.is_dirty(Vpn(1)));

        mmu.clear_page(Vpn(1));
        assert_eq!(mmu.translate(Vpn(1)), None);
        assert!(!mmu.is_dirty(Vpn(1)));
    }

    #[test]
    fn test_soft_mmu_rejects_out_of_range() {
        let mut mmu = SoftMmu::new(0x1_0000);
        assert!(!mmu.set_page(Vpn(0x10), FrameId(0), true));
        assert_eq!(mmu.mapped_count(), 0);
    }
}
