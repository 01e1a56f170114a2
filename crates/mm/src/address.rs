//! 地址与页号
//!
//! 用户虚拟地址直接用 `usize` 表示，页号用 [`Vpn`] 包装，
//! SPT 和 MMU 都以页号为键。

use core::fmt;
use core::ops::{Add, Sub};

/// 页大小（字节）
pub const PAGE_SIZE: usize = 4096;

/// 虚拟页号
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Vpn(pub usize);

impl Vpn {
    /// 包含地址 `va` 的页
    pub const fn from_addr_floor(va: usize) -> Self {
        Self(va / PAGE_SIZE)
    }

    /// 页的起始地址
    pub const fn start_addr(self) -> usize {
        self.0 * PAGE_SIZE
    }

    /// 页号的原始值
    pub const fn as_usize(self) -> usize {
        self.0
    }
}

impl Add<usize> for Vpn {
    type Output = Vpn;

    fn add(self, rhs: usize) -> Vpn {
        Vpn(self.0 + rhs)
    }
}

impl Sub<Vpn> for Vpn {
    type Output = usize;

    fn sub(self, rhs: Vpn) -> usize {
        self.0 - rhs.0
    }
}

impl fmt::Debug for Vpn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Vpn({:#x})", self.start_addr())
    }
}

/// 地址是否按页对齐
#[inline]
pub const fn is_page_aligned(addr: usize) -> bool {
    addr % PAGE_SIZE == 0
}

/// 向下对齐到页边界
#[inline]
pub const fn page_round_down(addr: usize) -> usize {
    addr & !(PAGE_SIZE - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vpn_from_addr() {
        assert_eq!(Vpn::from_addr_floor(0x1fff), Vpn(1));
        assert_eq!(Vpn(3).start_addr(), 0x3000);
        assert_eq!(Vpn(3) + 2, Vpn(5));
        assert_eq!(Vpn(5) - Vpn(3), 2);
        assert_eq!(page_round_down(0x2345), 0x2000);
        assert!(is_page_aligned(0x4000));
        assert!(!is_page_aligned(0x4001));
    }
}
