//! 补充页表 (SPT)
//!
//! 每个地址空间一张，按页号精确查找，遍历时保持插入顺序。

use alloc::collections::BTreeMap;
use alloc::vec::Vec;

use crate::address::Vpn;
use crate::error::{VmError, VmResult};
use crate::page::Page;

/// 补充页表
#[derive(Debug, Default)]
pub struct Spt {
    pages: BTreeMap<Vpn, Page>,
    order: Vec<Vpn>,
}

impl Spt {
    /// 创建空表
    pub fn new() -> Self {
        Self::default()
    }

    /// 页数
    pub fn len(&self) -> usize {
        self.pages.len()
    }

    /// 是否为空
    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    /// 是否存在该页
    pub fn contains(&self, vpn: Vpn) -> bool {
        self.pages.contains_key(&vpn)
    }

    /// 查找页
    pub fn find(&self, vpn: Vpn) -> Option<&Page> {
        self.pages.get(&vpn)
    }

    /// 查找页（可变）
    pub fn find_mut(&mut self, vpn: Vpn) -> Option<&mut Page> {
        self.pages.get_mut(&vpn)
    }

    /// 插入页，同一页号已存在时失败
    pub fn insert(&mut self, page: Page) -> VmResult<()> {
        if self.pages.contains_key(&page.vpn) {
            return Err(VmError::AlreadyMapped);
        }
        self.order.push(page.vpn);
        self.pages.insert(page.vpn, page);
        Ok(())
    }

    /// 移除页
    pub fn remove(&mut self, vpn: Vpn) -> Option<Page> {
        let page = self.pages.remove(&vpn)?;
        self.order.retain(|&v| v != vpn);
        Some(page)
    }

    /// 按插入顺序列出页号
    pub fn vpns(&self) -> Vec<Vpn> {
        self.order.clone()
    }

    /// 按插入顺序移出全部页
    pub fn drain(&mut self) -> Vec<Page> {
        let order = core::mem::take(&mut self.order);
        order
            .into_iter()
            .filter_map(|vpn| self.pages.remove(&vpn))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::PageType;

    fn page(vpn: usize) -> Page {
        Page::new_uninit(Vpn(vpn), true, PageType::Anon, None, None)
    }

    #[test]
    fn test_insert_find_remove() {
        let mut spt = Spt::new();
        spt.insert(page(3)).unwrap();
        assert_eq!(spt.insert(page(3)), Err(VmError::AlreadyMapped));
        assert!(spt.find(Vpn(3)).is_some());
        assert!(spt.find(Vpn(4)).is_none());
        assert!(spt.remove(Vpn(3)).is_some());
        assert!(spt.remove(Vpn(3)).is_none());
        assert!(spt.is_empty());
    }

    #[test]
    fn test_insertion_order() {
        let mut spt = Spt::new();
        for vpn in [9, 2, 5] {
            spt.insert(page(vpn)).unwrap();
        }
        spt.remove(Vpn(2));
        spt.insert(page(1)).unwrap();
        assert_eq!(spt.vpns(), [Vpn(9), Vpn(5), Vpn(1)]);
        let drained: Vec<_> = spt.drain().into_iter().map(|p| p.vpn).collect();
        assert_eq!(drained, [Vpn(9), Vpn(5), Vpn(1)]);
        assert!(spt.is_empty());
    }
}
