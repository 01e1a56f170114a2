//! 物理帧表
//!
//! 帧以竞技场方式存放，页面只持有 [`FrameId`]。每个帧记录一个弱的反向引用
//! [`PageRef`]（属主）以及写时复制共享时的其他共享者；帧本身的生命周期
//! 不由这些引用决定，由 [`Vm`](crate::Vm) 在换出或销毁时显式释放。
//!
//! ## 换出顺序
//!
//! 所有已分配的帧按分配先后排在一条 FIFO 队列里，队首就是下一个换出对象。
//! 释放后再分配的帧排到队尾。
//!
//! 帧内存按需创建，最多 `limit` 个；分配时清零。

use alloc::boxed::Box;
use alloc::collections::VecDeque;
use alloc::vec;
use alloc::vec::Vec;

use crate::address::{PAGE_SIZE, Vpn};
use crate::vm::SpaceId;

/// 帧编号
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FrameId(pub usize);

/// 指向某个地址空间中某一页的弱引用
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct PageRef {
    /// 所属地址空间
    pub space: SpaceId,
    /// 页号
    pub vpn: Vpn,
}

struct Frame {
    data: Box<[u8]>,
    owner: Option<PageRef>,
    sharers: Vec<PageRef>,
}

/// 帧表
pub struct FrameTable {
    frames: Vec<Frame>,
    free: Vec<FrameId>,
    fifo: VecDeque<FrameId>,
    limit: usize,
}

impl FrameTable {
    /// 创建最多管理 `limit` 个帧的帧表
    pub fn new(limit: usize) -> Self {
        Self {
            frames: Vec::new(),
            free: Vec::new(),
            fifo: VecDeque::new(),
            limit,
        }
    }

    /// 帧数上限
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// 已分配的帧数
    pub fn in_use(&self) -> usize {
        self.fifo.len()
    }

    /// 分配一个清零的帧并排到 FIFO 队尾，没有空闲帧时返回 `None`
    pub fn alloc(&mut self) -> Option<FrameId> {
        let id = if let Some(id) = self.free.pop() {
            self.frames[id.0].data.fill(0);
            id
        } else if self.frames.len() < self.limit {
            self.frames.push(Frame {
                data: vec![0u8; PAGE_SIZE].into_boxed_slice(),
                owner: None,
                sharers: Vec::new(),
            });
            FrameId(self.frames.len() - 1)
        } else {
            return None;
        };
        self.fifo.push_back(id);
        Some(id)
    }

    /// 下一个换出对象：最早分配、仍在使用的帧
    pub fn oldest(&self) -> Option<FrameId> {
        self.fifo.front().copied()
    }

    /// 按分配顺序列出在用的帧
    pub fn fifo_order(&self) -> Vec<FrameId> {
        self.fifo.iter().copied().collect()
    }

    /// 释放帧，清除所有反向引用
    pub fn release(&mut self, id: FrameId) {
        let frame = &mut self.frames[id.0];
        frame.owner = None;
        frame.sharers.clear();
        self.fifo.retain(|&f| f != id);
        self.free.push(id);
    }

    /// 帧内容
    pub fn data(&self, id: FrameId) -> &[u8] {
        &self.frames[id.0].data
    }

    /// 可写的帧内容
    pub fn data_mut(&mut self, id: FrameId) -> &mut [u8] {
        &mut self.frames[id.0].data
    }

    /// 把 `src` 的内容复制到 `dst`
    pub fn copy(&mut self, src: FrameId, dst: FrameId) {
        if src == dst {
            return;
        }
        let (lo, hi) = if src.0 < dst.0 { (src, dst) } else { (dst, src) };
        let (head, tail) = self.frames.split_at_mut(hi.0);
        let (a, b) = (&mut head[lo.0], &mut tail[0]);
        if src == lo {
            b.data.copy_from_slice(&a.data);
        } else {
            a.data.copy_from_slice(&b.data);
        }
    }

    /// 帧的属主
    pub fn owner(&self, id: FrameId) -> Option<PageRef> {
        self.frames[id.0].owner
    }

    /// 设置帧的属主
    pub fn set_owner(&mut self, id: FrameId, page: PageRef) {
        self.frames[id.0].owner = Some(page);
    }

    /// 记录一个写时复制的共享者
    pub fn add_sharer(&mut self, id: FrameId, page: PageRef) {
        self.frames[id.0].sharers.push(page);
    }

    /// 引用该帧的所有页，属主在前
    pub fn refs(&self, id: FrameId) -> Vec<PageRef> {
        let frame = &self.frames[id.0];
        frame.owner.iter().chain(frame.sharers.iter()).copied().collect()
    }

    /// 引用该帧的页数
    pub fn ref_count(&self, id: FrameId) -> usize {
        let frame = &self.frames[id.0];
        usize::from(frame.owner.is_some()) + frame.sharers.len()
    }

    /// 解除 `page` 对帧的引用，返回剩余引用数。
    ///
    /// 属主离开时由第一个共享者接任属主。
    pub fn detach(&mut self, id: FrameId, page: PageRef) -> usize {
        let frame = &mut self.frames[id.0];
        if frame.owner == Some(page) {
            frame.owner = if frame.sharers.is_empty() {
                None
            } else {
                Some(frame.sharers.remove(0))
            };
        } else {
            frame.sharers.retain(|&s| s != page);
        }
        self.ref_count(id)
    }
}
