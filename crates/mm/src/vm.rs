//! 虚拟内存上下文
//!
//! [`Vm`] 持有一个内核实例的全部虚拟内存状态：帧表、交换区，以及每个地址空间的
//! SPT 与 MMU。这些状态放在同一把睡眠锁里，“选出牺牲帧 → 换出 → 复用”、
//! 缺页处理、写时复制和 fork 复制都在一个临界区内完成。
//!
//! fork 另外先持有 `fork_lock`，与换出锁区分开。
//!
//! # 锁顺序
//!
//! 虚拟内存锁 → 文件系统锁。文件页的读入与写回在持有虚拟内存锁时调用
//! [`MmFile`]，文件系统不会反过来调用虚拟内存。

use alloc::boxed::Box;
use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use alloc::vec::Vec;
use device::BlockDriver;
use sync::SleepLock;

use crate::address::{PAGE_SIZE, Vpn, is_page_aligned};
use crate::config::VmConfig;
use crate::error::{VmError, VmResult};
use crate::file::MmFile;
use crate::frame::{FrameId, FrameTable, PageRef};
use crate::mmu::Mmu;
use crate::page::{FileSlice, Page, PageInit, PageState, PageType, split_file_span};
use crate::space::AddressSpace;
use crate::spt::Spt;
use crate::swap::SwapTable;

/// 地址空间编号
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SpaceId(pub u64);

pub(crate) struct Space {
    pub(crate) spt: Spt,
    pub(crate) mmu: Box<dyn Mmu>,
    /// mmap 区域：起始页 → 页数
    mappings: BTreeMap<Vpn, usize>,
}

pub(crate) struct VmState {
    config: VmConfig,
    pub(crate) frames: FrameTable,
    swap: SwapTable,
    spaces: BTreeMap<SpaceId, Space>,
    next_id: u64,
}

/// 虚拟内存上下文
pub struct Vm {
    config: VmConfig,
    pub(crate) state: SleepLock<VmState>,
    pub(crate) fork_lock: SleepLock<()>,
}

impl Vm {
    /// 创建虚拟内存上下文，`swap_disk` 整盘用作交换区
    pub fn new(config: VmConfig, swap_disk: Arc<dyn BlockDriver>) -> Arc<Self> {
        log::info!(
            "vm: {} frames, stack {:#x} - {:#x}",
            config.frame_limit,
            config.stack_floor(),
            config.user_stack_top
        );
        Arc::new(Self {
            config,
            state: SleepLock::new(VmState {
                config,
                frames: FrameTable::new(config.frame_limit),
                swap: SwapTable::new(swap_disk),
                spaces: BTreeMap::new(),
                next_id: 1,
            }),
            fork_lock: SleepLock::new(()),
        })
    }

    /// 运行参数
    pub fn config(&self) -> &VmConfig {
        &self.config
    }

    /// 创建一个空的地址空间
    pub fn create_space(self: &Arc<Self>, mmu: Box<dyn Mmu>) -> AddressSpace {
        let mut state = self.state.lock();
        let id = SpaceId(state.next_id);
        state.next_id += 1;
        state.spaces.insert(
            id,
            Space {
                spt: Spt::new(),
                mmu,
                mappings: BTreeMap::new(),
            },
        );
        AddressSpace::new(Arc::clone(self), id)
    }

    /// 存活的地址空间数
    pub fn space_count(&self) -> usize {
        self.state.lock().spaces.len()
    }

    /// 已分配的帧数
    pub fn frames_in_use(&self) -> usize {
        self.state.lock().frames.in_use()
    }

    /// 按换出顺序列出在用的帧
    pub fn frame_fifo(&self) -> Vec<FrameId> {
        self.state.lock().frames.fifo_order()
    }

    /// 引用某帧的所有页，属主在前
    pub fn frame_refs(&self, frame: FrameId) -> Vec<PageRef> {
        self.state.lock().frames.refs(frame)
    }

    /// 已占用的交换槽位数
    pub fn swap_slots_in_use(&self) -> usize {
        self.state.lock().swap.used_slots()
    }

    /// 所有驻留页及其帧
    pub fn resident_pages(&self) -> Vec<(PageRef, FrameId)> {
        let state = self.state.lock();
        let mut out = Vec::new();
        for (&space, s) in &state.spaces {
            for vpn in s.spt.vpns() {
                if let Some(frame) = s.spt.find(vpn).and_then(|p| p.frame) {
                    out.push((PageRef { space, vpn }, frame));
                }
            }
        }
        out
    }

    pub(crate) fn destroy_space(&self, id: SpaceId) {
        if let Err(e) = self.state.lock().destroy_space(id) {
            log::error!("vm: tearing down space {:?} failed: {:?}", id, e);
        }
    }
}

impl VmState {
    pub(crate) fn space(&self, id: SpaceId) -> VmResult<&Space> {
        self.spaces.get(&id).ok_or(VmError::NoSuchSpace)
    }

    pub(crate) fn space_mut(&mut self, id: SpaceId) -> VmResult<&mut Space> {
        self.spaces.get_mut(&id).ok_or(VmError::NoSuchSpace)
    }

    /// 分配一个帧；没有空闲帧时换出 FIFO 队首的帧
    pub(crate) fn get_frame(&mut self) -> VmResult<FrameId> {
        if let Some(frame) = self.frames.alloc() {
            return Ok(frame);
        }
        let victim = self.frames.oldest().ok_or(VmError::OutOfMemory)?;
        if let Err(e) = self.evict(victim) {
            log::error!("vm: evicting {:?} failed: {:?}", victim, e);
            return Err(VmError::OutOfMemory);
        }
        self.frames.alloc().ok_or(VmError::OutOfMemory)
    }

    /// 换出帧上的所有页（写时复制共享时每个共享者各自换出），然后释放帧
    fn evict(&mut self, frame: FrameId) -> VmResult<()> {
        for page in self.frames.refs(frame) {
            self.swap_out(page, frame)?;
            self.frames.detach(frame, page);
        }
        self.frames.release(frame);
        Ok(())
    }

    fn swap_out(&mut self, page_ref: PageRef, frame: FrameId) -> VmResult<()> {
        let Self {
            frames,
            swap,
            spaces,
            ..
        } = self;
        let space = spaces
            .get_mut(&page_ref.space)
            .ok_or(VmError::NoSuchSpace)?;
        let page = space
            .spt
            .find_mut(page_ref.vpn)
            .ok_or(VmError::NotMapped)?;
        let data = frames.data(frame);
        match &mut page.state {
            PageState::Anon { slot } => *slot = Some(swap.swap_out(data)?),
            PageState::File { slice } => {
                if space.mmu.is_dirty(page_ref.vpn) {
                    slice.write_back(data)?;
                }
            }
            PageState::Uninit { .. } => return Err(VmError::InvalidArgument),
        }
        space.mmu.clear_page(page_ref.vpn);
        page.frame = None;
        Ok(())
    }

    /// 为页分配帧、建立映射并读入内容。已驻留时什么也不做。
    pub(crate) fn claim(&mut self, id: SpaceId, vpn: Vpn) -> VmResult<()> {
        let page = self.space(id)?.spt.find(vpn).ok_or(VmError::NotMapped)?;
        if page.frame.is_some() {
            return Ok(());
        }
        let frame = self.get_frame()?;
        if let Err(e) = self.install(id, vpn, frame) {
            self.frames.release(frame);
            return Err(e);
        }
        Ok(())
    }

    fn install(&mut self, id: SpaceId, vpn: Vpn, frame: FrameId) -> VmResult<()> {
        let Self {
            frames,
            swap,
            spaces,
            ..
        } = self;
        let space = spaces.get_mut(&id).ok_or(VmError::NoSuchSpace)?;
        let page = space.spt.find_mut(vpn).ok_or(VmError::NotMapped)?;
        if !space.mmu.set_page(vpn, frame, page.writable) {
            return Err(VmError::MapFailed);
        }

        let data = frames.data_mut(frame);
        let loaded = if page.is_uninit() {
            page.initialize(data)
        } else {
            match &mut page.state {
                PageState::Anon { slot } => match slot.take() {
                    Some(s) => swap.swap_in(s, data).inspect_err(|_| *slot = Some(s)),
                    None => Ok(()),
                },
                PageState::File { slice } => slice.load(data),
                PageState::Uninit { .. } => Ok(()),
            }
        };
        if let Err(e) = loaded {
            space.mmu.clear_page(vpn);
            return Err(e);
        }

        page.frame = Some(frame);
        frames.set_owner(frame, PageRef { space: id, vpn });
        Ok(())
    }

    /// 缺页处理
    pub(crate) fn handle_fault(
        &mut self,
        id: SpaceId,
        va: usize,
        is_write: bool,
        not_present: bool,
    ) -> VmResult<()> {
        log::trace!(
            "vm: fault at {:#x} (write: {}, not present: {})",
            va,
            is_write,
            not_present
        );
        if va >= self.config.user_stack_top {
            return Err(VmError::AccessViolation);
        }
        let vpn = Vpn::from_addr_floor(va);
        let Some(page) = self.space(id)?.spt.find(vpn) else {
            if is_write && va >= self.config.stack_floor() {
                return self.grow_stack(id, vpn);
            }
            return Err(VmError::AccessViolation);
        };
        if is_write && !page.true_writable {
            return Err(VmError::AccessViolation);
        }
        let writable = page.writable;
        if page.frame.is_none() {
            self.claim(id, vpn)?;
        }
        if is_write && !writable {
            self.break_cow(id, vpn)?;
        }
        Ok(())
    }

    fn grow_stack(&mut self, id: SpaceId, vpn: Vpn) -> VmResult<()> {
        log::debug!("vm: growing stack to {:#x}", vpn.start_addr());
        self.space_mut(id)?
            .spt
            .insert(Page::new_uninit(vpn, true, PageType::Anon, None, None))?;
        if let Err(e) = self.claim(id, vpn) {
            self.space_mut(id)?.spt.remove(vpn);
            return Err(e);
        }
        Ok(())
    }

    fn resident_frame(&self, id: SpaceId, vpn: Vpn) -> VmResult<Option<FrameId>> {
        let page = self.space(id)?.spt.find(vpn).ok_or(VmError::NotMapped)?;
        Ok(page.frame)
    }

    /// 写时复制：帧仍被共享时复制一份私有帧，否则直接恢复写权限
    fn break_cow(&mut self, id: SpaceId, vpn: Vpn) -> VmResult<()> {
        let page_ref = PageRef { space: id, vpn };
        let shared = self.resident_frame(id, vpn)?.ok_or(VmError::NotMapped)?;
        if self.frames.ref_count(shared) > 1 {
            let fresh = self.get_frame()?;
            match self.resident_frame(id, vpn)? {
                Some(old) => {
                    self.frames.copy(old, fresh);
                    self.frames.detach(old, page_ref);
                    self.frames.set_owner(fresh, page_ref);
                    if let Some(page) = self.space_mut(id)?.spt.find_mut(vpn) {
                        page.frame = Some(fresh);
                    }
                }
                // 分配新帧时共享帧本身被换出，重新载入得到的就是私有帧
                None => {
                    self.frames.release(fresh);
                    self.claim(id, vpn)?;
                }
            }
        }

        let space = self.space_mut(id)?;
        let page = space.spt.find_mut(vpn).ok_or(VmError::NotMapped)?;
        let frame = page.frame.ok_or(VmError::NotMapped)?;
        page.writable = true;
        remap(space.mmu.as_mut(), vpn, frame, true)
    }

    /// 把 `src` 的所有页复制到 `dst`：驻留页以只读方式共享同一帧，
    /// 帧的属主仍是 `src` 中的页，`dst` 的页登记为共享者。
    pub(crate) fn copy_space(&mut self, dst: SpaceId, src: SpaceId) -> VmResult<()> {
        let mut child = self.spaces.remove(&dst).ok_or(VmError::NoSuchSpace)?;
        let result = self.copy_into(&mut child, dst, src);
        self.spaces.insert(dst, child);
        result
    }

    fn copy_into(&mut self, child: &mut Space, dst: SpaceId, src: SpaceId) -> VmResult<()> {
        let Self {
            frames,
            swap,
            spaces,
            ..
        } = self;
        let parent = spaces.get_mut(&src).ok_or(VmError::NoSuchSpace)?;
        child.mappings = parent.mappings.clone();

        for vpn in parent.spt.vpns() {
            let Some(page) = parent.spt.find_mut(vpn) else {
                continue;
            };
            let copy = match &page.state {
                PageState::Uninit { .. } => page.duplicate_uninit()?,
                PageState::Anon { slot: Some(slot) } => Page {
                    vpn,
                    writable: page.writable,
                    true_writable: page.true_writable,
                    frame: None,
                    mmap: page.mmap,
                    state: PageState::Anon {
                        slot: Some(swap.duplicate(*slot)?),
                    },
                },
                PageState::Anon { slot: None } | PageState::File { .. } => {
                    let state = match &page.state {
                        PageState::File { slice } => PageState::File {
                            slice: slice.duplicate()?,
                        },
                        _ => PageState::Anon { slot: None },
                    };
                    if let Some(frame) = page.frame {
                        page.writable = false;
                        remap(parent.mmu.as_mut(), vpn, frame, false)?;
                    }
                    Page {
                        vpn,
                        writable: page.writable,
                        true_writable: page.true_writable,
                        frame: page.frame,
                        mmap: page.mmap,
                        state,
                    }
                }
            };

            let frame = copy.frame;
            child.spt.insert(copy)?;
            if let Some(frame) = frame {
                frames.add_sharer(frame, PageRef { space: dst, vpn });
                if !child.mmu.set_page(vpn, frame, false) {
                    return Err(VmError::MapFailed);
                }
            }
        }
        Ok(())
    }

    /// 建立一段文件映射，每页一个尚未加载的文件页
    pub(crate) fn mmap(
        &mut self,
        id: SpaceId,
        addr: usize,
        length: usize,
        writable: bool,
        file: &Arc<dyn MmFile>,
        offset: usize,
    ) -> VmResult<usize> {
        if addr == 0 || !is_page_aligned(addr) || !is_page_aligned(offset) || length == 0 {
            return Err(VmError::InvalidArgument);
        }
        let end = addr.checked_add(length).ok_or(VmError::InvalidArgument)?;
        if end > self.config.stack_floor() {
            return Err(VmError::InvalidArgument);
        }
        let file_len = file.len();
        if file_len == 0 {
            return Err(VmError::InvalidArgument);
        }

        let space = self.space_mut(id)?;
        let start = Vpn::from_addr_floor(addr);
        let pages = length.div_ceil(PAGE_SIZE);
        if (0..pages).any(|i| space.spt.contains(start + i)) {
            return Err(VmError::AlreadyMapped);
        }

        let file = file.reopen().map_err(VmError::Io)?;
        let read_bytes = file_len.saturating_sub(offset).min(length);
        for (i, (read, zero)) in split_file_span(read_bytes, length).enumerate() {
            let slice = FileSlice {
                file: Arc::clone(&file),
                offset: offset + i * PAGE_SIZE,
                read_bytes: read,
                zero_bytes: zero,
            };
            let mut page =
                Page::new_uninit(start + i, writable, PageType::File, None, Some(slice));
            page.mmap = true;
            space.spt.insert(page)?;
        }
        space.mappings.insert(start, pages);
        log::debug!("vm: mmap {:#x} ({} pages) at file offset {}", addr, pages, offset);
        Ok(addr)
    }

    /// 解除从 `addr` 开始的整段映射，脏页先写回文件
    pub(crate) fn munmap(&mut self, id: SpaceId, addr: usize) -> VmResult<()> {
        if !is_page_aligned(addr) {
            return Err(VmError::InvalidArgument);
        }
        let start = Vpn::from_addr_floor(addr);
        let Self {
            frames,
            swap,
            spaces,
            ..
        } = self;
        let space = spaces.get_mut(&id).ok_or(VmError::NoSuchSpace)?;
        let pages = space.mappings.remove(&start).ok_or(VmError::NotMapped)?;

        let mut result = Ok(());
        for i in 0..pages {
            if let Some(page) = space.spt.remove(start + i) {
                let r = destroy_page(frames, swap, space.mmu.as_mut(), id, page);
                if result.is_ok() {
                    result = r;
                }
            }
        }
        result
    }

    /// 在地址空间中登记一个尚未加载的页
    pub(crate) fn alloc_page(
        &mut self,
        id: SpaceId,
        page_type: PageType,
        va: usize,
        writable: bool,
        init: Option<PageInit>,
        aux: Option<FileSlice>,
    ) -> VmResult<()> {
        if !is_page_aligned(va) || va >= self.config.user_stack_top {
            return Err(VmError::InvalidArgument);
        }
        if page_type == PageType::File && aux.is_none() {
            return Err(VmError::InvalidArgument);
        }
        let page = Page::new_uninit(Vpn::from_addr_floor(va), writable, page_type, init, aux);
        self.space_mut(id)?.spt.insert(page)
    }

    /// 用户态访问 `va` 所在的页：先按需模拟缺页，再返回映射到的帧并设置访问位/脏位
    pub(crate) fn user_page(
        &mut self,
        id: SpaceId,
        va: usize,
        is_write: bool,
    ) -> VmResult<FrameId> {
        let vpn = Vpn::from_addr_floor(va);
        let space = self.space(id)?;
        let mapped = space.mmu.translate(vpn);
        let allowed = mapped.is_some() && (!is_write || space.mmu.is_writable(vpn));
        if !allowed {
            self.handle_fault(id, va, is_write, mapped.is_none())?;
        }

        let space = self.space_mut(id)?;
        let frame = space.mmu.translate(vpn).ok_or(VmError::AccessViolation)?;
        space.mmu.set_accessed(vpn, true);
        if is_write {
            if !space.mmu.is_writable(vpn) {
                return Err(VmError::AccessViolation);
            }
            space.mmu.set_dirty(vpn, true);
        }
        Ok(frame)
    }

    /// 销毁整个地址空间，mmap 的脏页写回文件
    fn destroy_space(&mut self, id: SpaceId) -> VmResult<()> {
        let mut space = self.spaces.remove(&id).ok_or(VmError::NoSuchSpace)?;
        let mut result = Ok(());
        for page in space.spt.drain() {
            let r = destroy_page(&mut self.frames, &mut self.swap, space.mmu.as_mut(), id, page);
            if result.is_ok() {
                result = r;
            }
        }
        result
    }
}

/// 修改映射的帧或写权限，保留访问位和脏位
fn remap(mmu: &mut dyn Mmu, vpn: Vpn, frame: FrameId, writable: bool) -> VmResult<()> {
    let dirty = mmu.is_dirty(vpn);
    let accessed = mmu.is_accessed(vpn);
    if !mmu.set_page(vpn, frame, writable) {
        return Err(VmError::MapFailed);
    }
    mmu.set_dirty(vpn, dirty);
    mmu.set_accessed(vpn, accessed);
    Ok(())
}

/// 销毁一页：mmap 的可写脏页写回文件，解除帧引用，释放交换槽位
fn destroy_page(
    frames: &mut FrameTable,
    swap: &mut SwapTable,
    mmu: &mut dyn Mmu,
    id: SpaceId,
    page: Page,
) -> VmResult<()> {
    let mut result = Ok(());
    if let Some(frame) = page.frame {
        if page.mmap && page.true_writable && mmu.is_dirty(page.vpn) {
            if let PageState::File { slice } = &page.state {
                result = slice.write_back(frames.data(frame));
            }
        }
        mmu.clear_page(page.vpn);
        let page_ref = PageRef {
            space: id,
            vpn: page.vpn,
        };
        if frames.detach(frame, page_ref) == 0 {
            frames.release(frame);
        }
    }
    if let Some(slot) = page.swap_slot() {
        swap.free(slot);
    }
    result
}
