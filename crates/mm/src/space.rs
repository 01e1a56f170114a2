//! 地址空间句柄
//!
//! [`AddressSpace`] 是某个进程在 [`Vm`] 中的地址空间的所有权句柄，
//! 析构时销毁整个地址空间（mmap 脏页写回、帧与交换槽位回收）。
//! 所有操作都在 `Vm` 的全局锁内完成。

use alloc::boxed::Box;
use alloc::sync::Arc;

use crate::address::{PAGE_SIZE, Vpn};
use crate::error::{VmError, VmResult};
use crate::file::MmFile;
use crate::frame::FrameId;
use crate::mmu::Mmu;
use crate::page::{FileSlice, PageInit, PageType};
use crate::swap::SwapSlot;
use crate::vm::{SpaceId, Vm};

/// 某一页的状态快照
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageInfo {
    /// 页类型（尚未加载时为加载后的类型）
    pub page_type: PageType,
    /// 是否已经加载过
    pub loaded: bool,
    /// 当前写权限
    pub writable: bool,
    /// 映射时请求的写权限
    pub true_writable: bool,
    /// 驻留的帧
    pub frame: Option<FrameId>,
    /// 匿名页换出后所在的槽位
    pub swap_slot: Option<SwapSlot>,
    /// 是否来自 mmap
    pub mmap: bool,
}

/// 地址空间
pub struct AddressSpace {
    vm: Arc<Vm>,
    id: SpaceId,
}

impl AddressSpace {
    pub(crate) fn new(vm: Arc<Vm>, id: SpaceId) -> Self {
        Self { vm, id }
    }

    /// 编号
    pub fn id(&self) -> SpaceId {
        self.id
    }

    /// 所属的虚拟内存上下文
    pub fn vm(&self) -> &Arc<Vm> {
        &self.vm
    }

    /// 在 `va` 登记一个尚未加载的页，首次访问时由 `init`（或 `aux` 描述的文件片段）填充
    pub fn alloc_with_initializer(
        &self,
        page_type: PageType,
        va: usize,
        writable: bool,
        init: Option<PageInit>,
        aux: Option<FileSlice>,
    ) -> VmResult<()> {
        self.vm
            .state
            .lock()
            .alloc_page(self.id, page_type, va, writable, init, aux)
    }

    /// 在 `va` 登记一个全零的匿名页
    pub fn alloc_anon(&self, va: usize, writable: bool) -> VmResult<()> {
        self.alloc_with_initializer(PageType::Anon, va, writable, None, None)
    }

    /// 立即把 `va` 所在的页调入内存
    pub fn claim(&self, va: usize) -> VmResult<()> {
        self.vm
            .state
            .lock()
            .claim(self.id, Vpn::from_addr_floor(va))
    }

    /// 处理一次缺页
    ///
    /// `not_present` 为 false 表示页已映射但权限不足（写保护）。
    pub fn handle_fault(&self, va: usize, is_write: bool, not_present: bool) -> VmResult<()> {
        self.vm
            .state
            .lock()
            .handle_fault(self.id, va, is_write, not_present)
    }

    /// 复制出一个子地址空间，驻留页写时复制共享
    pub fn fork(&self, mmu: Box<dyn Mmu>) -> VmResult<AddressSpace> {
        let _fork = self.vm.fork_lock.lock();
        let child = self.vm.create_space(mmu);
        // 失败时 child 析构，已复制的部分随地址空间一起销毁
        let copied = self.vm.state.lock().copy_space(child.id, self.id);
        copied.map(|()| child)
    }

    /// 把 `file` 从 `offset` 开始映射到 `addr`，长度 `length` 字节
    pub fn mmap(
        &self,
        addr: usize,
        length: usize,
        writable: bool,
        file: &Arc<dyn MmFile>,
        offset: usize,
    ) -> VmResult<usize> {
        self.vm
            .state
            .lock()
            .mmap(self.id, addr, length, writable, file, offset)
    }

    /// 解除从 `addr` 开始的映射
    pub fn munmap(&self, addr: usize) -> VmResult<()> {
        self.vm.state.lock().munmap(self.id, addr)
    }

    /// 以用户态身份读取内存，必要时触发缺页
    pub fn read_bytes(&self, va: usize, buf: &mut [u8]) -> VmResult<()> {
        let mut state = self.vm.state.lock();
        let mut done = 0;
        while done < buf.len() {
            let cur = va.checked_add(done).ok_or(VmError::AccessViolation)?;
            let frame = state.user_page(self.id, cur, false)?;
            let page_off = cur % PAGE_SIZE;
            let take = (buf.len() - done).min(PAGE_SIZE - page_off);
            buf[done..done + take]
                .copy_from_slice(&state.frames.data(frame)[page_off..page_off + take]);
            done += take;
        }
        Ok(())
    }

    /// 以用户态身份写入内存，必要时触发缺页（包括写时复制与栈增长）
    pub fn write_bytes(&self, va: usize, bytes: &[u8]) -> VmResult<()> {
        let mut state = self.vm.state.lock();
        let mut written = 0;
        while written < bytes.len() {
            let cur = va
                .checked_add(written)
                .ok_or(VmError::AccessViolation)?;
            let frame = state.user_page(self.id, cur, true)?;
            let page_off = cur % PAGE_SIZE;
            let take = (bytes.len() - written).min(PAGE_SIZE - page_off);
            state.frames.data_mut(frame)[page_off..page_off + take]
                .copy_from_slice(&bytes[written..written + take]);
            written += take;
        }
        Ok(())
    }

    /// `va` 所在页的状态
    pub fn page_info(&self, va: usize) -> Option<PageInfo> {
        let state = self.vm.state.lock();
        let page = state
            .space(self.id)
            .ok()?
            .spt
            .find(Vpn::from_addr_floor(va))?;
        Some(PageInfo {
            page_type: page.page_type(),
            loaded: !page.is_uninit(),
            writable: page.writable,
            true_writable: page.true_writable,
            frame: page.frame,
            swap_slot: page.swap_slot(),
            mmap: page.mmap,
        })
    }

    /// SPT 中的页数
    pub fn page_count(&self) -> usize {
        let state = self.vm.state.lock();
        state.space(self.id).map_or(0, |s| s.spt.len())
    }

    /// `va` 所在页的 MMU 脏位
    pub fn is_dirty(&self, va: usize) -> bool {
        let state = self.vm.state.lock();
        state
            .space(self.id)
            .is_ok_and(|s| s.mmu.is_dirty(Vpn::from_addr_floor(va)))
    }
}

impl Drop for AddressSpace {
    fn drop(&mut self) {
        self.vm.destroy_space(self.id);
    }
}

impl core::fmt::Debug for AddressSpace {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("AddressSpace").field("id", &self.id).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::PageRef;
    use crate::mmu::SoftMmu;
    use crate::test_util::{self, MemFile};
    use alloc::vec;
    use alloc::vec::Vec;

    const BASE: usize = 0x1000_0000;

    fn page_va(i: usize) -> usize {
        BASE + i * PAGE_SIZE
    }

    fn fill(space: &AddressSpace, i: usize) -> Vec<u8> {
        let data: Vec<u8> = test_support::pattern(PAGE_SIZE, i as u8).collect();
        space.write_bytes(page_va(i), &data).unwrap();
        data
    }

    fn read_page(space: &AddressSpace, i: usize) -> Vec<u8> {
        let mut buf = vec![0u8; PAGE_SIZE];
        space.read_bytes(page_va(i), &mut buf).unwrap();
        buf
    }

    fn child_mmu() -> Box<dyn Mmu> {
        Box::new(SoftMmu::new(test_util::config().user_stack_top))
    }

    #[test]
    fn test_lazy_load_and_zero_fill() {
        let (vm, _disk) = test_util::vm();
        let space = test_util::space(&vm);
        space.alloc_anon(page_va(0), true).unwrap();

        let info = space.page_info(page_va(0)).unwrap();
        assert!(!info.loaded);
        assert_eq!(info.frame, None);
        assert_eq!(vm.frames_in_use(), 0);

        assert!(read_page(&space, 0).iter().all(|&b| b == 0));
        let info = space.page_info(page_va(0)).unwrap();
        assert!(info.loaded);
        assert_eq!(info.page_type, PageType::Anon);
        assert!(info.frame.is_some());
    }

    #[test]
    fn test_alloc_rejects_duplicates_and_bad_addresses() {
        let (vm, _disk) = test_util::vm();
        let space = test_util::space(&vm);
        space.alloc_anon(page_va(0), true).unwrap();
        assert_eq!(space.alloc_anon(page_va(0), true), Err(VmError::AlreadyMapped));
        assert_eq!(space.alloc_anon(page_va(0) + 8, true), Err(VmError::InvalidArgument));
        assert_eq!(
            space.alloc_with_initializer(PageType::File, page_va(1), true, None, None),
            Err(VmError::InvalidArgument)
        );
    }

    #[test]
    fn test_fifo_eviction_and_swap_round_trip() {
        let (vm, _disk) = test_util::vm();
        let space = test_util::space(&vm);
        let limit = test_util::config().frame_limit;
        for i in 0..=limit {
            space.alloc_anon(page_va(i), true).unwrap();
        }

        let first: Vec<_> = (0..limit).map(|i| fill(&space, i)).collect();
        let oldest = space.page_info(page_va(0)).unwrap().frame.unwrap();
        assert_eq!(vm.frame_fifo()[0], oldest);

        // 再多一页，最早的帧被换出
        fill(&space, limit);
        assert_eq!(vm.frames_in_use(), limit);
        let info = space.page_info(page_va(0)).unwrap();
        assert_eq!(info.frame, None);
        assert!(info.swap_slot.is_some());
        assert_eq!(vm.swap_slots_in_use(), 1);
        assert_eq!(space.page_info(page_va(limit)).unwrap().frame, Some(oldest));

        // 换回来时第二页成为牺牲者
        assert_eq!(read_page(&space, 0), first[0]);
        assert_eq!(space.page_info(page_va(0)).unwrap().swap_slot, None);
        assert_eq!(space.page_info(page_va(1)).unwrap().frame, None);
        assert_eq!(vm.swap_slots_in_use(), 1);
        assert_eq!(read_page(&space, 1), first[1]);
    }

    #[test]
    fn test_read_only_page_rejects_writes() {
        let (vm, _disk) = test_util::vm();
        let space = test_util::space(&vm);
        space.alloc_anon(page_va(0), false).unwrap();
        assert_eq!(space.write_bytes(page_va(0), b"x"), Err(VmError::AccessViolation));
        assert!(read_page(&space, 0).iter().all(|&b| b == 0));
        assert_eq!(
            space.handle_fault(page_va(0), true, false),
            Err(VmError::AccessViolation)
        );
    }

    #[test]
    fn test_unmapped_access_faults() {
        let (vm, _disk) = test_util::vm();
        let space = test_util::space(&vm);
        let mut buf = [0u8; 4];
        assert_eq!(space.read_bytes(page_va(3), &mut buf), Err(VmError::AccessViolation));
        assert_eq!(space.handle_fault(page_va(3), false, true), Err(VmError::AccessViolation));
        assert_eq!(space.page_count(), 0);
    }

    #[test]
    fn test_stack_grows_on_write_within_limit() {
        let (vm, _disk) = test_util::vm();
        let space = test_util::space(&vm);
        let config = test_util::config();
        let top = config.user_stack_top;

        space.write_bytes(top - 8, &[1; 8]).unwrap();
        assert_eq!(space.page_count(), 1);
        let info = space.page_info(top - 8).unwrap();
        assert_eq!(info.page_type, PageType::Anon);
        assert!(info.writable);

        // 一次写跨越两页，两页都要长出来
        space.write_bytes(top - PAGE_SIZE - 4, &[2; 8]).unwrap();
        assert_eq!(space.page_count(), 2);

        space.write_bytes(config.stack_floor(), &[3]).unwrap();
        assert_eq!(
            space.write_bytes(config.stack_floor() - 1, &[4]),
            Err(VmError::AccessViolation)
        );
        assert_eq!(space.write_bytes(top, &[5]), Err(VmError::AccessViolation));

        // 读不会让栈增长
        let mut buf = [0u8; 1];
        assert_eq!(
            space.read_bytes(top - 4 * PAGE_SIZE, &mut buf),
            Err(VmError::AccessViolation)
        );
    }

    #[test]
    fn test_fork_shares_frames_copy_on_write() {
        let (vm, _disk) = test_util::vm();
        let parent = test_util::space(&vm);
        parent.alloc_anon(page_va(0), true).unwrap();
        parent.write_bytes(page_va(0), b"parent").unwrap();

        let child = parent.fork(child_mmu()).unwrap();
        let frame = parent.page_info(page_va(0)).unwrap().frame.unwrap();
        assert_eq!(child.page_info(page_va(0)).unwrap().frame, Some(frame));
        assert_eq!(
            vm.frame_refs(frame),
            [
                PageRef { space: parent.id(), vpn: Vpn::from_addr_floor(page_va(0)) },
                PageRef { space: child.id(), vpn: Vpn::from_addr_floor(page_va(0)) },
            ]
        );
        assert!(!parent.page_info(page_va(0)).unwrap().writable);
        assert!(!child.page_info(page_va(0)).unwrap().writable);
        assert!(parent.is_dirty(page_va(0)));

        let mut buf = [0u8; 6];
        child.read_bytes(page_va(0), &mut buf).unwrap();
        assert_eq!(&buf, b"parent");

        child.write_bytes(page_va(0), b"child!").unwrap();
        let private = child.page_info(page_va(0)).unwrap().frame.unwrap();
        assert_ne!(private, frame);
        assert_eq!(vm.frame_refs(frame).len(), 1);

        parent.read_bytes(page_va(0), &mut buf).unwrap();
        assert_eq!(&buf, b"parent");

        // 父进程此时独占原帧，写入只恢复写权限
        parent.write_bytes(page_va(0), b"again!").unwrap();
        assert_eq!(parent.page_info(page_va(0)).unwrap().frame, Some(frame));
        child.read_bytes(page_va(0), &mut buf).unwrap();
        assert_eq!(&buf, b"child!");
    }

    #[test]
    fn test_evicting_shared_frame_swaps_every_sharer() {
        let (vm, _disk) = test_util::vm();
        let parent = test_util::space(&vm);
        let limit = test_util::config().frame_limit;
        for i in 0..=limit {
            parent.alloc_anon(page_va(i), true).unwrap();
        }
        let shared = fill(&parent, 0);
        let child = parent.fork(child_mmu()).unwrap();

        for i in 1..=limit {
            fill(&parent, i);
        }
        assert_eq!(parent.page_info(page_va(0)).unwrap().frame, None);
        assert_eq!(child.page_info(page_va(0)).unwrap().frame, None);
        assert_eq!(vm.swap_slots_in_use(), 2);

        assert_eq!(read_page(&child, 0), shared);
        assert_eq!(read_page(&parent, 0), shared);
    }

    #[test]
    fn test_fork_duplicates_swapped_pages() {
        let (vm, _disk) = test_util::vm();
        let parent = test_util::space(&vm);
        let limit = test_util::config().frame_limit;
        for i in 0..=limit {
            parent.alloc_anon(page_va(i), true).unwrap();
        }
        let pages: Vec<_> = (0..=limit).map(|i| fill(&parent, i)).collect();
        let slot = parent.page_info(page_va(0)).unwrap().swap_slot.unwrap();

        let child = parent.fork(child_mmu()).unwrap();
        let child_slot = child.page_info(page_va(0)).unwrap().swap_slot.unwrap();
        assert_ne!(slot, child_slot);
        assert_eq!(vm.swap_slots_in_use(), 2);

        child.write_bytes(page_va(0), b"mine").unwrap();
        assert_eq!(read_page(&parent, 0), pages[0]);
        assert_eq!(&read_page(&child, 0)[..4], b"mine");
    }

    #[test]
    fn test_uninitialized_pages_stay_lazy_across_fork() {
        let (vm, _disk) = test_util::vm();
        let parent = test_util::space(&vm);
        parent.alloc_anon(page_va(0), true).unwrap();
        let child = parent.fork(child_mmu()).unwrap();
        assert!(!child.page_info(page_va(0)).unwrap().loaded);
        child.write_bytes(page_va(0), b"c").unwrap();
        assert!(!parent.page_info(page_va(0)).unwrap().loaded);
        assert_eq!(vm.frames_in_use(), 1);
    }

    #[test]
    fn test_mmap_reads_file_and_zero_fills_tail() {
        let (vm, _disk) = test_util::vm();
        let space = test_util::space(&vm);
        let contents: Vec<u8> = test_support::pattern(5000, 9).collect();
        let file: Arc<dyn MmFile> = MemFile::new(contents.clone());

        assert_eq!(space.mmap(page_va(0), 5000, false, &file, 0), Ok(page_va(0)));
        assert_eq!(space.page_count(), 2);
        let info = space.page_info(page_va(1)).unwrap();
        assert!(info.mmap);
        assert_eq!(info.page_type, PageType::File);

        let mut buf = vec![0u8; 2 * PAGE_SIZE];
        space.read_bytes(page_va(0), &mut buf).unwrap();
        assert_eq!(&buf[..5000], &contents[..]);
        assert!(buf[5000..].iter().all(|&b| b == 0));
        assert_eq!(space.write_bytes(page_va(0), b"no"), Err(VmError::AccessViolation));
    }

    #[test]
    fn test_mmap_argument_checks() {
        let (vm, _disk) = test_util::vm();
        let space = test_util::space(&vm);
        let file: Arc<dyn MmFile> = MemFile::new(vec![1u8; 100]);
        let empty: Arc<dyn MmFile> = MemFile::new(Vec::new());

        assert_eq!(space.mmap(0, 100, true, &file, 0), Err(VmError::InvalidArgument));
        assert_eq!(space.mmap(page_va(0) + 1, 100, true, &file, 0), Err(VmError::InvalidArgument));
        assert_eq!(space.mmap(page_va(0), 0, true, &file, 0), Err(VmError::InvalidArgument));
        assert_eq!(space.mmap(page_va(0), 100, true, &file, 7), Err(VmError::InvalidArgument));
        assert_eq!(space.mmap(page_va(0), 100, true, &empty, 0), Err(VmError::InvalidArgument));
        let floor = test_util::config().stack_floor();
        assert_eq!(
            space.mmap(floor - PAGE_SIZE, 2 * PAGE_SIZE, true, &file, 0),
            Err(VmError::InvalidArgument)
        );

        space.alloc_anon(page_va(1), true).unwrap();
        assert_eq!(
            space.mmap(page_va(0), 2 * PAGE_SIZE, true, &file, 0),
            Err(VmError::AlreadyMapped)
        );
        assert_eq!(space.page_count(), 1);
        assert_eq!(space.munmap(page_va(0)), Err(VmError::NotMapped));
    }

    #[test]
    fn test_munmap_writes_back_dirty_pages() {
        let (vm, _disk) = test_util::vm();
        let space = test_util::space(&vm);
        let file = MemFile::new(vec![b'.'; 5000]);
        let mapped: Arc<dyn MmFile> = file.clone();

        space.mmap(page_va(0), 5000, true, &mapped, 0).unwrap();
        space.write_bytes(page_va(0) + 4096, b"tail").unwrap();
        // 超出文件长度的部分不会写回
        space.write_bytes(page_va(0) + 6000, b"junk").unwrap();
        space.munmap(page_va(0)).unwrap();

        let contents = file.contents();
        assert_eq!(contents.len(), 5000);
        assert_eq!(&contents[4096..4100], b"tail");
        assert!(contents[..4096].iter().all(|&b| b == b'.'));
        assert_eq!(space.page_count(), 0);
        assert_eq!(vm.frames_in_use(), 0);
    }

    #[test]
    fn test_evicted_file_page_written_back() {
        let (vm, _disk) = test_util::vm();
        let space = test_util::space(&vm);
        let file = MemFile::new(vec![0u8; PAGE_SIZE]);
        let mapped: Arc<dyn MmFile> = file.clone();
        let limit = test_util::config().frame_limit;

        space.mmap(page_va(0), PAGE_SIZE, true, &mapped, 0).unwrap();
        space.write_bytes(page_va(0), b"hi").unwrap();
        for i in 1..=limit {
            space.alloc_anon(page_va(i), true).unwrap();
            fill(&space, i);
        }

        assert_eq!(space.page_info(page_va(0)).unwrap().frame, None);
        assert_eq!(&file.contents()[..2], b"hi");
        assert_eq!(vm.swap_slots_in_use(), 0);
        assert_eq!(&read_page(&space, 0)[..2], b"hi");
    }

    #[test]
    fn test_drop_releases_everything() {
        let (vm, _disk) = test_util::vm();
        let file = MemFile::new(vec![0u8; PAGE_SIZE]);
        let mapped: Arc<dyn MmFile> = file.clone();
        {
            let space = test_util::space(&vm);
            let limit = test_util::config().frame_limit;
            for i in 1..=limit {
                space.alloc_anon(page_va(i), true).unwrap();
                fill(&space, i);
            }
            space.mmap(page_va(0), PAGE_SIZE, true, &mapped, 0).unwrap();
            space.write_bytes(page_va(0), b"bye").unwrap();
            assert_eq!(vm.swap_slots_in_use(), 1);
            assert_eq!(vm.space_count(), 1);
        }
        assert_eq!(vm.space_count(), 0);
        assert_eq!(vm.frames_in_use(), 0);
        assert_eq!(vm.swap_slots_in_use(), 0);
        assert_eq!(&file.contents()[..3], b"bye");
    }
}
