//! 虚拟内存子系统
//!
//! 按需分页的用户地址空间：每个地址空间有一张补充页表（SPT）记录所有页，
//! 页在第一次访问时才分配物理帧并读入内容。物理帧用完后按 FIFO 顺序换出，
//! 匿名页进入交换区，文件页写回文件。fork 以写时复制方式共享驻留页，
//! 栈在缺页时向下自动增长，文件可以通过 mmap 映射到用户地址空间。
//!
//! # 架构解耦
//!
//! 与硬件相关的部分通过 trait 抽象：
//! - [`Mmu`]: 页表项的建立、清除与访问位/脏位
//! - [`MmFile`]: 可被映射的文件
//!
//! 交换区是任意一个 [`device::BlockDriver`]。

#![no_std]

extern crate alloc;

mod address;
mod config;
mod error;
mod file;
mod frame;
mod mmu;
mod page;
mod space;
mod spt;
mod swap;
mod vm;

pub use address::{PAGE_SIZE, Vpn, is_page_aligned, page_round_down};
pub use config::VmConfig;
pub use error::{VmError, VmResult};
pub use file::MmFile;
pub use frame::{FrameId, FrameTable, PageRef};
pub use mmu::{Mmu, PteFlags, SoftMmu};
pub use page::{FileSlice, Page, PageInit, PageState, PageType, split_file_span};
pub use space::{AddressSpace, PageInfo};
pub use spt::Spt;
pub use swap::{SwapSlot, SwapTable};
pub use vm::{SpaceId, Vm};

#[cfg(test)]
pub(crate) mod test_util {
    use alloc::boxed::Box;
    use alloc::sync::Arc;
    use alloc::vec::Vec;
    use core::sync::atomic::{AtomicUsize, Ordering};
    use device::RamDisk;
    use sync::{ArchOps, SpinLock};
    use test_support::mock::arch::MOCK_ARCH_OPS;
    use test_support::mock::mm::MOCK_VM_CONFIG;

    use crate::{AddressSpace, MmFile, SoftMmu, Vm, VmConfig};

    struct TestArchOps;

    impl ArchOps for TestArchOps {
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

    static TEST_ARCH_OPS: TestArchOps = TestArchOps;
    // 0 = uninit, 1 = initializing, 2 = ready
    static INIT: AtomicUsize = AtomicUsize::new(0);

    pub fn init() {
        match INIT.compare_exchange(0, 1, Ordering::AcqRel, Ordering::Acquire) {
            Ok(_) => {
                // Safety: 测试共用一个全局的 ArchOps
                unsafe { sync::register_arch_ops(&TEST_ARCH_OPS) };
                INIT.store(2, Ordering::Release);
            }
            Err(_) => {
                while INIT.load(Ordering::Acquire) != 2 {
                    core::hint::spin_loop();
                }
            }
        }
    }

    pub fn config() -> VmConfig {
        VmConfig {
            user_stack_top: MOCK_VM_CONFIG.user_stack_top(),
            max_stack_size: MOCK_VM_CONFIG.max_stack_size(),
            frame_limit: MOCK_VM_CONFIG.frame_limit(),
        }
    }

    /// 帧数很少的虚拟内存上下文，交换盘另行返回以便检查
    pub fn vm() -> (Arc<Vm>, Arc<RamDisk>) {
        init();
        let disk = RamDisk::new(MOCK_VM_CONFIG.swap_sectors(), 512, 0);
        (Vm::new(config(), disk.clone()), disk)
    }

    pub fn space(vm: &Arc<Vm>) -> AddressSpace {
        vm.create_space(Box::new(SoftMmu::new(MOCK_VM_CONFIG.user_stack_top())))
    }

    /// 内存中的文件，`reopen` 得到的实例共享同一份内容
    pub struct MemFile {
        data: Arc<SpinLock<Vec<u8>>>,
    }

    impl MemFile {
        pub fn new(data: Vec<u8>) -> Arc<Self> {
            init();
            Arc::new(Self {
                data: Arc::new(SpinLock::new(data)),
            })
        }

        pub fn contents(&self) -> Vec<u8> {
            self.data.lock().clone()
        }
    }

    impl MmFile for MemFile {
        fn read_at(&self, offset: usize, buf: &mut [u8]) -> Result<usize, isize> {
            let data = self.data.lock();
            if offset >= data.len() {
                return Ok(0);
            }
            let n = buf.len().min(data.len() - offset);
            buf[..n].copy_from_slice(&data[offset..offset + n]);
            Ok(n)
        }

        fn write_at(&self, offset: usize, buf: &[u8]) -> Result<usize, isize> {
            let mut data = self.data.lock();
            let end = offset + buf.len();
            if data.len() < end {
                data.resize(end, 0);
            }
            data[offset..end].copy_from_slice(buf);
            Ok(buf.len())
        }

        fn len(&self) -> usize {
            self.data.lock().len()
        }

        fn reopen(&self) -> Result<Arc<dyn MmFile>, isize> {
            Ok(Arc::new(Self {
                data: Arc::clone(&self.data),
            }))
        }
    }
}
