//! 内核实例
//!
//! [`Kernel`] 把文件系统与虚拟内存两个上下文组装在一起，是进程共享的全部内核状态。

use alloc::boxed::Box;
use alloc::sync::Arc;
use core::sync::atomic::{AtomicU32, Ordering};
use device::BlockDriver;
use fs::FileSys;
use mm::{AddressSpace, Mmu, SoftMmu, Vm};

use crate::config::KernelConfig;
use crate::error::KernelResult;
use crate::process::Process;
use crate::{arch, logging};

/// 内核实例
pub struct Kernel {
    config: KernelConfig,
    fs: FileSys,
    vm: Arc<Vm>,
    next_pid: AtomicU32,
}

impl Kernel {
    /// 启动内核：注册架构操作与日志后端，挂载 `fs_disk`，以 `swap_disk` 作交换区
    pub fn boot(
        config: KernelConfig,
        fs_disk: Arc<dyn BlockDriver>,
        swap_disk: Arc<dyn BlockDriver>,
    ) -> KernelResult<Arc<Self>> {
        arch::init();
        logging::init();

        let fs = FileSys::mount(fs_disk, config.fs, config.format)?;
        let vm = Vm::new(config.vm, swap_disk);
        log::info!(
            "kernel: booted, {} free clusters, {} frames",
            fs.free_clusters(),
            config.vm.frame_limit
        );
        Ok(Arc::new(Self {
            config,
            fs,
            vm,
            // 1 留给第一个进程
            next_pid: AtomicU32::new(1),
        }))
    }

    /// 启动参数
    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    /// 文件系统
    pub fn fs(&self) -> &FileSys {
        &self.fs
    }

    /// 虚拟内存上下文
    pub fn vm(&self) -> &Arc<Vm> {
        &self.vm
    }

    /// 创建一个以根目录为当前目录、地址空间为空的进程
    pub fn spawn(self: &Arc<Self>) -> KernelResult<Process> {
        let cwd = self.fs.root()?;
        let space = self.vm.create_space(self.new_mmu());
        Ok(Process::new(Arc::clone(self), self.alloc_pid(), cwd, space))
    }

    /// 写回文件系统的全部缓存
    pub fn shutdown(&self) -> KernelResult<()> {
        self.fs.shutdown()?;
        log::info!("kernel: filesystem synced");
        Ok(())
    }

    pub(crate) fn alloc_pid(&self) -> u32 {
        self.next_pid.fetch_add(1, Ordering::SeqCst)
    }

    pub(crate) fn new_mmu(&self) -> Box<dyn Mmu> {
        Box::new(SoftMmu::new(self.config.vm.user_stack_top))
    }

    pub(crate) fn fork_space(&self, space: &AddressSpace) -> KernelResult<AddressSpace> {
        Ok(space.fork(self.new_mmu())?)
    }
}
