//! 进程
//!
//! 一个进程拥有当前目录、打开文件表和一个地址空间。
//! 用户内存访问中发生的访问违规或内存耗尽都会终止进程，退出码为 -1。

use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use fs::{Dir, File};
use mm::{AddressSpace, MmFile, PAGE_SIZE, VmError, VmResult, is_page_aligned};

use crate::boot::Kernel;
use crate::config::{FIRST_FD, MAX_OPEN_FILES};
use crate::error::{KernelError, KernelResult};
use crate::mm_bridge::FileWrapper;

/// 进程
pub struct Process {
    pid: u32,
    kernel: Arc<Kernel>,
    cwd: Option<Dir>,
    space: Option<AddressSpace>,
    files: BTreeMap<usize, File>,
    exit_status: Option<i32>,
}

impl Process {
    pub(crate) fn new(kernel: Arc<Kernel>, pid: u32, cwd: Dir, space: AddressSpace) -> Self {
        log::debug!("process {}: created", pid);
        Self {
            pid,
            kernel,
            cwd: Some(cwd),
            space: Some(space),
            files: BTreeMap::new(),
            exit_status: None,
        }
    }

    /// 进程号
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// 退出码，仍在运行时为 `None`
    pub fn exit_status(&self) -> Option<i32> {
        self.exit_status
    }

    /// 是否仍在运行
    pub fn is_alive(&self) -> bool {
        self.exit_status.is_none()
    }

    /// 地址空间
    pub fn space(&self) -> KernelResult<&AddressSpace> {
        match (&self.space, self.exit_status) {
            (Some(space), None) => Ok(space),
            (_, status) => Err(KernelError::Exited(status.unwrap_or(-1))),
        }
    }

    fn cwd(&self) -> KernelResult<&Dir> {
        match (&self.cwd, self.exit_status) {
            (Some(cwd), None) => Ok(cwd),
            (_, status) => Err(KernelError::Exited(status.unwrap_or(-1))),
        }
    }

    /// 当前目录的 inode 扇区
    pub fn cwd_sector(&self) -> KernelResult<u32> {
        Ok(self.cwd()?.sector())
    }

    // ---- 文件系统 ----

    /// 创建长度为 `size` 的文件
    pub fn create(&self, path: &str, size: usize) -> KernelResult<()> {
        Ok(self.kernel.fs().create(self.cwd_sector()?, path, size)?)
    }

    /// 创建目录
    pub fn mkdir(&self, path: &str) -> KernelResult<()> {
        Ok(self.kernel.fs().mkdir(self.cwd_sector()?, path)?)
    }

    /// 创建符号链接
    pub fn symlink(&self, target: &str, linkpath: &str) -> KernelResult<()> {
        Ok(self
            .kernel
            .fs()
            .symlink(self.cwd_sector()?, target, linkpath)?)
    }

    /// 删除文件或空目录
    pub fn remove(&self, path: &str) -> KernelResult<()> {
        Ok(self.kernel.fs().remove(self.cwd_sector()?, path)?)
    }

    /// 切换当前目录
    pub fn chdir(&mut self, path: &str) -> KernelResult<()> {
        let dir = self.kernel.fs().chdir(self.cwd_sector()?, path)?;
        self.cwd = Some(dir);
        Ok(())
    }

    /// 打开文件，返回最小的空闲描述符
    pub fn open(&mut self, path: &str) -> KernelResult<usize> {
        let file = self.kernel.fs().open_file(self.cwd_sector()?, path)?;
        let fd = (FIRST_FD..FIRST_FD + MAX_OPEN_FILES)
            .find(|fd| !self.files.contains_key(fd))
            .ok_or(KernelError::TooManyFiles)?;
        self.files.insert(fd, file);
        Ok(fd)
    }

    /// 关闭描述符
    pub fn close(&mut self, fd: usize) -> KernelResult<()> {
        self.files
            .remove(&fd)
            .map(drop)
            .ok_or(KernelError::BadDescriptor)
    }

    fn file(&self, fd: usize) -> KernelResult<&File> {
        self.files.get(&fd).ok_or(KernelError::BadDescriptor)
    }

    fn file_mut(&mut self, fd: usize) -> KernelResult<&mut File> {
        self.files.get_mut(&fd).ok_or(KernelError::BadDescriptor)
    }

    /// 从描述符的当前位置读取
    pub fn read(&mut self, fd: usize, buf: &mut [u8]) -> KernelResult<usize> {
        Ok(self.file_mut(fd)?.read(buf)?)
    }

    /// 在描述符的当前位置写入
    pub fn write(&mut self, fd: usize, buf: &[u8]) -> KernelResult<usize> {
        Ok(self.file_mut(fd)?.write(buf)?)
    }

    /// 设置读写位置
    pub fn seek(&mut self, fd: usize, pos: usize) -> KernelResult<()> {
        self.file_mut(fd)?.seek(pos);
        Ok(())
    }

    /// 当前读写位置
    pub fn tell(&self, fd: usize) -> KernelResult<usize> {
        Ok(self.file(fd)?.tell())
    }

    /// 文件长度
    pub fn filesize(&self, fd: usize) -> KernelResult<usize> {
        Ok(self.file(fd)?.len())
    }

    /// 禁止任何人写入该描述符对应的文件，关闭描述符时解除
    pub fn deny_write(&mut self, fd: usize) -> KernelResult<()> {
        Ok(self.file_mut(fd)?.deny_write()?)
    }

    /// inode 编号
    pub fn inumber(&self, fd: usize) -> KernelResult<u32> {
        Ok(self.file(fd)?.inumber())
    }

    // ---- 虚拟内存 ----

    /// 在 `[addr, addr + len)` 上登记全零的匿名页
    pub fn map_anon(&self, addr: usize, len: usize, writable: bool) -> KernelResult<()> {
        if !is_page_aligned(addr) || len == 0 {
            return Err(VmError::InvalidArgument.into());
        }
        let space = self.space()?;
        for i in 0..len.div_ceil(PAGE_SIZE) {
            space.alloc_anon(addr + i * PAGE_SIZE, writable)?;
        }
        Ok(())
    }

    /// 把描述符 `fd` 对应的文件映射到 `addr`
    pub fn mmap(
        &self,
        fd: usize,
        addr: usize,
        len: usize,
        writable: bool,
        offset: usize,
    ) -> KernelResult<usize> {
        let file: Arc<dyn MmFile> = Arc::new(FileWrapper(self.file(fd)?.reopen()));
        Ok(self.space()?.mmap(addr, len, writable, &file, offset)?)
    }

    /// 解除从 `addr` 开始的映射
    pub fn munmap(&self, addr: usize) -> KernelResult<()> {
        Ok(self.space()?.munmap(addr)?)
    }

    /// 以用户态身份读取内存；失败会终止进程
    pub fn read_user(&mut self, va: usize, buf: &mut [u8]) -> KernelResult<()> {
        let result = self.space()?.read_bytes(va, buf);
        self.check_fault(result)
    }

    /// 以用户态身份写入内存；失败会终止进程
    pub fn write_user(&mut self, va: usize, data: &[u8]) -> KernelResult<()> {
        let result = self.space()?.write_bytes(va, data);
        self.check_fault(result)
    }

    /// 缺页陷入；无法处理时终止进程
    pub fn page_fault(&mut self, va: usize, is_write: bool, not_present: bool) -> KernelResult<()> {
        let result = self.space()?.handle_fault(va, is_write, not_present);
        self.check_fault(result)
    }

    fn check_fault<T>(&mut self, result: VmResult<T>) -> KernelResult<T> {
        result.map_err(|e| {
            match e {
                VmError::OutOfMemory => log::error!("process {}: out of memory", self.pid),
                e => log::warn!("process {}: killed by {:?}", self.pid, e),
            }
            self.exit(-1);
            KernelError::Vm(e)
        })
    }

    // ---- 生命周期 ----

    /// 复制出子进程：地址空间写时复制，当前目录与打开的文件各自重新打开
    pub fn fork(&self) -> KernelResult<Process> {
        let space = self.kernel.fork_space(self.space()?)?;
        let cwd = self.cwd()?.reopen();
        let pid = self.kernel.alloc_pid();
        let mut child = Process::new(Arc::clone(&self.kernel), pid, cwd, space);
        for (&fd, file) in &self.files {
            child.files.insert(fd, file.duplicate()?);
        }
        Ok(child)
    }

    /// 退出：销毁地址空间（映射的脏页写回文件），关闭所有文件。重复调用无效果。
    pub fn exit(&mut self, status: i32) {
        if self.exit_status.is_some() {
            return;
        }
        self.exit_status = Some(status);
        self.space = None;
        self.files.clear();
        self.cwd = None;
        log::info!("process {}: exit({})", self.pid, status);
    }
}

impl Drop for Process {
    fn drop(&mut self) {
        self.exit(0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util;
    use alloc::vec;
    use alloc::vec::Vec;
    use fs::FsError;

    const HEAP: usize = 0x1000_0000;

    #[test]
    fn test_descriptor_io() {
        let kernel = test_util::boot();
        let mut proc = kernel.spawn().unwrap();
        proc.create("notes", 0).unwrap();
        let fd = proc.open("notes").unwrap();
        assert_eq!(fd, FIRST_FD);

        assert_eq!(proc.write(fd, b"hello kernel").unwrap(), 12);
        assert_eq!(proc.tell(fd).unwrap(), 12);
        assert_eq!(proc.filesize(fd).unwrap(), 12);
        proc.seek(fd, 6).unwrap();
        let mut buf = [0u8; 16];
        assert_eq!(proc.read(fd, &mut buf).unwrap(), 6);
        assert_eq!(&buf[..6], b"kernel");

        proc.close(fd).unwrap();
        assert_eq!(proc.close(fd), Err(KernelError::BadDescriptor));
        assert_eq!(proc.read(fd, &mut buf), Err(KernelError::BadDescriptor));
        assert_eq!(proc.open("missing"), Err(KernelError::Fs(FsError::NotFound)));
    }

    #[test]
    fn test_lowest_free_descriptor_reused() {
        let kernel = test_util::boot();
        let mut proc = kernel.spawn().unwrap();
        proc.create("f", 0).unwrap();
        let a = proc.open("f").unwrap();
        let b = proc.open("f").unwrap();
        assert_eq!(b, a + 1);
        assert_eq!(proc.inumber(a).unwrap(), proc.inumber(b).unwrap());
        proc.close(a).unwrap();
        assert_eq!(proc.open("f").unwrap(), a);
    }

    #[test]
    fn test_deny_write_until_close() {
        let kernel = test_util::boot();
        let mut proc = kernel.spawn().unwrap();
        proc.create("prog", 0).unwrap();
        let exe = proc.open("prog").unwrap();
        let other = proc.open("prog").unwrap();
        proc.deny_write(exe).unwrap();
        assert_eq!(proc.write(other, b"x"), Err(KernelError::Fs(FsError::WriteDenied)));
        proc.close(exe).unwrap();
        assert_eq!(proc.write(other, b"x").unwrap(), 1);
    }

    #[test]
    fn test_fork_keeps_deny_write() {
        let kernel = test_util::boot();
        let mut parent = kernel.spawn().unwrap();
        parent.create("prog", 0).unwrap();
        let exe = parent.open("prog").unwrap();
        parent.deny_write(exe).unwrap();

        let mut child = parent.fork().unwrap();
        parent.close(exe).unwrap();
        let fd = parent.open("prog").unwrap();
        assert_eq!(parent.write(fd, b"x"), Err(KernelError::Fs(FsError::WriteDenied)));

        child.close(exe).unwrap();
        assert_eq!(parent.write(fd, b"x").unwrap(), 1);
    }

    #[test]
    fn test_cwd_cannot_be_removed() {
        let kernel = test_util::boot();
        let mut proc = kernel.spawn().unwrap();
        proc.mkdir("/work").unwrap();
        proc.chdir("work").unwrap();
        proc.create("inside", 0).unwrap();
        assert!(proc.open("/work/inside").is_ok());
        assert_eq!(proc.remove("/work"), Err(KernelError::Fs(FsError::Busy)));
        proc.chdir("..").unwrap();
        proc.remove("/work/inside").unwrap();
        proc.remove("/work").unwrap();
    }

    #[test]
    fn test_mmap_changes_reach_file() {
        let kernel = test_util::boot();
        let mut proc = kernel.spawn().unwrap();
        let data: Vec<u8> = test_support::pattern(5000, 11).collect();
        proc.create("data", 0).unwrap();
        let fd = proc.open("data").unwrap();
        proc.write(fd, &data).unwrap();

        assert_eq!(proc.mmap(fd, HEAP, 5000, true, 0).unwrap(), HEAP);
        let mut mapped = vec![0u8; 5000];
        proc.read_user(HEAP, &mut mapped).unwrap();
        assert_eq!(mapped, data);

        // 关闭描述符不影响映射
        proc.close(fd).unwrap();
        proc.write_user(HEAP + 4000, b"patched").unwrap();
        proc.munmap(HEAP).unwrap();

        let fd = proc.open("data").unwrap();
        let mut back = vec![0u8; 5000];
        assert_eq!(proc.read(fd, &mut back).unwrap(), 5000);
        assert_eq!(&back[4000..4007], b"patched");
        assert_eq!(&back[..4000], &data[..4000]);
    }

    #[test]
    fn test_bad_access_kills_process() {
        let kernel = test_util::boot();
        let mut proc = kernel.spawn().unwrap();
        proc.map_anon(HEAP, PAGE_SIZE, false).unwrap();

        assert_eq!(
            proc.write_user(HEAP, b"x"),
            Err(KernelError::Vm(VmError::AccessViolation))
        );
        assert_eq!(proc.exit_status(), Some(-1));
        assert!(!proc.is_alive());
        assert_eq!(proc.create("late", 0), Err(KernelError::Exited(-1)));
        assert_eq!(kernel.vm().space_count(), 0);
    }

    #[test]
    fn test_out_of_memory_is_fatal() {
        let mut config = test_util::config();
        config.vm.frame_limit = 1;
        let kernel = test_util::boot_with(config, 1);
        let mut proc = kernel.spawn().unwrap();
        proc.map_anon(HEAP, 3 * PAGE_SIZE, true).unwrap();

        proc.write_user(HEAP, b"a").unwrap();
        proc.write_user(HEAP + PAGE_SIZE, b"b").unwrap();
        assert_eq!(
            proc.write_user(HEAP + 2 * PAGE_SIZE, b"c"),
            Err(KernelError::Vm(VmError::OutOfMemory))
        );
        assert_eq!(proc.exit_status(), Some(-1));
        assert_eq!(kernel.vm().frames_in_use(), 0);
        assert_eq!(kernel.vm().swap_slots_in_use(), 0);
    }

    #[test]
    fn test_fork_copies_memory_files_and_cwd() {
        let kernel = test_util::boot();
        let mut parent = kernel.spawn().unwrap();
        parent.mkdir("home").unwrap();
        parent.create("home/log", 0).unwrap();
        let fd = parent.open("home/log").unwrap();
        parent.write(fd, b"0123").unwrap();
        parent.map_anon(HEAP, PAGE_SIZE, true).unwrap();
        parent.write_user(HEAP, b"parent").unwrap();

        let mut child = parent.fork().unwrap();
        assert_ne!(child.pid(), parent.pid());
        assert_eq!(child.tell(fd).unwrap(), 4);

        let mut buf = [0u8; 6];
        child.read_user(HEAP, &mut buf).unwrap();
        assert_eq!(&buf, b"parent");
        child.write_user(HEAP, b"child!").unwrap();
        parent.read_user(HEAP, &mut buf).unwrap();
        assert_eq!(&buf, b"parent");

        child.chdir("home").unwrap();
        assert_ne!(child.cwd_sector().unwrap(), parent.cwd_sector().unwrap());
        assert!(child.open("log").is_ok());
        assert!(parent.open("log").is_err());

        child.exit(3);
        assert_eq!(child.exit_status(), Some(3));
        assert_eq!(kernel.vm().space_count(), 1);
        parent.read_user(HEAP, &mut buf).unwrap();
        assert_eq!(&buf, b"parent");
    }

    #[test]
    fn test_stack_growth_through_traps() {
        let kernel = test_util::boot();
        let mut proc = kernel.spawn().unwrap();
        let top = kernel.config().vm.user_stack_top;
        proc.page_fault(top - 8, true, true).unwrap();
        assert_eq!(proc.space().unwrap().page_count(), 1);
        proc.write_user(top - 16, &[7; 16]).unwrap();
        assert!(proc.page_fault(top - 64 * PAGE_SIZE, true, true).is_err());
        assert!(!proc.is_alive());
    }
}
