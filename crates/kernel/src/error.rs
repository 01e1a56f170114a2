//! 内核错误类型

use fs::FsError;
use mm::VmError;

/// 内核操作的错误
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelError {
    /// 文件系统错误
    Fs(FsError),
    /// 虚拟内存错误
    Vm(VmError),
    /// 无效的文件描述符 (-EBADF)
    BadDescriptor,
    /// 打开的文件过多 (-EMFILE)
    TooManyFiles,
    /// 进程已经退出
    Exited(i32),
}

impl KernelError {
    /// 转换为系统调用错误码（负数）
    pub fn to_errno(&self) -> isize {
        match self {
            KernelError::Fs(e) => e.to_errno(),
            KernelError::Vm(e) => e.to_errno(),
            KernelError::BadDescriptor => -9,
            KernelError::TooManyFiles => -24,
            KernelError::Exited(_) => -3,
        }
    }
}

impl From<FsError> for KernelError {
    fn from(e: FsError) -> Self {
        KernelError::Fs(e)
    }
}

impl From<VmError> for KernelError {
    fn from(e: VmError) -> Self {
        KernelError::Vm(e)
    }
}

/// 内核操作的结果类型
pub type KernelResult<T> = Result<T, KernelError>;
