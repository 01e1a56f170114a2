//! 虚拟内存错误类型

/// 虚拟内存操作中可能发生的错误
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmError {
    /// 访问未映射的地址，或写入只读页
    AccessViolation,
    /// 该虚拟页已存在
    AlreadyMapped,
    /// 该虚拟页不存在
    NotMapped,
    /// 参数无效（未对齐、长度为 0 等）
    InvalidArgument,
    /// 没有空闲帧且换出失败
    OutOfMemory,
    /// 交换区已满
    NoSwapSpace,
    /// MMU 拒绝建立映射
    MapFailed,
    /// 文件或交换设备 I/O 失败，携带底层错误码
    Io(isize),
    /// 地址空间不存在（已销毁）
    NoSuchSpace,
}

impl VmError {
    /// 转换为 errno（负数）
    pub fn to_errno(&self) -> isize {
        match self {
            VmError::AccessViolation => -14, // EFAULT
            VmError::AlreadyMapped => -17, // EEXIST
            VmError::NotMapped => -22, // EINVAL
            VmError::InvalidArgument => -22, // EINVAL
            VmError::OutOfMemory => -12, // ENOMEM
            VmError::NoSwapSpace => -12, // ENOMEM
            VmError::MapFailed => -12, // ENOMEM
            VmError::Io(errno) => *errno,
            VmError::NoSuchSpace => -3, // ESRCH
        }
    }
}

/// 虚拟内存操作的结果类型
pub type VmResult<T> = Result<T, VmError>;
