//! 文件系统错误类型
//!
//! 与 POSIX 兼容的错误码，可通过 [`FsError::to_errno()`] 转换为系统调用错误码。

/// 文件系统错误类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsError {
    // 文件/目录相关
    /// 文件不存在 (-ENOENT)
    NotFound,
    /// 文件已存在 (-EEXIST)
    AlreadyExists,
    /// 不是目录 (-ENOTDIR)
    NotDirectory,
    /// 是目录 (-EISDIR)
    IsDirectory,
    /// 目录非空 (-ENOTEMPTY)
    DirectoryNotEmpty,
    /// 目录正在被使用，例如是当前工作目录 (-EBUSY)
    Busy,

    // 权限相关
    /// 权限被拒绝 (-EACCES)
    PermissionDenied,
    /// 文件正被执行或映射，禁止写入 (-ETXTBSY)
    WriteDenied,

    // 参数相关
    /// 无效参数 (-EINVAL)
    InvalidArgument,
    /// 文件名过长 (-ENAMETOOLONG)
    NameTooLong,
    /// 簇号或扇区号越界 (-ERANGE)
    OutOfRange,

    // 卷相关
    /// 没有空闲簇 (-ENOSPC)
    NoSpace,
    /// 块设备读写失败 (-EIO)
    IoError,
    /// 元数据损坏：inode 魔数不符、簇链成环等 (-EUCLEAN)
    Corrupted,
    /// 符号链接层级过多 (-ELOOP)
    TooManySymlinks,
}

impl FsError {
    /// 转换为系统调用错误码（负数）
    pub fn to_errno(&self) -> isize {
        match self {
            FsError::NotFound => -2,
            FsError::IoError => -5,
            FsError::PermissionDenied => -13,
            FsError::Busy => -16,
            FsError::AlreadyExists => -17,
            FsError::NotDirectory => -20,
            FsError::IsDirectory => -21,
            FsError::InvalidArgument => -22,
            FsError::WriteDenied => -26,
            FsError::NoSpace => -28,
            FsError::OutOfRange => -34,
            FsError::NameTooLong => -36,
            FsError::DirectoryNotEmpty => -39,
            FsError::TooManySymlinks => -40,
            FsError::Corrupted => -117,
        }
    }
}

/// 文件系统操作的结果类型
pub type FsResult<T> = Result<T, FsError>;
