//! 打开的文件
//!
//! 在 [`InodeHandle`] 之上加一个读写位置和一个打开者自己的禁写标记。
//! 文件关闭（析构）时会撤销它自己施加的禁写。

use crate::error::{FsError, FsResult};
use crate::inode::InodeHandle;

/// 已打开的文件
pub struct File {
    inode: InodeHandle,
    pos: usize,
    deny_write: bool,
}

impl File {
    /// 以文件方式打开 inode，目录会被拒绝
    pub fn open(inode: InodeHandle) -> FsResult<Self> {
        if inode.is_dir() {
            return Err(FsError::IsDirectory);
        }
        Ok(Self {
            inode,
            pos: 0,
            deny_write: false,
        })
    }

    /// 重新打开同一 inode，得到独立的读写位置
    pub fn reopen(&self) -> Self {
        Self {
            inode: self.inode.clone(),
            pos: 0,
            deny_write: false,
        }
    }

    /// 复制打开的文件：位置相同，本文件施加了禁写时副本也施加一次
    pub fn duplicate(&self) -> FsResult<Self> {
        let mut copy = self.reopen();
        copy.pos = self.pos;
        if self.deny_write {
            copy.deny_write()?;
        }
        Ok(copy)
    }

    /// 本文件是否施加了禁写
    pub fn denies_write(&self) -> bool {
        self.deny_write
    }

    /// 底层 inode
    pub fn inode(&self) -> &InodeHandle {
        &self.inode
    }

    /// inode 编号（头扇区号）
    pub fn inumber(&self) -> u32 {
        self.inode.sector()
    }

    /// 文件长度
    pub fn len(&self) -> usize {
        self.inode.length()
    }

    /// 文件是否为空
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 从当前位置读取并前移
    pub fn read(&mut self, buf: &mut [u8]) -> FsResult<usize> {
        let n = self.inode.read_at(self.pos, buf)?;
        self.pos += n;
        Ok(n)
    }

    /// 在当前位置写入并前移
    pub fn write(&mut self, buf: &[u8]) -> FsResult<usize> {
        let n = self.inode.write_at(self.pos, buf)?;
        self.pos += n;
        Ok(n)
    }

    /// 从指定偏移读取，不影响当前位置
    pub fn read_at(&self, offset: usize, buf: &mut [u8]) -> FsResult<usize> {
        self.inode.read_at(offset, buf)
    }

    /// 在指定偏移写入，不影响当前位置
    pub fn write_at(&self, offset: usize, buf: &[u8]) -> FsResult<usize> {
        self.inode.write_at(offset, buf)
    }

    /// 设置读写位置，允许越过文件末尾（之后的写入会留下零填充的空洞）
    pub fn seek(&mut self, pos: usize) {
        self.pos = pos;
    }

    /// 当前读写位置
    pub fn tell(&self) -> usize {
        self.pos
    }

    /// 禁止任何人写入该文件，直到本文件调用 [`allow_write`](Self::allow_write) 或被关闭
    pub fn deny_write(&mut self) -> FsResult<()> {
        if !self.deny_write {
            self.inode.deny_write()?;
            self.deny_write = true;
        }
        Ok(())
    }

    /// 撤销本文件施加的禁写
    pub fn allow_write(&mut self) -> FsResult<()> {
        if self.deny_write {
            self.inode.allow_write()?;
            self.deny_write = false;
        }
        Ok(())
    }
}

impl Drop for File {
    fn drop(&mut self) {
        if self.deny_write {
            if let Err(e) = self.inode.allow_write() {
                log::error!("file: releasing deny-write on {} failed: {:?}", self.inumber(), e);
            }
        }
    }
}
