//! 目录
//!
//! 目录是一个普通的 inode 字节流，内容为定长的 [`DirEntry`] 数组。
//! 创建时显式写入 `.` 与 `..` 两项；删除只清除在用标志，槽位留给后来的项复用。

use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;

use crate::error::{FsError, FsResult};
use crate::inode::{self, InodeHandle};
use crate::layout::{DIR_ENTRY_SIZE, DirEntry, InodeKind, NAME_MAX};
use crate::volume::Volume;

/// 已打开的目录
pub struct Dir {
    inode: InodeHandle,
    pos: usize,
}

impl Dir {
    /// 在 `sector` 创建一个预留 `entry_cnt` 个槽位的目录，父目录为 `parent`
    pub fn create(
        volume: &Arc<Volume>,
        sector: u32,
        parent: u32,
        entry_cnt: usize,
    ) -> FsResult<()> {
        inode::create(volume, sector, entry_cnt * DIR_ENTRY_SIZE, InodeKind::Directory)?;
        let dir = Dir::open(volume.open_inode(sector)?)?;
        dir.add(".", sector)?;
        dir.add("..", parent)?;
        Ok(())
    }

    /// 以目录方式打开 inode
    pub fn open(inode: InodeHandle) -> FsResult<Self> {
        if !inode.is_dir() {
            return Err(FsError::NotDirectory);
        }
        Ok(Self { inode, pos: 0 })
    }

    /// 打开同一目录的另一个实例，读位置从头开始
    pub fn reopen(&self) -> Self {
        Self {
            inode: self.inode.clone(),
            pos: 0,
        }
    }

    /// 底层 inode
    pub fn inode(&self) -> &InodeHandle {
        &self.inode
    }

    /// 目录 inode 头所在扇区
    pub fn sector(&self) -> u32 {
        self.inode.sector()
    }

    fn entry_at(&self, offset: usize) -> FsResult<Option<DirEntry>> {
        let mut raw = [0u8; DIR_ENTRY_SIZE];
        if self.inode.read_at(offset, &mut raw)? != DIR_ENTRY_SIZE {
            return Ok(None);
        }
        Ok(Some(DirEntry::decode(&raw)))
    }

    /// 依次产出 (偏移, 目录项)，包括空闲槽位
    fn slots(&self) -> impl Iterator<Item = FsResult<(usize, DirEntry)>> + '_ {
        let mut offset = 0;
        core::iter::from_fn(move || {
            let entry = match self.entry_at(offset) {
                Ok(Some(e)) => e,
                Ok(None) => return None,
                Err(e) => return Some(Err(e)),
            };
            let at = offset;
            offset += DIR_ENTRY_SIZE;
            Some(Ok((at, entry)))
        })
    }

    fn find(&self, name: &str) -> FsResult<Option<(usize, DirEntry)>> {
        for slot in self.slots() {
            let (offset, entry) = slot?;
            if entry.in_use && entry.name() == name {
                return Ok(Some((offset, entry)));
            }
        }
        Ok(None)
    }

    /// 查找名为 `name` 的项并打开其 inode
    pub fn lookup(&self, name: &str) -> FsResult<InodeHandle> {
        let (_, entry) = self.find(name)?.ok_or(FsError::NotFound)?;
        self.inode.volume().open_inode(entry.inode_sector)
    }

    /// 是否存在名为 `name` 的项
    pub fn contains(&self, name: &str) -> FsResult<bool> {
        Ok(self.find(name)?.is_some())
    }

    /// 添加一项，优先复用空闲槽位，没有则追加到末尾（目录随之增长）
    pub fn add(&self, name: &str, inode_sector: u32) -> FsResult<()> {
        if name.is_empty() || name.contains('/') {
            return Err(FsError::InvalidArgument);
        }
        if name.len() > NAME_MAX {
            return Err(FsError::NameTooLong);
        }
        if self.find(name)?.is_some() {
            return Err(FsError::AlreadyExists);
        }

        let mut offset = self.inode.length();
        for slot in self.slots() {
            let (at, entry) = slot?;
            if !entry.in_use {
                offset = at;
                break;
            }
        }

        let raw = DirEntry::new(name, inode_sector).encode();
        if self.inode.write_at(offset, &raw)? != DIR_ENTRY_SIZE {
            return Err(FsError::NoSpace);
        }
        Ok(())
    }

    /// 删除名为 `name` 的项，并把目标 inode 标记为删除
    pub fn remove(&self, name: &str) -> FsResult<()> {
        if name == "." || name == ".." {
            return Err(FsError::InvalidArgument);
        }
        let (offset, mut entry) = self.find(name)?.ok_or(FsError::NotFound)?;
        let target = self.inode.volume().open_inode(entry.inode_sector)?;

        entry.in_use = false;
        if self.inode.write_at(offset, &entry.encode())? != DIR_ENTRY_SIZE {
            return Err(FsError::IoError);
        }
        target.remove();
        Ok(())
    }

    /// 读取下一个名字，跳过 `.` 与 `..`；读完返回 `None`
    pub fn readdir(&mut self) -> FsResult<Option<String>> {
        while let Some(entry) = self.entry_at(self.pos)? {
            self.pos += DIR_ENTRY_SIZE;
            if entry.in_use && entry.name() != "." && entry.name() != ".." {
                return Ok(Some(entry.name_owned()));
            }
        }
        Ok(None)
    }

    /// 所有在用项的名字，包括 `.` 与 `..`
    pub fn entries(&self) -> FsResult<Vec<String>> {
        let mut names = Vec::new();
        for slot in self.slots() {
            let (_, entry) = slot?;
            if entry.in_use {
                names.push(entry.name_owned());
            }
        }
        Ok(names)
    }

    /// 除 `.` 与 `..` 外是否没有任何项
    pub fn is_empty(&self) -> FsResult<bool> {
        for slot in self.slots() {
            let (_, entry) = slot?;
            if entry.in_use && entry.name() != "." && entry.name() != ".." {
                return Ok(false);
            }
        }
        Ok(true)
    }
}
