//! inode 层
//!
//! 一个 inode 是一条从头扇区出发的簇链：头扇区存放 [`DiskInode`]，
//! `start` 指向数据簇链。字节偏移到扇区的转换沿链逐簇前进，没有间接块。
//!
//! 同一扇区在内存中只有一个 [`Inode`]，登记在卷的打开列表里；
//! [`InodeHandle`] 是它的引用计数句柄：克隆即重新打开，析构即关闭。
//! 被标记删除的 inode 在最后一个句柄关闭时才回收头扇区和数据链。

use alloc::sync::Arc;
use sync::SleepLock;

use crate::error::{FsError, FsResult};
use crate::fat::{ClusterId, Fat, cluster_to_sector};
use crate::layout::{DiskInode, INODE_MAGIC, InodeKind, SECTOR_SIZE};
use crate::volume::Volume;

/// 内存中的 inode，按头扇区去重
pub struct Inode {
    sector: u32,
    inner: SleepLock<InodeInner>,
}

struct InodeInner {
    disk: DiskInode,
    open_cnt: usize,
    deny_write_cnt: usize,
    removed: bool,
}

/// 在 `sector` 写入一个长度为 `length` 的 inode 头。
///
/// `length > 0` 时预先分配 `ceil(length / SECTOR_SIZE)` 个簇并清零。
/// 中途分配失败会回收已分配的簇，且不写头扇区。
pub fn create(volume: &Volume, sector: u32, length: usize, kind: InodeKind) -> FsResult<()> {
    let length32 = u32::try_from(length).map_err(|_| FsError::OutOfRange)?;
    let mut disk = DiskInode::new(kind, length32);
    let clusters = length.div_ceil(SECTOR_SIZE);

    if clusters > 0 {
        let mut fat = volume.fat.lock();
        let mut tail: Option<ClusterId> = None;
        for _ in 0..clusters {
            let cluster = match fat.allocate_chain(tail) {
                Ok(c) => c,
                Err(e) => {
                    reclaim_partial(&mut fat, disk.start);
                    return Err(e);
                }
            };
            if tail.is_none() {
                disk.start = cluster.raw();
            }
            tail = Some(cluster);
            if let Err(e) = volume.cache.zero(cluster_to_sector(cluster)) {
                reclaim_partial(&mut fat, disk.start);
                return Err(e);
            }
        }
    }

    volume.cache.write(sector, &disk.encode())
}

/// 回收创建失败时已分配的部分簇链；回收本身出错只记录日志
fn reclaim_partial(fat: &mut Fat, start: u32) {
    if let Err(e) = fat.free_chain(ClusterId(start), None) {
        log::error!("inode: reclaiming chain from {} failed: {:?}", start, e);
    }
}

impl Volume {
    /// 打开 `sector` 处的 inode。
    ///
    /// 已打开时返回同一个 [`Inode`] 并增加打开计数，否则读入头扇区并登记。
    pub fn open_inode(self: &Arc<Self>, sector: u32) -> FsResult<InodeHandle> {
        let mut open = self.open_inodes.lock();
        if let Some(inode) = open.get(&sector) {
            inode.inner.lock().open_cnt += 1;
            return Ok(InodeHandle {
                inode: Arc::clone(inode),
                volume: Arc::clone(self),
            });
        }

        let mut raw = [0u8; SECTOR_SIZE];
        self.cache.read(sector, &mut raw)?;
        let disk = DiskInode::decode(&raw);
        if disk.magic != INODE_MAGIC {
            log::error!("inode: bad magic {:#x} at sector {}", disk.magic, sector);
            return Err(FsError::Corrupted);
        }

        let inode = Arc::new(Inode {
            sector,
            inner: SleepLock::new(InodeInner {
                disk,
                open_cnt: 1,
                deny_write_cnt: 0,
                removed: false,
            }),
        });
        open.insert(sector, Arc::clone(&inode));
        Ok(InodeHandle {
            inode,
            volume: Arc::clone(self),
        })
    }

    fn close_inode(&self, inode: &Inode) -> FsResult<()> {
        let mut open = self.open_inodes.lock();
        let mut inner = inode.inner.lock();
        inner.open_cnt -= 1;
        if inner.open_cnt > 0 {
            return Ok(());
        }
        open.remove(&inode.sector);
        if inner.removed {
            self.release_chain(inode.sector)?;
            self.release_chain(inner.disk.start)?;
        }
        Ok(())
    }

    /// 返回偏移 `pos` 所在的扇区，超出已分配的链时返回 `None`
    fn byte_to_sector(&self, disk: &DiskInode, pos: usize) -> FsResult<Option<u32>> {
        if disk.start == 0 {
            return Ok(None);
        }
        let fat = self.fat.lock();
        Ok(fat
            .nth_cluster(ClusterId(disk.start), pos / SECTOR_SIZE)?
            .map(cluster_to_sector))
    }

    /// 把数据链延长到至少覆盖 `end` 字节，一次分配一簇，新簇清零。
    ///
    /// 返回链实际覆盖的字节数；空间不足时可能小于 `end`。
    /// 若延长后仍到不了 `offset`，本次新接上的簇全部归还，链恢复原状。
    fn extend_chain(&self, disk: &mut DiskInode, offset: usize, end: usize) -> FsResult<usize> {
        let needed = end.div_ceil(SECTOR_SIZE);
        let mut fat = self.fat.lock();

        let mut count = 0;
        let mut tail = None;
        for cluster in fat.chain(ClusterId(disk.start)) {
            tail = Some(cluster?);
            count += 1;
        }
        let old_tail = tail;
        let old_count = count;
        let mut first_new = None;

        while count < needed {
            let cluster = match fat.allocate_chain(tail) {
                Ok(c) => c,
                Err(FsError::NoSpace) => {
                    log::warn!("inode: volume full after {} clusters", count);
                    break;
                }
                Err(e) => return Err(e),
            };
            if tail.is_none() {
                disk.start = cluster.raw();
            }
            first_new.get_or_insert(cluster);
            self.cache.zero(cluster_to_sector(cluster))?;
            tail = Some(cluster);
            count += 1;
        }

        if count * SECTOR_SIZE <= offset {
            if let Some(first) = first_new {
                fat.free_chain(first, old_tail)?;
                if old_tail.is_none() {
                    disk.start = 0;
                }
            }
            return Ok(old_count * SECTOR_SIZE);
        }
        Ok(count * SECTOR_SIZE)
    }
}

/// 已打开 inode 的句柄
///
/// 克隆等价于再次打开同一 inode；析构时关闭，最后一次关闭会回收被删除的 inode。
pub struct InodeHandle {
    inode: Arc<Inode>,
    volume: Arc<Volume>,
}

impl InodeHandle {
    /// 头扇区号，也用作 inode 编号
    pub fn sector(&self) -> u32 {
        self.inode.sector
    }

    /// 所属卷
    pub fn volume(&self) -> &Arc<Volume> {
        &self.volume
    }

    /// 两个句柄是否指向同一个内存 inode
    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        Arc::ptr_eq(&a.inode, &b.inode)
    }

    /// inode 类型
    pub fn kind(&self) -> InodeKind {
        self.inode.inner.lock().disk.kind()
    }

    /// 是否为目录
    pub fn is_dir(&self) -> bool {
        self.kind() == InodeKind::Directory
    }

    /// 是否为符号链接
    pub fn is_symlink(&self) -> bool {
        self.kind() == InodeKind::Symlink
    }

    /// 逻辑长度（字节）
    pub fn length(&self) -> usize {
        self.inode.inner.lock().disk.length as usize
    }

    /// 数据链首簇，0 表示尚未分配
    pub fn start(&self) -> u32 {
        self.inode.inner.lock().disk.start
    }

    /// 打开计数
    pub fn open_count(&self) -> usize {
        self.inode.inner.lock().open_cnt
    }

    /// 禁写计数
    pub fn deny_write_count(&self) -> usize {
        self.inode.inner.lock().deny_write_cnt
    }

    /// 是否已被标记删除
    pub fn is_removed(&self) -> bool {
        self.inode.inner.lock().removed
    }

    /// 标记删除，簇链在最后一次关闭时回收
    pub fn remove(&self) {
        self.inode.inner.lock().removed = true;
    }

    /// 偏移 `pos` 所在的扇区
    pub fn byte_to_sector(&self, pos: usize) -> FsResult<Option<u32>> {
        let inner = self.inode.inner.lock();
        self.volume.byte_to_sector(&inner.disk, pos)
    }

    /// 禁止写入，每个打开者最多调用一次
    pub fn deny_write(&self) -> FsResult<()> {
        let mut inner = self.inode.inner.lock();
        if inner.deny_write_cnt >= inner.open_cnt {
            return Err(FsError::InvalidArgument);
        }
        inner.deny_write_cnt += 1;
        Ok(())
    }

    /// 撤销一次 [`deny_write`](Self::deny_write)
    pub fn allow_write(&self) -> FsResult<()> {
        let mut inner = self.inode.inner.lock();
        if inner.deny_write_cnt == 0 {
            return Err(FsError::InvalidArgument);
        }
        inner.deny_write_cnt -= 1;
        Ok(())
    }

    /// 从 `offset` 开始读取，读到逻辑长度为止，返回实际读取的字节数
    pub fn read_at(&self, offset: usize, buf: &mut [u8]) -> FsResult<usize> {
        let inner = self.inode.inner.lock();
        let length = inner.disk.length as usize;
        if offset >= length || buf.is_empty() {
            return Ok(0);
        }
        let end = length.min(offset.saturating_add(buf.len()));

        let mut bounce = [0u8; SECTOR_SIZE];
        let mut pos = offset;
        while pos < end {
            let Some(sector) = self.volume.byte_to_sector(&inner.disk, pos)? else {
                break;
            };
            let sector_ofs = pos % SECTOR_SIZE;
            let chunk = (SECTOR_SIZE - sector_ofs).min(end - pos);
            let dst = &mut buf[pos - offset..pos - offset + chunk];
            if chunk == SECTOR_SIZE {
                self.volume.cache.read(sector, dst)?;
            } else {
                self.volume.cache.read(sector, &mut bounce)?;
                dst.copy_from_slice(&bounce[sector_ofs..sector_ofs + chunk]);
            }
            pos += chunk;
        }
        Ok(pos - offset)
    }

    /// 从 `offset` 开始写入，必要时逐簇延长数据链。
    ///
    /// 空间不足时写到链的末尾为止，返回实际写入的字节数（短写）。
    pub fn write_at(&self, offset: usize, buf: &[u8]) -> FsResult<usize> {
        let mut inner = self.inode.inner.lock();
        if inner.deny_write_cnt > 0 {
            return Err(FsError::WriteDenied);
        }
        if buf.is_empty() {
            return Ok(0);
        }
        let wanted_end = offset.checked_add(buf.len()).ok_or(FsError::OutOfRange)?;
        if u32::try_from(wanted_end).is_err() {
            return Err(FsError::OutOfRange);
        }

        let before = inner.disk;
        let covered = self.volume.extend_chain(&mut inner.disk, offset, wanted_end)?;
        let end = wanted_end.min(covered);
        if end <= offset {
            return Ok(0);
        }
        if end > inner.disk.length as usize {
            inner.disk.length = end as u32;
        }
        if inner.disk != before {
            self.volume
                .cache
                .write(self.inode.sector, &inner.disk.encode())?;
        }

        let mut bounce = [0u8; SECTOR_SIZE];
        let mut pos = offset;
        while pos < end {
            let Some(sector) = self.volume.byte_to_sector(&inner.disk, pos)? else {
                break;
            };
            let sector_ofs = pos % SECTOR_SIZE;
            let chunk = (SECTOR_SIZE - sector_ofs).min(end - pos);
            let src = &buf[pos - offset..pos - offset + chunk];
            if chunk == SECTOR_SIZE {
                self.volume.cache.write(sector, src)?;
            } else {
                // 部分扇区：先读出再改写，避免覆盖无关字节
                self.volume.cache.read(sector, &mut bounce)?;
                bounce[sector_ofs..sector_ofs + chunk].copy_from_slice(src);
                self.volume.cache.write(sector, &bounce)?;
            }
            pos += chunk;
        }
        Ok(pos - offset)
    }
}

impl Clone for InodeHandle {
    fn clone(&self) -> Self {
        self.inode.inner.lock().open_cnt += 1;
        Self {
            inode: Arc::clone(&self.inode),
            volume: Arc::clone(&self.volume),
        }
    }
}

impl Drop for InodeHandle {
    fn drop(&mut self) {
        if let Err(e) = self.volume.close_inode(&self.inode) {
            log::error!("inode: closing sector {} failed: {:?}", self.inode.sector, e);
        }
    }
}

impl core::fmt::Debug for InodeHandle {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("InodeHandle")
            .field("sector", &self.inode.sector)
            .finish()
    }
}
