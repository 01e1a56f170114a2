//! 簇分配表（FAT）
//!
//! 表项 `entries[c]` 描述簇 `c` 的后继：
//! [`FREE_CLUSTER`] 表示空闲，[`END_OF_CHAIN`] 表示链尾，其余值为下一簇的簇号。
//! 每簇一个扇区，簇号与扇区号一一对应。
//!
//! 整张表常驻内存，挂载时整体读入，卸载时整体写回。
//! 可分配的簇位于 `[data_start, last_cluster)`；`0..data_start` 与 `last_cluster`
//! 作为保留簇始终标记为链尾。

use alloc::vec;
use alloc::vec::Vec;

use crate::cache::BufferCache;
use crate::error::{FsError, FsResult};
use crate::layout::{
    BootRecord, END_OF_CHAIN, ENTRIES_PER_SECTOR, FREE_CLUSTER, ROOT_DIR_CLUSTER, SECTOR_SIZE,
    get_u32, put_u32,
};

/// 簇号
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct ClusterId(pub u32);

impl ClusterId {
    /// 原始簇号
    pub const fn raw(self) -> u32 {
        self.0
    }
}

/// 簇号转扇区号（恒等映射）
#[inline]
pub const fn cluster_to_sector(cluster: ClusterId) -> u32 {
    cluster.0
}

/// 扇区号转簇号（恒等映射）
#[inline]
pub const fn sector_to_cluster(sector: u32) -> ClusterId {
    ClusterId(sector)
}

/// 内存中的 FAT
pub struct Fat {
    boot: BootRecord,
    entries: Vec<u32>,
    data_start: u32,
    last_cluster: u32,
}

impl Fat {
    /// 为 `total_sectors` 个扇区的卷生成一张全新的表（只在内存中）
    pub fn create(total_sectors: u32) -> FsResult<Self> {
        let boot = BootRecord::new(total_sectors);
        if !boot.is_valid() {
            log::error!("fat: volume of {} sectors is too small", total_sectors);
            return Err(FsError::NoSpace);
        }
        let mut fat = Self::with_boot(boot);
        for reserved in 0..fat.data_start {
            fat.entries[reserved as usize] = END_OF_CHAIN;
        }
        fat.entries[fat.last_cluster as usize] = END_OF_CHAIN;
        fat.entries[ROOT_DIR_CLUSTER as usize] = END_OF_CHAIN;
        Ok(fat)
    }

    fn with_boot(boot: BootRecord) -> Self {
        Self {
            entries: vec![FREE_CLUSTER; boot.total_sectors as usize],
            data_start: boot.fat_start + boot.fat_sectors,
            last_cluster: boot.total_sectors - 1,
            boot,
        }
    }

    /// 挂载：读取引导记录，魔数有效则载入磁盘上的表，否则新建一张。
    ///
    /// 返回值的第二项表示是否新建（需要调用方重新格式化根目录）。
    pub fn mount(cache: &BufferCache) -> FsResult<(Self, bool)> {
        let mut raw = [0u8; SECTOR_SIZE];
        cache.read(0, &mut raw)?;
        let boot = BootRecord::decode(&raw);
        if boot.is_valid() && boot.total_sectors <= cache.total_sectors() {
            let mut fat = Self::with_boot(boot);
            fat.load(cache)?;
            return Ok((fat, false));
        }
        log::warn!("fat: bad boot record (magic {:#x}), reformatting", boot.magic);
        Ok((Self::create(cache.total_sectors())?, true))
    }

    /// 逐扇区从磁盘读入整张表，最后一个扇区只取需要的部分
    pub fn load(&mut self, cache: &BufferCache) -> FsResult<()> {
        let mut raw = [0u8; SECTOR_SIZE];
        let sectors = self.boot.fat_sectors as usize;
        for (i, chunk) in self.entries.chunks_mut(ENTRIES_PER_SECTOR).take(sectors).enumerate() {
            cache.read(self.boot.fat_start + i as u32, &mut raw)?;
            for (j, entry) in chunk.iter_mut().enumerate() {
                *entry = get_u32(&raw, j * 4);
            }
        }
        Ok(())
    }

    /// 写回引导记录，再逐扇区写回整张表，最后一个扇区补零
    pub fn flush(&self, cache: &BufferCache) -> FsResult<()> {
        cache.write(0, &self.boot.encode())?;
        let sectors = self.boot.fat_sectors as usize;
        for (i, chunk) in self.entries.chunks(ENTRIES_PER_SECTOR).take(sectors).enumerate() {
            let mut raw = [0u8; SECTOR_SIZE];
            for (j, &entry) in chunk.iter().enumerate() {
                put_u32(&mut raw, j * 4, entry);
            }
            cache.write(self.boot.fat_start + i as u32, &raw)?;
        }
        Ok(())
    }

    /// 引导记录
    pub fn boot(&self) -> &BootRecord {
        &self.boot
    }

    /// 表项数（等于卷的总扇区数）
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// 表是否为空
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 第一个数据簇
    pub fn data_start(&self) -> ClusterId {
        ClusterId(self.data_start)
    }

    /// 最后一个有效簇号（保留，不参与分配）
    pub fn last_cluster(&self) -> ClusterId {
        ClusterId(self.last_cluster)
    }

    /// 可参与分配的簇数
    pub fn data_clusters(&self) -> usize {
        (self.last_cluster - self.data_start) as usize
    }

    /// 当前空闲簇数
    pub fn free_count(&self) -> usize {
        self.entries[self.data_start as usize..self.last_cluster as usize]
            .iter()
            .filter(|&&e| e == FREE_CLUSTER)
            .count()
    }

    /// 读取表项
    pub fn get(&self, cluster: ClusterId) -> FsResult<u32> {
        self.entries
            .get(cluster.0 as usize)
            .copied()
            .ok_or(FsError::OutOfRange)
    }

    /// 写入表项
    pub fn put(&mut self, cluster: ClusterId, value: u32) -> FsResult<()> {
        let entry = self
            .entries
            .get_mut(cluster.0 as usize)
            .ok_or(FsError::OutOfRange)?;
        *entry = value;
        Ok(())
    }

    /// 链上 `cluster` 的下一簇，链尾返回 `None`
    pub fn next(&self, cluster: ClusterId) -> FsResult<Option<ClusterId>> {
        match self.get(cluster)? {
            END_OF_CHAIN => Ok(None),
            FREE_CLUSTER => {
                log::error!("fat: cluster {} is free but linked from a chain", cluster.0);
                Err(FsError::Corrupted)
            }
            next => Ok(Some(ClusterId(next))),
        }
    }

    /// 分配一个空闲簇并标记为链尾。
    ///
    /// `prev` 为 `None` 时开始一条新链，否则把新簇接在 `prev` 之后。
    /// 从数据区开头线性扫描，找不到空闲簇时返回 [`FsError::NoSpace`]。
    pub fn allocate_chain(&mut self, prev: Option<ClusterId>) -> FsResult<ClusterId> {
        if let Some(prev) = prev {
            self.check_data_cluster(prev)?;
        }
        let found = (self.data_start..self.last_cluster)
            .find(|&c| self.entries[c as usize] == FREE_CLUSTER)
            .ok_or(FsError::NoSpace)?;
        let cluster = ClusterId(found);
        self.put(cluster, END_OF_CHAIN)?;
        if let Some(prev) = prev {
            self.put(prev, cluster.0)?;
        }
        Ok(cluster)
    }

    /// 释放从 `start` 开始的整条链。
    ///
    /// `prev` 给出时先把它改为链尾，把 `start` 开始的部分从原链上切下。
    /// 被遍历到的表项全部置为空闲。`start` 为 0 表示链尚未分配，直接返回。
    pub fn free_chain(&mut self, start: ClusterId, prev: Option<ClusterId>) -> FsResult<()> {
        if let Some(prev) = prev {
            self.check_data_cluster(prev)?;
            self.put(prev, END_OF_CHAIN)?;
        }
        if start.0 == FREE_CLUSTER {
            return Ok(());
        }
        self.check_chain_head(start)?;

        let mut cluster = start;
        for _ in 0..self.entries.len() {
            let next = self.get(cluster)?;
            self.put(cluster, FREE_CLUSTER)?;
            match next {
                END_OF_CHAIN => return Ok(()),
                FREE_CLUSTER => {
                    log::error!("fat: chain from {} runs into a free cluster", start.0);
                    return Err(FsError::Corrupted);
                }
                next => cluster = ClusterId(next),
            }
        }
        log::error!("fat: chain from {} does not terminate", start.0);
        Err(FsError::Corrupted)
    }

    /// 遍历从 `start` 开始的链，步数超过表长视为成环
    pub fn chain(&self, start: ClusterId) -> ChainIter<'_> {
        ChainIter {
            fat: self,
            next: (start.0 != FREE_CLUSTER).then_some(start),
            remaining: self.entries.len(),
        }
    }

    /// 沿链前进 `steps` 步，链不够长时返回 `None`
    pub fn nth_cluster(&self, start: ClusterId, steps: usize) -> FsResult<Option<ClusterId>> {
        match self.chain(start).nth(steps) {
            Some(result) => result.map(Some),
            None => Ok(None),
        }
    }

    fn check_data_cluster(&self, cluster: ClusterId) -> FsResult<()> {
        if (self.data_start..self.last_cluster).contains(&cluster.0) {
            Ok(())
        } else {
            Err(FsError::OutOfRange)
        }
    }

    /// 链头可以是数据簇，也可以是根目录簇（根目录 inode 头独占的单簇链）
    fn check_chain_head(&self, cluster: ClusterId) -> FsResult<()> {
        if cluster.0 == ROOT_DIR_CLUSTER {
            return Ok(());
        }
        self.check_data_cluster(cluster)
    }
}

/// [`Fat::chain`] 返回的迭代器
pub struct ChainIter<'a> {
    fat: &'a Fat,
    next: Option<ClusterId>,
    remaining: usize,
}

impl Iterator for ChainIter<'_> {
    type Item = FsResult<ClusterId>;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next?;
        if self.remaining == 0 {
            self.next = None;
            return Some(Err(FsError::Corrupted));
        }
        self.remaining -= 1;
        match self.fat.next(current) {
            Ok(next) => {
                self.next = next;
                Some(Ok(current))
            }
            Err(e) => {
                self.next = None;
                Some(Err(e))
            }
        }
    }
}
