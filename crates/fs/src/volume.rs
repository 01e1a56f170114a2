//! 卷上下文
//!
//! 一个已挂载卷的全部共享状态：缓冲区缓存、FAT、打开的 inode 列表。
//! 所有文件系统操作都经由同一个 `Arc<Volume>` 进行，没有全局单例。
//!
//! # 锁顺序
//!
//! 打开列表 → 单个 inode → FAT → 缓冲区缓存。

use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use device::BlockDriver;
use sync::SleepLock;

use crate::cache::BufferCache;
use crate::config::FsConfig;
use crate::error::FsResult;
use crate::fat::{ClusterId, Fat, cluster_to_sector, sector_to_cluster};
use crate::inode::Inode;

/// 已挂载的卷
pub struct Volume {
    pub(crate) cache: BufferCache,
    pub(crate) fat: SleepLock<Fat>,
    pub(crate) open_inodes: SleepLock<BTreeMap<u32, Arc<Inode>>>,
    pub(crate) config: FsConfig,
}

impl Volume {
    /// 在 `disk` 上挂载卷。引导记录无效时在内存中新建 FAT，
    /// 返回值第二项为 true 表示卷需要格式化。
    pub fn mount(disk: Arc<dyn BlockDriver>, config: FsConfig) -> FsResult<(Arc<Self>, bool)> {
        let cache = BufferCache::new(disk, config.cache_entries);
        let (fat, fresh) = Fat::mount(&cache)?;
        log::debug!(
            "fs: mounted {} sectors, data starts at {}",
            fat.len(),
            fat.data_start().raw()
        );
        let volume = Arc::new(Self {
            cache,
            fat: SleepLock::new(fat),
            open_inodes: SleepLock::new(BTreeMap::new()),
            config,
        });
        Ok((volume, fresh))
    }

    /// 挂载参数
    pub fn config(&self) -> &FsConfig {
        &self.config
    }

    /// 缓冲区缓存
    pub fn cache(&self) -> &BufferCache {
        &self.cache
    }

    /// 以新表替换内存中的 FAT（格式化）
    pub(crate) fn reset_fat(&self) -> FsResult<()> {
        let fresh = Fat::create(self.cache.total_sectors())?;
        *self.fat.lock() = fresh;
        Ok(())
    }

    /// 为新 inode 头分配一个扇区（单簇链），并清零
    pub(crate) fn allocate_sector(&self) -> FsResult<u32> {
        let mut fat = self.fat.lock();
        let cluster = fat.allocate_chain(None)?;
        let sector = cluster_to_sector(cluster);
        if let Err(e) = self.cache.zero(sector) {
            fat.free_chain(cluster, None)?;
            return Err(e);
        }
        Ok(sector)
    }

    /// 释放从扇区 `start` 开始的簇链，0 表示空链
    pub(crate) fn release_chain(&self, start: u32) -> FsResult<()> {
        self.fat.lock().free_chain(sector_to_cluster(start), None)
    }

    /// 当前空闲簇数
    pub fn free_clusters(&self) -> usize {
        self.fat.lock().free_count()
    }

    /// 数据区簇总数
    pub fn data_clusters(&self) -> usize {
        self.fat.lock().data_clusters()
    }

    /// 从 `start` 开始的链长度（簇数）
    pub fn chain_len(&self, start: u32) -> FsResult<usize> {
        let fat = self.fat.lock();
        let mut len = 0;
        for cluster in fat.chain(ClusterId(start)) {
            cluster?;
            len += 1;
        }
        Ok(len)
    }

    /// 当前打开的 inode 个数
    pub fn open_inode_count(&self) -> usize {
        self.open_inodes.lock().len()
    }

    /// 写回 FAT，再写回缓存中的所有脏扇区
    pub fn sync(&self) -> FsResult<()> {
        self.fat.lock().flush(&self.cache)?;
        self.cache.flush()
    }
}
