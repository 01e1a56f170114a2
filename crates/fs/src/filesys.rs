//! 路径级文件系统接口
//!
//! [`FileSys`] 把卷、目录和文件组合成按路径操作的接口：创建、打开、删除、
//! 建目录、切换目录和符号链接。相对路径以调用者给出的当前目录扇区为起点。
//!
//! 符号链接的内容就是目标路径，相对目标以链接所在目录为起点解析，
//! 嵌套深度超过 [`FsConfig::max_symlink_depth`] 时报 [`FsError::TooManySymlinks`]。

use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec;
use device::BlockDriver;

use crate::config::FsConfig;
use crate::dir::Dir;
use crate::error::{FsError, FsResult};
use crate::file::File;
use crate::inode::{self, InodeHandle};
use crate::layout::{InodeKind, ROOT_DIR_SECTOR};
use crate::path::{PathComponent, parse_path, split_path};
use crate::volume::Volume;

/// 按路径打开得到的对象
pub enum Node {
    /// 普通文件
    File(File),
    /// 目录
    Dir(Dir),
}

impl Node {
    /// 是否为目录
    pub fn is_dir(&self) -> bool {
        matches!(self, Node::Dir(_))
    }

    /// 底层 inode
    pub fn inode(&self) -> &InodeHandle {
        match self {
            Node::File(f) => f.inode(),
            Node::Dir(d) => d.inode(),
        }
    }

    /// inode 编号
    pub fn inumber(&self) -> u32 {
        self.inode().sector()
    }
}

/// 已挂载的文件系统
pub struct FileSys {
    volume: Arc<Volume>,
}

impl FileSys {
    /// 挂载 `disk` 上的文件系统，`format` 为 true 或引导记录无效时先格式化
    pub fn mount(disk: Arc<dyn BlockDriver>, config: FsConfig, format: bool) -> FsResult<Self> {
        let (volume, fresh) = Volume::mount(disk, config)?;
        let fs = Self { volume };
        if format || fresh {
            fs.format()?;
        }
        Ok(fs)
    }

    fn format(&self) -> FsResult<()> {
        log::info!("fs: formatting volume");
        self.volume.reset_fat()?;
        Dir::create(
            &self.volume,
            ROOT_DIR_SECTOR,
            ROOT_DIR_SECTOR,
            self.volume.config().root_dir_entries,
        )?;
        self.volume.sync()
    }

    /// 把 FAT 与缓存中的脏扇区写回磁盘
    pub fn shutdown(&self) -> FsResult<()> {
        self.volume.sync()
    }

    /// 底层卷
    pub fn volume(&self) -> &Arc<Volume> {
        &self.volume
    }

    /// 根目录扇区，也是新进程的初始当前目录
    pub fn root_sector(&self) -> u32 {
        ROOT_DIR_SECTOR
    }

    /// 空闲簇数
    pub fn free_clusters(&self) -> usize {
        self.volume.free_clusters()
    }

    /// 打开根目录
    pub fn root(&self) -> FsResult<Dir> {
        Dir::open(self.volume.open_inode(ROOT_DIR_SECTOR)?)
    }

    /// 创建长度为 `size` 的普通文件
    pub fn create(&self, cwd: u32, path: &str, size: usize) -> FsResult<()> {
        let (dir, name) = self.resolve_parent(cwd, path)?;
        self.install(&dir, name, |volume, sector| {
            inode::create(volume, sector, size, InodeKind::File)
        })
    }

    /// 创建目录
    pub fn mkdir(&self, cwd: u32, path: &str) -> FsResult<()> {
        let (dir, name) = self.resolve_parent(cwd, path)?;
        let parent = dir.sector();
        let entries = self.volume.config().dir_entries;
        self.install(&dir, name, |volume, sector| {
            Dir::create(volume, sector, parent, entries)
        })
    }

    /// 创建指向 `target` 的符号链接 `linkpath`，目标不必存在
    pub fn symlink(&self, cwd: u32, target: &str, linkpath: &str) -> FsResult<()> {
        if target.is_empty() {
            return Err(FsError::InvalidArgument);
        }
        let (dir, name) = self.resolve_parent(cwd, linkpath)?;
        self.install(&dir, name, |volume, sector| {
            inode::create(volume, sector, 0, InodeKind::Symlink)?;
            let link = volume.open_inode(sector)?;
            if link.write_at(0, target.as_bytes())? != target.len() {
                return Err(FsError::NoSpace);
            }
            Ok(())
        })
    }

    /// 读取符号链接本身的内容
    pub fn readlink(&self, cwd: u32, path: &str) -> FsResult<String> {
        let link = self.resolve(cwd, path, false, 0)?;
        if !link.is_symlink() {
            return Err(FsError::InvalidArgument);
        }
        Self::link_target(&link)
    }

    /// 打开文件或目录，沿途及末端的符号链接都会被跟随
    pub fn open(&self, cwd: u32, path: &str) -> FsResult<Node> {
        let inode = self.resolve(cwd, path, true, 0)?;
        if inode.is_dir() {
            Ok(Node::Dir(Dir::open(inode)?))
        } else {
            Ok(Node::File(File::open(inode)?))
        }
    }

    /// 打开普通文件
    pub fn open_file(&self, cwd: u32, path: &str) -> FsResult<File> {
        File::open(self.resolve(cwd, path, true, 0)?)
    }

    /// 打开目录
    pub fn open_dir(&self, cwd: u32, path: &str) -> FsResult<Dir> {
        Dir::open(self.resolve(cwd, path, true, 0)?)
    }

    /// 解析新的当前目录，返回打开的目录供调用者持有
    pub fn chdir(&self, cwd: u32, path: &str) -> FsResult<Dir> {
        let dir = self.open_dir(cwd, path)?;
        if dir.inode().is_removed() {
            return Err(FsError::NotFound);
        }
        Ok(dir)
    }

    /// 删除文件、空目录或符号链接（链接本身）
    ///
    /// 目录不能是根目录、调用者的当前目录，也不能被别处打开。
    pub fn remove(&self, cwd: u32, path: &str) -> FsResult<()> {
        let (dir, name) = self.resolve_parent(cwd, path)?;
        let target = dir.lookup(name)?;
        if target.is_dir() {
            if target.sector() == ROOT_DIR_SECTOR || target.sector() == cwd {
                return Err(FsError::Busy);
            }
            let victim = Dir::open(target)?;
            if victim.inode().open_count() > 1 {
                return Err(FsError::Busy);
            }
            if !victim.is_empty()? {
                return Err(FsError::DirectoryNotEmpty);
            }
        }
        dir.remove(name)
    }

    /// 分配头扇区，用 `build` 建立 inode 并登记到 `dir`；任一步失败都回收已分配的空间
    fn install<F>(&self, dir: &Dir, name: &str, build: F) -> FsResult<()>
    where
        F: FnOnce(&Arc<Volume>, u32) -> FsResult<()>,
    {
        if dir.contains(name)? {
            return Err(FsError::AlreadyExists);
        }
        let sector = self.volume.allocate_sector()?;
        let result = build(&self.volume, sector).and_then(|()| dir.add(name, sector));
        if let Err(e) = result {
            self.discard(sector);
            return Err(e);
        }
        Ok(())
    }

    fn discard(&self, sector: u32) {
        match self.volume.open_inode(sector) {
            Ok(inode) => inode.remove(),
            // 头部尚未写入，只剩头扇区本身
            Err(_) => {
                if let Err(e) = self.volume.release_chain(sector) {
                    log::error!("fs: failed to reclaim sector {}: {:?}", sector, e);
                }
            }
        }
    }

    /// 打开 `path` 的父目录，并返回最后一个名字
    fn resolve_parent<'p>(&self, cwd: u32, path: &'p str) -> FsResult<(Dir, &'p str)> {
        let (parent, name) = split_path(path)?;
        let dir = self.open_dir(cwd, parent)?;
        if dir.inode().is_removed() {
            return Err(FsError::NotFound);
        }
        Ok((dir, name))
    }

    /// 逐级解析路径。`follow_last` 为 false 时末端的符号链接不被跟随。
    fn resolve(
        &self,
        cwd: u32,
        path: &str,
        follow_last: bool,
        depth: usize,
    ) -> FsResult<InodeHandle> {
        if path.is_empty() {
            return Err(FsError::NotFound);
        }
        let components = parse_path(path);
        let mut current = self.volume.open_inode(cwd)?;
        let last = components.len().saturating_sub(1);

        for (i, component) in components.into_iter().enumerate() {
            match component {
                PathComponent::Root => current = self.volume.open_inode(ROOT_DIR_SECTOR)?,
                PathComponent::Current => {
                    if !current.is_dir() {
                        return Err(FsError::NotDirectory);
                    }
                }
                PathComponent::Parent => current = Dir::open(current)?.lookup("..")?,
                PathComponent::Normal(name) => {
                    let dir = Dir::open(current)?;
                    let next = dir.lookup(&name)?;
                    current = if next.is_symlink() && (i != last || follow_last) {
                        self.follow(&dir, &next, depth)?
                    } else {
                        next
                    };
                }
            }
        }
        Ok(current)
    }

    fn follow(&self, dir: &Dir, link: &InodeHandle, depth: usize) -> FsResult<InodeHandle> {
        if depth >= self.volume.config().max_symlink_depth {
            return Err(FsError::TooManySymlinks);
        }
        let target = Self::link_target(link)?;
        self.resolve(dir.sector(), &target, true, depth + 1)
    }

    fn link_target(link: &InodeHandle) -> FsResult<String> {
        let mut buf = vec![0u8; link.length()];
        let n = link.read_at(0, &mut buf)?;
        buf.truncate(n);
        String::from_utf8(buf).map_err(|_| FsError::Corrupted)
    }
}
