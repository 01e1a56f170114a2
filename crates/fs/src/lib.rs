//! # 文件系统模块 (FS)
//!
//! 基于 FAT 簇链的文件系统：每个簇恰好一个扇区，簇号即扇区号。
//!
//! ## 分层
//!
//! - [`cache`]: 写回式扇区缓存，所有磁盘读写都经过它
//! - [`fat`]: 内存中的 FAT 表，负责簇链的分配、遍历与释放
//! - [`inode`]: inode 头与数据簇链，按需增长
//! - [`dir`] / [`file`]: 目录项与带位置的文件句柄
//! - [`filesys`]: 按路径操作的文件系统接口，含符号链接解析
//!
//! 所有状态都挂在 [`Volume`] 上，以 `Arc` 在各层之间传递。

#![no_std]
#![doc = "FAT 簇链文件系统"]

extern crate alloc;

pub mod cache;
pub mod config;
pub mod dir;
pub mod error;
pub mod fat;
pub mod file;
pub mod filesys;
pub mod inode;
pub mod layout;
pub mod path;
pub mod volume;

pub use cache::BufferCache;
pub use config::FsConfig;
pub use dir::Dir;
pub use error::{FsError, FsResult};
pub use fat::{ClusterId, Fat, cluster_to_sector, sector_to_cluster};
pub use file::File;
pub use filesys::{FileSys, Node};
pub use inode::InodeHandle;
pub use layout::{InodeKind, ROOT_DIR_SECTOR, SECTOR_SIZE};
pub use volume::Volume;
