//! 磁盘布局
//!
//! 引导记录、inode 头和目录项的定长编码。所有整数均为小端序。
//!
//! ```text
//! 扇区 0                  引导记录
//! 扇区 1                  根目录 inode 头
//! 扇区 2 .. 2+fat_sectors  FAT 表
//! 之后                    数据区（簇号 == 扇区号）
//! ```

use alloc::string::String;

pub use device::SECTOR_SIZE;

/// 引导记录魔数
pub const FAT_MAGIC: u32 = 0xEB3C_9000;
/// inode 头魔数（"INOD"）
pub const INODE_MAGIC: u32 = 0x494E_4F44;
/// FAT 表项：空闲
pub const FREE_CLUSTER: u32 = 0;
/// FAT 表项：簇链结束
pub const END_OF_CHAIN: u32 = 0x0FFF_FFFF;
/// 每簇扇区数，固定为 1
pub const SECTORS_PER_CLUSTER: u32 = 1;
/// FAT 表起始扇区
pub const FAT_START: u32 = 2;
/// 根目录所在簇（也是其 inode 头所在扇区）
pub const ROOT_DIR_CLUSTER: u32 = 1;
/// 根目录 inode 头所在扇区
pub const ROOT_DIR_SECTOR: u32 = ROOT_DIR_CLUSTER;
/// 每个 FAT 扇区容纳的表项数
pub const ENTRIES_PER_SECTOR: usize = SECTOR_SIZE / 4;
/// 目录项中文件名的最大长度
pub const NAME_MAX: usize = 14;
/// 单个目录项在磁盘上占用的字节数
pub const DIR_ENTRY_SIZE: usize = 4 + (NAME_MAX + 1) + 1;

#[inline]
pub(crate) fn get_u32(buf: &[u8], offset: usize) -> u32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&buf[offset..offset + 4]);
    u32::from_le_bytes(raw)
}

#[inline]
pub(crate) fn put_u32(buf: &mut [u8], offset: usize, value: u32) {
    buf[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

/// 引导记录，位于扇区 0
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BootRecord {
    /// 魔数，必须等于 [`FAT_MAGIC`]
    pub magic: u32,
    /// 每簇扇区数
    pub sectors_per_cluster: u32,
    /// 卷的总扇区数
    pub total_sectors: u32,
    /// FAT 表起始扇区
    pub fat_start: u32,
    /// FAT 表占用的扇区数
    pub fat_sectors: u32,
    /// 根目录簇号
    pub root_dir_cluster: u32,
}

impl BootRecord {
    /// 为 `total_sectors` 个扇区的卷生成新的引导记录。
    ///
    /// 每个扇区都有一个表项，FAT 区域必须容纳整张表。
    pub fn new(total_sectors: u32) -> Self {
        let fat_sectors = total_sectors.div_ceil(ENTRIES_PER_SECTOR as u32).max(1);
        Self {
            magic: FAT_MAGIC,
            sectors_per_cluster: SECTORS_PER_CLUSTER,
            total_sectors,
            fat_start: FAT_START,
            fat_sectors,
            root_dir_cluster: ROOT_DIR_CLUSTER,
        }
    }

    /// 魔数与几何参数是否自洽
    pub fn is_valid(&self) -> bool {
        self.magic == FAT_MAGIC
            && self.sectors_per_cluster == SECTORS_PER_CLUSTER
            && self.fat_sectors > 0
            && (self.fat_sectors as u64) * (ENTRIES_PER_SECTOR as u64)
                >= self.total_sectors as u64
            && self
                .fat_start
                .checked_add(self.fat_sectors)
                .is_some_and(|data_start| data_start < self.total_sectors)
    }

    /// 从扇区内容解码
    pub fn decode(buf: &[u8]) -> Self {
        Self {
            magic: get_u32(buf, 0),
            sectors_per_cluster: get_u32(buf, 4),
            total_sectors: get_u32(buf, 8),
            fat_start: get_u32(buf, 12),
            fat_sectors: get_u32(buf, 16),
            root_dir_cluster: get_u32(buf, 20),
        }
    }

    /// 编码为一个完整扇区，剩余部分填零
    pub fn encode(&self) -> [u8; SECTOR_SIZE] {
        let mut buf = [0u8; SECTOR_SIZE];
        put_u32(&mut buf, 0, self.magic);
        put_u32(&mut buf, 4, self.sectors_per_cluster);
        put_u32(&mut buf, 8, self.total_sectors);
        put_u32(&mut buf, 12, self.fat_start);
        put_u32(&mut buf, 16, self.fat_sectors);
        put_u32(&mut buf, 20, self.root_dir_cluster);
        buf
    }
}

/// inode 的类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InodeKind {
    /// 普通文件
    File,
    /// 目录
    Directory,
    /// 符号链接，内容是目标路径
    Symlink,
}

/// 磁盘上的 inode 头，独占一个扇区
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiskInode {
    /// 数据簇链的首簇，0 表示尚未分配
    pub start: u32,
    /// 逻辑长度（字节）
    pub length: u32,
    /// 魔数，必须等于 [`INODE_MAGIC`]
    pub magic: u32,
    /// 是否为目录
    pub is_dir: bool,
    /// 是否为符号链接
    pub is_symlink: bool,
}

impl DiskInode {
    /// 新建一个还没有数据簇的 inode 头
    pub fn new(kind: InodeKind, length: u32) -> Self {
        Self {
            start: 0,
            length,
            magic: INODE_MAGIC,
            is_dir: kind == InodeKind::Directory,
            is_symlink: kind == InodeKind::Symlink,
        }
    }

    /// inode 类型
    pub fn kind(&self) -> InodeKind {
        if self.is_dir {
            InodeKind::Directory
        } else if self.is_symlink {
            InodeKind::Symlink
        } else {
            InodeKind::File
        }
    }

    /// 从扇区内容解码
    pub fn decode(buf: &[u8]) -> Self {
        Self {
            start: get_u32(buf, 0),
            length: get_u32(buf, 4),
            magic: get_u32(buf, 8),
            is_dir: get_u32(buf, 12) != 0,
            is_symlink: get_u32(buf, 16) != 0,
        }
    }

    /// 编码为一个完整扇区
    pub fn encode(&self) -> [u8; SECTOR_SIZE] {
        let mut buf = [0u8; SECTOR_SIZE];
        put_u32(&mut buf, 0, self.start);
        put_u32(&mut buf, 4, self.length);
        put_u32(&mut buf, 8, self.magic);
        put_u32(&mut buf, 12, self.is_dir as u32);
        put_u32(&mut buf, 16, self.is_symlink as u32);
        buf
    }
}

/// 目录项
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirEntry {
    /// 目标 inode 头所在扇区
    pub inode_sector: u32,
    name: [u8; NAME_MAX + 1],
    /// 该槽位是否在用
    pub in_use: bool,
}

impl DirEntry {
    /// 构造一个在用的目录项，调用方负责检查名字长度
    pub(crate) fn new(name: &str, inode_sector: u32) -> Self {
        let mut raw = [0u8; NAME_MAX + 1];
        let len = name.len().min(NAME_MAX);
        raw[..len].copy_from_slice(&name.as_bytes()[..len]);
        Self {
            inode_sector,
            name: raw,
            in_use: true,
        }
    }

    /// 文件名（去掉结尾的 NUL 填充）
    pub fn name(&self) -> &str {
        let len = self.name.iter().position(|&b| b == 0).unwrap_or(NAME_MAX);
        core::str::from_utf8(&self.name[..len]).unwrap_or("")
    }

    /// 文件名的拷贝
    pub fn name_owned(&self) -> String {
        String::from(self.name())
    }

    /// 从 [`DIR_ENTRY_SIZE`] 字节解码
    pub fn decode(buf: &[u8]) -> Self {
        let mut name = [0u8; NAME_MAX + 1];
        name.copy_from_slice(&buf[4..4 + NAME_MAX + 1]);
        Self {
            inode_sector: get_u32(buf, 0),
            name,
            in_use: buf[DIR_ENTRY_SIZE - 1] != 0,
        }
    }

    /// 编码为 [`DIR_ENTRY_SIZE`] 字节
    pub fn encode(&self) -> [u8; DIR_ENTRY_SIZE] {
        let mut buf = [0u8; DIR_ENTRY_SIZE];
        put_u32(&mut buf, 0, self.inode_sector);
        buf[4..4 + NAME_MAX + 1].copy_from_slice(&self.name);
        buf[DIR_ENTRY_SIZE - 1] = self.in_use as u8;
        buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_boot_record_geometry_for_1024_sectors() {
        let boot = BootRecord::new(1024);
        assert_eq!(boot.fat_sectors, 8);
        assert_eq!(boot.fat_start + boot.fat_sectors, 10);
        assert!(boot.is_valid());

        let raw = boot.encode();
        assert_eq!(&raw[0..4], &FAT_MAGIC.to_le_bytes());
        assert_eq!(BootRecord::decode(&raw), boot);
    }

    #[test]
    fn test_fat_region_holds_one_entry_per_sector() {
        for total in [1024, 16_512, 16_513, 20_000, 65_536] {
            let boot = BootRecord::new(total);
            assert!(boot.is_valid());
            assert!(boot.fat_sectors as usize * ENTRIES_PER_SECTOR >= total as usize);
        }
        assert_eq!(BootRecord::new(20_000).fat_sectors, 157);
    }

    #[test]
    fn test_garbage_geometry_is_rejected() {
        let mut boot = BootRecord::new(1024);
        boot.fat_start = u32::MAX;
        assert!(!boot.is_valid());

        let mut short = BootRecord::new(20_000);
        short.fat_sectors -= 1;
        assert!(!short.is_valid());
    }

    #[test]
    fn test_zeroed_sector_is_not_a_boot_record() {
        let boot = BootRecord::decode(&[0u8; SECTOR_SIZE]);
        assert!(!boot.is_valid());
    }

    #[test]
    fn test_disk_inode_flags_layout() {
        let mut inode = DiskInode::new(InodeKind::Symlink, 5);
        inode.start = 42;
        let raw = inode.encode();
        assert_eq!(get_u32(&raw, 0), 42);
        assert_eq!(get_u32(&raw, 8), INODE_MAGIC);
        assert_eq!(get_u32(&raw, 12), 0);
        assert_eq!(get_u32(&raw, 16), 1);
        assert_eq!(DiskInode::decode(&raw).kind(), InodeKind::Symlink);
    }

    #[test]
    fn test_dir_entry_name_padding() {
        assert_eq!(DIR_ENTRY_SIZE, 20);
        let entry = DirEntry::new("hello", 77);
        let raw = entry.encode();
        assert_eq!(raw[4 + 5], 0);
        assert_eq!(raw[DIR_ENTRY_SIZE - 1], 1);
        let back = DirEntry::decode(&raw);
        assert_eq!(back.name(), "hello");
        assert_eq!(back.inode_sector, 77);

        let longest = DirEntry::new("abcdefghijklmn", 3);
        assert_eq!(DirEntry::decode(&longest.encode()).name(), "abcdefghijklmn");
    }
}
