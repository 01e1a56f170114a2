//! 块设备接口
//!
//! 文件系统卷与交换区都建立在 [`BlockDriver`] 之上：
//!
//! - [`BlockDriver`] trait - 以固定大小的块为单位的同步读写
//! - [`RamDisk`] - 内存模拟的块设备，用于宿主机运行与测试
//!
//! 所有读写都是显式的阻塞调用，调用返回时 I/O 已经完成。

#![no_std]

extern crate alloc;

pub mod block;

pub use block::{BlockDriver, RamDisk, SECTOR_SIZE};
