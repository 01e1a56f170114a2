//! 测试支持 crate
//!
//! 提供各子系统单元测试共用的 Mock 实现与测试数据生成工具

#![no_std]

pub mod mock;

/// 生成长度为 `len` 的确定性测试数据
///
/// 不同的 `seed` 产生不同的字节序列，方便发现写错位置的数据。
pub fn pattern(len: usize, seed: u8) -> impl Iterator<Item = u8> {
    (0..len).map(move |i| (i as u8).wrapping_mul(31).wrapping_add(seed) ^ ((i >> 8) as u8))
}
