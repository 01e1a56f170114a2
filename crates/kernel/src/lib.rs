//! 内核胶水层
//!
//! 把 `fs` 与 `mm` 两个子系统组装成一个可运行的内核实例：
//!
//! - [`arch`]: 单处理器的 `sync::ArchOps` 实现
//! - [`logging`]: `log` 门面的后端
//! - [`mm_bridge`]: 让文件系统的文件可以被内存映射
//! - [`Kernel`] / [`Process`]: 启动、进程的文件与内存操作
//!
//! # 锁顺序
//!
//! 虚拟内存锁 → 文件系统锁。进程的文件操作不持有虚拟内存锁。

#![no_std]

extern crate alloc;

pub mod arch;
mod boot;
mod config;
mod error;
pub mod logging;
pub mod mm_bridge;
mod process;

pub use boot::Kernel;
pub use config::{FIRST_FD, KernelConfig, MAX_OPEN_FILES};
pub use error::{KernelError, KernelResult};
pub use logging::LogOutput;
pub use process::Process;
