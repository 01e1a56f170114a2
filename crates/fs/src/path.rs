//! 路径解析工具
//!
//! - 绝对路径以 `/` 开头，从根目录开始解析；相对路径从调用者的当前目录开始
//! - `.` 原地不动，`..` 通过目录里真实存在的 `..` 项回到父目录
//! - 连续的 `/` 视为一个

use alloc::string::String;
use alloc::vec::Vec;

use crate::error::{FsError, FsResult};

/// 路径组件
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathComponent {
    /// 根目录 "/"
    Root,
    /// 当前目录 "."
    Current,
    /// 父目录 ".."
    Parent,
    /// 正常的文件名
    Normal(String),
}

/// 将路径字符串解析为组件列表
pub fn parse_path(path: &str) -> Vec<PathComponent> {
    let mut components = Vec::new();

    if path.starts_with('/') {
        components.push(PathComponent::Root);
    }

    for part in path.split('/').filter(|s| !s.is_empty()) {
        let component = match part {
            "." => PathComponent::Current,
            ".." => PathComponent::Parent,
            name => PathComponent::Normal(String::from(name)),
        };
        components.push(component);
    }

    components
}

/// 将路径分割为目录部分和最后一个名字
///
/// 最后一个名字不能为空，也不能是 `.` 或 `..`。
pub fn split_path(path: &str) -> FsResult<(&str, &str)> {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        return Err(FsError::InvalidArgument);
    }
    let (dir, name) = match trimmed.rfind('/') {
        Some(pos) => {
            let dir = trimmed[..pos].trim_end_matches('/');
            (if dir.is_empty() { "/" } else { dir }, &trimmed[pos + 1..])
        }
        None => (".", trimmed),
    };
    if name == "." || name == ".." {
        return Err(FsError::InvalidArgument);
    }
    Ok((dir, name))
}
