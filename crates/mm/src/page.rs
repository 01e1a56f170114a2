//! 页面抽象
//!
//! 每个虚拟页有三种状态：
//!
//! - `Uninit`: 尚未有物理内容，首次缺页时运行加载器，之后转为目标类型
//! - `Anon`: 匿名页，换出时写入交换区
//! - `File`: 文件页，换出时若为脏页则写回文件，缺页时从文件重新读入
//!
//! 状态转换由 [`Vm`](crate::Vm) 在持有全局锁时完成，这里只描述数据
//! 和各状态自身的读入/写回逻辑。

use alloc::sync::Arc;

use crate::address::{PAGE_SIZE, Vpn};
use crate::error::{VmError, VmResult};
use crate::file::MmFile;
use crate::frame::FrameId;
use crate::swap::SwapSlot;

/// 页面首次加载后变成的类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageType {
    /// 匿名页
    Anon,
    /// 文件页
    File,
}

/// 自定义加载器：在首次缺页时填充帧内容
///
/// 帧在调用前已清零；`aux` 是分配时给出的文件片段（如果有）。
pub type PageInit = fn(frame: &mut [u8], aux: Option<&FileSlice>) -> VmResult<()>;

/// 文件中属于某一页的片段
pub struct FileSlice {
    /// 文件
    pub file: Arc<dyn MmFile>,
    /// 片段在文件中的起始偏移
    pub offset: usize,
    /// 从文件读取的字节数
    pub read_bytes: usize,
    /// 读取之后补零的字节数
    pub zero_bytes: usize,
}

impl FileSlice {
    /// 把片段读入一页内存，其余部分补零
    pub fn load(&self, frame: &mut [u8]) -> VmResult<()> {
        let read_bytes = self.read_bytes.min(frame.len());
        let n = self
            .file
            .read_at(self.offset, &mut frame[..read_bytes])
            .map_err(VmError::Io)?;
        if n < read_bytes {
            log::warn!(
                "page: partial read at offset {}: expected {}, got {}",
                self.offset,
                read_bytes,
                n
            );
        }
        frame[n..].fill(0);
        Ok(())
    }

    /// 把一页内存中属于文件的部分写回
    pub fn write_back(&self, frame: &[u8]) -> VmResult<()> {
        let len = self.read_bytes.min(frame.len());
        let n = self
            .file
            .write_at(self.offset, &frame[..len])
            .map_err(VmError::Io)?;
        if n != len {
            log::error!(
                "page: partial write at offset {}: expected {}, got {}",
                self.offset,
                len,
                n
            );
            return Err(VmError::Io(-5));
        }
        Ok(())
    }

    /// 复制片段描述，文件重新打开一次
    pub fn duplicate(&self) -> VmResult<Self> {
        Ok(Self {
            file: self.file.reopen().map_err(VmError::Io)?,
            offset: self.offset,
            read_bytes: self.read_bytes,
            zero_bytes: self.zero_bytes,
        })
    }
}

impl core::fmt::Debug for FileSlice {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("FileSlice")
            .field("file", &"<dyn MmFile>")
            .field("offset", &self.offset)
            .field("read_bytes", &self.read_bytes)
            .field("zero_bytes", &self.zero_bytes)
            .finish()
    }
}

/// 页面状态
#[derive(Debug)]
pub enum PageState {
    /// 尚未加载
    Uninit {
        /// 加载后的类型
        target: PageType,
        /// 自定义加载器，为空时按 `aux` 读文件或保持全零
        init: Option<PageInit>,
        /// 加载参数
        aux: Option<FileSlice>,
    },
    /// 匿名页；`slot` 非空表示内容在交换区
    Anon {
        /// 交换槽位
        slot: Option<SwapSlot>,
    },
    /// 文件页
    File {
        /// 对应的文件片段
        slice: FileSlice,
    },
}

/// 补充页表中的一页
#[derive(Debug)]
pub struct Page {
    /// 页号
    pub vpn: Vpn,
    /// 当前是否可写（写时复制共享期间被收回）
    pub writable: bool,
    /// 映射时请求的写权限
    pub true_writable: bool,
    /// 驻留时所在的帧
    pub frame: Option<FrameId>,
    /// 来自 mmap，销毁时需要写回
    pub mmap: bool,
    /// 状态
    pub state: PageState,
}

impl Page {
    /// 创建一个尚未加载的页
    pub fn new_uninit(
        vpn: Vpn,
        writable: bool,
        target: PageType,
        init: Option<PageInit>,
        aux: Option<FileSlice>,
    ) -> Self {
        Self {
            vpn,
            writable,
            true_writable: writable,
            frame: None,
            mmap: false,
            state: PageState::Uninit { target, init, aux },
        }
    }

    /// 页面当前（或加载后）的类型
    pub fn page_type(&self) -> PageType {
        match &self.state {
            PageState::Uninit { target, .. } => *target,
            PageState::Anon { .. } => PageType::Anon,
            PageState::File { .. } => PageType::File,
        }
    }

    /// 是否尚未加载
    pub fn is_uninit(&self) -> bool {
        matches!(self.state, PageState::Uninit { .. })
    }

    /// 内容所在的交换槽位
    pub fn swap_slot(&self) -> Option<SwapSlot> {
        match self.state {
            PageState::Anon { slot } => slot,
            _ => None,
        }
    }

    /// 首次加载：填充帧内容并转换为目标类型
    pub(crate) fn initialize(&mut self, frame: &mut [u8]) -> VmResult<()> {
        let (target, init, aux) =
            match core::mem::replace(&mut self.state, PageState::Anon { slot: None }) {
                PageState::Uninit { target, init, aux } => (target, init, aux),
                other => {
                    self.state = other;
                    return Ok(());
                }
            };

        let loaded = match init {
            Some(init) => init(frame, aux.as_ref()),
            None => aux.as_ref().map_or(Ok(()), |slice| slice.load(frame)),
        };
        if let Err(e) = loaded {
            self.state = PageState::Uninit { target, init, aux };
            return Err(e);
        }
        match (target, aux) {
            (PageType::Anon, _) => self.state = PageState::Anon { slot: None },
            (PageType::File, Some(slice)) => self.state = PageState::File { slice },
            (PageType::File, None) => {
                self.state = PageState::Uninit {
                    target,
                    init,
                    aux: None,
                };
                return Err(VmError::InvalidArgument);
            }
        }
        Ok(())
    }

    /// 为 fork 复制一个尚未加载的页（文件重新打开）
    pub(crate) fn duplicate_uninit(&self) -> VmResult<Self> {
        let PageState::Uninit { target, init, aux } = &self.state else {
            return Err(VmError::InvalidArgument);
        };
        let aux = aux.as_ref().map(FileSlice::duplicate).transpose()?;
        Ok(Self {
            vpn: self.vpn,
            writable: self.true_writable,
            true_writable: self.true_writable,
            frame: None,
            mmap: self.mmap,
            state: PageState::Uninit {
                target: *target,
                init: *init,
                aux,
            },
        })
    }
}

/// 按页切分一段文件映射：`read_bytes` 字节来自文件，其余补零。
///
/// 返回每页的 (读取字节数, 补零字节数)。
pub fn split_file_span(read_bytes: usize, span: usize) -> impl Iterator<Item = (usize, usize)> {
    let pages = span.div_ceil(PAGE_SIZE);
    (0..pages).map(move |i| {
        let read = read_bytes.saturating_sub(i * PAGE_SIZE).min(PAGE_SIZE);
        (read, PAGE_SIZE - read)
    })
}
