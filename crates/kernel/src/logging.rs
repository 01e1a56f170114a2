//! 内核日志后端
//!
//! 各子系统通过 `log` 门面记录日志，这里提供 `log::Log` 的实现：
//! 每条记录格式化为一行 `[LEVEL target] message`，写到注册的 [`LogOutput`]。
//! 没有注册输出时日志被丢弃。
//!
//! 日志级别在编译期由环境变量 `LOG` 决定（`error`/`warn`/`info`/`debug`/`trace`），
//! 未设置时关闭日志。

use core::fmt::{self, Write};
use core::sync::atomic::{AtomicPtr, Ordering};
use log::{LevelFilter, Log, Metadata, Record};

/// 单条日志的最大字节数，超出部分被截断
pub const MAX_LOG_MESSAGE_LENGTH: usize = 256;

/// 日志输出
///
/// 使用方需要在启动时通过 [`register_log_output`] 注册实现。
pub trait LogOutput: Send + Sync {
    /// 输出一行日志
    fn write_str(&self, s: &str);
}

/// 存储 LogOutput trait object 的胖指针
struct LogOutputPtr {
    data: AtomicPtr<()>,
    vtable: AtomicPtr<()>,
}

static LOG_OUTPUT: LogOutputPtr = LogOutputPtr {
    data: AtomicPtr::new(core::ptr::null_mut()),
    vtable: AtomicPtr::new(core::ptr::null_mut()),
};

/// 注册日志输出
///
/// # Safety
///
/// - output 必须具有 'static 生命周期
/// - 不能与正在进行的日志调用并发注册
pub unsafe fn register_log_output(output: &'static dyn LogOutput) {
    let ptr: *const dyn LogOutput = output;
    let (data, vtable) = unsafe { core::mem::transmute::<_, (*mut (), *mut ())>(ptr) };
    LOG_OUTPUT.vtable.store(vtable, Ordering::Release);
    LOG_OUTPUT.data.store(data, Ordering::Release);
}

fn log_output() -> Option<&'static dyn LogOutput> {
    let data = LOG_OUTPUT.data.load(Ordering::Acquire);
    let vtable = LOG_OUTPUT.vtable.load(Ordering::Acquire);
    if data.is_null() || vtable.is_null() {
        return None;
    }
    // Safety: 指针由 register_log_output 设置，保证有效
    Some(unsafe { core::mem::transmute::<(*mut (), *mut ()), &'static dyn LogOutput>((data, vtable)) })
}

/// 定长的行缓冲区，写满后静默截断
pub struct LineBuffer {
    buf: [u8; MAX_LOG_MESSAGE_LENGTH],
    len: usize,
}

impl LineBuffer {
    /// 空缓冲区
    pub const fn new() -> Self {
        Self {
            buf: [0; MAX_LOG_MESSAGE_LENGTH],
            len: 0,
        }
    }

    /// 已写入的内容
    pub fn as_str(&self) -> &str {
        // 只在字符边界处截断，内容总是合法的 UTF-8
        core::str::from_utf8(&self.buf[..self.len]).unwrap_or("")
    }
}

impl Default for LineBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl Write for LineBuffer {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        let room = MAX_LOG_MESSAGE_LENGTH - self.len;
        let mut take = s.len().min(room);
        while !s.is_char_boundary(take) {
            take -= 1;
        }
        self.buf[self.len..self.len + take].copy_from_slice(&s.as_bytes()[..take]);
        self.len += take;
        Ok(())
    }
}

/// 把一条记录格式化为一行
pub fn format_record(record: &Record<'_>) -> LineBuffer {
    let mut line = LineBuffer::new();
    let _ = write!(
        line,
        "[{:<5} {}] {}",
        record.level(),
        record.target(),
        record.args()
    );
    line
}

/// 解析 `LOG` 环境变量的取值
pub fn level_from_str(level: Option<&str>) -> LevelFilter {
    match level {
        Some(s) if s.eq_ignore_ascii_case("error") => LevelFilter::Error,
        Some(s) if s.eq_ignore_ascii_case("warn") => LevelFilter::Warn,
        Some(s) if s.eq_ignore_ascii_case("info") => LevelFilter::Info,
        Some(s) if s.eq_ignore_ascii_case("debug") => LevelFilter::Debug,
        Some(s) if s.eq_ignore_ascii_case("trace") => LevelFilter::Trace,
        _ => LevelFilter::Off,
    }
}

struct KernelLogger;

impl Log for KernelLogger {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record<'_>) {
        if !self.enabled(record.metadata()) {
            return;
        }
        if let Some(output) = log_output() {
            output.write_str(format_record(record).as_str());
        }
    }

    fn flush(&self) {}
}

static LOGGER: KernelLogger = KernelLogger;

/// 安装日志后端，级别取自编译期的 `LOG`。重复调用只会重设级别。
pub fn init() {
    // 已经安装过时 set_logger 返回错误，沿用已有的后端即可
    let _ = log::set_logger(&LOGGER);
    log::set_max_level(level_from_str(option_env!("LOG")));
}

/// 运行时调整日志级别
pub fn set_level(level: LevelFilter) {
    log::set_max_level(level);
}
