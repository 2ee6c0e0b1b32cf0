//! # mex
//!
//! 纯 Rust 实现的媒体容器解封装门面, 对标 Android `MediaExtractor`.
//!
//! 给定一个已解析好的数据源 (本地文件, 文件区间, 内存, 流式缓冲或自定义实现),
//! 识别容器格式, 给出每条轨道的格式描述, 并按时间交错地顺序读取选中轨道的
//! 编码采样, 附带时间戳, 关键帧标志和加密元数据.
//!
//! # 快速开始
//!
//! ```rust,no_run
//! use mex::{MediaExtractor, SeekMode};
//!
//! let mut extractor = MediaExtractor::new();
//! extractor.set_data_source_path("movie.mp4")?;
//! for i in 0..extractor.track_count()? {
//!     println!("轨道 #{i}: {:?}", extractor.track_format(i)?.mime());
//! }
//! extractor.select_track(0)?;
//! extractor.seek_to(0, SeekMode::PreviousSync)?;
//! let mut buf = vec![0u8; 1 << 20];
//! while let Some(size) = extractor.read_sample_data(&mut buf, 0)? {
//!     println!("{:?}us: {size} 字节", extractor.sample_time()?);
//!     if !extractor.advance()? {
//!         break;
//!     }
//! }
//! # Ok::<(), mex::MexError>(())
//! ```
//!
//! # Crate 结构
//!
//! | Crate | 功能 |
//! |-------|------|
//! | `mex-core` | 错误类型, 格式描述, 采样标志与加密信息, PSSH 解析 |
//! | `mex-format` | 数据源, 格式探测, 适配器注册表, MP4/WAV 适配器 |

pub mod extractor;
pub mod logging;
pub mod options;

use std::sync::OnceLock;

/// 核心类型
pub use mex_core as core;

/// 数据源与容器适配器
pub use mex_format as format;

pub use extractor::{ExtractorState, MediaExtractor};
pub use mex_core::{
    CryptoInfo, CryptoMode, CryptoPattern, FormatBag, FormatValue, MediaType, MexError,
    MexResult, PsshInfo, SampleFlags, SeekMode, Subsample, format::keys, parse_pssh,
};
pub use mex_format::{
    CacheStatus, DataSource, FileSource, FormatId, MemorySource, ReadSeekSource, StreamWriter,
    StreamingSource,
};
pub use options::ExtractorOptions;

static REGISTRY: OnceLock<mex_format::FormatRegistry> = OnceLock::new();

/// 进程级初始化
///
/// 构建默认适配器注册表, 只执行一次. [`MediaExtractor::new`] 会隐式调用.
pub fn init() -> &'static mex_format::FormatRegistry {
    REGISTRY.get_or_init(|| {
        let registry = default_format_registry();
        log::debug!("适配器注册表初始化完成: {:?}", registry.list_demuxers());
        registry
    })
}

/// 获取 mex 版本号
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

/// 创建已注册所有内置容器格式的注册表
pub fn default_format_registry() -> mex_format::FormatRegistry {
    let mut registry = mex_format::FormatRegistry::new();
    mex_format::register_all(&mut registry);
    registry
}
