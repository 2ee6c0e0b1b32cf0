//! # mex-format
//!
//! mex 容器适配器库.
//!
//! 负责数据源抽象、格式探测与适配器注册, 以及各容器格式的采样索引构建.
//! 适配器只负责把容器解析成轨道格式描述和按解码顺序排列的采样表,
//! 游标与选轨逻辑由上层门面实现.

pub mod demuxer;
pub mod demuxers;
pub mod format_id;
pub mod index;
pub mod io;
pub mod probe;
pub mod registry;
pub mod streaming;

// 重导出常用类型
pub use demuxer::Demuxer;
pub use format_id::FormatId;
pub use index::{ContainerIndex, SampleEntry, Track};
pub use io::{CacheStatus, DataSource, FileSource, IoContext, MemorySource, ReadSeekSource};
pub use probe::{FormatProbe, ProbeResult, ProbeScore};
pub use registry::{FormatRegistry, OpenedInput};
pub use streaming::{StreamWriter, StreamingSource};

/// 注册所有内置容器格式
pub fn register_all(registry: &mut FormatRegistry) {
    demuxers::register_all_demuxers(registry);
}
