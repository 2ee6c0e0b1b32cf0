//! # mex-core
//!
//! mex 媒体解封装门面的核心类型库.
//!
//! 提供各 crate 共用的错误类型、轨道格式描述、采样标志与加密信息,
//! 以及保护系统头 (PSSH) 数据块的解析.

pub mod error;
pub mod format;
pub mod media_type;
pub mod pssh;
pub mod sample;
pub mod timestamp;

// 重导出常用类型
pub use error::{MexError, MexResult};
pub use format::{FormatBag, FormatValue};
pub use media_type::MediaType;
pub use pssh::{
    CLEARKEY_SYSTEM_ID, FAIRPLAY_SYSTEM_ID, PLAYREADY_SYSTEM_ID, PsshEntry, PsshInfo,
    WIDEVINE_SYSTEM_ID, parse_pssh,
};
pub use sample::{CryptoInfo, CryptoMode, CryptoPattern, SampleFlags, SeekMode, Subsample};
