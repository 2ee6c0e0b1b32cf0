//! 媒体类型定义.

use std::fmt;

/// 轨道媒体类型
///
/// 由容器的处理器类型 (如 MP4 `hdlr` 的 `vide`/`soun`) 推导.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaType {
    /// 视频轨道
    Video,
    /// 音频轨道
    Audio,
    /// 字幕轨道
    Subtitle,
    /// 数据轨道 (如时间码, 元数据)
    Data,
}

impl MediaType {
    /// 从 MIME 前缀推导媒体类型
    pub fn from_mime(mime: &str) -> Self {
        match mime.split('/').next() {
            Some("video") => Self::Video,
            Some("audio") => Self::Audio,
            Some("text") => Self::Subtitle,
            _ => Self::Data,
        }
    }

    /// 英文短名称 (用于日志与 JSON 输出)
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Video => "video",
            Self::Audio => "audio",
            Self::Subtitle => "subtitle",
            Self::Data => "data",
        }
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Video => "视频",
            Self::Audio => "音频",
            Self::Subtitle => "字幕",
            Self::Data => "数据",
        };
        write!(f, "{name}")
    }
}
