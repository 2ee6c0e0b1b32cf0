//! 容器格式标识符.

use std::fmt;

/// 容器格式标识符
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum FormatId {
    /// ISO BMFF (MP4 / MOV / 3GP, 含分片 MP4)
    Mp4,
    /// WAV (RIFF WAVE)
    Wav,
}

impl FormatId {
    /// 所有已知格式标识的列表
    pub const ALL: &[FormatId] = &[Self::Mp4, Self::Wav];

    /// 获取格式的人类可读名称
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Mp4 => "mp4",
            Self::Wav => "wav",
        }
    }

    /// 容器级 MIME 类型 (写入容器格式描述)
    pub const fn mime(&self) -> &'static str {
        match self {
            Self::Mp4 => "video/mp4",
            Self::Wav => "audio/x-wav",
        }
    }

    /// 获取格式常用的文件扩展名
    pub const fn extensions(&self) -> &'static [&'static str] {
        match self {
            Self::Mp4 => &["mp4", "m4a", "m4v", "mov", "3gp", "3g2", "m4s", "cmfv", "cmfa"],
            Self::Wav => &["wav"],
        }
    }

    /// 根据文件扩展名猜测格式
    ///
    /// # 参数
    /// - `ext`: 文件扩展名 (不含 `.`, 如 "mp4", "wav")
    pub fn from_extension(ext: &str) -> Option<FormatId> {
        let ext_lower = ext.to_lowercase();
        Self::ALL
            .iter()
            .find(|id| id.extensions().contains(&ext_lower.as_str()))
            .copied()
    }

    /// 从文件路径猜测格式
    pub fn from_filename(filename: &str) -> Option<FormatId> {
        let (_, ext) = filename.rsplit_once('.')?;
        Self::from_extension(ext)
    }

    /// 文件名扩展名是否属于此格式
    pub fn matches_filename(&self, filename: Option<&str>) -> bool {
        filename
            .and_then(|f| f.rsplit_once('.'))
            .is_some_and(|(_, ext)| self.extensions().contains(&ext.to_lowercase().as_str()))
    }
}

impl fmt::Display for FormatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}
