//! 轨道/容器格式描述.
//!
//! 格式描述是一个开放的键值表, 与 Android `MediaFormat` 的键名保持一致.
//! 必需键只有 [`keys::MIME`], 其余为编解码器相关的可选参数.

use std::collections::BTreeMap;
use std::fmt;

use bytes::Bytes;

/// 常用键名
pub mod keys {
    /// MIME 类型 (必需), 如 `video/avc`, `audio/mp4a-latm`
    pub const MIME: &str = "mime";
    /// 时长 (微秒)
    pub const DURATION_US: &str = "durationUs";
    /// 视频宽度 (像素)
    pub const WIDTH: &str = "width";
    /// 视频高度 (像素)
    pub const HEIGHT: &str = "height";
    /// 音频采样率 (Hz)
    pub const SAMPLE_RATE: &str = "sample-rate";
    /// 音频声道数
    pub const CHANNEL_COUNT: &str = "channel-count";
    /// 编解码器私有数据 (如 avcC, AudioSpecificConfig)
    pub const CSD_0: &str = "csd-0";
    /// 最大采样字节数
    pub const MAX_INPUT_SIZE: &str = "max-input-size";
    /// 语言代码 (ISO 639-2)
    pub const LANGUAGE: &str = "language";
    /// 容器内的原始轨道 ID
    pub const TRACK_ID: &str = "track-id";
    /// 位深 (PCM)
    pub const BITS_PER_SAMPLE: &str = "bits-per-sample";
    /// PCM 编码 (取值同 Android `AudioFormat.ENCODING_*`)
    pub const PCM_ENCODING: &str = "pcm-encoding";
    /// 平均码率 (bit/s)
    pub const BIT_RATE: &str = "bitrate";
    /// 加密模式 (见 `CryptoMode` 的数值)
    pub const CRYPTO_MODE: &str = "crypto-mode";
    /// 默认密钥 ID (16 字节)
    pub const CRYPTO_KEY: &str = "crypto-key";
    /// 默认 IV 长度
    pub const CRYPTO_DEFAULT_IV_SIZE: &str = "crypto-default-iv-size";
    /// 模式加密: 加密块数
    pub const CRYPTO_ENCRYPTED_BYTE_BLOCK: &str = "crypto-encrypted-byte-block";
    /// 模式加密: 跳过块数
    pub const CRYPTO_SKIP_BYTE_BLOCK: &str = "crypto-skip-byte-block";
    /// 扁平保护系统头数据块 (仅容器级)
    pub const PSSH: &str = "pssh";
}

/// 格式值
#[derive(Debug, Clone, PartialEq)]
pub enum FormatValue {
    /// 整数
    Int(i64),
    /// 浮点数
    Float(f64),
    /// 字符串
    Str(String),
    /// 二进制数据
    Bytes(Bytes),
}

impl FormatValue {
    /// 类型名称
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Str(_) => "string",
            Self::Bytes(_) => "bytes",
        }
    }
}

impl fmt::Display for FormatValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Str(s) => write!(f, "{s}"),
            Self::Bytes(b) => write!(f, "<{} 字节>", b.len()),
        }
    }
}

/// 格式描述键值表
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FormatBag {
    entries: BTreeMap<String, FormatValue>,
}

impl FormatBag {
    /// 创建空表
    pub fn new() -> Self {
        Self::default()
    }

    /// 以 MIME 类型创建
    pub fn with_mime(mime: impl Into<String>) -> Self {
        let mut bag = Self::new();
        bag.set_str(keys::MIME, mime);
        bag
    }

    /// 写入任意值
    pub fn set(&mut self, key: impl Into<String>, value: FormatValue) {
        self.entries.insert(key.into(), value);
    }

    /// 写入整数
    pub fn set_int(&mut self, key: impl Into<String>, value: i64) {
        self.set(key, FormatValue::Int(value));
    }

    /// 写入浮点数
    pub fn set_float(&mut self, key: impl Into<String>, value: f64) {
        self.set(key, FormatValue::Float(value));
    }

    /// 写入字符串
    pub fn set_str(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.set(key, FormatValue::Str(value.into()));
    }

    /// 写入二进制数据
    pub fn set_bytes(&mut self, key: impl Into<String>, value: impl Into<Bytes>) {
        self.set(key, FormatValue::Bytes(value.into()));
    }

    /// 读取任意值
    pub fn get(&self, key: &str) -> Option<&FormatValue> {
        self.entries.get(key)
    }

    /// 读取整数 (类型不符返回 None)
    pub fn get_int(&self, key: &str) -> Option<i64> {
        match self.entries.get(key) {
            Some(FormatValue::Int(v)) => Some(*v),
            _ => None,
        }
    }

    /// 读取浮点数
    pub fn get_float(&self, key: &str) -> Option<f64> {
        match self.entries.get(key) {
            Some(FormatValue::Float(v)) => Some(*v),
            _ => None,
        }
    }

    /// 读取字符串
    pub fn get_str(&self, key: &str) -> Option<&str> {
        match self.entries.get(key) {
            Some(FormatValue::Str(s)) => Some(s.as_str()),
            _ => None,
        }
    }

    /// 读取二进制数据
    pub fn get_bytes(&self, key: &str) -> Option<&Bytes> {
        match self.entries.get(key) {
            Some(FormatValue::Bytes(b)) => Some(b),
            _ => None,
        }
    }

    /// MIME 类型
    pub fn mime(&self) -> Option<&str> {
        self.get_str(keys::MIME)
    }

    /// 是否包含指定键
    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// 移除指定键
    pub fn remove(&mut self, key: &str) -> Option<FormatValue> {
        self.entries.remove(key)
    }

    /// 按键名顺序遍历
    pub fn iter(&self) -> impl Iterator<Item = (&str, &FormatValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// 条目数量
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// 是否为空
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_读写各类型() {
        let mut bag = FormatBag::with_mime("audio/mp4a-latm");
        bag.set_int(keys::SAMPLE_RATE, 44100);
        bag.set_bytes(keys::CSD_0, vec![0x12, 0x10]);
        bag.set_float("frame-rate", 29.97);

        assert_eq!(bag.mime(), Some("audio/mp4a-latm"));
        assert_eq!(bag.get_int(keys::SAMPLE_RATE), Some(44100));
        assert_eq!(bag.get_bytes(keys::CSD_0).map(|b| b.len()), Some(2));
        assert_eq!(bag.get_float("frame-rate"), Some(29.97));
        assert_eq!(bag.len(), 4);
    }

    #[test]
    fn test_类型不符返回_none() {
        let mut bag = FormatBag::new();
        bag.set_str(keys::WIDTH, "1920");
        assert_eq!(bag.get_int(keys::WIDTH), None);
        assert_eq!(bag.get_str(keys::WIDTH), Some("1920"));
        assert!(bag.mime().is_none());
    }

    #[test]
    fn test_遍历按键名排序() {
        let mut bag = FormatBag::new();
        bag.set_int("b", 2);
        bag.set_int("a", 1);
        let names: Vec<&str> = bag.iter().map(|(k, _)| k).collect();
        assert_eq!(names, vec!["a", "b"]);
    }
}
