//! 采样级元数据: 标志位, 定位模式, 加密信息.

use bitflags::bitflags;
use std::fmt;

bitflags! {
    /// 采样标志位
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct SampleFlags: u32 {
        /// 同步采样 (关键帧), 可作为定位目标
        const SYNC      = 1;
        /// 采样已加密, 携带加密信息
        const ENCRYPTED = 2;
    }
}

/// 定位模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SeekMode {
    /// 时间不晚于目标的最近同步采样
    PreviousSync = 0,
    /// 时间不早于目标的最近同步采样
    NextSync = 1,
    /// 与目标时间距离最近的同步采样 (距离相等取较早者)
    ClosestSync = 2,
}

impl SeekMode {
    /// 从原始整数值转换
    pub fn from_raw(value: i32) -> Option<Self> {
        match value {
            0 => Some(Self::PreviousSync),
            1 => Some(Self::NextSync),
            2 => Some(Self::ClosestSync),
            _ => None,
        }
    }
}

impl fmt::Display for SeekMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::PreviousSync => "previous-sync",
            Self::NextSync => "next-sync",
            Self::ClosestSync => "closest-sync",
        };
        write!(f, "{name}")
    }
}

/// 加密模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CryptoMode {
    /// 未加密
    #[default]
    Unencrypted = 0,
    /// AES-CTR (`cenc`, `cens`)
    AesCtr = 1,
    /// AES-CBC (`cbc1`, `cbcs`)
    AesCbc = 2,
}

impl CryptoMode {
    /// 根据 `schm` 方案类型推导加密模式
    pub fn from_scheme(scheme: &[u8; 4]) -> Self {
        match scheme {
            b"cenc" | b"cens" => Self::AesCtr,
            b"cbc1" | b"cbcs" => Self::AesCbc,
            _ => Self::Unencrypted,
        }
    }
}

/// 模式加密参数 (`cens`/`cbcs`): 每加密 `crypt_blocks` 个块后跳过 `skip_blocks` 个块
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct CryptoPattern {
    /// 加密块数
    pub crypt_blocks: u8,
    /// 跳过块数
    pub skip_blocks: u8,
}

/// 子采样布局条目
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Subsample {
    /// 明文字节数
    pub clear_bytes: u32,
    /// 密文字节数
    pub encrypted_bytes: u32,
}

/// 采样加密信息
///
/// 仅供外部解密器使用, 核心不执行任何解密.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CryptoInfo {
    /// 加密模式
    pub mode: CryptoMode,
    /// 密钥 ID
    pub key_id: [u8; 16],
    /// 初始化向量 (8 或 16 字节, 常量 IV 时为常量值)
    pub iv: Vec<u8>,
    /// 子采样布局, 有序; 为空表示整个采样加密
    pub subsamples: Vec<Subsample>,
    /// 模式加密参数
    pub pattern: CryptoPattern,
}

impl CryptoInfo {
    /// 子采样覆盖的总字节数
    pub fn covered_bytes(&self) -> u64 {
        self.subsamples
            .iter()
            .map(|s| u64::from(s.clear_bytes) + u64::from(s.encrypted_bytes))
            .sum()
    }

    /// 明文字节数序列 (与 Android `CryptoInfo.numBytesOfClearData` 对应)
    pub fn clear_bytes(&self) -> Vec<u32> {
        self.subsamples.iter().map(|s| s.clear_bytes).collect()
    }

    /// 密文字节数序列
    pub fn encrypted_bytes(&self) -> Vec<u32> {
        self.subsamples.iter().map(|s| s.encrypted_bytes).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_标志位数值() {
        assert_eq!(SampleFlags::SYNC.bits(), 1);
        assert_eq!(SampleFlags::ENCRYPTED.bits(), 2);
        let both = SampleFlags::SYNC | SampleFlags::ENCRYPTED;
        assert_eq!(both.bits(), 3);
        assert!(SampleFlags::default().is_empty());
    }

    #[test]
    fn test_定位模式原始值() {
        assert_eq!(SeekMode::from_raw(0), Some(SeekMode::PreviousSync));
        assert_eq!(SeekMode::from_raw(2), Some(SeekMode::ClosestSync));
        assert_eq!(SeekMode::from_raw(3), None);
    }

    #[test]
    fn test_方案类型映射() {
        assert_eq!(CryptoMode::from_scheme(b"cenc"), CryptoMode::AesCtr);
        assert_eq!(CryptoMode::from_scheme(b"cbcs"), CryptoMode::AesCbc);
        assert_eq!(CryptoMode::from_scheme(b"xxxx"), CryptoMode::Unencrypted);
    }

    #[test]
    fn test_子采样统计() {
        let info = CryptoInfo {
            subsamples: vec![
                Subsample {
                    clear_bytes: 5,
                    encrypted_bytes: 16,
                },
                Subsample {
                    clear_bytes: 3,
                    encrypted_bytes: 32,
                },
            ],
            ..CryptoInfo::default()
        };
        assert_eq!(info.covered_bytes(), 56);
        assert_eq!(info.clear_bytes(), vec![5, 3]);
        assert_eq!(info.encrypted_bytes(), vec![16, 32]);
    }
}
