//! 通用加密 (CENC, ISO 23001-7) 相关 box 解析.
//!
//! ```text
//! encv/enca               加密采样条目
//! └── sinf                保护方案信息
//!     ├── frma            原始格式 (如 avc1)
//!     ├── schm            方案类型 (cenc/cbc1/cens/cbcs)
//!     └── schi
//!         └── tenc        默认 KID, IV 长度, 模式加密参数
//! pssh                    保护系统头 (moov 或 moof 中)
//! senc                    逐采样 IV 与子采样布局 (traf 中)
//! saiz + saio             同样的逐采样信息, 以大小表和偏移表间接给出 (stbl 或 traf 中)
//! ```

use log::{debug, warn};
use mex_core::format::keys;
use mex_core::{CryptoInfo, CryptoMode, CryptoPattern, FormatBag, MexError, MexResult, Subsample};
use uuid::Uuid;

use super::boxes::{BoxType, read_box_header, read_full_box_header};
use crate::io::IoContext;

/// senc 标志: 含子采样布局
const SENC_USE_SUBSAMPLES: u32 = 0x2;

/// saiz/saio 标志: 含 aux_info_type
const AUX_INFO_TYPE_PRESENT: u32 = 0x1;

/// 轨道加密默认参数 (来自 schm + tenc)
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct TrackEncryption {
    /// 方案类型 FourCC
    pub scheme: [u8; 4],
    /// 加密模式
    pub mode: CryptoMode,
    /// 采样默认是否加密
    pub default_is_protected: bool,
    /// 逐采样 IV 长度 (0 表示使用常量 IV)
    pub default_iv_size: u8,
    /// 默认密钥 ID
    pub default_kid: [u8; 16],
    /// 常量 IV (仅 default_iv_size 为 0 时)
    pub constant_iv: Vec<u8>,
    /// 模式加密参数
    pub pattern: CryptoPattern,
}

impl TrackEncryption {
    /// 构造采样加密信息
    ///
    /// 未提供逐采样 IV 时使用常量 IV.
    pub fn crypto_info(&self, iv: Option<&[u8]>, subsamples: Vec<Subsample>) -> CryptoInfo {
        let iv = match iv {
            Some(iv) if !iv.is_empty() => iv.to_vec(),
            _ => self.constant_iv.clone(),
        };
        CryptoInfo {
            mode: self.mode,
            key_id: self.default_kid,
            iv,
            subsamples,
            pattern: self.pattern,
        }
    }

    /// 按逐采样辅助信息构造加密信息
    ///
    /// 需要逐采样 IV 却没有对应条目时返回 `MalformedContainer`.
    pub fn sample_crypto_info(&self, aux: Option<&SencEntry>) -> MexResult<CryptoInfo> {
        match aux {
            Some(entry) => Ok(self.crypto_info(Some(&entry.iv), entry.subsamples.clone())),
            None if self.default_iv_size > 0 => Err(MexError::MalformedContainer(format!(
                "加密采样缺少逐采样 IV (IV 长度 {})",
                self.default_iv_size
            ))),
            None => Ok(self.crypto_info(None, Vec::new())),
        }
    }

    /// 写入轨道格式描述
    pub fn apply_to_format(&self, format: &mut FormatBag) {
        format.set_int(keys::CRYPTO_MODE, self.mode as i64);
        format.set_bytes(keys::CRYPTO_KEY, self.default_kid.to_vec());
        format.set_int(keys::CRYPTO_DEFAULT_IV_SIZE, i64::from(self.default_iv_size));
        if self.pattern != CryptoPattern::default() {
            format.set_int(
                keys::CRYPTO_ENCRYPTED_BYTE_BLOCK,
                i64::from(self.pattern.crypt_blocks),
            );
            format.set_int(
                keys::CRYPTO_SKIP_BYTE_BLOCK,
                i64::from(self.pattern.skip_blocks),
            );
        }
    }
}

/// sinf 解析结果
#[derive(Debug, Default)]
pub(crate) struct ProtectionScheme {
    /// 原始采样条目格式
    pub original_format: Option<[u8; 4]>,
    /// 加密参数 (方案不受支持或缺少 tenc 时为 None)
    pub encryption: Option<TrackEncryption>,
}

/// 解析 sinf box 内容
pub(crate) fn parse_sinf(io: &mut IoContext, end: u64) -> MexResult<ProtectionScheme> {
    let mut result = ProtectionScheme::default();
    let mut scheme: Option<[u8; 4]> = None;
    let mut tenc: Option<TrackEncryption> = None;

    while io.position() + 8 <= end {
        let header = read_box_header(io)?;
        let box_end = header.end(end).min(end);
        match header.box_type {
            BoxType::Frma => result.original_format = Some(io.read_tag()?),
            BoxType::Schm => {
                let _ = read_full_box_header(io)?;
                scheme = Some(io.read_tag()?);
            }
            BoxType::Schi => {
                while io.position() + 8 <= box_end {
                    let child = read_box_header(io)?;
                    let child_end = child.end(box_end).min(box_end);
                    if child.box_type == BoxType::Tenc {
                        tenc = Some(parse_tenc(io)?);
                    }
                    io.seek(std::io::SeekFrom::Start(child_end))?;
                }
            }
            _ => {}
        }
        io.seek(std::io::SeekFrom::Start(box_end))?;
    }

    let scheme = scheme.unwrap_or(*b"cenc");
    let mode = CryptoMode::from_scheme(&scheme);
    if mode == CryptoMode::Unencrypted {
        warn!(
            "不支持的保护方案 '{}', 采样按未加密处理",
            String::from_utf8_lossy(&scheme)
        );
        return Ok(result);
    }
    result.encryption = tenc.map(|mut t| {
        t.scheme = scheme;
        t.mode = mode;
        t
    });
    debug!(
        "sinf: scheme={}, 原始格式={:?}",
        String::from_utf8_lossy(&scheme),
        result.original_format.map(|f| String::from_utf8_lossy(&f).into_owned()),
    );
    Ok(result)
}

/// 解析 tenc box 内容
fn parse_tenc(io: &mut IoContext) -> MexResult<TrackEncryption> {
    let (version, _) = read_full_box_header(io)?;

    // reserved byte
    io.skip(1)?;
    let pattern = if version == 0 {
        io.skip(1)?;
        CryptoPattern::default()
    } else {
        let pattern_byte = io.read_u8()?;
        CryptoPattern {
            crypt_blocks: pattern_byte >> 4,
            skip_blocks: pattern_byte & 0x0F,
        }
    };
    let default_is_protected = io.read_u8()? != 0;
    let default_iv_size = io.read_u8()?;
    let mut default_kid = [0u8; 16];
    io.read_exact(&mut default_kid)?;

    let constant_iv = if default_is_protected && default_iv_size == 0 {
        let len = io.read_u8()?;
        io.read_bytes(usize::from(len))?
    } else {
        Vec::new()
    };

    if default_is_protected && !matches!(default_iv_size, 0 | 8 | 16) {
        return Err(MexError::MalformedContainer(format!(
            "tenc IV 长度无效: {default_iv_size}"
        )));
    }

    Ok(TrackEncryption {
        scheme: *b"cenc",
        mode: CryptoMode::AesCtr,
        default_is_protected,
        default_iv_size,
        default_kid,
        constant_iv,
        pattern,
    })
}

/// 解析 pssh box 内容, 返回 (SystemID, 数据)
///
/// 版本 1 的 KID 列表被跳过, 只保留方案数据.
pub(crate) fn parse_pssh_box(io: &mut IoContext, end: u64) -> MexResult<(Uuid, Vec<u8>)> {
    let (version, _) = read_full_box_header(io)?;
    let mut system_id = [0u8; 16];
    io.read_exact(&mut system_id)?;
    if version > 0 {
        let kid_count = u64::from(io.read_u32_be()?);
        io.skip(kid_count * 16)?;
    }
    let data_size = u64::from(io.read_u32_be()?);
    if io.position() + data_size > end {
        return Err(MexError::MalformedContainer(format!(
            "pssh 数据长度 {data_size} 超出 box 范围"
        )));
    }
    let data = io.read_bytes(data_size as usize)?;
    Ok((Uuid::from_bytes(system_id), data))
}

/// senc 中单个采样的加密参数
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct SencEntry {
    /// 逐采样 IV (为空表示使用常量 IV)
    pub iv: Vec<u8>,
    /// 子采样布局
    pub subsamples: Vec<Subsample>,
}

/// 解析 senc box 内容
pub(crate) fn parse_senc(io: &mut IoContext, end: u64, iv_size: u8) -> MexResult<Vec<SencEntry>> {
    let (_, flags) = read_full_box_header(io)?;
    let sample_count = io.read_u32_be()?;

    // 每个采样至少占 iv_size 字节, 防止声明数量异常时过度分配
    let max_entries = (end.saturating_sub(io.position()) / u64::from(iv_size.max(1))) as usize;
    let mut entries = Vec::with_capacity((sample_count as usize).min(max_entries));

    for _ in 0..sample_count {
        entries.push(read_sample_aux(io, iv_size, flags & SENC_USE_SUBSAMPLES != 0)?);
    }

    if io.position() > end {
        return Err(MexError::MalformedContainer(
            "senc 内容超出 box 范围".into(),
        ));
    }
    Ok(entries)
}

/// 读取一个采样的 IV 与可选的子采样布局
fn read_sample_aux(io: &mut IoContext, iv_size: u8, with_subsamples: bool) -> MexResult<SencEntry> {
    let iv = io.read_bytes(usize::from(iv_size))?;
    let mut subsamples = Vec::new();
    if with_subsamples {
        let count = io.read_u16_be()?;
        subsamples.reserve(usize::from(count));
        for _ in 0..count {
            let clear_bytes = u32::from(io.read_u16_be()?);
            let encrypted_bytes = io.read_u32_be()?;
            subsamples.push(Subsample {
                clear_bytes,
                encrypted_bytes,
            });
        }
    }
    Ok(SencEntry { iv, subsamples })
}

/// saiz + saio 描述的逐采样辅助信息位置
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct AuxInfo {
    /// 所有采样共用的大小 (0 表示使用 `sizes`)
    default_size: u8,
    /// 逐采样大小
    sizes: Vec<u8>,
    /// saiz 声明的采样数
    sample_count: u32,
    /// 偏移表: 一个 (连续存放), 或每块 / 每个 trun 一个
    pub offsets: Vec<u64>,
}

impl AuxInfo {
    /// 大小表与偏移表是否都已给出
    pub fn is_usable(&self) -> bool {
        self.sample_count > 0 && !self.offsets.is_empty()
    }

    /// saiz 声明的采样数
    pub fn sample_count(&self) -> u32 {
        self.sample_count
    }

    fn size(&self, sample: usize) -> u8 {
        if self.default_size > 0 {
            self.default_size
        } else {
            self.sizes.get(sample).copied().unwrap_or(0)
        }
    }

    /// 读取连续存放的一段采样辅助信息
    ///
    /// `first` 为该段首个采样序号, `offset` 为该段在文件中的绝对位置.
    pub fn read_run(
        &self,
        io: &mut IoContext,
        offset: u64,
        first: usize,
        count: usize,
        iv_size: u8,
    ) -> MexResult<Vec<SencEntry>> {
        io.seek(std::io::SeekFrom::Start(offset))?;
        let mut entries = Vec::with_capacity(count.min(1 << 16));
        for sample in first..first + count {
            let size = self.size(sample);
            let start = io.position();
            let entry = read_sample_aux(io, iv_size, size > iv_size)?;
            if io.position() - start > u64::from(size) {
                return Err(MexError::MalformedContainer(format!(
                    "采样 {sample} 的辅助信息超出 saiz 声明的 {size} 字节"
                )));
            }
            io.seek(std::io::SeekFrom::Start(start + u64::from(size)))?;
            entries.push(entry);
        }
        Ok(entries)
    }
}

/// 辅助信息类型与加密方案不符时忽略该 box
fn aux_type_matches(io: &mut IoContext, flags: u32, scheme: &[u8; 4]) -> MexResult<bool> {
    if flags & AUX_INFO_TYPE_PRESENT == 0 {
        return Ok(true);
    }
    let aux_type = io.read_tag()?;
    let _parameter = io.read_u32_be()?;
    Ok(&aux_type == scheme)
}

/// 解析 saiz box 内容
pub(crate) fn parse_saiz(
    io: &mut IoContext,
    end: u64,
    scheme: &[u8; 4],
    aux: &mut AuxInfo,
) -> MexResult<()> {
    let (_, flags) = read_full_box_header(io)?;
    if !aux_type_matches(io, flags, scheme)? {
        return Ok(());
    }
    aux.default_size = io.read_u8()?;
    aux.sample_count = io.read_u32_be()?;
    if aux.default_size == 0 {
        if u64::from(aux.sample_count) > end.saturating_sub(io.position()) {
            return Err(MexError::MalformedContainer(format!(
                "saiz 声明 {} 个采样, 超出 box 范围",
                aux.sample_count
            )));
        }
        aux.sizes = io.read_bytes(aux.sample_count as usize)?;
    }
    Ok(())
}

/// 解析 saio box 内容
pub(crate) fn parse_saio(
    io: &mut IoContext,
    scheme: &[u8; 4],
    aux: &mut AuxInfo,
) -> MexResult<()> {
    let (version, flags) = read_full_box_header(io)?;
    if !aux_type_matches(io, flags, scheme)? {
        return Ok(());
    }
    let entry_count = io.read_u32_be()?;
    aux.offsets = Vec::with_capacity((entry_count as usize).min(1 << 16));
    for _ in 0..entry_count {
        let offset = if version == 0 {
            u64::from(io.read_u32_be()?)
        } else {
            io.read_u64_be()?
        };
        aux.offsets.push(offset);
    }
    Ok(())
}
