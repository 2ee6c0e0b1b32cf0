//! MP4 Box (Atom) 头部解析.
//!
//! ISO 14496-12 定义的 Box 结构:
//! ```text
//! Size:       4 bytes (big-endian, 含头部本身)
//! Type:       4 bytes (FourCC)
//! [ExtSize]:  8 bytes (仅当 Size==1 时存在, 64-bit 大小)
//! ```
//!
//! 特殊大小值:
//! - 0: Box 延伸到文件末尾
//! - 1: 使用 64-bit 扩展大小

use mex_core::{MexError, MexResult};

use crate::io::IoContext;

/// Box 类型枚举 (常用 FourCC)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoxType {
    /// ftyp - 文件类型
    Ftyp,
    /// styp - 分段类型
    Styp,
    /// moov - 影片元数据
    Moov,
    /// mvhd - 影片头部
    Mvhd,
    /// trak - 轨道
    Trak,
    /// tkhd - 轨道头部
    Tkhd,
    /// mdia - 媒体
    Mdia,
    /// mdhd - 媒体头部
    Mdhd,
    /// hdlr - 处理器引用
    Hdlr,
    /// minf - 媒体信息
    Minf,
    /// stbl - 采样表
    Stbl,
    /// stsd - 采样描述
    Stsd,
    /// stts - 时间→采样映射
    Stts,
    /// stsc - 采样→块映射
    Stsc,
    /// stsz - 采样大小
    Stsz,
    /// stco - 块偏移 (32位)
    Stco,
    /// co64 - 块偏移 (64位)
    Co64,
    /// stss - 同步采样
    Stss,
    /// ctts - 合成时间偏移
    Ctts,
    /// mvex - 影片扩展 (分片 MP4 标志)
    Mvex,
    /// mehd - 影片扩展头部
    Mehd,
    /// trex - 轨道扩展默认值
    Trex,
    /// moof - 影片分片
    Moof,
    /// mfhd - 分片头部
    Mfhd,
    /// traf - 轨道分片
    Traf,
    /// tfhd - 轨道分片头部
    Tfhd,
    /// tfdt - 轨道分片解码时间
    Tfdt,
    /// trun - 轨道分片采样
    Trun,
    /// senc - 采样加密信息
    Senc,
    /// saiz - 采样辅助信息大小
    Saiz,
    /// saio - 采样辅助信息偏移
    Saio,
    /// pssh - 保护系统头
    Pssh,
    /// sinf - 保护方案信息
    Sinf,
    /// frma - 原始格式
    Frma,
    /// schm - 保护方案类型
    Schm,
    /// schi - 保护方案详细信息
    Schi,
    /// tenc - 轨道加密默认值
    Tenc,
    /// mfra - 分片随机访问索引 (位于文件末尾)
    Mfra,
    /// mdat - 媒体数据
    Mdat,
    /// free - 自由空间
    Free,
    /// skip - 跳过
    Skip,
    /// 未知 box 类型
    Unknown([u8; 4]),
}

impl BoxType {
    /// 从 4 字节 FourCC 创建
    pub fn from_fourcc(fourcc: &[u8; 4]) -> Self {
        match fourcc {
            b"ftyp" => Self::Ftyp,
            b"styp" => Self::Styp,
            b"moov" => Self::Moov,
            b"mvhd" => Self::Mvhd,
            b"trak" => Self::Trak,
            b"tkhd" => Self::Tkhd,
            b"mdia" => Self::Mdia,
            b"mdhd" => Self::Mdhd,
            b"hdlr" => Self::Hdlr,
            b"minf" => Self::Minf,
            b"stbl" => Self::Stbl,
            b"stsd" => Self::Stsd,
            b"stts" => Self::Stts,
            b"stsc" => Self::Stsc,
            b"stsz" => Self::Stsz,
            b"stco" => Self::Stco,
            b"co64" => Self::Co64,
            b"stss" => Self::Stss,
            b"ctts" => Self::Ctts,
            b"mvex" => Self::Mvex,
            b"mehd" => Self::Mehd,
            b"trex" => Self::Trex,
            b"moof" => Self::Moof,
            b"mfhd" => Self::Mfhd,
            b"traf" => Self::Traf,
            b"tfhd" => Self::Tfhd,
            b"tfdt" => Self::Tfdt,
            b"trun" => Self::Trun,
            b"senc" => Self::Senc,
            b"saiz" => Self::Saiz,
            b"saio" => Self::Saio,
            b"pssh" => Self::Pssh,
            b"sinf" => Self::Sinf,
            b"frma" => Self::Frma,
            b"schm" => Self::Schm,
            b"schi" => Self::Schi,
            b"tenc" => Self::Tenc,
            b"mfra" => Self::Mfra,
            b"mdat" => Self::Mdat,
            b"free" => Self::Free,
            b"skip" => Self::Skip,
            _ => Self::Unknown(*fourcc),
        }
    }
}

impl std::fmt::Display for BoxType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unknown(cc) => {
                let s = std::str::from_utf8(cc).unwrap_or("????");
                write!(f, "{s}")
            }
            _ => write!(f, "{self:?}"),
        }
    }
}

/// 已解析的 Box 头部
#[derive(Debug, Clone, Copy)]
pub struct BoxHeader {
    /// Box 起始偏移
    pub start: u64,
    /// Box 总大小 (含头部, 0 表示到文件末尾)
    pub size: u64,
    /// Box 类型
    pub box_type: BoxType,
    /// 头部大小 (8 或 16 字节)
    pub header_size: u64,
}

impl BoxHeader {
    /// 内容起始偏移
    pub fn content_start(&self) -> u64 {
        self.start + self.header_size
    }

    /// Box 末尾偏移 (不含)
    ///
    /// 大小为 0 时延伸到 `limit` (父 box 末尾或文件末尾).
    pub fn end(&self, limit: u64) -> u64 {
        if self.size == 0 {
            limit
        } else {
            self.start.saturating_add(self.size)
        }
    }
}

/// 读取一个 Box 头部
///
/// 声明大小小于头部本身时返回 `MalformedContainer`.
pub fn read_box_header(io: &mut IoContext) -> MexResult<BoxHeader> {
    let start = io.position();
    let size32 = io.read_u32_be()?;
    let fourcc = io.read_tag()?;
    let box_type = BoxType::from_fourcc(&fourcc);

    let (size, header_size) = if size32 == 1 {
        (io.read_u64_be()?, 16u64)
    } else {
        (u64::from(size32), 8u64)
    };

    if size != 0 && size < header_size {
        return Err(MexError::MalformedContainer(format!(
            "box '{box_type}' 大小 {size} 小于头部 {header_size} (偏移 {start})"
        )));
    }

    Ok(BoxHeader {
        start,
        size,
        box_type,
        header_size,
    })
}

/// 读取 FullBox 的版本与标志
pub fn read_full_box_header(io: &mut IoContext) -> MexResult<(u8, u32)> {
    let version = io.read_u8()?;
    let flags = io.read_u24_be()?;
    Ok((version, flags))
}

/// 读取按版本区分宽度的时间/时长字段 (v0: 32 位, v1: 64 位)
pub fn read_versioned_u64(io: &mut IoContext, version: u8) -> MexResult<u64> {
    if version == 1 {
        io.read_u64_be()
    } else {
        Ok(u64::from(io.read_u32_be()?))
    }
}

/// ftyp/styp Box 数据
pub struct FtypBox {
    /// 主品牌
    pub major_brand: [u8; 4],
    /// 兼容品牌列表
    pub compatible_brands: Vec<[u8; 4]>,
}

impl FtypBox {
    /// 解析 ftyp box 内容
    pub fn parse(io: &mut IoContext, content_size: u64) -> MexResult<Self> {
        let major_brand = io.read_tag()?;
        let _minor_version = io.read_u32_be()?;

        let remaining = content_size.saturating_sub(8);
        let brand_count = (remaining / 4) as usize;
        let mut compatible_brands = Vec::with_capacity(brand_count.min(64));
        for _ in 0..brand_count {
            compatible_brands.push(io.read_tag()?);
        }

        Ok(Self {
            major_brand,
            compatible_brands,
        })
    }

    /// 获取主品牌字符串
    pub fn major_brand_str(&self) -> String {
        String::from_utf8_lossy(&self.major_brand).to_string()
    }
}

/// 测试用 box 构造
#[cfg(test)]
pub(crate) mod build {
    /// 构造普通 box
    pub fn build_box(box_type: &[u8; 4], content: &[u8]) -> Vec<u8> {
        let size = (8 + content.len()) as u32;
        let mut data = Vec::with_capacity(size as usize);
        data.extend_from_slice(&size.to_be_bytes());
        data.extend_from_slice(box_type);
        data.extend_from_slice(content);
        data
    }

    /// 构造 FullBox
    pub fn build_fullbox(box_type: &[u8; 4], version: u8, flags: u32, content: &[u8]) -> Vec<u8> {
        let mut full_content = vec![
            version,
            ((flags >> 16) & 0xFF) as u8,
            ((flags >> 8) & 0xFF) as u8,
            (flags & 0xFF) as u8,
        ];
        full_content.extend_from_slice(content);
        build_box(box_type, &full_content)
    }
}
