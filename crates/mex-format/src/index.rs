//! 容器索引: 轨道描述与按轨道组织的采样表.
//!
//! 适配器在打开时构建索引, 分片容器可通过延迟扩展追加采样.
//! 索引一经构建, 已提交的条目不再修改, 只允许在表尾追加.

use mex_core::format::keys;
use mex_core::{CryptoInfo, FormatBag, MediaType, MexError, MexResult, SampleFlags};

/// 轨道描述
#[derive(Debug, Clone)]
pub struct Track {
    /// 轨道索引 (在容器内的顺序, 从 0 开始)
    pub index: u32,
    /// 媒体类型
    pub media_type: MediaType,
    /// 轨道格式描述 (必含 `mime`)
    pub format: FormatBag,
}

impl Track {
    /// MIME 类型
    pub fn mime(&self) -> &str {
        self.format.mime().unwrap_or_default()
    }

    /// 时长 (微秒), 未知时为 None
    pub fn duration_us(&self) -> Option<i64> {
        self.format.get_int(keys::DURATION_US)
    }
}

/// 采样表条目
#[derive(Debug, Clone, PartialEq)]
pub struct SampleEntry {
    /// 字节偏移 (相对于数据源起点)
    pub offset: u64,
    /// 字节大小
    pub size: u32,
    /// 展示时间 (微秒)
    pub time_us: i64,
    /// 采样标志
    pub flags: SampleFlags,
    /// 加密信息 (仅加密采样)
    pub crypto: Option<Box<CryptoInfo>>,
}

impl SampleEntry {
    /// 创建未加密采样
    pub fn new(offset: u64, size: u32, time_us: i64, is_sync: bool) -> Self {
        let flags = if is_sync {
            SampleFlags::SYNC
        } else {
            SampleFlags::empty()
        };
        Self {
            offset,
            size,
            time_us,
            flags,
            crypto: None,
        }
    }

    /// 附加加密信息并标记为加密采样
    pub fn with_crypto(mut self, crypto: CryptoInfo) -> Self {
        self.flags |= SampleFlags::ENCRYPTED;
        self.crypto = Some(Box::new(crypto));
        self
    }

    /// 是否为同步采样
    pub fn is_sync(&self) -> bool {
        self.flags.contains(SampleFlags::SYNC)
    }

    /// 字节区间末尾 (不含)
    pub fn end(&self) -> u64 {
        self.offset.saturating_add(u64::from(self.size))
    }
}

/// 容器索引
#[derive(Debug, Clone, Default)]
pub struct ContainerIndex {
    tracks: Vec<Track>,
    tables: Vec<Vec<SampleEntry>>,
    file_format: FormatBag,
    complete: bool,
}

impl ContainerIndex {
    /// 以容器级格式描述创建空索引
    pub fn new(file_format: FormatBag) -> Self {
        Self {
            tracks: Vec::new(),
            tables: Vec::new(),
            file_format,
            complete: false,
        }
    }

    /// 添加轨道, 返回轨道索引
    ///
    /// 格式描述必须含 `mime`.
    pub fn add_track(&mut self, format: FormatBag) -> MexResult<u32> {
        let mime = format.mime().ok_or_else(|| {
            MexError::MalformedContainer(format!("轨道 #{} 缺少 mime", self.tracks.len()))
        })?;
        let index = self.tracks.len() as u32;
        let media_type = MediaType::from_mime(mime);
        self.tracks.push(Track {
            index,
            media_type,
            format,
        });
        self.tables.push(Vec::new());
        Ok(index)
    }

    /// 追加采样到指定轨道的表尾
    pub fn push_sample(&mut self, track: u32, entry: SampleEntry) -> MexResult<()> {
        self.table_mut(track)?.push(entry);
        Ok(())
    }

    /// 批量追加采样
    pub fn extend_samples(
        &mut self,
        track: u32,
        entries: impl IntoIterator<Item = SampleEntry>,
    ) -> MexResult<()> {
        self.table_mut(track)?.extend(entries);
        Ok(())
    }

    fn table_mut(&mut self, track: u32) -> MexResult<&mut Vec<SampleEntry>> {
        self.tables
            .get_mut(track as usize)
            .ok_or_else(|| MexError::InvalidArgument(format!("轨道索引 {track} 越界")))
    }

    /// 轨道数量
    pub fn track_count(&self) -> usize {
        self.tracks.len()
    }

    /// 全部轨道
    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    /// 获取轨道
    pub fn track(&self, track: u32) -> Option<&Track> {
        self.tracks.get(track as usize)
    }

    /// 获取轨道格式描述的可变引用 (延迟扩展时更新时长等)
    pub fn track_format_mut(&mut self, track: u32) -> Option<&mut FormatBag> {
        self.tracks.get_mut(track as usize).map(|t| &mut t.format)
    }

    /// 轨道的采样表
    pub fn samples(&self, track: u32) -> &[SampleEntry] {
        self.tables
            .get(track as usize)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// 获取采样
    pub fn sample(&self, track: u32, row: usize) -> Option<&SampleEntry> {
        self.tables.get(track as usize)?.get(row)
    }

    /// 所有轨道的采样总数
    pub fn total_samples(&self) -> usize {
        self.tables.iter().map(Vec::len).sum()
    }

    /// 容器级格式描述
    pub fn file_format(&self) -> &FormatBag {
        &self.file_format
    }

    /// 容器级格式描述的可变引用
    pub fn file_format_mut(&mut self) -> &mut FormatBag {
        &mut self.file_format
    }

    /// 是否已无可扩展内容
    pub fn is_complete(&self) -> bool {
        self.complete
    }

    /// 标记索引已完整
    pub fn set_complete(&mut self) {
        self.complete = true;
    }
}
