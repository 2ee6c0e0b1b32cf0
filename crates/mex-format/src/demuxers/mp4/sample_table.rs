//! MP4 采样表 (Sample Table) 解析.
//!
//! 采样表 (stbl) 包含了从采样序号到文件偏移的完整映射.
//! 由多个子 box 共同组成:
//! - stts: 解码时间→采样编号映射 (delta 编码)
//! - stsc: 采样→块映射 (压缩的 Run-Length 编码)
//! - stsz: 每个采样的字节大小
//! - stco/co64: 每个块的文件偏移
//! - stss: 同步采样 (关键帧) 索引列表
//! - ctts: 合成时间偏移 (B帧重排序)
//!
//! 采样描述 (stsd) 见 `sample_entry` 模块.

use mex_core::timestamp::ticks_to_us;
use mex_core::{MexError, MexResult};

use super::boxes::read_full_box_header;
use super::encryption::{SencEntry, TrackEncryption};
use crate::index::SampleEntry;
use crate::io::IoContext;

/// 时间→采样条目 (stts)
#[derive(Debug, Clone)]
struct SttsEntry {
    /// 采样计数
    count: u32,
    /// 每采样的时间增量
    delta: u32,
}

/// 采样→块条目 (stsc)
#[derive(Debug, Clone)]
struct StscEntry {
    /// 起始块号 (1-based)
    first_chunk: u32,
    /// 每块的采样数
    samples_per_chunk: u32,
}

/// 合成时间偏移条目 (ctts)
#[derive(Debug, Clone)]
struct CttsEntry {
    /// 采样计数
    count: u32,
    /// 偏移量
    offset: i32,
}

/// 采样表
#[derive(Debug, Default)]
pub struct SampleTable {
    /// 时间→采样表
    stts_entries: Vec<SttsEntry>,
    /// 采样→块表
    stsc_entries: Vec<StscEntry>,
    /// 默认采样大小 (0 表示使用逐样本大小表)
    default_sample_size: u32,
    /// 逐样本大小表
    sample_sizes: Vec<u32>,
    /// 总采样数
    total_samples: u32,
    /// 块偏移表
    chunk_offsets: Vec<u64>,
    /// 同步采样 (关键帧) 列表 (1-based)
    sync_samples: Vec<u32>,
    /// 是否有 stss (无则所有采样都是关键帧)
    has_stss: bool,
    /// 合成时间偏移表
    ctts_entries: Vec<CttsEntry>,
}

/// 限制按声明数量预分配的上限, 防止损坏的计数导致过度分配
fn capped(count: u32) -> usize {
    (count as usize).min(1 << 16)
}

/// 单个轨道可索引的采样数上限
const MAX_TRACK_SAMPLES: u32 = 1 << 24;

impl SampleTable {
    /// 创建空的采样表
    pub fn new() -> Self {
        Self::default()
    }

    /// 获取总采样数
    pub fn sample_count(&self) -> u32 {
        if self.total_samples > 0 {
            self.total_samples
        } else {
            self.sample_sizes.len() as u32
        }
    }

    /// 获取指定采样的字节大小
    pub fn sample_size(&self, sample_idx: u32) -> u32 {
        if self.default_sample_size > 0 {
            self.default_sample_size
        } else {
            self.sample_sizes
                .get(sample_idx as usize)
                .copied()
                .unwrap_or(0)
        }
    }

    /// 最大采样大小
    pub fn max_sample_size(&self) -> u32 {
        if self.default_sample_size > 0 {
            self.default_sample_size
        } else {
            self.sample_sizes.iter().copied().max().unwrap_or(0)
        }
    }

    /// 全部采样的解码总时长 (媒体时间刻度)
    pub fn total_duration(&self) -> u64 {
        self.stts_entries
            .iter()
            .map(|e| u64::from(e.count) * u64::from(e.delta))
            .sum()
    }

    /// 是否为同步采样 (关键帧)
    pub fn is_sync_sample(&self, sample_idx: u32) -> bool {
        if !self.has_stss {
            return true; // 无 stss 表示所有采样都是关键帧
        }
        let sample_num = sample_idx + 1; // stss 使用 1-based
        self.sync_samples.binary_search(&sample_num).is_ok()
    }

    /// 每个块的采样数, 按块顺序
    pub fn samples_per_chunk(&self) -> impl Iterator<Item = u32> + '_ {
        let total_chunks = self.chunk_offsets.len() as u32;
        self.stsc_entries.iter().enumerate().flat_map(move |(i, run)| {
            let first_chunk = run.first_chunk.saturating_sub(1).min(total_chunks);
            let next_first = self
                .stsc_entries
                .get(i + 1)
                .map_or(total_chunks, |next| next.first_chunk.saturating_sub(1))
                .clamp(first_chunk, total_chunks);
            std::iter::repeat_n(run.samples_per_chunk, (next_first - first_chunk) as usize)
        })
    }

    /// 校验后的采样数
    ///
    /// 声明的采样数超出 stsc/stco 的覆盖范围或单轨道上限时返回 `MalformedContainer`.
    pub fn checked_sample_count(&self) -> MexResult<u32> {
        let count = self.sample_count();
        let covered: u64 = self.samples_per_chunk().map(u64::from).sum();
        if u64::from(count) > covered {
            return Err(MexError::MalformedContainer(format!(
                "采样表不一致: stsz 声明 {count} 个采样, stsc/stco 仅覆盖 {covered} 个"
            )));
        }
        if count > MAX_TRACK_SAMPLES {
            return Err(MexError::MalformedContainer(format!(
                "采样数 {count} 超出单轨道上限 {MAX_TRACK_SAMPLES}"
            )));
        }
        Ok(count)
    }

    /// 生成按解码顺序排列的采样表条目
    ///
    /// 顺序遍历 stsc/stco 计算偏移, stts/ctts 计算展示时间.
    /// `aux` 为 saiz/saio 给出的逐采样加密信息.
    pub fn build_entries(
        &self,
        timescale: u32,
        encryption: Option<&TrackEncryption>,
        aux: &[SencEntry],
    ) -> MexResult<Vec<SampleEntry>> {
        let count = self.checked_sample_count()?;
        let mut entries = Vec::with_capacity(capped(count));

        let mut deltas = self
            .stts_entries
            .iter()
            .flat_map(|e| std::iter::repeat_n(e.delta, e.count as usize));
        let mut cts_offsets = self
            .ctts_entries
            .iter()
            .flat_map(|e| std::iter::repeat_n(e.offset, e.count as usize));

        let mut sample = 0u32;
        let mut dts = 0i64;
        let mut last_delta = 0u32;

        let chunks = self.chunk_offsets.iter().zip(self.samples_per_chunk());
        'chunks: for (&chunk_offset, per_chunk) in chunks {
            let mut offset = chunk_offset;
            for _ in 0..per_chunk {
                if sample >= count {
                    break 'chunks;
                }
                let size = self.sample_size(sample);
                let delta = deltas.next().unwrap_or(last_delta);
                last_delta = delta;
                let cts = i64::from(cts_offsets.next().unwrap_or(0));

                let mut entry = SampleEntry::new(
                    offset,
                    size,
                    ticks_to_us(dts + cts, timescale),
                    self.is_sync_sample(sample),
                );
                if let Some(enc) = encryption.filter(|e| e.default_is_protected) {
                    let info = enc.sample_crypto_info(aux.get(sample as usize))?;
                    entry = entry.with_crypto(info);
                }
                entries.push(entry);

                offset = offset.saturating_add(u64::from(size));
                dts += i64::from(delta);
                sample += 1;
            }
        }

        Ok(entries)
    }

    // === 解析方法 ===

    /// 解析 stts (Time-to-Sample Box)
    pub fn parse_stts(&mut self, io: &mut IoContext) -> MexResult<()> {
        let _ = read_full_box_header(io)?;
        let entry_count = io.read_u32_be()?;

        self.stts_entries.reserve(capped(entry_count));
        for _ in 0..entry_count {
            let count = io.read_u32_be()?;
            let delta = io.read_u32_be()?;
            self.stts_entries.push(SttsEntry { count, delta });
        }

        Ok(())
    }

    /// 解析 stsc (Sample-to-Chunk Box)
    pub fn parse_stsc(&mut self, io: &mut IoContext) -> MexResult<()> {
        let _ = read_full_box_header(io)?;
        let entry_count = io.read_u32_be()?;

        self.stsc_entries.reserve(capped(entry_count));
        for _ in 0..entry_count {
            let first_chunk = io.read_u32_be()?;
            let samples_per_chunk = io.read_u32_be()?;
            let _sample_desc_idx = io.read_u32_be()?;
            self.stsc_entries.push(StscEntry {
                first_chunk,
                samples_per_chunk,
            });
        }

        Ok(())
    }

    /// 解析 stsz (Sample Size Box)
    pub fn parse_stsz(&mut self, io: &mut IoContext) -> MexResult<()> {
        let _ = read_full_box_header(io)?;
        self.default_sample_size = io.read_u32_be()?;
        self.total_samples = io.read_u32_be()?;

        if self.default_sample_size == 0 {
            self.sample_sizes.reserve(capped(self.total_samples));
            for _ in 0..self.total_samples {
                self.sample_sizes.push(io.read_u32_be()?);
            }
        }

        Ok(())
    }

    /// 解析 stco/co64 (Chunk Offset Box)
    pub fn parse_stco(&mut self, io: &mut IoContext, is_64bit: bool) -> MexResult<()> {
        let _ = read_full_box_header(io)?;
        let entry_count = io.read_u32_be()?;

        self.chunk_offsets.reserve(capped(entry_count));
        for _ in 0..entry_count {
            let offset = if is_64bit {
                io.read_u64_be()?
            } else {
                u64::from(io.read_u32_be()?)
            };
            self.chunk_offsets.push(offset);
        }

        Ok(())
    }

    /// 解析 stss (Sync Sample Box)
    pub fn parse_stss(&mut self, io: &mut IoContext) -> MexResult<()> {
        let _ = read_full_box_header(io)?;
        let entry_count = io.read_u32_be()?;

        self.has_stss = true;
        self.sync_samples.reserve(capped(entry_count));
        for _ in 0..entry_count {
            self.sync_samples.push(io.read_u32_be()?);
        }
        self.sync_samples.sort_unstable();

        Ok(())
    }

    /// 解析 ctts (Composition Time-to-Sample Box)
    pub fn parse_ctts(&mut self, io: &mut IoContext) -> MexResult<()> {
        let (version, _) = read_full_box_header(io)?;
        let entry_count = io.read_u32_be()?;

        self.ctts_entries.reserve(capped(entry_count));
        for _ in 0..entry_count {
            let count = io.read_u32_be()?;
            let offset = if version == 0 {
                io.read_u32_be()? as i32
            } else {
                io.read_i32_be()?
            };
            self.ctts_entries.push(CttsEntry { count, offset });
        }

        Ok(())
    }
}
