//! 媒体解封装门面.
//!
//! [`MediaExtractor`] 持有数据源与容器索引, 在选中轨道之间做按时间交错的顺序读取.
//!
//! # 状态
//! ```text
//! Unopened ──set_data_source──> Opened ──select_track──> Selecting
//!                                  ^                       │ advance 返回 false
//!                                  │                       v
//!                                  └──────seek_to───── Exhausted
//! 任意状态 ──release──> Released
//! ```
//!
//! 游标在每个轨道上维护"下一个未消费的行号" (队首). `advance` 在所有选中轨道的
//! 队首中取时间最早者作为当前采样, 时间相同时取轨道索引较小者.

use std::cmp::Reverse;
use std::collections::BTreeSet;
use std::fs::File;
use std::path::Path;

use bytes::Bytes;
use log::{debug, info, warn};
use mex_core::{
    CryptoInfo, FormatBag, MexError, MexResult, PsshInfo, SampleFlags, SeekMode, format::keys,
    parse_pssh,
};
use mex_format::{
    ContainerIndex, DataSource, Demuxer, FileSource, FormatId, FormatRegistry, IoContext,
    MemorySource, OpenedInput, SampleEntry, Track,
};

use crate::options::ExtractorOptions;

/// 门面状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExtractorState {
    /// 尚未成功打开数据源
    Unopened,
    /// 已打开, 未选中任何轨道
    Opened,
    /// 已选中轨道, 游标可推进
    Selecting,
    /// 选中轨道的采样已全部读完, 需 `seek_to` 才能继续
    Exhausted,
    /// 已释放
    Released,
}

/// 当前采样位置
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Cursor {
    track: u32,
    row: usize,
}

/// 已打开的容器及其游标
struct OpenedContainer {
    io: IoContext,
    demuxer: Box<dyn Demuxer>,
    format_id: FormatId,
    index: ContainerIndex,
    /// 选中的轨道 (有序, 便于同时间时按索引取舍)
    selected: BTreeSet<u32>,
    /// 每个轨道下一个未消费的行号
    heads: Vec<usize>,
    current: Option<Cursor>,
    exhausted: bool,
}

enum Slot {
    Empty,
    /// 数据源已设置, 但打开时数据不足, 等待重试
    Pending(IoContext),
    Open(Box<OpenedContainer>),
    Released,
}

impl Slot {
    fn not_open_error(&self) -> MexError {
        match self {
            Self::Released => MexError::UseAfterRelease,
            Self::Pending(_) => MexError::InvalidArgument("数据源尚未打开完成, 请重试打开".into()),
            _ => MexError::InvalidArgument("尚未设置数据源".into()),
        }
    }
}

/// 媒体解封装门面
///
/// 单一所有者: 所有修改都需要 `&mut self`. 实例可以跨线程移动, 但不共享.
pub struct MediaExtractor {
    registry: &'static FormatRegistry,
    options: ExtractorOptions,
    slot: Slot,
}

impl MediaExtractor {
    /// 使用默认配置创建
    pub fn new() -> Self {
        Self::with_options(ExtractorOptions::default())
    }

    /// 使用指定配置创建
    pub fn with_options(options: ExtractorOptions) -> Self {
        Self {
            registry: crate::init(),
            options,
            slot: Slot::Empty,
        }
    }

    /// 当前配置
    pub fn options(&self) -> &ExtractorOptions {
        &self.options
    }

    /// 当前状态
    pub fn state(&self) -> ExtractorState {
        match &self.slot {
            Slot::Empty | Slot::Pending(_) => ExtractorState::Unopened,
            Slot::Open(c) => c.state(),
            Slot::Released => ExtractorState::Released,
        }
    }

    // ========================
    // 数据源
    // ========================

    /// 以任意数据源打开
    pub fn set_data_source(&mut self, source: impl DataSource + 'static) -> MexResult<()> {
        self.ensure_unopened()?;
        self.open_io(IoContext::new(Box::new(source)))
    }

    /// 打开本地文件
    pub fn set_data_source_path(&mut self, path: impl AsRef<Path>) -> MexResult<()> {
        self.ensure_unopened()?;
        self.open_io(IoContext::open_read(path)?)
    }

    /// 打开文件中的一段区间 (对应 "文件描述符 + 偏移 + 长度")
    pub fn set_data_source_file(&mut self, file: File, offset: u64, length: u64) -> MexResult<()> {
        self.ensure_unopened()?;
        let source = FileSource::from_file_range(file, offset, length)?;
        self.open_io(IoContext::new(Box::new(source)))
    }

    /// 打开内存数据
    pub fn set_data_source_bytes(&mut self, data: impl Into<Bytes>) -> MexResult<()> {
        self.ensure_unopened()?;
        self.open_io(IoContext::new(Box::new(MemorySource::new(data))))
    }

    /// 重试打开
    ///
    /// 流式数据源在探测或构建索引时数据不足会返回 `NeedMoreData`,
    /// 数据源保留在实例中, 补充数据后调用本方法继续.
    pub fn retry_open(&mut self) -> MexResult<()> {
        match std::mem::replace(&mut self.slot, Slot::Empty) {
            Slot::Pending(io) => self.open_io(io),
            other => {
                let err = match &other {
                    Slot::Open(_) => MexError::InvalidArgument("数据源已打开".into()),
                    _ => other.not_open_error(),
                };
                self.slot = other;
                Err(err)
            }
        }
    }

    fn ensure_unopened(&self) -> MexResult<()> {
        match &self.slot {
            Slot::Empty | Slot::Pending(_) => Ok(()),
            Slot::Open(_) => Err(MexError::InvalidArgument("数据源已设置".into())),
            Slot::Released => Err(MexError::UseAfterRelease),
        }
    }

    fn open_io(&mut self, mut io: IoContext) -> MexResult<()> {
        let name = io.name().map(str::to_owned);
        match self
            .registry
            .open_input(&mut io, name.as_deref(), self.options.probe_size)
        {
            Ok(opened) => {
                info!(
                    "打开数据源{}: 格式 {}, {} 条轨道",
                    name.as_deref().map(|n| format!(" {n}")).unwrap_or_default(),
                    opened.format_id,
                    opened.index.track_count(),
                );
                self.slot = Slot::Open(Box::new(OpenedContainer::new(io, opened)));
                Ok(())
            }
            Err(e) if e.is_transient() => {
                debug!("打开数据源暂不可完成: {e}");
                self.slot = Slot::Pending(io);
                Err(e)
            }
            Err(e) => {
                warn!("打开数据源失败: {e}");
                self.slot = Slot::Empty;
                Err(e)
            }
        }
    }

    fn container(&self) -> MexResult<&OpenedContainer> {
        match &self.slot {
            Slot::Open(c) => Ok(&**c),
            other => Err(other.not_open_error()),
        }
    }

    fn container_mut(&mut self) -> MexResult<&mut OpenedContainer> {
        match &mut self.slot {
            Slot::Open(c) => Ok(&mut **c),
            other => Err(other.not_open_error()),
        }
    }

    // ========================
    // 轨道与容器信息
    // ========================

    /// 轨道数量
    pub fn track_count(&self) -> MexResult<usize> {
        Ok(self.container()?.index.track_count())
    }

    /// 轨道描述
    pub fn track(&self, track: usize) -> MexResult<&Track> {
        let c = self.container()?;
        let t = c.check_track(track)?;
        c.index
            .track(t)
            .ok_or_else(|| MexError::InvalidArgument(format!("轨道索引 {track} 越界")))
    }

    /// 轨道格式描述
    pub fn track_format(&self, track: usize) -> MexResult<&FormatBag> {
        Ok(&self.track(track)?.format)
    }

    /// 容器级格式描述
    pub fn file_format(&self) -> MexResult<&FormatBag> {
        Ok(self.container()?.index.file_format())
    }

    /// 识别出的容器格式
    pub fn format_id(&self) -> MexResult<FormatId> {
        Ok(self.container()?.format_id)
    }

    /// 保护系统头
    ///
    /// 容器没有保护系统头时返回 `None`; 存在但为空时返回空集合.
    pub fn pssh_info(&self) -> MexResult<Option<PsshInfo>> {
        match self.file_format()?.get_bytes(keys::PSSH) {
            Some(raw) => parse_pssh(raw).map(Some),
            None => Ok(None),
        }
    }

    // ========================
    // 选轨
    // ========================

    /// 选中轨道 (幂等)
    pub fn select_track(&mut self, track: usize) -> MexResult<()> {
        self.container_mut()?.select(track)
    }

    /// 取消选中轨道 (幂等)
    ///
    /// 取消当前采样所在的轨道后, 在下一次 `advance` 之前没有当前采样.
    pub fn unselect_track(&mut self, track: usize) -> MexResult<()> {
        self.container_mut()?.unselect(track)
    }

    /// 已选中的轨道 (升序)
    pub fn selected_tracks(&self) -> MexResult<Vec<usize>> {
        Ok(self
            .container()?
            .selected
            .iter()
            .map(|&t| t as usize)
            .collect())
    }

    // ========================
    // 游标
    // ========================

    /// 定位到指定时间附近的同步采样
    ///
    /// 每个选中轨道按 `mode` 独立定位, 之后当前采样为各轨道队首中最早者.
    /// 索引未完整时先延迟扩展到能确定目标为止; 配置的步数上限先用满时
    /// 返回 `ExtendLimitReached`, 游标不变.
    pub fn seek_to(&mut self, time_us: i64, mode: SeekMode) -> MexResult<()> {
        let steps = self.options.max_extend_steps;
        self.container_mut()?.seek(time_us, mode, steps)
    }

    /// 推进到下一个采样
    ///
    /// 没有剩余采样时返回 `false`, 并保持 `false` 直到下一次 `seek_to`.
    /// 只有索引完整后才会判定为没有剩余采样.
    /// 新的当前采样字节范围越出数据源时返回 `MalformedContainer`,
    /// 游标停在该采样上, 再次调用可跳过它.
    pub fn advance(&mut self) -> MexResult<bool> {
        let steps = self.options.max_extend_steps;
        self.container_mut()?.advance(steps)
    }

    /// 把当前采样数据复制到 `buf[offset..]`
    ///
    /// 没有当前采样时返回 `None` 且不修改 `buf`. 只写入
    /// `buf[offset..offset + size]`, 容量不足时返回 `BufferTooSmall`.
    pub fn read_sample_data(&mut self, buf: &mut [u8], offset: usize) -> MexResult<Option<usize>> {
        self.container_mut()?.read_sample_data(buf, offset)
    }

    /// 当前采样所在轨道
    pub fn sample_track_index(&self) -> MexResult<Option<usize>> {
        Ok(self.container()?.current.map(|c| c.track as usize))
    }

    /// 当前采样的展示时间 (微秒)
    pub fn sample_time(&self) -> MexResult<Option<i64>> {
        Ok(self.container()?.current_entry().map(|e| e.time_us))
    }

    /// 当前采样的标志位 (没有当前采样时为空)
    pub fn sample_flags(&self) -> MexResult<SampleFlags> {
        Ok(self
            .container()?
            .current_entry()
            .map(|e| e.flags)
            .unwrap_or_default())
    }

    /// 当前采样的字节数
    pub fn sample_size(&self) -> MexResult<Option<usize>> {
        Ok(self.container()?.current_entry().map(|e| e.size as usize))
    }

    /// 填充当前采样的加密信息
    ///
    /// 仅当当前采样带 `ENCRYPTED` 标志时写入 `info` 并返回 `true`.
    pub fn sample_crypto_info(&self, info: &mut CryptoInfo) -> MexResult<bool> {
        let Some(entry) = self.container()?.current_entry() else {
            return Ok(false);
        };
        match &entry.crypto {
            Some(crypto) if entry.flags.contains(SampleFlags::ENCRYPTED) => {
                info.clone_from(crypto);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    // ========================
    // 缓冲状态
    // ========================

    /// 已缓冲的可播放时长 (微秒)
    ///
    /// 数据源不报告缓冲状态 (本地文件, 内存) 时返回 `None`.
    pub fn cached_duration_us(&self) -> MexResult<Option<i64>> {
        Ok(self.container()?.cached_duration_us())
    }

    /// 数据源是否已到达流末尾 (不适用时为 `false`)
    pub fn has_cache_reached_end_of_stream(&self) -> MexResult<bool> {
        Ok(self
            .container()?
            .io
            .cache_status()
            .is_some_and(|s| s.reached_eos))
    }

    /// 释放数据源与索引 (幂等)
    ///
    /// 释放后除 `state` 与 `release` 外的所有操作返回 `UseAfterRelease`.
    pub fn release(&mut self) {
        if !matches!(self.slot, Slot::Released) {
            debug!("释放解封装实例");
            self.slot = Slot::Released;
        }
    }
}

impl Default for MediaExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl OpenedContainer {
    fn new(io: IoContext, opened: OpenedInput) -> Self {
        let heads = vec![0; opened.index.track_count()];
        Self {
            io,
            demuxer: opened.demuxer,
            format_id: opened.format_id,
            index: opened.index,
            selected: BTreeSet::new(),
            heads,
            current: None,
            exhausted: false,
        }
    }

    fn state(&self) -> ExtractorState {
        if self.exhausted {
            ExtractorState::Exhausted
        } else if self.selected.is_empty() {
            ExtractorState::Opened
        } else {
            ExtractorState::Selecting
        }
    }

    fn check_track(&self, track: usize) -> MexResult<u32> {
        let count = self.index.track_count();
        if track < count {
            Ok(track as u32)
        } else {
            Err(MexError::InvalidArgument(format!(
                "轨道索引 {track} 越界 (共 {count} 条轨道)"
            )))
        }
    }

    fn select(&mut self, track: usize) -> MexResult<()> {
        let t = self.check_track(track)?;
        if self.selected.insert(t) {
            debug!("选中轨道 #{t}, 已解析 {} 个采样", self.index.samples(t).len());
        }
        Ok(())
    }

    fn unselect(&mut self, track: usize) -> MexResult<()> {
        let t = self.check_track(track)?;
        if self.selected.remove(&t) && self.current.is_some_and(|c| c.track == t) {
            self.current = None;
        }
        Ok(())
    }

    fn current_entry(&self) -> Option<&SampleEntry> {
        self.current
            .and_then(|c| self.index.sample(c.track, c.row))
    }

    /// 某个选中轨道的队首尚未解析
    fn head_missing(&self, track: u32) -> bool {
        self.heads[track as usize] >= self.index.samples(track).len()
    }

    /// 执行一步延迟扩展
    ///
    /// 本次调用已用满 `max_steps` 时返回 `ExtendLimitReached`, 不再解析.
    fn extend_step(&mut self, steps: &mut usize, max_steps: Option<usize>) -> MexResult<bool> {
        if let Some(limit) = max_steps.filter(|&limit| *steps >= limit) {
            debug!("延迟扩展达到单次上限 {limit}, 已解析 {} 个采样", self.index.total_samples());
            return Err(MexError::ExtendLimitReached(limit));
        }
        *steps += 1;
        self.demuxer.extend(&mut self.io, &mut self.index)
    }

    /// 延迟扩展, 直到所有选中轨道的队首都已解析或索引完整
    fn fill_heads(&mut self, max_steps: Option<usize>) -> MexResult<()> {
        let mut steps = 0;
        while !self.index.is_complete() && self.selected.iter().any(|&t| self.head_missing(t)) {
            if !self.extend_step(&mut steps, max_steps)? {
                break;
            }
        }
        Ok(())
    }

    /// 延迟扩展, 直到轨道中已能确定定位目标或索引完整
    fn fill_for_seek(
        &mut self,
        track: u32,
        time_us: i64,
        mode: SeekMode,
        steps: &mut usize,
        max_steps: Option<usize>,
    ) -> MexResult<()> {
        while !self.index.is_complete() && seek_needs_more(self.index.samples(track), time_us, mode) {
            if !self.extend_step(steps, max_steps)? {
                break;
            }
        }
        Ok(())
    }

    /// 选中轨道队首中时间最早者, 同时间取轨道索引最小者
    fn earliest_head(&self) -> Option<Cursor> {
        self.selected
            .iter()
            .filter_map(|&track| {
                let row = self.heads[track as usize];
                self.index
                    .sample(track, row)
                    .map(|s| (s.time_us, Cursor { track, row }))
            })
            .min_by_key(|&(time, cursor)| (time, cursor.track))
            .map(|(_, cursor)| cursor)
    }

    /// 消费队首作为当前采样, 并检查其字节范围
    fn take_head(&mut self, cursor: Cursor) -> MexResult<()> {
        self.heads[cursor.track as usize] = cursor.row + 1;
        self.current = Some(cursor);

        let (Some(entry), Some(size)) = (self.current_entry(), self.io.size()) else {
            return Ok(());
        };
        if entry.end() > size {
            return Err(MexError::MalformedContainer(format!(
                "轨道 #{} 第 {} 个采样 [{}, {}) 越出数据源末尾 {size}",
                cursor.track,
                cursor.row,
                entry.offset,
                entry.end(),
            )));
        }
        Ok(())
    }

    fn advance(&mut self, max_steps: Option<usize>) -> MexResult<bool> {
        if self.exhausted {
            return Ok(false);
        }
        // 之后要么索引完整, 要么每个选中轨道的队首都已解析
        self.fill_heads(max_steps)?;
        match self.earliest_head() {
            Some(cursor) => {
                self.take_head(cursor)?;
                Ok(true)
            }
            None => {
                self.current = None;
                self.exhausted = true;
                Ok(false)
            }
        }
    }

    fn seek(&mut self, time_us: i64, mode: SeekMode, max_steps: Option<usize>) -> MexResult<()> {
        let tracks: Vec<u32> = self.selected.iter().copied().collect();
        let mut steps = 0;
        for &track in &tracks {
            self.fill_for_seek(track, time_us, mode, &mut steps, max_steps)?;
        }
        for &track in &tracks {
            let row = seek_row(self.index.samples(track), time_us, mode);
            self.heads[track as usize] = row;
            debug!("定位轨道 #{track} 到第 {row} 个采样 ({mode} @ {time_us}us)");
        }

        self.exhausted = false;
        self.current = None;
        match self.earliest_head() {
            Some(cursor) => self.take_head(cursor),
            None => Ok(()),
        }
    }

    fn read_sample_data(&mut self, buf: &mut [u8], offset: usize) -> MexResult<Option<usize>> {
        let Some(entry) = self.current_entry() else {
            return Ok(None);
        };
        let (at, size) = (entry.offset, entry.size as usize);

        if offset > buf.len() {
            return Err(MexError::InvalidArgument(format!(
                "写入偏移 {offset} 超出缓冲区长度 {}",
                buf.len()
            )));
        }
        let available = buf.len() - offset;
        if size > available {
            return Err(MexError::BufferTooSmall {
                needed: size,
                available,
            });
        }

        match self.io.read_exact_at(at, &mut buf[offset..offset + size]) {
            Ok(()) => Ok(Some(size)),
            Err(MexError::Eof) => Err(MexError::MalformedContainer(format!(
                "采样数据 [{at}, {}) 被截断",
                at + size as u64
            ))),
            Err(e) => Err(e),
        }
    }

    fn cached_duration_us(&self) -> Option<i64> {
        let status = self.io.cache_status()?;
        let tracks: Vec<u32> = if self.selected.is_empty() {
            (0..self.index.track_count() as u32).collect()
        } else {
            self.selected.iter().copied().collect()
        };

        let start = match self.current_entry() {
            Some(entry) => entry.time_us,
            None => tracks
                .iter()
                .filter_map(|&t| self.index.sample(t, self.heads[t as usize]))
                .map(|s| s.time_us)
                .min()
                .unwrap_or(0),
        };
        let end = tracks
            .iter()
            .flat_map(|&t| self.index.samples(t))
            .filter(|s| s.end() <= status.buffered_bytes)
            .map(|s| s.time_us)
            .max();

        Some(end.map_or(0, |end| (end - start).max(0)))
    }
}

/// 已解析的采样是否还不足以确定定位目标
fn seek_needs_more(samples: &[SampleEntry], time_us: i64, mode: SeekMode) -> bool {
    match mode {
        SeekMode::PreviousSync => samples.last().is_none_or(|s| s.time_us < time_us),
        SeekMode::NextSync | SeekMode::ClosestSync => !samples
            .iter()
            .any(|s| s.is_sync() && s.time_us >= time_us),
    }
}

/// 按定位模式在采样表中选出目标行
///
/// - `PreviousSync`: 时间 `<= t` 的最晚同步采样, 没有则为轨道起点
/// - `NextSync`: 时间 `>= t` 的最早同步采样, 没有则为轨道末尾
/// - `ClosestSync`: 距离最近的同步采样, 距离相等取较早者, 没有同步采样则为起点
fn seek_row(samples: &[SampleEntry], time_us: i64, mode: SeekMode) -> usize {
    let syncs = samples.iter().enumerate().filter(|(_, s)| s.is_sync());
    let found = match mode {
        SeekMode::PreviousSync => syncs
            .filter(|(_, s)| s.time_us <= time_us)
            .max_by_key(|&(row, s)| (s.time_us, Reverse(row))),
        SeekMode::NextSync => syncs
            .filter(|(_, s)| s.time_us >= time_us)
            .min_by_key(|&(row, s)| (s.time_us, row)),
        SeekMode::ClosestSync => {
            syncs.min_by_key(|&(row, s)| (s.time_us.abs_diff(time_us), s.time_us, row))
        }
    };
    match (found, mode) {
        (Some((row, _)), _) => row,
        (None, SeekMode::NextSync) => samples.len(),
        (None, _) => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(entries: &[(i64, bool)]) -> Vec<SampleEntry> {
        entries
            .iter()
            .enumerate()
            .map(|(i, &(time, sync))| SampleEntry::new(i as u64 * 10, 10, time, sync))
            .collect()
    }

    /// 单声道 16 位 8kHz PCM, 10000 帧 (3 个采样块)
    fn wav_bytes() -> Vec<u8> {
        let data_len = 20_000u32;
        let mut out = Vec::new();
        out.extend_from_slice(b"RIFF");
        out.extend_from_slice(&(36 + data_len).to_le_bytes());
        out.extend_from_slice(b"WAVEfmt ");
        out.extend_from_slice(&16u32.to_le_bytes());
        out.extend_from_slice(&1u16.to_le_bytes());
        out.extend_from_slice(&1u16.to_le_bytes());
        out.extend_from_slice(&8000u32.to_le_bytes());
        out.extend_from_slice(&16000u32.to_le_bytes());
        out.extend_from_slice(&2u16.to_le_bytes());
        out.extend_from_slice(&16u16.to_le_bytes());
        out.extend_from_slice(b"data");
        out.extend_from_slice(&data_len.to_le_bytes());
        out.extend((0..data_len).map(|i| (i % 251) as u8));
        out
    }

    fn opened() -> MediaExtractor {
        let mut extractor = MediaExtractor::new();
        extractor.set_data_source_bytes(wav_bytes()).unwrap();
        extractor
    }

    #[test]
    fn test_最近同步采样_距离相等取较早者() {
        let samples = table(&[(0, true), (2_000_000, false), (4_000_000, true), (6_000_000, true)]);
        assert_eq!(seek_row(&samples, 5_000_000, SeekMode::ClosestSync), 2);
        assert_eq!(seek_row(&samples, 5_500_000, SeekMode::ClosestSync), 3);
    }

    #[test]
    fn test_前后同步采样() {
        let samples = table(&[(0, true), (1_000, false), (2_000, true), (3_000, false)]);
        assert_eq!(seek_row(&samples, 1_500, SeekMode::PreviousSync), 0);
        assert_eq!(seek_row(&samples, 2_000, SeekMode::PreviousSync), 2);
        assert_eq!(seek_row(&samples, 1_500, SeekMode::NextSync), 2);
        // 之后没有同步采样: 定位到轨道末尾
        assert_eq!(seek_row(&samples, 2_500, SeekMode::NextSync), 4);
    }

    #[test]
    fn test_没有同步采样时回到起点() {
        let samples = table(&[(0, false), (1_000, false)]);
        assert_eq!(seek_row(&samples, 500, SeekMode::PreviousSync), 0);
        assert_eq!(seek_row(&samples, 500, SeekMode::ClosestSync), 0);
        assert_eq!(seek_row(&[], 500, SeekMode::ClosestSync), 0);
    }

    #[test]
    fn test_状态流转() {
        let mut extractor = MediaExtractor::new();
        assert_eq!(extractor.state(), ExtractorState::Unopened);
        assert!(matches!(
            extractor.track_count(),
            Err(MexError::InvalidArgument(_))
        ));

        extractor.set_data_source_bytes(wav_bytes()).unwrap();
        assert_eq!(extractor.state(), ExtractorState::Opened);
        assert_eq!(extractor.format_id().unwrap(), FormatId::Wav);

        extractor.select_track(0).unwrap();
        assert_eq!(extractor.state(), ExtractorState::Selecting);
        while extractor.advance().unwrap() {}
        assert_eq!(extractor.state(), ExtractorState::Exhausted);
        assert!(!extractor.advance().unwrap());

        extractor.seek_to(0, SeekMode::PreviousSync).unwrap();
        assert_eq!(extractor.state(), ExtractorState::Selecting);
        assert_eq!(extractor.sample_time().unwrap(), Some(0));

        extractor.release();
        extractor.release();
        assert_eq!(extractor.state(), ExtractorState::Released);
    }

    #[test]
    fn test_重复设置数据源() {
        let mut extractor = opened();
        let err = extractor.set_data_source_bytes(wav_bytes()).unwrap_err();
        assert!(matches!(err, MexError::InvalidArgument(_)));
    }

    #[test]
    fn test_选轨越界() {
        let mut extractor = opened();
        assert!(matches!(
            extractor.select_track(1),
            Err(MexError::InvalidArgument(_))
        ));
        assert!(extractor.selected_tracks().unwrap().is_empty());
    }

    #[test]
    fn test_首次推进前没有当前采样() {
        let mut extractor = opened();
        extractor.select_track(0).unwrap();
        assert_eq!(extractor.sample_time().unwrap(), None);
        assert_eq!(extractor.sample_track_index().unwrap(), None);
        assert!(extractor.sample_flags().unwrap().is_empty());

        let mut buf = [0xEEu8; 4];
        assert_eq!(extractor.read_sample_data(&mut buf, 0).unwrap(), None);
        assert_eq!(buf, [0xEE; 4]);
    }

    #[test]
    fn test_缓冲区不足() {
        let mut extractor = opened();
        extractor.select_track(0).unwrap();
        assert!(extractor.advance().unwrap());
        assert_eq!(extractor.sample_size().unwrap(), Some(8192));

        let mut buf = vec![0u8; 8192];
        let err = extractor.read_sample_data(&mut buf, 1).unwrap_err();
        assert!(matches!(
            err,
            MexError::BufferTooSmall {
                needed: 8192,
                available: 8191
            }
        ));
        assert_eq!(extractor.read_sample_data(&mut buf, 0).unwrap(), Some(8192));
        assert_eq!(&buf[..3], &[0, 1, 2]);
    }

    #[test]
    fn test_内存数据源不报告缓冲() {
        let extractor = opened();
        assert_eq!(extractor.cached_duration_us().unwrap(), None);
        assert!(!extractor.has_cache_reached_end_of_stream().unwrap());
        assert_eq!(extractor.pssh_info().unwrap(), None);
    }

    #[test]
    fn test_取消当前轨道() {
        let mut extractor = opened();
        extractor.select_track(0).unwrap();
        assert!(extractor.advance().unwrap());
        extractor.unselect_track(0).unwrap();
        extractor.unselect_track(0).unwrap();
        assert_eq!(extractor.sample_time().unwrap(), None);
        assert_eq!(extractor.state(), ExtractorState::Opened);
    }
}
