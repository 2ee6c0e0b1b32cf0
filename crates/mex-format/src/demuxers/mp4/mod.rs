//! MP4/MOV (ISO Base Media File Format) 适配器.
//!
//! 支持普通 MP4, QuickTime MOV, 以及分片 MP4 (fMP4/CMAF) 和通用加密 (CENC).
//! 基于 ISO 14496-12 (ISOBMFF) 与 ISO 23001-7 标准.
//!
//! # Box 树结构
//! ```text
//! ftyp                  文件类型
//! moov                  影片元数据
//! ├── mvhd              影片头部 (时长, 时间刻度)
//! ├── mvex              存在时为分片 MP4
//! │   ├── mehd          分片总时长
//! │   └── trex          轨道默认值
//! ├── pssh              保护系统头
//! └── trak              轨道 (每个音/视频流一个)
//!     ├── tkhd          轨道头部
//!     └── mdia          媒体信息
//!         ├── mdhd      媒体头部 (时间刻度, 时长, 语言)
//!         ├── hdlr      处理器引用 (vide/soun)
//!         └── minf      媒体详细信息
//!             └── stbl  采样表 (加密轨道可含 saiz/saio)
//! moof                  影片分片 (延迟解析)
//! mdat                  媒体数据
//! ```
//!
//! 普通 MP4 在打开时一次性构建完整索引. 分片 MP4 打开时只解析 moov,
//! 之后每次扩展解析下一个 moof.

mod boxes;
mod encryption;
mod fragment;
mod sample_entry;
mod sample_table;

use std::io::SeekFrom;

use log::{debug, info, warn};
use mex_core::format::keys;
use mex_core::timestamp::ticks_to_us;
use mex_core::{FormatBag, MexError, MexResult, PsshInfo};

use crate::demuxer::Demuxer;
use crate::format_id::FormatId;
use crate::index::ContainerIndex;
use crate::io::IoContext;
use crate::probe::{FormatProbe, ProbeScore, SCORE_EXTENSION, SCORE_MAX, SCORE_MIME};

use self::boxes::{BoxType, FtypBox, read_box_header, read_full_box_header, read_versioned_u64};
use self::encryption::{
    AuxInfo, SencEntry, TrackEncryption, parse_pssh_box, parse_saio, parse_saiz,
};
use self::fragment::{FragmentTrack, ParsedFragment, TrackDefaults, parse_moof, parse_trex};
use self::sample_entry::SampleDescription;
use self::sample_table::SampleTable;

/// 轨道解析中间结果
#[derive(Default)]
struct TrakInfo {
    track_id: u32,
    timescale: u32,
    duration: u64,
    handler: [u8; 4],
    language: Option<String>,
    tkhd_width: u32,
    tkhd_height: u32,
    description: Option<SampleDescription>,
    table: SampleTable,
    aux: AuxInfo,
}

/// moov 解析中间结果
#[derive(Default)]
struct MovieInfo {
    timescale: u32,
    duration: u64,
    fragment_duration: Option<u64>,
    has_mvex: bool,
    trex: Vec<(u32, TrackDefaults)>,
    traks: Vec<TrakInfo>,
}

/// MP4 适配器
pub struct Mp4Demuxer {
    /// 分片轨道上下文 (仅分片 MP4)
    tracks: Vec<FragmentTrack>,
    /// 是否为分片 MP4
    fragmented: bool,
    /// 下一个待扫描的顶层 box 偏移
    next_box: u64,
    /// 已收集的保护系统头
    pssh: PsshInfo,
}

impl Mp4Demuxer {
    /// 创建 MP4 适配器实例 (工厂函数)
    pub fn create() -> MexResult<Box<dyn Demuxer>> {
        Ok(Box::new(Self::new()))
    }

    fn new() -> Self {
        Self {
            tracks: Vec::new(),
            fragmented: false,
            next_box: 0,
            pssh: PsshInfo::new(),
        }
    }

    /// 解析 moov box 内容
    fn parse_moov(&mut self, io: &mut IoContext, moov_end: u64) -> MexResult<MovieInfo> {
        let mut movie = MovieInfo {
            timescale: 1000,
            ..MovieInfo::default()
        };

        while io.position() + 8 <= moov_end {
            let header = read_box_header(io)?;
            let box_end = header.end(moov_end).min(moov_end);

            match header.box_type {
                BoxType::Mvhd => Self::parse_mvhd(io, &mut movie)?,
                BoxType::Mvex => Self::parse_mvex(io, box_end, &mut movie)?,
                BoxType::Trak => {
                    let mut trak = TrakInfo::default();
                    Self::parse_trak_boxes(io, box_end, &mut trak)?;
                    movie.traks.push(trak);
                }
                BoxType::Pssh => {
                    let (system_id, data) = parse_pssh_box(io, box_end)?;
                    self.pssh.push(system_id, data);
                }
                _ => {}
            }

            // 跳到下一个 box
            io.seek(SeekFrom::Start(box_end))?;
        }

        Ok(movie)
    }

    /// 解析 mvhd (Movie Header Box)
    fn parse_mvhd(io: &mut IoContext, movie: &mut MovieInfo) -> MexResult<()> {
        let (version, _) = read_full_box_header(io)?;
        let _creation_time = read_versioned_u64(io, version)?;
        let _modification_time = read_versioned_u64(io, version)?;
        movie.timescale = io.read_u32_be()?;
        movie.duration = read_versioned_u64(io, version)?;
        debug!(
            "mvhd: timescale={}, duration={}",
            movie.timescale, movie.duration
        );
        Ok(())
    }

    /// 解析 mvex (Movie Extends Box)
    fn parse_mvex(io: &mut IoContext, end: u64, movie: &mut MovieInfo) -> MexResult<()> {
        movie.has_mvex = true;
        while io.position() + 8 <= end {
            let header = read_box_header(io)?;
            let box_end = header.end(end).min(end);
            match header.box_type {
                BoxType::Mehd => {
                    let (version, _) = read_full_box_header(io)?;
                    movie.fragment_duration = Some(read_versioned_u64(io, version)?);
                }
                BoxType::Trex => movie.trex.push(parse_trex(io)?),
                _ => {}
            }
            io.seek(SeekFrom::Start(box_end))?;
        }
        Ok(())
    }

    /// 递归解析 trak 内部的 box
    fn parse_trak_boxes(io: &mut IoContext, end: u64, trak: &mut TrakInfo) -> MexResult<()> {
        while io.position() + 8 <= end {
            let header = read_box_header(io)?;
            let box_end = header.end(end).min(end);

            match header.box_type {
                BoxType::Tkhd => Self::parse_tkhd(io, trak)?,
                BoxType::Mdia | BoxType::Minf | BoxType::Stbl => {
                    // 容器 box, 递归解析
                    Self::parse_trak_boxes(io, box_end, trak)?;
                }
                BoxType::Mdhd => Self::parse_mdhd(io, trak)?,
                BoxType::Hdlr => {
                    let _ = read_full_box_header(io)?;
                    let _pre_defined = io.read_u32_be()?;
                    trak.handler = io.read_tag()?;
                }
                BoxType::Stsd => {
                    trak.description = SampleDescription::parse_stsd(io, box_end)?;
                }
                BoxType::Stts => trak.table.parse_stts(io)?,
                BoxType::Stsc => trak.table.parse_stsc(io)?,
                BoxType::Stsz => trak.table.parse_stsz(io)?,
                BoxType::Stco => trak.table.parse_stco(io, false)?,
                BoxType::Co64 => trak.table.parse_stco(io, true)?,
                BoxType::Stss => trak.table.parse_stss(io)?,
                BoxType::Ctts => trak.table.parse_ctts(io)?,
                BoxType::Saiz | BoxType::Saio => {
                    let scheme = trak
                        .description
                        .as_ref()
                        .and_then(|d| d.encryption.as_ref())
                        .map(|e| e.scheme);
                    match (scheme, header.box_type) {
                        (Some(scheme), BoxType::Saiz) => {
                            parse_saiz(io, box_end, &scheme, &mut trak.aux)?
                        }
                        (Some(scheme), _) => parse_saio(io, &scheme, &mut trak.aux)?,
                        (None, _) => {}
                    }
                }
                _ => {}
            }

            io.seek(SeekFrom::Start(box_end))?;
        }
        Ok(())
    }

    /// 解析 tkhd (Track Header Box)
    fn parse_tkhd(io: &mut IoContext, trak: &mut TrakInfo) -> MexResult<()> {
        let (version, _) = read_full_box_header(io)?;
        let _creation = read_versioned_u64(io, version)?;
        let _modification = read_versioned_u64(io, version)?;
        trak.track_id = io.read_u32_be()?;
        let _reserved = io.read_u32_be()?;
        let _duration = read_versioned_u64(io, version)?;

        io.skip(8)?; // reserved
        io.skip(8)?; // layer, alternate_group, volume, reserved
        io.skip(36)?; // matrix

        // 宽高 (16.16 定点数)
        trak.tkhd_width = io.read_u32_be()? >> 16;
        trak.tkhd_height = io.read_u32_be()? >> 16;
        Ok(())
    }

    /// 解析 mdhd (Media Header Box)
    fn parse_mdhd(io: &mut IoContext, trak: &mut TrakInfo) -> MexResult<()> {
        let (version, _) = read_full_box_header(io)?;
        let _creation = read_versioned_u64(io, version)?;
        let _modification = read_versioned_u64(io, version)?;
        trak.timescale = io.read_u32_be()?;
        trak.duration = read_versioned_u64(io, version)?;
        trak.language = decode_language(io.read_u16_be()?);
        Ok(())
    }

    /// 根据轨道信息构建格式描述
    fn build_track_format(trak: &TrakInfo, desc: &SampleDescription, duration_us: i64) -> FormatBag {
        let mime = match (desc.mime(), &trak.handler) {
            ("application/octet-stream", b"text" | b"sbtl" | b"subt") => "text/plain",
            (mime, _) => mime,
        };
        let mut format = FormatBag::with_mime(mime);
        format.set_int(keys::TRACK_ID, i64::from(trak.track_id));
        if duration_us > 0 {
            format.set_int(keys::DURATION_US, duration_us);
        }

        match &trak.handler {
            b"vide" => {
                let width = if desc.width > 0 { desc.width } else { trak.tkhd_width };
                let height = if desc.height > 0 {
                    desc.height
                } else {
                    trak.tkhd_height
                };
                format.set_int(keys::WIDTH, i64::from(width));
                format.set_int(keys::HEIGHT, i64::from(height));
            }
            b"soun" => {
                format.set_int(keys::SAMPLE_RATE, i64::from(desc.sample_rate));
                format.set_int(keys::CHANNEL_COUNT, i64::from(desc.channel_count));
            }
            _ => {}
        }

        if let Some(csd) = &desc.codec_config {
            format.set_bytes(keys::CSD_0, csd.clone());
        }
        let max_size = trak.table.max_sample_size();
        if max_size > 0 {
            format.set_int(keys::MAX_INPUT_SIZE, i64::from(max_size));
        }
        if let Some(language) = &trak.language {
            format.set_str(keys::LANGUAGE, language.clone());
        }
        if let Some(enc) = &desc.encryption {
            enc.apply_to_format(&mut format);
        }
        format
    }

    /// 读取 stbl 中 saiz/saio 指向的逐采样加密信息
    ///
    /// 偏移表只有一项时所有采样连续存放, 否则每块一项.
    fn load_aux_entries(
        io: &mut IoContext,
        trak: &TrakInfo,
        enc: &TrackEncryption,
    ) -> MexResult<Vec<SencEntry>> {
        let aux = &trak.aux;
        if !aux.is_usable() {
            return Ok(Vec::new());
        }
        let total = aux.sample_count().min(trak.table.checked_sample_count()?) as usize;
        if let [offset] = aux.offsets.as_slice() {
            return aux.read_run(io, *offset, 0, total, enc.default_iv_size);
        }

        let mut entries = Vec::with_capacity(total.min(1 << 16));
        for (&offset, per_chunk) in aux.offsets.iter().zip(trak.table.samples_per_chunk()) {
            let count = (per_chunk as usize).min(total - entries.len());
            if count == 0 {
                break;
            }
            let first = entries.len();
            entries.extend(aux.read_run(io, offset, first, count, enc.default_iv_size)?);
        }
        Ok(entries)
    }

    /// 由 moov 解析结果构建索引
    fn build_index(&mut self, io: &mut IoContext, movie: MovieInfo) -> MexResult<ContainerIndex> {
        let mut file_format = FormatBag::with_mime(FormatId::Mp4.mime());
        let movie_duration = movie.fragment_duration.unwrap_or(movie.duration);
        let movie_duration_us = ticks_to_us(movie_duration as i64, movie.timescale);
        if movie_duration_us > 0 {
            file_format.set_int(keys::DURATION_US, movie_duration_us);
        }
        let mut index = ContainerIndex::new(file_format);

        for trak in &movie.traks {
            let Some(desc) = &trak.description else {
                warn!("MP4: 轨道 id={} 缺少采样描述, 跳过", trak.track_id);
                continue;
            };
            let timescale = if trak.timescale > 0 { trak.timescale } else { movie.timescale };
            let mut duration_us = ticks_to_us(trak.duration as i64, timescale);
            if duration_us <= 0 && movie.has_mvex {
                duration_us = movie_duration_us;
            }

            let format = Self::build_track_format(trak, desc, duration_us);
            let aux = match desc.encryption.as_ref().filter(|e| e.default_is_protected) {
                Some(enc) => Self::load_aux_entries(io, trak, enc)
                    .map_err(|e| truncated_as_malformed(e, "采样辅助信息"))?,
                None => Vec::new(),
            };
            let entries = trak
                .table
                .build_entries(timescale, desc.encryption.as_ref(), &aux)?;
            let track_index = index.add_track(format)?;

            debug!(
                "MP4: 轨道 #{} (id={}): {}, timescale={}, samples={}",
                track_index,
                trak.track_id,
                desc.mime(),
                timescale,
                entries.len(),
            );
            let next_decode_time = trak.table.total_duration();
            index.extend_samples(track_index, entries)?;

            if movie.has_mvex {
                let defaults = movie
                    .trex
                    .iter()
                    .find(|(id, _)| *id == trak.track_id)
                    .map(|(_, d)| *d)
                    .unwrap_or_default();
                self.tracks.push(FragmentTrack {
                    track_id: trak.track_id,
                    index: track_index,
                    timescale,
                    defaults,
                    encryption: desc.encryption.clone(),
                    next_decode_time,
                });
            }
        }

        if index.track_count() == 0 {
            return Err(MexError::MalformedContainer(
                "MP4 文件中未找到任何轨道".into(),
            ));
        }

        self.fragmented = movie.has_mvex;
        self.sync_pssh(&mut index)?;
        Ok(index)
    }

    /// 把已收集的保护系统头写入容器格式描述
    fn sync_pssh(&self, index: &mut ContainerIndex) -> MexResult<()> {
        if !self.pssh.is_empty() {
            index
                .file_format_mut()
                .set_bytes(keys::PSSH, self.pssh.to_bytes()?);
        }
        Ok(())
    }

    /// 提交一个已完整解析的分片
    fn commit_fragment(&mut self, fragment: ParsedFragment, index: &mut ContainerIndex) -> MexResult<()> {
        let count = fragment.samples.len();
        for (track, entry) in fragment.samples {
            index.push_sample(track, entry)?;
        }
        for (slot, decode_end) in fragment.decode_ends {
            let Some(track) = self.tracks.get_mut(slot) else {
                continue;
            };
            track.next_decode_time = decode_end;
            let end_us = ticks_to_us(decode_end as i64, track.timescale);
            if let Some(format) = index.track_format_mut(track.index) {
                let current = format.get_int(keys::DURATION_US).unwrap_or(0);
                if end_us > current {
                    format.set_int(keys::DURATION_US, end_us);
                }
            }
        }
        if !fragment.pssh.is_empty() {
            for (system_id, data) in fragment.pssh {
                self.pssh.push(system_id, data);
            }
            self.sync_pssh(index)?;
        }
        debug!("MP4: 提交分片 @{}, {} 个采样", self.next_box, count);
        Ok(())
    }
}

/// 解码 mdhd 中的 ISO 639-2/T 语言码 (3 个 5 位字符)
fn decode_language(packed: u16) -> Option<String> {
    if packed == 0 || packed == 0x7FFF {
        return None;
    }
    let chars: String = [10, 5, 0]
        .iter()
        .map(|shift| char::from((((packed >> shift) & 0x1F) as u8) + 0x60))
        .collect();
    chars.chars().all(|c| c.is_ascii_lowercase()).then_some(chars)
}

/// 把 moov 内部的截断映射为结构损坏
fn truncated_as_malformed(err: MexError, what: &str) -> MexError {
    match err {
        MexError::Eof => MexError::MalformedContainer(format!("{what} 被截断")),
        other => other,
    }
}

impl Demuxer for Mp4Demuxer {
    fn format_id(&self) -> FormatId {
        FormatId::Mp4
    }

    fn name(&self) -> &str {
        "mp4"
    }

    fn open(&mut self, io: &mut IoContext) -> MexResult<ContainerIndex> {
        // 扫描顶层 box, 直到 moov
        let file_size = io.size();

        loop {
            let pos = io.position();
            if file_size.is_some_and(|size| pos >= size) {
                break;
            }

            let header = match read_box_header(io) {
                Ok(h) => h,
                Err(MexError::Eof) => break,
                Err(e) => return Err(e),
            };
            let box_end = header.end(file_size.unwrap_or(u64::MAX));

            match header.box_type {
                BoxType::Ftyp => {
                    let ftyp = FtypBox::parse(io, box_end - header.content_start())?;
                    debug!("MP4: ftyp major_brand={}", ftyp.major_brand_str());
                }
                BoxType::Moov => {
                    let movie = self
                        .parse_moov(io, box_end)
                        .map_err(|e| truncated_as_malformed(e, "moov"))?;
                    let mut index = self.build_index(io, movie)?;
                    self.next_box = box_end;
                    info!(
                        "打开 MP4: {} 个轨道{}",
                        index.track_count(),
                        if self.fragmented { " (分片)" } else { "" },
                    );
                    if !self.fragmented {
                        index.set_complete();
                    }
                    return Ok(index);
                }
                _ => {
                    if header.size == 0 {
                        break;
                    }
                }
            }

            io.seek(SeekFrom::Start(box_end))?;
        }

        Err(MexError::MalformedContainer("MP4 文件中未找到 moov".into()))
    }

    fn extend(&mut self, io: &mut IoContext, index: &mut ContainerIndex) -> MexResult<bool> {
        if !self.fragmented || index.is_complete() {
            index.set_complete();
            return Ok(false);
        }

        loop {
            let pos = self.next_box;
            if io.size().is_some_and(|size| pos >= size) {
                index.set_complete();
                return Ok(false);
            }

            io.seek(SeekFrom::Start(pos))?;
            let header = match read_box_header(io) {
                Ok(h) => h,
                Err(MexError::Eof) => {
                    index.set_complete();
                    return Ok(false);
                }
                Err(e) => return Err(e),
            };

            match header.box_type {
                BoxType::Moof if header.size > 0 => {
                    let box_end = header.end(u64::MAX);
                    let fragment = parse_moof(io, pos, box_end, &self.tracks)
                        .map_err(|e| truncated_as_malformed(e, "moof"))?;
                    self.commit_fragment(fragment, index)?;
                    self.next_box = box_end;
                    return Ok(true);
                }
                BoxType::Mfra => {
                    index.set_complete();
                    return Ok(false);
                }
                _ if header.size == 0 => {
                    // 延伸到末尾的 box 之后不会再有分片
                    index.set_complete();
                    return Ok(false);
                }
                _ => self.next_box = header.end(u64::MAX),
            }
        }
    }
}

/// MP4 格式探测器
pub struct Mp4Probe;

impl FormatProbe for Mp4Probe {
    fn probe(&self, data: &[u8], filename: Option<&str>) -> Option<ProbeScore> {
        if data.len() >= 8 {
            match &data[4..8] {
                b"ftyp" => return Some(SCORE_MAX),
                // 某些文件没有 ftyp, 或从分段 (styp/moof) 开始
                b"moov" | b"mdat" | b"free" | b"wide" | b"skip" | b"styp" | b"moof"
                | b"sidx" => return Some(SCORE_MIME),
                _ => {}
            }
        }

        if FormatId::Mp4.matches_filename(filename) {
            return Some(SCORE_EXTENSION);
        }

        None
    }

    fn format_id(&self) -> FormatId {
        FormatId::Mp4
    }
}
