//! 分片 MP4 (moof) 解析.
//!
//! ```text
//! moof
//! ├── mfhd              分片序号
//! ├── pssh*             分片级保护系统头
//! └── traf              每个轨道一个
//!     ├── tfhd          轨道 ID 与默认值
//!     ├── tfdt          基准解码时间
//!     ├── trun*         采样大小/时长/标志/合成偏移
//!     ├── senc          逐采样 IV 与子采样布局
//!     └── saiz + saio   无 senc 时指向同样的信息
//! ```
//!
//! 解析结果先收集在 [`ParsedFragment`] 中, 整个 moof 读取成功后才提交到索引.

use std::io::SeekFrom;

use log::{debug, warn};
use mex_core::timestamp::ticks_to_us;
use mex_core::{MexError, MexResult};
use uuid::Uuid;

use super::boxes::{BoxType, read_box_header, read_full_box_header, read_versioned_u64};
use super::encryption::{
    AuxInfo, SencEntry, TrackEncryption, parse_pssh_box, parse_saio, parse_saiz, parse_senc,
};
use crate::index::SampleEntry;
use crate::io::IoContext;

// tfhd 标志
const TFHD_BASE_DATA_OFFSET: u32 = 0x00_0001;
const TFHD_SAMPLE_DESCRIPTION_INDEX: u32 = 0x00_0002;
const TFHD_DEFAULT_DURATION: u32 = 0x00_0008;
const TFHD_DEFAULT_SIZE: u32 = 0x00_0010;
const TFHD_DEFAULT_FLAGS: u32 = 0x00_0020;

// trun 标志
const TRUN_DATA_OFFSET: u32 = 0x00_0001;
const TRUN_FIRST_SAMPLE_FLAGS: u32 = 0x00_0004;
const TRUN_SAMPLE_DURATION: u32 = 0x00_0100;
const TRUN_SAMPLE_SIZE: u32 = 0x00_0200;
const TRUN_SAMPLE_FLAGS: u32 = 0x00_0400;
const TRUN_SAMPLE_CTS: u32 = 0x00_0800;

/// 采样标志中的 sample_is_non_sync_sample 位
const SAMPLE_FLAG_NON_SYNC: u32 = 0x0001_0000;

/// trex 中的轨道默认值
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct TrackDefaults {
    pub sample_description_index: u32,
    pub duration: u32,
    pub size: u32,
    pub flags: u32,
}

/// 解析 trex box 内容, 返回 (track_id, 默认值)
pub(crate) fn parse_trex(io: &mut IoContext) -> MexResult<(u32, TrackDefaults)> {
    let _ = read_full_box_header(io)?;
    let track_id = io.read_u32_be()?;
    let defaults = TrackDefaults {
        sample_description_index: io.read_u32_be()?,
        duration: io.read_u32_be()?,
        size: io.read_u32_be()?,
        flags: io.read_u32_be()?,
    };
    Ok((track_id, defaults))
}

/// 分片轨道上下文
#[derive(Debug, Clone)]
pub(crate) struct FragmentTrack {
    /// 容器内的轨道 ID
    pub track_id: u32,
    /// 索引中的轨道序号
    pub index: u32,
    /// 媒体时间刻度
    pub timescale: u32,
    /// trex 默认值
    pub defaults: TrackDefaults,
    /// 加密参数
    pub encryption: Option<TrackEncryption>,
    /// 下一个分片的默认起始解码时间 (无 tfdt 时使用)
    pub next_decode_time: u64,
}

/// 一个 moof 的解析结果
#[derive(Debug, Default)]
pub(crate) struct ParsedFragment {
    /// (轨道序号, 采样), 每个轨道内按解码顺序
    pub samples: Vec<(u32, SampleEntry)>,
    /// (轨道上下文下标, 分片末尾解码时间)
    pub decode_ends: Vec<(usize, u64)>,
    /// 分片级保护系统头
    pub pssh: Vec<(Uuid, Vec<u8>)>,
}

/// trun 中的单个采样
#[derive(Debug, Clone, Copy, Default)]
struct TrunSample {
    duration: Option<u32>,
    size: Option<u32>,
    flags: Option<u32>,
    cts: i64,
}

/// 一个 trun 的内容
#[derive(Debug, Default)]
struct TrackRun {
    data_offset: Option<i32>,
    first_sample_flags: Option<u32>,
    samples: Vec<TrunSample>,
}

/// tfhd 内容
#[derive(Debug, Default)]
struct FragmentHeader {
    track_id: u32,
    base_data_offset: Option<u64>,
    default_duration: Option<u32>,
    default_size: Option<u32>,
    default_flags: Option<u32>,
}

/// 解析 moof box, 不修改任何外部状态
pub(crate) fn parse_moof(
    io: &mut IoContext,
    moof_start: u64,
    moof_end: u64,
    tracks: &[FragmentTrack],
) -> MexResult<ParsedFragment> {
    let mut fragment = ParsedFragment::default();
    io.seek(SeekFrom::Start(moof_start))?;
    let header = read_box_header(io)?;
    if header.box_type != BoxType::Moof {
        return Err(MexError::MalformedContainer(format!(
            "偏移 {moof_start} 处期望 moof, 实际为 '{}'",
            header.box_type
        )));
    }

    while io.position() + 8 <= moof_end {
        let child = read_box_header(io)?;
        let child_end = child.end(moof_end).min(moof_end);
        match child.box_type {
            BoxType::Mfhd => {
                let _ = read_full_box_header(io)?;
                let sequence = io.read_u32_be()?;
                debug!("moof @{moof_start}: sequence={sequence}");
            }
            BoxType::Traf => parse_traf(io, child_end, moof_start, tracks, &mut fragment)?,
            BoxType::Pssh => fragment.pssh.push(parse_pssh_box(io, child_end)?),
            _ => {}
        }
        io.seek(SeekFrom::Start(child_end))?;
    }

    Ok(fragment)
}

fn parse_traf(
    io: &mut IoContext,
    traf_end: u64,
    moof_start: u64,
    tracks: &[FragmentTrack],
    out: &mut ParsedFragment,
) -> MexResult<()> {
    let mut tfhd: Option<FragmentHeader> = None;
    let mut base_decode_time: Option<u64> = None;
    let mut runs: Vec<TrackRun> = Vec::new();
    let mut senc: Vec<SencEntry> = Vec::new();
    let mut aux = AuxInfo::default();
    let mut slot: Option<usize> = None;

    while io.position() + 8 <= traf_end {
        let child = read_box_header(io)?;
        let child_end = child.end(traf_end).min(traf_end);
        match child.box_type {
            BoxType::Tfhd => {
                let header = parse_tfhd(io)?;
                slot = tracks.iter().position(|t| t.track_id == header.track_id);
                if slot.is_none() {
                    warn!("traf 引用未知轨道 ID {}, 跳过", header.track_id);
                    return Ok(());
                }
                tfhd = Some(header);
            }
            BoxType::Tfdt => {
                let (version, _) = read_full_box_header(io)?;
                base_decode_time = Some(read_versioned_u64(io, version)?);
            }
            BoxType::Trun => runs.push(parse_trun(io)?),
            BoxType::Senc => {
                let iv_size = slot
                    .and_then(|s| tracks[s].encryption.as_ref())
                    .map_or(0, |e| e.default_iv_size);
                senc = parse_senc(io, child_end, iv_size)?;
            }
            BoxType::Saiz | BoxType::Saio => {
                let scheme = slot
                    .and_then(|s| tracks[s].encryption.as_ref())
                    .map(|e| e.scheme);
                match (scheme, child.box_type) {
                    (Some(scheme), BoxType::Saiz) => {
                        parse_saiz(io, child_end, &scheme, &mut aux)?
                    }
                    (Some(scheme), _) => parse_saio(io, &scheme, &mut aux)?,
                    (None, _) => {}
                }
            }
            _ => {}
        }
        io.seek(SeekFrom::Start(child_end))?;
    }

    let (Some(tfhd), Some(slot)) = (tfhd, slot) else {
        return Err(MexError::MalformedContainer("traf 缺少 tfhd".into()));
    };
    let track = &tracks[slot];

    let base_offset = tfhd.base_data_offset.unwrap_or(moof_start);
    let protected = track.encryption.as_ref().filter(|e| e.default_is_protected);
    if let Some(enc) = protected.filter(|_| senc.is_empty() && aux.is_usable()) {
        senc = read_fragment_aux(io, &aux, base_offset, &runs, enc.default_iv_size)?;
    }
    let mut data_cursor = base_offset;
    let mut dts = base_decode_time.unwrap_or(track.next_decode_time);
    let mut sample_number = 0usize;

    for run in &runs {
        if let Some(offset) = run.data_offset {
            data_cursor = base_offset.checked_add_signed(i64::from(offset)).ok_or_else(|| {
                MexError::MalformedContainer(format!("trun 数据偏移 {offset} 越界"))
            })?;
        }
        for (i, sample) in run.samples.iter().enumerate() {
            let size = sample
                .size
                .or(tfhd.default_size)
                .unwrap_or(track.defaults.size);
            let duration = sample
                .duration
                .or(tfhd.default_duration)
                .unwrap_or(track.defaults.duration);
            let flags = match (i, run.first_sample_flags) {
                (0, Some(first)) => first,
                _ => sample
                    .flags
                    .or(tfhd.default_flags)
                    .unwrap_or(track.defaults.flags),
            };

            let pts = dts as i64 + sample.cts;
            let mut entry = SampleEntry::new(
                data_cursor,
                size,
                ticks_to_us(pts, track.timescale),
                flags & SAMPLE_FLAG_NON_SYNC == 0,
            );
            if let Some(enc) = protected {
                entry = entry.with_crypto(enc.sample_crypto_info(senc.get(sample_number))?);
            }
            out.samples.push((track.index, entry));

            data_cursor += u64::from(size);
            dts += u64::from(duration);
            sample_number += 1;
        }
    }

    if !senc.is_empty() && senc.len() != sample_number {
        warn!(
            "轨道 {}: senc 条目数 {} 与采样数 {} 不一致",
            track.track_id,
            senc.len(),
            sample_number
        );
    }
    out.decode_ends.push((slot, dts));
    Ok(())
}

/// 读取 saiz/saio 指向的逐采样加密信息
///
/// 偏移相对于分片的基准数据偏移. 偏移表只有一项时所有采样连续存放, 否则每个 trun 一项.
fn read_fragment_aux(
    io: &mut IoContext,
    aux: &AuxInfo,
    base_offset: u64,
    runs: &[TrackRun],
    iv_size: u8,
) -> MexResult<Vec<SencEntry>> {
    let sample_count: usize = runs.iter().map(|r| r.samples.len()).sum();
    let total = (aux.sample_count() as usize).min(sample_count);
    let resolve = |offset: u64| {
        base_offset.checked_add(offset).ok_or_else(|| {
            MexError::MalformedContainer(format!("saio 偏移 {offset} 越界"))
        })
    };
    if let [offset] = aux.offsets.as_slice() {
        return aux.read_run(io, resolve(*offset)?, 0, total, iv_size);
    }

    let mut entries = Vec::with_capacity(total.min(1 << 16));
    for (&offset, run) in aux.offsets.iter().zip(runs) {
        let count = run.samples.len().min(total - entries.len());
        if count == 0 {
            break;
        }
        let first = entries.len();
        entries.extend(aux.read_run(io, resolve(offset)?, first, count, iv_size)?);
    }
    Ok(entries)
}

fn parse_tfhd(io: &mut IoContext) -> MexResult<FragmentHeader> {
    let (_, flags) = read_full_box_header(io)?;
    let mut header = FragmentHeader {
        track_id: io.read_u32_be()?,
        ..FragmentHeader::default()
    };
    if flags & TFHD_BASE_DATA_OFFSET != 0 {
        header.base_data_offset = Some(io.read_u64_be()?);
    }
    if flags & TFHD_SAMPLE_DESCRIPTION_INDEX != 0 {
        let _ = io.read_u32_be()?;
    }
    if flags & TFHD_DEFAULT_DURATION != 0 {
        header.default_duration = Some(io.read_u32_be()?);
    }
    if flags & TFHD_DEFAULT_SIZE != 0 {
        header.default_size = Some(io.read_u32_be()?);
    }
    if flags & TFHD_DEFAULT_FLAGS != 0 {
        header.default_flags = Some(io.read_u32_be()?);
    }
    Ok(header)
}

fn parse_trun(io: &mut IoContext) -> MexResult<TrackRun> {
    let (version, flags) = read_full_box_header(io)?;
    let sample_count = io.read_u32_be()?;
    let mut run = TrackRun::default();

    if flags & TRUN_DATA_OFFSET != 0 {
        run.data_offset = Some(io.read_i32_be()?);
    }
    if flags & TRUN_FIRST_SAMPLE_FLAGS != 0 {
        run.first_sample_flags = Some(io.read_u32_be()?);
    }

    run.samples.reserve((sample_count as usize).min(1 << 16));
    for _ in 0..sample_count {
        let mut sample = TrunSample::default();
        if flags & TRUN_SAMPLE_DURATION != 0 {
            sample.duration = Some(io.read_u32_be()?);
        }
        if flags & TRUN_SAMPLE_SIZE != 0 {
            sample.size = Some(io.read_u32_be()?);
        }
        if flags & TRUN_SAMPLE_FLAGS != 0 {
            sample.flags = Some(io.read_u32_be()?);
        }
        if flags & TRUN_SAMPLE_CTS != 0 {
            sample.cts = if version == 0 {
                i64::from(io.read_u32_be()?)
            } else {
                i64::from(io.read_i32_be()?)
            };
        }
        run.samples.push(sample);
    }
    Ok(run)
}
