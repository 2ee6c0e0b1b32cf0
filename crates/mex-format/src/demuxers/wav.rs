//! WAV (RIFF WAVE) 适配器.
//!
//! WAV 文件结构:
//! ```text
//! RIFF header:  "RIFF" + file_size-8 + "WAVE"
//! fmt  chunk:   "fmt " + chunk_size + audio_format + channels + sample_rate
//!              + byte_rate + block_align + bits_per_sample
//! data chunk:   "data" + data_size + PCM samples...
//! ```
//!
//! 每个采样是 data 块中按块对齐切分的 4096 帧 (最后一段可能更短), 全部为同步采样.

use log::{debug, warn};
use mex_core::format::keys;
use mex_core::timestamp::ticks_to_us;
use mex_core::{FormatBag, MexError, MexResult};

use crate::demuxer::Demuxer;
use crate::format_id::FormatId;
use crate::index::{ContainerIndex, SampleEntry};
use crate::io::IoContext;
use crate::probe::{FormatProbe, ProbeScore, SCORE_EXTENSION, SCORE_MAX};

/// WAV 音频格式码
const WAV_FORMAT_PCM: u16 = 0x0001;
/// WAV IEEE 浮点格式码
const WAV_FORMAT_IEEE_FLOAT: u16 = 0x0003;
/// G.711 A-law
const WAV_FORMAT_ALAW: u16 = 0x0006;
/// G.711 mu-law
const WAV_FORMAT_MULAW: u16 = 0x0007;
/// WAVE_FORMAT_EXTENSIBLE, 真实格式码在子格式 GUID 的前 2 字节
const WAV_FORMAT_EXTENSIBLE: u16 = 0xFFFE;

/// 每个采样包含的帧数
const FRAMES_PER_SAMPLE: u64 = 4096;

/// Android `AudioFormat` 的 PCM 编码常量
const ENCODING_PCM_16BIT: i64 = 2;
const ENCODING_PCM_8BIT: i64 = 3;
const ENCODING_PCM_FLOAT: i64 = 4;
const ENCODING_PCM_24BIT_PACKED: i64 = 21;
const ENCODING_PCM_32BIT: i64 = 22;

/// fmt 块内容
#[derive(Debug, Clone, Copy, Default)]
struct WavFmt {
    audio_format: u16,
    channels: u16,
    sample_rate: u32,
    byte_rate: u32,
    block_align: u16,
    bits_per_sample: u16,
}

/// WAV 适配器
pub struct WavDemuxer;

impl WavDemuxer {
    /// 创建 WAV 适配器实例 (工厂函数)
    pub fn create() -> MexResult<Box<dyn Demuxer>> {
        Ok(Box::new(Self))
    }

    /// 根据格式码和位深确定 MIME 与 PCM 编码
    fn resolve_mime(fmt: &WavFmt) -> MexResult<(&'static str, Option<i64>)> {
        match fmt.audio_format {
            WAV_FORMAT_PCM => {
                let encoding = match fmt.bits_per_sample {
                    8 => ENCODING_PCM_8BIT,
                    16 => ENCODING_PCM_16BIT,
                    24 => ENCODING_PCM_24BIT_PACKED,
                    32 => ENCODING_PCM_32BIT,
                    bits => {
                        return Err(MexError::UnsupportedFormat(format!(
                            "不支持的 PCM 位深: {bits}"
                        )));
                    }
                };
                Ok(("audio/raw", Some(encoding)))
            }
            WAV_FORMAT_IEEE_FLOAT => match fmt.bits_per_sample {
                32 => Ok(("audio/raw", Some(ENCODING_PCM_FLOAT))),
                bits => Err(MexError::UnsupportedFormat(format!(
                    "不支持的浮点位深: {bits}"
                ))),
            },
            WAV_FORMAT_ALAW => Ok(("audio/g711-alaw", None)),
            WAV_FORMAT_MULAW => Ok(("audio/g711-mlaw", None)),
            other => Err(MexError::UnsupportedFormat(format!(
                "不支持的 WAV 格式码: 0x{other:04X}"
            ))),
        }
    }

    fn read_fmt(io: &mut IoContext, chunk_size: u64) -> MexResult<WavFmt> {
        if chunk_size < 16 {
            return Err(MexError::MalformedContainer(
                "fmt 块大小不足 16 字节".into(),
            ));
        }
        let mut fmt = WavFmt {
            audio_format: io.read_u16_le()?,
            channels: io.read_u16_le()?,
            sample_rate: io.read_u32_le()?,
            byte_rate: io.read_u32_le()?,
            block_align: io.read_u16_le()?,
            bits_per_sample: io.read_u16_le()?,
        };
        let mut consumed = 16u64;

        if fmt.audio_format == WAV_FORMAT_EXTENSIBLE && chunk_size >= 40 {
            // cbSize + validBits + channelMask + SubFormat GUID
            io.skip(8)?;
            fmt.audio_format = io.read_u16_le()?;
            consumed += 10;
        }
        if chunk_size > consumed {
            io.skip(chunk_size - consumed)?;
        }

        debug!(
            "fmt: format={}, channels={}, rate={}, block_align={}, bits={}",
            fmt.audio_format, fmt.channels, fmt.sample_rate, fmt.block_align, fmt.bits_per_sample,
        );
        Ok(fmt)
    }

    fn build_format(fmt: &WavFmt, total_frames: u64) -> MexResult<FormatBag> {
        let (mime, encoding) = Self::resolve_mime(fmt)?;
        let mut format = FormatBag::with_mime(mime);
        format.set_int(keys::SAMPLE_RATE, i64::from(fmt.sample_rate));
        format.set_int(keys::CHANNEL_COUNT, i64::from(fmt.channels));
        format.set_int(keys::BITS_PER_SAMPLE, i64::from(fmt.bits_per_sample));
        format.set_int(keys::BIT_RATE, i64::from(fmt.byte_rate) * 8);
        format.set_int(
            keys::DURATION_US,
            ticks_to_us(total_frames as i64, fmt.sample_rate),
        );
        format.set_int(
            keys::MAX_INPUT_SIZE,
            (u64::from(fmt.block_align) * FRAMES_PER_SAMPLE) as i64,
        );
        if let Some(encoding) = encoding {
            format.set_int(keys::PCM_ENCODING, encoding);
        }
        Ok(format)
    }
}

impl Demuxer for WavDemuxer {
    fn format_id(&self) -> FormatId {
        FormatId::Wav
    }

    fn name(&self) -> &str {
        "wav"
    }

    fn open(&mut self, io: &mut IoContext) -> MexResult<ContainerIndex> {
        // 读取 RIFF 头
        let riff_tag = io.read_tag()?;
        if &riff_tag != b"RIFF" {
            return Err(MexError::MalformedContainer("不是有效的 RIFF 文件".into()));
        }

        let _file_size = io.read_u32_le()?;

        let wave_tag = io.read_tag()?;
        if &wave_tag != b"WAVE" {
            return Err(MexError::MalformedContainer("不是有效的 WAVE 文件".into()));
        }

        debug!("检测到 RIFF/WAVE 文件");

        // 解析各 chunk, 直到 data 块
        let mut fmt: Option<WavFmt> = None;
        let (data_offset, declared_size) = loop {
            let chunk_id = match io.read_tag() {
                Ok(tag) => tag,
                Err(MexError::Eof) => {
                    return Err(MexError::MalformedContainer("未找到 data 块".into()));
                }
                Err(e) => return Err(e),
            };
            let chunk_size = u64::from(io.read_u32_le()?);

            match &chunk_id {
                b"fmt " => fmt = Some(Self::read_fmt(io, chunk_size)?),
                b"data" => {
                    if fmt.is_none() {
                        return Err(MexError::MalformedContainer(
                            "data 块出现在 fmt 块之前".into(),
                        ));
                    }
                    break (io.position(), chunk_size);
                }
                _ => {
                    warn!(
                        "跳过未知块: '{}', 大小={}",
                        String::from_utf8_lossy(&chunk_id),
                        chunk_size
                    );
                    io.skip(chunk_size)?;
                }
            }

            // WAV 块要求偶数对齐, 奇数大小需要跳过 1 个填充字节
            if chunk_size % 2 != 0 {
                io.skip(1)?;
            }
        };

        let fmt = fmt.ok_or_else(|| MexError::MalformedContainer("未找到 fmt 块".into()))?;
        if fmt.block_align == 0 || fmt.sample_rate == 0 || fmt.channels == 0 {
            return Err(MexError::MalformedContainer(format!(
                "fmt 参数无效: block_align={}, rate={}, channels={}",
                fmt.block_align, fmt.sample_rate, fmt.channels
            )));
        }

        // data 大小为 0 或 0xFFFFFFFF (流式录制) 时, 或超出数据源大小时, 以数据源为准
        let available = io.size().map(|size| size.saturating_sub(data_offset));
        let data_size = match (declared_size, available) {
            (0 | 0xFFFF_FFFF, Some(avail)) => avail,
            (declared, Some(avail)) if declared > avail => {
                warn!("data 块声明 {declared} 字节, 数据源仅剩 {avail} 字节, 按实际大小截断");
                avail
            }
            (declared, _) => declared,
        };

        let block_align = u64::from(fmt.block_align);
        let total_frames = data_size / block_align;
        let format = Self::build_format(&fmt, total_frames)?;

        let mut index = ContainerIndex::new(FormatBag::with_mime(FormatId::Wav.mime()));
        let track = index.add_track(format)?;

        let chunk_bytes = block_align * FRAMES_PER_SAMPLE;
        let aligned_size = total_frames * block_align;
        let mut pos = 0u64;
        while pos < aligned_size {
            let size = chunk_bytes.min(aligned_size - pos);
            let frame = (pos / block_align) as i64;
            index.push_sample(
                track,
                SampleEntry::new(
                    data_offset + pos,
                    size as u32,
                    ticks_to_us(frame, fmt.sample_rate),
                    true,
                ),
            )?;
            pos += size;
        }
        index.set_complete();

        debug!(
            "WAV 打开完成: {} Hz, {} 声道, {} 位, 总帧数={}, 采样数={}",
            fmt.sample_rate,
            fmt.channels,
            fmt.bits_per_sample,
            total_frames,
            index.samples(track).len(),
        );

        Ok(index)
    }
}

/// WAV 格式探测器
pub struct WavProbe;

impl FormatProbe for WavProbe {
    fn probe(&self, data: &[u8], filename: Option<&str>) -> Option<ProbeScore> {
        // 检查 RIFF/WAVE 魔数
        if data.len() >= 12 && &data[0..4] == b"RIFF" && &data[8..12] == b"WAVE" {
            return Some(SCORE_MAX);
        }

        // 仅根据扩展名
        if let Some(name) = filename {
            let lower = name.to_ascii_lowercase();
            if lower.ends_with(".wav") || lower.ends_with(".wave") {
                return Some(SCORE_EXTENSION);
            }
        }

        None
    }

    fn format_id(&self) -> FormatId {
        FormatId::Wav
    }
}

/// 构建 WAV 测试数据
#[cfg(test)]
pub(crate) fn make_wav(channels: u16, sample_rate: u32, bits: u16, pcm_data: &[u8]) -> Vec<u8> {
    let data_size = pcm_data.len() as u32;
    let block_align = channels * (bits / 8);
    let byte_rate = sample_rate * u32::from(block_align);

    let mut buf = Vec::new();
    buf.extend_from_slice(b"RIFF");
    buf.extend_from_slice(&(36 + data_size).to_le_bytes());
    buf.extend_from_slice(b"WAVE");
    buf.extend_from_slice(b"fmt ");
    buf.extend_from_slice(&16u32.to_le_bytes());
    buf.extend_from_slice(&WAV_FORMAT_PCM.to_le_bytes());
    buf.extend_from_slice(&channels.to_le_bytes());
    buf.extend_from_slice(&sample_rate.to_le_bytes());
    buf.extend_from_slice(&byte_rate.to_le_bytes());
    buf.extend_from_slice(&block_align.to_le_bytes());
    buf.extend_from_slice(&bits.to_le_bytes());
    buf.extend_from_slice(b"data");
    buf.extend_from_slice(&data_size.to_le_bytes());
    buf.extend_from_slice(pcm_data);
    buf
}
