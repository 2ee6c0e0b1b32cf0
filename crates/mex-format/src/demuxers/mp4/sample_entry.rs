//! 采样描述 (stsd) 解析.
//!
//! 只解析第一个采样条目. 加密条目 (encv/enca) 通过 sinf/frma
//! 还原为原始格式, 加密参数随描述一起返回.

use std::io::SeekFrom;

use log::debug;
use mex_core::{MediaType, MexResult};

use super::boxes::{BoxType, read_box_header, read_full_box_header};
use super::encryption::{TrackEncryption, parse_sinf};
use crate::io::IoContext;

/// 采样描述
#[derive(Debug, Default)]
pub(crate) struct SampleDescription {
    /// 采样条目格式 (加密条目为还原后的原始格式)
    pub fourcc: [u8; 4],
    /// 视频宽度
    pub width: u32,
    /// 视频高度
    pub height: u32,
    /// 音频采样率
    pub sample_rate: u32,
    /// 声道数
    pub channel_count: u32,
    /// 编解码器私有数据 (avcC, hvcC, AudioSpecificConfig 等)
    pub codec_config: Option<Vec<u8>>,
    /// esds 中的 objectTypeIndication
    pub object_type: Option<u8>,
    /// 加密参数
    pub encryption: Option<TrackEncryption>,
}

impl SampleDescription {
    /// 编解码器 MIME 类型
    pub fn mime(&self) -> &'static str {
        match (&self.fourcc, self.object_type) {
            // MPEG-1/2 Audio Layer III 以 mp4a 封装
            (b"mp4a", Some(0x69 | 0x6B)) => "audio/mpeg",
            (fourcc, _) => fourcc_to_mime(fourcc),
        }
    }

    /// 解析 stsd box 内容
    pub fn parse_stsd(io: &mut IoContext, box_end: u64) -> MexResult<Option<Self>> {
        let _ = read_full_box_header(io)?;
        let entry_count = io.read_u32_be()?;

        if entry_count == 0 {
            return Ok(None);
        }

        // 只解析第一个条目
        let entry = read_box_header(io)?;
        let entry_end = entry.end(box_end).min(box_end);
        let entry_format = match entry.box_type {
            BoxType::Unknown(fourcc) => fourcc,
            _ => *b"????",
        };

        let mut desc = Self {
            fourcc: entry_format,
            ..Self::default()
        };

        // 跳过保留字段 (6 bytes) + data_reference_index (2 bytes)
        io.skip(6)?;
        let _data_ref_idx = io.read_u16_be()?;

        match entry_layout(&entry_format) {
            MediaType::Video => desc.parse_video_sample_entry(io, entry_end)?,
            MediaType::Audio => desc.parse_audio_sample_entry(io, entry_end)?,
            _ => {}
        }

        if entry_count > 1 {
            debug!("stsd 含 {entry_count} 个条目, 只使用第一个");
        }

        io.seek(SeekFrom::Start(box_end))?;
        Ok(Some(desc))
    }

    /// 解析视频采样条目
    fn parse_video_sample_entry(&mut self, io: &mut IoContext, entry_end: u64) -> MexResult<()> {
        io.skip(16)?; // pre_defined + reserved
        self.width = u32::from(io.read_u16_be()?);
        self.height = u32::from(io.read_u16_be()?);
        let _horiz_res = io.read_u32_be()?;
        let _vert_res = io.read_u32_be()?;
        let _reserved = io.read_u32_be()?;
        let _frame_count = io.read_u16_be()?;
        io.skip(32)?; // compressor name
        let _depth = io.read_u16_be()?;
        let _pre_defined = io.read_u16_be()?;

        self.parse_child_boxes(io, entry_end)
    }

    /// 解析音频采样条目
    fn parse_audio_sample_entry(&mut self, io: &mut IoContext, entry_end: u64) -> MexResult<()> {
        // QuickTime 声音描述在保留字段位置携带版本号
        let version = io.read_u16_be()?;
        io.skip(6)?;
        self.channel_count = u32::from(io.read_u16_be()?);
        let _sample_size = io.read_u16_be()?;
        let _pre_defined = io.read_u16_be()?;
        let _reserved = io.read_u16_be()?;
        let sr_fixed = io.read_u32_be()?;
        self.sample_rate = sr_fixed >> 16;

        match version {
            1 => io.skip(16)?,
            2 => {
                // sizeOfStructOnly + 64 位浮点采样率 + 声道数 + 其他字段
                io.skip(4)?;
                self.sample_rate = f64::from_bits(io.read_u64_be()?) as u32;
                self.channel_count = io.read_u32_be()?;
                io.skip(20)?;
            }
            _ => {}
        }

        self.parse_child_boxes(io, entry_end)
    }

    /// 解析子 box (编解码器配置, 保护方案)
    fn parse_child_boxes(&mut self, io: &mut IoContext, end: u64) -> MexResult<()> {
        while io.position() + 8 <= end {
            let header = read_box_header(io)?;
            let box_end = header.end(end).min(end);
            let content_size = box_end.saturating_sub(io.position()) as usize;

            match header.box_type {
                BoxType::Sinf => {
                    let scheme = parse_sinf(io, box_end)?;
                    if let Some(original) = scheme.original_format {
                        self.fourcc = original;
                    }
                    self.encryption = scheme.encryption;
                }
                BoxType::Unknown(tag) => match &tag {
                    b"esds" => {
                        let data = io.read_bytes(content_size)?;
                        self.object_type = extract_object_type(&data);
                        // 从 esds 描述符中提取 DecoderSpecificInfo (AudioSpecificConfig)
                        self.codec_config = extract_decoder_specific_info(&data);
                    }
                    b"avcC" | b"hvcC" | b"av1C" | b"vpcC" | b"dOps" | b"dfLa" | b"alac"
                    | b"d263" | b"dac3" | b"dec3" => {
                        self.codec_config = Some(io.read_bytes(content_size)?);
                    }
                    _ => {}
                },
                _ => {}
            }

            io.seek(SeekFrom::Start(box_end))?;
        }
        Ok(())
    }
}

/// 按采样条目格式确定条目布局
fn entry_layout(fourcc: &[u8; 4]) -> MediaType {
    match fourcc {
        b"encv" => MediaType::Video,
        b"enca" => MediaType::Audio,
        other => MediaType::from_mime(fourcc_to_mime(other)),
    }
}

/// 从 esds box 内容中提取 DecoderSpecificInfo (AudioSpecificConfig)
///
/// esds 结构: version(1) + flags(3) + ES_Descriptor(tag=0x03)
///   → DecoderConfigDescriptor(tag=0x04)
///     → DecoderSpecificInfo(tag=0x05) = AudioSpecificConfig
fn extract_decoder_specific_info(esds_data: &[u8]) -> Option<Vec<u8>> {
    // 跳过 version(1) + flags(3)
    search_descriptor(esds_data.get(4..)?, 0x05)
}

/// 从 esds 中提取 objectTypeIndication (DecoderConfigDescriptor 首字节)
fn extract_object_type(esds_data: &[u8]) -> Option<u8> {
    search_descriptor(esds_data.get(4..)?, 0x04)?.first().copied()
}

/// 在 MPEG-4 描述符数据中递归搜索指定 tag 的 payload
fn search_descriptor(data: &[u8], target_tag: u8) -> Option<Vec<u8>> {
    let mut pos = 0;
    while pos < data.len() {
        let tag = data[pos];
        pos += 1;

        // 读取可变长度 (每字节高位为续标志, 低 7 位为值)
        let mut len = 0usize;
        for _ in 0..4 {
            let b = *data.get(pos)?;
            pos += 1;
            len = (len << 7) | usize::from(b & 0x7F);
            if b & 0x80 == 0 {
                break;
            }
        }

        let desc_end = pos.saturating_add(len).min(data.len());
        if tag == target_tag {
            return Some(data[pos..desc_end].to_vec());
        }

        // 跳过当前描述符的固定头部, 递归搜索子描述符
        let header_skip = descriptor_header_size(tag, &data[pos..desc_end]);
        let child_start = (pos + header_skip).min(desc_end);
        if child_start < desc_end {
            if let Some(result) = search_descriptor(&data[child_start..desc_end], target_tag) {
                return Some(result);
            }
        }

        pos = desc_end;
    }
    None
}

/// 获取 MPEG-4 描述符固定头部大小
fn descriptor_header_size(tag: u8, payload: &[u8]) -> usize {
    match tag {
        0x03 => {
            // ES_Descriptor: ES_ID(2) + flags(1) + 可选字段
            if payload.len() < 3 {
                return payload.len();
            }
            let flags = payload[2];
            let mut skip = 3;
            if flags & 0x80 != 0 {
                skip += 2; // dependsOn_ES_ID
            }
            if flags & 0x40 != 0 && skip < payload.len() {
                skip += 1 + payload[skip] as usize; // URL
            }
            if flags & 0x20 != 0 {
                skip += 2; // OCR_ES_Id
            }
            skip
        }
        0x04 => 13, // DecoderConfigDescriptor: objectType(1)+stream(1)+buf(3)+max(4)+avg(4)
        _ => 0,
    }
}

/// FourCC 到 MIME 类型映射
pub(crate) fn fourcc_to_mime(fourcc: &[u8; 4]) -> &'static str {
    match fourcc {
        // 视频
        b"avc1" | b"avc3" => "video/avc",
        b"hvc1" | b"hev1" => "video/hevc",
        b"dvh1" | b"dvhe" => "video/dolby-vision",
        b"vp08" => "video/x-vnd.on2.vp8",
        b"vp09" => "video/x-vnd.on2.vp9",
        b"av01" => "video/av01",
        b"mp4v" => "video/mp4v-es",
        b"s263" | b"h263" => "video/3gpp",
        b"mjpa" | b"mjpb" | b"jpeg" => "video/mjpeg",
        // 音频
        b"mp4a" => "audio/mp4a-latm",
        b"Opus" => "audio/opus",
        b"fLaC" => "audio/flac",
        b"alac" => "audio/alac",
        b"ac-3" => "audio/ac3",
        b"ec-3" => "audio/eac3",
        b".mp3" => "audio/mpeg",
        b"samr" => "audio/3gpp",
        b"sawb" => "audio/amr-wb",
        b"lpcm" | b"sowt" | b"twos" | b"ipcm" => "audio/raw",
        // 字幕
        b"tx3g" => "text/3gpp-tt",
        b"wvtt" => "text/vtt",
        b"stpp" => "application/ttml+xml",
        // 未知
        _ => "application/octet-stream",
    }
}
