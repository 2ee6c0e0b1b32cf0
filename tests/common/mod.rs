//! 集成测试公用的容器构造工具.
//!
//! 构造合成的 MP4 (普通/分片加密) 与 WAV 字节流, 每个采样的负载字节可由
//! (轨道, 行号) 推算, 便于校验读出的数据.

#![allow(dead_code)]

use mex::core::{PLAYREADY_SYSTEM_ID, WIDEVINE_SYSTEM_ID};

/// 默认密钥 ID
pub const KEY_ID: [u8; 16] = [0x42; 16];

// ========================
// 基础 box 构造
// ========================

/// 构造一个普通 box
pub fn build_box(tag: &[u8; 4], content: &[u8]) -> Vec<u8> {
    let size = (8 + content.len()) as u32;
    let mut data = Vec::with_capacity(size as usize);
    data.extend_from_slice(&size.to_be_bytes());
    data.extend_from_slice(tag);
    data.extend_from_slice(content);
    data
}

/// 构造一个 FullBox (version + flags + content)
pub fn build_fullbox(tag: &[u8; 4], version: u8, flags: u32, content: &[u8]) -> Vec<u8> {
    let mut full = vec![
        version,
        ((flags >> 16) & 0xFF) as u8,
        ((flags >> 8) & 0xFF) as u8,
        (flags & 0xFF) as u8,
    ];
    full.extend_from_slice(content);
    build_box(tag, &full)
}

/// 大端 u32 序列
pub fn be32(values: &[u32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_be_bytes()).collect()
}

/// 采样负载: 全部字节为 `(track * 100 + row) as u8`
pub fn sample_payload(track: usize, row: usize, size: u32) -> Vec<u8> {
    vec![(track * 100 + row) as u8; size as usize]
}

fn build_ftyp() -> Vec<u8> {
    let mut content = Vec::new();
    content.extend_from_slice(b"isom");
    content.extend_from_slice(&0u32.to_be_bytes());
    content.extend_from_slice(b"isomiso6");
    build_box(b"ftyp", &content)
}

fn build_mvhd(duration: u32) -> Vec<u8> {
    let mut content = be32(&[0, 0, 1000, duration, 0x0001_0000]);
    content.extend_from_slice(&[0u8; 76]);
    build_fullbox(b"mvhd", 0, 0, &content)
}

fn build_tkhd(track_id: u32, width: u32, height: u32) -> Vec<u8> {
    let mut content = be32(&[0, 0, track_id, 0, 0]);
    content.extend_from_slice(&[0u8; 16]);
    content.extend_from_slice(&[0u8; 36]);
    content.extend(be32(&[width << 16, height << 16]));
    build_fullbox(b"tkhd", 0, 3, &content)
}

fn build_mdhd(timescale: u32, duration: u32) -> Vec<u8> {
    let mut content = be32(&[0, 0, timescale, duration]);
    content.extend_from_slice(&0x55C4u16.to_be_bytes()); // "und"
    content.extend_from_slice(&[0, 0]);
    build_fullbox(b"mdhd", 0, 0, &content)
}

fn build_hdlr(handler: &[u8; 4]) -> Vec<u8> {
    let mut content = be32(&[0]);
    content.extend_from_slice(handler);
    content.extend_from_slice(&[0u8; 13]);
    build_fullbox(b"hdlr", 0, 0, &content)
}

fn build_stsd(entry: &[u8]) -> Vec<u8> {
    let mut content = be32(&[1]);
    content.extend_from_slice(entry);
    build_fullbox(b"stsd", 0, 0, &content)
}

/// avc1/encv 视频采样条目
fn build_visual_entry(fourcc: &[u8; 4], width: u16, height: u16, children: &[u8]) -> Vec<u8> {
    let mut d = vec![0u8; 6];
    d.extend_from_slice(&1u16.to_be_bytes());
    d.extend_from_slice(&[0u8; 16]);
    d.extend_from_slice(&width.to_be_bytes());
    d.extend_from_slice(&height.to_be_bytes());
    d.extend(be32(&[0x0048_0000, 0x0048_0000, 0]));
    d.extend_from_slice(&1u16.to_be_bytes());
    d.extend_from_slice(&[0u8; 32]);
    d.extend_from_slice(&0x18u16.to_be_bytes());
    d.extend_from_slice(&0xFFFFu16.to_be_bytes());
    d.extend_from_slice(children);
    build_box(fourcc, &d)
}

fn build_avcc() -> Vec<u8> {
    build_box(b"avcC", &[1, 0x64, 0, 0x1F, 0xFF, 0xE0, 0x00])
}

/// AAC-LC 44.1kHz 立体声 mp4a 条目
fn build_mp4a_entry() -> Vec<u8> {
    let dsi = [0x12, 0x10];
    let mut dcd = vec![0x40, 0x15, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0];
    dcd.extend_from_slice(&[0x05, dsi.len() as u8]);
    dcd.extend_from_slice(&dsi);
    let mut es = vec![0x00, 0x01, 0x00];
    es.extend_from_slice(&[0x04, dcd.len() as u8]);
    es.extend_from_slice(&dcd);
    let mut esds = vec![0x03, es.len() as u8];
    esds.extend_from_slice(&es);

    let mut d = vec![0u8; 6];
    d.extend_from_slice(&1u16.to_be_bytes());
    d.extend_from_slice(&[0u8; 8]);
    d.extend_from_slice(&2u16.to_be_bytes());
    d.extend_from_slice(&16u16.to_be_bytes());
    d.extend_from_slice(&[0u8; 4]);
    d.extend_from_slice(&(44100u32 << 16).to_be_bytes());
    d.extend(build_fullbox(b"esds", 0, 0, &esds));
    build_box(b"mp4a", &d)
}

fn build_pssh(system_id: &uuid::Uuid, data: &[u8]) -> Vec<u8> {
    let mut content = system_id.as_bytes().to_vec();
    content.extend(be32(&[data.len() as u32]));
    content.extend_from_slice(data);
    build_fullbox(b"pssh", 0, 0, &content)
}

// ========================
// 普通 MP4
// ========================

/// 普通 MP4 轨道描述 (全部采样放在一个块内)
pub struct TrackSpec {
    pub handler: [u8; 4],
    pub timescale: u32,
    /// 每个采样的时长 (媒体时间刻度)
    pub delta: u32,
    pub sizes: Vec<u32>,
    /// 同步采样编号 (1-based); None 表示没有 stss
    pub sync: Option<Vec<u32>>,
    pub entry: Vec<u8>,
}

impl TrackSpec {
    /// AVC 视频轨道: 每帧 100ms, 每 `sync_every` 帧一个关键帧
    pub fn avc(count: u32, sync_every: u32) -> Self {
        Self {
            handler: *b"vide",
            timescale: 1000,
            delta: 100,
            sizes: (0..count).map(|i| 200 + i * 10).collect(),
            sync: Some((1..=count).step_by(sync_every as usize).collect()),
            entry: build_visual_entry(b"avc1", 640, 360, &build_avcc()),
        }
    }

    /// AAC 音频轨道: 每帧 50ms, 全部为同步采样
    pub fn aac(count: u32) -> Self {
        Self {
            handler: *b"soun",
            timescale: 44100,
            delta: 2205,
            sizes: (0..count).map(|i| 100 + i).collect(),
            sync: None,
            entry: build_mp4a_entry(),
        }
    }

    fn duration(&self) -> u32 {
        self.sizes.len() as u32 * self.delta
    }

    fn payload(&self, track: usize) -> Vec<u8> {
        self.sizes
            .iter()
            .enumerate()
            .flat_map(|(row, &size)| sample_payload(track, row, size))
            .collect()
    }
}

fn build_stbl(spec: &TrackSpec, chunk_offset: u32) -> Vec<u8> {
    let n = spec.sizes.len() as u32;
    let mut d = build_stsd(&spec.entry);
    d.extend(build_fullbox(b"stts", 0, 0, &be32(&[1, n, spec.delta])));
    d.extend(build_fullbox(b"stsc", 0, 0, &be32(&[1, 1, n, 1])));
    let mut stsz = be32(&[0, n]);
    stsz.extend(be32(&spec.sizes));
    d.extend(build_fullbox(b"stsz", 0, 0, &stsz));
    d.extend(build_fullbox(b"stco", 0, 0, &be32(&[1, chunk_offset])));
    if let Some(sync) = &spec.sync {
        let mut stss = be32(&[sync.len() as u32]);
        stss.extend(be32(sync));
        d.extend(build_fullbox(b"stss", 0, 0, &stss));
    }
    build_box(b"stbl", &d)
}

fn build_trak(track_id: u32, spec: &TrackSpec, stbl: Vec<u8>) -> Vec<u8> {
    let (width, height) = if &spec.handler == b"vide" { (640, 360) } else { (0, 0) };
    let minf = build_box(b"minf", &stbl);
    let mdia = build_box(
        b"mdia",
        &[build_mdhd(spec.timescale, spec.duration()), build_hdlr(&spec.handler), minf].concat(),
    );
    build_box(b"trak", &[build_tkhd(track_id, width, height), mdia].concat())
}

/// 构造普通 MP4: ftyp + moov + mdat, 各轨道数据按轨道顺序连续存放
pub fn build_progressive_mp4(tracks: &[TrackSpec]) -> Vec<u8> {
    let payloads: Vec<Vec<u8>> = tracks.iter().enumerate().map(|(i, t)| t.payload(i)).collect();

    let build_moov = |data_start: u32| {
        let mut content = build_mvhd(1000);
        let mut offset = data_start;
        for (i, spec) in tracks.iter().enumerate() {
            content.extend(build_trak(i as u32 + 1, spec, build_stbl(spec, offset)));
            offset += payloads[i].len() as u32;
        }
        build_box(b"moov", &content)
    };

    let ftyp = build_ftyp();
    let data_start = (ftyp.len() + build_moov(0).len() + 8) as u32;
    let mut file = ftyp;
    file.extend(build_moov(data_start));
    file.extend(build_box(b"mdat", &payloads.concat()));
    file
}

// ========================
// 分片加密 MP4
// ========================

/// 分片 MP4 的初始化段与媒体段
pub struct FragmentedMovie {
    pub init: Vec<u8>,
    pub fragments: Vec<Vec<u8>>,
}

impl FragmentedMovie {
    /// 完整文件
    pub fn concat(&self) -> Vec<u8> {
        let mut out = self.init.clone();
        for f in &self.fragments {
            out.extend_from_slice(f);
        }
        out
    }
}

/// 分片中每个采样的大小
pub const FRAGMENT_SAMPLE_SIZE: u32 = 100;

/// 分片中第 `row` 个采样的 IV
pub fn fragment_iv(fragment: usize, row: usize) -> Vec<u8> {
    vec![fragment as u8, row as u8, 0, 0, 0, 0, 0, 0xAA]
}

/// 构造 cenc 加密的单视频轨道分片 MP4
///
/// 每帧 100ms, 每个分片首帧为关键帧. moov 携带 Widevine pssh,
/// 第一个分片携带 PlayReady pssh. 每个采样一个子采样: 明文 16 字节, 其余加密.
pub fn build_encrypted_fragmented(fragment_count: usize, samples_per_fragment: usize) -> FragmentedMovie {
    let tenc = {
        let mut d = vec![0, 0, 1, 8];
        d.extend_from_slice(&KEY_ID);
        build_fullbox(b"tenc", 0, 0, &d)
    };
    let sinf = build_box(
        b"sinf",
        &[
            build_box(b"frma", b"avc1"),
            build_fullbox(b"schm", 0, 0, &[b"cenc".as_slice(), be32(&[0x0001_0000]).as_slice()].concat()),
            build_box(b"schi", &tenc),
        ]
        .concat(),
    );
    let spec = TrackSpec {
        handler: *b"vide",
        timescale: 1000,
        delta: 100,
        sizes: Vec::new(),
        sync: None,
        entry: build_visual_entry(b"encv", 640, 360, &[build_avcc(), sinf].concat()),
    };

    let empty_stbl = {
        let mut d = build_stsd(&spec.entry);
        d.extend(build_fullbox(b"stts", 0, 0, &be32(&[0])));
        d.extend(build_fullbox(b"stsc", 0, 0, &be32(&[0])));
        d.extend(build_fullbox(b"stsz", 0, 0, &be32(&[0, 0])));
        d.extend(build_fullbox(b"stco", 0, 0, &be32(&[0])));
        build_box(b"stbl", &d)
    };
    let trex = build_fullbox(b"trex", 0, 0, &be32(&[1, 1, 100, 0, 0x0001_0000]));
    let moov = build_box(
        b"moov",
        &[
            build_mvhd(0),
            build_trak(1, &spec, empty_stbl),
            build_box(b"mvex", &trex),
            build_pssh(&WIDEVINE_SYSTEM_ID, b"wv-init"),
        ]
        .concat(),
    );
    let mut init = build_ftyp();
    init.extend(moov);

    let fragments = (0..fragment_count)
        .map(|f| build_fragment(f, samples_per_fragment))
        .collect();
    FragmentedMovie { init, fragments }
}

fn build_fragment(index: usize, count: usize) -> Vec<u8> {
    let build_moof = |data_offset: u32| {
        let tfhd = build_fullbox(b"tfhd", 0, 0x02_0000, &be32(&[1]));
        let base_time = (index * count * 100) as u64;
        let tfdt = build_fullbox(b"tfdt", 1, 0, &base_time.to_be_bytes());
        let mut trun = be32(&[count as u32, data_offset, 0]);
        trun.extend((0..count).flat_map(|_| FRAGMENT_SAMPLE_SIZE.to_be_bytes()));
        let trun = build_fullbox(b"trun", 0, 0x205, &trun);

        let mut senc = be32(&[count as u32]);
        for row in 0..count {
            senc.extend(fragment_iv(index, row));
            senc.extend_from_slice(&1u16.to_be_bytes());
            senc.extend_from_slice(&16u16.to_be_bytes());
            senc.extend(be32(&[FRAGMENT_SAMPLE_SIZE - 16]));
        }
        let senc = build_fullbox(b"senc", 0, 0x2, &senc);

        let traf = build_box(b"traf", &[tfhd, tfdt, trun, senc].concat());
        let mut content = build_fullbox(b"mfhd", 0, 0, &be32(&[index as u32 + 1]));
        if index == 0 {
            content.extend(build_pssh(&PLAYREADY_SYSTEM_ID, b"pr-fragment"));
        }
        content.extend(traf);
        build_box(b"moof", &content)
    };

    let moof_len = build_moof(0).len() as u32;
    let mut out = build_moof(moof_len + 8);
    let payload: Vec<u8> = (0..count)
        .flat_map(|row| sample_payload(0, index * count + row, FRAGMENT_SAMPLE_SIZE))
        .collect();
    out.extend(build_box(b"mdat", &payload));
    out
}

// ========================
// WAV
// ========================

/// 构造 16 位 PCM WAV, 负载为递增字节
pub fn build_wav(channels: u16, sample_rate: u32, frames: u32) -> Vec<u8> {
    let block_align = channels * 2;
    let data_len = frames * u32::from(block_align);
    let mut out = Vec::new();
    out.extend_from_slice(b"RIFF");
    out.extend_from_slice(&(36 + data_len).to_le_bytes());
    out.extend_from_slice(b"WAVEfmt ");
    out.extend_from_slice(&16u32.to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes());
    out.extend_from_slice(&channels.to_le_bytes());
    out.extend_from_slice(&sample_rate.to_le_bytes());
    out.extend_from_slice(&(sample_rate * u32::from(block_align)).to_le_bytes());
    out.extend_from_slice(&block_align.to_le_bytes());
    out.extend_from_slice(&16u16.to_le_bytes());
    out.extend_from_slice(b"data");
    out.extend_from_slice(&data_len.to_le_bytes());
    out.extend((0..data_len).map(|i| (i % 251) as u8));
    out
}
