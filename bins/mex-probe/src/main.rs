//! mex-probe - 容器信息探测工具
//!
//! 打开媒体文件, 输出容器与轨道格式描述, 可选遍历全部采样.

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{info, warn};

use mex::logging::{self, LoggingConfig};
use mex::{CryptoInfo, FormatBag, FormatValue, MediaExtractor, SampleFlags, SeekMode};

/// mex 容器信息探测工具
#[derive(Parser, Debug)]
#[command(name = "mex-probe", version, about = "纯 Rust 媒体容器信息探测工具")]
struct Cli {
    /// 输入文件路径
    input: String,

    /// 遍历并显示全部采样
    #[arg(long)]
    show_samples: bool,

    /// 最多显示的采样数 (统计仍覆盖全部采样)
    #[arg(long, default_value_t = 50)]
    max_samples: usize,

    /// 输出 JSON 格式
    #[arg(long)]
    json: bool,

    /// 遍历采样前先定位到该时间 (微秒)
    #[arg(long)]
    seek: Option<i64>,

    /// 定位模式
    #[arg(long, value_enum, default_value_t = ModeArg::Previous)]
    mode: ModeArg,

    /// 日志详细级别 (-v/-vv/-vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum ModeArg {
    Previous,
    Next,
    Closest,
}

impl From<ModeArg> for SeekMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Previous => SeekMode::PreviousSync,
            ModeArg::Next => SeekMode::NextSync,
            ModeArg::Closest => SeekMode::ClosestSync,
        }
    }
}

// ============================================================
// JSON 输出结构体
// ============================================================

/// 完整探测结果
#[derive(Serialize)]
struct ProbeOutput {
    format: FormatInfo,
    tracks: Vec<TrackInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pssh: Option<Vec<PsshSummary>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    samples: Option<SampleReport>,
}

/// 容器信息
#[derive(Serialize)]
struct FormatInfo {
    filename: String,
    format_name: String,
    nb_tracks: usize,
    metadata: Map<String, Value>,
}

/// 轨道信息
#[derive(Serialize)]
struct TrackInfo {
    index: usize,
    media_type: String,
    mime: String,
    format: Map<String, Value>,
}

/// 保护系统头摘要
#[derive(Serialize)]
struct PsshSummary {
    system_id: String,
    data_size: usize,
}

/// 单个采样
#[derive(Serialize)]
struct SampleInfo {
    track: usize,
    time_us: i64,
    size: usize,
    sync: bool,
    encrypted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    subsamples: Option<usize>,
}

/// 采样遍历结果
#[derive(Serialize)]
struct SampleReport {
    total_samples: u64,
    total_bytes: u64,
    listed: Vec<SampleInfo>,
}

// ============================================================
// 主逻辑
// ============================================================

fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Err(e) = logging::init(LoggingConfig::for_cli("mex-probe", cli.verbose)) {
        eprintln!("警告: 日志初始化失败: {e:#}");
    }

    if !cli.json {
        eprintln!("mex-probe 版本 {} -- 纯 Rust 容器探测工具", mex::version());
        eprintln!("输入文件: {}", cli.input);
    }

    let mut extractor = MediaExtractor::new();
    extractor
        .set_data_source_path(&cli.input)
        .with_context(|| format!("无法打开文件 '{}'", cli.input))?;

    let format_id = extractor.format_id()?;
    info!("识别格式: {format_id}");

    let track_count = extractor.track_count()?;
    let format = FormatInfo {
        filename: cli.input.clone(),
        format_name: format_id.name().to_string(),
        nb_tracks: track_count,
        metadata: format_bag_to_json(extractor.file_format()?),
    };

    let mut tracks = Vec::with_capacity(track_count);
    for index in 0..track_count {
        let track = extractor.track(index)?;
        tracks.push(TrackInfo {
            index,
            media_type: track.media_type.name().to_string(),
            mime: track.mime().to_string(),
            format: format_bag_to_json(&track.format),
        });
    }

    let pssh = match extractor.pssh_info() {
        Ok(info) => info.map(|info| {
            info.entries()
                .iter()
                .map(|e| PsshSummary {
                    system_id: e.system_id.to_string(),
                    data_size: e.data.len(),
                })
                .collect()
        }),
        Err(e) => {
            warn!("保护系统头无法解析: {e}");
            None
        }
    };

    let samples = if cli.show_samples {
        Some(walk_samples(&mut extractor, &cli)?)
    } else {
        None
    };

    let output = ProbeOutput {
        format,
        tracks,
        pssh,
        samples,
    };

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        print_text(&output);
    }

    extractor.release();
    Ok(())
}

/// 选中全部轨道并遍历采样
fn walk_samples(extractor: &mut MediaExtractor, cli: &Cli) -> Result<SampleReport> {
    for index in 0..extractor.track_count()? {
        extractor.select_track(index)?;
    }

    let mut advanced = match cli.seek {
        Some(time_us) => {
            extractor
                .seek_to(time_us, cli.mode.into())
                .with_context(|| format!("定位到 {time_us}us 失败"))?;
            extractor.sample_time()?.is_some()
        }
        None => advance_or_skip(extractor)?,
    };

    let mut report = SampleReport {
        total_samples: 0,
        total_bytes: 0,
        listed: Vec::new(),
    };
    let mut crypto = CryptoInfo::default();

    while advanced {
        let (Some(track), Some(time_us), Some(size)) = (
            extractor.sample_track_index()?,
            extractor.sample_time()?,
            extractor.sample_size()?,
        ) else {
            break;
        };
        let flags = extractor.sample_flags()?;

        report.total_samples += 1;
        report.total_bytes += size as u64;
        if report.listed.len() < cli.max_samples {
            let subsamples = extractor
                .sample_crypto_info(&mut crypto)?
                .then_some(crypto.subsamples.len());
            report.listed.push(SampleInfo {
                track,
                time_us,
                size,
                sync: flags.contains(SampleFlags::SYNC),
                encrypted: flags.contains(SampleFlags::ENCRYPTED),
                subsamples,
            });
        }

        advanced = advance_or_skip(extractor)?;
    }

    Ok(report)
}

/// 推进游标, 遇到越界的损坏采样时跳过
///
/// 游标原地不动的结构损坏 (如损坏的分片) 无法跳过, 直接返回错误.
fn advance_or_skip(extractor: &mut MediaExtractor) -> Result<bool> {
    let mut last_bad = None;
    loop {
        match extractor.advance() {
            Ok(more) => return Ok(more),
            Err(mex::MexError::MalformedContainer(msg)) => {
                let at = (extractor.sample_track_index()?, extractor.sample_time()?);
                if at.0.is_none() || last_bad == Some(at) {
                    return Err(mex::MexError::MalformedContainer(msg).into());
                }
                warn!("跳过损坏的采样: {msg}");
                last_bad = Some(at);
            }
            Err(e) => return Err(e.into()),
        }
    }
}

/// 格式描述转换为 JSON 对象
fn format_bag_to_json(bag: &FormatBag) -> Map<String, Value> {
    bag.iter()
        .map(|(key, value)| {
            let value = match value {
                FormatValue::Int(v) => Value::from(*v),
                FormatValue::Float(v) => Value::from(*v),
                FormatValue::Str(s) => Value::from(s.as_str()),
                FormatValue::Bytes(b) => Value::from(hex_preview(b)),
            };
            (key.to_string(), value)
        })
        .collect()
}

/// 二进制数据的十六进制预览 (最多 16 字节)
fn hex_preview(data: &[u8]) -> String {
    let mut out: String = data
        .iter()
        .take(16)
        .map(|b| format!("{b:02x}"))
        .collect();
    if data.len() > 16 {
        out.push_str(&format!("... ({} 字节)", data.len()));
    }
    out
}

/// 文本输出
fn print_text(output: &ProbeOutput) {
    println!("[FORMAT]");
    println!("  文件名       : {}", output.format.filename);
    println!("  格式名称     : {}", output.format.format_name);
    println!("  轨道数量     : {}", output.format.nb_tracks);
    print_map(&output.format.metadata);
    println!("[/FORMAT]");
    println!();

    for track in &output.tracks {
        println!("[TRACK #{}]", track.index);
        println!("  类型         : {}", track.media_type);
        println!("  MIME         : {}", track.mime);
        print_map(&track.format);
        println!("[/TRACK]");
        println!();
    }

    if let Some(pssh) = &output.pssh {
        println!("[PSSH]");
        for entry in pssh {
            println!("  {} : {} 字节", entry.system_id, entry.data_size);
        }
        println!("[/PSSH]");
        println!();
    }

    if let Some(report) = &output.samples {
        println!("[SAMPLES]");
        for s in &report.listed {
            println!(
                "  #{} {:>12}us {:>8} 字节{}{}",
                s.track,
                s.time_us,
                s.size,
                if s.sync { " [关键帧]" } else { "" },
                if s.encrypted { " [加密]" } else { "" },
            );
        }
        println!("  采样总数     : {}", report.total_samples);
        println!(
            "  数据总量     : {} 字节 ({:.2} KB)",
            report.total_bytes,
            report.total_bytes as f64 / 1024.0
        );
        println!("[/SAMPLES]");
        println!();
    }
}

fn print_map(map: &Map<String, Value>) {
    for (key, value) in map {
        match value {
            Value::String(s) => println!("  {key:<13}: {s}"),
            other => println!("  {key:<13}: {other}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_十六进制预览() {
        assert_eq!(hex_preview(&[0x12, 0x10]), "1210");
        let long = vec![0u8; 20];
        assert!(hex_preview(&long).ends_with("... (20 字节)"));
    }

    #[test]
    fn test_格式描述转_json() {
        let mut bag = FormatBag::with_mime("audio/raw");
        bag.set_int("sample-rate", 8000);
        let map = format_bag_to_json(&bag);
        assert_eq!(map["mime"], Value::from("audio/raw"));
        assert_eq!(map["sample-rate"], Value::from(8000));
    }

    #[test]
    fn test_命令行解析() {
        let cli = Cli::parse_from(["mex-probe", "a.mp4", "--seek", "1000", "--mode", "closest", "-vv"]);
        assert_eq!(cli.seek, Some(1000));
        assert_eq!(SeekMode::from(cli.mode), SeekMode::ClosestSync);
        assert_eq!(cli.verbose, 2);
    }
}
