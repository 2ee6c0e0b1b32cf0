//! 日志初始化模块.
//!
//! 双输出:
//! - console: 彩色, 带源码位置, 默认 warn
//! - file: 无色, 无 target, 默认 info, 按天滚动, 保留有限份历史
//!
//! 库 crate 通过 `log` 门面输出, 由 tracing-subscriber 的 log 桥接汇入同一订阅者.
//! 日志文件输出到 `{directory}/{file_prefix}.{date}.log`.

use anyhow::{Context, Result};
use chrono::{Datelike, Local, NaiveDate, Timelike};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{
    EnvFilter, Registry,
    fmt::{self, FormatEvent, FormatFields, format::Writer},
    layer::{Layer, SubscriberExt},
    registry::LookupSpan,
    util::SubscriberInitExt,
};

/// 覆盖文件日志级别的环境变量
pub const LOG_ENV: &str = "MEX_LOG";

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// 文件日志级别 (EnvFilter 语法)
    pub level: String,
    #[serde(default = "default_console_level")]
    pub console_level: String,
    pub directory: String,
    pub file_prefix: String,
    /// 最多保留的日志文件数 (含当天)
    #[serde(default = "default_max_log_files")]
    pub max_log_files: usize,
}

fn default_console_level() -> String {
    "warn".to_string()
}

fn default_max_log_files() -> usize {
    7
}

impl LoggingConfig {
    /// 命令行工具的日志配置
    ///
    /// `verbosity`: 0=info, 1=debug, 2+=trace (由 -v/-vv/-vvv 控制).
    /// 控制台级别与文件级别一致.
    pub fn for_cli(file_prefix: &str, verbosity: u8) -> Self {
        let level = match verbosity {
            0 => "info",
            1 => "debug",
            _ => "trace",
        };
        Self {
            level: level.to_string(),
            console_level: if verbosity == 0 {
                default_console_level()
            } else {
                level.to_string()
            },
            directory: "logs".to_string(),
            file_prefix: file_prefix.to_string(),
            max_log_files: default_max_log_files(),
        }
    }
}

static LOG_GUARD: OnceLock<tracing_appender::non_blocking::WorkerGuard> = OnceLock::new();

/// 初始化日志系统
///
/// 全局订阅者只能设置一次, 重复调用返回错误.
pub fn init(config: LoggingConfig) -> Result<()> {
    std::fs::create_dir_all(&config.directory)
        .with_context(|| format!("创建日志目录失败, path={}", config.directory))?;

    let file_appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(&config.file_prefix)
        .filename_suffix("log")
        .max_log_files(config.max_log_files.max(1))
        .build(&config.directory)
        .with_context(|| format!("创建日志文件失败, directory={}", config.directory))?;

    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let console_filter = EnvFilter::new(&config.console_level);
    let file_filter =
        EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(&config.level));

    let console_layer = fmt::Layer::default()
        .with_writer(std::io::stderr)
        .with_ansi(true)
        .event_format(ConsoleFormatter)
        .with_filter(console_filter);

    let file_layer = fmt::Layer::default()
        .with_writer(non_blocking)
        .with_ansi(false)
        .event_format(FileFormatter)
        .with_filter(file_filter);

    Registry::default()
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .context("日志系统已初始化")?;

    LOG_GUARD.set(guard).ok();
    Ok(())
}

/// 指定日期的日志文件路径 (与滚动写入器的命名一致)
pub fn log_file_path(directory: &Path, prefix: &str, date: NaiveDate) -> PathBuf {
    directory.join(format!("{}.{}.log", prefix, date.format("%Y-%m-%d")))
}

/// 日志行时间戳: `[MM-DD HH:MM:SS.mmm]`
fn write_timestamp(writer: &mut Writer<'_>) -> std::fmt::Result {
    let now = Local::now();
    write!(
        writer,
        "[{:02}-{:02} {:02}:{:02}:{:02}.{:03}] ",
        now.month(),
        now.day(),
        now.hour(),
        now.minute(),
        now.second(),
        now.timestamp_subsec_millis()
    )
}

struct ConsoleFormatter;

impl<S, N> FormatEvent<S, N> for ConsoleFormatter
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &fmt::FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &tracing::Event<'_>,
    ) -> std::fmt::Result {
        let meta = event.metadata();
        write_timestamp(&mut writer)?;
        let color = match *meta.level() {
            tracing::Level::ERROR => "\x1b[31m",
            tracing::Level::WARN => "\x1b[33m",
            tracing::Level::INFO => "\x1b[32m",
            _ => "\x1b[34m",
        };
        write!(
            writer,
            "{}{:5}\x1b[0m {}:{} > ",
            color,
            meta.level().to_string(),
            meta.file().unwrap_or("unknown"),
            meta.line().unwrap_or(0)
        )?;
        ctx.format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

struct FileFormatter;

impl<S, N> FormatEvent<S, N> for FileFormatter
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &fmt::FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &tracing::Event<'_>,
    ) -> std::fmt::Result {
        write_timestamp(&mut writer)?;
        write!(writer, "{:5} > ", event.metadata().level().to_string())?;
        ctx.format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_file_path() {
        let date = NaiveDate::from_ymd_opt(2026, 2, 6);
        match date {
            Some(date) => {
                let path = log_file_path(Path::new("logs"), "mex-probe", date);
                assert_eq!(path, PathBuf::from("logs/mex-probe.2026-02-06.log"));
            }
            None => panic!("测试日期初始化失败"),
        }
    }

    #[test]
    fn test_配置缺省字段() {
        let config: LoggingConfig = serde_json::from_str(
            r#"{"level": "debug", "directory": "logs", "file_prefix": "worker"}"#,
        )
        .unwrap();
        assert_eq!(config.console_level, "warn");
        assert_eq!(config.max_log_files, 7);
    }

    #[test]
    fn test_命令行详细级别() {
        assert_eq!(LoggingConfig::for_cli("mex-probe", 0).level, "info");
        let config = LoggingConfig::for_cli("mex-probe", 2);
        assert_eq!(config.level, "trace");
        assert_eq!(config.console_level, "trace");
    }
}
