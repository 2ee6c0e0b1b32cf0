//! 门面配置.

use mex_format::probe::DEFAULT_PROBE_SIZE;
use serde::{Deserialize, Serialize};

/// 解封装门面配置
///
/// 可从 JSON/TOML 等配置文件反序列化, 缺省字段取默认值.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct ExtractorOptions {
    /// 格式探测最多读取的字节数 (接受短读)
    pub probe_size: usize,
    /// 单次游标调用中最多执行的延迟扩展步数, `None` 表示不限
    ///
    /// 每一步解析一个分片. 达到上限而结果仍无法确定时, 调用返回
    /// `ExtendLimitReached`, 游标不变, 已解析的分片保留, 重试即可继续.
    pub max_extend_steps: Option<usize>,
}

impl Default for ExtractorOptions {
    fn default() -> Self {
        Self {
            probe_size: DEFAULT_PROBE_SIZE,
            max_extend_steps: None,
        }
    }
}

impl ExtractorOptions {
    /// 设置探测字节数
    pub fn with_probe_size(mut self, probe_size: usize) -> Self {
        self.probe_size = probe_size;
        self
    }

    /// 设置延迟扩展步数上限
    pub fn with_max_extend_steps(mut self, steps: usize) -> Self {
        self.max_extend_steps = Some(steps);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_缺省字段取默认值() {
        let options: ExtractorOptions = serde_json::from_str(r#"{"probe_size": 1024}"#).unwrap();
        assert_eq!(options.probe_size, 1024);
        assert_eq!(options.max_extend_steps, None);
        assert_eq!(ExtractorOptions::default().probe_size, DEFAULT_PROBE_SIZE);
    }

    #[test]
    fn test_构建器() {
        let options = ExtractorOptions::default().with_max_extend_steps(1);
        assert_eq!(options.max_extend_steps, Some(1));
        assert_eq!(options.probe_size, DEFAULT_PROBE_SIZE);
    }
}
