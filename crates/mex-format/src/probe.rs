//! 格式探测.
//!
//! 通过分析数据源头部字节和名称提示的扩展名, 给出候选适配器及其置信度.

use crate::format_id::FormatId;

/// 探测置信度
///
/// 数值越高, 表示对格式判断越有信心.
pub type ProbeScore = u32;

/// 最低探测分数 (仅根据扩展名)
pub const SCORE_EXTENSION: ProbeScore = 50;

/// 中等探测分数 (结构部分匹配)
pub const SCORE_MIME: ProbeScore = 75;

/// 最高探测分数 (魔数完全匹配)
pub const SCORE_MAX: ProbeScore = 100;

/// 默认探测读取字节数
pub const DEFAULT_PROBE_SIZE: usize = 8 * 1024;

/// 探测结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeResult {
    /// 识别出的格式
    pub format_id: FormatId,
    /// 置信度分数
    pub score: ProbeScore,
}

/// 格式探测器 trait
///
/// 每种格式的适配器实现此 trait 以参与自动识别.
/// 探测器只检查头部字节, 不做 I/O.
pub trait FormatProbe: Send + Sync {
    /// 根据头部数据探测格式
    ///
    /// # 参数
    /// - `data`: 数据源开头的若干字节 (可能少于请求的探测长度)
    /// - `filename`: 名称提示 (可选, 用于扩展名匹配)
    ///
    /// # 返回
    /// - `Some(score)`: 探测成功, 返回置信度
    /// - `None`: 不是此格式
    fn probe(&self, data: &[u8], filename: Option<&str>) -> Option<ProbeScore>;

    /// 获取此探测器对应的格式标识
    fn format_id(&self) -> FormatId;
}
