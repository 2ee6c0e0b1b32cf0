//! 统一错误类型定义.
//!
//! 所有 mex crate 共用的错误类型, 支持跨模块传播.

use std::io;

use thiserror::Error;

/// mex 统一错误类型
#[derive(Debug, Error)]
pub enum MexError {
    /// 无效参数 (轨道索引越界, 无效配置等)
    #[error("无效参数: {0}")]
    InvalidArgument(String),

    /// 没有任何适配器能识别数据源
    #[error("不支持的容器格式: {0}")]
    UnsupportedFormat(String),

    /// 数据源读取失败
    #[error("I/O 错误: {0}")]
    Io(#[from] io::Error),

    /// 容器结构损坏 (索引构建或延迟扩展时发现)
    #[error("容器结构损坏: {0}")]
    MalformedContainer(String),

    /// 保护系统头 (PSSH) 数据块损坏
    #[error("保护系统头损坏: {0}")]
    MalformedProtectionHeader(String),

    /// 调用方缓冲区容量不足
    #[error("缓冲区不足: 需要 {needed} 字节, 可用 {available} 字节")]
    BufferTooSmall {
        /// 采样所需字节数
        needed: usize,
        /// 缓冲区可用字节数
        available: usize,
    },

    /// 实例已释放后继续调用
    #[error("实例已释放")]
    UseAfterRelease,

    /// 数据源暂无更多数据 (流式数据源尚未下载到位)
    #[error("数据不足, 需要更多输入")]
    NeedMoreData,

    /// 已到达数据末尾
    #[error("已到达数据末尾")]
    Eof,

    /// 单次调用的延迟扩展达到配置上限, 结果尚无法确定
    ///
    /// 已解析的分片会保留, 再次调用从中断处继续.
    #[error("延迟扩展达到单次上限 {0} 步, 请重试")]
    ExtendLimitReached(usize),
}

impl MexError {
    /// 是否为可重试的瞬时错误
    ///
    /// 核心不会自动重试, 由调用方决定.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
            ),
            Self::NeedMoreData | Self::ExtendLimitReached(_) => true,
            _ => false,
        }
    }

    /// 是否表示容器结构不被当前适配器接受
    ///
    /// 注册表在格式探测阶段遇到此类错误时回退到下一个候选适配器.
    pub fn is_format_mismatch(&self) -> bool {
        matches!(
            self,
            Self::MalformedContainer(_) | Self::UnsupportedFormat(_) | Self::Eof
        )
    }
}

/// mex 统一 Result 类型
pub type MexResult<T> = Result<T, MexError>;
