//! 容器适配器 (Demuxer) trait 定义.
//!
//! 适配器把容器结构翻译为统一的 [`ContainerIndex`]: 轨道格式描述和
//! 按轨道排列的采样表. 游标语义 (选择, 定位, 推进) 由上层统一实现.

use mex_core::MexResult;

use crate::format_id::FormatId;
use crate::index::ContainerIndex;
use crate::io::IoContext;

/// 容器适配器 trait
///
/// 使用流程:
/// 1. 调用 `open()` 解析容器头部, 得到初始索引
/// 2. 索引未完整时, 在游标需要时调用 `extend()` 追加后续采样
pub trait Demuxer: Send {
    /// 获取格式标识
    fn format_id(&self) -> FormatId;

    /// 获取适配器名称
    fn name(&self) -> &str;

    /// 解析容器头部并构建索引
    ///
    /// 结构不被接受时返回 `MalformedContainer`/`UnsupportedFormat`,
    /// 注册表会回退到下一个候选适配器.
    fn open(&mut self, io: &mut IoContext) -> MexResult<ContainerIndex>;

    /// 延迟扩展: 解析下一段容器结构并追加采样
    ///
    /// # 返回
    /// - `Ok(true)`: 追加了新内容
    /// - `Ok(false)`: 已无更多内容, 索引被标记为完整
    /// - `Err(NeedMoreData)`: 数据源尚未提供下一段, 索引保持不变
    fn extend(&mut self, _io: &mut IoContext, index: &mut ContainerIndex) -> MexResult<bool> {
        index.set_complete();
        Ok(false)
    }
}
