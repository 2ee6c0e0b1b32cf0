//! 容器适配器注册表.
//!
//! 管理所有已注册的适配器, 支持按格式标识查找和自动探测.
//! 探测得到的候选按置信度排序, 依次尝试打开, 结构不被接受时回退到下一个.

use std::collections::HashMap;
use std::io::SeekFrom;

use log::debug;
use mex_core::{MexError, MexResult};

use crate::demuxer::Demuxer;
use crate::format_id::FormatId;
use crate::index::ContainerIndex;
use crate::io::IoContext;
use crate::probe::{FormatProbe, ProbeResult};

/// 适配器工厂函数类型
pub type DemuxerFactory = fn() -> MexResult<Box<dyn Demuxer>>;

/// 容器适配器注册表
pub struct FormatRegistry {
    /// 适配器工厂映射
    demuxers: HashMap<FormatId, DemuxerEntry>,
    /// 格式探测器列表 (注册顺序即同分时的优先顺序)
    probes: Vec<Box<dyn FormatProbe>>,
}

/// 适配器注册条目
struct DemuxerEntry {
    /// 格式名称
    name: String,
    /// 工厂函数
    factory: DemuxerFactory,
}

/// 成功打开的容器
pub struct OpenedInput {
    /// 选中的格式
    pub format_id: FormatId,
    /// 适配器实例 (用于延迟扩展)
    pub demuxer: Box<dyn Demuxer>,
    /// 初始索引
    pub index: ContainerIndex,
}

impl FormatRegistry {
    /// 创建空的注册表
    pub fn new() -> Self {
        Self {
            demuxers: HashMap::new(),
            probes: Vec::new(),
        }
    }

    /// 注册一个适配器
    pub fn register_demuxer(
        &mut self,
        format_id: FormatId,
        name: impl Into<String>,
        factory: DemuxerFactory,
    ) {
        self.demuxers.insert(
            format_id,
            DemuxerEntry {
                name: name.into(),
                factory,
            },
        );
    }

    /// 注册一个格式探测器
    pub fn register_probe(&mut self, probe: Box<dyn FormatProbe>) {
        self.probes.push(probe);
    }

    /// 创建指定格式的适配器实例
    pub fn create_demuxer(&self, format_id: FormatId) -> MexResult<Box<dyn Demuxer>> {
        let entry = self.demuxers.get(&format_id).ok_or_else(|| {
            MexError::UnsupportedFormat(format!("未找到 {format_id} 的适配器"))
        })?;
        (entry.factory)()
    }

    /// 探测数据的容器格式, 返回置信度最高的结果
    pub fn probe(&self, data: &[u8], filename: Option<&str>) -> Option<ProbeResult> {
        self.detect(data, filename).into_iter().next()
    }

    /// 探测全部候选格式
    ///
    /// 按置信度降序排列, 同分时保持注册顺序.
    pub fn detect(&self, data: &[u8], filename: Option<&str>) -> Vec<ProbeResult> {
        let mut candidates: Vec<ProbeResult> = self
            .probes
            .iter()
            .filter_map(|probe| {
                probe.probe(data, filename).map(|score| ProbeResult {
                    format_id: probe.format_id(),
                    score,
                })
            })
            .collect();
        candidates.sort_by(|a, b| b.score.cmp(&a.score));
        candidates
    }

    /// 获取所有已注册的适配器名称
    pub fn list_demuxers(&self) -> Vec<(FormatId, &str)> {
        let mut list: Vec<(FormatId, &str)> = self
            .demuxers
            .iter()
            .map(|(id, entry)| (*id, entry.name.as_str()))
            .collect();
        list.sort_by_key(|(id, _)| id.name());
        list
    }

    /// 探测输入格式 (不打开适配器)
    ///
    /// 最多读取 `probe_size` 字节, 接受短读, 然后 seek 回起始位置.
    pub fn probe_input(
        &self,
        io: &mut IoContext,
        filename: Option<&str>,
        probe_size: usize,
    ) -> MexResult<Vec<ProbeResult>> {
        io.seek(SeekFrom::Start(0))?;
        let probe_buf = io.read_available(probe_size)?;
        io.seek(SeekFrom::Start(0))?;

        if probe_buf.is_empty() {
            if io.cache_status().is_some_and(|s| !s.reached_eos) {
                return Err(MexError::NeedMoreData);
            }
            return Err(MexError::UnsupportedFormat("数据源为空".into()));
        }

        let candidates = self.detect(&probe_buf, filename);
        if candidates.is_empty() {
            // 流式数据源还没攒够探测数据时, 留给调用方稍后重试
            let still_filling = io.cache_status().is_some_and(|s| !s.reached_eos);
            if still_filling && probe_buf.len() < probe_size {
                return Err(MexError::NeedMoreData);
            }
            return Err(MexError::UnsupportedFormat(
                "没有适配器能识别输入格式".into(),
            ));
        }
        Ok(candidates)
    }

    /// 自动探测格式并打开容器
    ///
    /// 依次尝试候选适配器. 候选返回结构性错误时回退到下一个;
    /// I/O 错误和 `NeedMoreData` 立即返回.
    pub fn open_input(
        &self,
        io: &mut IoContext,
        filename: Option<&str>,
        probe_size: usize,
    ) -> MexResult<OpenedInput> {
        let candidates = self.probe_input(io, filename, probe_size)?;
        let mut last_error: Option<MexError> = None;

        for candidate in candidates {
            let mut demuxer = match self.create_demuxer(candidate.format_id) {
                Ok(d) => d,
                Err(e) => {
                    debug!("候选 {} 无可用适配器: {e}", candidate.format_id);
                    last_error = Some(e);
                    continue;
                }
            };
            io.seek(SeekFrom::Start(0))?;
            match demuxer.open(io) {
                Ok(index) => {
                    debug!(
                        "选中适配器 {} (置信度 {}), {} 条轨道",
                        candidate.format_id,
                        candidate.score,
                        index.track_count(),
                    );
                    return Ok(OpenedInput {
                        format_id: candidate.format_id,
                        demuxer,
                        index,
                    });
                }
                Err(e) if e.is_format_mismatch() => {
                    debug!("适配器 {} 拒绝输入: {e}, 尝试下一个候选", candidate.format_id);
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(MexError::UnsupportedFormat(match last_error {
            Some(e) => format!("所有候选适配器均失败, 最后错误: {e}"),
            None => "没有可用的候选适配器".into(),
        }))
    }
}

impl Default for FormatRegistry {
    fn default() -> Self {
        Self::new()
    }
}
