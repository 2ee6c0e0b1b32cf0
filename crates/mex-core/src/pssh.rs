//! 保护系统头 (PSSH) 扁平数据块解析.
//!
//! 适配器把容器中的所有 `pssh` box 压平成一个数据块, 存入容器级格式描述的
//! `pssh` 键. 数据块由若干条目首尾相接组成:
//! ```text
//! SystemID:  16 bytes (大端, 高 8 字节 + 低 8 字节)
//! Length:     4 bytes (小端, 见 PsshLengthOrder)
//! Payload:   Length bytes
//! ```
//!
//! 长度字段的字节序固定为小端, 与 MP4 适配器写出的数据块一致,
//! 也与原平台 (ARM/x86) 的本机字节序一致. 不做任何字节序猜测.

use std::collections::HashMap;

use byteorder::{BigEndian, ByteOrder, LittleEndian};
use uuid::Uuid;

use crate::error::{MexError, MexResult};

/// 长度字段字节序
pub type PsshLengthOrder = LittleEndian;

/// 单个条目的头部大小 (SystemID + Length)
pub const PSSH_ENTRY_HEADER_SIZE: usize = 16 + 4;

/// Widevine: `edef8ba9-79d6-4ace-a3c8-27dcd51d21ed`
pub const WIDEVINE_SYSTEM_ID: Uuid = Uuid::from_u128(0xedef8ba9_79d6_4ace_a3c8_27dcd51d21ed);

/// PlayReady: `9a04f079-9840-4286-ab92-e65be0885f95`
pub const PLAYREADY_SYSTEM_ID: Uuid = Uuid::from_u128(0x9a04f079_9840_4286_ab92_e65be0885f95);

/// FairPlay: `94ce86fb-07ff-4f43-adb8-93d2fa968ca2`
pub const FAIRPLAY_SYSTEM_ID: Uuid = Uuid::from_u128(0x94ce86fb_07ff_4f43_adb8_93d2fa968ca2);

/// W3C ClearKey: `1077efec-c0b2-4d02-ace3-3c1e52e2fb4b`
pub const CLEARKEY_SYSTEM_ID: Uuid = Uuid::from_u128(0x1077efec_c0b2_4d02_ace3_3c1e52e2fb4b);

/// PSSH 条目
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PsshEntry {
    /// 保护系统标识
    pub system_id: Uuid,
    /// 方案相关数据
    pub data: Vec<u8>,
}

/// 解析后的保护系统头, 保留条目原始顺序
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PsshInfo {
    entries: Vec<PsshEntry>,
}

impl PsshInfo {
    /// 创建空集合
    pub fn new() -> Self {
        Self::default()
    }

    /// 追加条目
    pub fn push(&mut self, system_id: Uuid, data: impl Into<Vec<u8>>) {
        self.entries.push(PsshEntry {
            system_id,
            data: data.into(),
        });
    }

    /// 全部条目 (原始顺序)
    pub fn entries(&self) -> &[PsshEntry] {
        &self.entries
    }

    /// 查找指定系统的数据 (重复时取第一个)
    pub fn get(&self, system_id: &Uuid) -> Option<&[u8]> {
        self.entries
            .iter()
            .find(|e| &e.system_id == system_id)
            .map(|e| e.data.as_slice())
    }

    /// 条目数量
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// 是否为空
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 转换为 UUID → 数据映射 (重复时保留第一个)
    pub fn to_map(&self) -> HashMap<Uuid, Vec<u8>> {
        let mut map = HashMap::with_capacity(self.entries.len());
        for entry in &self.entries {
            map.entry(entry.system_id)
                .or_insert_with(|| entry.data.clone());
        }
        map
    }

    /// 按相同布局重新序列化
    ///
    /// 条目数据超出 4 字节长度字段的表示范围时返回
    /// [`MexError::MalformedProtectionHeader`].
    pub fn to_bytes(&self) -> MexResult<Vec<u8>> {
        let total: usize = self
            .entries
            .iter()
            .map(|e| PSSH_ENTRY_HEADER_SIZE + e.data.len())
            .sum();
        let mut out = Vec::with_capacity(total);
        for entry in &self.entries {
            let (msb, lsb) = entry.system_id.as_u64_pair();
            let mut header = [0u8; PSSH_ENTRY_HEADER_SIZE];
            BigEndian::write_u64(&mut header[0..8], msb);
            BigEndian::write_u64(&mut header[8..16], lsb);
            PsshLengthOrder::write_u32(&mut header[16..20], entry_length(entry.data.len())?);
            out.extend_from_slice(&header);
            out.extend_from_slice(&entry.data);
        }
        Ok(out)
    }
}

/// 条目数据长度字段
fn entry_length(len: usize) -> MexResult<u32> {
    u32::try_from(len).map_err(|_| {
        MexError::MalformedProtectionHeader(format!("条目数据 {len} 字节超出长度字段范围"))
    })
}

/// 解析扁平 PSSH 数据块
///
/// 严格校验边界: 条目头部不完整或长度字段越界时返回
/// [`MexError::MalformedProtectionHeader`], 不产生部分条目.
pub fn parse_pssh(raw: &[u8]) -> MexResult<PsshInfo> {
    let mut info = PsshInfo::new();
    let mut pos = 0usize;

    while pos < raw.len() {
        let remaining = raw.len() - pos;
        if remaining < PSSH_ENTRY_HEADER_SIZE {
            return Err(MexError::MalformedProtectionHeader(format!(
                "偏移 {pos} 处剩余 {remaining} 字节, 不足一个条目头部"
            )));
        }

        let msb = BigEndian::read_u64(&raw[pos..pos + 8]);
        let lsb = BigEndian::read_u64(&raw[pos + 8..pos + 16]);
        let len = PsshLengthOrder::read_u32(&raw[pos + 16..pos + 20]) as usize;
        pos += PSSH_ENTRY_HEADER_SIZE;

        let end = pos.checked_add(len).filter(|&end| end <= raw.len()).ok_or_else(|| {
            MexError::MalformedProtectionHeader(format!(
                "条目长度 {len} 超出数据块末尾 (偏移 {pos}, 总长 {})",
                raw.len()
            ))
        })?;

        info.push(Uuid::from_u64_pair(msb, lsb), &raw[pos..end]);
        pos = end;
    }

    Ok(info)
}
