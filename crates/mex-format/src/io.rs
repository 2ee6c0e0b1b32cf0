//! I/O 抽象层.
//!
//! [`DataSource`] 是核心消费的随机访问字节源能力, 由调用方在打开前创建.
//! [`IoContext`] 在其上维护读取位置与预读缓冲区, 为适配器提供顺序读取接口.
//!
//! 结束条件: 只有显式的大小上界或流结束标志才表示数据结束;
//! 短读表示数据暂时只部分可用 (流式数据源).

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;

use bytes::Bytes;
use log::debug;
use mex_core::{MexError, MexResult};

/// 缓存/缓冲状态 (仅流式数据源提供)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStatus {
    /// 从偏移 0 起连续可读的字节数
    pub buffered_bytes: u64,
    /// 生产端是否已结束 (缓存已到达流末尾)
    pub reached_eos: bool,
}

/// 数据源 trait
///
/// 实现此 trait 以接入不同的字节来源 (文件区间、内存、网络缓冲等).
pub trait DataSource: Send {
    /// 从 `offset` 处读取数据到 `buf`
    ///
    /// 返回实际读取的字节数. 返回 0 表示该偏移处暂无数据;
    /// 是否已到末尾由 [`DataSource::size`] 和 [`DataSource::cache_status`] 判断.
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<usize>;

    /// 总大小 (未知时为 None, 如直播流)
    fn size(&self) -> Option<u64>;

    /// 缓冲状态, 非流式数据源返回 None
    fn cache_status(&self) -> Option<CacheStatus> {
        None
    }

    /// 名称提示 (如文件路径), 用于按扩展名探测
    fn name(&self) -> Option<&str> {
        None
    }
}

/// 默认预读缓冲区大小 (32 KB)
const DEFAULT_BUFFER_SIZE: usize = 32 * 1024;

/// I/O 上下文
///
/// 封装数据源, 为适配器提供带预读缓冲的顺序读取接口.
pub struct IoContext {
    /// 底层数据源
    source: Box<dyn DataSource>,
    /// 当前读取位置
    pos: u64,
    /// 预读缓冲区
    buffer: Vec<u8>,
    /// 缓冲区对应的数据源偏移
    buf_start: u64,
    /// 缓冲区中的有效数据长度
    buf_len: usize,
}

impl IoContext {
    /// 从数据源创建上下文
    pub fn new(source: Box<dyn DataSource>) -> Self {
        Self {
            source,
            pos: 0,
            buffer: vec![0u8; DEFAULT_BUFFER_SIZE],
            buf_start: 0,
            buf_len: 0,
        }
    }

    /// 从文件路径打开 (只读)
    pub fn open_read(path: impl AsRef<Path>) -> MexResult<Self> {
        Ok(Self::new(Box::new(FileSource::open(path)?)))
    }

    /// 从内存数据创建
    pub fn from_bytes(data: impl Into<Bytes>) -> Self {
        Self::new(Box::new(MemorySource::new(data)))
    }

    // ========================
    // 读取方法
    // ========================

    /// 读取指定字节数
    pub fn read_exact(&mut self, buf: &mut [u8]) -> MexResult<()> {
        let mut total_read = 0;
        while total_read < buf.len() {
            let buf_end = self.buf_start + self.buf_len as u64;
            if self.pos >= self.buf_start && self.pos < buf_end {
                let in_buf = (self.pos - self.buf_start) as usize;
                let to_copy = (self.buf_len - in_buf).min(buf.len() - total_read);
                buf[total_read..total_read + to_copy]
                    .copy_from_slice(&self.buffer[in_buf..in_buf + to_copy]);
                self.pos += to_copy as u64;
                total_read += to_copy;
            } else {
                self.buf_start = self.pos;
                self.buf_len = self.source.read_at(self.pos, &mut self.buffer)?;
                if self.buf_len == 0 {
                    return Err(self.missing_data_error(self.pos));
                }
            }
        }
        Ok(())
    }

    /// 读取 1 个字节
    pub fn read_u8(&mut self) -> MexResult<u8> {
        let mut buf = [0u8; 1];
        self.read_exact(&mut buf)?;
        Ok(buf[0])
    }

    /// 读取 u16 小端
    pub fn read_u16_le(&mut self) -> MexResult<u16> {
        let mut buf = [0u8; 2];
        self.read_exact(&mut buf)?;
        Ok(u16::from_le_bytes(buf))
    }

    /// 读取 u32 小端
    pub fn read_u32_le(&mut self) -> MexResult<u32> {
        let mut buf = [0u8; 4];
        self.read_exact(&mut buf)?;
        Ok(u32::from_le_bytes(buf))
    }

    /// 读取 u16 大端
    pub fn read_u16_be(&mut self) -> MexResult<u16> {
        let mut buf = [0u8; 2];
        self.read_exact(&mut buf)?;
        Ok(u16::from_be_bytes(buf))
    }

    /// 读取 u24 大端 (3 字节无符号整数)
    pub fn read_u24_be(&mut self) -> MexResult<u32> {
        let mut buf = [0u8; 3];
        self.read_exact(&mut buf)?;
        Ok((u32::from(buf[0]) << 16) | (u32::from(buf[1]) << 8) | u32::from(buf[2]))
    }

    /// 读取 u32 大端
    pub fn read_u32_be(&mut self) -> MexResult<u32> {
        let mut buf = [0u8; 4];
        self.read_exact(&mut buf)?;
        Ok(u32::from_be_bytes(buf))
    }

    /// 读取 i32 大端
    pub fn read_i32_be(&mut self) -> MexResult<i32> {
        let mut buf = [0u8; 4];
        self.read_exact(&mut buf)?;
        Ok(i32::from_be_bytes(buf))
    }

    /// 读取 u64 大端
    pub fn read_u64_be(&mut self) -> MexResult<u64> {
        let mut buf = [0u8; 8];
        self.read_exact(&mut buf)?;
        Ok(u64::from_be_bytes(buf))
    }

    /// 读取 4 字节标签 (FourCC)
    pub fn read_tag(&mut self) -> MexResult<[u8; 4]> {
        let mut buf = [0u8; 4];
        self.read_exact(&mut buf)?;
        Ok(buf)
    }

    /// 读取指定数量的字节
    pub fn read_bytes(&mut self, count: usize) -> MexResult<Vec<u8>> {
        let mut buf = vec![0u8; count];
        self.read_exact(&mut buf)?;
        Ok(buf)
    }

    /// 尽量读取最多 `max` 字节, 不要求数据完整可用
    ///
    /// 用于格式探测: 流式数据源只下载了一部分时返回已有的部分.
    pub fn read_available(&mut self, max: usize) -> MexResult<Vec<u8>> {
        let mut out = vec![0u8; max];
        let mut filled = 0;
        while filled < max {
            let n = self
                .source
                .read_at(self.pos + filled as u64, &mut out[filled..])?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        out.truncate(filled);
        self.pos += filled as u64;
        Ok(out)
    }

    /// 在指定偏移处读满 `buf`, 不影响当前读取位置与预读缓冲区
    pub fn read_exact_at(&mut self, offset: u64, buf: &mut [u8]) -> MexResult<()> {
        let mut filled = 0;
        while filled < buf.len() {
            let at = offset + filled as u64;
            let n = self.source.read_at(at, &mut buf[filled..])?;
            if n == 0 {
                return Err(self.missing_data_error(at));
            }
            filled += n;
        }
        Ok(())
    }

    /// 跳过指定字节数
    pub fn skip(&mut self, count: u64) -> MexResult<()> {
        self.pos += count;
        Ok(())
    }

    // ========================
    // 定位方法
    // ========================

    /// 定位 (seek)
    ///
    /// 只移动读取位置, 预读缓冲区在位置落入其中时继续复用.
    pub fn seek(&mut self, pos: SeekFrom) -> MexResult<u64> {
        let new_pos = match pos {
            SeekFrom::Start(offset) => offset as i128,
            SeekFrom::Current(offset) => self.pos as i128 + offset as i128,
            SeekFrom::End(offset) => {
                let size = self.source.size().ok_or_else(|| {
                    MexError::InvalidArgument("数据源大小未知, 无法从末尾 seek".into())
                })?;
                size as i128 + offset as i128
            }
        };
        if new_pos < 0 {
            return Err(MexError::InvalidArgument("seek 位置不能为负".into()));
        }
        self.pos = new_pos as u64;
        Ok(self.pos)
    }

    /// 当前读取位置
    pub fn position(&self) -> u64 {
        self.pos
    }

    /// 数据源总大小
    pub fn size(&self) -> Option<u64> {
        self.source.size()
    }

    /// 数据源缓冲状态
    pub fn cache_status(&self) -> Option<CacheStatus> {
        self.source.cache_status()
    }

    /// 数据源名称提示
    pub fn name(&self) -> Option<&str> {
        self.source.name()
    }

    /// 偏移处没有数据时的错误
    ///
    /// 流式数据源尚未结束时为 `NeedMoreData`, 否则为 `Eof`.
    fn missing_data_error(&self, offset: u64) -> MexError {
        match self.source.cache_status() {
            Some(status) if !status.reached_eos => {
                debug!(
                    "偏移 {offset} 处数据尚未到达 (已缓冲 {} 字节)",
                    status.buffered_bytes
                );
                MexError::NeedMoreData
            }
            _ => {
                debug!("偏移 {offset} 处已无数据");
                MexError::Eof
            }
        }
    }
}

/// 文件区间数据源
///
/// 对应 "文件描述符 + 起始偏移 + 长度" 的打开方式.
pub struct FileSource {
    file: File,
    /// 区间在文件中的起始偏移
    start: u64,
    /// 区间长度 (已裁剪到文件末尾)
    length: u64,
    /// 文件路径 (用于扩展名探测)
    path: Option<String>,
}

impl FileSource {
    /// 打开整个文件
    pub fn open(path: impl AsRef<Path>) -> MexResult<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let mut source = Self::from_file_range(file, 0, u64::MAX)?;
        source.path = Some(path.to_string_lossy().into_owned());
        Ok(source)
    }

    /// 使用整个已打开文件
    pub fn from_file(file: File) -> MexResult<Self> {
        Self::from_file_range(file, 0, u64::MAX)
    }

    /// 使用已打开文件的 `[offset, offset + length)` 区间
    ///
    /// 长度超过文件末尾时裁剪; 偏移越过文件末尾返回 `InvalidArgument`.
    pub fn from_file_range(file: File, offset: u64, length: u64) -> MexResult<Self> {
        let file_size = file.metadata()?.len();
        if offset > file_size {
            return Err(MexError::InvalidArgument(format!(
                "起始偏移 {offset} 超出文件大小 {file_size}"
            )));
        }
        let length = length.min(file_size - offset);
        Ok(Self {
            file,
            start: offset,
            length,
            path: None,
        })
    }
}

impl DataSource for FileSource {
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        if offset >= self.length {
            return Ok(0);
        }
        let to_read = (buf.len() as u64).min(self.length - offset) as usize;
        self.file.seek(SeekFrom::Start(self.start + offset))?;
        self.file.read(&mut buf[..to_read])
    }

    fn size(&self) -> Option<u64> {
        Some(self.length)
    }

    fn name(&self) -> Option<&str> {
        self.path.as_deref()
    }
}

/// 内存数据源
///
/// 用于测试和内存中处理.
pub struct MemorySource {
    /// 数据缓冲区
    data: Bytes,
    /// 名称提示
    name: Option<String>,
}

impl MemorySource {
    /// 从已有数据创建
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            name: None,
        }
    }

    /// 附加名称提示 (如 "clip.mp4")
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// 获取内部数据
    pub fn data(&self) -> &Bytes {
        &self.data
    }
}

impl DataSource for MemorySource {
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        let len = self.data.len() as u64;
        if offset >= len {
            return Ok(0);
        }
        let start = offset as usize;
        let to_read = buf.len().min(self.data.len() - start);
        buf[..to_read].copy_from_slice(&self.data[start..start + to_read]);
        Ok(to_read)
    }

    fn size(&self) -> Option<u64> {
        Some(self.data.len() as u64)
    }

    fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }
}

/// 通用 `Read + Seek` 数据源
///
/// 接入调用方自定义的读取器 (如解压流、内存游标).
pub struct ReadSeekSource<R> {
    reader: R,
    size: u64,
}

impl<R: Read + Seek + Send> ReadSeekSource<R> {
    /// 包装读取器, 通过 seek 到末尾获取总大小
    pub fn new(mut reader: R) -> MexResult<Self> {
        let size = reader.seek(SeekFrom::End(0))?;
        reader.seek(SeekFrom::Start(0))?;
        Ok(Self { reader, size })
    }

    /// 取回内部读取器
    pub fn into_inner(self) -> R {
        self.reader
    }
}

impl<R: Read + Seek + Send> DataSource for ReadSeekSource<R> {
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        if offset >= self.size {
            return Ok(0);
        }
        let to_read = (buf.len() as u64).min(self.size - offset) as usize;
        self.reader.seek(SeekFrom::Start(offset))?;
        self.reader.read(&mut buf[..to_read])
    }

    fn size(&self) -> Option<u64> {
        Some(self.size)
    }
}
