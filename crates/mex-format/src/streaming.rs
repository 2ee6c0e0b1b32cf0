//! 流式数据源.
//!
//! 生产端 ([`StreamWriter`]) 在任意线程中追加数据, 消费端 ([`StreamingSource`])
//! 只读取已到达的前缀. 数据尚未到达时读取返回 0, 由上层转换为 `NeedMoreData`.
//! 可选的等待时长让读取在短时间内阻塞等待数据.

use std::io::{self, Read};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::io::{CacheStatus, DataSource};

/// 共享下载缓冲区
#[derive(Default)]
struct StreamBuffer {
    /// 已到达的数据
    data: Vec<u8>,
    /// 总大小 (None 表示未知)
    total_size: Option<u64>,
    /// 生产端是否已结束
    finished: bool,
    /// 待报告的读取错误 (报告一次后清除)
    error: Option<(io::ErrorKind, String)>,
    /// 消费端是否已释放
    aborted: bool,
}

type Shared = Arc<(Mutex<StreamBuffer>, Condvar)>;

fn lock(shared: &Shared) -> MutexGuard<'_, StreamBuffer> {
    shared.0.lock().unwrap_or_else(PoisonError::into_inner)
}

/// 流式数据源 (消费端)
pub struct StreamingSource {
    shared: Shared,
    /// 数据未到达时的最长等待时间
    wait: Option<Duration>,
    name: Option<String>,
}

/// 流式数据源的生产端
#[derive(Clone)]
pub struct StreamWriter {
    shared: Shared,
}

impl StreamingSource {
    /// 创建一对消费端/生产端
    pub fn new() -> (Self, StreamWriter) {
        let shared: Shared = Arc::new((Mutex::new(StreamBuffer::default()), Condvar::new()));
        let source = Self {
            shared: Arc::clone(&shared),
            wait: None,
            name: None,
        };
        (source, StreamWriter { shared })
    }

    /// 创建已知总大小的流 (如带 Content-Length 的下载)
    pub fn with_content_length(total_size: u64) -> (Self, StreamWriter) {
        let (source, writer) = Self::new();
        lock(&source.shared).total_size = Some(total_size);
        (source, writer)
    }

    /// 数据未到达时最多等待 `wait` 再返回
    pub fn with_wait(mut self, wait: Duration) -> Self {
        self.wait = Some(wait);
        self
    }

    /// 附加名称提示
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

impl Drop for StreamingSource {
    fn drop(&mut self) {
        let mut sb = lock(&self.shared);
        sb.aborted = true;
        self.shared.1.notify_all();
    }
}

impl DataSource for StreamingSource {
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let deadline = self.wait.map(|w| Instant::now() + w);
        let cvar = &self.shared.1;
        let mut sb = lock(&self.shared);
        loop {
            if let Some((kind, msg)) = sb.error.take() {
                return Err(io::Error::new(kind, msg));
            }
            let len = sb.data.len() as u64;
            if offset < len {
                let start = offset as usize;
                let to_read = buf.len().min(sb.data.len() - start);
                buf[..to_read].copy_from_slice(&sb.data[start..start + to_read]);
                return Ok(to_read);
            }
            if sb.finished {
                return Ok(0);
            }
            let remaining = match deadline {
                Some(d) => d.saturating_duration_since(Instant::now()),
                None => return Ok(0),
            };
            if remaining.is_zero() {
                return Ok(0);
            }
            sb = cvar
                .wait_timeout(sb, remaining)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    fn size(&self) -> Option<u64> {
        let sb = lock(&self.shared);
        match sb.total_size {
            Some(size) => Some(size),
            None if sb.finished => Some(sb.data.len() as u64),
            None => None,
        }
    }

    fn cache_status(&self) -> Option<CacheStatus> {
        let sb = lock(&self.shared);
        Some(CacheStatus {
            buffered_bytes: sb.data.len() as u64,
            reached_eos: sb.finished,
        })
    }

    fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }
}

impl StreamWriter {
    /// 追加数据
    pub fn append(&self, data: &[u8]) {
        let mut sb = lock(&self.shared);
        sb.data.extend_from_slice(data);
        self.shared.1.notify_all();
    }

    /// 设置总大小
    pub fn set_total_size(&self, total_size: u64) {
        lock(&self.shared).total_size = Some(total_size);
    }

    /// 标记数据已全部到达
    pub fn finish(&self) {
        let mut sb = lock(&self.shared);
        sb.finished = true;
        self.shared.1.notify_all();
    }

    /// 注入一次读取错误 (下一次读取时报告)
    pub fn fail(&self, kind: io::ErrorKind, message: impl Into<String>) {
        let mut sb = lock(&self.shared);
        sb.error = Some((kind, message.into()));
        self.shared.1.notify_all();
    }

    /// 已到达的字节数
    pub fn buffered(&self) -> u64 {
        lock(&self.shared).data.len() as u64
    }

    /// 消费端是否已释放
    pub fn is_aborted(&self) -> bool {
        lock(&self.shared).aborted
    }

    /// 从读取器持续拷贝数据直到结束
    ///
    /// 消费端释放时提前返回. 读取错误会转交给消费端并结束流.
    pub fn pump(&self, reader: &mut impl Read) -> io::Result<u64> {
        const CHUNK_SIZE: usize = 32 * 1024;
        let mut buf = [0u8; CHUNK_SIZE];
        let mut total = 0u64;

        loop {
            if self.is_aborted() {
                log::debug!("流式数据源已释放, 停止拷贝");
                return Ok(total);
            }
            match reader.read(&mut buf) {
                Ok(0) => {
                    log::debug!("流式数据拷贝完成, 共 {total} 字节");
                    self.finish();
                    return Ok(total);
                }
                Ok(n) => {
                    self.append(&buf[..n]);
                    total += n as u64;
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    log::error!("流式数据读取错误: {e}");
                    self.fail(e.kind(), e.to_string());
                    self.finish();
                    return Err(e);
                }
            }
        }
    }
}
