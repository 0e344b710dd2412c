//! 连接读写缓冲
//!
//! 协议嗅探要求"只看不拿"：在引擎选定之前，任何嗅探器都不能消费字节。
//! `ConnectionReader` 在原始流之上维护一个可窥视的缓冲区，嗅探阶段只读
//! 缓冲视图，引擎接管后再按需消费，已缓冲的字节随上下文整体移交，
//! 不丢失、不重复解析。

use bytes::{Buf, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{ProtocolError, ProtocolResult};

/// 单次从底层流读取的块大小
const READ_CHUNK_SIZE: usize = 4096;

/// 可窥视的连接读取端
///
/// 对引擎而言读取是同步挂起语义：`fill` 在没有新字节前挂起当前任务，
/// 返回 0 表示对端关闭。
pub struct ConnectionReader {
    stream: Box<dyn AsyncRead + Unpin + Send>,
    buf: BytesMut,
    eof: bool,
}

impl ConnectionReader {
    pub fn new(stream: Box<dyn AsyncRead + Unpin + Send>) -> Self {
        Self {
            stream,
            buf: BytesMut::with_capacity(READ_CHUNK_SIZE),
            eof: false,
        }
    }

    /// 用已经预读出来的字节构造读取端
    ///
    /// 用于上游（如 TLS 终结层）已经从流中取走一段数据的场景，
    /// 这些字节会先于流内容被重放。
    pub fn with_prefix(stream: Box<dyn AsyncRead + Unpin + Send>, prefix: &[u8]) -> Self {
        let mut buf = BytesMut::with_capacity(prefix.len().max(READ_CHUNK_SIZE));
        buf.extend_from_slice(prefix);
        Self { stream, buf, eof: false }
    }

    /// 当前已缓冲的字节数
    pub fn available(&self) -> usize {
        self.buf.len()
    }

    /// 缓冲区的只读视图，不推进读取位置
    pub fn peeked(&self) -> &[u8] {
        &self.buf
    }

    /// 窥视前 n 个字节；不足 n 个时返回 None
    pub fn peek(&self, n: usize) -> Option<&[u8]> {
        if self.buf.len() >= n {
            Some(&self.buf[..n])
        } else {
            None
        }
    }

    /// 消费并丢弃前 n 个字节
    ///
    /// # Panics
    /// n 超过已缓冲字节数时 panic（调用方必须先确认 `available`）。
    pub fn advance(&mut self, n: usize) {
        self.buf.advance(n);
    }

    /// 取走前 n 个字节（调用方必须先用 `fill_until` 保证字节数足够）
    pub fn take(&mut self, n: usize) -> BytesMut {
        self.buf.split_to(n)
    }

    /// 在已缓冲字节中查找指定字节值，返回其下标
    pub fn find_byte(&self, value: u8) -> Option<usize> {
        self.buf.iter().position(|&b| b == value)
    }

    /// 底层流是否已经到达 EOF
    pub fn is_eof(&self) -> bool {
        self.eof
    }

    /// 从底层流补充一次数据，返回本次读到的字节数（0 表示对端关闭）
    pub async fn fill(&mut self) -> ProtocolResult<usize> {
        if self.eof {
            return Ok(0);
        }
        self.buf.reserve(READ_CHUNK_SIZE);
        let n = self.stream.read_buf(&mut self.buf).await?;
        if n == 0 {
            self.eof = true;
        }
        Ok(n)
    }

    /// 持续补充数据直到缓冲区至少有 n 个字节
    pub async fn fill_until(&mut self, n: usize) -> ProtocolResult<()> {
        while self.buf.len() < n {
            if self.fill().await? == 0 {
                return Err(ProtocolError::ConnectionClosed);
            }
        }
        Ok(())
    }
}

/// 连接写入端
///
/// 不做内部缓冲，flush 语义完全由调用方控制。
pub struct ConnectionWriter {
    stream: Box<dyn AsyncWrite + Unpin + Send>,
}

impl ConnectionWriter {
    pub fn new(stream: Box<dyn AsyncWrite + Unpin + Send>) -> Self {
        Self { stream }
    }

    pub async fn write_all(&mut self, data: &[u8]) -> ProtocolResult<()> {
        self.stream.write_all(data).await?;
        Ok(())
    }

    pub async fn flush(&mut self) -> ProtocolResult<()> {
        self.stream.flush().await?;
        Ok(())
    }

    pub async fn shutdown(&mut self) -> ProtocolResult<()> {
        self.stream.shutdown().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reader_over(data: &[u8]) -> ConnectionReader {
        ConnectionReader::with_prefix(Box::new(tokio::io::empty()), data)
    }

    #[test]
    fn test_peek_does_not_consume() {
        let r = reader_over(b"GET / HTTP/1.1\r\n");
        assert_eq!(r.available(), 16);
        assert_eq!(r.peek(3).unwrap(), b"GET");
        assert_eq!(r.peek(3).unwrap(), b"GET");
        assert_eq!(r.available(), 16);
        assert!(r.peek(17).is_none());
    }

    #[test]
    fn test_advance_and_find() {
        let mut r = reader_over(b"abc\ndef");
        assert_eq!(r.find_byte(b'\n'), Some(3));
        r.advance(4);
        assert_eq!(r.peeked(), b"def");
        assert_eq!(r.find_byte(b'\n'), None);
    }

    #[tokio::test]
    async fn test_fill_from_stream() {
        let (client, server) = tokio::io::duplex(1024);
        let (sr, _sw) = tokio::io::split(server);
        let (_cr, mut cw) = tokio::io::split(client);

        let mut reader = ConnectionReader::new(Box::new(sr));
        cw.write_all(b"hello").await.unwrap();
        cw.shutdown().await.unwrap();

        reader.fill_until(5).await.unwrap();
        assert_eq!(reader.peeked(), b"hello");
        // EOF 之后继续要求更多字节应当报连接关闭
        assert!(matches!(
            reader.fill_until(6).await,
            Err(ProtocolError::ConnectionClosed)
        ));
        assert!(reader.is_eof());
    }

    #[tokio::test]
    async fn test_prefix_replays_before_stream() {
        let (client, server) = tokio::io::duplex(1024);
        let (sr, _sw) = tokio::io::split(server);
        let (_cr, mut cw) = tokio::io::split(client);

        let mut reader = ConnectionReader::with_prefix(Box::new(sr), b"pre-");
        cw.write_all(b"rest").await.unwrap();
        cw.shutdown().await.unwrap();

        reader.fill_until(8).await.unwrap();
        assert_eq!(reader.peeked(), b"pre-rest");
    }
}
