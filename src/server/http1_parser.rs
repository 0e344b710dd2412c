//! HTTP/1.1 请求头解析
//!
//! 只解析到升级决策所需的程度：请求行（prologue）和头部多值映射。
//! 请求体和响应语义由上层协作者负责。

use crate::error::{ProtocolError, ProtocolResult};
use crate::server::config::ServerConfig;
use crate::server::stream_buffer::ConnectionReader;

/// 请求行解析结果
///
/// 构造后不可变；升级时通过 [`Prologue::upgraded`] 派生带新版本号的副本。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prologue {
    /// HTTP 方法（原样保留大小写）
    pub method: String,
    /// 原始路径（不含 query 和 fragment）
    pub path: String,
    /// 查询串（不含 `?`）
    pub query: Option<String>,
    /// 片段（不含 `#`），正常客户端不会发送，但不丢弃
    pub fragment: Option<String>,
    /// 协议标记，总是 "HTTP"
    pub protocol: String,
    /// 协议版本，"1.1" 或升级后的 "2.0"
    pub version: String,
}

impl Prologue {
    /// 原始请求目标：路径加查询串（`:path` 伪头部使用该形式）
    pub fn raw_target(&self) -> String {
        match &self.query {
            Some(q) => format!("{}?{}", self.path, q),
            None => self.path.clone(),
        }
    }

    /// 派生升级后的请求行，方法与路径保持不变
    pub fn upgraded(&self, version: &str) -> Prologue {
        Prologue {
            version: version.to_string(),
            ..self.clone()
        }
    }
}

/// 插入有序的头部多值映射，名称查找不区分大小写
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderSet {
    entries: Vec<(String, String)>,
}

impl HeaderSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// 追加一个头部值，保留原始名称大小写
    pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.entries.push((name.into(), value.into()));
    }

    /// 取第一个匹配的值
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// 取所有匹配的值，按插入顺序
    pub fn get_all(&self, name: &str) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
            .collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// 移除所有匹配的头部，返回被移除的值
    pub fn remove(&mut self, name: &str) -> Vec<String> {
        let mut removed = Vec::new();
        self.entries.retain(|(n, v)| {
            if n.eq_ignore_ascii_case(name) {
                removed.push(v.clone());
                false
            } else {
                true
            }
        });
        removed
    }

    /// 覆盖写入：先移除同名头部再追加
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        self.remove(&name);
        self.append(name, value);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> + '_ {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }
}

/// 解析请求行
///
/// 形如 `GET /path?q=1#frag HTTP/1.1`，三段以空白分隔。
pub fn parse_prologue(line: &[u8]) -> ProtocolResult<Prologue> {
    let line = std::str::from_utf8(line)
        .map_err(|_| ProtocolError::MalformedPrologue("请求行不是合法 UTF-8".to_string()))?;

    let mut parts = line.split_ascii_whitespace();
    let (method, target, proto) = match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(m), Some(t), Some(p), None) => (m, t, p),
        _ => {
            return Err(ProtocolError::MalformedPrologue(format!(
                "请求行必须为三段: {:?}",
                line
            )))
        }
    };

    let (protocol, version) = proto.split_once('/').ok_or_else(|| {
        ProtocolError::MalformedPrologue(format!("协议段格式错误: {:?}", proto))
    })?;
    if protocol != "HTTP" {
        return Err(ProtocolError::MalformedPrologue(format!(
            "未知协议标记: {:?}",
            protocol
        )));
    }

    // 先剥离 fragment，再剥离 query
    let (rest, fragment) = match target.split_once('#') {
        Some((r, f)) => (r, Some(f.to_string())),
        None => (target, None),
    };
    let (path, query) = match rest.split_once('?') {
        Some((p, q)) => (p.to_string(), Some(q.to_string())),
        None => (rest.to_string(), None),
    };

    Ok(Prologue {
        method: method.to_string(),
        path,
        query,
        fragment,
        protocol: protocol.to_string(),
        version: version.to_string(),
    })
}

/// 解析单个头部行，返回（名称，去除首尾空白的值）
pub fn parse_header_line(line: &[u8]) -> ProtocolResult<(String, String)> {
    let line = std::str::from_utf8(line)
        .map_err(|_| ProtocolError::MalformedHeader("头部行不是合法 UTF-8".to_string()))?;
    let (name, value) = line
        .split_once(':')
        .ok_or_else(|| ProtocolError::MalformedHeader(format!("缺少冒号分隔: {:?}", line)))?;
    if name.is_empty() || name.contains(' ') || name.contains('\t') {
        return Err(ProtocolError::MalformedHeader(format!(
            "头部名称非法: {:?}",
            name
        )));
    }
    Ok((name.to_string(), value.trim().to_string()))
}

/// 从缓冲读取端取出一行（消费到 `\n` 为止，返回内容不含 `\r\n`）
async fn read_line(reader: &mut ConnectionReader, max: usize) -> ProtocolResult<Vec<u8>> {
    loop {
        if let Some(i) = reader.find_byte(b'\n') {
            if i > max {
                return Err(ProtocolError::HeaderSectionTooLarge(i));
            }
            let mut line = reader.take(i + 1);
            line.truncate(i);
            if line.last() == Some(&b'\r') {
                line.truncate(line.len() - 1);
            }
            return Ok(line.to_vec());
        }
        if reader.available() > max {
            return Err(ProtocolError::HeaderSectionTooLarge(reader.available()));
        }
        if reader.fill().await? == 0 {
            return Err(ProtocolError::ConnectionClosed);
        }
    }
}

/// 读取并解析一个完整的请求头部区（请求行 + 头部 + 空行）
///
/// 消费掉头部区的全部字节，之后缓冲区中剩下的就是请求体或下一个协议的数据。
pub async fn read_request_head(
    reader: &mut ConnectionReader,
    config: &ServerConfig,
) -> ProtocolResult<(Prologue, HeaderSet)> {
    let prologue_line = read_line(reader, config.max_prologue_length())
        .await
        .map_err(|e| match e {
            ProtocolError::HeaderSectionTooLarge(n) => ProtocolError::MalformedPrologue(
                format!("请求行超过 {} 字节仍未结束", n),
            ),
            other => other,
        })?;
    let prologue = parse_prologue(&prologue_line)?;

    let mut headers = HeaderSet::new();
    let mut consumed = prologue_line.len();
    loop {
        let line = read_line(reader, config.max_header_bytes()).await?;
        if line.is_empty() {
            break;
        }
        consumed += line.len() + 2;
        if consumed > config.max_header_bytes() {
            return Err(ProtocolError::HeaderSectionTooLarge(consumed));
        }
        let (name, value) = parse_header_line(&line)?;
        headers.append(name, value);
    }

    Ok((prologue, headers))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::stream_buffer::ConnectionReader;

    #[test]
    fn test_parse_prologue_basic() {
        let p = parse_prologue(b"GET / HTTP/1.1").unwrap();
        assert_eq!(p.method, "GET");
        assert_eq!(p.path, "/");
        assert_eq!(p.query, None);
        assert_eq!(p.protocol, "HTTP");
        assert_eq!(p.version, "1.1");
        assert_eq!(p.raw_target(), "/");
    }

    #[test]
    fn test_parse_prologue_query_fragment() {
        let p = parse_prologue(b"POST /api/v1?x=1&y=2#top HTTP/1.1").unwrap();
        assert_eq!(p.path, "/api/v1");
        assert_eq!(p.query.as_deref(), Some("x=1&y=2"));
        assert_eq!(p.fragment.as_deref(), Some("top"));
        assert_eq!(p.raw_target(), "/api/v1?x=1&y=2");
    }

    #[test]
    fn test_parse_prologue_rejects_garbage() {
        assert!(parse_prologue(b"GET /").is_err());
        assert!(parse_prologue(b"GET / FTP/1.1").is_err());
        assert!(parse_prologue(b"GET / HTTP/1.1 extra").is_err());
    }

    #[test]
    fn test_prologue_upgraded_keeps_target() {
        let p = parse_prologue(b"GET /chat?room=1 HTTP/1.1").unwrap();
        let up = p.upgraded("2.0");
        assert_eq!(up.method, "GET");
        assert_eq!(up.raw_target(), "/chat?room=1");
        assert_eq!(up.version, "2.0");
        assert_eq!(p.version, "1.1");
    }

    #[test]
    fn test_header_set_case_insensitive_multimap() {
        let mut h = HeaderSet::new();
        h.append("Host", "example.com");
        h.append("Accept", "text/html");
        h.append("accept", "application/json");

        assert_eq!(h.get("host"), Some("example.com"));
        assert_eq!(h.get("HOST"), Some("example.com"));
        assert_eq!(h.get_all("Accept"), ["text/html", "application/json"]);
        assert!(h.contains("ACCEPT"));
        assert_eq!(h.len(), 3);

        let removed = h.remove("host");
        assert_eq!(removed, ["example.com"]);
        assert!(!h.contains("Host"));
        assert_eq!(h.len(), 2);
    }

    #[test]
    fn test_header_set_preserves_insertion_order() {
        let mut h = HeaderSet::new();
        h.append("b", "2");
        h.append("a", "1");
        h.append("c", "3");
        let names: Vec<&str> = h.iter().map(|(n, _)| n).collect();
        assert_eq!(names, ["b", "a", "c"]);
    }

    #[test]
    fn test_parse_header_line() {
        let (n, v) = parse_header_line(b"Content-Type:  text/plain ").unwrap();
        assert_eq!(n, "Content-Type");
        assert_eq!(v, "text/plain");
        // 空值合法（如空的 HTTP2-Settings）
        let (_, v) = parse_header_line(b"HTTP2-Settings:").unwrap();
        assert_eq!(v, "");
        assert!(parse_header_line(b"no colon here").is_err());
        assert!(parse_header_line(b"bad name: x").is_err());
    }

    #[tokio::test]
    async fn test_read_request_head_consumes_exactly_head() {
        let data = b"GET /x HTTP/1.1\r\nHost: a\r\nUpgrade: h2c\r\n\r\nBODY";
        let mut reader = ConnectionReader::with_prefix(Box::new(tokio::io::empty()), data);
        let config = ServerConfig::default();

        let (prologue, headers) = read_request_head(&mut reader, &config).await.unwrap();
        assert_eq!(prologue.method, "GET");
        assert_eq!(headers.get("upgrade"), Some("h2c"));
        // 头部区之后的字节原样留在缓冲区
        assert_eq!(reader.peeked(), b"BODY");
    }

    #[tokio::test]
    async fn test_read_request_head_line_too_long() {
        let mut data = Vec::from(&b"GET /"[..]);
        data.extend(std::iter::repeat(b'a').take(200));
        let mut reader = ConnectionReader::with_prefix(Box::new(tokio::io::empty()), &data);
        let config = ServerConfig::builder().max_prologue_length(64).build();

        assert!(matches!(
            read_request_head(&mut reader, &config).await,
            Err(ProtocolError::MalformedPrologue(_))
        ));
    }
}
