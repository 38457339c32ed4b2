//! 通用工具模块
//!
//! # 设计思路
//!
//! 收拢检索链路里反复用到的小工具：缓存键摘要、URL 语法判断、
//! 静默释放可写资源、文本资源读取。它们都不依赖检索引擎本身，便于单独测试。
//!
//! # 实现思路
//!
//! - 摘要固定为 SHA-256（`sha2` 静态链接），输出大写十六进制，长度恒为 64。
//! - URL 判断直接复用 `reqwest::Url` 的解析器，与真正发请求时的规则一致。
//! - `close_quietly` 只吞掉 I/O 错误，panic 仍然向上传播。

use std::fmt::Write as _;
use std::io::{self, BufRead, BufReader, Read, Write};

use sha2::{Digest, Sha256};

const LINE_SEPARATOR: char = '\n';

/// 计算字节序列的 SHA-256 摘要并输出大写十六进制字符串。
///
/// 同一输入在任意进程、任意时刻都得到同一结果，可直接用作缓存文件名。
///
/// # 示例
/// ```rust
/// use image_retriever::util::digest_hex;
///
/// let key = digest_hex(b"http://example.test/a.png");
/// assert_eq!(key.len(), 64);
/// assert_eq!(key, digest_hex(b"http://example.test/a.png"));
/// ```
pub fn digest_hex(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    let mut hex = String::with_capacity(digest.len() * 2);
    for byte in digest.iter() {
        let _ = write!(hex, "{:02X}", byte);
    }
    hex
}

/// 能被识别为 URL 的协议。`C:\a.png`、`tiles:3.png` 这类输入会按文件路径处理。
const KNOWN_URL_SCHEMES: [&str; 5] = ["http", "https", "file", "ftp", "jar"];

/// 判断字符串是否为语法合法、且协议已知的绝对 URL。
///
/// 只做语法层面的判断，不会发起任何网络请求。
pub fn is_url_syntax(value: &str) -> bool {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return false;
    }

    reqwest::Url::parse(trimmed)
        .map(|url| KNOWN_URL_SCHEMES.contains(&url.scheme()))
        .unwrap_or(false)
}

/// 刷新并释放一个可写资源，吞掉释放过程中的 I/O 错误。
///
/// `None` 时什么也不做。
pub fn close_quietly<W: Write>(resource: Option<W>) {
    let Some(mut writer) = resource else {
        return;
    };

    if let Err(err) = writer.flush() {
        log::debug!("🔇 释放资源时忽略错误：{}", err);
    }
    drop(writer);
}

/// 按行读取文本资源，每行以 `\n` 结尾（CRLF 统一为 LF）。
pub fn read_text_resource<R: Read>(reader: R) -> io::Result<String> {
    let reader = BufReader::new(reader);
    let mut text = String::new();

    for line in reader.lines() {
        let line = line?;
        text.push_str(line.strip_suffix('\r').unwrap_or(&line));
        text.push(LINE_SEPARATOR);
    }

    Ok(text)
}
