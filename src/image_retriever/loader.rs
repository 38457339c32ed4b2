//! # 网络加载模块
//!
//! ## 设计思路
//!
//! 负责把一个 URL 变成原始字节，并在“尽可能早”的阶段执行输入校验，尽快失败，
//! 减少不必要的内存与带宽消耗。每次调用只发一次 GET，不重试、不跟随缓存语义。
//!
//! ## 实现思路
//!
//! - 协议校验：只接受 http / https。
//! - 连接超时由客户端配置；读取超时作用于响应头以及每一个数据块。
//! - 流式读取 + 体积上限，首个 4KB 内被 `infer` 明确识别为非图片时提前放弃（软失败）。
//! - 每个数据块前检查取消标志。
//! - 响应体随 `Response` 一起在任意退出路径上释放。

use std::time::Instant;

use crate::retriever::RetrievalContext;

use super::{ImageError, ImageHandler, ImageRetrieverConfig};

const STREAM_SIGNATURE_PROBE_BYTES: usize = 4096;
const BUFFER_INITIAL_CAPACITY: usize = 16 * 1024;
const ACCEPT_IMAGES: &str = "image/avif,image/webp,image/apng,image/*,*/*;q=0.8";

/// 探测结果。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SignatureProbe {
    /// 字节不足以判断，继续读取
    Pending,
    /// 已识别为图片，或探测窗口内无法识别（交给解码器判断）
    Accepted,
    /// 已明确识别为非图片
    Rejected(&'static str),
}

pub(super) fn build_http_client(config: &ImageRetrieverConfig) -> Result<reqwest::Client, ImageError> {
    reqwest::Client::builder()
        .connect_timeout(config.connect_timeout())
        .user_agent(config.user_agent.clone())
        .build()
        .map_err(|e| ImageError::Config(format!("无法创建 HTTP 客户端：{}", e)))
}

/// 去掉 query 与 fragment，避免签名等敏感参数进入日志。
pub(crate) fn redact_url_for_log(url: &str) -> String {
    let Ok(parsed) = reqwest::Url::parse(url) else {
        return "<invalid-url>".to_string();
    };

    let host = parsed.host_str().unwrap_or("<unknown-host>");
    let port = parsed.port().map(|p| format!(":{}", p)).unwrap_or_default();

    format!("{}://{}{}{}", parsed.scheme(), host, port, parsed.path())
}

impl ImageHandler {
    /// 下载 URL 对应的原始字节。
    ///
    /// - `Ok(Some(bytes))`：下载完成
    /// - `Ok(None)`：内容明确不是图片，已提前放弃
    /// - `Err(_)`：网络、超时、体积、协议或取消错误
    pub(super) async fn fetch_url(&self, url: &str, ctx: &RetrievalContext) -> Result<Option<Vec<u8>>, ImageError> {
        let parsed = reqwest::Url::parse(url).map_err(|e| ImageError::InvalidFormat(format!("URL 格式错误：{}", e)))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(ImageError::InvalidFormat(format!("不支持的 URL 协议：{}", parsed.scheme())));
        }

        ctx.ensure_active()?;

        let config = self.config();
        let read_timeout = config.read_timeout();
        let started = Instant::now();
        log::debug!("📡 发送 HTTP 请求 - {}", redact_url_for_log(url));

        let request = self
            .client
            .get(parsed)
            .header(reqwest::header::ACCEPT, ACCEPT_IMAGES)
            .send();
        let mut response = tokio::time::timeout(read_timeout, request)
            .await
            .map_err(|_| ImageError::Timeout(format!("等待响应超时（{}ms）", config.read_timeout_ms)))?
            .map_err(|e| self.map_reqwest_error(e, url))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ImageError::Network(format!(
                "HTTP {}: {}",
                status.as_u16(),
                Self::status_message(status.as_u16())
            )));
        }

        let total_len = response.content_length();
        if let Some(size) = total_len {
            if size > config.max_file_size {
                return Err(ImageError::ResourceLimit(format!(
                    "文件过大：{:.2} MB（限制：{:.2} MB）",
                    size as f64 / 1024.0 / 1024.0,
                    config.max_file_size as f64 / 1024.0 / 1024.0
                )));
            }
        }

        let initial_capacity = total_len
            .map(|len| len.min(config.max_file_size).min(usize::MAX as u64) as usize)
            .filter(|len| *len > 0)
            .unwrap_or(BUFFER_INITIAL_CAPACITY);
        let mut buffer = Vec::with_capacity(initial_capacity);
        let mut probe = SignatureProbe::Pending;

        loop {
            ctx.ensure_active()?;

            let next_chunk = tokio::time::timeout(read_timeout, response.chunk())
                .await
                .map_err(|_| ImageError::Timeout(format!("下载数据流读取超时（{}ms）", config.read_timeout_ms)))?
                .map_err(|e| ImageError::Network(format!("下载失败：{}", e)))?;

            let Some(chunk) = next_chunk else {
                break;
            };

            if (buffer.len() + chunk.len()) as u64 > config.max_file_size {
                return Err(ImageError::ResourceLimit("下载后文件超过大小限制".to_string()));
            }
            buffer.extend_from_slice(&chunk);

            if probe == SignatureProbe::Pending {
                probe = Self::probe_signature(&buffer, STREAM_SIGNATURE_PROBE_BYTES);
            }
            if let SignatureProbe::Rejected(mime) = probe {
                log::warn!("⚠️ 下载内容不是图片（{}），提前放弃 - {}", mime, redact_url_for_log(url));
                return Ok(None);
            }
        }

        if probe == SignatureProbe::Pending {
            if let SignatureProbe::Rejected(mime) = Self::probe_signature(&buffer, 0) {
                log::warn!("⚠️ 下载内容不是图片（{}） - {}", mime, redact_url_for_log(url));
                return Ok(None);
            }
        }

        log::debug!(
            "✅ 下载完成 - {} bytes elapsed={}ms",
            buffer.len(),
            started.elapsed().as_millis()
        );

        Ok(Some(buffer))
    }

    /// 通过文件签名（magic bytes）尽早识别非图片内容。
    fn probe_signature(bytes: &[u8], probe_limit: usize) -> SignatureProbe {
        if bytes.is_empty() {
            return SignatureProbe::Pending;
        }

        match infer::get(bytes) {
            Some(kind) if kind.matcher_type() == infer::MatcherType::Image => SignatureProbe::Accepted,
            Some(kind) => SignatureProbe::Rejected(kind.mime_type()),
            None if bytes.len() >= probe_limit => SignatureProbe::Accepted,
            None => SignatureProbe::Pending,
        }
    }

    fn map_reqwest_error(&self, e: reqwest::Error, url: &str) -> ImageError {
        let err_msg = e.to_string().replace(url, &redact_url_for_log(url));

        if e.is_timeout() {
            ImageError::Timeout(format!("连接超时（{}ms）", self.config().connect_timeout_ms))
        } else if e.is_connect() {
            ImageError::Network(format!("无法连接：{}", err_msg))
        } else {
            ImageError::Network(format!("请求失败：{}", err_msg))
        }
    }

    /// 常见 HTTP 状态码本地化文案。
    fn status_message(code: u16) -> &'static str {
        match code {
            404 => "未找到",
            403 => "访问被拒绝",
            500..=599 => "服务器错误",
            _ => "请求失败",
        }
    }
}
