//! # 错误模型模块
//!
//! ## 设计思路
//!
//! 使用单一错误枚举承载图片检索链路中的所有错误来源，避免字符串拼接式错误处理。
//! 通过 `thiserror` 保持人类可读错误，同时让调用侧可按分支匹配。
//!
//! 所有变体只携带字符串，因此 `ImageError: Clone`，合并请求可以把同一个错误分发给多个回调。

use crate::error::EngineError;

/// 图片检索统一错误类型。
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ImageError {
    #[error("网络错误：{0}")]
    Network(String),

    #[error("超时错误：{0}")]
    Timeout(String),

    #[error("文件错误：{0}")]
    FileSystem(String),

    #[error("解码错误：{0}")]
    Decode(String),

    #[error("格式错误：{0}")]
    InvalidFormat(String),

    #[error("资源限制：{0}")]
    ResourceLimit(String),

    #[error("已取消：{0}")]
    Cancelled(String),

    #[error("配置错误：{0}")]
    Config(String),

    #[error("内部错误：{0}")]
    Internal(String),
}

impl ImageError {
    /// 稳定的错误码，供需要向外透出错误的调用方使用。
    pub fn code(&self) -> &'static str {
        match self {
            Self::Network(_) => "NETWORK",
            Self::Timeout(_) => "TIMEOUT",
            Self::FileSystem(_) => "FILE_SYSTEM",
            Self::Decode(_) => "DECODE",
            Self::InvalidFormat(_) => "INVALID_FORMAT",
            Self::ResourceLimit(_) => "RESOURCE_LIMIT",
            Self::Cancelled(_) => "CANCELLED",
            Self::Config(_) => "CONFIG",
            Self::Internal(_) => "INTERNAL",
        }
    }

    /// 错误发生的链路阶段。
    pub fn stage(&self) -> &'static str {
        match self {
            Self::Network(_) | Self::Timeout(_) => "download",
            Self::FileSystem(_) => "load",
            Self::Decode(_) | Self::InvalidFormat(_) | Self::ResourceLimit(_) => "decode",
            Self::Cancelled(_) => "cancel",
            Self::Config(_) => "config",
            Self::Internal(_) => "engine",
        }
    }
}

impl From<EngineError> for ImageError {
    fn from(error: EngineError) -> Self {
        match error {
            EngineError::InvalidConfig(msg) => Self::Config(msg),
            EngineError::Cancelled => Self::Cancelled("图片检索已取消".to_string()),
            EngineError::NoRuntime(msg) | EngineError::Panicked(msg) => Self::Internal(msg),
        }
    }
}

impl From<ImageError> for String {
    fn from(error: ImageError) -> Self {
        error.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_errors_map_to_image_errors() {
        assert_eq!(ImageError::from(EngineError::Cancelled).code(), "CANCELLED");
        assert_eq!(
            ImageError::from(EngineError::Panicked("boom".to_string())),
            ImageError::Internal("boom".to_string())
        );
        assert_eq!(
            ImageError::from(EngineError::InvalidConfig("bad".to_string())).stage(),
            "config"
        );
    }

    #[test]
    fn display_keeps_payload() {
        let err = ImageError::Network("HTTP 404: 未找到".to_string());
        assert_eq!(err.to_string(), "网络错误：HTTP 404: 未找到");
        assert_eq!(err.stage(), "download");
    }
}
