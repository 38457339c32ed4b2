//! # 配置模块
//!
//! ## 设计思路
//!
//! 将所有“可调策略”集中到 `ImageRetrieverConfig`，保证运行时行为可观测、可调整、可测试。
//! 默认值即生产可用配置；JSON 配置文件中缺省的字段回落到默认值。
//!
//! ## 实现思路
//!
//! - `Default` 提供生产默认值（连接超时 3 秒、读取超时 30 秒、并发 4）。
//! - `validate` 统一做范围校验，构造检索器前必定调用。
//! - `from_json_str` / `from_json_file` 负责加载，加载后立即校验。

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::ImageError;

const DEFAULT_USER_AGENT: &str = concat!("image-retriever/", env!("CARGO_PKG_VERSION"));

/// 图片检索配置。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageRetrieverConfig {
    /// 同时执行的检索单元上限。
    pub max_concurrent: usize,
    /// 建立连接超时（毫秒）。
    pub connect_timeout_ms: u64,
    /// 读取超时（毫秒），作用于响应头和每一个数据块。
    pub read_timeout_ms: u64,
    /// 下载体积上限（字节）。
    pub max_file_size: u64,
    /// 解码后像素上限（`width * height`）。
    pub max_decoded_pixels: u64,
    /// 磁盘缓存目录；`None` 表示不缓存。
    pub cache_dir: Option<PathBuf>,
    /// 平台资源目录；`None` 时资源来源一律软失败。
    pub resource_dir: Option<PathBuf>,
    pub user_agent: String,
}

impl Default for ImageRetrieverConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 4,
            connect_timeout_ms: 3_000,
            read_timeout_ms: 30_000,
            max_file_size: 50 * 1024 * 1024,
            max_decoded_pixels: 100_000_000,
            cache_dir: None,
            resource_dir: None,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

impl ImageRetrieverConfig {
    /// 范围校验。
    pub fn validate(&self) -> Result<(), ImageError> {
        if !(1..=256).contains(&self.max_concurrent) {
            return Err(ImageError::Config("max_concurrent 必须在 1~256 之间".to_string()));
        }
        if !(100..=120_000).contains(&self.connect_timeout_ms) {
            return Err(ImageError::Config("connect_timeout_ms 必须在 100~120000 毫秒之间".to_string()));
        }
        if !(500..=600_000).contains(&self.read_timeout_ms) {
            return Err(ImageError::Config("read_timeout_ms 必须在 500~600000 毫秒之间".to_string()));
        }
        if self.max_file_size < 1024 {
            return Err(ImageError::Config("max_file_size 不能小于 1KB".to_string()));
        }
        if self.max_decoded_pixels == 0 {
            return Err(ImageError::Config("max_decoded_pixels 必须大于 0".to_string()));
        }
        if self.user_agent.trim().is_empty() {
            return Err(ImageError::Config("user_agent 不能为空".to_string()));
        }

        Ok(())
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn from_json_str(content: &str) -> Result<Self, ImageError> {
        let config: Self = serde_json::from_str(content)
            .map_err(|e| ImageError::Config(format!("配置解析失败：{}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ImageError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ImageError::FileSystem(format!("无法读取配置文件 {}：{}", path.display(), e)))?;

        log::info!("⚙️ 已加载配置文件 - {}", path.display());
        Self::from_json_str(&content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = ImageRetrieverConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.connect_timeout(), Duration::from_secs(3));
        assert_eq!(config.read_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let config = ImageRetrieverConfig::from_json_str(r#"{ "max_concurrent": 2, "cache_dir": "/tmp/img" }"#)
            .expect("parse config failed");

        assert_eq!(config.max_concurrent, 2);
        assert_eq!(config.cache_dir, Some(PathBuf::from("/tmp/img")));
        assert_eq!(config.read_timeout_ms, 30_000);
    }

    #[test]
    fn out_of_range_values_are_rejected() {
        let err = ImageRetrieverConfig::from_json_str(r#"{ "max_concurrent": 0 }"#).unwrap_err();
        assert_eq!(err.code(), "CONFIG");

        let config = ImageRetrieverConfig {
            connect_timeout_ms: 10,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn malformed_json_is_a_config_error() {
        let err = ImageRetrieverConfig::from_json_str("{ not json").unwrap_err();
        assert!(matches!(err, ImageError::Config(_)));
    }
}
