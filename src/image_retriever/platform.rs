//! # 平台解码端口
//!
//! 文件与资源的解码能力通过 `PlatformDecoder` 注入，检索器本身不关心资源如何存放。
//! `FsPlatformDecoder` 是默认实现：文件走 `image` crate，资源按 ID 在资源目录中查找同名文件。
//!
//! 所有方法都是同步阻塞的，由调用方放到 `spawn_blocking` 中执行。

use std::fs;
use std::path::{Path, PathBuf};

use image::DynamicImage;

use super::pipeline::decode_bytes;
use super::{ImageError, ImageRetrieverConfig, PixelFormat, ResourceId};
use crate::util::read_text_resource;

/// 平台解码能力。
pub trait PlatformDecoder: Send + Sync + 'static {
    fn decode_file(&self, path: &Path, pixel_format: PixelFormat) -> Result<Option<DynamicImage>, ImageError>;

    fn decode_resource(&self, id: ResourceId, pixel_format: PixelFormat)
    -> Result<Option<DynamicImage>, ImageError>;
}

/// 基于本地文件系统的解码实现。
#[derive(Debug, Clone)]
pub struct FsPlatformDecoder {
    resource_dir: Option<PathBuf>,
    max_file_size: u64,
    max_decoded_pixels: u64,
}

impl FsPlatformDecoder {
    pub fn new(resource_dir: Option<PathBuf>) -> Self {
        Self::from_config(&ImageRetrieverConfig {
            resource_dir,
            ..Default::default()
        })
    }

    pub fn from_config(config: &ImageRetrieverConfig) -> Self {
        Self {
            resource_dir: config.resource_dir.clone(),
            max_file_size: config.max_file_size,
            max_decoded_pixels: config.max_decoded_pixels,
        }
    }

    /// 资源 ID 对应的文件：资源目录下文件名（去掉扩展名）等于 ID 的第一个文件。
    pub fn resource_path(&self, id: ResourceId) -> Result<Option<PathBuf>, ImageError> {
        let Some(dir) = &self.resource_dir else {
            return Ok(None);
        };

        let entries = fs::read_dir(dir)
            .map_err(|e| ImageError::FileSystem(format!("无法读取资源目录 {}：{}", dir.display(), e)))?;

        let wanted = id.to_string();
        let mut matches: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.is_file())
            .filter(|path| path.file_stem().and_then(|stem| stem.to_str()) == Some(wanted.as_str()))
            .collect();
        matches.sort();

        Ok(matches.into_iter().next())
    }

    /// 以文本方式读取资源，每行以 `\n` 结尾。
    pub fn read_resource_text(&self, id: ResourceId) -> Result<String, ImageError> {
        let path = self
            .resource_path(id)?
            .ok_or_else(|| ImageError::FileSystem(format!("资源不存在：{}", id)))?;

        let file = fs::File::open(&path)
            .map_err(|e| ImageError::FileSystem(format!("无法打开资源 {}：{}", path.display(), e)))?;

        read_text_resource(file).map_err(|e| ImageError::FileSystem(format!("无法读取资源 {}：{}", path.display(), e)))
    }

    fn read_limited(&self, path: &Path) -> Result<Vec<u8>, ImageError> {
        let metadata = fs::metadata(path)
            .map_err(|e| ImageError::FileSystem(format!("无法读取文件信息 {}：{}", path.display(), e)))?;

        if metadata.len() > self.max_file_size {
            return Err(ImageError::ResourceLimit(format!(
                "文件过大：{:.2} MB（限制：{:.2} MB）",
                metadata.len() as f64 / 1024.0 / 1024.0,
                self.max_file_size as f64 / 1024.0 / 1024.0
            )));
        }

        fs::read(path).map_err(|e| ImageError::FileSystem(format!("无法读取图片文件 {}：{}", path.display(), e)))
    }
}

impl Default for FsPlatformDecoder {
    fn default() -> Self {
        Self::new(None)
    }
}

impl PlatformDecoder for FsPlatformDecoder {
    fn decode_file(&self, path: &Path, pixel_format: PixelFormat) -> Result<Option<DynamicImage>, ImageError> {
        log::debug!("📁 读取本地图片 - {}", path.display());

        let bytes = self.read_limited(path)?;
        decode_bytes(&bytes, pixel_format, self.max_decoded_pixels)
    }

    fn decode_resource(
        &self,
        id: ResourceId,
        pixel_format: PixelFormat,
    ) -> Result<Option<DynamicImage>, ImageError> {
        let Some(path) = self.resource_path(id)? else {
            log::warn!("⚠️ 找不到资源 {}（资源目录：{:?}）", id, self.resource_dir);
            return Ok(None);
        };

        let bytes = self.read_limited(&path)?;
        decode_bytes(&bytes, pixel_format, self.max_decoded_pixels)
    }
}
