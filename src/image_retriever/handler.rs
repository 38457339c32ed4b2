//! # 核心编排模块
//!
//! ## 设计思路
//!
//! `ImageHandler` 是图片检索的 `RetrievalUnit`：它只负责按来源分派与流程编排，
//! 并发、排队、回调都由检索引擎负责。
//!
//! 网络来源的处理链路固定为：
//! 1. 以 URL 的摘要为键查磁盘缓存，命中且可解码则直接返回（不做任何网络 I/O）
//! 2. 未命中时发一次 GET，按请求的像素格式以原始分辨率解码
//! 3. 解码成功后执行一次变换函数（如果有）
//! 4. 把变换后的图片编码为 PNG 写回缓存；写入失败只记日志
//!
//! ## 实现思路
//!
//! - 文件读取、解码、PNG 编码、缓存 I/O、工厂调用都放到 `spawn_blocking`。
//! - 阻塞任务中的 panic 原样抛回单元边界，由引擎统一转换为失败回调。
//! - 记录 `load/decode/total` 阶段耗时，便于性能诊断。

use std::sync::Arc;
use std::time::Instant;

use image::DynamicImage;

use crate::cache::DiskCache;
use crate::retriever::{RetrievalCallback, RetrievalContext, RetrievalHandle, RetrievalUnit, Retriever};
use crate::util::digest_hex;

use super::loader::{build_http_client, redact_url_for_log};
use super::pipeline::{decode_bytes, encode_png};
use super::{
    DecodeOptions, FsPlatformDecoder, ImageError, ImageRetrieverConfig, ImageSource, ImageTransformer, PixelFormat,
    PlatformDecoder,
};

/// 图片检索单元。
///
/// 封装了配置、HTTP 客户端、磁盘缓存与平台解码器。
pub struct ImageHandler {
    config: ImageRetrieverConfig,
    pub(super) client: reqwest::Client,
    cache: Option<DiskCache>,
    platform: Arc<dyn PlatformDecoder>,
}

/// 图片检索器：有界并发引擎 + `ImageHandler`。
pub type ImageRetriever = Retriever<ImageHandler>;

impl ImageHandler {
    /// 根据配置创建处理器。
    ///
    /// 这里同时构建复用型 HTTP 客户端，并在配置了 `cache_dir` 时打开磁盘缓存。
    ///
    /// # 示例
    /// ```rust,ignore
    /// use image_retriever::image_retriever::{ImageHandler, ImageRetrieverConfig};
    ///
    /// let handler = ImageHandler::new(ImageRetrieverConfig::default())?;
    /// # Ok::<(), image_retriever::image_retriever::ImageError>(())
    /// ```
    pub fn new(config: ImageRetrieverConfig) -> Result<Self, ImageError> {
        config.validate()?;

        let cache = match &config.cache_dir {
            Some(dir) => Some(
                DiskCache::open(dir)
                    .map_err(|e| ImageError::FileSystem(format!("无法打开缓存目录：{}", e)))?,
            ),
            None => None,
        };

        Ok(Self {
            client: build_http_client(&config)?,
            platform: Arc::new(FsPlatformDecoder::from_config(&config)),
            cache,
            config,
        })
    }

    /// 替换平台解码器。
    pub fn with_platform_decoder(mut self, decoder: impl PlatformDecoder) -> Self {
        self.platform = Arc::new(decoder);
        self
    }

    /// 替换磁盘缓存；`None` 关闭缓存。
    pub fn with_cache(mut self, cache: Option<DiskCache>) -> Self {
        self.cache = cache;
        self
    }

    pub fn config(&self) -> &ImageRetrieverConfig {
        &self.config
    }

    pub fn cache(&self) -> Option<&DiskCache> {
        self.cache.as_ref()
    }

    /// 按来源解码出一张图片。
    ///
    /// - `Ok(Some(image))`：成功
    /// - `Ok(None)`：来源无法识别或内容无法解码
    /// - `Err(_)`：I/O 故障、资源限制或取消
    pub async fn decode(
        &self,
        source: &ImageSource,
        options: &DecodeOptions,
        ctx: &RetrievalContext,
    ) -> Result<Option<DynamicImage>, ImageError> {
        let pixel_format = options.pixel_format;

        match source {
            ImageSource::Image(image) => Ok(Some(image.clone())),
            ImageSource::Factory(factory) => {
                let factory = Arc::clone(factory);
                run_blocking(move || Ok(factory())).await
            }
            ImageSource::Resource(id) => {
                let platform = Arc::clone(&self.platform);
                let id = *id;
                run_blocking(move || platform.decode_resource(id, pixel_format)).await
            }
            ImageSource::FilePath(path) => {
                let platform = Arc::clone(&self.platform);
                let path = path.clone();
                run_blocking(move || platform.decode_file(&path, pixel_format)).await
            }
            ImageSource::Url { url, transformer } => {
                self.decode_remote(url, transformer.as_ref(), pixel_format, ctx)
                    .await
            }
            ImageSource::Unspecified => {
                log::warn!("⚠️ 无法识别的图片来源：{}", source);
                Ok(None)
            }
        }
    }

    async fn decode_remote(
        &self,
        url: &str,
        transformer: Option<&ImageTransformer>,
        pixel_format: PixelFormat,
        ctx: &RetrievalContext,
    ) -> Result<Option<DynamicImage>, ImageError> {
        let started = Instant::now();
        let redacted = redact_url_for_log(url);
        let key = digest_hex(url.as_bytes());

        if let Some(cached) = self.load_cached(&key, pixel_format).await? {
            log::debug!(
                "♻️ 命中磁盘缓存 - {} total={}ms",
                redacted,
                started.elapsed().as_millis()
            );
            return Ok(Some(cached));
        }

        log::info!("🌐 开始下载图片 - {}", redacted);
        let Some(bytes) = self.fetch_url(url, ctx).await? else {
            return Ok(None);
        };
        let load_ms = started.elapsed().as_millis();

        let max_decoded_pixels = self.config.max_decoded_pixels;
        let transformer = transformer.cloned();
        let decoded = run_blocking(move || {
            let Some(image) = decode_bytes(&bytes, pixel_format, max_decoded_pixels)? else {
                return Ok(None);
            };
            Ok(Some(match transformer {
                Some(transform) => transform(image),
                None => image,
            }))
        })
        .await?;

        let Some(image) = decoded else {
            log::warn!("⚠️ 下载内容无法解码 - {}", redacted);
            return Ok(None);
        };
        let decode_ms = started.elapsed().as_millis() - load_ms;

        ctx.ensure_active()?;
        let image = match self.cache.clone() {
            Some(cache) => run_blocking(move || {
                store_in_cache(&cache, &key, &image);
                Ok(image)
            })
            .await?,
            None => image,
        };

        log::info!(
            "✅ URL 图片处理完成 - {} load={}ms decode={}ms total={}ms",
            redacted,
            load_ms,
            decode_ms,
            started.elapsed().as_millis()
        );

        Ok(Some(image))
    }

    /// 读取并解码缓存条目；不可解码的条目按未命中处理。
    async fn load_cached(&self, key: &str, pixel_format: PixelFormat) -> Result<Option<DynamicImage>, ImageError> {
        let Some(cache) = self.cache.clone() else {
            return Ok(None);
        };

        let key = key.to_string();
        let max_decoded_pixels = self.config.max_decoded_pixels;
        run_blocking(move || {
            let Some(bytes) = cache.lookup(&key) else {
                log::debug!("🔍 缓存未命中 - {}", key);
                return Ok(None);
            };

            match decode_bytes(&bytes, pixel_format, max_decoded_pixels) {
                Ok(Some(image)) => Ok(Some(image)),
                Ok(None) => {
                    log::warn!("⚠️ 缓存条目无法解码，改走网络 - {}", key);
                    Ok(None)
                }
                Err(err) => {
                    log::warn!("⚠️ 缓存条目不可用，改走网络 - {}: {}", key, err);
                    Ok(None)
                }
            }
        })
        .await
    }
}

fn store_in_cache(cache: &DiskCache, key: &str, image: &DynamicImage) {
    let png = match encode_png(image) {
        Ok(png) => png,
        Err(err) => {
            log::error!("❌ 缓存写入失败（编码）- {}: {}", key, err);
            return;
        }
    };

    match cache.store(key, &png) {
        Ok(()) => log::debug!("💾 已写入缓存 - {} ({} bytes)", key, png.len()),
        Err(err) => log::error!("❌ 缓存写入失败 - {}: {}", key, err),
    }
}

/// 在阻塞线程池执行；闭包中的 panic 会在当前任务中重新抛出。
async fn run_blocking<T, F>(task: F) -> Result<T, ImageError>
where
    F: FnOnce() -> Result<T, ImageError> + Send + 'static,
    T: Send + 'static,
{
    match tokio::task::spawn_blocking(task).await {
        Ok(result) => result,
        Err(err) if err.is_panic() => std::panic::resume_unwind(err.into_panic()),
        Err(err) => Err(ImageError::Internal(format!("阻塞任务被取消：{}", err))),
    }
}

impl RetrievalUnit for ImageHandler {
    type Key = ImageSource;
    type Options = DecodeOptions;
    type Output = DynamicImage;
    type Error = ImageError;

    async fn retrieve(
        &self,
        key: &ImageSource,
        options: &DecodeOptions,
        ctx: &RetrievalContext,
    ) -> Result<Option<DynamicImage>, ImageError> {
        self.decode(key, options, ctx).await
    }

    /// 只有不带变换函数的 URL 参与合并：变换函数无法比较，带变换的请求各自执行。
    fn coalesce_key(&self, key: &ImageSource, options: &DecodeOptions) -> Option<String> {
        match key {
            ImageSource::Url { url, transformer: None } => Some(format!("{}#{}", url, options.pixel_format)),
            _ => None,
        }
    }
}

impl Retriever<ImageHandler> {
    /// 按配置创建图片检索器（需在 tokio 运行时内调用）。
    pub fn from_config(config: ImageRetrieverConfig) -> Result<Self, ImageError> {
        let max_concurrent = config.max_concurrent;
        let handler = ImageHandler::new(config)?;
        Ok(Retriever::new(max_concurrent, handler)?)
    }

    /// 提交一次图片检索；`options` 为 `None` 时使用默认像素格式。
    pub fn submit_image<C>(&self, source: ImageSource, options: Option<DecodeOptions>, callback: C) -> RetrievalHandle
    where
        C: RetrievalCallback<ImageHandler>,
    {
        self.submit(source, DecodeOptions::or_default(options), callback)
    }
}
