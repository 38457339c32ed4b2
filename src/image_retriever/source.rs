//! # 图片来源
//!
//! ## 设计思路
//!
//! `ImageSource` 是一个封闭的和类型，每个值只有一个有效变体，`decode` 对其做穷尽匹配。
//! 只有 `Url` 变体具有缓存身份（URL 字符串本身），其余变体永远不进入磁盘缓存，也不参与请求合并。
//! `Debug` / `Display` 只输出去掉查询串与片段的 URL，引擎日志可以直接打印键。

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use image::DynamicImage;

use super::loader::redact_url_for_log;
use crate::util::is_url_syntax;

/// 平台资源 ID。
pub type ResourceId = u32;

/// 按需生成图片的工厂；返回 `None` 表示没有可用图片。
pub type ImageFactory = Arc<dyn Fn() -> Option<DynamicImage> + Send + Sync>;

/// 对网络图片解码结果做一次后处理，输出会被写入缓存。
pub type ImageTransformer = Arc<dyn Fn(DynamicImage) -> DynamicImage + Send + Sync>;

/// 图片输入来源。
#[derive(Clone, Default)]
pub enum ImageSource {
    /// 已解码的图片，直接交还一份拷贝。
    Image(DynamicImage),
    /// 调用工厂获取图片。
    Factory(ImageFactory),
    /// 平台资源。
    Resource(ResourceId),
    /// 本地文件路径。
    FilePath(PathBuf),
    /// 网络地址，可附带变换函数。
    Url {
        url: String,
        transformer: Option<ImageTransformer>,
    },
    /// 未指定来源，永远无法识别。
    #[default]
    Unspecified,
}

impl ImageSource {
    pub fn url(url: impl Into<String>) -> Self {
        Self::Url {
            url: url.into(),
            transformer: None,
        }
    }

    pub fn url_with_transformer<F>(url: impl Into<String>, transformer: F) -> Self
    where
        F: Fn(DynamicImage) -> DynamicImage + Send + Sync + 'static,
    {
        Self::Url {
            url: url.into(),
            transformer: Some(Arc::new(transformer)),
        }
    }

    pub fn factory<F>(factory: F) -> Self
    where
        F: Fn() -> Option<DynamicImage> + Send + Sync + 'static,
    {
        Self::Factory(Arc::new(factory))
    }

    /// 从命令行 / 配置里的字符串推断来源。
    ///
    /// - 语法合法的绝对 URL → `Url`
    /// - 其他非空字符串 → `FilePath`
    /// - 空白字符串 → `Unspecified`
    pub fn parse(value: &str) -> Self {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            Self::Unspecified
        } else if is_url_syntax(trimmed) {
            Self::url(trimmed)
        } else {
            Self::FilePath(PathBuf::from(trimmed))
        }
    }

    /// 缓存与合并使用的身份；只有 `Url` 变体有。
    pub fn cache_identity(&self) -> Option<&str> {
        match self {
            Self::Url { url, .. } => Some(url.as_str()),
            _ => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Image(_) => "image",
            Self::Factory(_) => "factory",
            Self::Resource(_) => "resource",
            Self::FilePath(_) => "file",
            Self::Url { .. } => "url",
            Self::Unspecified => "unspecified",
        }
    }
}

impl fmt::Debug for ImageSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Image(image) => f
                .debug_tuple("Image")
                .field(&format_args!("{}x{}", image.width(), image.height()))
                .finish(),
            Self::Factory(_) => f.write_str("Factory(..)"),
            Self::Resource(id) => f.debug_tuple("Resource").field(id).finish(),
            Self::FilePath(path) => f.debug_tuple("FilePath").field(path).finish(),
            Self::Url { url, transformer } => f
                .debug_struct("Url")
                .field("url", &redact_url_for_log(url))
                .field("transformer", &transformer.is_some())
                .finish(),
            Self::Unspecified => f.write_str("Unspecified"),
        }
    }
}

impl fmt::Display for ImageSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Image(image) => write!(f, "image({}x{})", image.width(), image.height()),
            Self::Factory(_) => f.write_str("factory"),
            Self::Resource(id) => write!(f, "resource({})", id),
            Self::FilePath(path) => write!(f, "file({})", path.display()),
            Self::Url { url, .. } => write!(f, "url({})", redact_url_for_log(url)),
            Self::Unspecified => f.write_str("unspecified"),
        }
    }
}

impl From<DynamicImage> for ImageSource {
    fn from(image: DynamicImage) -> Self {
        Self::Image(image)
    }
}

impl From<PathBuf> for ImageSource {
    fn from(path: PathBuf) -> Self {
        Self::FilePath(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_distinguishes_urls_paths_and_blanks() {
        assert!(matches!(ImageSource::parse("https://example.test/a.png"), ImageSource::Url { .. }));
        assert!(matches!(ImageSource::parse("images/a.png"), ImageSource::FilePath(_)));
        assert!(matches!(ImageSource::parse("   "), ImageSource::Unspecified));
        assert!(matches!(ImageSource::parse(r"C:\tiles\a.png"), ImageSource::FilePath(_)));
        assert!(matches!(ImageSource::parse("C:/tiles/a.png"), ImageSource::FilePath(_)));
        assert!(matches!(ImageSource::parse("tiles:3.png"), ImageSource::FilePath(_)));
    }

    #[test]
    fn only_urls_have_cache_identity() {
        let url = ImageSource::url_with_transformer("http://example.test/a.png", |img| img);
        assert_eq!(url.cache_identity(), Some("http://example.test/a.png"));
        assert_eq!(ImageSource::Resource(7).cache_identity(), None);
        assert_eq!(ImageSource::default().cache_identity(), None);
    }

    #[test]
    fn debug_hides_closures() {
        let source = ImageSource::url_with_transformer("http://example.test/a.png", |img| img);
        let debug = format!("{:?}", source);
        assert!(debug.contains("transformer: true"));
        assert_eq!(format!("{:?}", ImageSource::factory(|| None)), "Factory(..)");
        assert_eq!(ImageSource::Resource(3).to_string(), "resource(3)");
    }

    #[test]
    fn formatting_strips_query_and_fragment_from_urls() {
        let source = ImageSource::url("https://cdn.example.test/a.png?sig=SECRET#frag");

        let debug = format!("{:?}", source);
        let display = source.to_string();

        assert!(!debug.contains("SECRET"), "debug leaked query: {}", debug);
        assert!(!display.contains("SECRET"), "display leaked query: {}", display);
        assert!(!debug.contains("frag"));
        assert!(debug.contains("https://cdn.example.test/a.png"));
        assert_eq!(display, "url(https://cdn.example.test/a.png)");
        assert_eq!(
            source.cache_identity(),
            Some("https://cdn.example.test/a.png?sig=SECRET#frag")
        );
    }
}
