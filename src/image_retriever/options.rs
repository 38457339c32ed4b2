//! 解码选项。

use std::fmt;

/// 解码输出的像素格式。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PixelFormat {
    /// 每像素 32 位，带 alpha。
    Rgba8888,
    /// 每像素 16 位（5/6/5），无 alpha。
    Rgb565,
    /// 保留解码器原生布局。
    #[default]
    PlatformDefault,
}

impl PixelFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Rgba8888 => "rgba8888",
            Self::Rgb565 => "rgb565",
            Self::PlatformDefault => "default",
        }
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 不可变的解码选项；缺省等价于 `PixelFormat::PlatformDefault`。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct DecodeOptions {
    pub pixel_format: PixelFormat,
}

impl DecodeOptions {
    pub fn new(pixel_format: PixelFormat) -> Self {
        Self { pixel_format }
    }

    /// API 边界上的 `None` 视为默认选项。
    pub fn or_default(options: Option<Self>) -> Self {
        options.unwrap_or_default()
    }
}

impl From<PixelFormat> for DecodeOptions {
    fn from(pixel_format: PixelFormat) -> Self {
        Self::new(pixel_format)
    }
}
