//! # 解码与编码流水线模块
//!
//! ## 设计思路
//!
//! 将“字节 → 图像 → 目标像素格式”以及“图像 → PNG 缓存字节”的过程集中管理，
//! 并在完整解码前先读 header 尺寸做像素上限检查，降低恶意输入触发高内存开销的风险。
//!
//! ## 实现思路
//!
//! 1. 猜测格式并读取 header 尺寸；无法识别视为软失败
//! 2. 按像素上限快速拒绝（`ResourceLimit`）
//! 3. 按原始分辨率完整解码，不做任何缩放
//! 4. 转换到请求的像素格式
//!
//! 解码失败不是异常：返回 `Ok(None)`，由上层转换为“没有错误的失败回调”。

use std::io::Cursor;

use image::{DynamicImage, ImageFormat, ImageReader};

use super::{ImageError, PixelFormat};

/// 将原始字节解码为图片。
pub(crate) fn decode_bytes(
    bytes: &[u8],
    pixel_format: PixelFormat,
    max_decoded_pixels: u64,
) -> Result<Option<DynamicImage>, ImageError> {
    let Some((width, height)) = inspect_dimensions(bytes) else {
        return Ok(None);
    };
    validate_pixel_limits(width, height, max_decoded_pixels)?;

    let decoded = match image::load_from_memory(bytes) {
        Ok(decoded) => decoded,
        Err(err) => {
            log::warn!("⚠️ 图片解码失败 - {}x{}：{}", width, height, err);
            return Ok(None);
        }
    };

    log::debug!(
        "🖼️ 解码完成 - {}x{} color={:?} format={}",
        decoded.width(),
        decoded.height(),
        decoded.color(),
        pixel_format
    );

    Ok(Some(apply_pixel_format(decoded, pixel_format)))
}

/// 仅通过图片头信息读取宽高，无法识别时返回 `None`。
fn inspect_dimensions(bytes: &[u8]) -> Option<(u32, u32)> {
    let reader = match ImageReader::new(Cursor::new(bytes)).with_guessed_format() {
        Ok(reader) => reader,
        Err(err) => {
            log::warn!("⚠️ 无法探测图片格式：{}", err);
            return None;
        }
    };

    if reader.format().is_none() {
        log::warn!("⚠️ 无法识别图片格式 - {} bytes", bytes.len());
        return None;
    }

    match reader.into_dimensions() {
        Ok(dimensions) => Some(dimensions),
        Err(err) => {
            log::warn!("⚠️ 无法读取图片尺寸：{}", err);
            None
        }
    }
}

fn validate_pixel_limits(width: u32, height: u32, max_decoded_pixels: u64) -> Result<(), ImageError> {
    let pixels = (width as u64)
        .checked_mul(height as u64)
        .ok_or_else(|| ImageError::ResourceLimit("图片像素数溢出".to_string()))?;

    if pixels > max_decoded_pixels {
        return Err(ImageError::ResourceLimit(format!(
            "图片像素过大：{} 像素（限制：{} 像素）",
            pixels, max_decoded_pixels
        )));
    }

    Ok(())
}

/// 转换到请求的像素格式。
pub(crate) fn apply_pixel_format(image: DynamicImage, pixel_format: PixelFormat) -> DynamicImage {
    match pixel_format {
        PixelFormat::PlatformDefault => image,
        PixelFormat::Rgba8888 => match image {
            DynamicImage::ImageRgba8(_) => image,
            other => DynamicImage::ImageRgba8(other.to_rgba8()),
        },
        PixelFormat::Rgb565 => {
            let mut rgb = image.to_rgb8();
            for pixel in rgb.pixels_mut() {
                let [r, g, b] = pixel.0;
                pixel.0 = [quantize(r, 5), quantize(g, 6), quantize(b, 5)];
            }
            DynamicImage::ImageRgb8(rgb)
        }
    }
}

/// 截断到 `bits` 位后用高位回填低位，保证 0 与 255 不变。
fn quantize(value: u8, bits: u32) -> u8 {
    let mask = !(0xFFu8 >> bits);
    let kept = value & mask;
    kept | (kept >> bits)
}

/// 编码为 PNG，供磁盘缓存使用。
pub(crate) fn encode_png(image: &DynamicImage) -> Result<Vec<u8>, ImageError> {
    let mut bytes = Vec::new();
    let encodable;
    let image = match image {
        DynamicImage::ImageRgb32F(_) | DynamicImage::ImageRgba32F(_) => {
            encodable = DynamicImage::ImageRgba16(image.to_rgba16());
            &encodable
        }
        other => other,
    };

    image
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .map_err(|e| ImageError::Decode(format!("PNG 编码失败：{}", e)))?;

    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Rgb, Rgba};

    fn sample_png(width: u32, height: u32) -> Vec<u8> {
        let image = ImageBuffer::from_fn(width, height, |x, y| Rgba([(x * 40) as u8, (y * 40) as u8, 200, 128]));
        encode_png(&DynamicImage::ImageRgba8(image)).expect("encode sample failed")
    }

    #[test]
    fn decodes_png_at_native_resolution() {
        let decoded = decode_bytes(&sample_png(5, 3), PixelFormat::PlatformDefault, 1_000)
            .expect("decode failed")
            .expect("image expected");

        assert_eq!((decoded.width(), decoded.height()), (5, 3));
        assert!(matches!(decoded, DynamicImage::ImageRgba8(_)));
    }

    #[test]
    fn garbage_is_a_soft_failure() {
        let result = decode_bytes(b"definitely not an image", PixelFormat::Rgba8888, 1_000);
        assert_eq!(result, Ok(None));
    }

    #[test]
    fn truncated_png_is_a_soft_failure() {
        let mut bytes = sample_png(8, 8);
        bytes.truncate(bytes.len() / 2);
        assert_eq!(decode_bytes(&bytes, PixelFormat::PlatformDefault, 1_000), Ok(None));
    }

    #[test]
    fn pixel_limit_is_enforced_before_decoding() {
        let err = decode_bytes(&sample_png(10, 10), PixelFormat::PlatformDefault, 99).unwrap_err();
        assert_eq!(err.code(), "RESOURCE_LIMIT");
    }

    #[test]
    fn rgb565_quantizes_and_drops_alpha() {
        let image = DynamicImage::ImageRgba8(ImageBuffer::from_pixel(1, 1, Rgba([0x0F, 0x0F, 0xFF, 10])));
        let converted = apply_pixel_format(image, PixelFormat::Rgb565);

        let DynamicImage::ImageRgb8(rgb) = converted else {
            panic!("expected rgb8 output");
        };
        assert_eq!(rgb.get_pixel(0, 0), &Rgb([0x08, 0x0C, 0xFF]));
    }

    #[test]
    fn rgba8888_converts_rgb_input() {
        let image = DynamicImage::ImageRgb8(ImageBuffer::from_pixel(2, 2, Rgb([1, 2, 3])));
        let converted = apply_pixel_format(image, PixelFormat::Rgba8888);

        let DynamicImage::ImageRgba8(rgba) = converted else {
            panic!("expected rgba8 output");
        };
        assert_eq!(rgba.get_pixel(1, 1), &Rgba([1, 2, 3, 255]));
    }

    #[test]
    fn quantize_keeps_extremes() {
        assert_eq!(quantize(0, 5), 0);
        assert_eq!(quantize(255, 5), 255);
        assert_eq!(quantize(255, 6), 255);
    }
}
