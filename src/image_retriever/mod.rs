//! # 图片检索模块（image_retriever）
//!
//! ## 设计思路
//!
//! 该模块把“按来源取得一张解码后的图片”实现为检索引擎的一个 `RetrievalUnit`，
//! 并按职责拆分为多个子模块，避免单文件膨胀与耦合。
//!
//! - `handler`：按来源分派、编排网络图片的缓存 / 下载 / 解码 / 变换 / 回写
//! - `loader`：负责 URL 下载与早期校验
//! - `pipeline`：负责解码、像素限制、像素格式转换与 PNG 编码
//! - `platform`：文件与资源的解码端口
//! - `config/error/options/source`：配置、错误、解码选项、来源模型
//!
//! ## 新同事快速上手
//!
//! ```text
//! ImageRetriever::submit(source, options, callback)
//!    ↓
//! retriever（排队 + 并发上限）
//!    ↓
//! handler.rs（来源分派 + 阶段耗时日志）
//!    ├─ platform.rs（文件 / 资源）
//!    ├─ cache（磁盘缓存命中？）
//!    ├─ loader.rs（单次 GET + 体积 / 签名校验）
//!    └─ pipeline.rs（解码 + 像素格式 + PNG 回写）
//!    ↓
//! on_success / on_failure
//! ```

mod config;
mod error;
mod handler;
mod loader;
mod options;
mod pipeline;
mod platform;
mod source;

pub use config::ImageRetrieverConfig;
pub use error::ImageError;
pub use handler::{ImageHandler, ImageRetriever};
pub use options::{DecodeOptions, PixelFormat};
pub use platform::{FsPlatformDecoder, PlatformDecoder};
pub use source::{ImageFactory, ImageSource, ImageTransformer, ResourceId};
