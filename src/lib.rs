//! # 图片检索引擎 — 库入口
//!
//! ## 架构总览
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │  调用方：submit(source, options, callback)               │
//! └───────┬──────────────────────────────────────────────────┘
//!         ↓ 立即返回 RetrievalHandle（可取消）
//! ┌───────┴──────────────────────────────────────────────────┐
//! │  retriever ── 无界 FIFO 队列 + 信号量（max_concurrent）   │
//! │       │       每个请求恰好一次 on_success / on_failure   │
//! │       ↓                                                  │
//! │  image_retriever ── ImageHandler（RetrievalUnit）        │
//! │   ├─ Image / Factory        内存来源                     │
//! │   ├─ Resource / FilePath    PlatformDecoder              │
//! │   └─ Url ── cache 命中？──否──► HTTP GET ► 解码 ► 变换   │
//! │                 │                            ↓           │
//! │                 └──────────◄── PNG 回写 ◄────┘           │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! ## 模块职责
//!
//! | 模块 | 职责 |
//! |------|------|
//! | [`error`] | 引擎级错误 `EngineError` |
//! | [`util`] | SHA-256 缓存键、URL 语法判断、静默释放、文本资源读取 |
//! | [`cache`] | 内容寻址磁盘缓存与离线清理 |
//! | [`retriever`] | 有界并发检索引擎、回调、取消句柄、请求合并 |
//! | [`image_retriever`] | 图片来源分派、下载、解码、缓存回写 |

pub mod cache;
pub mod error;
pub mod image_retriever;
pub mod retriever;
pub mod util;

pub use error::EngineError;
pub use image_retriever::{DecodeOptions, ImageError, ImageRetriever, ImageRetrieverConfig, ImageSource, PixelFormat};
pub use retriever::{RetrievalCallback, RetrievalContext, RetrievalHandle, RetrievalUnit, Retriever};
