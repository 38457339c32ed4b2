//! # 图片检索工具 — 命令行入口
//!
//! 本文件仅负责参数解析、日志初始化与结果落盘。
//! 检索逻辑分布在各子模块中，详见 `lib.rs` 架构文档。

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::Parser;
use image::{DynamicImage, ImageFormat};
use image_retriever::image_retriever::ImageHandler;
use image_retriever::util::digest_hex;
use image_retriever::{
    DecodeOptions, ImageError, ImageRetriever, ImageRetrieverConfig, ImageSource, PixelFormat, RetrievalCallback,
};
use tokio::sync::mpsc;

#[derive(Parser)]
#[command(name = "image-retriever")]
#[command(about = "Fetch, decode and cache images with bounded concurrency")]
struct Cli {
    /// JSON 配置文件
    #[arg(long)]
    config: Option<PathBuf>,

    /// 磁盘缓存目录（覆盖配置文件）
    #[arg(long)]
    cache_dir: Option<PathBuf>,

    /// 并发上限（覆盖配置文件）
    #[arg(long)]
    concurrency: Option<usize>,

    /// 输出目录；不指定时只检索不落盘
    #[arg(long)]
    out: Option<PathBuf>,

    /// 输出像素格式：rgba8888 / rgb565 / default
    #[arg(long, default_value = "default")]
    format: String,

    /// URL 或本地文件路径
    #[arg(required = true)]
    sources: Vec<String>,
}

type Outcome = (ImageSource, Result<DynamicImage, Option<ImageError>>);

struct ChannelCallback {
    tx: mpsc::UnboundedSender<Outcome>,
}

impl RetrievalCallback<ImageHandler> for ChannelCallback {
    fn on_success(&self, _retriever: &ImageRetriever, key: ImageSource, _options: DecodeOptions, result: DynamicImage) {
        let _ = self.tx.send((key, Ok(result)));
    }

    fn on_failure(&self, _retriever: &ImageRetriever, key: ImageSource, error: Option<ImageError>) {
        let _ = self.tx.send((key, Err(error)));
    }
}

fn parse_pixel_format(value: &str) -> Result<PixelFormat, ImageError> {
    match value.trim().to_lowercase().as_str() {
        "rgba8888" => Ok(PixelFormat::Rgba8888),
        "rgb565" => Ok(PixelFormat::Rgb565),
        "default" => Ok(PixelFormat::PlatformDefault),
        other => Err(ImageError::Config(format!(
            "未知像素格式：{}（可选：rgba8888 / rgb565 / default）",
            other
        ))),
    }
}

fn load_config(cli: &Cli) -> Result<ImageRetrieverConfig, ImageError> {
    let mut config = match &cli.config {
        Some(path) => ImageRetrieverConfig::from_json_file(path)?,
        None => ImageRetrieverConfig::default(),
    };

    if let Some(dir) = &cli.cache_dir {
        config.cache_dir = Some(dir.clone());
    }
    if let Some(concurrency) = cli.concurrency {
        config.max_concurrent = concurrency;
    }

    config.validate()?;
    Ok(config)
}

fn write_output(dir: &Path, source: &ImageSource, image: &DynamicImage) -> Result<PathBuf, ImageError> {
    std::fs::create_dir_all(dir).map_err(|e| ImageError::FileSystem(format!("无法创建输出目录：{}", e)))?;

    let name = source.cache_identity().map(str::to_string).unwrap_or_else(|| source.to_string());
    let digest = digest_hex(name.as_bytes());
    let path = dir.join(format!("{}.png", &digest[..16]));
    image
        .save_with_format(&path, ImageFormat::Png)
        .map_err(|e| ImageError::FileSystem(format!("无法写入 {}：{}", path.display(), e)))?;

    Ok(path)
}

async fn run(cli: Cli) -> Result<usize, ImageError> {
    let config = load_config(&cli)?;
    let options = DecodeOptions::new(parse_pixel_format(&cli.format)?);
    let retriever = ImageRetriever::from_config(config)?;

    let (tx, mut rx) = mpsc::unbounded_channel();
    for raw in &cli.sources {
        let source = ImageSource::parse(raw);
        retriever.submit_image(source, Some(options), ChannelCallback { tx: tx.clone() });
    }
    drop(tx);

    let mut failures = 0;
    while let Some((source, outcome)) = rx.recv().await {
        match outcome {
            Ok(image) => {
                log::info!("✅ {} - {}x{}", source, image.width(), image.height());
                if let Some(dir) = &cli.out {
                    match write_output(dir, &source, &image) {
                        Ok(path) => log::info!("💾 已保存 - {}", path.display()),
                        Err(err) => {
                            failures += 1;
                            log::error!("❌ 保存失败 - {}: {}", source, err);
                        }
                    }
                }
            }
            Err(Some(err)) => {
                failures += 1;
                log::error!("❌ {} - [{}/{}] {}", source, err.code(), err.stage(), err);
            }
            Err(None) => {
                failures += 1;
                log::warn!("⚠️ {} - 无法解码", source);
            }
        }
    }

    Ok(failures)
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let total = cli.sources.len();

    match run(cli).await {
        Ok(0) => ExitCode::SUCCESS,
        Ok(failures) => {
            log::warn!("完成：{} 个来源中 {} 个失败", total, failures);
            ExitCode::FAILURE
        }
        Err(err) => {
            log::error!("启动失败: {err}");
            ExitCode::FAILURE
        }
    }
}
