use std::io::{Cursor, Read, Write};
use std::net::TcpListener;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use image::{DynamicImage, ImageBuffer, ImageFormat, Rgba};
use image_retriever::image_retriever::ImageHandler;
use image_retriever::{
    DecodeOptions, ImageError, ImageRetriever, ImageRetrieverConfig, ImageSource, PixelFormat, RetrievalCallback,
};
use tokio::sync::mpsc;

type Outcome = (String, Result<DynamicImage, Option<ImageError>>);

struct ChannelCallback {
    tx: mpsc::UnboundedSender<Outcome>,
}

impl RetrievalCallback<ImageHandler> for ChannelCallback {
    fn on_success(&self, _retriever: &ImageRetriever, key: ImageSource, _options: DecodeOptions, result: DynamicImage) {
        let _ = self.tx.send((key.to_string(), Ok(result)));
    }

    fn on_failure(&self, _retriever: &ImageRetriever, key: ImageSource, error: Option<ImageError>) {
        let _ = self.tx.send((key.to_string(), Err(error)));
    }
}

fn unique_temp_dir(prefix: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    std::env::temp_dir().join(format!("{}_{}_{}", prefix, std::process::id(), nanos))
}

fn create_png_bytes(width: u32, height: u32) -> Vec<u8> {
    let img = ImageBuffer::from_fn(width, height, |x, y| Rgba([x as u8, y as u8, 90, 255]));
    let mut cursor = Cursor::new(Vec::new());
    DynamicImage::ImageRgba8(img)
        .write_to(&mut cursor, ImageFormat::Png)
        .expect("failed to encode test image");
    cursor.into_inner()
}

struct ServerStats {
    requests: AtomicUsize,
    active: AtomicUsize,
    peak: AtomicUsize,
}

/// 每个连接一个线程，统计同时处于请求读取阶段的连接数峰值。
fn spawn_tracking_server(body: Vec<u8>, max_connections: usize) -> (String, Arc<ServerStats>) {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind test server failed");
    let addr = listener.local_addr().expect("read test server addr failed");
    let stats = Arc::new(ServerStats {
        requests: AtomicUsize::new(0),
        active: AtomicUsize::new(0),
        peak: AtomicUsize::new(0),
    });
    let server_stats = Arc::clone(&stats);
    let body = Arc::new(body);

    thread::spawn(move || {
        for stream in listener.incoming().take(max_connections) {
            let Ok(mut stream) = stream else {
                continue;
            };
            let stats = Arc::clone(&server_stats);
            let body = Arc::clone(&body);

            thread::spawn(move || {
                stats.requests.fetch_add(1, Ordering::SeqCst);
                let now = stats.active.fetch_add(1, Ordering::SeqCst) + 1;
                stats.peak.fetch_max(now, Ordering::SeqCst);

                let mut request_buf = [0_u8; 2048];
                let _ = stream.read(&mut request_buf);
                thread::sleep(Duration::from_millis(20));

                stats.active.fetch_sub(1, Ordering::SeqCst);
                let header = format!(
                    "HTTP/1.1 200 OK\r\nContent-Type: image/png\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                    body.len()
                );
                let _ = stream.write_all(header.as_bytes());
                let _ = stream.write_all(&body);
                let _ = stream.flush();
            });
        }
    });

    (format!("http://{}", addr), stats)
}

async fn collect(rx: &mut mpsc::UnboundedReceiver<Outcome>, count: usize) -> Vec<Outcome> {
    let mut outcomes = Vec::with_capacity(count);
    while outcomes.len() < count {
        let next = tokio::time::timeout(Duration::from_secs(20), rx.recv())
            .await
            .expect("timed out waiting for callbacks")
            .expect("callback channel closed");
        outcomes.push(next);
    }
    outcomes
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn ten_urls_with_single_slot_never_overlap() {
    let (base, stats) = spawn_tracking_server(create_png_bytes(4, 4), usize::MAX);
    let config = ImageRetrieverConfig {
        max_concurrent: 1,
        ..Default::default()
    };
    let retriever = ImageRetriever::from_config(config).expect("retriever init failed");
    let (tx, mut rx) = mpsc::unbounded_channel();

    for i in 0..10 {
        let source = ImageSource::url(format!("{}/img/{}.png", base, i));
        retriever.submit_image(source, None, ChannelCallback { tx: tx.clone() });
    }

    let outcomes = collect(&mut rx, 10).await;

    assert!(outcomes.iter().all(|(_, result)| result.is_ok()));
    assert_eq!(stats.requests.load(Ordering::SeqCst), 10);
    assert_eq!(stats.peak.load(Ordering::SeqCst), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn burst_respects_concurrency_limit() {
    let (base, stats) = spawn_tracking_server(create_png_bytes(4, 4), usize::MAX);
    let config = ImageRetrieverConfig {
        max_concurrent: 3,
        ..Default::default()
    };
    let retriever = ImageRetriever::from_config(config).expect("retriever init failed");
    let (tx, mut rx) = mpsc::unbounded_channel();

    for i in 0..24 {
        let source = ImageSource::url(format!("{}/burst/{}.png", base, i));
        retriever.submit_image(source, None, ChannelCallback { tx: tx.clone() });
    }

    let outcomes = collect(&mut rx, 24).await;

    assert_eq!(outcomes.len(), 24);
    assert!(stats.peak.load(Ordering::SeqCst) <= 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn same_url_twice_is_served_from_cache_once_offline() {
    let cache_dir = unique_temp_dir("retrieval_cache_twice");
    let (base, stats) = spawn_tracking_server(create_png_bytes(6, 3), 1);
    let url = format!("{}/once.png", base);
    let config = ImageRetrieverConfig {
        max_concurrent: 2,
        cache_dir: Some(cache_dir.clone()),
        ..Default::default()
    };
    let retriever = ImageRetriever::from_config(config).expect("retriever init failed");
    let (tx, mut rx) = mpsc::unbounded_channel();

    let options = Some(DecodeOptions::new(PixelFormat::Rgba8888));
    retriever.submit_image(ImageSource::url(url.clone()), options, ChannelCallback { tx: tx.clone() });
    let first = collect(&mut rx, 1).await;
    retriever.submit_image(ImageSource::url(url.clone()), options, ChannelCallback { tx: tx.clone() });
    let second = collect(&mut rx, 1).await;

    let first = first[0].1.as_ref().expect("first retrieval failed");
    let second = second[0].1.as_ref().expect("second retrieval failed");
    assert_eq!(first, second);
    assert_eq!((second.width(), second.height()), (6, 3));
    assert_eq!(stats.requests.load(Ordering::SeqCst), 1);

    let _ = std::fs::remove_dir_all(cache_dir);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unspecified_source_fails_without_error() {
    let retriever = ImageRetriever::from_config(ImageRetrieverConfig::default()).expect("retriever init failed");
    let (tx, mut rx) = mpsc::unbounded_channel();

    retriever.submit_image(ImageSource::Unspecified, None, ChannelCallback { tx });
    let outcomes = collect(&mut rx, 1).await;

    assert!(matches!(outcomes[0].1, Err(None)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn coalesced_requests_share_one_download() {
    let (base, stats) = spawn_tracking_server(create_png_bytes(5, 5), usize::MAX);
    let url = format!("{}/shared.png", base);
    let retriever = ImageRetriever::from_config(ImageRetrieverConfig::default()).expect("retriever init failed");
    let (tx, mut rx) = mpsc::unbounded_channel();

    for _ in 0..4 {
        retriever.submit_coalesced(
            ImageSource::url(url.clone()),
            DecodeOptions::default(),
            ChannelCallback { tx: tx.clone() },
        );
    }

    let outcomes = collect(&mut rx, 4).await;

    assert!(outcomes.iter().all(|(_, result)| result.is_ok()));
    assert_eq!(stats.requests.load(Ordering::SeqCst), 1);
}

async fn assert_no_more_callbacks(rx: &mut mpsc::UnboundedReceiver<Outcome>) {
    let extra = tokio::time::timeout(Duration::from_millis(200), rx.recv()).await;
    assert!(extra.is_err(), "unexpected extra callback: {:?}", extra.map(|o| o.map(|(key, _)| key)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn panicking_factory_fails_once_as_internal() {
    let retriever = ImageRetriever::from_config(ImageRetrieverConfig::default()).expect("retriever init failed");
    let (tx, mut rx) = mpsc::unbounded_channel();

    retriever.submit_image(ImageSource::factory(|| panic!("boom")), None, ChannelCallback { tx });
    let outcomes = collect(&mut rx, 1).await;
    assert_no_more_callbacks(&mut rx).await;

    assert!(
        matches!(&outcomes[0].1, Err(Some(ImageError::Internal(msg))) if msg.contains("boom")),
        "unexpected outcome: {:?}",
        outcomes[0].1.as_ref().err()
    );
    assert_eq!(retriever.active_count(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn panicking_transformer_fails_once_as_internal() {
    let (base, _) = spawn_tracking_server(create_png_bytes(4, 4), usize::MAX);
    let retriever = ImageRetriever::from_config(ImageRetrieverConfig::default()).expect("retriever init failed");
    let (tx, mut rx) = mpsc::unbounded_channel();

    let source = ImageSource::url_with_transformer(format!("{}/explode.png", base), |_| panic!("boom"));
    retriever.submit_image(source, None, ChannelCallback { tx: tx.clone() });
    let outcomes = collect(&mut rx, 1).await;
    assert_no_more_callbacks(&mut rx).await;

    assert!(
        matches!(&outcomes[0].1, Err(Some(ImageError::Internal(msg))) if msg.contains("boom")),
        "unexpected outcome: {:?}",
        outcomes[0].1.as_ref().err()
    );

    retriever.submit_image(ImageSource::url(format!("{}/after.png", base)), None, ChannelCallback { tx });
    let after = collect(&mut rx, 1).await;
    assert!(after[0].1.is_ok());
}
