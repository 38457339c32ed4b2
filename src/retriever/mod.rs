//! # 有界并发检索引擎
//!
//! ## 设计思路
//!
//! 引擎只提供“调度 + 并发上限 + 回调分发”这一层通用能力，真正的检索逻辑由
//! `RetrievalUnit` 实现方提供。引擎对键、选项、结果类型一无所知。
//!
//! ## 实现思路
//!
//! ```text
//! submit ──► 无界 FIFO 队列 ──► 调度任务（逐个取出，等待信号量许可）
//!                                   │
//!                                   ▼
//!                         tokio::spawn(单元执行)
//!                                   │  catch_unwind 兜底 panic
//!                                   ▼
//!                     on_success / on_failure（恰好一次）
//! ```
//!
//! - `submit` 只做入队，永不阻塞调用方。
//! - 调度任务按提交顺序准入，完成顺序取决于各单元的 I/O 耗时。
//! - 普通 `submit` 不做去重；`submit_coalesced` 会把相同合并键的请求挂到在途请求上。
//! - 单元内的任何错误或 panic 都在单元边界转换为一次失败回调，不会影响工作池。
//! - 排队中已取消的请求在等待许可之前就直接失败。
//! - 运行时关闭时，排队或执行中的请求由 `Delivery` 的 `Drop` 补发一次 `NoRuntime` 失败回调。

mod callback;
mod coalesce;
mod handle;

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use futures::FutureExt;
use tokio::runtime::Handle;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, mpsc};

use crate::error::EngineError;

pub use callback::RetrievalCallback;
pub use handle::{RetrievalContext, RetrievalHandle};

use coalesce::InFlight;

/// 单次检索的具体实现（扩展点）。
pub trait RetrievalUnit: Send + Sync + 'static {
    type Key: fmt::Debug + Send + Sync + 'static;
    type Options: Send + Sync + 'static;
    type Output: Send + 'static;
    type Error: From<EngineError> + Send + 'static;

    /// 执行一次检索。
    ///
    /// - `Ok(Some(_))`：成功
    /// - `Ok(None)`：软失败（没有异常，只是拿不到可用数据）
    /// - `Err(_)`：携带异常的失败
    fn retrieve(
        &self,
        key: &Self::Key,
        options: &Self::Options,
        ctx: &RetrievalContext,
    ) -> impl Future<Output = Result<Option<Self::Output>, Self::Error>> + Send;

    /// 请求合并键；返回 `None` 的请求永远不会被合并。
    fn coalesce_key(&self, _key: &Self::Key, _options: &Self::Options) -> Option<String> {
        None
    }
}

/// 有界并发检索引擎。克隆开销很小，所有克隆共享同一个工作池。
pub struct Retriever<U: RetrievalUnit> {
    inner: Arc<Inner<U>>,
}

struct Inner<U: RetrievalUnit> {
    unit: U,
    max_concurrent: usize,
    queue: mpsc::UnboundedSender<Job<U>>,
    queued: AtomicUsize,
    active: AtomicUsize,
    in_flight: Mutex<HashMap<String, InFlight<U>>>,
}

struct Job<U: RetrievalUnit> {
    delivery: Delivery<U>,
    options: U::Options,
    context: RetrievalContext,
}

/// 回调只能被取走一次；未送达就被丢弃时（例如运行时关闭）由 `Drop` 补发失败回调。
struct Delivery<U: RetrievalUnit> {
    retriever: Retriever<U>,
    pending: Option<(U::Key, Box<dyn RetrievalCallback<U>>)>,
}

impl<U: RetrievalUnit> Clone for Retriever<U> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<U: RetrievalUnit> fmt::Debug for Retriever<U> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Retriever")
            .field("max_concurrent", &self.inner.max_concurrent)
            .field("active", &self.active_count())
            .field("queued", &self.queued_count())
            .finish()
    }
}

impl<U: RetrievalUnit> Retriever<U> {
    /// 在当前 tokio 运行时上创建引擎。
    ///
    /// # 示例
    /// ```rust,ignore
    /// let retriever = Retriever::new(4, MyUnit::default())?;
    /// let handle = retriever.submit(key, options, MyCallback);
    /// ```
    pub fn new(max_concurrent: usize, unit: U) -> Result<Self, EngineError> {
        let runtime = Handle::try_current().map_err(|e| EngineError::NoRuntime(e.to_string()))?;
        Self::with_runtime(max_concurrent, unit, runtime)
    }

    /// 在指定运行时上创建引擎。
    pub fn with_runtime(max_concurrent: usize, unit: U, runtime: Handle) -> Result<Self, EngineError> {
        if max_concurrent == 0 {
            return Err(EngineError::InvalidConfig("max_concurrent 必须大于 0".to_string()));
        }

        let (queue, receiver) = mpsc::unbounded_channel();
        let semaphore = Arc::new(Semaphore::new(max_concurrent));
        runtime.spawn(dispatch(receiver, semaphore));

        log::debug!("🚦 检索引擎已启动 - max_concurrent={}", max_concurrent);

        Ok(Self {
            inner: Arc::new(Inner {
                unit,
                max_concurrent,
                queue,
                queued: AtomicUsize::new(0),
                active: AtomicUsize::new(0),
                in_flight: Mutex::new(HashMap::new()),
            }),
        })
    }

    pub fn unit(&self) -> &U {
        &self.inner.unit
    }

    pub fn max_concurrent(&self) -> usize {
        self.inner.max_concurrent
    }

    /// 正在执行的单元数。
    pub fn active_count(&self) -> usize {
        self.inner.active.load(Ordering::SeqCst)
    }

    /// 已提交但尚未获准执行的请求数。
    pub fn queued_count(&self) -> usize {
        self.inner.queued.load(Ordering::SeqCst)
    }

    /// 提交一次检索。
    ///
    /// 永不阻塞；回调在工作线程上异步触发，且恰好一次。
    pub fn submit<C>(&self, key: U::Key, options: U::Options, callback: C) -> RetrievalHandle
    where
        C: RetrievalCallback<U>,
    {
        let handle = RetrievalHandle::new();
        self.enqueue(&handle, key, options, Box::new(callback));
        handle
    }

    fn enqueue(
        &self,
        handle: &RetrievalHandle,
        key: U::Key,
        options: U::Options,
        callback: Box<dyn RetrievalCallback<U>>,
    ) {
        let job = Job {
            delivery: Delivery {
                retriever: self.clone(),
                pending: Some((key, callback)),
            },
            options,
            context: handle.context(),
        };

        self.inner.queued.fetch_add(1, Ordering::SeqCst);
        if let Err(mpsc::error::SendError(job)) = self.inner.queue.send(job) {
            log::warn!("⚠️ 调度任务已退出（运行时可能已关闭），直接判定失败 - {:?}", job.delivery.key());
            job.reject(EngineError::NoRuntime("调度任务已退出".to_string()));
        }
    }
}

async fn dispatch<U: RetrievalUnit>(mut receiver: mpsc::UnboundedReceiver<Job<U>>, semaphore: Arc<Semaphore>) {
    while let Some(job) = receiver.recv().await {
        if job.context.is_cancelled() {
            log::debug!("🚫 检索在准入前已取消 - {:?}", job.delivery.key());
            job.reject(EngineError::Cancelled);
            continue;
        }

        match Arc::clone(&semaphore).acquire_owned().await {
            Ok(permit) => {
                tokio::spawn(job.run(permit));
            }
            Err(_) => {
                job.reject(EngineError::NoRuntime("工作池已关闭".to_string()));
            }
        }
    }

    log::debug!("🛑 检索引擎调度任务退出");
}

impl<U: RetrievalUnit> Job<U> {
    async fn run(self, permit: OwnedSemaphorePermit) {
        let Job {
            delivery,
            options,
            context,
        } = self;
        let retriever = delivery.retriever.clone();
        let inner = &retriever.inner;
        inner.queued.fetch_sub(1, Ordering::SeqCst);

        if context.is_cancelled() {
            drop(permit);
            log::debug!("🚫 检索在准入前已取消 - {:?}", delivery.key());
            delivery.fail(Some(EngineError::Cancelled.into()));
            return;
        }
        let Some(key) = delivery.key() else {
            return;
        };

        inner.active.fetch_add(1, Ordering::SeqCst);
        let started = Instant::now();
        let outcome = AssertUnwindSafe(inner.unit.retrieve(key, &options, &context))
            .catch_unwind()
            .await;
        inner.active.fetch_sub(1, Ordering::SeqCst);
        drop(permit);

        let elapsed = started.elapsed().as_millis();
        match outcome {
            Ok(Ok(Some(output))) => {
                log::debug!("✅ 检索成功 - {:?} total={}ms", key, elapsed);
                delivery.succeed(options, output);
            }
            Ok(Ok(None)) => {
                log::debug!("⚠️ 检索无结果 - {:?} total={}ms", key, elapsed);
                delivery.fail(None);
            }
            Ok(Err(err)) => {
                log::debug!("❌ 检索失败 - {:?} total={}ms", key, elapsed);
                delivery.fail(Some(err));
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                log::error!("💥 检索单元 panic - {:?}: {}", key, message);
                delivery.fail(Some(EngineError::Panicked(message).into()));
            }
        }
    }

    /// 未获准执行就判定失败。
    fn reject(self, error: EngineError) {
        self.delivery.retriever.inner.queued.fetch_sub(1, Ordering::SeqCst);
        self.delivery.fail(Some(error.into()));
    }
}

impl<U: RetrievalUnit> Delivery<U> {
    fn key(&self) -> Option<&U::Key> {
        self.pending.as_ref().map(|(key, _)| key)
    }

    fn succeed(mut self, options: U::Options, output: U::Output) {
        if let Some((key, callback)) = self.pending.take() {
            callback.on_success(&self.retriever, key, options, output);
        }
    }

    fn fail(mut self, error: Option<U::Error>) {
        if let Some((key, callback)) = self.pending.take() {
            callback.on_failure(&self.retriever, key, error);
        }
    }
}

impl<U: RetrievalUnit> Drop for Delivery<U> {
    fn drop(&mut self) {
        if let Some((key, callback)) = self.pending.take() {
            log::warn!("⚠️ 检索未完成即被丢弃（运行时已关闭） - {:?}", key);
            let error = EngineError::NoRuntime("运行时已关闭，检索被丢弃".to_string());
            callback.on_failure(&self.retriever, key, Some(error.into()));
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
