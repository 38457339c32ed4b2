//! # 取消句柄
//!
//! `submit` 返回 `RetrievalHandle`，检索单元拿到同一标志的只读视图
//! `RetrievalContext`，在每个阻塞步骤前检查。被取消的单元仍然只触发一次失败回调。

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::EngineError;

/// 调用方持有的检索句柄。
#[derive(Debug, Clone, Default)]
pub struct RetrievalHandle {
    cancelled: Arc<AtomicBool>,
}

impl RetrievalHandle {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// 请求取消。已完成的检索不受影响。
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub(crate) fn context(&self) -> RetrievalContext {
        RetrievalContext {
            cancelled: Arc::clone(&self.cancelled),
        }
    }
}

/// 检索单元内部可见的取消标志。
#[derive(Debug, Clone, Default)]
pub struct RetrievalContext {
    cancelled: Arc<AtomicBool>,
}

impl RetrievalContext {
    /// 不与任何句柄关联、永远不会被取消的上下文，用于直接调用解码逻辑。
    pub fn detached() -> Self {
        Self::default()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// 已取消时返回 `EngineError::Cancelled`。
    pub fn ensure_active(&self) -> Result<(), EngineError> {
        if self.is_cancelled() {
            Err(EngineError::Cancelled)
        } else {
            Ok(())
        }
    }
}
