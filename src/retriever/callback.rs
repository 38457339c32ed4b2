//! # 回调接口
//!
//! 每次提交恰好触发 `on_success` / `on_failure` 之一，且只触发一次。

use std::sync::Arc;

use super::{RetrievalUnit, Retriever};

/// 检索结果回调。
///
/// `on_failure` 的 `error` 为 `None` 表示“软失败”：数据不可用，但没有发生异常。
pub trait RetrievalCallback<U: RetrievalUnit>: Send + Sync + 'static {
    fn on_success(&self, retriever: &Retriever<U>, key: U::Key, options: U::Options, result: U::Output);

    fn on_failure(&self, retriever: &Retriever<U>, key: U::Key, error: Option<U::Error>);
}

impl<U, T> RetrievalCallback<U> for Arc<T>
where
    U: RetrievalUnit,
    T: RetrievalCallback<U> + ?Sized,
{
    fn on_success(&self, retriever: &Retriever<U>, key: U::Key, options: U::Options, result: U::Output) {
        (**self).on_success(retriever, key, options, result);
    }

    fn on_failure(&self, retriever: &Retriever<U>, key: U::Key, error: Option<U::Error>) {
        (**self).on_failure(retriever, key, error);
    }
}
