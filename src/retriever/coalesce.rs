//! # 请求合并
//!
//! 相同合并键的请求在前一个仍在途时，不再单独执行，而是挂到在途请求上等待结果。
//! 完成后结果克隆分发给每个等待者，各自的回调仍然恰好触发一次。
//! 合并的请求共享同一个 `RetrievalHandle`，取消任意一个等于取消全部。

use std::sync::PoisonError;

use super::{RetrievalCallback, RetrievalHandle, RetrievalUnit, Retriever};

pub(super) struct InFlight<U: RetrievalUnit> {
    handle: RetrievalHandle,
    waiters: Vec<Waiter<U>>,
}

struct Waiter<U: RetrievalUnit> {
    key: U::Key,
    options: U::Options,
    callback: Box<dyn RetrievalCallback<U>>,
}

/// 挂在在途请求上的回调：先摘掉合并表项，再把结果分发给主请求和所有等待者。
struct FanOut<U: RetrievalUnit> {
    coalesce_key: String,
    primary: Box<dyn RetrievalCallback<U>>,
}

impl<U: RetrievalUnit> Retriever<U> {
    /// 提交一次可合并的检索。
    ///
    /// 单元的 `coalesce_key` 返回 `None` 时等价于 `submit`。
    pub fn submit_coalesced<C>(&self, key: U::Key, options: U::Options, callback: C) -> RetrievalHandle
    where
        C: RetrievalCallback<U>,
        U::Output: Clone,
        U::Error: Clone,
    {
        let Some(coalesce_key) = self.inner.unit.coalesce_key(&key, &options) else {
            return self.submit(key, options, callback);
        };

        let mut in_flight = self.inner.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(entry) = in_flight.get_mut(&coalesce_key) {
            if !entry.handle.is_cancelled() {
                log::debug!("🔗 合并到在途请求 - {} (等待者 {})", coalesce_key, entry.waiters.len() + 1);
                entry.waiters.push(Waiter {
                    key,
                    options,
                    callback: Box::new(callback),
                });
                return entry.handle.clone();
            }

            // 在途请求已被取消，不再挂靠
            drop(in_flight);
            return self.submit(key, options, callback);
        }

        let handle = RetrievalHandle::new();
        in_flight.insert(
            coalesce_key.clone(),
            InFlight {
                handle: handle.clone(),
                waiters: Vec::new(),
            },
        );
        drop(in_flight);

        let fan_out = FanOut {
            coalesce_key,
            primary: Box::new(callback),
        };
        self.enqueue(&handle, key, options, Box::new(fan_out));
        handle
    }

    fn take_waiters(&self, coalesce_key: &str) -> Vec<Waiter<U>> {
        let mut in_flight = self.inner.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        in_flight
            .remove(coalesce_key)
            .map(|entry| entry.waiters)
            .unwrap_or_default()
    }
}

impl<U> RetrievalCallback<U> for FanOut<U>
where
    U: RetrievalUnit,
    U::Output: Clone,
    U::Error: Clone,
{
    fn on_success(&self, retriever: &Retriever<U>, key: U::Key, options: U::Options, result: U::Output) {
        for waiter in retriever.take_waiters(&self.coalesce_key) {
            waiter
                .callback
                .on_success(retriever, waiter.key, waiter.options, result.clone());
        }
        self.primary.on_success(retriever, key, options, result);
    }

    fn on_failure(&self, retriever: &Retriever<U>, key: U::Key, error: Option<U::Error>) {
        for waiter in retriever.take_waiters(&self.coalesce_key) {
            waiter.callback.on_failure(retriever, waiter.key, error.clone());
        }
        self.primary.on_failure(retriever, key, error);
    }
}
