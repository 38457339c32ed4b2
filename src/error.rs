//! 引擎级错误类型模块
//!
//! # 设计思路
//!
//! 检索引擎本身只会产生少量“与具体检索逻辑无关”的错误：构造参数非法、
//! 找不到运行时、单元被取消、单元 panic。这些错误通过 `From<EngineError>`
//! 注入到各检索单元自己的错误类型里，保证回调只需要面对一种错误。
//!
//! # 实现思路
//!
//! - 使用 `thiserror` 派生可读错误消息。
//! - 所有变体只携带字符串，便于 `Clone` 后分发给多个合并回调。

/// 检索引擎错误。
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    /// 构造参数非法（例如并发上限为 0）
    #[error("引擎配置错误: {0}")]
    InvalidConfig(String),

    /// 当前线程不在 tokio 运行时内
    #[error("找不到可用的异步运行时: {0}")]
    NoRuntime(String),

    /// 检索在完成前被调用方取消
    #[error("检索已取消")]
    Cancelled,

    /// 检索单元执行过程中 panic，已在单元边界捕获
    #[error("检索单元异常终止: {0}")]
    Panicked(String),
}
