//! # error 模块说明
//!
//! ## 角色定位（Why）
//! - 集中定义端点解析、会话路由、选择器生命周期与驱动运行时的全部失败语义；
//! - 每个变体携带稳定错误码（`spark.mux.*`），供日志与告警按码聚合，而非依赖易变的文案。
//!
//! ## 传播约定（What）
//! - 端点解析与路由错误同步返回给 `Connector::new_session` 的调用方，只影响该次调用；
//! - Handler 回调失败被隔离在 `poll` 内部，以 [`HandlerFailure`] 形式交给带外钩子，不会中断反应器循环；
//! - `WouldBlock`/`Interrupted` 不是失败，按“本轮搬运 0 字节”处理。

use std::{borrow::Cow, io};

use thiserror::Error;

use crate::{connector::SessionId, multiplexor::ChannelId, multiplexor::OpFlags};

/// 本 crate 统一的返回别名。
pub type Result<T, E = MuxError> = core::result::Result<T, E>;

/// 多路复用子系统的错误域。
///
/// # 教案式说明
/// - **意图 (Why)**：调用方需要区分“输入有误”（可换端点重试）、“误用”（选择器已销毁）与
///   “环境失败”（系统调用出错），因此保留细粒度枚举而不是一个字符串错误。
/// - **契约 (What)**：
///   - 所有变体 `Send + Sync + 'static`，可跨驱动线程传播；
///   - [`MuxError::code`] 返回稳定错误码，文案可以演进，错误码不可变更。
/// - **设计权衡 (Trade-offs)**：`InvalidEndpoint` 保存原始输入的拷贝，方便排障；
///   极长的输入会随错误一起分配，调用方应在入口处限制 URI 长度。
#[derive(Debug, Error)]
pub enum MuxError {
    /// URI 无法按 `scheme:[//[userinfo@]host[:port]][/path][?query][#fragment]` 解析。
    #[error("invalid endpoint `{input}`: {reason}")]
    InvalidEndpoint { input: String, reason: &'static str },

    /// 没有任何已注册的会话提供者声明支持该端点。
    #[error("no session provider supports endpoint `{endpoint}`")]
    UnsupportedEndpoint { endpoint: String },

    /// 在 `destroy()` 之后仍尝试注册。
    #[error("selector has been destroyed")]
    SelectorDestroyed,

    /// 选择器无法驱动该类 Handler（例如就绪引擎要求通道暴露文件描述符）。
    #[error("selector cannot drive handler of channel {channel}")]
    UnsupportedHandler { channel: ChannelId },

    /// Handler 回调失败；仅在带外通道或诊断中出现，不会从 `poll` 返回。
    #[error(transparent)]
    HandlerFailure(#[from] HandlerFailure),

    /// 会话已关闭，无法继续发送。
    #[error("session {session} is closed")]
    SessionClosed { session: SessionId },

    /// 会话或提供者不支持所请求的操作（例如在监听会话上发送数据）。
    #[error("operation `{operation}` is not supported by {subject}")]
    UnsupportedOperation {
        operation: &'static str,
        subject: String,
    },

    /// 驱动运行时的工作线程已满。
    #[error("selector driver capacity exhausted ({capacity} workers)")]
    CapacityExhausted { capacity: usize },

    /// 驱动运行时已进入关闭流程。
    #[error("selector driver has been shut down")]
    DriverShutdown,

    /// 配置不合法或无法解析。
    #[error("invalid configuration: {reason}")]
    Config { reason: String },

    /// 底层系统调用失败。
    #[error("{context}: {source}")]
    Io {
        context: &'static str,
        #[source]
        source: io::Error,
    },

    /// 传输层的系统调用失败，携带传输自己的稳定错误码（如 `spark.mux.tcp.bind_failed`）。
    #[error("{context}: {source}")]
    Transport {
        code: &'static str,
        context: &'static str,
        #[source]
        source: io::Error,
    },
}

impl MuxError {
    /// 返回稳定错误码。
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidEndpoint { .. } => "spark.mux.invalid_endpoint",
            Self::UnsupportedEndpoint { .. } => "spark.mux.unsupported_endpoint",
            Self::SelectorDestroyed => "spark.mux.selector_destroyed",
            Self::UnsupportedHandler { .. } => "spark.mux.unsupported_handler",
            Self::HandlerFailure(_) => "spark.mux.handler_failure",
            Self::SessionClosed { .. } => "spark.mux.session_closed",
            Self::UnsupportedOperation { .. } => "spark.mux.unsupported_operation",
            Self::CapacityExhausted { .. } => "spark.mux.capacity_exhausted",
            Self::DriverShutdown => "spark.mux.driver_shutdown",
            Self::Config { .. } => "spark.mux.config_invalid",
            Self::Io { .. } => "spark.mux.io_failed",
            Self::Transport { code, .. } => *code,
        }
    }

    /// 以操作名包装 IO 错误。
    pub fn io(context: &'static str, source: io::Error) -> Self {
        Self::Io { context, source }
    }

    /// 以传输层错误码包装 IO 错误。
    pub fn transport(code: &'static str, context: &'static str, source: io::Error) -> Self {
        Self::Transport {
            code,
            context,
            source,
        }
    }

    /// 底层 IO 错误（若有）。
    pub fn io_error(&self) -> Option<&io::Error> {
        match self {
            Self::Io { source, .. } | Self::Transport { source, .. } => Some(source),
            _ => None,
        }
    }

    pub(crate) fn invalid_endpoint(input: &str, reason: &'static str) -> Self {
        Self::InvalidEndpoint {
            input: input.to_owned(),
            reason,
        }
    }

    pub(crate) fn config(reason: impl Into<String>) -> Self {
        Self::Config {
            reason: reason.into(),
        }
    }
}

/// 一次 Handler 回调失败的结构化记录。
///
/// - **意图 (Why)**：单个连接的异常不能拖垮反应器；引擎把失败收敛为该结构，
///   注销对应 Handler 后交给 [`FailureHook`](crate::selector::FailureHook)。
/// - **契约 (What)**：`channel` 标识失败的通道；`operation` 为触发失败的单一操作位
///   （`OPEN`/`READ`/`WRITE`/`CLOSE` 之一）；`cause` 区分返回错误与 panic。
#[derive(Debug, Error)]
#[error("handler of channel {channel} failed during {operation:?}: {cause}")]
pub struct HandlerFailure {
    pub channel: ChannelId,
    pub operation: OpFlags,
    #[source]
    pub cause: FailureCause,
}

/// Handler 失败的根因。
#[derive(Debug, Error)]
pub enum FailureCause {
    /// 回调返回了 IO 错误。
    #[error("callback returned error: {0}")]
    Io(#[from] io::Error),
    /// 回调发生 panic，已被引擎捕获。
    #[error("callback panicked: {0}")]
    Panic(Cow<'static, str>),
}
