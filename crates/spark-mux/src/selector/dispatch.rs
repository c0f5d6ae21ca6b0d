//! 回调调度与失败隔离。
//!
//! 两个引擎共享同一套规则：回调返回 `WouldBlock`/`Interrupted` 视为搬运 0 字节；
//! 其他错误与 panic 只影响出错的 Handler，引擎先注销它，再经 [`FailureReporter`]
//! 输出 WARN 日志并转交带外钩子，然后继续服务同一轮中的其余 Handler。

use std::{
    any::Any,
    borrow::Cow,
    io,
    panic::{self, AssertUnwindSafe},
    sync::Arc,
};

use tracing::{debug, warn};

use crate::{
    error::{FailureCause, HandlerFailure},
    multiplexor::{Handler, HandlerRef, OpFlags},
    observability::targets,
};

use super::table::{HandlerTable, Transition};

/// 带外失败钩子；在 `poll` 线程上同步调用，应保持轻量。
pub type FailureHook = Arc<dyn Fn(&HandlerFailure) + Send + Sync>;

/// 在隔离边界内执行一次回调。
pub(crate) fn invoke<T, F>(
    handler: &HandlerRef,
    operation: OpFlags,
    call: F,
) -> Result<T, HandlerFailure>
where
    T: Default,
    F: FnOnce(&dyn Handler) -> io::Result<T>,
{
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| call(handler.as_ref())));
    let cause = match outcome {
        Ok(Ok(value)) => return Ok(value),
        Ok(Err(err))
            if matches!(
                err.kind(),
                io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
            ) =>
        {
            return Ok(T::default());
        }
        Ok(Err(err)) => FailureCause::Io(err),
        Err(payload) => FailureCause::Panic(panic_message(payload)),
    };
    Err(HandlerFailure {
        channel: handler.channel().id(),
        operation,
        cause,
    })
}

fn panic_message(payload: Box<dyn Any + Send>) -> Cow<'static, str> {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        return Cow::Borrowed(*message);
    }
    match payload.downcast::<String>() {
        Ok(message) => Cow::Owned(*message),
        Err(_) => Cow::Borrowed("non-string panic payload"),
    }
}

/// 失败上报：结构化 WARN 日志 + 可选钩子。
#[derive(Clone, Default)]
pub(crate) struct FailureReporter {
    hook: Option<FailureHook>,
}

impl FailureReporter {
    pub(crate) fn new(hook: Option<FailureHook>) -> Self {
        Self { hook }
    }

    pub(crate) fn report(&self, failure: &HandlerFailure) {
        warn!(
            target: targets::SELECTOR,
            channel = %failure.channel,
            operation = ?failure.operation,
            error = %failure.cause,
            "handler failure isolated"
        );
        if let Some(hook) = &self.hook {
            hook(failure);
        }
    }
}

/// 执行排队的 `OPEN`/`CLOSE`。
///
/// - `OPEN` 先于 `CLOSE`；同一 Handler 同时请求两者时，打开后立即关闭；
/// - `CLOSE` 先把 Handler 从全部集合移除，再调用 `do_close`，因此本轮 I/O 不会再触达它；
/// - `do_open` 失败按隔离规则注销该 Handler。
pub(crate) fn run_one_shots<S>(table: &HandlerTable, reporter: &FailureReporter, sync: S)
where
    S: Fn(&Transition<'_>) -> io::Result<()>,
{
    for (handler, ops) in table.take_pending() {
        if ops.contains(OpFlags::OPEN) {
            if let Err(failure) = invoke(&handler, OpFlags::OPEN, |h| h.do_open()) {
                table.remove_all(&handler, &sync);
                reporter.report(&failure);
                continue;
            }
        }
        if ops.contains(OpFlags::CLOSE) {
            table.remove_all(&handler, &sync);
            match invoke(&handler, OpFlags::CLOSE, |h| h.do_close()) {
                Ok(()) => debug!(
                    target: targets::SELECTOR,
                    channel = %handler.channel().id(),
                    "handler closed"
                ),
                Err(failure) => reporter.report(&failure),
            }
        }
    }
}
