//! 选择器：就绪驱动的 Handler 调度引擎。
//!
//! # 教案级导览
//!
//! ## 意图（Why）
//! - 一个（或少数几个）驱动线程借助就绪通知服务大量连接，而不是每连接一个线程；
//! - 引擎实现可替换：开发期使用无条件轮询的 [`RoundRobinSelector`]，生产环境使用基于
//!   epoll/kqueue 的 [`ReadinessSelector`]，二者通过 [`SelectorFactory`] 暴露同一接口。
//!
//! ## 契约（What）
//! - `register`/`deregister` 可在任意线程调用，并与进行中的 `poll` 并发；
//! - 一轮 `poll` 读取一份不可变快照，期间发生的注册要么整体可见，要么整体不可见；
//! - `poll` 阻塞至就绪或超时，返回本轮是否搬运了至少一个字节；
//! - `destroy` 清空全部集合、拒绝后续注册，并让阻塞中的 `poll` 尽快返回 `false`；
//! - 回调失败按 [`dispatch`] 的隔离规则处理，绝不中断整个反应器。
//!
//! ## 风险提示（Trade-offs）
//! - 回调内对同一选择器的注册/注销会在下一轮才生效（本轮使用的是旧快照）；
//! - 回调在持有引擎内部轮询锁时执行，回调中再次调用同一选择器的 `poll` 会死锁。

mod dispatch;
mod round_robin;
mod table;

#[cfg(unix)]
mod readiness;

use std::{fmt, sync::Arc, time::Duration};

use tracing::warn;

pub use dispatch::FailureHook;
#[cfg(unix)]
pub use readiness::{ReadinessSelector, ReadinessSelectorFactory};
pub use round_robin::{RoundRobinSelector, RoundRobinSelectorFactory};

use crate::{
    config::{SelectorConfig, SelectorKind},
    error::Result,
    multiplexor::{HandlerRef, OpFlags},
    observability::targets,
};

/// 就绪多路复用引擎。
pub trait Selector: Send + Sync + fmt::Debug {
    /// 为 `handler` 登记 `ops`。
    ///
    /// - `READ`/`WRITE` 进入对应集合；重复登记已持有的操作会重新武装就绪通知；
    /// - `OPEN`/`CLOSE` 排队，在下一轮 `poll` 中各执行一次；
    /// - 已销毁返回 [`MuxError::SelectorDestroyed`](crate::MuxError::SelectorDestroyed)，
    ///   引擎无法驱动该类 Handler 返回
    ///   [`MuxError::UnsupportedHandler`](crate::MuxError::UnsupportedHandler)。
    fn register(&self, handler: HandlerRef, ops: OpFlags) -> Result<()>;

    /// 移除 `handler` 的 `ops`；未登记的操作视为无操作。返回是否有任何变化。
    fn deregister(&self, handler: &HandlerRef, ops: OpFlags) -> bool;

    /// 是否至少有一个 Handler 登记了读或写。
    fn is_ready(&self) -> bool;

    /// 驱动一轮：等待就绪（至多 `timeout`），执行就绪 Handler 的回调，
    /// 返回本轮是否搬运了字节。
    fn poll(&self, timeout: Duration) -> Result<bool>;

    /// 唤醒阻塞中的 `poll`。
    fn wakeup(&self);

    /// 销毁：清空集合、拒绝后续注册；幂等。
    fn destroy(&self);

    fn is_destroyed(&self) -> bool;
}

/// 构造全新选择器的工厂；不同选择器之间不共享任何可变状态。
pub trait SelectorFactory: Send + Sync + fmt::Debug {
    fn kind(&self) -> SelectorKind;

    fn new_selector(&self) -> Result<Arc<dyn Selector>>;
}

/// 按配置选择引擎工厂。
///
/// 非 Unix 平台没有就绪引擎，`Readiness` 会退化为轮询引擎并输出 WARN 日志。
pub fn factory_for(
    config: &SelectorConfig,
    hook: Option<FailureHook>,
) -> Result<Arc<dyn SelectorFactory>> {
    config.validate()?;
    let factory: Arc<dyn SelectorFactory> = match config.kind {
        #[cfg(unix)]
        SelectorKind::Readiness => {
            Arc::new(ReadinessSelectorFactory::new(config.clone()).with_failure_hook_opt(hook))
        }
        #[cfg(not(unix))]
        SelectorKind::Readiness => {
            warn!(
                target: targets::SELECTOR,
                "readiness selector unavailable on this platform; using round-robin"
            );
            Arc::new(RoundRobinSelectorFactory::new(config.clone()).with_failure_hook_opt(hook))
        }
        SelectorKind::RoundRobin => {
            warn!(
                target: targets::SELECTOR,
                "round-robin selector drives every handler each sweep; use it for development only"
            );
            Arc::new(RoundRobinSelectorFactory::new(config.clone()).with_failure_hook_opt(hook))
        }
    };
    Ok(factory)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn factory_follows_configured_kind() {
        let factory =
            factory_for(&SelectorConfig::with_kind(SelectorKind::RoundRobin), None).unwrap();
        assert_eq!(factory.kind(), SelectorKind::RoundRobin);

        let factory = factory_for(&SelectorConfig::default(), None).unwrap();
        #[cfg(unix)]
        assert_eq!(factory.kind(), SelectorKind::Readiness);
        #[cfg(not(unix))]
        assert_eq!(factory.kind(), SelectorKind::RoundRobin);
    }

    #[test]
    fn factories_create_independent_selectors() {
        let factory =
            factory_for(&SelectorConfig::with_kind(SelectorKind::RoundRobin), None).unwrap();
        let first = factory.new_selector().unwrap();
        let second = factory.new_selector().unwrap();
        first.destroy();
        assert!(first.is_destroyed());
        assert!(!second.is_destroyed(), "销毁一个选择器不得影响同工厂的其他实例");
    }

    #[test]
    fn invalid_config_is_rejected() {
        let config = SelectorConfig::default().with_io_budget(0);
        assert_eq!(
            factory_for(&config, None).unwrap_err().code(),
            "spark.mux.config_invalid"
        );
    }
}
