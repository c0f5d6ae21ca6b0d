use std::sync::Arc;

#[cfg(loom)]
use loom::sync::atomic::{AtomicBool, Ordering};
#[cfg(not(loom))]
use std::sync::atomic::{AtomicBool, Ordering};

/// 跨线程共享的取消令牌。
///
/// # 设计背景（Why）
/// - 驱动运行时需要在关闭时一次性通知所有工作线程；工作线程在每轮 `poll` 之间检查该标记，
///   而阻塞中的 `poll` 由 `Selector::destroy` 唤醒，两条路径互为补充。
///
/// # 契约说明（What）
/// - [`Cancellation::cancel`] 首次调用返回 `true`，之后返回 `false`；
/// - 克隆与 [`Cancellation::child`] 共享同一原子位。
#[derive(Clone, Debug)]
pub struct Cancellation {
    flag: Arc<AtomicBool>,
}

impl Cancellation {
    /// 创建处于“未取消”状态的令牌。
    pub fn new() -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    /// 标记取消；返回值表示是否为首次触发。
    pub fn cancel(&self) -> bool {
        self.flag
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// 派生共享同一原子位的子令牌。
    pub fn child(&self) -> Self {
        self.clone()
    }
}

impl Default for Cancellation {
    fn default() -> Self {
        Self::new()
    }
}
