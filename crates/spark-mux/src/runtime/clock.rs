// 教案级说明：引擎与驱动只需要“当前单调时间”，不需要异步睡眠；
// 等待一律交给内核（epoll/kqueue）或条件变量完成，因此 `Clock` 只暴露 `now`。
use std::{
    fmt,
    time::{Duration, Instant},
};

/// 可注入的单调时钟。
///
/// # 接口约束（What）
/// - `now` 必须单调不减；
/// - 实现需 `Send + Sync`，以便在驱动线程与注册线程之间共享。
///
/// # 使用指引（How）
/// - 生产环境使用 [`SystemClock`]；
/// - 超时换算统一通过 [`Clock::deadline`] 与 [`Clock::remaining`]，避免各处重复做饱和运算。
pub trait Clock: Send + Sync + fmt::Debug + 'static {
    fn now(&self) -> Instant;

    /// 从当前时刻起 `timeout` 之后的截止点；溢出时退化为“远期”。
    fn deadline(&self, timeout: Duration) -> Instant {
        let now = self.now();
        now.checked_add(timeout)
            .unwrap_or_else(|| now + Duration::from_secs(60 * 60 * 24 * 365))
    }

    /// 距离截止点的剩余时间，已过期返回零。
    fn remaining(&self, deadline: Instant) -> Duration {
        deadline.saturating_duration_since(self.now())
    }
}

/// 委托给 [`Instant::now`] 的系统时钟。
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remaining_saturates_at_zero() {
        let clock = SystemClock;
        let past = clock.now();
        std::thread::sleep(Duration::from_millis(2));
        assert_eq!(clock.remaining(past), Duration::ZERO);
    }

    #[test]
    fn huge_timeout_does_not_overflow() {
        let clock = SystemClock;
        let deadline = clock.deadline(Duration::MAX);
        assert!(deadline > clock.now());
    }
}
