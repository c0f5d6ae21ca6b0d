use std::{fmt, io, sync::Arc, time::Duration};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, trace};

use crate::{
    config::{SelectorConfig, SelectorKind},
    error::{HandlerFailure, Result},
    multiplexor::{HandlerRef, OpFlags},
    observability::targets,
    runtime::{Clock, SystemClock},
};

use super::{
    FailureHook, Selector, SelectorFactory,
    dispatch::{self, FailureReporter},
    table::{HandlerTable, Transition},
};

/// 轮询引擎不与内核交互。
fn no_kernel(_: &Transition<'_>) -> io::Result<()> {
    Ok(())
}

/// 无条件轮询的开发桩引擎。
///
/// # 教案式注释
///
/// ## 意图 (Why)
/// - 驱动没有 OS 描述符的内存通道（测试替身、进程内管道），并作为就绪引擎的行为参照。
///
/// ## 逻辑 (How)
/// - 每次扫描对读集合中的 Handler 调用 `do_read`，对写集合中的 Handler 调用 `do_write`；
/// - 扫描有字节搬运即返回 `true`；否则在条件变量上等待至多 `sweep_interval`，直到超时；
/// - 注册只让等待提前结束并重新扫描；`wakeup` 与销毁则中断本轮，`poll` 立即返回 `false`；
/// - 等待而非自旋，保证空闲时不占用 CPU。
///
/// ## 注意事项 (Trade-offs)
/// - 不感知真实就绪状态，空闲连接每次扫描都会被调用一次；仅适合开发与测试。
pub struct RoundRobinSelector {
    table: HandlerTable,
    reporter: FailureReporter,
    config: SelectorConfig,
    clock: Arc<dyn Clock>,
    cycle: Mutex<()>,
    signal: Mutex<Signal>,
    wake: Condvar,
}

/// 条件变量保护的唤醒状态。
#[derive(Default)]
struct Signal {
    /// 有新登记，需要重新扫描。
    pending: bool,
    /// `wakeup`/`destroy` 要求本轮立即结束。
    interrupted: bool,
}

impl RoundRobinSelector {
    pub fn new(config: SelectorConfig) -> Self {
        Self::with_parts(config, None, Arc::new(SystemClock))
    }

    fn with_parts(config: SelectorConfig, hook: Option<FailureHook>, clock: Arc<dyn Clock>) -> Self {
        Self {
            table: HandlerTable::new(0),
            reporter: FailureReporter::new(hook),
            config,
            clock,
            cycle: Mutex::new(()),
            signal: Mutex::new(Signal::default()),
            wake: Condvar::new(),
        }
    }

    fn notify(&self) {
        self.signal.lock().pending = true;
        self.wake.notify_all();
    }

    fn interrupt(&self) {
        let mut signal = self.signal.lock();
        signal.pending = true;
        signal.interrupted = true;
        drop(signal);
        self.wake.notify_all();
    }

    /// 等待至多 `wait`；返回等待期间（或之前）是否收到中断。
    fn park(&self, wait: Duration) -> bool {
        let mut signal = self.signal.lock();
        if !signal.pending {
            let _ = self.wake.wait_for(&mut signal, wait);
        }
        signal.pending = false;
        std::mem::take(&mut signal.interrupted)
    }

    fn isolate(&self, handler: &HandlerRef, failure: &HandlerFailure) {
        self.table.remove_all(handler, no_kernel);
        self.reporter.report(failure);
    }

    /// 先扫读集合，再扫写集合；读阶段失败被隔离的 Handler 不再进入写阶段。
    fn sweep(&self) -> usize {
        let sets = self.table.load();
        let budget = self.config.io_budget;
        let mut moved = 0;
        let mut isolated = Vec::new();
        for entry in sets.readers() {
            match dispatch::invoke(&entry.handler, OpFlags::READ, |h| h.do_read(budget)) {
                Ok(bytes) => moved += bytes,
                Err(failure) => {
                    self.isolate(&entry.handler, &failure);
                    isolated.push(entry.token);
                }
            }
        }
        for entry in sets.writers() {
            if isolated.contains(&entry.token) {
                continue;
            }
            match dispatch::invoke(&entry.handler, OpFlags::WRITE, |h| h.do_write(budget)) {
                Ok(bytes) => moved += bytes,
                Err(failure) => self.isolate(&entry.handler, &failure),
            }
        }
        trace!(target: targets::SELECTOR, handlers = sets.len(), moved, "round-robin sweep");
        moved
    }
}

impl Selector for RoundRobinSelector {
    fn register(&self, handler: HandlerRef, ops: OpFlags) -> Result<()> {
        let added = self.table.add(&handler, ops, no_kernel)?;
        debug!(
            target: targets::SELECTOR,
            channel = %handler.channel().id(),
            ops = ?added.after,
            queued = ?added.queued,
            "handler registered"
        );
        self.notify();
        Ok(())
    }

    fn deregister(&self, handler: &HandlerRef, ops: OpFlags) -> bool {
        self.table.remove(handler, ops, no_kernel)
    }

    fn is_ready(&self) -> bool {
        !self.table.is_destroyed() && !self.table.load().is_empty()
    }

    fn poll(&self, timeout: Duration) -> Result<bool> {
        let _cycle = self.cycle.lock();
        let deadline = self.clock.deadline(timeout);
        loop {
            if self.table.is_destroyed() {
                return Ok(false);
            }
            dispatch::run_one_shots(&self.table, &self.reporter, no_kernel);
            if self.sweep() > 0 {
                return Ok(true);
            }
            let remaining = self.clock.remaining(deadline);
            if remaining.is_zero() || self.table.is_destroyed() {
                return Ok(false);
            }
            if self.park(remaining.min(self.config.sweep_interval())) {
                trace!(target: targets::SELECTOR, "round-robin poll interrupted");
                return Ok(false);
            }
        }
    }

    fn wakeup(&self) {
        self.interrupt();
    }

    fn destroy(&self) {
        if let Some(cleared) = self.table.destroy() {
            debug!(
                target: targets::SELECTOR,
                released = cleared.len(),
                "round-robin selector destroyed"
            );
        }
        self.interrupt();
    }

    fn is_destroyed(&self) -> bool {
        self.table.is_destroyed()
    }
}

impl fmt::Debug for RoundRobinSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RoundRobinSelector")
            .field("handlers", &self.table.load().len())
            .field("destroyed", &self.table.is_destroyed())
            .field("io_budget", &self.config.io_budget)
            .finish()
    }
}

/// [`RoundRobinSelector`] 的工厂。
#[derive(Clone)]
pub struct RoundRobinSelectorFactory {
    config: SelectorConfig,
    hook: Option<FailureHook>,
    clock: Arc<dyn Clock>,
}

impl RoundRobinSelectorFactory {
    pub fn new(config: SelectorConfig) -> Self {
        Self {
            config,
            hook: None,
            clock: Arc::new(SystemClock),
        }
    }

    /// 为创建的每个选择器安装失败钩子。
    pub fn with_failure_hook(self, hook: FailureHook) -> Self {
        self.with_failure_hook_opt(Some(hook))
    }

    pub(crate) fn with_failure_hook_opt(mut self, hook: Option<FailureHook>) -> Self {
        self.hook = hook;
        self
    }

    /// 覆盖超时换算所用的时钟。
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}

impl SelectorFactory for RoundRobinSelectorFactory {
    fn kind(&self) -> SelectorKind {
        SelectorKind::RoundRobin
    }

    fn new_selector(&self) -> Result<Arc<dyn Selector>> {
        Ok(Arc::new(RoundRobinSelector::with_parts(
            self.config.clone(),
            self.hook.clone(),
            Arc::clone(&self.clock),
        )))
    }
}

impl fmt::Debug for RoundRobinSelectorFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RoundRobinSelectorFactory")
            .field("config", &self.config)
            .field("failure_hook", &self.hook.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::multiplexor::{Channel, ChannelId, Handler};
    use std::{
        sync::atomic::{AtomicUsize, Ordering},
        thread,
        time::Instant,
    };

    #[derive(Default)]
    struct Counting {
        reads: AtomicUsize,
        writes: AtomicUsize,
        bytes: usize,
        fail_reads: bool,
    }

    impl Channel for Counting {
        fn id(&self) -> ChannelId {
            ChannelId::new(1)
        }
    }

    impl Handler for Counting {
        fn channel(&self) -> &dyn Channel {
            self
        }

        fn do_read(&self, _budget: usize) -> io::Result<usize> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            if self.fail_reads {
                return Err(io::ErrorKind::ConnectionReset.into());
            }
            Ok(self.bytes)
        }

        fn do_write(&self, _budget: usize) -> io::Result<usize> {
            self.writes.fetch_add(1, Ordering::SeqCst);
            Ok(self.bytes)
        }
    }

    fn selector() -> RoundRobinSelector {
        RoundRobinSelector::new(SelectorConfig::with_kind(SelectorKind::RoundRobin))
    }

    #[test]
    fn sweep_drives_every_registered_operation() {
        let selector = selector();
        let counting = Arc::new(Counting {
            bytes: 3,
            ..Counting::default()
        });
        selector
            .register(counting.clone(), OpFlags::READ | OpFlags::WRITE)
            .unwrap();
        assert!(selector.poll(Duration::from_millis(10)).unwrap());
        assert_eq!(counting.reads.load(Ordering::SeqCst), 1);
        assert_eq!(counting.writes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn handler_isolated_while_reading_is_skipped_by_the_write_pass() {
        let selector = selector();
        let failing = Arc::new(Counting {
            fail_reads: true,
            ..Counting::default()
        });
        let healthy = Arc::new(Counting {
            bytes: 2,
            ..Counting::default()
        });
        selector
            .register(failing.clone(), OpFlags::READ | OpFlags::WRITE)
            .unwrap();
        selector.register(healthy.clone(), OpFlags::WRITE).unwrap();

        assert!(selector.poll(Duration::from_millis(10)).unwrap());
        assert_eq!(failing.reads.load(Ordering::SeqCst), 1);
        assert_eq!(failing.writes.load(Ordering::SeqCst), 0);
        assert_eq!(healthy.writes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn idle_poll_waits_for_timeout_without_spinning() {
        let selector = selector();
        let counting = Arc::new(Counting::default());
        selector.register(counting.clone(), OpFlags::READ).unwrap();
        let started = Instant::now();
        assert!(!selector.poll(Duration::from_millis(40)).unwrap());
        assert!(started.elapsed() >= Duration::from_millis(40));
        let sweeps = counting.reads.load(Ordering::SeqCst);
        assert!(sweeps < 40, "空闲时不得忙等，实际扫描 {sweeps} 次");
    }

    #[test]
    fn destroy_releases_a_parked_poll() {
        let selector = Arc::new(selector());
        selector
            .register(Arc::new(Counting::default()), OpFlags::READ)
            .unwrap();
        let poller = {
            let selector = Arc::clone(&selector);
            thread::spawn(move || {
                let started = Instant::now();
                let moved = selector.poll(Duration::from_secs(10)).unwrap();
                (moved, started.elapsed())
            })
        };
        thread::sleep(Duration::from_millis(30));
        selector.destroy();
        let (moved, elapsed) = poller.join().expect("poll 线程不应 panic");
        assert!(!moved);
        assert!(elapsed < Duration::from_secs(5));
        assert!(!selector.is_ready());
    }

    #[test]
    fn registration_resweeps_without_ending_the_cycle() {
        let selector = Arc::new(selector());
        let idle = Arc::new(Counting::default());
        selector.register(idle, OpFlags::READ).unwrap();
        let poller = {
            let selector = Arc::clone(&selector);
            thread::spawn(move || selector.poll(Duration::from_secs(10)).unwrap())
        };
        thread::sleep(Duration::from_millis(30));
        let busy = Arc::new(Counting {
            bytes: 5,
            ..Counting::default()
        });
        selector.register(busy.clone(), OpFlags::WRITE).unwrap();
        assert!(poller.join().expect("poll 线程不应 panic"), "新登记的 Handler 应在同一次 poll 中被扫描");
        assert!(busy.writes.load(Ordering::SeqCst) >= 1);
    }
}
