//! 基于操作系统就绪通知的生产引擎。
//!
//! # 教案级导览
//!
//! - **Why**：连接数增长后，逐个调用空闲 Handler 的代价不可接受；借助 epoll/kqueue
//!   （经由 `mio`）只调度内核报告就绪的描述符。
//! - **What**：
//!   - Handler 必须通过 [`Channel::raw_fd`](crate::multiplexor::Channel::raw_fd) 暴露描述符，
//!     否则注册返回 [`MuxError::UnsupportedHandler`]；
//!   - 读就绪（含对端半关闭与错误）调用 `do_read`，写就绪调用 `do_write`，仅限已登记的操作；
//!   - token `0` 保留给唤醒器，Handler token 从 `1` 开始单调递增，永不复用。
//! - **How**：
//!   - `mio` 采用边沿触发。回调搬运量达到预算时，引擎认为描述符可能仍有数据，把它放入
//!     “延续集合”，下一轮以零超时等待并直接再次调度；
//!   - 每次 `register` 都会对内核执行一次 `reregister`，借助 `EPOLL_CTL_MOD` 重新评估就绪状态，
//!     因此“先排队数据、再登记 WRITE”不会丢失写就绪通知。
//! - **Trade-offs**：回调必须读写到 `WouldBlock` 或预算用尽为止；少读而不报满额会导致剩余数据
//!   等到下一次边沿才被处理。

use std::{collections::BTreeMap, fmt, io, sync::Arc, time::Duration};

use mio::{Events, Interest, Poll, Registry, Token, Waker, unix::SourceFd};
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::{
    config::{SelectorConfig, SelectorKind},
    error::{HandlerFailure, MuxError, Result},
    multiplexor::{HandlerRef, OpFlags},
    observability::targets,
};

use super::{
    FailureHook, Selector, SelectorFactory,
    dispatch::{self, FailureReporter},
    table::{HandlerTable, Transition},
};

const WAKE_TOKEN: Token = Token(0);

fn mio_interest(ops: OpFlags) -> Option<Interest> {
    match (ops.contains(OpFlags::READ), ops.contains(OpFlags::WRITE)) {
        (true, true) => Some(Interest::READABLE | Interest::WRITABLE),
        (true, false) => Some(Interest::READABLE),
        (false, true) => Some(Interest::WRITABLE),
        (false, false) => None,
    }
}

/// 把一次兴趣变更同步到内核。
fn sync_source(registry: &Registry, transition: &Transition<'_>) -> io::Result<()> {
    let Some(fd) = transition.handler.channel().raw_fd() else {
        return Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "handler exposes no file descriptor",
        ));
    };
    let token = Token(transition.token);
    let mut source = SourceFd(&fd);
    match (
        mio_interest(transition.before),
        mio_interest(transition.after),
    ) {
        (None, Some(interest)) => registry.register(&mut source, token, interest),
        (Some(_), Some(interest)) => registry.reregister(&mut source, token, interest),
        (Some(_), None) => registry.deregister(&mut source),
        (None, None) => Ok(()),
    }
}

/// 只由 `poll` 线程触碰的状态。
struct PollDriver {
    poll: Poll,
    events: Events,
    carry: BTreeMap<usize, OpFlags>,
}

/// 就绪驱动选择器。
pub struct ReadinessSelector {
    table: HandlerTable,
    registry: Registry,
    waker: Waker,
    driver: Mutex<PollDriver>,
    config: SelectorConfig,
    reporter: FailureReporter,
}

impl ReadinessSelector {
    pub fn new(config: SelectorConfig) -> Result<Self> {
        Self::with_hook(config, None)
    }

    fn with_hook(config: SelectorConfig, hook: Option<FailureHook>) -> Result<Self> {
        let poll = Poll::new().map_err(|err| MuxError::io("create poll", err))?;
        let registry = poll
            .registry()
            .try_clone()
            .map_err(|err| MuxError::io("clone poll registry", err))?;
        let waker = Waker::new(poll.registry(), WAKE_TOKEN)
            .map_err(|err| MuxError::io("create poll waker", err))?;
        Ok(Self {
            table: HandlerTable::new(WAKE_TOKEN.0 + 1),
            registry,
            waker,
            driver: Mutex::new(PollDriver {
                poll,
                events: Events::with_capacity(config.events_capacity),
                carry: BTreeMap::new(),
            }),
            config,
            reporter: FailureReporter::new(hook),
        })
    }

    fn sync(&self, transition: &Transition<'_>) -> io::Result<()> {
        sync_source(&self.registry, transition)
    }

    fn wake(&self) {
        if let Err(err) = self.waker.wake() {
            debug!(target: targets::SELECTOR, error = %err, "poll waker failed");
        }
    }

    fn isolate(&self, handler: &HandlerRef, failure: &HandlerFailure) {
        self.table.remove_all(handler, |t| self.sync(t));
        self.reporter.report(failure);
    }
}

impl Selector for ReadinessSelector {
    fn register(&self, handler: HandlerRef, ops: OpFlags) -> Result<()> {
        if self.table.is_destroyed() {
            return Err(MuxError::SelectorDestroyed);
        }
        if handler.channel().raw_fd().is_none() {
            return Err(MuxError::UnsupportedHandler {
                channel: handler.channel().id(),
            });
        }
        let added = self.table.add(&handler, ops, |t| self.sync(t))?;
        debug!(
            target: targets::SELECTOR,
            channel = %handler.channel().id(),
            token = ?added.token,
            ops = ?added.after,
            queued = ?added.queued,
            "handler registered"
        );
        if !added.queued.is_empty() {
            self.wake();
        }
        Ok(())
    }

    fn deregister(&self, handler: &HandlerRef, ops: OpFlags) -> bool {
        self.table.remove(handler, ops, |t| self.sync(t))
    }

    fn is_ready(&self) -> bool {
        !self.table.is_destroyed() && !self.table.load().is_empty()
    }

    fn poll(&self, timeout: Duration) -> Result<bool> {
        let mut driver = self.driver.lock();
        let PollDriver {
            poll,
            events,
            carry,
        } = &mut *driver;
        if self.table.is_destroyed() {
            return Ok(false);
        }

        let wait = if carry.is_empty() && !self.table.has_pending() {
            timeout
        } else {
            Duration::ZERO
        };
        match poll.poll(events, Some(wait)) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::Interrupted => events.clear(),
            Err(err) => return Err(MuxError::io("poll readiness", err)),
        }
        if self.table.is_destroyed() {
            return Ok(false);
        }

        dispatch::run_one_shots(&self.table, &self.reporter, |t| self.sync(t));

        let mut ready = std::mem::take(carry);
        for event in events.iter() {
            if event.token() == WAKE_TOKEN {
                continue;
            }
            let mut ops = OpFlags::NONE;
            if event.is_readable() || event.is_read_closed() || event.is_error() {
                ops |= OpFlags::READ;
            }
            if event.is_writable() || event.is_write_closed() || event.is_error() {
                ops |= OpFlags::WRITE;
            }
            *ready.entry(event.token().0).or_default() |= ops;
        }

        let sets = self.table.load();
        let budget = self.config.io_budget;
        let mut moved = 0;
        for (token, ops) in ready {
            let Some(entry) = sets.by_token(token) else {
                continue;
            };
            let ops = ops.intersection(entry.ops);
            if ops.contains(OpFlags::READ) {
                match dispatch::invoke(&entry.handler, OpFlags::READ, |h| h.do_read(budget)) {
                    Ok(bytes) => {
                        moved += bytes;
                        if bytes >= budget {
                            *carry.entry(token).or_default() |= OpFlags::READ;
                        }
                    }
                    Err(failure) => {
                        self.isolate(&entry.handler, &failure);
                        continue;
                    }
                }
            }
            if ops.contains(OpFlags::WRITE) {
                match dispatch::invoke(&entry.handler, OpFlags::WRITE, |h| h.do_write(budget)) {
                    Ok(bytes) => {
                        moved += bytes;
                        if bytes >= budget {
                            *carry.entry(token).or_default() |= OpFlags::WRITE;
                        }
                    }
                    Err(failure) => self.isolate(&entry.handler, &failure),
                }
            }
        }
        trace!(
            target: targets::SELECTOR,
            events = events.iter().count(),
            carried = carry.len(),
            moved,
            "readiness cycle"
        );
        Ok(moved > 0)
    }

    fn wakeup(&self) {
        self.wake();
    }

    fn destroy(&self) {
        if let Some(cleared) = self.table.destroy() {
            for entry in cleared.entries() {
                let Some(fd) = entry.handler.channel().raw_fd() else {
                    continue;
                };
                if let Err(err) = self.registry.deregister(&mut SourceFd(&fd)) {
                    debug!(
                        target: targets::SELECTOR,
                        token = entry.token,
                        error = %err,
                        "kernel deregistration during destroy failed"
                    );
                }
            }
            debug!(
                target: targets::SELECTOR,
                released = cleared.len(),
                "readiness selector destroyed"
            );
        }
        self.wake();
    }

    fn is_destroyed(&self) -> bool {
        self.table.is_destroyed()
    }
}

impl fmt::Debug for ReadinessSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadinessSelector")
            .field("handlers", &self.table.load().len())
            .field("destroyed", &self.table.is_destroyed())
            .field("io_budget", &self.config.io_budget)
            .finish()
    }
}

/// [`ReadinessSelector`] 的工厂；每个选择器拥有独立的内核轮询实例。
#[derive(Clone)]
pub struct ReadinessSelectorFactory {
    config: SelectorConfig,
    hook: Option<FailureHook>,
}

impl ReadinessSelectorFactory {
    pub fn new(config: SelectorConfig) -> Self {
        Self { config, hook: None }
    }

    /// 为创建的每个选择器安装失败钩子。
    pub fn with_failure_hook(self, hook: FailureHook) -> Self {
        self.with_failure_hook_opt(Some(hook))
    }

    pub(crate) fn with_failure_hook_opt(mut self, hook: Option<FailureHook>) -> Self {
        self.hook = hook;
        self
    }
}

impl SelectorFactory for ReadinessSelectorFactory {
    fn kind(&self) -> SelectorKind {
        SelectorKind::Readiness
    }

    fn new_selector(&self) -> Result<Arc<dyn Selector>> {
        Ok(Arc::new(ReadinessSelector::with_hook(
            self.config.clone(),
            self.hook.clone(),
        )?))
    }
}

impl fmt::Debug for ReadinessSelectorFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadinessSelectorFactory")
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
        io::{Read, Write},
        os::{
            fd::{AsRawFd, RawFd},
            unix::net::UnixStream,
        },
        sync::atomic::{AtomicUsize, Ordering},
        thread,
        time::Instant,
    };

    struct Memory;

    impl Channel for Memory {
        fn id(&self) -> ChannelId {
            ChannelId::new(1)
        }
    }

    impl Handler for Memory {
        fn channel(&self) -> &dyn Channel {
            self
        }

        fn do_read(&self, _budget: usize) -> io::Result<usize> {
            Ok(0)
        }

        fn do_write(&self, _budget: usize) -> io::Result<usize> {
            Ok(0)
        }
    }

    /// 每次只读 `chunk` 字节的 Handler，用于观察延续集合。
    struct Draining {
        stream: UnixStream,
        chunk: usize,
        reads: AtomicUsize,
    }

    impl Channel for Draining {
        fn id(&self) -> ChannelId {
            ChannelId::new(2)
        }

        fn raw_fd(&self) -> Option<RawFd> {
            Some(self.stream.as_raw_fd())
        }
    }

    impl Handler for Draining {
        fn channel(&self) -> &dyn Channel {
            self
        }

        fn do_read(&self, budget: usize) -> io::Result<usize> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            let mut buf = vec![0; self.chunk.min(budget)];
            (&self.stream).read(&mut buf)
        }

        fn do_write(&self, _budget: usize) -> io::Result<usize> {
            Ok(0)
        }
    }

    fn selector(io_budget: usize) -> ReadinessSelector {
        ReadinessSelector::new(SelectorConfig::default().with_io_budget(io_budget)).unwrap()
    }

    #[test]
    fn handlers_without_descriptor_are_rejected() {
        let selector = selector(64);
        let err = selector
            .register(Arc::new(Memory), OpFlags::READ)
            .unwrap_err();
        assert_eq!(err.code(), "spark.mux.unsupported_handler");
        assert!(!selector.is_ready());
    }

    #[test]
    fn destroyed_selector_reports_destruction_before_handler_kind() {
        let selector = selector(64);
        selector.destroy();
        let err = selector
            .register(Arc::new(Memory), OpFlags::READ)
            .unwrap_err();
        assert!(matches!(err, MuxError::SelectorDestroyed), "实际错误: {err}");
    }

    #[test]
    fn wakeup_releases_a_blocked_poll() {
        let selector = Arc::new(selector(64));
        let poller = {
            let selector = Arc::clone(&selector);
            thread::spawn(move || {
                let started = Instant::now();
                let moved = selector.poll(Duration::from_secs(10)).unwrap();
                (moved, started.elapsed())
            })
        };
        thread::sleep(Duration::from_millis(30));
        selector.wakeup();
        let (moved, elapsed) = poller.join().expect("poll 线程不应 panic");
        assert!(!moved);
        assert!(elapsed < Duration::from_secs(5));
    }

    #[test]
    fn full_budget_reads_are_carried_into_the_next_cycle() {
        let (local, mut remote) = UnixStream::pair().unwrap();
        local.set_nonblocking(true).unwrap();
        let draining = Arc::new(Draining {
            stream: local,
            chunk: 4,
            reads: AtomicUsize::new(0),
        });
        let selector = selector(4);
        selector.register(draining.clone(), OpFlags::READ).unwrap();
        remote.write_all(b"12345678").unwrap();

        assert!(selector.poll(Duration::from_secs(1)).unwrap());
        // 边沿只触发一次；第二批 4 字节依赖延续集合才能被读到。
        assert!(selector.poll(Duration::from_secs(1)).unwrap());
        assert_eq!(draining.reads.load(Ordering::SeqCst), 2);
    }
}
