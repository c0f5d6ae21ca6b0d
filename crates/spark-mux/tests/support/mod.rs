//! 集成测试共用的 Handler 替身。
//!
//! `PairHandler` 包装一端非阻塞 `UnixStream`，另一端交给测试用例扮演对端；
//! 回调计数与收发缓冲全部公开，便于断言引擎调度了哪些操作。

#![allow(dead_code)]

use std::{
    io::{self, Read, Write},
    os::{
        fd::{AsRawFd, RawFd},
        unix::net::UnixStream,
    },
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
};

use parking_lot::Mutex;
use spark_mux::{
    Channel, ChannelId, FailureHook, Handler, HandlerFailure, SelectorConfig, SelectorKind,
    selector::factory_for,
};

pub struct PairHandler {
    id: ChannelId,
    stream: UnixStream,
    pub fail_reads: AtomicBool,
    pub opens: AtomicUsize,
    pub reads: AtomicUsize,
    pub writes: AtomicUsize,
    pub closes: AtomicUsize,
    pub received: Mutex<Vec<u8>>,
    pub outbound: Mutex<Vec<u8>>,
}

impl PairHandler {
    /// 返回 Handler 与测试持有的对端。
    pub fn pair(id: u64) -> (Arc<Self>, UnixStream) {
        let (local, remote) = UnixStream::pair().expect("创建 socketpair");
        local.set_nonblocking(true).expect("设置非阻塞");
        let handler = Arc::new(Self {
            id: ChannelId::new(id),
            stream: local,
            fail_reads: AtomicBool::new(false),
            opens: AtomicUsize::new(0),
            reads: AtomicUsize::new(0),
            writes: AtomicUsize::new(0),
            closes: AtomicUsize::new(0),
            received: Mutex::new(Vec::new()),
            outbound: Mutex::new(Vec::new()),
        });
        (handler, remote)
    }

    pub fn queue(&self, data: &[u8]) {
        self.outbound.lock().extend_from_slice(data);
    }

    pub fn count(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

impl Channel for PairHandler {
    fn id(&self) -> ChannelId {
        self.id
    }

    fn raw_fd(&self) -> Option<RawFd> {
        Some(self.stream.as_raw_fd())
    }
}

impl Handler for PairHandler {
    fn channel(&self) -> &dyn Channel {
        self
    }

    fn do_open(&self) -> io::Result<()> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn do_read(&self, budget: usize) -> io::Result<usize> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(io::ErrorKind::ConnectionReset.into());
        }
        let mut buf = vec![0; budget];
        let n = (&self.stream).read(&mut buf)?;
        self.received.lock().extend_from_slice(&buf[..n]);
        Ok(n)
    }

    fn do_write(&self, budget: usize) -> io::Result<usize> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        let mut outbound = self.outbound.lock();
        if outbound.is_empty() {
            return Ok(0);
        }
        let len = outbound.len().min(budget);
        let n = (&self.stream).write(&outbound[..len])?;
        outbound.drain(..n);
        Ok(n)
    }

    fn do_close(&self) -> io::Result<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// 记录失败通道编号的钩子。
pub fn recording_hook() -> (FailureHook, Arc<Mutex<Vec<ChannelId>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let hook: FailureHook = Arc::new(move |failure: &HandlerFailure| {
        sink.lock().push(failure.channel);
    });
    (hook, seen)
}

/// 两种引擎各建一个选择器。
pub fn engines(
    hook: Option<FailureHook>,
) -> Vec<(SelectorKind, Arc<dyn spark_mux::Selector>)> {
    [SelectorKind::Readiness, SelectorKind::RoundRobin]
        .into_iter()
        .map(|kind| {
            let factory = factory_for(&SelectorConfig::with_kind(kind), hook.clone())
                .expect("构造工厂");
            (kind, factory.new_selector().expect("构造选择器"))
        })
        .collect()
}
