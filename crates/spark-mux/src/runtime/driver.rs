use std::{
    fmt, mem,
    sync::Arc,
    thread::{self, JoinHandle},
    time::Duration,
};

use parking_lot::Mutex;
use tracing::{debug, error, warn};

use crate::{
    config::DriverConfig,
    error::{MuxError, Result},
    observability::targets,
    selector::Selector,
};

use super::Cancellation;

/// 工作线程编号；在同一驱动内单调递增。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkerId(usize);

impl WorkerId {
    pub const fn get(self) -> usize {
        self.0
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "worker-{}", self.0)
    }
}

/// 工作线程退出时的统计。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WorkerReport {
    pub worker: WorkerId,
    /// 成功完成的 `poll` 轮数。
    pub cycles: u64,
    /// 其中搬运了字节的轮数。
    pub active_cycles: u64,
    /// `poll` 返回错误的次数。
    pub errors: u64,
}

impl WorkerReport {
    fn new(worker: WorkerId) -> Self {
        Self {
            worker,
            cycles: 0,
            active_cycles: 0,
            errors: 0,
        }
    }
}

struct Worker {
    id: WorkerId,
    selector: Arc<dyn Selector>,
    handle: JoinHandle<WorkerReport>,
}

#[derive(Default)]
struct DriverState {
    next_id: usize,
    workers: Vec<Worker>,
}

/// 以专用线程驱动选择器的运行时。
///
/// # 教案式注释
///
/// ## 意图 (Why)
/// - 选择器只定义“一轮”的语义，谁来反复调用 `poll` 由宿主决定；该类型提供开箱即用的宿主：
///   每个选择器一个命名线程，统一取消、统一回收。
///
/// ## 逻辑 (How)
/// - 工作线程循环 `poll(poll_timeout)`，每轮之间检查共享的 [`Cancellation`]；
/// - 连续失败达到 `max_consecutive_errors` 后线程自行退出，避免对坏掉的内核实例空转；
/// - [`SelectorDriver::shutdown`] 先取消，再销毁每个选择器以唤醒阻塞中的 `poll`，最后逐个 join。
///
/// ## 契约 (What)
/// - 存活线程数不超过 `capacity`，超出返回 [`MuxError::CapacityExhausted`]；
/// - 关闭后再 `spawn` 返回 [`MuxError::DriverShutdown`]；
/// - `Drop` 时若尚未关闭，会执行一次 `shutdown`。
pub struct SelectorDriver {
    config: DriverConfig,
    cancellation: Cancellation,
    state: Mutex<DriverState>,
}

impl SelectorDriver {
    pub fn new(config: DriverConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            cancellation: Cancellation::new(),
            state: Mutex::new(DriverState::default()),
        })
    }

    /// 为 `selector` 启动一个工作线程。
    pub fn spawn(&self, selector: Arc<dyn Selector>) -> Result<WorkerId> {
        let mut state = self.state.lock();
        if self.cancellation.is_cancelled() {
            return Err(MuxError::DriverShutdown);
        }
        let live = state
            .workers
            .iter()
            .filter(|worker| !worker.handle.is_finished())
            .count();
        if live >= self.config.capacity {
            return Err(MuxError::CapacityExhausted {
                capacity: self.config.capacity,
            });
        }

        let id = WorkerId(state.next_id);
        let cancellation = self.cancellation.child();
        let timeout = self.config.poll_timeout();
        let max_errors = self.config.max_consecutive_errors;
        let worker_selector = Arc::clone(&selector);
        let handle = thread::Builder::new()
            .name(format!("{}-{}", self.config.thread_name, id.0))
            .spawn(move || run_worker(id, worker_selector, cancellation, timeout, max_errors))
            .map_err(|err| MuxError::io("spawn selector worker", err))?;
        state.next_id += 1;
        state.workers.push(Worker {
            id,
            selector,
            handle,
        });
        debug!(target: targets::DRIVER, worker = %id, "selector worker spawned");
        Ok(id)
    }

    /// 仍在运行的工作线程数。
    pub fn active(&self) -> usize {
        self.state
            .lock()
            .workers
            .iter()
            .filter(|worker| !worker.handle.is_finished())
            .count()
    }

    /// 与工作线程共享的取消令牌。
    pub fn cancellation(&self) -> Cancellation {
        self.cancellation.child()
    }

    pub fn is_shut_down(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// 取消、销毁全部选择器并回收线程；按启动顺序返回每个线程的统计。
    pub fn shutdown(&self) -> Vec<WorkerReport> {
        let workers = {
            let mut state = self.state.lock();
            self.cancellation.cancel();
            mem::take(&mut state.workers)
        };
        for worker in &workers {
            worker.selector.destroy();
        }
        let mut reports = Vec::with_capacity(workers.len());
        for worker in workers {
            match worker.handle.join() {
                Ok(report) => reports.push(report),
                Err(_) => error!(
                    target: targets::DRIVER,
                    worker = %worker.id,
                    "selector worker panicked"
                ),
            }
        }
        debug!(target: targets::DRIVER, workers = reports.len(), "selector driver shut down");
        reports
    }
}

impl Drop for SelectorDriver {
    fn drop(&mut self) {
        if !self.cancellation.is_cancelled() || !self.state.get_mut().workers.is_empty() {
            self.shutdown();
        }
    }
}

impl fmt::Debug for SelectorDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SelectorDriver")
            .field("config", &self.config)
            .field("active", &self.active())
            .field("shut_down", &self.is_shut_down())
            .finish()
    }
}

fn run_worker(
    id: WorkerId,
    selector: Arc<dyn Selector>,
    cancellation: Cancellation,
    timeout: Duration,
    max_errors: u32,
) -> WorkerReport {
    let mut report = WorkerReport::new(id);
    let mut consecutive = 0u32;
    debug!(target: targets::DRIVER, worker = %id, ?timeout, "selector worker started");
    while !cancellation.is_cancelled() && !selector.is_destroyed() {
        match selector.poll(timeout) {
            Ok(active) => {
                report.cycles += 1;
                if active {
                    report.active_cycles += 1;
                }
                consecutive = 0;
            }
            Err(MuxError::SelectorDestroyed) => break,
            Err(err) => {
                report.errors += 1;
                consecutive += 1;
                warn!(
                    target: targets::DRIVER,
                    worker = %id,
                    code = err.code(),
                    error = %err,
                    consecutive,
                    "selector poll failed"
                );
                if consecutive >= max_errors {
                    error!(
                        target: targets::DRIVER,
                        worker = %id,
                        "too many consecutive poll failures; worker exiting"
                    );
                    break;
                }
            }
        }
    }
    debug!(
        target: targets::DRIVER,
        worker = %id,
        cycles = report.cycles,
        active_cycles = report.active_cycles,
        errors = report.errors,
        "selector worker stopped"
    );
    report
}
