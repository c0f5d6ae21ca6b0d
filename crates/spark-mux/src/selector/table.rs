//! 写时复制的 Handler 登记表。
//!
//! # 教案级导览
//!
//! - **Why**：注册/注销可能来自任意线程，并与正在进行的 `poll` 并发；若让 `poll` 在遍历期间
//!   持有锁，注册线程会被一整轮回调阻塞。这里采用“锁内整体替换、锁外只读快照”的策略：
//!   写者在互斥区内复制当前集合、修改副本并原子发布，读者通过 `ArcSwap` 无锁取得快照。
//! - **What**：
//!   - 一轮 `poll` 只读取一份快照，注册要么整体可见，要么整体不可见；
//!   - 集合中的条目一定是“已为该操作注册且尚未注销”的 Handler；
//!   - `OPEN`/`CLOSE` 一次性操作排队在写者状态里，由 `poll` 线程统一取走执行；
//!   - 销毁后拒绝一切注册，并一次性清空集合与待执行队列。
//! - **How**：每次结构变更都调用调用方提供的 `sync` 闭包（就绪引擎用它同步内核登记），
//!   闭包与发布处于同一互斥区，保证内核视图与快照的变更顺序一致。

use std::{
    io,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use tracing::debug;

use crate::{
    error::{MuxError, Result},
    multiplexor::{HandlerRef, OpFlags, same_handler},
    observability::targets,
};

/// 一条登记：Handler 与其持续兴趣（仅 `READ`/`WRITE`）。
#[derive(Clone)]
pub(crate) struct Registration {
    pub(crate) token: usize,
    pub(crate) handler: HandlerRef,
    pub(crate) ops: OpFlags,
}

/// 不可变快照；条目按 token 升序排列。
#[derive(Clone, Default)]
pub(crate) struct HandlerSets {
    entries: Vec<Registration>,
}

impl HandlerSets {
    pub(crate) fn entries(&self) -> &[Registration] {
        &self.entries
    }

    /// 读兴趣集合。
    pub(crate) fn readers(&self) -> impl Iterator<Item = &Registration> {
        self.entries
            .iter()
            .filter(|entry| entry.ops.contains(OpFlags::READ))
    }

    /// 写兴趣集合。
    pub(crate) fn writers(&self) -> impl Iterator<Item = &Registration> {
        self.entries
            .iter()
            .filter(|entry| entry.ops.contains(OpFlags::WRITE))
    }

    pub(crate) fn by_token(&self, token: usize) -> Option<&Registration> {
        self.entries
            .binary_search_by_key(&token, |entry| entry.token)
            .ok()
            .map(|index| &self.entries[index])
    }

    pub(crate) fn find(&self, handler: &HandlerRef) -> Option<&Registration> {
        self.entries
            .iter()
            .find(|entry| same_handler(&entry.handler, handler))
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    /// 返回替换了 `token` 条目的新快照；`ops` 为空时移除该条目。
    fn with_entry(&self, token: usize, handler: &HandlerRef, ops: OpFlags) -> Self {
        let mut entries = self.entries.clone();
        match entries.binary_search_by_key(&token, |entry| entry.token) {
            Ok(index) if ops.is_empty() => {
                entries.remove(index);
            }
            Ok(index) => entries[index].ops = ops,
            Err(_) if ops.is_empty() => {}
            Err(index) => entries.insert(
                index,
                Registration {
                    token,
                    handler: Arc::clone(handler),
                    ops,
                },
            ),
        }
        Self { entries }
    }
}

/// 交给 `sync` 闭包的一次兴趣变更。
pub(crate) struct Transition<'a> {
    pub(crate) token: usize,
    pub(crate) handler: &'a HandlerRef,
    pub(crate) before: OpFlags,
    pub(crate) after: OpFlags,
}

/// 注册结果摘要。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Added {
    pub(crate) token: Option<usize>,
    pub(crate) before: OpFlags,
    pub(crate) after: OpFlags,
    pub(crate) queued: OpFlags,
}

struct WriterState {
    next_token: usize,
    pending: Vec<(HandlerRef, OpFlags)>,
}

pub(crate) struct HandlerTable {
    writer: Mutex<WriterState>,
    snapshot: ArcSwap<HandlerSets>,
    destroyed: AtomicBool,
}

impl HandlerTable {
    /// `first_token` 之前的 token 留给引擎自用（例如唤醒器）。
    pub(crate) fn new(first_token: usize) -> Self {
        Self {
            writer: Mutex::new(WriterState {
                next_token: first_token,
                pending: Vec::new(),
            }),
            snapshot: ArcSwap::from_pointee(HandlerSets::default()),
            destroyed: AtomicBool::new(false),
        }
    }

    /// 取得当前快照。
    pub(crate) fn load(&self) -> Arc<HandlerSets> {
        self.snapshot.load_full()
    }

    pub(crate) fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }

    pub(crate) fn has_pending(&self) -> bool {
        !self.writer.lock().pending.is_empty()
    }

    /// 为 Handler 增加操作。
    ///
    /// - 持续兴趣部分更新快照；即使兴趣未变化也会调用 `sync`，让引擎有机会重新武装就绪通知；
    /// - 一次性部分进入待执行队列，同一 Handler 的多次请求合并为一条；
    /// - `sync` 失败时快照保持不变。
    pub(crate) fn add<F>(&self, handler: &HandlerRef, ops: OpFlags, sync: F) -> Result<Added>
    where
        F: FnOnce(&Transition<'_>) -> io::Result<()>,
    {
        let mut state = self.writer.lock();
        if self.is_destroyed() {
            return Err(MuxError::SelectorDestroyed);
        }

        let current = self.snapshot.load_full();
        let existing = current.find(handler).map(|entry| (entry.token, entry.ops));
        let mut added = Added {
            token: existing.map(|(token, _)| token),
            before: existing.map_or(OpFlags::NONE, |(_, ops)| ops),
            after: existing.map_or(OpFlags::NONE, |(_, ops)| ops),
            queued: OpFlags::NONE,
        };

        if !ops.io().is_empty() {
            let token = added.token.unwrap_or(state.next_token);
            let transition = Transition {
                token,
                handler,
                before: added.before,
                after: added.before | ops.io(),
            };
            sync(&transition).map_err(|err| MuxError::io("register handler", err))?;
            if added.token.is_none() {
                state.next_token += 1;
            }
            if transition.after != transition.before {
                self.snapshot
                    .store(Arc::new(current.with_entry(token, handler, transition.after)));
            }
            added.token = Some(token);
            added.after = transition.after;
        }

        let one_shot = ops.one_shot();
        if !one_shot.is_empty() {
            match state
                .pending
                .iter_mut()
                .find(|(queued, _)| same_handler(queued, handler))
            {
                Some((_, queued_ops)) => *queued_ops |= one_shot,
                None => state.pending.push((Arc::clone(handler), one_shot)),
            }
            added.queued = one_shot;
        }
        Ok(added)
    }

    /// 为 Handler 移除操作；未登记的操作视为无操作。返回是否有任何变化。
    pub(crate) fn remove<F>(&self, handler: &HandlerRef, ops: OpFlags, sync: F) -> bool
    where
        F: FnOnce(&Transition<'_>) -> io::Result<()>,
    {
        let mut state = self.writer.lock();
        let mut changed = false;

        let one_shot = ops.one_shot();
        if !one_shot.is_empty() {
            for (queued, queued_ops) in state.pending.iter_mut() {
                if same_handler(queued, handler) && queued_ops.intersects(one_shot) {
                    *queued_ops = *queued_ops - one_shot;
                    changed = true;
                }
            }
            state.pending.retain(|(_, queued_ops)| !queued_ops.is_empty());
        }

        if ops.io().is_empty() {
            return changed;
        }
        let current = self.snapshot.load_full();
        let Some(entry) = current.find(handler) else {
            return changed;
        };
        let after = entry.ops - ops.io();
        if after == entry.ops {
            return changed;
        }
        let transition = Transition {
            token: entry.token,
            handler,
            before: entry.ops,
            after,
        };
        if let Err(err) = sync(&transition) {
            debug!(
                target: targets::SELECTOR,
                token = entry.token,
                error = %err,
                "kernel deregistration failed; dropping registration anyway"
            );
        }
        self.snapshot
            .store(Arc::new(current.with_entry(entry.token, handler, after)));
        true
    }

    /// 移除 Handler 的全部持续兴趣与待执行操作。
    pub(crate) fn remove_all<F>(&self, handler: &HandlerRef, sync: F) -> bool
    where
        F: FnOnce(&Transition<'_>) -> io::Result<()>,
    {
        self.remove(handler, OpFlags::ALL, sync)
    }

    /// 取走全部待执行的一次性操作。
    pub(crate) fn take_pending(&self) -> Vec<(HandlerRef, OpFlags)> {
        std::mem::take(&mut self.writer.lock().pending)
    }

    /// 标记销毁并清空；仅首次调用返回被清空的快照。
    pub(crate) fn destroy(&self) -> Option<Arc<HandlerSets>> {
        let mut state = self.writer.lock();
        if self.destroyed.swap(true, Ordering::AcqRel) {
            return None;
        }
        state.pending.clear();
        Some(self.snapshot.swap(Arc::new(HandlerSets::default())))
    }
}
