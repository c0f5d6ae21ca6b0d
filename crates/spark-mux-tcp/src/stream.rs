//! 已建立（或正在建立）的 TCP 连接会话。
//!
//! # 教案级导览
//!
//! - **Why**：一条连接同时是会话（对上层暴露 `send`/`close`）、Handler（被选择器回调）与
//!   Channel（向引擎暴露描述符），三者共享同一份状态，因此由一个类型实现三个 trait。
//! - **What**：
//!   - `send` 只把字节追加到出站缓冲并登记 `WRITE`，真正的写发生在 `poll` 线程；
//!   - 出站缓冲写空后注销 `WRITE`，若此时会话正在关闭则登记 `CLOSE`；
//!   - 读到 EOF 或遇到套接字错误时登记 `CLOSE`，错误先经 `on_error` 交给回调；
//!   - `on_close` 至多触发一次。
//! - **How**：会话只持有选择器的弱引用（选择器经登记表强持有会话），通过 `Arc::new_cyclic`
//!   拿到指向自身的弱引用，以便在回调中重新登记自己。
//! - **Trade-offs**：出站缓冲无上限；需要背压的调用方应在 `send` 之外自行限流。

use std::{
    fmt,
    io::{self, Read, Write},
    net::{Shutdown, SocketAddr},
    sync::{
        Arc, Weak,
        atomic::{AtomicU8, Ordering},
    },
};

use bytes::{Buf, BytesMut};
use mio::net::TcpStream;
use parking_lot::Mutex;
use spark_mux::{
    Channel, ChannelId, Endpoint, Handler, HandlerRef, MuxError, OpFlags, Result, Selector,
    Session, SessionCallback, SessionId,
};
use tracing::debug;

use crate::{
    LOG_TARGET,
    config::TcpConfig,
    error::{self, map_io_error},
};

const OPENING: u8 = 0;
const OPEN: u8 = 1;
const CLOSING: u8 = 2;
const CLOSED: u8 = 3;

/// 一条 TCP 连接。
pub struct TcpStreamSession {
    id: SessionId,
    channel: ChannelId,
    endpoint: Endpoint,
    stream: TcpStream,
    selector: Weak<dyn Selector>,
    me: Weak<TcpStreamSession>,
    callback: SessionCallback,
    outbound: Mutex<BytesMut>,
    state: AtomicU8,
    read_chunk: usize,
}

impl TcpStreamSession {
    /// 接管一条套接字并登记到选择器。
    ///
    /// 已接入的连接登记 `OPEN | READ`；主动建连时额外登记 `WRITE`，以写就绪感知握手完成。
    pub(crate) fn start(
        stream: TcpStream,
        endpoint: Endpoint,
        selector: &Arc<dyn Selector>,
        callback: SessionCallback,
        config: &TcpConfig,
        connecting: bool,
    ) -> Result<Arc<Self>> {
        if config.nodelay {
            stream
                .set_nodelay(true)
                .map_err(|err| map_io_error(error::CONFIGURE, err))?;
        }
        let id = SessionId::next();
        let session = Arc::new_cyclic(|me| Self {
            id,
            channel: ChannelId::new(id.get()),
            endpoint,
            stream,
            selector: Arc::downgrade(selector),
            me: me.clone(),
            callback,
            outbound: Mutex::new(BytesMut::new()),
            state: AtomicU8::new(OPENING),
            read_chunk: config.read_chunk,
        });
        let mut ops = OpFlags::OPEN | OpFlags::READ;
        if connecting {
            ops |= OpFlags::WRITE;
        }
        session.arm(ops)?;
        debug!(
            target: LOG_TARGET,
            session = %session.id,
            endpoint = %session.endpoint,
            connecting,
            "tcp session started"
        );
        Ok(session)
    }

    fn handler(&self) -> Option<HandlerRef> {
        self.me.upgrade().map(|me| me as HandlerRef)
    }

    fn arm(&self, ops: OpFlags) -> Result<()> {
        let selector = self.selector.upgrade().ok_or(MuxError::SelectorDestroyed)?;
        let handler = self.handler().ok_or(MuxError::SessionClosed { session: self.id })?;
        selector.register(handler, ops)
    }

    fn disarm(&self, ops: OpFlags) {
        if let (Some(selector), Some(handler)) = (self.selector.upgrade(), self.handler()) {
            selector.deregister(&handler, ops);
        }
    }

    /// 进入关闭流程；返回是否由本次调用触发。
    fn begin_close(&self) -> bool {
        let mut current = self.state.load(Ordering::Acquire);
        while current < CLOSING {
            match self.state.compare_exchange(
                current,
                CLOSING,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
        false
    }

    /// 丢弃出站数据并尽快关闭（对端关闭或套接字错误时使用）。
    fn abort(&self) {
        self.begin_close();
        self.outbound.lock().clear();
        if let Err(err) = self.arm(OpFlags::CLOSE) {
            debug!(target: LOG_TARGET, session = %self.id, error = %err, "close registration failed");
            self.finish_close();
        }
    }

    fn fail(&self, kind: error::OperationKind, err: io::Error) {
        let err = map_io_error(kind, err);
        self.callback.on_error(self, &err);
        self.abort();
    }

    fn finish_close(&self) {
        if self.state.swap(CLOSED, Ordering::AcqRel) == CLOSED {
            return;
        }
        if let Err(err) = self.stream.shutdown(Shutdown::Both) {
            debug!(target: LOG_TARGET, session = %self.id, error = %err, "tcp shutdown failed");
        }
        debug!(target: LOG_TARGET, session = %self.id, "tcp session closed");
        self.callback.on_close(self);
    }
}

impl Session for TcpStreamSession {
    fn id(&self) -> SessionId {
        self.id
    }

    fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    fn is_open(&self) -> bool {
        self.state.load(Ordering::Acquire) == OPEN
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        self.stream.local_addr().ok()
    }

    fn send(&self, data: &[u8]) -> Result<usize> {
        let mut outbound = self.outbound.lock();
        if self.state.load(Ordering::Acquire) >= CLOSING {
            return Err(MuxError::SessionClosed { session: self.id });
        }
        outbound.extend_from_slice(data);
        self.arm(OpFlags::WRITE)?;
        Ok(data.len())
    }

    fn close(&self) -> Result<()> {
        let outbound = self.outbound.lock();
        if !self.begin_close() {
            return Ok(());
        }
        if outbound.is_empty() {
            self.arm(OpFlags::CLOSE)
        } else {
            self.arm(OpFlags::WRITE)
        }
    }
}

impl Channel for TcpStreamSession {
    fn id(&self) -> ChannelId {
        self.channel
    }

    #[cfg(unix)]
    fn raw_fd(&self) -> Option<std::os::fd::RawFd> {
        use std::os::fd::AsRawFd;
        Some(self.stream.as_raw_fd())
    }
}

impl Handler for TcpStreamSession {
    fn channel(&self) -> &dyn Channel {
        self
    }

    fn do_open(&self) -> io::Result<()> {
        if self
            .state
            .compare_exchange(OPENING, OPEN, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            self.callback.on_open(self);
        }
        Ok(())
    }

    fn do_read(&self, budget: usize) -> io::Result<usize> {
        let mut buf = vec![0u8; self.read_chunk.min(budget).max(1)];
        let mut total = 0;
        while total < budget {
            let want = buf.len().min(budget - total);
            match (&self.stream).read(&mut buf[..want]) {
                Ok(0) => {
                    debug!(target: LOG_TARGET, session = %self.id, "peer closed connection");
                    self.abort();
                    break;
                }
                Ok(n) => {
                    total += n;
                    self.callback.on_data(self, &buf[..n]);
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => break,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    let kind = if err.kind() == io::ErrorKind::ConnectionRefused {
                        error::CONNECT
                    } else {
                        error::READ
                    };
                    self.fail(kind, err);
                    break;
                }
            }
        }
        Ok(total)
    }

    fn do_write(&self, budget: usize) -> io::Result<usize> {
        if let Some(err) = self.stream.take_error()? {
            self.fail(error::CONNECT, err);
            return Ok(0);
        }
        let mut outbound = self.outbound.lock();
        let mut total = 0;
        while !outbound.is_empty() && total < budget {
            let len = outbound.len().min(budget - total);
            match (&self.stream).write(&outbound[..len]) {
                Ok(0) => {
                    drop(outbound);
                    self.fail(error::WRITE, io::ErrorKind::WriteZero.into());
                    return Ok(total);
                }
                Ok(n) => {
                    outbound.advance(n);
                    total += n;
                }
                Err(err)
                    if matches!(
                        err.kind(),
                        io::ErrorKind::WouldBlock | io::ErrorKind::NotConnected
                    ) =>
                {
                    return Ok(total);
                }
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    drop(outbound);
                    self.fail(error::WRITE, err);
                    return Ok(total);
                }
            }
        }
        if outbound.is_empty() {
            self.disarm(OpFlags::WRITE);
            if self.state.load(Ordering::Acquire) == CLOSING {
                if let Err(err) = self.arm(OpFlags::CLOSE) {
                    debug!(target: LOG_TARGET, session = %self.id, error = %err, "close registration failed");
                }
            }
        }
        Ok(total)
    }

    fn do_close(&self) -> io::Result<()> {
        self.finish_close();
        Ok(())
    }
}

impl fmt::Debug for TcpStreamSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TcpStreamSession")
            .field("id", &self.id)
            .field("endpoint", &self.endpoint)
            .field("state", &self.state.load(Ordering::Relaxed))
            .finish()
    }
}
