use std::{
    fmt, io,
    net::SocketAddr,
    sync::{
        Arc, Weak,
        atomic::{AtomicBool, Ordering},
    },
};

use mio::net::TcpListener;
use socket2::{Domain, Protocol, Socket, Type};
use spark_mux::{
    Channel, ChannelId, Endpoint, EndpointRole, Handler, HandlerRef, MuxError, OpFlags, Result,
    Selector, Session, SessionCallback, SessionId, Uri,
};
use tracing::{debug, warn};

use crate::{
    LOG_TARGET,
    config::TcpConfig,
    error::{self, map_io_error},
    stream::TcpStreamSession,
};

/// 监听会话：每轮接入若干连接，并把它们作为新会话交给 `on_accept`。
///
/// # 教案式注释
///
/// ## 逻辑 (How)
/// - 套接字经 `socket2` 创建：开启地址复用、绑定、按配置的积压长度监听，再转换为非阻塞的
///   `mio` 监听器；
/// - 读就绪时最多接入 `max_accepts_per_cycle` 条连接；达到上限说明队列里可能还有连接，
///   此时重新登记 `READ`，让内核在下一轮再次报告就绪；
/// - 接入操作不搬运业务字节，回调总是返回 0。
///
/// ## 契约 (What)
/// - 监听会话不能发送数据，`send` 返回 [`MuxError::UnsupportedOperation`]；
/// - 单条连接的接入失败只通过 `on_error` 报告，不会关闭监听会话。
pub struct TcpAcceptorSession {
    id: SessionId,
    channel: ChannelId,
    endpoint: Endpoint,
    listener: TcpListener,
    local_addr: SocketAddr,
    selector: Weak<dyn Selector>,
    me: Weak<TcpAcceptorSession>,
    callback: SessionCallback,
    config: TcpConfig,
    open: AtomicBool,
    closed: AtomicBool,
}

impl TcpAcceptorSession {
    pub(crate) fn bind(
        endpoint: Endpoint,
        addr: SocketAddr,
        selector: &Arc<dyn Selector>,
        callback: SessionCallback,
        config: TcpConfig,
    ) -> Result<Arc<Self>> {
        let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))
            .map_err(|err| map_io_error(error::BIND, err))?;
        socket
            .set_reuse_address(true)
            .map_err(|err| map_io_error(error::CONFIGURE, err))?;
        socket
            .bind(&addr.into())
            .map_err(|err| map_io_error(error::BIND, err))?;
        socket
            .listen(config.backlog)
            .map_err(|err| map_io_error(error::BIND, err))?;
        socket
            .set_nonblocking(true)
            .map_err(|err| map_io_error(error::CONFIGURE, err))?;
        let listener = TcpListener::from_std(socket.into());
        let local_addr = listener
            .local_addr()
            .map_err(|err| map_io_error(error::BIND, err))?;

        let id = SessionId::next();
        let session = Arc::new_cyclic(|me| Self {
            id,
            channel: ChannelId::new(id.get()),
            endpoint,
            listener,
            local_addr,
            selector: Arc::downgrade(selector),
            me: me.clone(),
            callback,
            config,
            open: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        });
        session.arm(OpFlags::OPEN | OpFlags::READ)?;
        debug!(
            target: LOG_TARGET,
            session = %session.id,
            local = %local_addr,
            backlog = session.config.backlog,
            "tcp acceptor listening"
        );
        Ok(session)
    }

    fn arm(&self, ops: OpFlags) -> Result<()> {
        let selector = self.selector.upgrade().ok_or(MuxError::SelectorDestroyed)?;
        let handler = self
            .me
            .upgrade()
            .map(|me| me as HandlerRef)
            .ok_or(MuxError::SessionClosed { session: self.id })?;
        selector.register(handler, ops)
    }

    fn accept_one(&self, stream: mio::net::TcpStream, peer: SocketAddr) -> Result<()> {
        let uri = Uri::parse(&format!("tcp://{peer}"))?;
        let endpoint = Endpoint::from_uri(EndpointRole::Connector, uri);
        let selector = self.selector.upgrade().ok_or(MuxError::SelectorDestroyed)?;
        let session = TcpStreamSession::start(
            stream,
            endpoint,
            &selector,
            Arc::clone(&self.callback),
            &self.config,
            false,
        )?;
        debug!(target: LOG_TARGET, acceptor = %self.id, %peer, "tcp connection accepted");
        self.callback.on_accept(self, session);
        Ok(())
    }
}

impl Session for TcpAcceptorSession {
    fn id(&self) -> SessionId {
        self.id
    }

    fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire) && !self.closed.load(Ordering::Acquire)
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        Some(self.local_addr)
    }

    fn send(&self, _data: &[u8]) -> Result<usize> {
        Err(MuxError::UnsupportedOperation {
            operation: "send",
            subject: format!("tcp acceptor {}", self.local_addr),
        })
    }

    fn close(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Ok(());
        }
        self.arm(OpFlags::CLOSE)
    }
}

impl Channel for TcpAcceptorSession {
    fn id(&self) -> ChannelId {
        self.channel
    }

    #[cfg(unix)]
    fn raw_fd(&self) -> Option<std::os::fd::RawFd> {
        use std::os::fd::AsRawFd;
        Some(self.listener.as_raw_fd())
    }
}

impl Handler for TcpAcceptorSession {
    fn channel(&self) -> &dyn Channel {
        self
    }

    fn do_open(&self) -> io::Result<()> {
        if !self.open.swap(true, Ordering::AcqRel) {
            self.callback.on_open(self);
        }
        Ok(())
    }

    fn do_read(&self, _budget: usize) -> io::Result<usize> {
        let mut accepted = 0;
        while accepted < self.config.max_accepts_per_cycle {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    accepted += 1;
                    if let Err(err) = self.accept_one(stream, peer) {
                        warn!(
                            target: LOG_TARGET,
                            acceptor = %self.id,
                            %peer,
                            code = err.code(),
                            error = %err,
                            "accepted connection could not be started"
                        );
                        self.callback.on_error(self, &err);
                    }
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => return Ok(0),
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    let err = map_io_error(error::ACCEPT, err);
                    self.callback.on_error(self, &err);
                    return Ok(0);
                }
            }
        }
        if let Err(err) = self.arm(OpFlags::READ) {
            debug!(target: LOG_TARGET, acceptor = %self.id, error = %err, "acceptor re-arm failed");
        }
        Ok(0)
    }

    fn do_write(&self, _budget: usize) -> io::Result<usize> {
        Ok(0)
    }

    fn do_close(&self) -> io::Result<()> {
        if !self.closed.swap(true, Ordering::AcqRel) {
            debug!(target: LOG_TARGET, acceptor = %self.id, "tcp acceptor closed");
            self.callback.on_close(self);
        }
        Ok(())
    }
}

impl fmt::Debug for TcpAcceptorSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TcpAcceptorSession")
            .field("id", &self.id)
            .field("local_addr", &self.local_addr)
            .field("open", &self.is_open())
            .finish()
    }
}
