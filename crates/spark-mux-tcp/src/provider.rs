use std::{
    fmt,
    net::{SocketAddr, ToSocketAddrs},
    sync::Arc,
};

use spark_mux::{
    Connector, Endpoint, EndpointRole, MuxError, Result, Selector, Session, SessionCallback,
    SessionProvider,
};
use tracing::debug;

use crate::{
    LOG_TARGET, SCHEME,
    acceptor::TcpAcceptorSession,
    config::TcpConfig,
    error::{self, map_io_error},
    stream::TcpStreamSession,
};

/// `tcp://host:port` 的会话提供者。
///
/// - 监听端点绑定并监听该地址（端口 `0` 由内核分配，可通过 `Session::local_addr` 取回）；
/// - 建连端点发起非阻塞连接，握手在选择器线程上完成；
/// - 所有会话都登记到构造时给定的同一个选择器。
pub struct TcpSessionProvider {
    selector: Arc<dyn Selector>,
    config: TcpConfig,
}

impl TcpSessionProvider {
    pub fn new(selector: Arc<dyn Selector>, config: TcpConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { selector, config })
    }

    pub fn config(&self) -> &TcpConfig {
        &self.config
    }

    fn socket_addr(endpoint: &Endpoint) -> Result<SocketAddr> {
        let host = endpoint.host().unwrap_or_default();
        let host = host
            .strip_prefix('[')
            .and_then(|inner| inner.strip_suffix(']'))
            .unwrap_or(host);
        let port = endpoint.port().unwrap_or_default();
        let mut addrs = (host, port)
            .to_socket_addrs()
            .map_err(|err| map_io_error(error::RESOLVE, err))?;
        addrs.next().ok_or_else(|| MuxError::UnsupportedEndpoint {
            endpoint: endpoint.to_string(),
        })
    }
}

impl SessionProvider for TcpSessionProvider {
    fn name(&self) -> &str {
        SCHEME
    }

    fn supports(&self, endpoint: &Endpoint) -> bool {
        endpoint.has_scheme(SCHEME)
            && endpoint.host().is_some_and(|host| !host.is_empty())
            && endpoint.port().is_some()
    }

    fn new_session(
        &self,
        _connector: &Connector,
        callback: SessionCallback,
        endpoint: &Endpoint,
    ) -> Result<Arc<dyn Session>> {
        let addr = Self::socket_addr(endpoint)?;
        debug!(target: LOG_TARGET, endpoint = %endpoint, %addr, "tcp endpoint resolved");
        match endpoint.role() {
            EndpointRole::Acceptor => {
                let session: Arc<dyn Session> = TcpAcceptorSession::bind(
                    endpoint.clone(),
                    addr,
                    &self.selector,
                    callback,
                    self.config.clone(),
                )?;
                Ok(session)
            }
            EndpointRole::Connector => {
                let stream = mio::net::TcpStream::connect(addr)
                    .map_err(|err| map_io_error(error::CONNECT, err))?;
                let session: Arc<dyn Session> = TcpStreamSession::start(
                    stream,
                    endpoint.clone(),
                    &self.selector,
                    callback,
                    &self.config,
                    true,
                )?;
                Ok(session)
            }
        }
    }
}

impl fmt::Debug for TcpSessionProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TcpSessionProvider")
            .field("selector", &self.selector)
            .field("config", &self.config)
            .finish()
    }
}
