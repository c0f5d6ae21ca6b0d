//! 端点路由：把抽象端点交给第一个声明支持它的会话提供者。
//!
//! # 教案级导览
//!
//! ## 意图（Why）
//! - 上层只描述“连到哪里/在哪里监听”，具体协议（TCP、进程内管道……）由插件式的
//!   [`SessionProvider`] 决定；
//! - 提供者按注册顺序排列，顺序即优先级：特定协议的提供者放在兜底提供者之前即可覆盖它。
//!
//! ## 契约（What）
//! - [`Connector::new_session`] 线性扫描提供者列表，第一个 `supports` 返回 `true` 的提供者负责
//!   构建会话；没有任何匹配时返回 [`MuxError::UnsupportedEndpoint`]；
//! - 对固定的提供者顺序与端点，路由结果是确定的；
//! - 路由失败只影响本次调用，[`Connector`] 自身不保留任何可变状态。
//!
//! ## 风险提示（Trade-offs）
//! - 线性扫描意味着提供者应保持少量（每协议一个）；`supports` 必须是廉价的纯函数，
//!   不得触发网络 IO。

use std::{
    fmt,
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use tracing::debug;

use crate::{
    endpoint::Endpoint,
    error::{MuxError, Result},
    observability::targets,
};

/// 会话标识；进程内唯一。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u64);

impl SessionId {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// 分配一个进程内全新的标识。
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session#{}", self.0)
    }
}

/// 会话事件回调。
///
/// 全部方法都有空实现，使用方只覆盖关心的事件。回调在选择器的 `poll` 线程上执行，
/// 不应阻塞。
pub trait SessionListener: Send + Sync + 'static {
    /// 监听会话接入了一条新连接；`session` 已登记到选择器。
    fn on_accept(&self, listener: &dyn Session, session: Arc<dyn Session>) {
        let _ = (listener, session);
    }

    /// 会话完成打开，可以开始收发。
    fn on_open(&self, session: &dyn Session) {
        let _ = session;
    }

    /// 收到入站数据。
    fn on_data(&self, session: &dyn Session, data: &[u8]) {
        let _ = (session, data);
    }

    /// 会话已关闭；每个会话至多触发一次。
    fn on_close(&self, session: &dyn Session) {
        let _ = session;
    }

    /// 会话遇到错误，随后会被关闭。
    fn on_error(&self, session: &dyn Session, error: &MuxError) {
        let _ = (session, error);
    }
}

/// 共享的会话回调。
pub type SessionCallback = Arc<dyn SessionListener>;

/// 路由产出的会话。
pub trait Session: Send + Sync + 'static {
    fn id(&self) -> SessionId;

    fn endpoint(&self) -> &Endpoint;

    fn is_open(&self) -> bool;

    fn local_addr(&self) -> Option<SocketAddr> {
        None
    }

    /// 排队发送；返回接受的字节数。已关闭的会话返回 [`MuxError::SessionClosed`]。
    fn send(&self, data: &[u8]) -> Result<usize>;

    /// 请求关闭；幂等。
    fn close(&self) -> Result<()>;
}

/// 会话提供者：声明支持的端点，并为其构建会话。
pub trait SessionProvider: Send + Sync + 'static {
    /// 用于日志的提供者名称。
    fn name(&self) -> &str;

    /// 是否接管该端点；必须是无副作用的廉价判断。
    fn supports(&self, endpoint: &Endpoint) -> bool;

    /// 构建会话并把它接入选择器。
    fn new_session(
        &self,
        connector: &Connector,
        callback: SessionCallback,
        endpoint: &Endpoint,
    ) -> Result<Arc<dyn Session>>;
}

/// 有序的提供者集合。
#[derive(Clone, Default)]
pub struct Connector {
    providers: Vec<Arc<dyn SessionProvider>>,
}

impl Connector {
    /// 以给定顺序构造；顺序即匹配优先级。
    pub fn new(providers: Vec<Arc<dyn SessionProvider>>) -> Self {
        Self { providers }
    }

    pub fn builder() -> ConnectorBuilder {
        ConnectorBuilder::default()
    }

    pub fn providers(&self) -> &[Arc<dyn SessionProvider>] {
        &self.providers
    }

    /// 返回第一个支持 `endpoint` 的提供者。
    pub fn resolve(&self, endpoint: &Endpoint) -> Option<&Arc<dyn SessionProvider>> {
        self.providers
            .iter()
            .find(|provider| provider.supports(endpoint))
    }

    /// 为端点创建会话。
    pub fn new_session(
        &self,
        callback: SessionCallback,
        endpoint: &Endpoint,
    ) -> Result<Arc<dyn Session>> {
        let Some(provider) = self.resolve(endpoint) else {
            debug!(
                target: targets::CONNECTOR,
                endpoint = %endpoint,
                providers = self.providers.len(),
                "no provider supports endpoint"
            );
            return Err(MuxError::UnsupportedEndpoint {
                endpoint: endpoint.to_string(),
            });
        };
        debug!(
            target: targets::CONNECTOR,
            endpoint = %endpoint,
            role = endpoint.role().as_str(),
            provider = provider.name(),
            "endpoint resolved"
        );
        provider.new_session(self, callback, endpoint)
    }

    /// 解析 `uri` 为主动建连端点并创建会话。
    pub fn connect(&self, callback: SessionCallback, uri: &str) -> Result<Arc<dyn Session>> {
        self.new_session(callback, &Endpoint::connector(uri)?)
    }

    /// 解析 `uri` 为监听端点并创建会话。
    pub fn listen(&self, callback: SessionCallback, uri: &str) -> Result<Arc<dyn Session>> {
        self.new_session(callback, &Endpoint::acceptor(uri)?)
    }
}

impl fmt::Debug for Connector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.providers.iter().map(|provider| provider.name()))
            .finish()
    }
}

/// 按追加顺序收集提供者。
#[derive(Default)]
pub struct ConnectorBuilder {
    providers: Vec<Arc<dyn SessionProvider>>,
}

impl ConnectorBuilder {
    pub fn provider(mut self, provider: Arc<dyn SessionProvider>) -> Self {
        self.providers.push(provider);
        self
    }

    pub fn build(self) -> Connector {
        Connector::new(self.providers)
    }
}
