//! 端点模型：角色 + 原样保留的 URI。

mod uri;

use core::fmt;

pub use uri::{PORT_UNSET, Uri};

use crate::error::Result;

/// 端点角色。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EndpointRole {
    /// 监听端，等待对端接入。
    Acceptor,
    /// 主动建连端。
    Connector,
}

impl EndpointRole {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Acceptor => "acceptor",
            Self::Connector => "connector",
        }
    }
}

/// `Endpoint` 将网络地址与角色绑定为不可变值。
///
/// # 设计背景（Why）
/// - 会话提供者按 scheme、主机与角色决定是否接管一个端点，因此端点需要同时携带这两类信息；
/// - 每次建连尝试创建一个端点，路由完成后即可丢弃，不参与任何共享可变状态。
///
/// # 契约说明（What）
/// - 构造时完成全部解析，失败返回 [`MuxError::InvalidEndpoint`](crate::MuxError::InvalidEndpoint)；
/// - 纯解析，不触发任何网络 IO（包括 DNS）；
/// - `Display` 返回原始输入，不附带角色。
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Endpoint {
    uri: Uri,
    role: EndpointRole,
}

impl Endpoint {
    /// 解析输入并绑定角色。
    pub fn new(role: EndpointRole, input: &str) -> Result<Self> {
        Ok(Self::from_uri(role, Uri::parse(input)?))
    }

    /// 构建监听端点。
    pub fn acceptor(input: &str) -> Result<Self> {
        Self::new(EndpointRole::Acceptor, input)
    }

    /// 构建主动建连端点。
    pub fn connector(input: &str) -> Result<Self> {
        Self::new(EndpointRole::Connector, input)
    }

    /// 以已解析的 URI 构建端点。
    pub fn from_uri(role: EndpointRole, uri: Uri) -> Self {
        Self { uri, role }
    }

    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    pub fn role(&self) -> EndpointRole {
        self.role
    }

    pub fn is_acceptor(&self) -> bool {
        self.role == EndpointRole::Acceptor
    }

    pub fn scheme(&self) -> Option<&str> {
        self.uri.scheme()
    }

    pub fn host(&self) -> Option<&str> {
        self.uri.host()
    }

    pub fn port(&self) -> Option<u16> {
        self.uri.port()
    }

    /// scheme 按 ASCII 大小写不敏感比较。
    pub fn has_scheme(&self, scheme: &str) -> bool {
        self.uri
            .scheme()
            .is_some_and(|own| own.eq_ignore_ascii_case(scheme))
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.uri, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_is_carried_alongside_uri() {
        let listen = Endpoint::acceptor("tcp://0.0.0.0:7000").unwrap();
        let dial = Endpoint::connector("tcp://10.0.0.8:7000").unwrap();
        assert!(listen.is_acceptor());
        assert_eq!(dial.role(), EndpointRole::Connector);
        assert_eq!(dial.host(), Some("10.0.0.8"));
        assert_eq!(dial.port(), Some(7000));
    }

    #[test]
    fn scheme_match_ignores_ascii_case() {
        let endpoint = Endpoint::connector("TCP://host:1").unwrap();
        assert!(endpoint.has_scheme("tcp"));
        assert!(!endpoint.has_scheme("udp"));
        assert_eq!(endpoint.to_string(), "TCP://host:1");
    }

    #[test]
    fn invalid_input_fails_construction() {
        let err = Endpoint::connector("tcp://host:port").unwrap_err();
        assert_eq!(err.code(), "spark.mux.invalid_endpoint");
    }
}
