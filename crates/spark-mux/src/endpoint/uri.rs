use core::{fmt, str::FromStr};
use std::sync::OnceLock;

use regex::Regex;

use crate::error::{MuxError, Result};

/// 端口缺省时对外暴露的哨兵值。
pub const PORT_UNSET: i32 = -1;

/// `scheme:[//authority][path][?query][#fragment]` 的一次性匹配。
///
/// scheme 必须以字母开头；authority 之后的各段互不重叠，因此任何不含空白与控制字符的输入
/// 都能在顶层匹配，真正的拒绝发生在 authority 细分阶段。
const URI_PATTERN: &str =
    r"^(?:([A-Za-z][A-Za-z0-9+.\-]*):)?(?://([^/?#]*))?([^?#]*)(?:\?([^#]*))?(?:#(.*))?$";

/// `[userinfo@]host[:port]`，host 可以是方括号包裹的 IPv6 字面量。
const AUTHORITY_PATTERN: &str = r"^(?:([^@]*)@)?(\[[0-9A-Fa-f:.]+\]|[^:@\[\]]*)(?::([0-9]*))?$";

fn uri_regex() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(URI_PATTERN).expect("URI pattern is a valid regex"))
}

fn authority_regex() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(AUTHORITY_PATTERN).expect("authority pattern is a valid regex")
    })
}

/// 解析后的 URI。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 端点可能携带非规范化的用户输入（大小写、冗余分隔符），`Display` 必须原样返回输入，
///   以免日志与诊断里出现“看起来不同”的地址；因此这里保留原文，而不是重新序列化各字段。
///
/// ## 契约（What）
/// - `scheme` 可选，若存在则位于第一个 `:` 之前；
/// - `host`/`port`/`userinfo` 仅在解析到 `//authority` 段时存在；
/// - `port` 仅在 authority 中出现数字串时存在，对外可通过 [`Uri::port_or_unset`] 得到 `-1` 哨兵；
/// - 解析失败是构造期的致命错误（[`MuxError::InvalidEndpoint`]），不存在“半解析”的 URI。
///
/// ## 风险提示（Trade-offs）
/// - 不做百分号解码与大小写折叠；比较两个端点是否“语义相同”需要调用方自行规范化。
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Uri {
    input: String,
    scheme: Option<String>,
    authority: Option<String>,
    userinfo: Option<String>,
    host: Option<String>,
    port: Option<u16>,
    path: String,
    query: Option<String>,
    fragment: Option<String>,
}

impl Uri {
    /// 按 URI 语法解析输入。
    pub fn parse(input: &str) -> Result<Self> {
        if input.is_empty() {
            return Err(MuxError::invalid_endpoint(input, "empty input"));
        }
        if input.chars().any(|c| c.is_whitespace() || c.is_control()) {
            return Err(MuxError::invalid_endpoint(
                input,
                "whitespace or control character",
            ));
        }

        let captures = uri_regex()
            .captures(input)
            .ok_or_else(|| MuxError::invalid_endpoint(input, "does not match URI grammar"))?;
        let group = |index: usize| captures.get(index).map(|m| m.as_str().to_owned());

        let scheme = group(1);
        let authority = group(2);
        let path = group(3).unwrap_or_default();
        let query = group(4);
        let fragment = group(5);

        if scheme.is_none() && authority.is_none() && path.is_empty() {
            return Err(MuxError::invalid_endpoint(input, "no scheme, authority or path"));
        }

        let (userinfo, host, port) = match authority.as_deref() {
            Some(authority) => parse_authority(input, authority)?,
            None => (None, None, None),
        };

        Ok(Self {
            input: input.to_owned(),
            scheme,
            authority,
            userinfo,
            host,
            port,
            path,
            query,
            fragment,
        })
    }

    pub fn scheme(&self) -> Option<&str> {
        self.scheme.as_deref()
    }

    /// 原始 authority 段（不含 `//`）。
    pub fn authority(&self) -> Option<&str> {
        self.authority.as_deref()
    }

    pub fn userinfo(&self) -> Option<&str> {
        self.userinfo.as_deref()
    }

    /// 主机；IPv6 字面量保留方括号。
    pub fn host(&self) -> Option<&str> {
        self.host.as_deref()
    }

    pub fn port(&self) -> Option<u16> {
        self.port
    }

    /// 端口或 [`PORT_UNSET`]。
    pub fn port_or_unset(&self) -> i32 {
        self.port.map_or(PORT_UNSET, i32::from)
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn query(&self) -> Option<&str> {
        self.query.as_deref()
    }

    pub fn fragment(&self) -> Option<&str> {
        self.fragment.as_deref()
    }

    /// 原始输入。
    pub fn as_str(&self) -> &str {
        &self.input
    }
}

fn parse_authority(
    input: &str,
    authority: &str,
) -> Result<(Option<String>, Option<String>, Option<u16>)> {
    let captures = authority_regex()
        .captures(authority)
        .ok_or_else(|| MuxError::invalid_endpoint(input, "malformed authority"))?;
    let userinfo = captures.get(1).map(|m| m.as_str().to_owned());
    let host = captures.get(2).map(|m| m.as_str().to_owned());
    let port = match captures.get(3).map(|m| m.as_str()) {
        None | Some("") => None,
        Some(digits) => Some(
            digits
                .parse::<u16>()
                .map_err(|_| MuxError::invalid_endpoint(input, "port out of range"))?,
        ),
    };
    Ok((userinfo, host, port))
}

impl FromStr for Uri {
    type Err = MuxError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for Uri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.input)
    }
}

impl fmt::Debug for Uri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Uri")
            .field("input", &self.input)
            .field("scheme", &self.scheme)
            .field("host", &self.host)
            .field("port", &self.port_or_unset())
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}
