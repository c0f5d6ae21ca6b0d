//! # spark-mux-tcp
//!
//! ## 定位（Why）
//! - 为 `spark-mux` 的 [`Connector`](spark_mux::Connector) 提供 `tcp://` 会话提供者：
//!   监听端点生成 [`TcpAcceptorSession`]，建连端点生成 [`TcpStreamSession`]；
//! - 套接字全部是非阻塞的，读写只在选择器的 `poll` 线程上发生。
//!
//! ## 组成（What）
//! - `config`：[`TcpConfig`]，可嵌入宿主的 TOML 配置；
//! - `provider`：端点匹配与会话构建；
//! - `acceptor`/`stream`：两类会话，同时实现 `Session`、`Handler` 与 `Channel`；
//! - `error`：稳定错误码与 IO 错误映射。

mod acceptor;
mod config;
mod error;
mod provider;
mod stream;

pub use acceptor::TcpAcceptorSession;
pub use config::TcpConfig;
pub use provider::TcpSessionProvider;
pub use stream::TcpStreamSession;

/// 本提供者处理的 URI scheme。
pub const SCHEME: &str = "tcp";

pub(crate) const LOG_TARGET: &str = "spark_mux_tcp";
