//! # spark-mux
//!
//! ## 定位与职责（Why）
//! - 提供可插拔的网络 I/O 多路复用核心：[`Connector`] 把抽象 [`Endpoint`] 路由到第一个支持它的
//!   [`SessionProvider`]，提供者构建 [`Session`] 并把其 [`Handler`] 登记到 [`Selector`]；
//! - 少量驱动线程反复调用 [`Selector::poll`]，只为就绪的 Handler 执行 `do_read`/`do_write`/
//!   `do_open`/`do_close`，而非每连接一个线程。
//!
//! ## 架构嵌入（Where）
//! - `endpoint`：URI 解析与端点角色；
//! - `connector`：会话、回调与提供者契约，以及按序路由；
//! - `multiplexor`：操作位掩码与 Handler/Channel 契约；
//! - `selector`：写时复制登记表、就绪引擎（`mio`）与轮询引擎、工厂；
//! - `runtime`：取消令牌、时钟与工作线程驱动；
//! - `config`/`error`/`observability`：TOML 配置、稳定错误码与 `tracing` 目标。
//!
//! ## 使用示例（How）
//! ```no_run
//! use std::sync::Arc;
//! use spark_mux::{MuxConfig, SelectorDriver, selector::factory_for};
//!
//! # fn main() -> spark_mux::Result<()> {
//! let config = MuxConfig::default();
//! let factory = factory_for(&config.selector, None)?;
//! let selector = factory.new_selector()?;
//! let driver = SelectorDriver::new(config.driver.clone())?;
//! driver.spawn(Arc::clone(&selector))?;
//! // ……通过提供者把会话登记到 `selector`……
//! driver.shutdown();
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod connector;
pub mod endpoint;
pub mod error;
pub mod multiplexor;
pub mod observability;
pub mod runtime;
pub mod selector;

pub use config::{DriverConfig, MuxConfig, SelectorConfig, SelectorKind};
pub use connector::{
    Connector, ConnectorBuilder, Session, SessionCallback, SessionId, SessionListener,
    SessionProvider,
};
pub use endpoint::{Endpoint, EndpointRole, PORT_UNSET, Uri};
pub use error::{FailureCause, HandlerFailure, MuxError, Result};
pub use multiplexor::{Channel, ChannelId, Handler, HandlerRef, OpFlags};
pub use runtime::{Cancellation, Clock, SelectorDriver, SystemClock, WorkerId, WorkerReport};
pub use selector::{FailureHook, Selector, SelectorFactory};
