//! 日志目标与 Subscriber 安装入口。
//!
//! # 教案式说明
//! - **意图（Why）**：本 crate 只通过 `tracing` 门面输出结构化事件；是否安装、如何过滤由宿主决定。
//!   为独立进程（如 `echo_server`）提供一个与框架其他组件一致的安装入口：
//!   `fmt` 层 + `EnvFilter`，`RUST_LOG` 优先，缺省回退到调用方给定的指令。
//! - **契约（What）**：日志目标集中定义在 [`targets`]，字段名统一使用 `channel`、`token`、
//!   `ops`、`moved`、`worker`，便于按字段检索。

/// 日志目标常量。
pub mod targets {
    /// 选择器引擎（注册、轮询、失败隔离）。
    pub const SELECTOR: &str = "spark_mux::selector";
    /// 端点路由。
    pub const CONNECTOR: &str = "spark_mux::connector";
    /// 驱动运行时。
    pub const DRIVER: &str = "spark_mux::driver";
}

#[cfg(feature = "subscriber")]
pub use install::install_subscriber;

#[cfg(feature = "subscriber")]
mod install {
    use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

    use crate::error::{MuxError, Result};

    /// 安装全局 `tracing` Subscriber。
    ///
    /// - `default_directive`：`RUST_LOG` 未设置或无法解析时使用的过滤指令，例如 `"info"`；
    /// - 外部已设置全局 Subscriber 时返回 [`MuxError::Config`]。
    pub fn install_subscriber(default_directive: &str) -> Result<()> {
        let filter = EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(default_directive))
            .map_err(|err| MuxError::config(format!("invalid log directive: {err}")))?;
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .try_init()
            .map_err(|err| MuxError::config(format!("tracing subscriber already set: {err}")))
    }
}
