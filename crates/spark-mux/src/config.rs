//! 多路复用子系统的配置模型。
//!
//! # 教案级导览
//!
//! - **Why**：选择器引擎、回调预算与驱动线程规模都需要在部署期调整，而不是重新编译；
//!   统一以 TOML 承载，与仓库其他组件的配置载体保持一致。
//! - **What**：[`MuxConfig`] 由 `[selector]` 与 `[driver]` 两段组成，全部字段均有默认值，
//!   未知字段直接拒绝，避免拼写错误被静默忽略。
//! - **How**：`serde` 反序列化后调用 [`MuxConfig::validate`]，把“数值为零”这类语义错误
//!   统一映射为 [`MuxError::Config`]。
//!
//! ```toml
//! [selector]
//! kind = "readiness"
//! io_budget = 65536
//!
//! [driver]
//! capacity = 2
//! poll_timeout_ms = 50
//! ```

use std::{fs, path::Path, time::Duration};

use serde::Deserialize;

use crate::error::{MuxError, Result};

/// 选择器引擎种类。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SelectorKind {
    /// 基于操作系统就绪通知（epoll/kqueue）的生产引擎。
    #[default]
    Readiness,
    /// 每轮无条件调用全部 Handler 的开发桩引擎。
    RoundRobin,
}

/// 选择器配置。
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SelectorConfig {
    pub kind: SelectorKind,
    /// 单次 `do_read`/`do_write` 的最大字节数。
    pub io_budget: usize,
    /// 单轮从内核取回的最大事件数。
    pub events_capacity: usize,
    /// 轮询引擎在空闲时两次扫描之间的最长间隔。
    pub sweep_interval_ms: u64,
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            kind: SelectorKind::default(),
            io_budget: 64 * 1024,
            events_capacity: 1024,
            sweep_interval_ms: 5,
        }
    }
}

impl SelectorConfig {
    /// 以指定引擎种类构造默认配置。
    pub fn with_kind(kind: SelectorKind) -> Self {
        Self {
            kind,
            ..Self::default()
        }
    }

    /// 覆盖回调预算。
    pub fn with_io_budget(mut self, io_budget: usize) -> Self {
        self.io_budget = io_budget;
        self
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.io_budget == 0 {
            return Err(MuxError::config("selector.io_budget must be positive"));
        }
        if self.events_capacity == 0 {
            return Err(MuxError::config("selector.events_capacity must be positive"));
        }
        if self.sweep_interval_ms == 0 {
            return Err(MuxError::config("selector.sweep_interval_ms must be positive"));
        }
        Ok(())
    }
}

/// 驱动运行时配置。
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DriverConfig {
    /// 同时存活的工作线程上限。
    pub capacity: usize,
    /// 每次 `poll` 的超时。
    pub poll_timeout_ms: u64,
    /// 工作线程名前缀。
    pub thread_name: String,
    /// 连续 `poll` 失败达到该次数后工作线程退出。
    pub max_consecutive_errors: u32,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            capacity: 4,
            poll_timeout_ms: 100,
            thread_name: "spark-mux".to_owned(),
            max_consecutive_errors: 8,
        }
    }
}

impl DriverConfig {
    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.capacity == 0 {
            return Err(MuxError::config("driver.capacity must be positive"));
        }
        if self.poll_timeout_ms == 0 {
            return Err(MuxError::config("driver.poll_timeout_ms must be positive"));
        }
        if self.max_consecutive_errors == 0 {
            return Err(MuxError::config(
                "driver.max_consecutive_errors must be positive",
            ));
        }
        Ok(())
    }
}

/// 顶层配置。
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MuxConfig {
    pub selector: SelectorConfig,
    pub driver: DriverConfig,
}

impl MuxConfig {
    /// 从 TOML 文本解析并校验。
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(text).map_err(|err| MuxError::config(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// 从文件加载。
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = fs::read_to_string(path.as_ref())
            .map_err(|err| MuxError::io("read configuration file", err))?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> Result<()> {
        self.selector.validate()?;
        self.driver.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_yields_defaults() {
        let config = MuxConfig::from_toml_str("").unwrap();
        assert_eq!(config, MuxConfig::default());
        assert_eq!(config.selector.kind, SelectorKind::Readiness);
        assert_eq!(config.driver.poll_timeout(), Duration::from_millis(100));
    }

    #[test]
    fn sections_override_defaults() {
        let config = MuxConfig::from_toml_str(
            r#"
            [selector]
            kind = "round-robin"
            io_budget = 4096

            [driver]
            capacity = 1
            thread_name = "edge"
            "#,
        )
        .unwrap();
        assert_eq!(config.selector.kind, SelectorKind::RoundRobin);
        assert_eq!(config.selector.io_budget, 4096);
        assert_eq!(config.selector.events_capacity, 1024);
        assert_eq!(config.driver.capacity, 1);
        assert_eq!(config.driver.thread_name, "edge");
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let err = MuxConfig::from_toml_str("[selector]\nbudget = 1\n").unwrap_err();
        assert_eq!(err.code(), "spark.mux.config_invalid");
    }

    #[test]
    fn zero_budget_fails_validation() {
        let err = MuxConfig::from_toml_str("[selector]\nio_budget = 0\n").unwrap_err();
        assert!(err.to_string().contains("io_budget"));
    }

    #[test]
    fn zero_poll_timeout_fails_validation() {
        let err = MuxConfig::from_toml_str("[driver]\npoll_timeout_ms = 0\n").unwrap_err();
        assert_eq!(err.code(), "spark.mux.config_invalid");
        assert!(err.to_string().contains("poll_timeout_ms"));
    }
}
