use serde::Deserialize;
use spark_mux::{MuxError, Result};

/// `tcp://` 提供者的套接字参数。
///
/// ```toml
/// [tcp]
/// read_chunk = 16384
/// backlog = 1024
/// nodelay = true
/// max_accepts_per_cycle = 64
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TcpConfig {
    /// 单次 `read` 系统调用使用的缓冲大小；一轮读取仍受选择器的 `io_budget` 约束。
    pub read_chunk: usize,
    /// `listen(2)` 的积压队列长度。
    pub backlog: i32,
    /// 是否为新连接关闭 Nagle 算法。
    pub nodelay: bool,
    /// 监听会话每轮最多接入的连接数。
    pub max_accepts_per_cycle: usize,
}

impl Default for TcpConfig {
    fn default() -> Self {
        Self {
            read_chunk: 16 * 1024,
            backlog: 1024,
            nodelay: true,
            max_accepts_per_cycle: 64,
        }
    }
}

impl TcpConfig {
    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: &str| MuxError::Config {
            reason: reason.to_owned(),
        };
        if self.read_chunk == 0 {
            return Err(invalid("tcp.read_chunk must be positive"));
        }
        if self.backlog <= 0 {
            return Err(invalid("tcp.backlog must be positive"));
        }
        if self.max_accepts_per_cycle == 0 {
            return Err(invalid("tcp.max_accepts_per_cycle must be positive"));
        }
        Ok(())
    }
}
