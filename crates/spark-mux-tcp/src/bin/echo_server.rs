//! 回显服务器：把每条连接收到的字节原样写回。
//!
//! 用法：`echo_server [config.toml]`。配置文件可包含顶层 `listen` 以及 `[mux.selector]`、
//! `[mux.driver]`、`[tcp]` 三段，全部可省略。标准输入关闭（Ctrl-D）后优雅退出。

use std::{fs, io::Read, sync::Arc};

use serde::Deserialize;
use spark_mux::{
    Connector, MuxConfig, MuxError, Result, SelectorDriver, Session, SessionListener,
    observability::install_subscriber, selector::factory_for,
};
use spark_mux_tcp::{TcpConfig, TcpSessionProvider};
use tracing::{info, warn};

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct EchoConfig {
    listen: String,
    mux: MuxConfig,
    tcp: TcpConfig,
}

impl Default for EchoConfig {
    fn default() -> Self {
        Self {
            listen: "tcp://127.0.0.1:7007".to_owned(),
            mux: MuxConfig::default(),
            tcp: TcpConfig::default(),
        }
    }
}

fn load(path: Option<String>) -> Result<EchoConfig> {
    let Some(path) = path else {
        return Ok(EchoConfig::default());
    };
    let text = fs::read_to_string(&path).map_err(|err| MuxError::io("read config file", err))?;
    let config: EchoConfig = toml::from_str(&text).map_err(|err| MuxError::Config {
        reason: format!("{path}: {err}"),
    })?;
    config.mux.validate()?;
    Ok(config)
}

struct Echo;

impl SessionListener for Echo {
    fn on_accept(&self, _listener: &dyn Session, session: Arc<dyn Session>) {
        info!(session = %session.id(), peer = %session.endpoint(), "client connected");
    }

    fn on_data(&self, session: &dyn Session, data: &[u8]) {
        if let Err(err) = session.send(data) {
            warn!(session = %session.id(), error = %err, "echo failed");
        }
    }

    fn on_close(&self, session: &dyn Session) {
        info!(session = %session.id(), "session closed");
    }

    fn on_error(&self, session: &dyn Session, error: &MuxError) {
        warn!(session = %session.id(), code = error.code(), error = %error, "session error");
    }
}

fn main() -> Result<()> {
    install_subscriber("info")?;
    let config = load(std::env::args().nth(1))?;

    let factory = factory_for(&config.mux.selector, None)?;
    let selector = factory.new_selector()?;
    let driver = SelectorDriver::new(config.mux.driver.clone())?;
    driver.spawn(Arc::clone(&selector))?;

    let connector = Connector::builder()
        .provider(Arc::new(TcpSessionProvider::new(
            Arc::clone(&selector),
            config.tcp.clone(),
        )?))
        .build();
    let listener = connector.listen(Arc::new(Echo), &config.listen)?;
    info!(
        listen = %config.listen,
        local = ?listener.local_addr(),
        kind = ?factory.kind(),
        "echo server ready; close stdin to stop"
    );

    let mut sink = Vec::new();
    let _ = std::io::stdin().read_to_end(&mut sink);

    listener.close()?;
    for report in driver.shutdown() {
        info!(
            worker = %report.worker,
            cycles = report.cycles,
            active_cycles = report.active_cycles,
            errors = report.errors,
            "worker stopped"
        );
    }
    Ok(())
}
